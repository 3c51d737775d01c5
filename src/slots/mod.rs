pub mod context;
pub mod delta;
pub mod extractor;
pub mod planner;
pub mod policy;
pub mod schema;

use context::SessionContext;
use delta::SlotDelta;
use extractor::{KeywordExtractor, SlotExtractor};
use serde::Serialize;

pub use planner::next_question;

/// Lifecycle of one conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationState {
    Collecting,
    Ready,
    Finished,
}

impl ConversationState {
    pub fn of(finished: bool, ready: bool) -> Self {
        match (finished, ready) {
            (true, _) => ConversationState::Finished,
            (false, true) => ConversationState::Ready,
            (false, false) => ConversationState::Collecting,
        }
    }
}

pub fn extract_and_merge(current: &SessionContext, user_message: &str, provider_delta: &SlotDelta) -> (SessionContext, bool) {
    extract_and_merge_with(&KeywordExtractor::default(), current, user_message, provider_delta)
}

/// Merges the provider's delta, or the extractor's when the provider proposed
/// nothing, and reports readiness of the merged snapshot.
pub fn extract_and_merge_with(
    extractor: &dyn SlotExtractor,
    current: &SessionContext,
    user_message: &str,
    provider_delta: &SlotDelta,
) -> (SessionContext, bool) {
    let delta = if provider_delta.is_empty() {
        let local = extractor.extract(user_message);
        log::debug!("Provider delta empty, local extractor proposed {} slot(s)", local.len());
        local
    } else {
        provider_delta.clone()
    };

    let merged = current.merged_with(&delta);
    let ready = merged.is_complete();
    (merged, ready)
}
