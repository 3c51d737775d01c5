use crate::actors::health::{HealthActor, ReportProviderLatency, ReportTurnLatency};
use crate::actors::store::{self as db, StoreActor};
use crate::confluence::{Attachment, ConfluencePublisher};
use crate::document::diagram::{DIAGRAM_FILENAME, DIAGRAM_MIME};
use crate::document::{generate_diagram, markdown_to_html, render_markdown};
use crate::provider::Assistant;
use crate::slots::context::SessionContext;
use crate::slots::delta::SlotDelta;
use crate::slots::extractor::extract_from_history;
use crate::slots::policy::CompletenessPolicy;
use crate::slots::schema::{SlotName, scalar};
use crate::slots::{ConversationState, extract_and_merge, next_question};
use crate::store::{DocumentRecord, Role, TurnCommit};
use actix::dev::ToEnvelope;
use actix::prelude::*;
use anyhow::{Result, anyhow};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;

type ConversationLocks = Arc<DashMap<String, Arc<Mutex<()>>>>;

// --- Messages ---

#[derive(Message)]
#[rtype(result = "Result<ChatOutcome>")]
pub struct ChatTurn {
    pub session_id: Option<String>,
    pub message: String,
}

#[derive(Message)]
#[rtype(result = "Result<FinishOutcome>")]
pub struct Finish {
    pub session_id: Option<String>,
    pub title: Option<String>,
}

/// Base64 SVG of the process diagram, `None` when the conversation has no
/// data to draw.
#[derive(Message)]
#[rtype(result = "Result<Option<String>>")]
pub struct DiagramPreview {
    pub session_id: String,
}

#[derive(Message)]
#[rtype(result = "Result<bool>")]
pub struct DeleteConversation(pub String);

// --- Data Structures ---

#[derive(Debug, Clone)]
pub struct ChatOutcome {
    pub session_id: String,
    pub reply: String,
    pub finished: bool,
    pub ready: bool,
    pub state: ConversationState,
    pub missing: Vec<SlotName>,
}

#[derive(Debug, Clone)]
pub struct FinishOutcome {
    pub session_id: String,
    pub document: DocumentRecord,
}

// --- Actor ---

/// Runs the chat and finish pipelines. Storage goes through `StoreActor`;
/// everything touching one conversation holds that conversation's lock.
pub struct OrchestratorActor {
    store: Addr<StoreActor>,
    health: Addr<HealthActor>,
    assistant: Assistant,
    publisher: ConfluencePublisher,
    default_title: String,
    locks: ConversationLocks,
}

impl OrchestratorActor {
    pub fn new(
        store: Addr<StoreActor>,
        health: Addr<HealthActor>,
        assistant: Assistant,
        publisher: ConfluencePublisher,
        default_title: impl Into<String>,
    ) -> Self {
        Self {
            store,
            health,
            assistant,
            publisher,
            default_title: default_title.into(),
            locks: Arc::new(DashMap::new()),
        }
    }
}

impl Actor for OrchestratorActor {
    type Context = Context<Self>;
}

fn lock_for(locks: &ConversationLocks, id: &str) -> Arc<Mutex<()>> {
    locks.entry(id.to_string()).or_default().value().clone()
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn new_conversation_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

async fn call<M, T>(store: &Addr<StoreActor>, msg: M) -> Result<T>
where
    M: Message<Result = Result<T>> + Send + 'static,
    T: Send + 'static,
    StoreActor: Handler<M>,
    <StoreActor as Actor>::Context: ToEnvelope<StoreActor, M>,
{
    match store.send(msg).await {
        Ok(result) => result,
        Err(e) => {
            log::error!("Mailbox error calling store actor: {}", e);
            Err(anyhow!("storage unavailable: {}", e))
        }
    }
}

fn elapsed_ms(since: Instant) -> f64 {
    since.elapsed().as_secs_f64() * 1000.0
}

// --- Handlers ---

impl Handler<ChatTurn> for OrchestratorActor {
    type Result = ResponseFuture<Result<ChatOutcome>>;

    fn handle(&mut self, msg: ChatTurn, _ctx: &mut Self::Context) -> Self::Result {
        let store = self.store.clone();
        let health = self.health.clone();
        let assistant = self.assistant.clone();
        let locks = self.locks.clone();

        Box::pin(async move {
            let started = Instant::now();
            let id = non_blank(msg.session_id).unwrap_or_else(new_conversation_id);
            let lock = lock_for(&locks, &id);
            let _guard = lock.lock().await;

            let now = Utc::now();
            let record = call(&store, db::EnsureConversation { id: id.clone(), now }).await?;
            let history = call(&store, db::GetHistory(id.clone())).await?;
            let encoded = call(&store, db::LoadContext(id.clone())).await?;
            let context = SessionContext::from_json(encoded.as_deref());

            let provider_started = Instant::now();
            let envelope = assistant.reply_and_slots(&history, &msg.message, context.slots()).await;
            if assistant.is_enabled() {
                health.do_send(ReportProviderLatency(elapsed_ms(provider_started)));
            }

            let (reply, provider_delta) = match envelope {
                Some(envelope) => (envelope.reply, envelope.delta),
                None => (None, SlotDelta::new()),
            };
            let (mut merged, _) = extract_and_merge(&context, &msg.message, &provider_delta);

            let user_turns = history
                .iter()
                .filter(|m| m.role == Role::User)
                .map(|m| m.text.as_str())
                .chain(std::iter::once(msg.message.as_str()));
            merged.update_at(&extract_from_history(user_turns), now);

            let policy = CompletenessPolicy::standard();
            let ready = policy.is_satisfied(merged.slots());
            let missing = policy.missing(merged.slots());
            let reply = reply.unwrap_or_else(|| next_question(merged.slots()).to_string());

            call(
                &store,
                db::CommitTurn(TurnCommit {
                    conversation_id: id.clone(),
                    user_text: msg.message,
                    assistant_text: reply.clone(),
                    context_json: merged.to_json(),
                    at: now,
                }),
            )
            .await?;

            health.do_send(ReportTurnLatency(elapsed_ms(started)));
            log::debug!("Chat turn for {} done, ready={}, missing={:?}", id, ready, missing);

            Ok(ChatOutcome {
                session_id: id,
                reply,
                finished: record.finished,
                ready,
                state: ConversationState::of(record.finished, ready),
                missing,
            })
        })
    }
}

impl Handler<Finish> for OrchestratorActor {
    type Result = ResponseFuture<Result<FinishOutcome>>;

    fn handle(&mut self, msg: Finish, _ctx: &mut Self::Context) -> Self::Result {
        let store = self.store.clone();
        let assistant = self.assistant.clone();
        let publisher = self.publisher.clone();
        let default_title = self.default_title.clone();
        let locks = self.locks.clone();

        Box::pin(async move {
            let id = match non_blank(msg.session_id) {
                Some(id) => id,
                None => match call(&store, db::LatestConversation).await? {
                    Some(latest) => latest.id,
                    None => new_conversation_id(),
                },
            };
            let lock = lock_for(&locks, &id);
            let _guard = lock.lock().await;

            let now = Utc::now();
            call(&store, db::EnsureConversation { id: id.clone(), now }).await?;
            let encoded = call(&store, db::LoadContext(id.clone())).await?;
            let context = SessionContext::from_json(encoded.as_deref());
            let slots = context.slots();

            let title = non_blank(msg.title)
                .or_else(|| scalar(slots, SlotName::Title).map(str::to_string))
                .unwrap_or(default_title);

            let content_markdown = match assistant.generate_document(slots, &title).await {
                Some(markdown) => markdown,
                None => render_markdown(slots, &title),
            };
            let content_html = markdown_to_html(&content_markdown);

            let confluence_url = if publisher.is_configured() {
                let diagram = generate_diagram(&assistant, slots).await;
                let attachment = diagram.as_ref().map(|d| Attachment {
                    filename: DIAGRAM_FILENAME,
                    mime: DIAGRAM_MIME,
                    bytes: d.bytes(),
                });
                match publisher.publish(&title, &content_html, attachment).await {
                    Ok(url) => url,
                    Err(e) => {
                        log::warn!("Publishing '{}' failed: {:#}", title, e);
                        None
                    }
                }
            } else {
                None
            };

            let document = DocumentRecord {
                title,
                content_markdown,
                content_html,
                confluence_url,
                created_at: now,
            };
            call(
                &store,
                db::SaveDocument {
                    id: id.clone(),
                    document: document.clone(),
                },
            )
            .await?;
            log::info!("Conversation {} finished with document '{}'", id, document.title);

            Ok(FinishOutcome { session_id: id, document })
        })
    }
}

impl Handler<DiagramPreview> for OrchestratorActor {
    type Result = ResponseFuture<Result<Option<String>>>;

    fn handle(&mut self, msg: DiagramPreview, _ctx: &mut Self::Context) -> Self::Result {
        let store = self.store.clone();
        let assistant = self.assistant.clone();

        Box::pin(async move {
            let encoded = call(&store, db::LoadContext(msg.session_id)).await?;
            let context = SessionContext::from_json(encoded.as_deref());
            let diagram = generate_diagram(&assistant, context.slots()).await;
            Ok(diagram.map(|d| BASE64.encode(d.bytes())))
        })
    }
}

impl Handler<DeleteConversation> for OrchestratorActor {
    type Result = ResponseFuture<Result<bool>>;

    fn handle(&mut self, msg: DeleteConversation, _ctx: &mut Self::Context) -> Self::Result {
        let store = self.store.clone();
        let locks = self.locks.clone();

        Box::pin(async move {
            let lock = lock_for(&locks, &msg.0);
            let deleted = {
                let _guard = lock.lock().await;
                call(&store, db::DeleteConversation(msg.0.clone())).await?
            };
            locks.remove(&msg.0);
            Ok(deleted)
        })
    }
}
