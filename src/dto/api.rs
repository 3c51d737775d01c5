use crate::actors::orchestrator::{ChatOutcome, FinishOutcome};
use crate::actors::health::SystemHealth;
use crate::slots::ConversationState;
use crate::slots::context::SlotMeta;
use crate::slots::schema::{SlotMap, SlotName};
use crate::store::{ConversationRecord, DocumentRecord, StoredMessage};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// --- Requests ---

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub session_id: Option<String>,
    pub message: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct FinishRequest {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DiagramRequest {
    pub session_id: String,
}

// --- Responses ---

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub metrics: SystemHealth,
}

#[derive(Debug, Serialize)]
pub struct ChatReply {
    pub session_id: String,
    pub reply: String,
    pub finished: bool,
    pub ready: bool,
    pub state: ConversationState,
    pub missing: Vec<SlotName>,
}

impl From<ChatOutcome> for ChatReply {
    fn from(outcome: ChatOutcome) -> Self {
        Self {
            session_id: outcome.session_id,
            reply: outcome.reply,
            finished: outcome.finished,
            ready: outcome.ready,
            state: outcome.state,
            missing: outcome.missing,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HistoryItem {
    pub sender: String,
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub session_id: String,
    pub items: Vec<HistoryItem>,
}

impl HistoryResponse {
    pub fn new(session_id: String, messages: Vec<StoredMessage>) -> Self {
        Self {
            session_id,
            items: messages
                .into_iter()
                .map(|m| HistoryItem {
                    sender: m.role.as_str().to_string(),
                    text: m.text,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DocumentResponse {
    pub session_id: String,
    pub title: String,
    pub content_markdown: String,
    pub confluence_url: Option<String>,
}

impl From<FinishOutcome> for DocumentResponse {
    fn from(outcome: FinishOutcome) -> Self {
        Self::from_record(outcome.session_id, outcome.document)
    }
}

impl DocumentResponse {
    pub fn from_record(session_id: String, document: DocumentRecord) -> Self {
        Self {
            session_id,
            title: document.title,
            content_markdown: document.content_markdown,
            confluence_url: document.confluence_url,
        }
    }

    /// Returned for conversations that were never finished.
    pub fn placeholder(session_id: String, title: &str) -> Self {
        Self {
            session_id,
            title: title.to_string(),
            content_markdown: String::new(),
            confluence_url: None,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ContextResponse {
    pub session_id: String,
    pub slots: SlotMap,
    pub meta: BTreeMap<SlotName, SlotMeta>,
    pub ready: bool,
    pub missing: Vec<SlotName>,
    pub next_question: String,
}

#[derive(Debug, Serialize)]
pub struct SessionItem {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub finished: bool,
    pub title: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SessionsResponse {
    pub items: Vec<SessionItem>,
}

impl From<Vec<ConversationRecord>> for SessionsResponse {
    fn from(records: Vec<ConversationRecord>) -> Self {
        Self {
            items: records
                .into_iter()
                .map(|r| SessionItem {
                    id: r.id,
                    started_at: r.started_at,
                    finished: r.finished,
                    title: r.title,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DiagramResponse {
    pub image_base64: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub deleted: bool,
}
