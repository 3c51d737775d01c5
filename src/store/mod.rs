pub mod memory;
pub mod sqlite;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use memory::InMemoryBackend;
pub use sqlite::SqliteBackend;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    pub fn parse(value: &str) -> Option<Role> {
        match value {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub role: Role,
    pub text: String,
    pub at: DateTime<Utc>,
}

impl StoredMessage {
    pub fn user(text: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self { role: Role::User, text: text.into(), at }
    }

    pub fn assistant(text: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self { role: Role::Assistant, text: text.into(), at }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationRecord {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub finished: bool,
    pub finished_at: Option<DateTime<Utc>>,
    /// Title of the stored document, if one was generated.
    pub title: Option<String>,
}

impl ConversationRecord {
    pub fn new(id: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            started_at,
            finished: false,
            finished_at: None,
            title: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentRecord {
    pub title: String,
    pub content_markdown: String,
    pub content_html: String,
    pub confluence_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Everything one chat turn writes, committed as a unit.
#[derive(Debug, Clone)]
pub struct TurnCommit {
    pub conversation_id: String,
    pub user_text: String,
    pub assistant_text: String,
    pub context_json: String,
    pub at: DateTime<Utc>,
}

/// Persistence for conversations, their messages, slot context and document.
///
/// Missing conversations are created on first write. Reads of unknown ids
/// return empty results rather than errors.
pub trait ConversationStore: Send {
    fn ensure_conversation(&self, id: &str, now: DateTime<Utc>) -> Result<ConversationRecord>;
    fn conversation(&self, id: &str) -> Result<Option<ConversationRecord>>;
    /// Most recently started conversation.
    fn latest_conversation(&self) -> Result<Option<ConversationRecord>>;
    /// Newest first.
    fn list_conversations(&self) -> Result<Vec<ConversationRecord>>;
    /// Messages in the order they were written.
    fn history(&self, id: &str) -> Result<Vec<StoredMessage>>;
    fn load_context(&self, id: &str) -> Result<Option<String>>;
    fn commit_turn(&self, turn: &TurnCommit) -> Result<()>;
    /// Overwrites the document and marks the conversation finished.
    fn save_document(&self, id: &str, document: &DocumentRecord) -> Result<()>;
    fn document(&self, id: &str) -> Result<Option<DocumentRecord>>;
    /// Returns whether anything was removed.
    fn delete_conversation(&self, id: &str) -> Result<bool>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    #[default]
    Sqlite,
}

#[derive(Clone)]
pub enum RuntimeStore {
    InMemory(InMemoryBackend),
    Sqlite(SqliteBackend),
}

impl RuntimeStore {
    pub fn new_inmemory() -> Self {
        RuntimeStore::InMemory(InMemoryBackend::new())
    }

    pub fn open(backend: StorageBackend, database_path: &str) -> Result<Self> {
        match backend {
            StorageBackend::Memory => Ok(Self::new_inmemory()),
            StorageBackend::Sqlite => Ok(RuntimeStore::Sqlite(SqliteBackend::open(database_path)?)),
        }
    }
}

impl ConversationStore for RuntimeStore {
    fn ensure_conversation(&self, id: &str, now: DateTime<Utc>) -> Result<ConversationRecord> {
        match self {
            RuntimeStore::InMemory(s) => s.ensure_conversation(id, now),
            RuntimeStore::Sqlite(s) => s.ensure_conversation(id, now),
        }
    }

    fn conversation(&self, id: &str) -> Result<Option<ConversationRecord>> {
        match self {
            RuntimeStore::InMemory(s) => s.conversation(id),
            RuntimeStore::Sqlite(s) => s.conversation(id),
        }
    }

    fn latest_conversation(&self) -> Result<Option<ConversationRecord>> {
        match self {
            RuntimeStore::InMemory(s) => s.latest_conversation(),
            RuntimeStore::Sqlite(s) => s.latest_conversation(),
        }
    }

    fn list_conversations(&self) -> Result<Vec<ConversationRecord>> {
        match self {
            RuntimeStore::InMemory(s) => s.list_conversations(),
            RuntimeStore::Sqlite(s) => s.list_conversations(),
        }
    }

    fn history(&self, id: &str) -> Result<Vec<StoredMessage>> {
        match self {
            RuntimeStore::InMemory(s) => s.history(id),
            RuntimeStore::Sqlite(s) => s.history(id),
        }
    }

    fn load_context(&self, id: &str) -> Result<Option<String>> {
        match self {
            RuntimeStore::InMemory(s) => s.load_context(id),
            RuntimeStore::Sqlite(s) => s.load_context(id),
        }
    }

    fn commit_turn(&self, turn: &TurnCommit) -> Result<()> {
        match self {
            RuntimeStore::InMemory(s) => s.commit_turn(turn),
            RuntimeStore::Sqlite(s) => s.commit_turn(turn),
        }
    }

    fn save_document(&self, id: &str, document: &DocumentRecord) -> Result<()> {
        match self {
            RuntimeStore::InMemory(s) => s.save_document(id, document),
            RuntimeStore::Sqlite(s) => s.save_document(id, document),
        }
    }

    fn document(&self, id: &str) -> Result<Option<DocumentRecord>> {
        match self {
            RuntimeStore::InMemory(s) => s.document(id),
            RuntimeStore::Sqlite(s) => s.document(id),
        }
    }

    fn delete_conversation(&self, id: &str) -> Result<bool> {
        match self {
            RuntimeStore::InMemory(s) => s.delete_conversation(id),
            RuntimeStore::Sqlite(s) => s.delete_conversation(id),
        }
    }
}

/// Behavioural checks shared by both backends.
#[cfg(test)]
pub(crate) mod contract {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, minute, 0).unwrap()
    }

    fn turn(id: &str, user: &str, minute: u32) -> TurnCommit {
        TurnCommit {
            conversation_id: id.to_string(),
            user_text: user.to_string(),
            assistant_text: format!("re: {}", user),
            context_json: format!("{{\"slots\": {{\"goal\": \"{}\"}}}}", user),
            at: at(minute),
        }
    }

    pub fn commit_turn_appends_both_messages(store: &dyn ConversationStore) {
        store.commit_turn(&turn("a", "first", 1)).unwrap();
        store.commit_turn(&turn("a", "second", 2)).unwrap();

        let history = store.history("a").unwrap();
        let texts: Vec<&str> = history.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "re: first", "second", "re: second"]);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[1].role, Role::Assistant);
        assert_eq!(
            store.load_context("a").unwrap().as_deref(),
            Some("{\"slots\": {\"goal\": \"second\"}}")
        );
        assert!(!store.conversation("a").unwrap().unwrap().finished);
    }

    pub fn unknown_ids_read_as_empty(store: &dyn ConversationStore) {
        assert!(store.conversation("missing").unwrap().is_none());
        assert!(store.history("missing").unwrap().is_empty());
        assert!(store.load_context("missing").unwrap().is_none());
        assert!(store.document("missing").unwrap().is_none());
        assert!(store.latest_conversation().unwrap().is_none());
        assert!(!store.delete_conversation("missing").unwrap());
    }

    pub fn ensure_is_idempotent(store: &dyn ConversationStore) {
        let first = store.ensure_conversation("a", at(1)).unwrap();
        let again = store.ensure_conversation("a", at(5)).unwrap();
        assert_eq!(first.started_at, again.started_at);
        assert_eq!(store.list_conversations().unwrap().len(), 1);
    }

    pub fn documents_overwrite_and_finish(store: &dyn ConversationStore) {
        store.commit_turn(&turn("a", "hello", 1)).unwrap();
        let mut document = DocumentRecord {
            title: "Первый".to_string(),
            content_markdown: "# Первый".to_string(),
            content_html: "<h1>Первый</h1>".to_string(),
            confluence_url: None,
            created_at: at(2),
        };
        store.save_document("a", &document).unwrap();

        document.title = "Второй".to_string();
        document.confluence_url = Some("https://wiki.example/page".to_string());
        document.created_at = at(3);
        store.save_document("a", &document).unwrap();

        assert_eq!(store.document("a").unwrap(), Some(document));
        let record = store.conversation("a").unwrap().unwrap();
        assert!(record.finished);
        assert!(record.finished_at.is_some());
        assert_eq!(record.title.as_deref(), Some("Второй"));
    }

    pub fn listing_is_newest_first(store: &dyn ConversationStore) {
        store.ensure_conversation("old", at(1)).unwrap();
        store.ensure_conversation("new", at(1) + Duration::minutes(10)).unwrap();
        store.ensure_conversation("mid", at(5)).unwrap();

        let ids: Vec<String> = store.list_conversations().unwrap().into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec!["new", "mid", "old"]);
        assert_eq!(store.latest_conversation().unwrap().unwrap().id, "new");
    }

    pub fn delete_cascades(store: &dyn ConversationStore) {
        store.commit_turn(&turn("a", "hello", 1)).unwrap();
        store.commit_turn(&turn("b", "other", 2)).unwrap();
        store
            .save_document(
                "a",
                &DocumentRecord {
                    title: "t".to_string(),
                    content_markdown: String::new(),
                    content_html: String::new(),
                    confluence_url: None,
                    created_at: at(3),
                },
            )
            .unwrap();

        assert!(store.delete_conversation("a").unwrap());
        assert!(store.conversation("a").unwrap().is_none());
        assert!(store.history("a").unwrap().is_empty());
        assert!(store.load_context("a").unwrap().is_none());
        assert!(store.document("a").unwrap().is_none());
        assert_eq!(store.history("b").unwrap().len(), 2);
    }

    pub fn run_all(make: impl Fn() -> Box<dyn ConversationStore>) {
        commit_turn_appends_both_messages(make().as_ref());
        unknown_ids_read_as_empty(make().as_ref());
        ensure_is_idempotent(make().as_ref());
        documents_overwrite_and_finish(make().as_ref());
        listing_is_newest_first(make().as_ref());
        delete_cascades(make().as_ref());
    }
}
