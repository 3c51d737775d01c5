use super::{ConversationRecord, ConversationStore, DocumentRecord, StoredMessage, TurnCommit};
use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

struct Entry {
    seq: u64,
    record: ConversationRecord,
    messages: Vec<StoredMessage>,
    context: Option<String>,
    document: Option<DocumentRecord>,
}

#[derive(Default)]
struct State {
    next_seq: u64,
    conversations: HashMap<String, Entry>,
}

impl State {
    fn entry(&mut self, id: &str, now: DateTime<Utc>) -> &mut Entry {
        let next_seq = &mut self.next_seq;
        self.conversations.entry(id.to_string()).or_insert_with(|| {
            *next_seq += 1;
            Entry {
                seq: *next_seq,
                record: ConversationRecord::new(id, now),
                messages: Vec::new(),
                context: None,
                document: None,
            }
        })
    }

    fn sorted(&self) -> Vec<&Entry> {
        let mut entries: Vec<&Entry> = self.conversations.values().collect();
        entries.sort_by(|a, b| {
            b.record
                .started_at
                .cmp(&a.record.started_at)
                .then(b.seq.cmp(&a.seq))
        });
        entries
    }
}

fn record_of(entry: &Entry) -> ConversationRecord {
    ConversationRecord {
        title: entry.document.as_ref().map(|d| d.title.clone()),
        ..entry.record.clone()
    }
}

/// Process-local store. Contents are lost on restart.
#[derive(Clone, Default)]
pub struct InMemoryBackend {
    state: Arc<Mutex<State>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>> {
        self.state.lock().map_err(|_| anyhow!("in-memory store lock poisoned"))
    }
}

impl ConversationStore for InMemoryBackend {
    fn ensure_conversation(&self, id: &str, now: DateTime<Utc>) -> Result<ConversationRecord> {
        let mut state = self.lock()?;
        Ok(record_of(state.entry(id, now)))
    }

    fn conversation(&self, id: &str) -> Result<Option<ConversationRecord>> {
        Ok(self.lock()?.conversations.get(id).map(record_of))
    }

    fn latest_conversation(&self) -> Result<Option<ConversationRecord>> {
        Ok(self.lock()?.sorted().first().map(|e| record_of(e)))
    }

    fn list_conversations(&self) -> Result<Vec<ConversationRecord>> {
        Ok(self.lock()?.sorted().into_iter().map(record_of).collect())
    }

    fn history(&self, id: &str) -> Result<Vec<StoredMessage>> {
        Ok(self
            .lock()?
            .conversations
            .get(id)
            .map(|e| e.messages.clone())
            .unwrap_or_default())
    }

    fn load_context(&self, id: &str) -> Result<Option<String>> {
        Ok(self.lock()?.conversations.get(id).and_then(|e| e.context.clone()))
    }

    fn commit_turn(&self, turn: &TurnCommit) -> Result<()> {
        let mut state = self.lock()?;
        let entry = state.entry(&turn.conversation_id, turn.at);
        entry.messages.push(StoredMessage::user(&turn.user_text, turn.at));
        entry.messages.push(StoredMessage::assistant(&turn.assistant_text, turn.at));
        entry.context = Some(turn.context_json.clone());
        Ok(())
    }

    fn save_document(&self, id: &str, document: &DocumentRecord) -> Result<()> {
        let mut state = self.lock()?;
        let entry = state.entry(id, document.created_at);
        entry.document = Some(document.clone());
        entry.record.finished = true;
        entry.record.finished_at = Some(document.created_at);
        Ok(())
    }

    fn document(&self, id: &str) -> Result<Option<DocumentRecord>> {
        Ok(self.lock()?.conversations.get(id).and_then(|e| e.document.clone()))
    }

    fn delete_conversation(&self, id: &str) -> Result<bool> {
        Ok(self.lock()?.conversations.remove(id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::contract;

    #[test]
    fn test_in_memory_backend_contract() {
        contract::run_all(|| Box::new(InMemoryBackend::new()));
    }

    #[test]
    fn test_clones_share_state() {
        let store = InMemoryBackend::new();
        let clone = store.clone();
        store.ensure_conversation("a", Utc::now()).unwrap();
        assert!(clone.conversation("a").unwrap().is_some());
    }
}
