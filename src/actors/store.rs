use crate::store::{
    ConversationRecord, ConversationStore, DocumentRecord, RuntimeStore, StoredMessage, TurnCommit,
};
use actix::prelude::*;
use anyhow::Result;
use chrono::{DateTime, Utc};

// --- Messages ---

#[derive(Message)]
#[rtype(result = "Result<ConversationRecord>")]
pub struct EnsureConversation {
    pub id: String,
    pub now: DateTime<Utc>,
}

#[derive(Message)]
#[rtype(result = "Result<Option<ConversationRecord>>")]
pub struct GetConversation(pub String);

#[derive(Message)]
#[rtype(result = "Result<Option<ConversationRecord>>")]
pub struct LatestConversation;

#[derive(Message)]
#[rtype(result = "Result<Vec<ConversationRecord>>")]
pub struct ListConversations;

#[derive(Message)]
#[rtype(result = "Result<Vec<StoredMessage>>")]
pub struct GetHistory(pub String);

#[derive(Message)]
#[rtype(result = "Result<Option<String>>")]
pub struct LoadContext(pub String);

#[derive(Message)]
#[rtype(result = "Result<()>")]
pub struct CommitTurn(pub TurnCommit);

#[derive(Message)]
#[rtype(result = "Result<()>")]
pub struct SaveDocument {
    pub id: String,
    pub document: DocumentRecord,
}

#[derive(Message)]
#[rtype(result = "Result<Option<DocumentRecord>>")]
pub struct GetDocument(pub String);

#[derive(Message)]
#[rtype(result = "Result<bool>")]
pub struct DeleteConversation(pub String);

// --- Actor ---

/// Runs blocking storage calls on a `SyncArbiter` thread pool.
pub struct StoreActor {
    store: RuntimeStore,
}

impl StoreActor {
    pub fn new(store: RuntimeStore) -> Self {
        Self { store }
    }
}

impl Actor for StoreActor {
    type Context = SyncContext<Self>;
}

// --- Handlers ---

impl Handler<EnsureConversation> for StoreActor {
    type Result = Result<ConversationRecord>;

    fn handle(&mut self, msg: EnsureConversation, _ctx: &mut Self::Context) -> Self::Result {
        self.store.ensure_conversation(&msg.id, msg.now)
    }
}

impl Handler<GetConversation> for StoreActor {
    type Result = Result<Option<ConversationRecord>>;

    fn handle(&mut self, msg: GetConversation, _ctx: &mut Self::Context) -> Self::Result {
        self.store.conversation(&msg.0)
    }
}

impl Handler<LatestConversation> for StoreActor {
    type Result = Result<Option<ConversationRecord>>;

    fn handle(&mut self, _msg: LatestConversation, _ctx: &mut Self::Context) -> Self::Result {
        self.store.latest_conversation()
    }
}

impl Handler<ListConversations> for StoreActor {
    type Result = Result<Vec<ConversationRecord>>;

    fn handle(&mut self, _msg: ListConversations, _ctx: &mut Self::Context) -> Self::Result {
        self.store.list_conversations()
    }
}

impl Handler<GetHistory> for StoreActor {
    type Result = Result<Vec<StoredMessage>>;

    fn handle(&mut self, msg: GetHistory, _ctx: &mut Self::Context) -> Self::Result {
        self.store.history(&msg.0)
    }
}

impl Handler<LoadContext> for StoreActor {
    type Result = Result<Option<String>>;

    fn handle(&mut self, msg: LoadContext, _ctx: &mut Self::Context) -> Self::Result {
        self.store.load_context(&msg.0)
    }
}

impl Handler<CommitTurn> for StoreActor {
    type Result = Result<()>;

    fn handle(&mut self, msg: CommitTurn, _ctx: &mut Self::Context) -> Self::Result {
        self.store.commit_turn(&msg.0)
    }
}

impl Handler<SaveDocument> for StoreActor {
    type Result = Result<()>;

    fn handle(&mut self, msg: SaveDocument, _ctx: &mut Self::Context) -> Self::Result {
        self.store.save_document(&msg.id, &msg.document)
    }
}

impl Handler<GetDocument> for StoreActor {
    type Result = Result<Option<DocumentRecord>>;

    fn handle(&mut self, msg: GetDocument, _ctx: &mut Self::Context) -> Self::Result {
        self.store.document(&msg.0)
    }
}

impl Handler<DeleteConversation> for StoreActor {
    type Result = Result<bool>;

    fn handle(&mut self, msg: DeleteConversation, _ctx: &mut Self::Context) -> Self::Result {
        let removed = self.store.delete_conversation(&msg.0)?;
        if removed {
            log::info!("Deleted conversation {}", msg.0);
        }
        Ok(removed)
    }
}
