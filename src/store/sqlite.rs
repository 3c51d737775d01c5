use super::{ConversationRecord, ConversationStore, DocumentRecord, Role, StoredMessage, TurnCommit};
use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

const CONVERSATION_COLUMNS: &str = "c.id, c.started_at, c.finished, c.finished_at, d.title";

/// SQLite store in WAL mode. Clones share one connection.
#[derive(Clone)]
pub struct SqliteBackend {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteBackend {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating database directory '{}'", parent.display()))?;
        }

        let conn = Connection::open(path).with_context(|| format!("opening SQLite database '{}'", path.display()))?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("configuring SQLite pragmas")?;

        let backend = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        backend.migrate()?;
        log::debug!("SQLite store ready at {}", path.display());
        Ok(backend)
    }

    fn migrate(&self) -> Result<()> {
        self.lock()?
            .execute_batch(
                "
            CREATE TABLE IF NOT EXISTS conversations (
                id            TEXT PRIMARY KEY,
                started_at    TEXT NOT NULL,
                finished      INTEGER NOT NULL DEFAULT 0,
                finished_at   TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_conversations_started
                ON conversations(started_at DESC);

            CREATE TABLE IF NOT EXISTS messages (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                conversation_id TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
                role            TEXT NOT NULL,
                text            TEXT NOT NULL,
                at              TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_messages_conversation
                ON messages(conversation_id, id);

            CREATE TABLE IF NOT EXISTS session_contexts (
                conversation_id TEXT PRIMARY KEY REFERENCES conversations(id) ON DELETE CASCADE,
                slots_json      TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS documents (
                conversation_id  TEXT PRIMARY KEY REFERENCES conversations(id) ON DELETE CASCADE,
                title            TEXT NOT NULL,
                content_markdown TEXT NOT NULL,
                content_html     TEXT NOT NULL,
                confluence_url   TEXT,
                created_at       TEXT NOT NULL
            );
            ",
            )
            .context("running SQLite migrations")
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| anyhow!("SQLite connection lock poisoned"))
    }

    fn query_conversations(&self, tail: &str) -> Result<Vec<ConversationRecord>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM conversations c LEFT JOIN documents d ON d.conversation_id = c.id \
             ORDER BY c.started_at DESC, c.rowid DESC {}",
            CONVERSATION_COLUMNS, tail
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], conversation_from_row)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().context("listing conversations")
    }
}

fn to_text(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn optional_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(_) => timestamp(row, idx).map(Some),
        None => Ok(None),
    }
}

fn conversation_from_row(row: &Row<'_>) -> rusqlite::Result<ConversationRecord> {
    Ok(ConversationRecord {
        id: row.get(0)?,
        started_at: timestamp(row, 1)?,
        finished: row.get::<_, i64>(2)? != 0,
        finished_at: optional_timestamp(row, 3)?,
        title: row.get(4)?,
    })
}

fn insert_conversation(conn: &Connection, id: &str, now: DateTime<Utc>) -> rusqlite::Result<usize> {
    conn.execute(
        "INSERT OR IGNORE INTO conversations (id, started_at) VALUES (?1, ?2)",
        params![id, to_text(now)],
    )
}

impl ConversationStore for SqliteBackend {
    fn ensure_conversation(&self, id: &str, now: DateTime<Utc>) -> Result<ConversationRecord> {
        {
            let conn = self.lock()?;
            insert_conversation(&conn, id, now).context("creating conversation")?;
        }
        self.conversation(id)?
            .ok_or_else(|| anyhow!("conversation '{}' vanished after insert", id))
    }

    fn conversation(&self, id: &str) -> Result<Option<ConversationRecord>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM conversations c LEFT JOIN documents d ON d.conversation_id = c.id WHERE c.id = ?1",
            CONVERSATION_COLUMNS
        );
        conn.query_row(&sql, params![id], conversation_from_row)
            .optional()
            .context("loading conversation")
    }

    fn latest_conversation(&self) -> Result<Option<ConversationRecord>> {
        Ok(self.query_conversations("LIMIT 1")?.into_iter().next())
    }

    fn list_conversations(&self) -> Result<Vec<ConversationRecord>> {
        self.query_conversations("")
    }

    fn history(&self, id: &str) -> Result<Vec<StoredMessage>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT role, text, at FROM messages WHERE conversation_id = ?1 ORDER BY id ASC")?;
        let rows = stmt.query_map(params![id], |row| {
            let role: String = row.get(0)?;
            Ok(StoredMessage {
                role: Role::parse(&role).unwrap_or(Role::Assistant),
                text: row.get(1)?,
                at: timestamp(row, 2)?,
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>().context("loading history")
    }

    fn load_context(&self, id: &str) -> Result<Option<String>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT slots_json FROM session_contexts WHERE conversation_id = ?1",
            params![id],
            |row| row.get(0),
        )
        .optional()
        .context("loading session context")
    }

    fn commit_turn(&self, turn: &TurnCommit) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        insert_conversation(&tx, &turn.conversation_id, turn.at)?;
        for (role, text) in [(Role::User, &turn.user_text), (Role::Assistant, &turn.assistant_text)] {
            tx.execute(
                "INSERT INTO messages (conversation_id, role, text, at) VALUES (?1, ?2, ?3, ?4)",
                params![turn.conversation_id, role.as_str(), text, to_text(turn.at)],
            )?;
        }
        tx.execute(
            "INSERT INTO session_contexts (conversation_id, slots_json) VALUES (?1, ?2)
             ON CONFLICT(conversation_id) DO UPDATE SET slots_json = excluded.slots_json",
            params![turn.conversation_id, turn.context_json],
        )?;
        tx.commit().context("committing chat turn")
    }

    fn save_document(&self, id: &str, document: &DocumentRecord) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        insert_conversation(&tx, id, document.created_at)?;
        tx.execute(
            "INSERT INTO documents (conversation_id, title, content_markdown, content_html, confluence_url, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(conversation_id) DO UPDATE SET
                title = excluded.title,
                content_markdown = excluded.content_markdown,
                content_html = excluded.content_html,
                confluence_url = excluded.confluence_url,
                created_at = excluded.created_at",
            params![
                id,
                document.title,
                document.content_markdown,
                document.content_html,
                document.confluence_url,
                to_text(document.created_at)
            ],
        )?;
        tx.execute(
            "UPDATE conversations SET finished = 1, finished_at = ?2 WHERE id = ?1",
            params![id, to_text(document.created_at)],
        )?;
        tx.commit().context("saving document")
    }

    fn document(&self, id: &str) -> Result<Option<DocumentRecord>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT title, content_markdown, content_html, confluence_url, created_at
             FROM documents WHERE conversation_id = ?1",
            params![id],
            |row| {
                Ok(DocumentRecord {
                    title: row.get(0)?,
                    content_markdown: row.get(1)?,
                    content_html: row.get(2)?,
                    confluence_url: row.get(3)?,
                    created_at: timestamp(row, 4)?,
                })
            },
        )
        .optional()
        .context("loading document")
    }

    fn delete_conversation(&self, id: &str) -> Result<bool> {
        let conn = self.lock()?;
        let removed = conn
            .execute("DELETE FROM conversations WHERE id = ?1", params![id])
            .context("deleting conversation")?;
        Ok(removed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::contract;
    use tempfile::tempdir;

    #[test]
    fn test_sqlite_backend_contract() {
        let dir = tempdir().unwrap();
        let counter = std::cell::Cell::new(0);
        contract::run_all(|| {
            counter.set(counter.get() + 1);
            let path = dir.path().join(format!("store-{}.db", counter.get()));
            Box::new(SqliteBackend::open(path).unwrap())
        });
    }

    #[test]
    fn test_data_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("brd.db");
        {
            let store = SqliteBackend::open(&path).unwrap();
            store
                .commit_turn(&TurnCommit {
                    conversation_id: "a".to_string(),
                    user_text: "Цель: снизить отток".to_string(),
                    assistant_text: "Опишите проблему".to_string(),
                    context_json: "{}".to_string(),
                    at: Utc::now(),
                })
                .unwrap();
        }
        let store = SqliteBackend::open(&path).unwrap();
        assert_eq!(store.history("a").unwrap().len(), 2);
        assert_eq!(store.load_context("a").unwrap().as_deref(), Some("{}"));
    }
}
