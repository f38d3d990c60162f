//! Session persistence for conversation history.
//!
//! A session is an append-only message log owned by one user. Every
//! method takes the caller's `user_id`; sessions owned by another user are
//! invisible and surface as [`StoreError::NotFound`]. Messages are returned
//! in insertion order, which is the transcript order fed to the model.

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::db::Database;
use crate::error::{StoreError, StoreResult};

// ═══════════════════════════════════════════════════════════════════════
//  Types
// ═══════════════════════════════════════════════════════════════════════

/// A conversation session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Unique identifier (UUID v7).
    pub id: String,
    /// Owner of the session.
    pub user_id: String,
    /// Display name. Starts as a placeholder until a title is generated.
    pub name: String,
    /// Unix timestamp when the session was created.
    pub created_at: i64,
    /// Unix timestamp of the last message or rename.
    pub updated_at: i64,
}

/// A persisted message within a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMessage {
    /// Auto-incrementing row ID.
    pub id: i64,
    pub session_id: String,
    /// One of `system`, `user`, `assistant`, `tool`.
    pub role: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub widget_id: Option<String>,
    pub created_at: i64,
}

/// A message about to be appended to a session.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub role: String,
    pub content: String,
    pub structured_content: Option<serde_json::Value>,
    pub widget_id: Option<String>,
}

impl NewMessage {
    /// A plain user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
            structured_content: None,
            widget_id: None,
        }
    }

    /// A plain assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".into(),
            content: content.into(),
            structured_content: None,
            widget_id: None,
        }
    }

    pub fn with_structured_content(mut self, value: Option<serde_json::Value>) -> Self {
        self.structured_content = value;
        self
    }

    pub fn with_widget_id(mut self, widget_id: Option<String>) -> Self {
        self.widget_id = widget_id;
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  SessionStore
// ═══════════════════════════════════════════════════════════════════════

/// User-scoped CRUD on sessions and their messages.
#[derive(Clone)]
pub struct SessionStore {
    db: Database,
}

impl SessionStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a new session owned by `user_id`.
    #[instrument(skip(self))]
    pub async fn create_session(&self, user_id: &str, name: &str) -> StoreResult<Session> {
        let now = Utc::now().timestamp();
        let session = Session {
            id: Uuid::now_v7().to_string(),
            user_id: user_id.to_string(),
            name: name.to_string(),
            created_at: now,
            updated_at: now,
        };

        let row = session.clone();
        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO sessions (id, user_id, name, created_at, updated_at) \
                     VALUES (?1, ?2, ?3, ?4, ?4)",
                    rusqlite::params![row.id, row.user_id, row.name, row.created_at],
                )?;
                Ok(())
            })
            .await?;

        debug!(session_id = %session.id, "session created");
        Ok(session)
    }

    /// List the user's sessions, most recently updated first.
    #[instrument(skip(self))]
    pub async fn list_sessions(&self, user_id: &str) -> StoreResult<Vec<Session>> {
        let user_id = user_id.to_string();
        self.db
            .execute(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, user_id, name, created_at, updated_at FROM sessions \
                     WHERE user_id = ?1 ORDER BY updated_at DESC, id DESC",
                )?;
                let rows = stmt
                    .query_map(rusqlite::params![user_id], session_from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
    }

    /// Fetch one session.
    #[instrument(skip(self))]
    pub async fn get_session(&self, user_id: &str, session_id: &str) -> StoreResult<Session> {
        let user_id = user_id.to_string();
        let session_id = session_id.to_string();
        self.db
            .execute(move |conn| fetch_owned(conn, &user_id, &session_id))
            .await
    }

    /// Rename a session. Returns the updated row.
    #[instrument(skip(self))]
    pub async fn rename_session(
        &self,
        user_id: &str,
        session_id: &str,
        name: &str,
    ) -> StoreResult<Session> {
        if name.trim().is_empty() {
            return Err(StoreError::InvalidArgument(
                "session name must not be empty".into(),
            ));
        }

        let user_id = user_id.to_string();
        let session_id = session_id.to_string();
        let name = name.trim().to_string();
        let now = Utc::now().timestamp();
        self.db
            .execute(move |conn| {
                let updated = conn.execute(
                    "UPDATE sessions SET name = ?3, updated_at = ?4 WHERE id = ?1 AND user_id = ?2",
                    rusqlite::params![session_id, user_id, name, now],
                )?;
                if updated == 0 {
                    return Err(not_found(&session_id));
                }
                fetch_owned(conn, &user_id, &session_id)
            })
            .await
    }

    /// Delete a session and all its messages (cascade).
    #[instrument(skip(self))]
    pub async fn delete_session(&self, user_id: &str, session_id: &str) -> StoreResult<()> {
        let user_id = user_id.to_string();
        let session_id = session_id.to_string();
        self.db
            .execute(move |conn| {
                let deleted = conn.execute(
                    "DELETE FROM sessions WHERE id = ?1 AND user_id = ?2",
                    rusqlite::params![session_id, user_id],
                )?;
                if deleted == 0 {
                    return Err(not_found(&session_id));
                }
                Ok(())
            })
            .await
    }

    /// All messages of a session in insertion order.
    #[instrument(skip(self))]
    pub async fn get_messages(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> StoreResult<Vec<SessionMessage>> {
        let user_id = user_id.to_string();
        let session_id = session_id.to_string();
        self.db
            .execute(move |conn| {
                fetch_owned(conn, &user_id, &session_id)?;

                let mut stmt = conn.prepare(
                    "SELECT id, session_id, role, content, structured_content, widget_id, created_at \
                     FROM session_messages WHERE session_id = ?1 ORDER BY id ASC",
                )?;
                let raw = stmt
                    .query_map(rusqlite::params![session_id], |row| {
                        Ok((
                            SessionMessage {
                                id: row.get(0)?,
                                session_id: row.get(1)?,
                                role: row.get(2)?,
                                content: row.get(3)?,
                                structured_content: None,
                                widget_id: row.get(5)?,
                                created_at: row.get(6)?,
                            },
                            row.get::<_, Option<String>>(4)?,
                        ))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;

                raw.into_iter()
                    .map(|(mut message, structured)| -> StoreResult<SessionMessage> {
                        message.structured_content =
                            structured.map(|s| serde_json::from_str(&s)).transpose()?;
                        Ok(message)
                    })
                    .collect()
            })
            .await
    }

    /// Append a message and bump the session's `updated_at`.
    ///
    /// Returns the new message's row ID.
    #[instrument(skip(self, message), fields(role = %message.role))]
    pub async fn add_message(
        &self,
        user_id: &str,
        session_id: &str,
        message: NewMessage,
    ) -> StoreResult<i64> {
        let user_id = user_id.to_string();
        let session_id = session_id.to_string();
        let structured = message
            .structured_content
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let now = Utc::now().timestamp();

        self.db
            .execute_mut(move |conn| {
                let tx = conn.transaction()?;
                fetch_owned(&tx, &user_id, &session_id)?;

                tx.execute(
                    "INSERT INTO session_messages (session_id, role, content, structured_content, widget_id, created_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    rusqlite::params![
                        session_id,
                        message.role,
                        message.content,
                        structured,
                        message.widget_id,
                        now
                    ],
                )?;
                let msg_id = tx.last_insert_rowid();

                tx.execute(
                    "UPDATE sessions SET updated_at = ?2 WHERE id = ?1",
                    rusqlite::params![session_id, now],
                )?;
                tx.commit()?;

                debug!(session_id = %session_id, msg_id, "message appended");
                Ok(msg_id)
            })
            .await
    }

    /// Delete messages by id. Ids outside the user's sessions are ignored.
    ///
    /// Returns how many rows were removed.
    #[instrument(skip(self, ids), fields(count = ids.len()))]
    pub async fn delete_messages(&self, user_id: &str, ids: &[i64]) -> StoreResult<usize> {
        let user_id = user_id.to_string();
        let ids = ids.to_vec();
        self.db
            .execute_mut(move |conn| {
                let tx = conn.transaction()?;
                let mut deleted = 0;
                {
                    let mut stmt = tx.prepare(
                        "DELETE FROM session_messages WHERE id = ?1 AND session_id IN \
                         (SELECT id FROM sessions WHERE user_id = ?2)",
                    )?;
                    for id in &ids {
                        deleted += stmt.execute(rusqlite::params![id, user_id])?;
                    }
                }
                tx.commit()?;
                Ok(deleted)
            })
            .await
    }

    /// Delete messages of one session. Ids belonging to any other session
    /// are ignored.
    ///
    /// Returns how many rows were removed.
    #[instrument(skip(self, ids), fields(count = ids.len()))]
    pub async fn delete_session_messages(
        &self,
        user_id: &str,
        session_id: &str,
        ids: &[i64],
    ) -> StoreResult<usize> {
        let user_id = user_id.to_string();
        let session_id = session_id.to_string();
        let ids = ids.to_vec();
        self.db
            .execute_mut(move |conn| {
                let tx = conn.transaction()?;
                fetch_owned(&tx, &user_id, &session_id)?;

                let mut deleted = 0;
                {
                    let mut stmt = tx.prepare(
                        "DELETE FROM session_messages WHERE id = ?1 AND session_id = ?2",
                    )?;
                    for id in &ids {
                        deleted += stmt.execute(rusqlite::params![id, session_id])?;
                    }
                }
                tx.commit()?;
                Ok(deleted)
            })
            .await
    }
}

// ── helpers ──────────────────────────────────────────────────────────

fn session_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Session> {
    Ok(Session {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
    })
}

fn not_found(session_id: &str) -> StoreError {
    StoreError::NotFound {
        entity: "session",
        id: session_id.to_string(),
    }
}

fn fetch_owned(conn: &Connection, user_id: &str, session_id: &str) -> StoreResult<Session> {
    conn.query_row(
        "SELECT id, user_id, name, created_at, updated_at FROM sessions \
         WHERE id = ?1 AND user_id = ?2",
        rusqlite::params![session_id, user_id],
        session_from_row,
    )
    .optional()?
    .ok_or_else(|| not_found(session_id))
}

// ═══════════════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup_store() -> SessionStore {
        let db = Database::open_in_memory().unwrap();
        db.run_migrations().await.unwrap();
        SessionStore::new(db)
    }

    #[tokio::test]
    async fn create_and_get_session() {
        let store = setup_store().await;

        let session = store.create_session("alice", "New Chat").await.unwrap();
        assert_eq!(session.user_id, "alice");
        assert_eq!(session.name, "New Chat");

        let fetched = store.get_session("alice", &session.id).await.unwrap();
        assert_eq!(fetched, session);
    }

    #[tokio::test]
    async fn foreign_session_is_not_found() {
        let store = setup_store().await;
        let session = store.create_session("alice", "mine").await.unwrap();

        let err = store.get_session("bob", &session.id).await.unwrap_err();
        assert!(err.is_not_found());

        let err = store.get_messages("bob", &session.id).await.unwrap_err();
        assert!(err.is_not_found());

        let err = store
            .add_message("bob", &session.id, NewMessage::user("hi"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        let err = store.delete_session("bob", &session.id).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(store.get_session("alice", &session.id).await.is_ok());
    }

    #[tokio::test]
    async fn list_sessions_is_user_scoped() {
        let store = setup_store().await;
        store.create_session("alice", "a1").await.unwrap();
        store.create_session("alice", "a2").await.unwrap();
        store.create_session("bob", "b1").await.unwrap();

        let alice = store.list_sessions("alice").await.unwrap();
        assert_eq!(alice.len(), 2);
        assert!(alice.iter().all(|s| s.user_id == "alice"));

        let bob = store.list_sessions("bob").await.unwrap();
        assert_eq!(bob.len(), 1);
        assert_eq!(bob[0].name, "b1");
    }

    #[tokio::test]
    async fn add_and_get_messages_in_order() {
        let store = setup_store().await;
        let session = store.create_session("alice", "chat").await.unwrap();

        let first = store
            .add_message("alice", &session.id, NewMessage::user("Hello!"))
            .await
            .unwrap();
        let second = store
            .add_message(
                "alice",
                &session.id,
                NewMessage::assistant("Here are your todos")
                    .with_structured_content(Some(serde_json::json!({"todos": []})))
                    .with_widget_id(Some("todo-list".into())),
            )
            .await
            .unwrap();
        assert!(second > first);

        let messages = store.get_messages("alice", &session.id).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "user");
        assert_eq!(messages[0].content, "Hello!");
        assert_eq!(messages[0].structured_content, None);
        assert_eq!(messages[1].role, "assistant");
        assert_eq!(
            messages[1].structured_content,
            Some(serde_json::json!({"todos": []}))
        );
        assert_eq!(messages[1].widget_id.as_deref(), Some("todo-list"));
    }

    #[tokio::test]
    async fn rename_session_updates_name() {
        let store = setup_store().await;
        let session = store.create_session("alice", "New Chat").await.unwrap();

        let renamed = store
            .rename_session("alice", &session.id, "  Grocery planning ")
            .await
            .unwrap();
        assert_eq!(renamed.name, "Grocery planning");

        let err = store
            .rename_session("alice", &session.id, "   ")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidArgument(_)));

        let err = store
            .rename_session("bob", &session.id, "stolen")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn delete_messages_ignores_foreign_ids() {
        let store = setup_store().await;
        let mine = store.create_session("alice", "mine").await.unwrap();
        let theirs = store.create_session("bob", "theirs").await.unwrap();

        let a1 = store
            .add_message("alice", &mine.id, NewMessage::user("one"))
            .await
            .unwrap();
        let a2 = store
            .add_message("alice", &mine.id, NewMessage::user("two"))
            .await
            .unwrap();
        let b1 = store
            .add_message("bob", &theirs.id, NewMessage::user("bob's"))
            .await
            .unwrap();

        let deleted = store.delete_messages("alice", &[a2, b1, 9999]).await.unwrap();
        assert_eq!(deleted, 1);

        let remaining = store.get_messages("alice", &mine.id).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, a1);
        assert_eq!(store.get_messages("bob", &theirs.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn session_scoped_delete_leaves_other_sessions_alone() {
        let store = setup_store().await;
        let first = store.create_session("alice", "first").await.unwrap();
        let second = store.create_session("alice", "second").await.unwrap();

        let f1 = store
            .add_message("alice", &first.id, NewMessage::user("one"))
            .await
            .unwrap();
        let s1 = store
            .add_message("alice", &second.id, NewMessage::user("elsewhere"))
            .await
            .unwrap();

        let deleted = store
            .delete_session_messages("alice", &first.id, &[f1, s1])
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert!(store.get_messages("alice", &first.id).await.unwrap().is_empty());
        assert_eq!(store.get_messages("alice", &second.id).await.unwrap().len(), 1);

        let err = store
            .delete_session_messages("bob", &second.id, &[s1])
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(store.get_messages("alice", &second.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn delete_session_cascades_messages() {
        let store = setup_store().await;
        let session = store.create_session("alice", "chat").await.unwrap();
        store
            .add_message("alice", &session.id, NewMessage::user("hello"))
            .await
            .unwrap();

        store.delete_session("alice", &session.id).await.unwrap();

        let session_id = session.id.clone();
        let orphans: i64 = store
            .db
            .execute(move |conn| {
                Ok(conn.query_row(
                    "SELECT COUNT(*) FROM session_messages WHERE session_id = ?1",
                    rusqlite::params![session_id],
                    |row| row.get(0),
                )?)
            })
            .await
            .unwrap();
        assert_eq!(orphans, 0);
    }
}
