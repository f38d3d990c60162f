//! Per-user todo lists.
//!
//! Backs the todo tools exposed to the model and the AI host. Items keep an
//! explicit `position` so the list order survives drag-and-drop reordering.

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::db::Database;
use crate::error::{StoreError, StoreResult};

/// A single todo item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Todo {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub completed: bool,
    /// Zero-based position in the user's list.
    pub position: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

/// User-scoped CRUD on todo items.
#[derive(Clone)]
pub struct TodoStore {
    db: Database,
}

impl TodoStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Append a new, open todo at the end of the user's list.
    #[instrument(skip(self))]
    pub async fn add(&self, user_id: &str, title: &str) -> StoreResult<Todo> {
        let title = title.trim().to_string();
        if title.is_empty() {
            return Err(StoreError::InvalidArgument(
                "todo title must not be empty".into(),
            ));
        }

        let user_id = user_id.to_string();
        let now = Utc::now().timestamp();
        let todo = self
            .db
            .execute(move |conn| {
                let position: i64 = conn.query_row(
                    "SELECT COALESCE(MAX(position) + 1, 0) FROM todos WHERE user_id = ?1",
                    rusqlite::params![user_id],
                    |row| row.get(0),
                )?;
                let todo = Todo {
                    id: Uuid::now_v7().to_string(),
                    user_id,
                    title,
                    completed: false,
                    position,
                    created_at: now,
                    updated_at: now,
                };
                conn.execute(
                    "INSERT INTO todos (id, user_id, title, completed, position, created_at, updated_at) \
                     VALUES (?1, ?2, ?3, 0, ?4, ?5, ?5)",
                    rusqlite::params![todo.id, todo.user_id, todo.title, todo.position, now],
                )?;
                Ok(todo)
            })
            .await?;

        debug!(todo_id = %todo.id, "todo added");
        Ok(todo)
    }

    /// The user's todos in list order.
    #[instrument(skip(self))]
    pub async fn list(&self, user_id: &str) -> StoreResult<Vec<Todo>> {
        let user_id = user_id.to_string();
        self.db.execute(move |conn| list_for(conn, &user_id)).await
    }

    /// Mark a todo as completed or open again.
    #[instrument(skip(self))]
    pub async fn set_completed(
        &self,
        user_id: &str,
        todo_id: &str,
        completed: bool,
    ) -> StoreResult<Todo> {
        let user_id = user_id.to_string();
        let todo_id = todo_id.to_string();
        let now = Utc::now().timestamp();
        self.db
            .execute(move |conn| {
                let updated = conn.execute(
                    "UPDATE todos SET completed = ?3, updated_at = ?4 WHERE id = ?1 AND user_id = ?2",
                    rusqlite::params![todo_id, user_id, completed, now],
                )?;
                if updated == 0 {
                    return Err(not_found(&todo_id));
                }
                conn.query_row(
                    "SELECT id, user_id, title, completed, position, created_at, updated_at \
                     FROM todos WHERE id = ?1",
                    rusqlite::params![todo_id],
                    todo_from_row,
                )
                .optional()?
                .ok_or_else(|| not_found(&todo_id))
            })
            .await
    }

    /// Delete a todo.
    #[instrument(skip(self))]
    pub async fn delete(&self, user_id: &str, todo_id: &str) -> StoreResult<()> {
        let user_id = user_id.to_string();
        let todo_id = todo_id.to_string();
        self.db
            .execute(move |conn| {
                let deleted = conn.execute(
                    "DELETE FROM todos WHERE id = ?1 AND user_id = ?2",
                    rusqlite::params![todo_id, user_id],
                )?;
                if deleted == 0 {
                    return Err(not_found(&todo_id));
                }
                Ok(())
            })
            .await
    }

    /// Reorder the list. `ordered_ids` must name every todo of the user
    /// exactly once.
    #[instrument(skip(self, ordered_ids))]
    pub async fn reorder(&self, user_id: &str, ordered_ids: &[String]) -> StoreResult<Vec<Todo>> {
        let user_id = user_id.to_string();
        let ordered_ids = ordered_ids.to_vec();
        let now = Utc::now().timestamp();
        self.db
            .execute_mut(move |conn| {
                let tx = conn.transaction()?;

                let mut current: Vec<String> =
                    list_for(&tx, &user_id)?.into_iter().map(|t| t.id).collect();
                let mut requested = ordered_ids.clone();
                current.sort();
                requested.sort();
                if current != requested {
                    return Err(StoreError::InvalidArgument(
                        "reorder must list every todo exactly once".into(),
                    ));
                }

                for (position, id) in ordered_ids.iter().enumerate() {
                    tx.execute(
                        "UPDATE todos SET position = ?3, updated_at = ?4 WHERE id = ?1 AND user_id = ?2",
                        rusqlite::params![id, user_id, position as i64, now],
                    )?;
                }
                let todos = list_for(&tx, &user_id)?;
                tx.commit()?;
                Ok(todos)
            })
            .await
    }
}

fn todo_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Todo> {
    Ok(Todo {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        completed: row.get(3)?,
        position: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

fn list_for(conn: &Connection, user_id: &str) -> StoreResult<Vec<Todo>> {
    let mut stmt = conn.prepare(
        "SELECT id, user_id, title, completed, position, created_at, updated_at \
         FROM todos WHERE user_id = ?1 ORDER BY position ASC, id ASC",
    )?;
    let todos = stmt
        .query_map(rusqlite::params![user_id], todo_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(todos)
}

fn not_found(todo_id: &str) -> StoreError {
    StoreError::NotFound {
        entity: "todo",
        id: todo_id.to_string(),
    }
}
