//! # toolbridge-store
//!
//! Storage engine for toolbridge.
//!
//! Provides SQLite-backed persistence (WAL mode, blocking-pool dispatch)
//! for chat sessions, their append-only message logs, and the per-user
//! todo lists that back the demo tools.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │  SessionStore (sessions + messages)     │
//! │  TodoStore    (per-user todo lists)     │
//! ├─────────────────────────────────────────┤
//! │  Database (rusqlite WAL)                │
//! │  Migrations (versioned, transactional)  │
//! └─────────────────────────────────────────┘
//! ```
//!
//! Every operation is scoped by a user id. A session that exists but
//! belongs to someone else is reported exactly like a missing one.
//!
//! ## Quick start
//!
//! ```ignore
//! use toolbridge_store::{Database, SessionStore};
//!
//! let db = Database::open_and_migrate("data/toolbridge.db").await?;
//! let sessions = SessionStore::new(db.clone());
//! let session = sessions.create_session("user-1", "New Chat").await?;
//! ```

pub mod db;
pub mod error;
pub mod migration;
pub mod session;
pub mod todo;

// ── re-exports ───────────────────────────────────────────────────────

pub use db::Database;
pub use error::{StoreError, StoreResult};
pub use session::{NewMessage, Session, SessionMessage, SessionStore};
pub use todo::{Todo, TodoStore};
