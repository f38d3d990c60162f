//! Versioned schema migrations.
//!
//! Each migration is a static SQL batch keyed by version. Applied versions
//! are recorded in `_migrations`, so running the set twice is a no-op.

use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::error::{StoreError, StoreResult};

struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

/// Highest version in [`MIGRATIONS`].
pub const LATEST_VERSION: u32 = 2;

/// All migrations in order. Append only.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "chat sessions and their message log",
        sql: r#"
            CREATE TABLE sessions (
                id          TEXT PRIMARY KEY,
                user_id     TEXT NOT NULL,
                name        TEXT NOT NULL,
                created_at  INTEGER NOT NULL,
                updated_at  INTEGER NOT NULL
            );
            CREATE INDEX idx_sessions_user ON sessions(user_id, updated_at);

            CREATE TABLE session_messages (
                id                 INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id         TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
                role               TEXT NOT NULL CHECK(role IN ('system','user','assistant','tool')),
                content            TEXT NOT NULL,
                structured_content TEXT,
                widget_id          TEXT,
                created_at         INTEGER NOT NULL
            );
            CREATE INDEX idx_session_messages_session ON session_messages(session_id);
        "#,
    },
    Migration {
        version: 2,
        description: "per-user todo lists",
        sql: r#"
            CREATE TABLE todos (
                id          TEXT PRIMARY KEY,
                user_id     TEXT NOT NULL,
                title       TEXT NOT NULL,
                completed   BOOLEAN NOT NULL DEFAULT 0,
                position    INTEGER NOT NULL,
                created_at  INTEGER NOT NULL,
                updated_at  INTEGER NOT NULL
            );
            CREATE INDEX idx_todos_user ON todos(user_id, position);
        "#,
    },
];

// ── public API ───────────────────────────────────────────────────────

/// Run all pending migrations against `conn`.
///
/// Synchronous; call it through [`crate::Database::execute`].
pub fn run_all(conn: &Connection) -> StoreResult<()> {
    ensure_migrations_table(conn)?;

    let current = current_version(conn)?;
    let pending: Vec<&Migration> = MIGRATIONS.iter().filter(|m| m.version > current).collect();

    if pending.is_empty() {
        debug!(current_version = current, "database schema is up to date");
        return Ok(());
    }

    info!(
        current_version = current,
        pending = pending.len(),
        "running pending migrations"
    );

    for migration in pending {
        apply(conn, migration)?;
    }

    Ok(())
}

/// Latest applied migration version, or 0 on a fresh database.
pub fn current_version(conn: &Connection) -> StoreResult<u32> {
    ensure_migrations_table(conn)?;
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _migrations",
        [],
        |row| row.get(0),
    )
    .map_err(|e| StoreError::Migration {
        version: 0,
        message: format!("failed to read current version: {e}"),
    })
}

// ── internals ────────────────────────────────────────────────────────

fn ensure_migrations_table(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version     INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at  INTEGER NOT NULL
        );",
    )
    .map_err(|e| StoreError::Migration {
        version: 0,
        message: format!("failed to create _migrations table: {e}"),
    })
}

/// Apply one migration inside an immediate transaction.
fn apply(conn: &Connection, migration: &Migration) -> StoreResult<()> {
    info!(
        version = migration.version,
        description = migration.description,
        "applying migration"
    );

    let failed = |message: String| StoreError::Migration {
        version: migration.version,
        message,
    };

    conn.execute_batch("BEGIN IMMEDIATE;")
        .map_err(|e| failed(format!("failed to begin transaction: {e}")))?;

    let result = conn
        .execute_batch(migration.sql)
        .map_err(|e| failed(format!("SQL execution failed: {e}")))
        .and_then(|()| {
            conn.execute(
                "INSERT INTO _migrations (version, description, applied_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![
                    migration.version,
                    migration.description,
                    chrono::Utc::now().timestamp()
                ],
            )
            .map(|_| ())
            .map_err(|e| failed(format!("failed to record migration: {e}")))
        });

    match &result {
        Ok(()) => {
            conn.execute_batch("COMMIT;")
                .map_err(|e| failed(format!("failed to commit: {e}")))?;
        }
        Err(err) => {
            warn!(version = migration.version, %err, "migration failed, rolling back");
            let _ = conn.execute_batch("ROLLBACK;");
        }
    }

    result
}

// ── tests ────────────────────────────────────────────────────────────
