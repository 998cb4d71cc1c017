pub mod broadcasts;
pub mod sessions;
pub mod users;

use anyhow::{Context, Result};
use rusqlite::Connection;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

/// Thread-safe SQLite store for users, broadcast sessions and the
/// broadcast journal
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open or create the SQLite database at the given path
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;

        // journal_mode PRAGMA always returns the resulting mode, so use query_row
        let _: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;

        // Run migrations on the raw connection before wrapping in Mutex.
        // This avoids blocking_lock() panic when called from async context.
        Self::run_migrations(&conn)?;

        info!("Store initialized at: {}", path.display());
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database (for testing)
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::run_migrations(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn run_migrations(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                display_name TEXT NOT NULL DEFAULT '',
                last_seen INTEGER,
                selected_model TEXT,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            -- Pending broadcast sessions, keyed by chat
            CREATE TABLE IF NOT EXISTS broadcast_sessions (
                chat_id INTEGER PRIMARY KEY,
                started_at INTEGER NOT NULL
            );

            -- Progress of each broadcast so an interrupted one can resume
            CREATE TABLE IF NOT EXISTS broadcasts (
                id TEXT PRIMARY KEY,
                chat_id INTEGER NOT NULL,
                message_id INTEGER NOT NULL,
                cursor TEXT,
                sent INTEGER NOT NULL DEFAULT 0,
                failed INTEGER NOT NULL DEFAULT 0,
                finished INTEGER NOT NULL DEFAULT 0,
                started_at TEXT NOT NULL DEFAULT (datetime('now')),
                finished_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_broadcasts_unfinished
                ON broadcasts(finished, started_at);
            ",
        )
        .context("Failed to run migrations")?;
        Ok(())
    }
}
