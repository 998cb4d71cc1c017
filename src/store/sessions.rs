use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;

use super::SqliteStore;
use crate::session::SessionStore;

/// [`SessionStore`] persisted in the local database, so a pending broadcast
/// survives a restart within its time-to-live
pub struct SqliteSessionStore {
    store: SqliteStore,
    ttl: Duration,
}

impl SqliteSessionStore {
    pub fn new(store: SqliteStore, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    fn cutoff(&self) -> i64 {
        chrono::Utc::now().timestamp_millis() - self.ttl.as_millis() as i64
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn begin(&self, chat_id: i64) -> Result<()> {
        let conn = self.store.conn.lock().await;
        conn.execute(
            "INSERT INTO broadcast_sessions (chat_id, started_at) VALUES (?1, ?2)
             ON CONFLICT(chat_id) DO UPDATE SET started_at = excluded.started_at",
            rusqlite::params![chat_id, chrono::Utc::now().timestamp_millis()],
        )
        .context("Failed to begin broadcast session")?;
        Ok(())
    }

    async fn take(&self, chat_id: i64) -> Result<bool> {
        let conn = self.store.conn.lock().await;
        let fresh = conn
            .execute(
                "DELETE FROM broadcast_sessions WHERE chat_id = ?1 AND started_at > ?2",
                rusqlite::params![chat_id, self.cutoff()],
            )
            .context("Failed to take broadcast session")?;
        // An expired row must not linger and match a later take
        conn.execute(
            "DELETE FROM broadcast_sessions WHERE chat_id = ?1",
            rusqlite::params![chat_id],
        )
        .context("Failed to clear expired broadcast session")?;
        Ok(fresh > 0)
    }

    async fn is_active(&self, chat_id: i64) -> Result<bool> {
        let conn = self.store.conn.lock().await;
        let active: bool = conn
            .query_row(
                "SELECT count(*) > 0 FROM broadcast_sessions WHERE chat_id = ?1 AND started_at > ?2",
                rusqlite::params![chat_id, self.cutoff()],
                |row| row.get(0),
            )
            .context("Failed to read broadcast session")?;
        Ok(active)
    }

    async fn purge_expired(&self) -> Result<usize> {
        let conn = self.store.conn.lock().await;
        let removed = conn
            .execute(
                "DELETE FROM broadcast_sessions WHERE started_at <= ?1",
                rusqlite::params![self.cutoff()],
            )
            .context("Failed to purge broadcast sessions")?;
        Ok(removed)
    }
}
