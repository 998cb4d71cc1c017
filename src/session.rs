use std::collections::HashMap;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Pending "next message is broadcast content" flags, keyed by chat id.
///
/// At most one session exists per chat. `take` clears and reports in a single
/// step so a payload can only be consumed once.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn begin(&self, chat_id: i64) -> Result<()>;

    /// Clear the chat's session, returning whether an unexpired one existed
    async fn take(&self, chat_id: i64) -> Result<bool>;

    async fn is_active(&self, chat_id: i64) -> Result<bool>;

    /// Drop expired sessions, returning how many were removed
    async fn purge_expired(&self) -> Result<usize>;
}

/// Process-local session store with a time-to-live
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<i64, Instant>>,
    ttl: Duration,
}

impl MemorySessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    fn is_fresh(&self, started: Instant) -> bool {
        started.elapsed() < self.ttl
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn begin(&self, chat_id: i64) -> Result<()> {
        self.sessions.lock().await.insert(chat_id, Instant::now());
        Ok(())
    }

    async fn take(&self, chat_id: i64) -> Result<bool> {
        let started = self.sessions.lock().await.remove(&chat_id);
        Ok(started.is_some_and(|s| self.is_fresh(s)))
    }

    async fn is_active(&self, chat_id: i64) -> Result<bool> {
        let sessions = self.sessions.lock().await;
        Ok(sessions.get(&chat_id).is_some_and(|s| self.is_fresh(*s)))
    }

    async fn purge_expired(&self) -> Result<usize> {
        let mut sessions = self.sessions.lock().await;
        let before = sessions.len();
        sessions.retain(|_, started| started.elapsed() < self.ttl);
        Ok(before - sessions.len())
    }
}
