use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::directory::UserDirectory;
use crate::keyboards;
use crate::platform::{OutgoingMessage, Transport};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastTally {
    pub sent: usize,
    pub failed: usize,
}

/// Persisted progress of one broadcast
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalEntry {
    pub id: String,
    pub chat_id: i64,
    pub message_id: i32,
    /// Last recipient attempted, in sorted order
    pub cursor: Option<String>,
    pub tally: BroadcastTally,
}

/// Checkpoint storage that lets an interrupted broadcast pick up where it
/// stopped instead of starting over
#[async_trait]
pub trait BroadcastJournal: Send + Sync {
    async fn start(&self, chat_id: i64, message_id: i32) -> Result<String>;

    async fn checkpoint(&self, id: &str, cursor: &str, tally: BroadcastTally) -> Result<()>;

    async fn finish(&self, id: &str) -> Result<()>;

    async fn unfinished(&self) -> Result<Vec<JournalEntry>>;

    /// Delete finished broadcasts older than `retention`, returning how many
    /// were removed
    async fn prune_finished(&self, retention: Duration) -> Result<usize>;
}

/// Replicates one message to every known user, one recipient at a time
pub struct BroadcastEngine {
    transport: Arc<dyn Transport>,
    journal: Arc<dyn BroadcastJournal>,
    delay: Duration,
    /// Only one broadcast runs at a time
    running: Mutex<()>,
}

impl BroadcastEngine {
    pub fn new(
        transport: Arc<dyn Transport>,
        journal: Arc<dyn BroadcastJournal>,
        delay: Duration,
    ) -> Self {
        Self {
            transport,
            journal,
            delay,
            running: Mutex::new(()),
        }
    }

    /// Copy `message_id` from `chat_id` to every recipient and report the
    /// tally back to `chat_id`. Never fails: per-recipient errors are counted.
    pub async fn run(
        &self,
        chat_id: i64,
        message_id: i32,
        mut recipients: Vec<String>,
    ) -> BroadcastTally {
        let _guard = self.running.lock().await;

        recipients.sort();
        recipients.dedup();
        info!(
            "Broadcasting message {} from {} to {} recipient(s)",
            message_id,
            chat_id,
            recipients.len()
        );

        let journal_id = match self.journal.start(chat_id, message_id).await {
            Ok(id) => Some(id),
            Err(e) => {
                warn!("Broadcast journal unavailable, progress won't be resumable: {:#}", e);
                None
            }
        };

        let tally = self
            .deliver(
                journal_id.as_deref(),
                chat_id,
                message_id,
                &recipients,
                BroadcastTally::default(),
            )
            .await;

        info!("Broadcast done: sent={} failed={}", tally.sent, tally.failed);
        self.report(chat_id, keyboards::broadcast_report(tally.sent, tally.failed))
            .await;
        tally
    }

    /// Continue every broadcast a previous process left unfinished.
    /// Returns how many were resumed.
    pub async fn resume(&self, directory: &dyn UserDirectory) -> usize {
        let _guard = self.running.lock().await;

        let entries = match self.journal.unfinished().await {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Failed to read broadcast journal: {:#}", e);
                return 0;
            }
        };

        let mut resumed = 0;
        for entry in entries {
            let mut recipients = match directory.list().await {
                Ok(ids) => ids,
                Err(e) => {
                    warn!("Can't resume broadcast {}: {:#}", entry.id, e);
                    continue;
                }
            };
            recipients.sort();
            recipients.dedup();
            if let Some(cursor) = &entry.cursor {
                recipients.retain(|r| r > cursor);
            }

            info!(
                "Resuming broadcast {} with {} recipient(s) left",
                entry.id,
                recipients.len()
            );
            let tally = self
                .deliver(
                    Some(&entry.id),
                    entry.chat_id,
                    entry.message_id,
                    &recipients,
                    entry.tally,
                )
                .await;
            self.report(
                entry.chat_id,
                keyboards::broadcast_resumed_report(tally.sent, tally.failed),
            )
            .await;
            resumed += 1;
        }

        resumed
    }

    async fn deliver(
        &self,
        journal_id: Option<&str>,
        chat_id: i64,
        message_id: i32,
        recipients: &[String],
        mut tally: BroadcastTally,
    ) -> BroadcastTally {
        for (i, recipient) in recipients.iter().enumerate() {
            if i > 0 && !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }

            match self.copy_to(recipient, chat_id, message_id).await {
                Ok(()) => tally.sent += 1,
                Err(e) => {
                    debug!("Broadcast to {} failed: {:#}", recipient, e);
                    tally.failed += 1;
                }
            }

            if let Some(id) = journal_id {
                if let Err(e) = self.journal.checkpoint(id, recipient, tally).await {
                    warn!("Failed to checkpoint broadcast {}: {:#}", id, e);
                }
            }
        }

        if let Some(id) = journal_id {
            if let Err(e) = self.journal.finish(id).await {
                warn!("Failed to close broadcast {}: {:#}", id, e);
            }
        }

        tally
    }

    async fn copy_to(&self, recipient: &str, chat_id: i64, message_id: i32) -> Result<()> {
        let to: i64 = recipient
            .parse()
            .with_context(|| format!("Invalid recipient id: {}", recipient))?;
        self.transport.copy_message(to, chat_id, message_id).await
    }

    async fn report(&self, chat_id: i64, text: String) {
        if let Err(e) = self
            .transport
            .send_message(chat_id, &OutgoingMessage::html(text))
            .await
        {
            warn!("Failed to report broadcast result to {}: {:#}", chat_id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;
    use crate::testing::RecordingTransport;

    const ADMIN_CHAT: i64 = 1000;

    fn engine(transport: Arc<RecordingTransport>, store: &SqliteStore) -> BroadcastEngine {
        BroadcastEngine::new(transport, Arc::new(store.clone()), Duration::ZERO)
    }

    fn ids(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_failures_are_counted_not_fatal() {
        let transport = Arc::new(RecordingTransport::new().failing_chat(2));
        let store = SqliteStore::open_in_memory().unwrap();

        let tally = engine(transport.clone(), &store)
            .run(ADMIN_CHAT, 5, ids(&["1", "2", "3"]))
            .await;

        assert_eq!(tally, BroadcastTally { sent: 2, failed: 1 });
        assert_eq!(transport.copies(), vec![1, 3]);
        let report = transport.messages_to(ADMIN_CHAT);
        assert_eq!(report.len(), 1);
        assert!(report[0].text.contains("Sent: 2"));
        assert!(report[0].text.contains("Failed: 1"));
    }

    #[tokio::test]
    async fn test_every_recipient_failing_still_completes() {
        let transport = Arc::new(
            RecordingTransport::new()
                .failing_chat(1)
                .failing_chat(2)
                .failing_chat(3),
        );
        let store = SqliteStore::open_in_memory().unwrap();

        let tally = engine(transport.clone(), &store)
            .run(ADMIN_CHAT, 5, ids(&["1", "2", "3", "not-a-number"]))
            .await;

        assert_eq!(tally.sent + tally.failed, 4);
        assert_eq!(tally.failed, 4);
        assert!(transport.copies().is_empty());
    }

    #[tokio::test]
    async fn test_empty_recipient_list_reports_zero() {
        let transport = Arc::new(RecordingTransport::new());
        let store = SqliteStore::open_in_memory().unwrap();

        let tally = engine(transport.clone(), &store)
            .run(ADMIN_CHAT, 5, Vec::new())
            .await;

        assert_eq!(tally, BroadcastTally::default());
        assert_eq!(transport.messages_to(ADMIN_CHAT).len(), 1);
    }

    #[tokio::test]
    async fn test_finished_broadcast_is_not_resumed() {
        let transport = Arc::new(RecordingTransport::new());
        let store = SqliteStore::open_in_memory().unwrap();
        let engine = engine(transport.clone(), &store);

        engine.run(ADMIN_CHAT, 5, ids(&["1"])).await;
        assert_eq!(engine.resume(&store).await, 0);
        assert_eq!(transport.copies(), vec![1]);
    }

    #[tokio::test]
    async fn test_resume_continues_after_cursor() {
        use crate::directory::UserDirectory;

        let transport = Arc::new(RecordingTransport::new());
        let store = SqliteStore::open_in_memory().unwrap();
        for id in ["1", "2", "3", "4"] {
            store.register(id, "", 0).await.unwrap();
        }

        // A previous process got through "2" before dying
        let id = store.start(ADMIN_CHAT, 9).await.unwrap();
        store
            .checkpoint(&id, "2", BroadcastTally { sent: 1, failed: 1 })
            .await
            .unwrap();

        let engine = engine(transport.clone(), &store);
        assert_eq!(engine.resume(&store).await, 1);

        assert_eq!(transport.copies(), vec![3, 4]);
        let report = transport.messages_to(ADMIN_CHAT);
        assert!(report[0].text.contains("Sent: 3"));
        assert!(report[0].text.contains("Failed: 1"));
        assert!(store.unfinished().await.unwrap().is_empty());
    }
}
