use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use uuid::Uuid;

use super::SqliteStore;
use crate::broadcast::{BroadcastJournal, BroadcastTally, JournalEntry};

#[async_trait]
impl BroadcastJournal for SqliteStore {
    async fn start(&self, chat_id: i64, message_id: i32) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO broadcasts (id, chat_id, message_id) VALUES (?1, ?2, ?3)",
            rusqlite::params![&id, chat_id, message_id],
        )
        .context("Failed to record broadcast")?;
        Ok(id)
    }

    async fn checkpoint(&self, id: &str, cursor: &str, tally: BroadcastTally) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE broadcasts SET cursor = ?1, sent = ?2, failed = ?3 WHERE id = ?4",
            rusqlite::params![cursor, tally.sent as i64, tally.failed as i64, id],
        )
        .context("Failed to checkpoint broadcast")?;
        Ok(())
    }

    async fn finish(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE broadcasts SET finished = 1, finished_at = datetime('now') WHERE id = ?1",
            rusqlite::params![id],
        )
        .context("Failed to finish broadcast")?;
        Ok(())
    }

    async fn unfinished(&self) -> Result<Vec<JournalEntry>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, chat_id, message_id, cursor, sent, failed
             FROM broadcasts
             WHERE finished = 0
             ORDER BY started_at ASC",
        )?;

        let entries = stmt
            .query_map([], |row| {
                let sent: i64 = row.get(4)?;
                let failed: i64 = row.get(5)?;
                Ok(JournalEntry {
                    id: row.get(0)?,
                    chat_id: row.get(1)?,
                    message_id: row.get(2)?,
                    cursor: row.get(3)?,
                    tally: BroadcastTally {
                        sent: sent as usize,
                        failed: failed as usize,
                    },
                })
            })?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to load unfinished broadcasts")?;

        Ok(entries)
    }

    async fn prune_finished(&self, retention: Duration) -> Result<usize> {
        let conn = self.conn.lock().await;
        let removed = conn
            .execute(
                "DELETE FROM broadcasts
                 WHERE finished = 1 AND finished_at <= datetime('now', ?1)",
                rusqlite::params![format!("-{} seconds", retention.as_secs())],
            )
            .context("Failed to prune broadcast journal")?;
        Ok(removed)
    }
}
