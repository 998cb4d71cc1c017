use anyhow::{Context, Result};
use async_trait::async_trait;
use rusqlite::OptionalExtension;

use super::SqliteStore;
use crate::directory::{UserDirectory, UserPatch, UserRecord};

#[async_trait]
impl UserDirectory for SqliteStore {
    async fn get(&self, id: &str) -> Result<Option<UserRecord>> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT id, display_name, last_seen, selected_model FROM users WHERE id = ?1",
            rusqlite::params![id],
            |row| {
                Ok(UserRecord {
                    id: row.get(0)?,
                    display_name: row.get(1)?,
                    last_seen: row.get(2)?,
                    selected_model: row.get(3)?,
                })
            },
        )
        .optional()
        .context("Failed to load user")
    }

    async fn patch(&self, id: &str, patch: &UserPatch) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO users (id, display_name, last_seen, selected_model)
             VALUES (?1, coalesce(?2, ''), ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
                display_name = coalesce(?2, display_name),
                last_seen = coalesce(?3, last_seen),
                selected_model = coalesce(?4, selected_model)",
            rusqlite::params![
                id,
                &patch.display_name,
                &patch.last_seen,
                &patch.selected_model,
            ],
        )
        .context("Failed to patch user")?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare("SELECT id FROM users ORDER BY id")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()
            .context("Failed to list users")?;
        Ok(ids)
    }

    async fn register(&self, id: &str, display_name: &str, seen_at: i64) -> Result<bool> {
        // Both statements run under one lock, so two registrations of the
        // same id cannot both observe "missing"
        let conn = self.conn.lock().await;

        let existed: bool = conn
            .query_row(
                "SELECT count(*) > 0 FROM users WHERE id = ?1",
                rusqlite::params![id],
                |row| row.get(0),
            )
            .context("Failed to check user")?;

        conn.execute(
            "INSERT INTO users (id, display_name, last_seen) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET
                display_name = excluded.display_name,
                last_seen = excluded.last_seen",
            rusqlite::params![id, display_name, seen_at],
        )
        .context("Failed to register user")?;

        Ok(!existed)
    }
}
