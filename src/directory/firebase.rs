use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use super::{UserDirectory, UserPatch, UserRecord};

#[derive(Debug, Deserialize)]
struct StoredUser {
    #[serde(default)]
    first_name: String,
    #[serde(default)]
    last_seen: Option<i64>,
    #[serde(default)]
    current_model: Option<String>,
}

/// Body written on `/start`. Existing databases key users by numeric id and
/// repeat it inside the record.
#[derive(Debug, Serialize)]
struct Registration<'a> {
    id: serde_json::Value,
    first_name: &'a str,
    last_seen: i64,
}

impl<'a> Registration<'a> {
    fn new(id: &str, first_name: &'a str, last_seen: i64) -> Self {
        let id = id
            .parse::<i64>()
            .map(serde_json::Value::from)
            .unwrap_or_else(|_| serde_json::Value::from(id));
        Self {
            id,
            first_name,
            last_seen,
        }
    }
}

/// Users kept in a Firebase Realtime Database under `/users/{id}`
pub struct FirebaseDirectory {
    client: reqwest::Client,
    base_url: String,
    /// Serializes the check-then-write in `register`
    register_lock: Mutex<()>,
}

impl FirebaseDirectory {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build directory HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            register_lock: Mutex::new(()),
        })
    }

    fn user_url(&self, id: &str) -> String {
        format!("{}/users/{}.json", self.base_url, id)
    }

    /// Merge `body` into `/users/{id}`
    async fn write<T: Serialize + Sync>(&self, id: &str, body: &T) -> Result<()> {
        self.client
            .patch(self.user_url(id))
            .json(body)
            .send()
            .await
            .context("Failed to patch user")?
            .error_for_status()
            .context("Directory rejected user patch")?;
        Ok(())
    }
}

#[async_trait]
impl UserDirectory for FirebaseDirectory {
    async fn get(&self, id: &str) -> Result<Option<UserRecord>> {
        let stored: Option<StoredUser> = self
            .client
            .get(self.user_url(id))
            .send()
            .await
            .context("Failed to fetch user")?
            .error_for_status()
            .context("Directory rejected user fetch")?
            .json()
            .await
            .context("Failed to parse user record")?;

        Ok(stored.map(|u| UserRecord {
            id: id.to_string(),
            display_name: u.first_name,
            last_seen: u.last_seen,
            selected_model: u.current_model,
        }))
    }

    async fn patch(&self, id: &str, patch: &UserPatch) -> Result<()> {
        self.write(id, patch).await
    }

    async fn list(&self) -> Result<Vec<String>> {
        let users: Option<serde_json::Map<String, serde_json::Value>> = self
            .client
            .get(format!("{}/users.json", self.base_url))
            .query(&[("shallow", "true")])
            .send()
            .await
            .context("Failed to list users")?
            .error_for_status()
            .context("Directory rejected user listing")?
            .json()
            .await
            .context("Failed to parse user listing")?;

        let mut ids: Vec<String> = users
            .map(|m| m.into_iter().map(|(k, _)| k).collect())
            .unwrap_or_default();
        ids.sort();
        Ok(ids)
    }

    async fn register(&self, id: &str, display_name: &str, seen_at: i64) -> Result<bool> {
        let _guard = self.register_lock.lock().await;

        let existed = self.get(id).await?.is_some();
        self.write(id, &Registration::new(id, display_name, seen_at))
            .await?;

        debug!("Registered user {} (new: {})", id, !existed);
        Ok(!existed)
    }
}
