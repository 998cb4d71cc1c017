pub mod firebase;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A known user. Records are created on first contact and never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UserRecord {
    pub id: String,
    pub display_name: String,
    /// Milliseconds since the Unix epoch of the last `/start`
    pub last_seen: Option<i64>,
    /// Model alias; `None` means the default model applies
    pub selected_model: Option<String>,
}

/// Partial update with merge semantics: `None` fields are left untouched
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UserPatch {
    #[serde(rename = "first_name", skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<i64>,
    #[serde(rename = "current_model", skip_serializing_if = "Option::is_none")]
    pub selected_model: Option<String>,
}

impl UserPatch {
    pub fn selected_model(alias: &str) -> Self {
        Self {
            selected_model: Some(alias.to_string()),
            ..Self::default()
        }
    }
}

/// Key-value store of user records
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<UserRecord>>;

    /// Merge `patch` into the record, creating it when missing
    async fn patch(&self, id: &str, patch: &UserPatch) -> Result<()>;

    /// Every known user id
    async fn list(&self) -> Result<Vec<String>>;

    /// Create or refresh a record on `/start`.
    /// Returns `true` only for the call that created the record.
    async fn register(&self, id: &str, display_name: &str, seen_at: i64) -> Result<bool>;
}
