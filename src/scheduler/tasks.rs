use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use crate::broadcast::BroadcastJournal;
use crate::scheduler::{MaintenanceJob, Scheduler};
use crate::session::SessionStore;

/// Drop broadcast sessions the administrator never followed up on
pub struct SessionSweep {
    sessions: Arc<dyn SessionStore>,
}

impl SessionSweep {
    pub fn new(sessions: Arc<dyn SessionStore>) -> Self {
        Self { sessions }
    }
}

#[async_trait]
impl MaintenanceJob for SessionSweep {
    fn name(&self) -> &'static str {
        "session-sweep"
    }

    fn schedule(&self) -> &'static str {
        "0 * * * * *"
    }

    async fn run(&self) -> Result<usize> {
        self.sessions.purge_expired().await
    }
}

/// Forget finished broadcasts once they are past the retention window
pub struct JournalPrune {
    journal: Arc<dyn BroadcastJournal>,
    retention: Duration,
}

impl JournalPrune {
    pub fn new(journal: Arc<dyn BroadcastJournal>, retention: Duration) -> Self {
        Self { journal, retention }
    }
}

#[async_trait]
impl MaintenanceJob for JournalPrune {
    fn name(&self) -> &'static str {
        "journal-prune"
    }

    fn schedule(&self) -> &'static str {
        "0 0 * * * *"
    }

    async fn run(&self) -> Result<usize> {
        self.journal.prune_finished(self.retention).await
    }
}

pub async fn register_maintenance(
    scheduler: &Scheduler,
    sessions: Arc<dyn SessionStore>,
    journal: Arc<dyn BroadcastJournal>,
    journal_retention: Duration,
) -> Result<()> {
    scheduler
        .register(Arc::new(SessionSweep::new(sessions)))
        .await?;
    scheduler
        .register(Arc::new(JournalPrune::new(journal, journal_retention)))
        .await?;
    Ok(())
}
