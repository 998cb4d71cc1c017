mod broadcast;
mod config;
mod directory;
mod gate;
mod keyboards;
mod llm;
mod models;
mod platform;
mod router;
mod scheduler;
mod server;
mod session;
mod store;

#[cfg(test)]
mod testing;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::broadcast::{BroadcastEngine, BroadcastJournal};
use crate::config::{Config, DirectoryBackend, SessionBackend};
use crate::directory::firebase::FirebaseDirectory;
use crate::directory::UserDirectory;
use crate::gate::MembershipGate;
use crate::llm::LlmClient;
use crate::platform::telegram::TelegramTransport;
use crate::router::{RouterSettings, UpdateRouter};
use crate::scheduler::Scheduler;
use crate::session::{MemorySessionStore, SessionStore};
use crate::store::sessions::SqliteSessionStore;
use crate::store::SqliteStore;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,gatebot=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    info!("Loading configuration from: {}", config_path.display());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let registry = config.model_registry();
    info!("Configuration loaded successfully");
    info!("  Models: {}", registry.aliases().join(", "));
    info!("  Default model: {:?}", config.default_model());
    info!("  Required channel: {:?}", config.telegram.required_channel());
    info!("  Admin: {:?}", config.telegram.admin_id);
    info!("  Directory: {}", config.directory.backend);

    let store = SqliteStore::open(&config.storage.database_path)?;
    let transport = Arc::new(TelegramTransport::new(&config.telegram.bot_token));

    let directory: Arc<dyn UserDirectory> = match config.directory.backend {
        DirectoryBackend::Sqlite => Arc::new(store.clone()),
        DirectoryBackend::Firebase => {
            let url = config.directory.firebase_url.as_deref().unwrap_or_default();
            Arc::new(FirebaseDirectory::new(
                url,
                Duration::from_secs(config.directory.timeout_secs),
            )?)
        }
    };

    let session_ttl = Duration::from_secs(config.broadcast.session_ttl_secs);
    let sessions: Arc<dyn SessionStore> = match config.storage.sessions {
        SessionBackend::Memory => Arc::new(MemorySessionStore::new(session_ttl)),
        SessionBackend::Sqlite => Arc::new(SqliteSessionStore::new(store.clone(), session_ttl)),
    };

    let journal: Arc<dyn BroadcastJournal> = Arc::new(store.clone());
    let broadcasts = Arc::new(BroadcastEngine::new(
        transport.clone(),
        journal.clone(),
        Duration::from_millis(config.broadcast.delay_ms),
    ));

    let gate = MembershipGate::new(
        transport.clone(),
        config.telegram.required_channel().map(str::to_string),
        Duration::from_secs(config.gate.timeout_secs),
    );

    let router = Arc::new(UpdateRouter::new(
        transport.clone(),
        directory.clone(),
        sessions.clone(),
        Arc::new(LlmClient::new(config.completion.clone())?),
        broadcasts.clone(),
        gate,
        registry,
        RouterSettings {
            admin_id: config.telegram.admin_id,
            default_model: config.default_model().map(str::to_string),
        },
    ));

    // Background upkeep
    let mut scheduler = Scheduler::new().await?;
    scheduler::tasks::register_maintenance(
        &scheduler,
        sessions,
        journal,
        Duration::from_secs(config.broadcast.journal_retention_days * 86_400),
    )
    .await?;
    scheduler.start().await?;

    // Pick up broadcasts a previous process did not finish
    tokio::spawn(async move {
        let resumed = broadcasts.resume(directory.as_ref()).await;
        if resumed > 0 {
            info!("Resumed {} interrupted broadcast(s)", resumed);
        }
    });

    if let Some(url) = config.telegram.webhook_url.as_deref() {
        if let Err(e) = transport.register_webhook(url).await {
            warn!("Webhook registration failed: {:#}", e);
        }
    }

    let (tx, rx) = mpsc::channel(config.server.queue_size);
    let worker = server::spawn_worker(router, rx);

    info!("Bot is starting...");
    server::serve(config.server.listen, server::build_router(tx)).await?;

    // The HTTP app held the only sender, so the worker drains and exits
    worker.await.ok();
    scheduler.shutdown().await?;

    Ok(())
}
