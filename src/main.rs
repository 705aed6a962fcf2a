use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dialogbot::api::{self, ApiState};
use dialogbot::bots::BotResolver;
use dialogbot::config::Config;
use dialogbot::instance_lock::InstanceLocks;
use dialogbot::memory::MemoryStore;
use dialogbot::orchestrator::DialogTurnOrchestrator;
use dialogbot::scheduler::{tasks, Scheduler};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,dialogbot=debug".into()),
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

    info!("Configuration loaded successfully");
    info!("  Database: {}", config.memory.database_path.display());
    info!("  Bots: {}", config.bots.len());
    info!("  Instances: {}", config.instances.len());
    info!("  Handler timeout: {:?}", config.turn.handler_timeout());

    let store = MemoryStore::open(&config.memory.database_path)?;
    for instance in &config.instances {
        store
            .upsert_instance(instance.id, &instance.bot, &instance.username)
            .await?;
    }

    let resolver = BotResolver::from_config(&config.bots).context("Invalid [[bots]] config")?;
    info!("Bots available: {:?}", resolver.codenames());

    let locks = Arc::new(InstanceLocks::new());
    let orchestrator = Arc::new(DialogTurnOrchestrator::new(
        store.clone(),
        Arc::new(resolver),
        Arc::clone(&locks),
        tokio::runtime::Handle::current(),
        config.turn.clone(),
    ));

    let mut scheduler = Scheduler::new().await?;
    tasks::register_builtin_tasks(
        &mut scheduler,
        Arc::clone(&locks),
        &config.locks.prune_schedule,
    )
    .await?;
    scheduler.start().await?;

    let app = api::router(ApiState {
        orchestrator,
        store,
    });
    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind))?;
    info!("Listening on http://{}", config.server.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown requested");
        })
        .await
        .context("Server error")?;

    scheduler.shutdown().await?;
    Ok(())
}
