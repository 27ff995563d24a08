use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;

use minilend_listener::config::Config;
use minilend_listener::db::{MemoryLedger, PgLedger};
use minilend_listener::dispatcher::EventDispatcher;
use minilend_listener::handler::{LedgerStore, LendingHandler, Notifier};
use minilend_listener::notify::{LogNotifier, WebhookNotifier};
use minilend_listener::source::RpcEventSource;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    color_eyre::install()?;

    // Initialize structured logging (set RUST_LOG=info for output, LOG_FORMAT=json for JSON)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if std::env::var("LOG_FORMAT").is_ok_and(|f| f == "json") {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    }

    tracing::info!("MiniLend listener starting");

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());

    let config = Config::load(&config_path)?;
    let params = config.connection_params()?;
    tracing::info!(
        contract = %params.contract,
        network = %params.network.name,
        "Configuration loaded from {}",
        config_path
    );

    // Ledger: PostgreSQL when configured, in-memory otherwise
    let ledger: Arc<dyn LedgerStore> = match &config.database {
        Some(db) => {
            let pool = PgPoolOptions::new()
                .max_connections(db.max_connections)
                .connect(&db.url)
                .await
                .map_err(|e| eyre::eyre!("Failed to connect to database: {}", e))?;
            tracing::info!("Connected to PostgreSQL");

            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .map_err(|e| eyre::eyre!("Failed to run migrations: {}", e))?;
            tracing::info!("Database migrations complete");

            Arc::new(PgLedger::new(pool))
        }
        None => {
            tracing::warn!("No [database] configured, keeping ledger in memory");
            Arc::new(MemoryLedger::new())
        }
    };

    let notifier: Arc<dyn Notifier> = match &config.notifications.webhook_url {
        Some(url) => {
            tracing::info!(%url, "Webhook notifications enabled");
            Arc::new(WebhookNotifier::new(
                url,
                Duration::from_millis(config.notifications.timeout_ms),
            )?)
        }
        None => Arc::new(LogNotifier),
    };

    let source = Arc::new(RpcEventSource::connect(&params).await?);
    let handler = Arc::new(LendingHandler::new(ledger, notifier));
    let dispatcher = EventDispatcher::new(params, source, handler)
        .with_dedup_capacity(config.listener.dedup_capacity);

    dispatcher.start().await?;
    tracing::info!("Listener running. Press Ctrl+C to stop.");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received, stopping listener...");
    dispatcher.stop().await;

    // Let handlers already running finish their effects
    dispatcher.wait_in_flight().await;

    tracing::info!("MiniLend listener stopped gracefully");
    Ok(())
}
