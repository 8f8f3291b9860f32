use anyhow::Result;
use payment_pulse::{config::Config, handlers::*, services::*};
use std::sync::Arc;
use std::time::Instant;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    tracing::info!("Starting Payment Pulse v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Environment: {:?}", config.environment);

    // Push delivery
    let cache = Arc::new(CacheService::new(&config.redis_url).await?);
    let devices = Arc::new(DeviceRepository::new(cache.clone(), &config.fanout));
    let gateway = Arc::new(WebPushGateway::new(
        config.vapid_private_key.clone(),
        config.vapid_subject.clone(),
    )?);
    let fanout = Arc::new(NotificationFanoutService::new(
        devices,
        gateway,
        config.fanout.clone(),
    ));

    // Lifecycle
    let broadcaster = Arc::new(RealtimeBroadcaster::new());
    let notifier = Arc::new(
        PaymentNotifier::new(
            broadcaster.clone(),
            Some(fanout.clone()),
            config.public_base_url.clone(),
        )
        .with_branding(config.push_icon.clone(), config.push_badge.clone()),
    );
    let store: Arc<dyn TransactionStore> = Arc::new(InMemoryTransactionStore::new());
    let sweep = Arc::new(CancellationSweep::new(
        store.clone(),
        notifier.clone(),
        config.sweep.clone(),
    ));
    let registry = TransactionRegistry::new(sweep);
    let payments = Arc::new(PaymentService::new(store, registry.clone(), notifier));

    // Reclaim anything left pending by a previous run
    let startup = registry.sweep_now().await;
    tracing::info!(
        found = startup.found,
        cancelled = startup.cancelled.len(),
        "Startup sweep finished"
    );
    if registry.resume().await {
        tracing::info!("Pending transactions from a previous run are being watched");
    }

    let app = build_router(AppState {
        payments,
        fanout,
        broadcaster,
        cache,
        started_at: Instant::now(),
    });

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on http://{}", addr);
    tracing::info!("Realtime payments: ws://{}/ws/payments", addr);
    tracing::info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    registry.stop().await;
    tracing::info!("Sweep loop stopped, bye");

    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to listen for ctrl+c");
    tracing::info!("Shutting down gracefully...");
}
