use crate::{handlers::AppState, models::HealthStatus};
use axum::{extract::State, Json};
use chrono::Utc;

pub async fn health_check(State(state): State<AppState>) -> Json<HealthStatus> {
    let redis_ok = state.cache.ping().await.unwrap_or(false);
    let registry = state.payments.registry();
    let sweep_running = registry.is_running().await;
    let active_transactions = registry.active_count().await;

    // a stopped loop with work outstanding means stale rows will not be swept
    let status = if sweep_running || active_transactions == 0 {
        if redis_ok || !state.cache.has_redis() {
            "healthy"
        } else {
            "degraded"
        }
    } else {
        "unhealthy"
    };

    Json(HealthStatus {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        redis: redis_ok,
        sweep_running,
        active_transactions,
        uptime_seconds: state.started_at.elapsed().as_secs(),
        timestamp: Utc::now(),
    })
}
