pub mod health;
pub mod payment;
pub mod push;
pub mod realtime;

pub use health::*;
pub use payment::*;
pub use push::*;
pub use realtime::*;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Instant;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, TraceLayer},
};

use crate::services::{
    CacheService, NotificationFanoutService, PaymentService, RealtimeBroadcaster,
};

#[derive(Clone)]
pub struct AppState {
    pub payments: Arc<PaymentService>,
    pub fanout: Arc<NotificationFanoutService>,
    pub broadcaster: Arc<RealtimeBroadcaster>,
    pub cache: Arc<CacheService>,
    pub started_at: Instant,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/payment/initiate", post(initiate_payment))
        .route("/payment/status/:payment_id", get(payment_status))
        .route("/payment/cancel/:payment_id", post(cancel_payment))
        .route("/payment/callback/:payment_id", post(provider_callback))
        .route("/push/subscribe", post(subscribe_device))
        .route("/push/unsubscribe", post(unsubscribe_device))
        .route("/push/devices", get(list_devices))
        .route("/ws/payments", get(websocket_handler))
        .with_state(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default().include_headers(true)),
        )
        .layer(CorsLayer::permissive())
}
