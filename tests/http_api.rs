use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use payment_pulse::{
    config::{FanoutConfig, SweepConfig},
    handlers::{build_router, AppState},
    models::{Device, NotificationPayload},
    services::*,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tower::ServiceExt;

struct SilentGateway;

#[async_trait]
impl PushGateway for SilentGateway {
    async fn deliver(&self, _: &Device, _: &NotificationPayload) -> Result<(), DeliveryError> {
        Ok(())
    }
}

fn app() -> Router {
    let cache = Arc::new(CacheService::memory_only());
    let fanout_config = FanoutConfig::default();
    let devices = Arc::new(DeviceRepository::new(cache.clone(), &fanout_config));
    let gateway = Arc::new(SilentGateway);
    let fanout = Arc::new(NotificationFanoutService::new(
        devices,
        gateway,
        fanout_config,
    ));

    let broadcaster = Arc::new(RealtimeBroadcaster::new());
    let notifier = Arc::new(PaymentNotifier::new(
        broadcaster.clone(),
        Some(fanout.clone()),
        "http://localhost:8080",
    ));
    let store: Arc<dyn TransactionStore> = Arc::new(InMemoryTransactionStore::new());
    let sweep = Arc::new(CancellationSweep::new(
        store.clone(),
        notifier.clone(),
        SweepConfig::default(),
    ));
    let registry = TransactionRegistry::new(sweep);
    let payments = Arc::new(PaymentService::new(store, registry, notifier));

    build_router(AppState {
        payments,
        fanout,
        broadcaster,
        cache,
        started_at: Instant::now(),
    })
}

async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

async fn initiate(app: &Router) -> String {
    let (status, body) = call(
        app,
        "POST",
        "/payment/initiate",
        Some(json!({"userId": "user-1", "amount": 150.0, "method": "mpesa"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert!(body["publicId"].as_str().unwrap().starts_with("PAY-"));
    body["paymentId"].as_str().unwrap().to_string()
}

fn subscription(n: usize) -> Value {
    json!({
        "endpoint": format!("https://push.example.com/send/{}", n),
        "keys": {"p256dh": "BNcRdreALRFXTkOOUHK1EtK2wtaz5Ry4YfYCA", "auth": "tBHItJI5svbpez7KI4CCXg"}
    })
}

#[tokio::test]
async fn health_reports_idle_sweep() {
    let app = app();
    let (status, body) = call(&app, "GET", "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["redis"], false);
    assert_eq!(body["sweep_running"], false);
    assert_eq!(body["active_transactions"], 0);
}

#[tokio::test]
async fn payment_lifecycle_with_user_cancel() {
    let app = app();
    let id = initiate(&app).await;

    let (_, body) = call(&app, "GET", &format!("/payment/status/{}", id), None).await;
    assert_eq!(body["status"], "pending");
    assert_eq!(body["isProcessing"], true);

    let (_, health) = call(&app, "GET", "/health", None).await;
    assert_eq!(health["sweep_running"], true);
    assert_eq!(health["active_transactions"], 1);

    let (status, body) = call(&app, "POST", &format!("/payment/cancel/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    let (_, body) = call(&app, "GET", &format!("/payment/status/{}", id), None).await;
    assert_eq!(body["status"], "cancelled");
    assert_eq!(body["isProcessing"], false);

    let (status, body) = call(&app, "POST", &format!("/payment/cancel/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], false);

    let (_, health) = call(&app, "GET", "/health", None).await;
    assert_eq!(health["sweep_running"], false);
}

#[tokio::test]
async fn provider_callback_settles_payment_once() {
    let app = app();
    let id = initiate(&app).await;
    let uri = format!("/payment/callback/{}", id);

    let (status, body) = call(&app, "POST", &uri, Some(json!({"status": "success"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    let (_, body) = call(&app, "POST", &uri, Some(json!({"status": "failed"}))).await;
    assert_eq!(body["success"], false);

    let (_, body) = call(&app, "GET", &format!("/payment/status/{}", id), None).await;
    assert_eq!(body["status"], "success");
}

#[tokio::test]
async fn bad_requests_map_to_error_codes() {
    let app = app();

    let (status, body) = call(&app, "GET", "/payment/status/does-not-exist", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
    assert_eq!(body["error_code"], "NOT_FOUND");

    let (status, body) = call(
        &app,
        "POST",
        "/payment/initiate",
        Some(json!({"amount": 0.0})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error_code"], "INVALID_REQUEST");

    let id = initiate(&app).await;
    let (status, _) = call(
        &app,
        "POST",
        &format!("/payment/callback/{}", id),
        Some(json!({"status": "maybe"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn device_registration_is_capped_and_listing_hides_keys() {
    let app = app();

    let mut last_count = 0;
    for n in 0..11 {
        let (status, body) = call(
            &app,
            "POST",
            "/push/subscribe",
            Some(json!({
                "userId": "user-1",
                "subscription": subscription(n),
                "deviceInfo": {"platform": "android", "browser": "chrome"}
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        last_count = body["deviceCount"].as_u64().unwrap();
    }
    assert_eq!(last_count, 10);

    let (_, body) = call(&app, "GET", "/push/devices?userId=user-1", None).await;
    assert_eq!(body["count"], 10);
    let first = &body["devices"][0];
    assert!(first.get("deviceId").is_some());
    assert!(first.get("keys").is_none());
    assert!(first.get("endpoint").is_none());

    let (_, body) = call(
        &app,
        "POST",
        "/push/unsubscribe",
        Some(json!({"userId": "user-1", "subscription": subscription(5)})),
    )
    .await;
    assert_eq!(body["deviceCount"], 9);

    let (_, body) = call(
        &app,
        "POST",
        "/push/unsubscribe",
        Some(json!({"userId": "user-1", "all": true})),
    )
    .await;
    assert_eq!(body["deviceCount"], 0);

    let (_, body) = call(&app, "GET", "/push/devices?userId=user-1", None).await;
    assert_eq!(body["count"], 0);
}

#[tokio::test]
async fn unsubscribe_without_target_is_rejected() {
    let app = app();
    let (status, body) = call(
        &app,
        "POST",
        "/push/unsubscribe",
        Some(json!({"userId": "user-1"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error_code"], "INVALID_REQUEST");
}
