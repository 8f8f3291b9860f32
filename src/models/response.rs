use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{DeviceInfo, PublicDevice, PushSubscription};

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct InitiatePaymentRequest {
    #[serde(default)]
    pub user_id: Option<String>,
    pub amount: f64,
    #[serde(default = "default_method")]
    pub method: String,
}

fn default_method() -> String {
    "mpesa".to_string()
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct InitiatePaymentResponse {
    pub success: bool,
    pub payment_id: String,
    #[serde(default)]
    pub public_id: Option<String>,
}

/// Body of `GET /payment/status/{paymentId}`. `status` stays a string on the
/// wire so clients tolerate values the server may add later.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PaymentStatusResponse {
    pub success: bool,
    pub status: String,
    #[serde(default)]
    pub is_processing: bool,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CancelPaymentResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ProviderCallbackRequest {
    pub status: String,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeRequest {
    pub subscription: PushSubscription,
    pub user_id: String,
    #[serde(default)]
    pub device_info: DeviceInfo,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeResponse {
    pub success: bool,
    pub device_id: String,
    pub device_count: usize,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct UnsubscribeRequest {
    pub user_id: String,
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub subscription: Option<PushSubscription>,
    #[serde(default)]
    pub all: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct UnsubscribeResponse {
    pub success: bool,
    pub device_count: usize,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DevicesResponse {
    pub success: bool,
    pub devices: Vec<PublicDevice>,
    pub count: usize,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct HealthStatus {
    pub status: String,
    pub version: String,
    pub redis: bool,
    pub sweep_running: bool,
    pub active_transactions: usize,
    pub uptime_seconds: u64,
    pub timestamp: DateTime<Utc>,
}
