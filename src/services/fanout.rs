use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::time::{sleep, timeout, Instant};

use crate::config::FanoutConfig;
use crate::error::PaymentError;
use crate::models::{Device, DeviceInfo, NotificationPayload, PushSubscription, Registration};
use crate::services::backoff::linear_backoff;
use crate::services::push::{DeliveryError, PushGateway};
use crate::services::DeviceRepository;

#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryOutcome {
    Delivered,
    Failed(DeliveryError),
    InvalidEndpoint(DeliveryError),
}

#[derive(Debug, Clone)]
pub struct DeviceDelivery {
    pub device_id: String,
    pub attempts: u32,
    pub outcome: DeliveryOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FanoutReport {
    pub success: bool,
    pub sent: usize,
    pub failed: usize,
    pub total: usize,
    pub invalid_devices_removed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl FanoutReport {
    fn no_devices() -> Self {
        Self {
            success: false,
            sent: 0,
            failed: 0,
            total: 0,
            invalid_devices_removed: 0,
            message: Some("no devices".to_string()),
        }
    }
}

pub struct NotificationFanoutService {
    devices: Arc<DeviceRepository>,
    gateway: Arc<dyn PushGateway>,
    config: FanoutConfig,
}

impl NotificationFanoutService {
    pub fn new(
        devices: Arc<DeviceRepository>,
        gateway: Arc<dyn PushGateway>,
        config: FanoutConfig,
    ) -> Self {
        Self {
            devices,
            gateway,
            config,
        }
    }

    pub async fn register_device(
        &self,
        user_id: &str,
        subscription: PushSubscription,
        info: DeviceInfo,
    ) -> Result<(Registration, usize), PaymentError> {
        self.devices.register(user_id, subscription, info).await
    }

    pub async fn unregister_device(
        &self,
        user_id: &str,
        device_id: &str,
    ) -> Result<usize, PaymentError> {
        self.devices.unregister(user_id, device_id).await
    }

    pub async fn unregister_endpoint(
        &self,
        user_id: &str,
        endpoint: &str,
    ) -> Result<usize, PaymentError> {
        self.devices.unregister_endpoint(user_id, endpoint).await
    }

    pub async fn unregister_all(&self, user_id: &str) -> Result<usize, PaymentError> {
        self.devices.unregister_all(user_id).await
    }

    pub async fn devices(&self, user_id: &str) -> Result<Vec<Device>, PaymentError> {
        Ok(self.devices.list(user_id).await?.into_devices())
    }

    pub async fn send_to_user(
        &self,
        user_id: &str,
        payload: &NotificationPayload,
    ) -> Result<FanoutReport, PaymentError> {
        let devices = self.devices.active_devices(user_id).await?;
        if devices.is_empty() {
            tracing::debug!(user_id = user_id, "No active devices, notification skipped");
            return Ok(FanoutReport::no_devices());
        }

        let deliveries = join_all(
            devices
                .iter()
                .map(|device| self.deliver_with_retry(device, payload)),
        )
        .await;

        let attempted: Vec<String> = deliveries.iter().map(|d| d.device_id.clone()).collect();
        let invalid: Vec<String> = deliveries
            .iter()
            .filter(|d| matches!(d.outcome, DeliveryOutcome::InvalidEndpoint(_)))
            .map(|d| d.device_id.clone())
            .collect();

        let invalid_devices_removed = match self
            .devices
            .record_delivery(user_id, &attempted, &invalid)
            .await
        {
            Ok(removed) => removed,
            Err(e) => {
                tracing::error!(user_id = user_id, error = %e, "Failed to record delivery results");
                0
            }
        };

        let sent = deliveries
            .iter()
            .filter(|d| d.outcome == DeliveryOutcome::Delivered)
            .count();
        let total = deliveries.len();

        tracing::info!(
            user_id = user_id,
            sent,
            failed = total - sent,
            total,
            invalid_devices_removed,
            "Notification fan-out complete"
        );

        Ok(FanoutReport {
            success: sent > 0,
            sent,
            failed: total - sent,
            total,
            invalid_devices_removed,
            message: None,
        })
    }

    async fn deliver_with_retry(
        &self,
        device: &Device,
        payload: &NotificationPayload,
    ) -> DeviceDelivery {
        // each device gets its own budget so one dead endpoint can't stall the rest
        let deadline = Instant::now() + self.config.device_budget;
        let mut attempts = 0;
        let mut last_error = DeliveryError::Timeout;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let delay = linear_backoff(attempt, self.config.backoff_base);
                if Instant::now() + delay >= deadline {
                    break;
                }
                sleep(delay).await;
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            attempts += 1;

            let budget = remaining.min(self.config.attempt_timeout);
            let error = match timeout(budget, self.gateway.deliver(device, payload)).await {
                Ok(Ok(())) => {
                    return DeviceDelivery {
                        device_id: device.device_id.clone(),
                        attempts,
                        outcome: DeliveryOutcome::Delivered,
                    };
                }
                Ok(Err(e)) => e,
                Err(_) => DeliveryError::Timeout,
            };

            if error.is_invalid_endpoint() {
                tracing::info!(
                    device_id = %device.device_id,
                    error = %error,
                    "Push endpoint invalid, device will be removed"
                );
                return DeviceDelivery {
                    device_id: device.device_id.clone(),
                    attempts,
                    outcome: DeliveryOutcome::InvalidEndpoint(error),
                };
            }

            if !error.is_retryable() {
                tracing::warn!(device_id = %device.device_id, error = %error, "Push rejected");
                return DeviceDelivery {
                    device_id: device.device_id.clone(),
                    attempts,
                    outcome: DeliveryOutcome::Failed(error),
                };
            }

            tracing::warn!(
                device_id = %device.device_id,
                attempt = attempts,
                error = %error,
                "Push delivery failed, will retry"
            );
            last_error = error;
        }

        DeviceDelivery {
            device_id: device.device_id.clone(),
            attempts,
            outcome: DeliveryOutcome::Failed(last_error),
        }
    }
}
