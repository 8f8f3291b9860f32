use async_trait::async_trait;
use thiserror::Error;
use web_push::{
    ContentEncoding, IsahcWebPushClient, SubscriptionInfo, VapidSignatureBuilder, WebPushClient,
    WebPushError, WebPushMessageBuilder,
};

use crate::models::{Device, NotificationPayload};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("network error: {0}")]
    Network(String),

    #[error("delivery attempt timed out")]
    Timeout,

    #[error("push service unavailable: {0}")]
    Upstream(String),

    #[error("endpoint no longer valid: {0}")]
    InvalidEndpoint(String),

    #[error("push service rejected message: {0}")]
    Rejected(String),
}

impl DeliveryError {
    // soft failures, worth another attempt after a backoff
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DeliveryError::Network(_) | DeliveryError::Timeout | DeliveryError::Upstream(_)
        )
    }

    // the endpoint is gone and the device must be pruned
    pub fn is_invalid_endpoint(&self) -> bool {
        matches!(self, DeliveryError::InvalidEndpoint(_))
    }

    fn classify(kind: &str, detail: String) -> Self {
        match kind {
            "endpoint_not_valid" | "endpoint_not_found" => DeliveryError::InvalidEndpoint(detail),
            "server_error" => DeliveryError::Upstream(detail),
            "io_error" | "unspecified" => DeliveryError::Network(detail),
            _ => DeliveryError::Rejected(detail),
        }
    }
}

impl From<WebPushError> for DeliveryError {
    fn from(e: WebPushError) -> Self {
        DeliveryError::classify(e.short_description(), e.to_string())
    }
}

#[async_trait]
pub trait PushGateway: Send + Sync {
    async fn deliver(
        &self,
        device: &Device,
        payload: &NotificationPayload,
    ) -> Result<(), DeliveryError>;
}

pub struct WebPushGateway {
    client: IsahcWebPushClient,
    vapid_pem: String,
    subject: String,
    ttl_secs: u32,
}

impl WebPushGateway {
    pub fn new(vapid_pem: impl Into<String>, subject: impl Into<String>) -> anyhow::Result<Self> {
        let vapid_pem = vapid_pem.into();
        VapidSignatureBuilder::from_pem_no_sub(vapid_pem.as_bytes())
            .map_err(|e| anyhow::anyhow!("invalid VAPID private key: {}", e))?;

        Ok(Self {
            client: IsahcWebPushClient::new()?,
            vapid_pem,
            subject: subject.into(),
            ttl_secs: 24 * 3600,
        })
    }
}

#[async_trait]
impl PushGateway for WebPushGateway {
    async fn deliver(
        &self,
        device: &Device,
        payload: &NotificationPayload,
    ) -> Result<(), DeliveryError> {
        let subscription = SubscriptionInfo::new(
            device.endpoint.as_str(),
            device.keys.p256dh.as_str(),
            device.keys.auth.as_str(),
        );

        let mut signature = VapidSignatureBuilder::from_pem(self.vapid_pem.as_bytes(), &subscription)?;
        signature.add_claim("sub", self.subject.as_str());

        let content = serde_json::to_vec(payload)
            .map_err(|e| DeliveryError::Rejected(e.to_string()))?;

        let mut message = WebPushMessageBuilder::new(&subscription);
        message.set_payload(ContentEncoding::Aes128Gcm, &content);
        message.set_ttl(self.ttl_secs);
        message.set_vapid_signature(signature.build()?);

        self.client.send(message.build()?).await?;
        Ok(())
    }
}
