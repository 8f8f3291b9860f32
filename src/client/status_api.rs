use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::time::Duration;
use thiserror::Error;

use crate::models::{
    CancelPaymentResponse, InitiatePaymentRequest, InitiatePaymentResponse,
    PaymentStatusResponse,
};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PollerError {
    #[error("network error: {0}")]
    Network(String),

    #[error("server answered HTTP {0}")]
    Provider(u16),

    #[error("could not decode server response: {0}")]
    Decode(String),
}

impl PollerError {
    /// Failures that count toward the consecutive-error tolerance instead of
    /// ending the session at once.
    pub fn is_transient(&self) -> bool {
        match self {
            PollerError::Network(_) => true,
            PollerError::Provider(code) => *code >= 500,
            PollerError::Decode(_) => false,
        }
    }
}

impl From<reqwest::Error> for PollerError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            PollerError::Decode(e.to_string())
        } else if let Some(status) = e.status() {
            PollerError::Provider(status.as_u16())
        } else {
            PollerError::Network(e.to_string())
        }
    }
}

#[async_trait]
pub trait StatusApi: Send + Sync {
    async fn initiate(
        &self,
        request: &InitiatePaymentRequest,
    ) -> Result<InitiatePaymentResponse, PollerError>;

    async fn status(&self, payment_id: &str) -> Result<PaymentStatusResponse, PollerError>;

    async fn cancel(&self, payment_id: &str) -> Result<CancelPaymentResponse, PollerError>;
}

pub struct HttpStatusApi {
    client: Client,
    base_url: String,
}

impl HttpStatusApi {
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self, PollerError> {
        let client = Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn read<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, PollerError> {
        let status = response.status();
        if !status.is_success() {
            return Err(PollerError::Provider(status.as_u16()));
        }
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl StatusApi for HttpStatusApi {
    async fn initiate(
        &self,
        request: &InitiatePaymentRequest,
    ) -> Result<InitiatePaymentResponse, PollerError> {
        let response = self
            .client
            .post(format!("{}/payment/initiate", self.base_url))
            .json(request)
            .send()
            .await?;
        Self::read(response).await
    }

    async fn status(&self, payment_id: &str) -> Result<PaymentStatusResponse, PollerError> {
        let response = self
            .client
            .get(format!("{}/payment/status/{}", self.base_url, payment_id))
            .send()
            .await?;
        Self::read(response).await
    }

    async fn cancel(&self, payment_id: &str) -> Result<CancelPaymentResponse, PollerError> {
        let response = self
            .client
            .post(format!("{}/payment/cancel/{}", self.base_url, payment_id))
            .send()
            .await?;
        Self::read(response).await
    }
}
