use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;

use crate::models::{
    CancelCause, NotificationPayload, PaymentCancelled, PaymentStatusUpdate, Transaction,
    TransactionStatus,
};
use crate::services::{NotificationFanoutService, RealtimeBroadcaster};

#[async_trait]
pub trait LifecycleNotifier: Send + Sync {
    async fn transaction_cancelled(&self, transaction: &Transaction, cause: CancelCause);

    async fn status_changed(&self, transaction: &Transaction);
}

// Push delivery is spawned so callers never wait on it.
pub struct PaymentNotifier {
    broadcaster: Arc<RealtimeBroadcaster>,
    fanout: Option<Arc<NotificationFanoutService>>,
    public_base_url: String,
    icon: Option<String>,
    badge: Option<String>,
}

impl PaymentNotifier {
    pub fn new(
        broadcaster: Arc<RealtimeBroadcaster>,
        fanout: Option<Arc<NotificationFanoutService>>,
        public_base_url: impl Into<String>,
    ) -> Self {
        Self {
            broadcaster,
            fanout,
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
            icon: None,
            badge: None,
        }
    }

    pub fn with_branding(mut self, icon: Option<String>, badge: Option<String>) -> Self {
        self.icon = icon;
        self.badge = badge;
        self
    }

    fn payload_for(&self, transaction: &Transaction) -> Option<NotificationPayload> {
        let (title, body, url) = match transaction.status {
            TransactionStatus::Pending => return None,
            TransactionStatus::Success => (
                "Pagamento confirmado".to_string(),
                format!("O pagamento {} foi recebido.", transaction.public_id),
                format!("{}/pedidos/{}", self.public_base_url, transaction.public_id),
            ),
            TransactionStatus::Cancelled | TransactionStatus::Timeout => (
                "Pagamento cancelado".to_string(),
                format!(
                    "{} Toque para tentar novamente.",
                    transaction
                        .failure_reason
                        .as_deref()
                        .unwrap_or("O pagamento não foi concluído.")
                ),
                format!(
                    "{}/checkout/retry/{}",
                    self.public_base_url, transaction.public_id
                ),
            ),
            TransactionStatus::Failed => (
                "Pagamento não concluído".to_string(),
                transaction
                    .failure_reason
                    .clone()
                    .unwrap_or_else(|| "O provedor recusou o pagamento.".to_string()),
                format!(
                    "{}/checkout/retry/{}",
                    self.public_base_url, transaction.public_id
                ),
            ),
        };

        let mut builder = NotificationPayload::builder(title, body)
            .tag(format!("payment-{}", transaction.public_id))
            .url(url);
        if let Some(icon) = &self.icon {
            builder = builder.icon(icon.clone());
        }
        if let Some(badge) = &self.badge {
            builder = builder.badge(badge.clone());
        }
        Some(builder.build())
    }

    fn push_to_owner(&self, transaction: &Transaction) {
        let (Some(fanout), Some(user_id)) = (self.fanout.clone(), transaction.user_id.clone())
        else {
            return;
        };
        let Some(payload) = self.payload_for(transaction) else {
            return;
        };
        let transaction_id = transaction.id.clone();

        tokio::spawn(async move {
            match fanout.send_to_user(&user_id, &payload).await {
                Ok(report) if !report.success && report.total > 0 => tracing::warn!(
                    transaction_id = %transaction_id,
                    user_id = %user_id,
                    failed = report.failed,
                    "Lifecycle notification reached no device"
                ),
                Ok(_) => {}
                Err(e) => tracing::error!(
                    transaction_id = %transaction_id,
                    error = %e,
                    "Lifecycle notification failed"
                ),
            }
        });
    }
}

#[async_trait]
impl LifecycleNotifier for PaymentNotifier {
    async fn transaction_cancelled(&self, transaction: &Transaction, cause: CancelCause) {
        self.broadcaster
            .publish_cancellation(PaymentCancelled {
                transaction_id: transaction.id.clone(),
                public_id: transaction.public_id.clone(),
                reason: transaction.failure_reason.clone().unwrap_or_default(),
                error_kind: cause,
                timestamp: transaction.processed_at.unwrap_or_else(Utc::now),
            })
            .await;

        self.push_to_owner(transaction);
    }

    async fn status_changed(&self, transaction: &Transaction) {
        self.broadcaster
            .publish_status(PaymentStatusUpdate {
                transaction_id: transaction.id.clone(),
                public_id: transaction.public_id.clone(),
                status: transaction.status,
                timestamp: transaction.processed_at.unwrap_or_else(Utc::now),
            })
            .await;

        self.push_to_owner(transaction);
    }
}
