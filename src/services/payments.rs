use chrono::Utc;
use std::sync::Arc;

use crate::error::PaymentError;
use crate::models::{
    CancelCause, InitiatePaymentRequest, PaymentStatusResponse, TerminalUpdate, Transaction,
    TransactionStatus,
};
use crate::services::{LifecycleNotifier, TransactionRegistry, TransactionStore};

pub const USER_CANCEL_REASON: &str = "Pagamento cancelado pelo cliente.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderOutcome {
    Success,
    Failed,
    Timeout,
    ConnectionError,
}

impl std::str::FromStr for ProviderOutcome {
    type Err = PaymentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "success" | "completed" => Ok(ProviderOutcome::Success),
            "failed" | "rejected" => Ok(ProviderOutcome::Failed),
            "timeout" => Ok(ProviderOutcome::Timeout),
            "connection_error" | "connection-error" => Ok(ProviderOutcome::ConnectionError),
            other => Err(PaymentError::InvalidRequest(format!(
                "unknown provider status: {}",
                other
            ))),
        }
    }
}

pub struct PaymentService {
    store: Arc<dyn TransactionStore>,
    registry: Arc<TransactionRegistry>,
    notifier: Arc<dyn LifecycleNotifier>,
}

impl PaymentService {
    pub fn new(
        store: Arc<dyn TransactionStore>,
        registry: Arc<TransactionRegistry>,
        notifier: Arc<dyn LifecycleNotifier>,
    ) -> Self {
        Self {
            store,
            registry,
            notifier,
        }
    }

    pub fn registry(&self) -> &Arc<TransactionRegistry> {
        &self.registry
    }

    pub async fn initiate(
        &self,
        request: InitiatePaymentRequest,
    ) -> Result<Transaction, PaymentError> {
        if !request.amount.is_finite() || request.amount <= 0.0 {
            return Err(PaymentError::InvalidRequest(
                "amount must be a positive number".to_string(),
            ));
        }

        let transaction =
            Transaction::new_pending(request.user_id, request.amount, request.method, Utc::now());
        self.store.insert(transaction.clone()).await?;
        self.registry.register_active(&transaction.id).await;
        self.notifier.status_changed(&transaction).await;

        tracing::info!(
            transaction_id = %transaction.id,
            public_id = %transaction.public_id,
            amount = transaction.amount,
            method = %transaction.method,
            "Payment initiated"
        );

        Ok(transaction)
    }

    pub async fn status(&self, id: &str) -> Result<PaymentStatusResponse, PaymentError> {
        let transaction = self
            .store
            .find(id)
            .await?
            .ok_or_else(|| PaymentError::NotFound(id.to_string()))?;

        let message = match transaction.status {
            TransactionStatus::Pending => {
                "Aguardando confirmação do pagamento no telemóvel.".to_string()
            }
            TransactionStatus::Success => "Pagamento confirmado.".to_string(),
            TransactionStatus::Cancelled
            | TransactionStatus::Failed
            | TransactionStatus::Timeout => transaction
                .failure_reason
                .clone()
                .unwrap_or_else(|| "O pagamento não foi concluído.".to_string()),
        };

        Ok(PaymentStatusResponse {
            success: true,
            status: transaction.status.as_str().to_string(),
            is_processing: transaction.is_pending(),
            message: Some(message),
        })
    }

    pub async fn cancel(&self, id: &str) -> Result<Transaction, PaymentError> {
        self.registry
            .cancel_explicit(id, USER_CANCEL_REASON, CancelCause::UserCancelled)
            .await
    }

    pub async fn resolve(
        &self,
        id: &str,
        outcome: ProviderOutcome,
        reason: Option<String>,
    ) -> Result<Transaction, PaymentError> {
        let status = match outcome {
            ProviderOutcome::Timeout => {
                let reason = reason.unwrap_or_else(|| {
                    "O provedor não respondeu a tempo. Tente novamente.".to_string()
                });
                return self
                    .registry
                    .cancel_explicit(id, &reason, CancelCause::Timeout)
                    .await;
            }
            ProviderOutcome::ConnectionError => {
                let reason = reason.unwrap_or_else(|| {
                    "Falha de ligação com o provedor de pagamento. Tente novamente.".to_string()
                });
                return self
                    .registry
                    .cancel_explicit(id, &reason, CancelCause::ConnectionError)
                    .await;
            }
            ProviderOutcome::Success => TransactionStatus::Success,
            ProviderOutcome::Failed => TransactionStatus::Failed,
        };

        let result = self
            .store
            .terminalize(id, TerminalUpdate::resolved(status, reason, Utc::now()))
            .await;

        match result {
            Ok(transaction) => {
                self.registry.remove_active(id).await;
                self.notifier.status_changed(&transaction).await;
                tracing::info!(
                    transaction_id = %transaction.id,
                    status = %transaction.status,
                    "Payment resolved by provider"
                );
                Ok(transaction)
            }
            Err(e @ PaymentError::NotPending { .. }) => {
                self.registry.remove_active(id).await;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }
}
