use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::error::PaymentError;
use crate::models::{TerminalUpdate, Transaction};

// `terminalize` is a compare-and-set from `Pending`; terminal rows answer NotPending
#[async_trait]
pub trait TransactionStore: Send + Sync {
    async fn insert(&self, transaction: Transaction) -> Result<(), PaymentError>;

    async fn find(&self, id: &str) -> Result<Option<Transaction>, PaymentError>;

    async fn find_pending_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Transaction>, PaymentError>;

    async fn terminalize(
        &self,
        id: &str,
        update: TerminalUpdate,
    ) -> Result<Transaction, PaymentError>;
}

#[derive(Default)]
pub struct InMemoryTransactionStore {
    rows: RwLock<HashMap<String, Transaction>>,
}

impl InMemoryTransactionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TransactionStore for InMemoryTransactionStore {
    async fn insert(&self, transaction: Transaction) -> Result<(), PaymentError> {
        let mut rows = self.rows.write().await;
        if rows.contains_key(&transaction.id) {
            return Err(PaymentError::Store(format!(
                "duplicate transaction id {}",
                transaction.id
            )));
        }
        rows.insert(transaction.id.clone(), transaction);
        Ok(())
    }

    async fn find(&self, id: &str) -> Result<Option<Transaction>, PaymentError> {
        Ok(self.rows.read().await.get(id).cloned())
    }

    async fn find_pending_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Transaction>, PaymentError> {
        let rows = self.rows.read().await;
        let mut stale: Vec<Transaction> = rows
            .values()
            .filter(|tx| tx.is_pending() && tx.created_at < cutoff)
            .cloned()
            .collect();
        stale.sort_by_key(|tx| tx.created_at);
        Ok(stale)
    }

    async fn terminalize(
        &self,
        id: &str,
        update: TerminalUpdate,
    ) -> Result<Transaction, PaymentError> {
        let mut rows = self.rows.write().await;
        let tx = rows
            .get_mut(id)
            .ok_or_else(|| PaymentError::NotFound(id.to_string()))?;

        if !tx.is_pending() {
            return Err(PaymentError::NotPending { status: tx.status });
        }

        tx.status = update.status;
        tx.failure_reason = update.failure_reason;
        tx.failure_id = update.failure_id;
        tx.processed_at = Some(update.processed_at);

        Ok(tx.clone())
    }
}
