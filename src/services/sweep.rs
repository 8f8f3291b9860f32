use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::config::SweepConfig;
use crate::error::PaymentError;
use crate::models::{CancelCause, TerminalUpdate, Transaction};
use crate::services::{LifecycleNotifier, TransactionStore};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: bool,
    pub found: usize,
    pub cancelled: Vec<String>,
    pub failed: usize,
}

pub struct CancellationSweep {
    store: Arc<dyn TransactionStore>,
    notifier: Arc<dyn LifecycleNotifier>,
    config: SweepConfig,
    last_scan: Mutex<Option<DateTime<Utc>>>,
}

impl CancellationSweep {
    pub fn new(
        store: Arc<dyn TransactionStore>,
        notifier: Arc<dyn LifecycleNotifier>,
        config: SweepConfig,
    ) -> Self {
        Self {
            store,
            notifier,
            config,
            last_scan: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &SweepConfig {
        &self.config
    }

    pub fn stale_reason(&self) -> String {
        format!(
            "Pagamento não confirmado em {} minutos. A transação foi cancelada automaticamente.",
            self.config.stale_after_minutes()
        )
    }

    // a failed update is counted, never aborts the batch
    pub async fn run(&self, now: DateTime<Utc>, nothing_active: bool) -> SweepReport {
        let stale_after = self.config.stale_after_chrono();
        {
            let mut last_scan = self.last_scan.lock().await;
            if nothing_active {
                if let Some(previous) = *last_scan {
                    if now - previous < stale_after {
                        tracing::debug!("No active transactions and a recent scan, skipping sweep");
                        return SweepReport::default();
                    }
                }
            }
            *last_scan = Some(now);
        }

        let cutoff = now - stale_after;
        let stale = match self.store.find_pending_older_than(cutoff).await {
            Ok(stale) => stale,
            Err(e) => {
                tracing::error!(error = %e, "Failed to query stale transactions");
                return SweepReport {
                    scanned: true,
                    ..Default::default()
                };
            }
        };

        let mut report = SweepReport {
            scanned: true,
            found: stale.len(),
            ..Default::default()
        };
        if stale.is_empty() {
            return report;
        }

        tracing::info!(count = stale.len(), "Found stale pending transactions");
        let reason = self.stale_reason();

        for transaction in stale {
            match self
                .cancel(&transaction.id, CancelCause::Stale, &reason, now)
                .await
            {
                Ok(cancelled) => {
                    tracing::info!(
                        transaction_id = %cancelled.id,
                        public_id = %cancelled.public_id,
                        failure_id = cancelled.failure_id.as_deref().unwrap_or_default(),
                        "Stale transaction cancelled"
                    );
                    report.cancelled.push(cancelled.id);
                }
                Err(PaymentError::NotPending { status }) => {
                    // resolved between the query and the update
                    tracing::debug!(
                        transaction_id = %transaction.id,
                        status = %status,
                        "Transaction settled before sweep could cancel it"
                    );
                }
                Err(e) => {
                    tracing::error!(
                        transaction_id = %transaction.id,
                        error = %e,
                        "Failed to cancel stale transaction"
                    );
                    report.failed += 1;
                }
            }
        }

        report
    }

    // Errors count as pending so the loop keeps running.
    pub async fn has_pending(&self, now: DateTime<Utc>) -> bool {
        match self
            .store
            .find_pending_older_than(now + chrono::Duration::days(1))
            .await
        {
            Ok(rows) => !rows.is_empty(),
            Err(e) => {
                tracing::warn!(error = %e, "Could not check for pending transactions");
                true
            }
        }
    }

    /// Moves a pending transaction to `Cancelled` and emits the cancellation.
    /// Already-terminal transactions answer `NotPending` and stay untouched.
    pub async fn cancel(
        &self,
        id: &str,
        cause: CancelCause,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Transaction, PaymentError> {
        let transaction = self
            .store
            .terminalize(id, TerminalUpdate::cancelled(cause, reason, now))
            .await?;

        self.notifier
            .transaction_cancelled(&transaction, cause)
            .await;

        Ok(transaction)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::TransactionStatus;
    use crate::services::InMemoryTransactionStore;
    use async_trait::async_trait;
    use chrono::Duration;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    pub(crate) struct RecordingNotifier {
        pub cancelled: StdMutex<Vec<(String, CancelCause)>>,
        pub changed: StdMutex<Vec<(String, TransactionStatus)>>,
    }

    #[async_trait]
    impl LifecycleNotifier for RecordingNotifier {
        async fn transaction_cancelled(&self, transaction: &Transaction, cause: CancelCause) {
            self.cancelled
                .lock()
                .unwrap()
                .push((transaction.id.clone(), cause));
        }

        async fn status_changed(&self, transaction: &Transaction) {
            self.changed
                .lock()
                .unwrap()
                .push((transaction.id.clone(), transaction.status));
        }
    }

    struct FlakyStore {
        inner: InMemoryTransactionStore,
        broken_id: String,
    }

    #[async_trait]
    impl TransactionStore for FlakyStore {
        async fn insert(&self, transaction: Transaction) -> Result<(), PaymentError> {
            self.inner.insert(transaction).await
        }

        async fn find(&self, id: &str) -> Result<Option<Transaction>, PaymentError> {
            self.inner.find(id).await
        }

        async fn find_pending_older_than(
            &self,
            cutoff: DateTime<Utc>,
        ) -> Result<Vec<Transaction>, PaymentError> {
            self.inner.find_pending_older_than(cutoff).await
        }

        async fn terminalize(
            &self,
            id: &str,
            update: TerminalUpdate,
        ) -> Result<Transaction, PaymentError> {
            if id == self.broken_id {
                return Err(PaymentError::Store("connection reset".into()));
            }
            self.inner.terminalize(id, update).await
        }
    }

    fn sweep_with(
        store: Arc<dyn TransactionStore>,
    ) -> (CancellationSweep, Arc<RecordingNotifier>) {
        let notifier = Arc::new(RecordingNotifier::default());
        let sweep = CancellationSweep::new(store, notifier.clone(), SweepConfig::default());
        (sweep, notifier)
    }

    #[tokio::test]
    async fn age_gate_at_five_minutes() {
        let store = Arc::new(InMemoryTransactionStore::new());
        let t0 = Utc::now();
        let tx = Transaction::new_pending(None, 20.0, "mpesa", t0);
        let id = tx.id.clone();
        store.insert(tx).await.unwrap();
        let (sweep, notifier) = sweep_with(store.clone());

        let early = sweep
            .run(t0 + Duration::minutes(4) + Duration::seconds(59), false)
            .await;
        assert!(early.cancelled.is_empty());
        assert_eq!(
            store.find(&id).await.unwrap().unwrap().status,
            TransactionStatus::Pending
        );

        let late = sweep
            .run(t0 + Duration::minutes(5) + Duration::seconds(1), false)
            .await;
        assert_eq!(late.cancelled, vec![id.clone()]);

        let swept = store.find(&id).await.unwrap().unwrap();
        assert_eq!(swept.status, TransactionStatus::Cancelled);
        assert!(swept.failure_reason.unwrap().contains("5 minutos"));
        assert!(swept.failure_id.unwrap().starts_with("STL-"));
        assert!(swept.processed_at.is_some());
        assert_eq!(
            notifier.cancelled.lock().unwrap().as_slice(),
            &[(id, CancelCause::Stale)]
        );
    }

    #[tokio::test]
    async fn one_failed_update_does_not_abort_batch() {
        let inner = InMemoryTransactionStore::new();
        let old = Utc::now() - Duration::minutes(10);
        let broken = Transaction::new_pending(None, 1.0, "mpesa", old);
        let healthy = Transaction::new_pending(None, 1.0, "mpesa", old + Duration::seconds(1));
        let broken_id = broken.id.clone();
        let healthy_id = healthy.id.clone();
        inner.insert(broken).await.unwrap();
        inner.insert(healthy).await.unwrap();
        let (sweep, _) = sweep_with(Arc::new(FlakyStore { inner, broken_id }));

        let report = sweep.run(Utc::now(), false).await;

        assert_eq!(report.found, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.cancelled, vec![healthy_id]);
    }

    #[tokio::test]
    async fn idle_scan_is_skipped_when_recent() {
        let store = Arc::new(InMemoryTransactionStore::new());
        let (sweep, _) = sweep_with(store);
        let now = Utc::now();

        assert!(sweep.run(now, true).await.scanned);
        assert!(!sweep.run(now + Duration::minutes(1), true).await.scanned);
        assert!(sweep.run(now + Duration::minutes(1), false).await.scanned);
        assert!(sweep.run(now + Duration::minutes(7), true).await.scanned);
    }

    #[tokio::test]
    async fn cancel_is_idempotent_against_terminal_states() {
        let store = Arc::new(InMemoryTransactionStore::new());
        let tx = Transaction::new_pending(None, 1.0, "mpesa", Utc::now());
        let id = tx.id.clone();
        store.insert(tx).await.unwrap();
        let (sweep, notifier) = sweep_with(store.clone());

        sweep
            .cancel(&id, CancelCause::UserCancelled, "Cancelado pelo cliente.", Utc::now())
            .await
            .unwrap();
        let again = sweep
            .cancel(&id, CancelCause::Timeout, "late", Utc::now())
            .await
            .unwrap_err();

        assert!(again.is_not_pending());
        assert_eq!(notifier.cancelled.lock().unwrap().len(), 1);
        let stored = store.find(&id).await.unwrap().unwrap();
        assert_eq!(stored.status, TransactionStatus::Cancelled);
        assert!(stored.failure_id.unwrap().starts_with("USR-"));
    }
}
