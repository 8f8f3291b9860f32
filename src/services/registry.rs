// Assumes a single running instance. Instances sharing one store would each
// cancel the same stale rows; terminalize keeps that correct but duplicates work.

use chrono::Utc;
use std::collections::HashSet;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::error::PaymentError;
use crate::models::{CancelCause, Transaction};
use crate::services::sweep::{CancellationSweep, SweepReport};

struct SweepLoop {
    generation: u64,
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

pub struct TransactionRegistry {
    active: RwLock<HashSet<String>>,
    sweep: Arc<CancellationSweep>,
    period: Duration,
    sweep_loop: Mutex<Option<SweepLoop>>,
    tick_lock: Mutex<()>,
    generations: std::sync::atomic::AtomicU64,
}

impl TransactionRegistry {
    pub fn new(sweep: Arc<CancellationSweep>) -> Arc<Self> {
        let period = sweep.config().interval;
        Arc::new(Self {
            active: RwLock::new(HashSet::new()),
            sweep,
            period,
            sweep_loop: Mutex::new(None),
            tick_lock: Mutex::new(()),
            generations: std::sync::atomic::AtomicU64::new(0),
        })
    }

    // Lock order everywhere: `sweep_loop` first, then `active`.
    pub async fn register_active(self: &Arc<Self>, id: &str) {
        let mut slot = self.sweep_loop.lock().await;
        if self.active.write().await.insert(id.to_string()) {
            tracing::debug!(transaction_id = id, "Transaction registered as active");
        }
        self.ensure_running(&mut slot);
    }

    pub async fn remove_active(&self, id: &str) {
        let mut slot = self.sweep_loop.lock().await;
        let now_empty = {
            let mut active = self.active.write().await;
            active.remove(id);
            active.is_empty()
        };
        if now_empty && !self.sweep.has_pending(Utc::now()).await {
            Self::halt(&mut slot, "Nothing left to watch, sweep loop stopped");
        }
    }

    pub async fn is_active(&self, id: &str) -> bool {
        self.active.read().await.contains(id)
    }

    pub async fn active_count(&self) -> usize {
        self.active.read().await.len()
    }

    pub async fn is_running(&self) -> bool {
        self.sweep_loop
            .lock()
            .await
            .as_ref()
            .map(|l| !l.handle.is_finished())
            .unwrap_or(false)
    }

    pub async fn start(self: &Arc<Self>) {
        let mut slot = self.sweep_loop.lock().await;
        self.ensure_running(&mut slot);
    }

    /// Starts the loop when the store still holds pending rows, e.g. after a restart.
    pub async fn resume(self: &Arc<Self>) -> bool {
        let mut slot = self.sweep_loop.lock().await;
        if !self.sweep.has_pending(Utc::now()).await {
            return false;
        }
        self.ensure_running(&mut slot);
        true
    }

    /// Asks the loop to exit. A tick already in progress finishes first.
    pub async fn stop(&self) {
        let mut slot = self.sweep_loop.lock().await;
        Self::halt(&mut slot, "Sweep loop stopped");
    }

    fn ensure_running(self: &Arc<Self>, slot: &mut Option<SweepLoop>) {
        if slot.as_ref().is_some_and(|l| !l.handle.is_finished()) {
            return;
        }

        let generation = self
            .generations
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed)
            + 1;
        let (stop, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(Self::run_loop(
            Arc::downgrade(self),
            self.period,
            generation,
            stop_rx,
        ));

        tracing::info!(period_secs = self.period.as_secs(), "Sweep loop started");
        *slot = Some(SweepLoop {
            generation,
            stop,
            handle,
        });
    }

    fn halt(slot: &mut Option<SweepLoop>, message: &str) {
        if let Some(sweep_loop) = slot.take() {
            let _ = sweep_loop.stop.send(true);
            tracing::info!("{}", message);
        }
    }

    async fn run_loop(
        registry: Weak<Self>,
        period: Duration,
        generation: u64,
        mut stop: watch::Receiver<bool>,
    ) {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = stop.changed() => break,
            }
            if *stop.borrow() {
                break;
            }

            let Some(registry) = registry.upgrade() else {
                break;
            };
            registry.sweep_now().await;

            let mut slot = registry.sweep_loop.lock().await;
            if !slot.as_ref().is_some_and(|l| l.generation == generation) {
                break;
            }
            // unwatched rows (restored after a restart) still keep the loop alive
            if registry.active.read().await.is_empty()
                && !registry.sweep.has_pending(Utc::now()).await
            {
                *slot = None;
                tracing::info!("Nothing left to watch, sweep loop stopped");
                break;
            }
        }
    }

    pub async fn sweep_now(&self) -> SweepReport {
        let _tick = self.tick_lock.lock().await;
        let nothing_active = self.active.read().await.is_empty();
        let report = self.sweep.run(Utc::now(), nothing_active).await;

        for id in &report.cancelled {
            self.remove_active(id).await;
        }
        report
    }

    pub async fn cancel_explicit(
        &self,
        id: &str,
        reason: &str,
        cause: CancelCause,
    ) -> Result<Transaction, PaymentError> {
        let result = self.sweep.cancel(id, cause, reason, Utc::now()).await;
        if matches!(result, Ok(_) | Err(PaymentError::NotPending { .. })) {
            self.remove_active(id).await;
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SweepConfig;
    use crate::models::{TerminalUpdate, TransactionStatus};
    use crate::services::sweep::tests::RecordingNotifier;
    use crate::services::{InMemoryTransactionStore, TransactionStore};

    fn registry_with_store() -> (Arc<TransactionRegistry>, Arc<InMemoryTransactionStore>) {
        let store = Arc::new(InMemoryTransactionStore::new());
        let sweep = Arc::new(CancellationSweep::new(
            store.clone(),
            Arc::new(RecordingNotifier::default()),
            SweepConfig::default(),
        ));
        (TransactionRegistry::new(sweep), store)
    }

    #[tokio::test]
    async fn registering_starts_and_removing_last_stops() {
        let (registry, _) = registry_with_store();
        assert!(!registry.is_running().await);

        registry.register_active("tx-1").await;
        registry.register_active("tx-2").await;
        assert!(registry.is_running().await);
        assert_eq!(registry.active_count().await, 2);

        registry.remove_active("tx-1").await;
        assert!(registry.is_running().await);

        registry.remove_active("tx-2").await;
        assert!(!registry.is_running().await);

        registry.start().await;
        assert!(registry.is_running().await);
        registry.stop().await;
        assert!(!registry.is_running().await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_register_and_remove_keep_loop_alive() {
        for _ in 0..200 {
            let (registry, _) = registry_with_store();
            registry.register_active("tx-a").await;

            let leaving = registry.clone();
            let joining = registry.clone();
            let remove = tokio::spawn(async move { leaving.remove_active("tx-a").await });
            let add = tokio::spawn(async move { joining.register_active("tx-b").await });
            remove.await.unwrap();
            add.await.unwrap();

            assert!(registry.is_active("tx-b").await);
            assert!(registry.is_running().await, "tx-b is watched with no loop running");
            registry.stop().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn loop_keeps_running_while_unwatched_rows_are_pending() {
        let (registry, store) = registry_with_store();
        assert!(!registry.resume().await);

        let restored = Transaction::new_pending(None, 40.0, "mpesa", Utc::now());
        let id = restored.id.clone();
        store.insert(restored).await.unwrap();

        assert!(registry.resume().await);
        assert_eq!(registry.active_count().await, 0);

        tokio::time::sleep(Duration::from_secs(31)).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(registry.is_running().await);

        store
            .terminalize(
                &id,
                TerminalUpdate::resolved(TransactionStatus::Success, None, Utc::now()),
            )
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(!registry.is_running().await);
    }

    #[tokio::test]
    async fn removing_last_watched_id_keeps_loop_for_pending_rows() {
        let (registry, store) = registry_with_store();
        let other = Transaction::new_pending(None, 5.0, "emola", Utc::now());
        store.insert(other).await.unwrap();

        registry.register_active("tx-1").await;
        registry.remove_active("tx-1").await;

        assert_eq!(registry.active_count().await, 0);
        assert!(registry.is_running().await);
        registry.stop().await;
        assert!(!registry.is_running().await);
    }

    #[tokio::test]
    async fn isolated_instances_do_not_share_state() {
        let (first, _) = registry_with_store();
        let (second, _) = registry_with_store();

        first.register_active("tx-1").await;

        assert!(first.is_active("tx-1").await);
        assert!(!second.is_active("tx-1").await);
        assert!(!second.is_running().await);
        first.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn loop_cancels_stale_transaction_and_stops() {
        let (registry, store) = registry_with_store();
        let stale = Transaction::new_pending(
            Some("u1".into()),
            75.0,
            "mpesa",
            Utc::now() - chrono::Duration::minutes(6),
        );
        let id = stale.id.clone();
        store.insert(stale).await.unwrap();

        registry.register_active(&id).await;
        tokio::time::sleep(Duration::from_secs(31)).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        let swept = store.find(&id).await.unwrap().unwrap();
        assert_eq!(swept.status, TransactionStatus::Cancelled);
        assert!(!registry.is_active(&id).await);
        assert!(!registry.is_running().await);
    }

    #[tokio::test]
    async fn explicit_cancel_removes_from_active_set() {
        let (registry, store) = registry_with_store();
        let tx = Transaction::new_pending(None, 10.0, "emola", Utc::now());
        let id = tx.id.clone();
        store.insert(tx).await.unwrap();
        registry.register_active(&id).await;

        let cancelled = registry
            .cancel_explicit(&id, "Provedor não respondeu.", CancelCause::ConnectionError)
            .await
            .unwrap();

        assert_eq!(cancelled.status, TransactionStatus::Cancelled);
        assert!(cancelled.failure_id.unwrap().starts_with("CON-"));
        assert!(!registry.is_running().await);

        let again = registry
            .cancel_explicit(&id, "again", CancelCause::Timeout)
            .await
            .unwrap_err();
        assert!(again.is_not_pending());
    }
}
