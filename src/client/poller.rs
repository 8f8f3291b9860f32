// Running out of attempts never yields a negative outcome: the session moves
// to AwaitingConfirmation and the server keeps the final word.

use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::client::status_api::{PollerError, StatusApi};
use crate::config::PollerConfig;
use crate::models::{InitiatePaymentRequest, PaymentStatusResponse};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PollState {
    Idle,
    Initiating,
    Polling,
    AwaitingConfirmation,
    Success,
    Failed,
    Cancelled,
    Error,
}

impl PollState {
    pub fn can_retry(&self) -> bool {
        matches!(
            self,
            PollState::AwaitingConfirmation
                | PollState::Failed
                | PollState::Cancelled
                | PollState::Error
        )
    }

    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            PollState::Success | PollState::Failed | PollState::Cancelled | PollState::Error
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Visible,
    Hidden,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollerSnapshot {
    pub state: PollState,
    pub payment_id: Option<String>,
    pub message: Option<String>,
    pub attempts: u32,
    pub can_retry: bool,
}

const MSG_WAITING: &str = "Confirme o pagamento no seu telemóvel.";
const MSG_UNSTABLE: &str = "Ligação instável, a tentar novamente...";
const MSG_OFFLINE: &str = "Não foi possível contactar o servidor. Verifique a sua ligação.";
const MSG_AWAITING: &str =
    "Ainda não recebemos a confirmação. Se já aprovou o pagamento, verifique novamente dentro de instantes.";

// unknown statuses count as still in flight
fn settled_state(status: &str) -> Option<PollState> {
    match status.to_ascii_lowercase().as_str() {
        "success" | "completed" => Some(PollState::Success),
        "failed" | "rejected" => Some(PollState::Failed),
        "cancelled" | "timeout" => Some(PollState::Cancelled),
        "error" => Some(PollState::Error),
        _ => None,
    }
}

fn default_message(state: PollState) -> Option<&'static str> {
    match state {
        PollState::Success => Some("Pagamento confirmado."),
        PollState::Failed => Some("O pagamento não foi concluído."),
        PollState::Cancelled => Some("Pagamento cancelado."),
        PollState::Error => Some("Ocorreu um erro ao processar o pagamento."),
        _ => None,
    }
}

#[derive(Debug, Clone)]
pub struct PollMachine {
    config: PollerConfig,
    state: PollState,
    payment_id: Option<String>,
    message: Option<String>,
    attempts: u32,
    network_errors: u32,
}

impl PollMachine {
    pub fn new(config: PollerConfig) -> Self {
        Self {
            config,
            state: PollState::Idle,
            payment_id: None,
            message: None,
            attempts: 0,
            network_errors: 0,
        }
    }

    pub fn state(&self) -> PollState {
        self.state
    }

    pub fn payment_id(&self) -> Option<&str> {
        self.payment_id.as_deref()
    }

    pub fn snapshot(&self) -> PollerSnapshot {
        PollerSnapshot {
            state: self.state,
            payment_id: self.payment_id.clone(),
            message: self.message.clone(),
            attempts: self.attempts,
            can_retry: self.state.can_retry(),
        }
    }

    pub fn wants_polling(&self) -> bool {
        self.state == PollState::Polling && self.attempts < self.config.max_attempts
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.config.clone());
    }

    pub fn begin_initiate(&mut self) {
        self.reset();
        self.state = PollState::Initiating;
    }

    pub fn initiated(&mut self, result: Result<String, PollerError>) {
        match result {
            Ok(payment_id) => {
                self.payment_id = Some(payment_id);
                self.state = PollState::Polling;
                self.message = Some(MSG_WAITING.to_string());
            }
            Err(e) => {
                self.state = PollState::Error;
                self.message = Some(format!("Não foi possível iniciar o pagamento ({}).", e));
            }
        }
    }

    pub fn record_poll(&mut self, result: Result<PaymentStatusResponse, PollerError>) -> bool {
        if self.state != PollState::Polling {
            return false;
        }
        self.attempts += 1;

        match result {
            Ok(response) => {
                self.network_errors = 0;
                self.apply_status(&response);
            }
            Err(e) if e.is_transient() => {
                self.network_errors += 1;
                if self.network_errors >= self.config.max_network_errors {
                    self.state = PollState::Error;
                    self.message = Some(MSG_OFFLINE.to_string());
                } else {
                    self.message = Some(MSG_UNSTABLE.to_string());
                }
            }
            Err(e) => {
                self.state = PollState::Error;
                self.message = Some(e.to_string());
            }
        }

        if self.state == PollState::Polling && self.attempts >= self.config.max_attempts {
            self.state = PollState::AwaitingConfirmation;
            self.message = Some(MSG_AWAITING.to_string());
        }

        self.state == PollState::Polling
    }

    // Out-of-band check: consumes no attempt, and failures change nothing.
    pub fn record_check(&mut self, result: Result<PaymentStatusResponse, PollerError>) {
        if !matches!(
            self.state,
            PollState::Polling | PollState::AwaitingConfirmation
        ) {
            return;
        }
        match result {
            Ok(response) => {
                self.network_errors = 0;
                let before = self.state;
                self.apply_status(&response);
                if self.state == before && before == PollState::AwaitingConfirmation {
                    self.message = Some(MSG_AWAITING.to_string());
                }
            }
            Err(e) => {
                tracing::debug!(error = %e, "Status check failed");
            }
        }
    }

    pub fn cancelled(&mut self, message: String) {
        self.state = PollState::Cancelled;
        self.message = Some(message);
    }

    fn apply_status(&mut self, response: &PaymentStatusResponse) {
        match settled_state(&response.status) {
            Some(state) => {
                self.state = state;
                self.message = response
                    .message
                    .clone()
                    .or_else(|| default_message(state).map(str::to_string));
            }
            None => {
                if let Some(message) = &response.message {
                    self.message = Some(message.clone());
                }
            }
        }
    }
}

struct Timer {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

struct Inner {
    api: Arc<dyn StatusApi>,
    config: PollerConfig,
    machine: Mutex<PollMachine>,
    timer: Mutex<Option<Timer>>,
    snapshots: watch::Sender<PollerSnapshot>,
    last_request: Mutex<Option<InitiatePaymentRequest>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Inner {
    fn update<R>(&self, f: impl FnOnce(&mut PollMachine) -> R) -> R {
        let (result, snapshot) = {
            let mut machine = lock(&self.machine);
            let result = f(&mut machine);
            (result, machine.snapshot())
        };
        self.snapshots.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
        result
    }

    fn stop_timer(&self) {
        if let Some(timer) = lock(&self.timer).take() {
            let _ = timer.stop.send(true);
        }
    }

    fn start_timer(self: &Arc<Self>) {
        let mut slot = lock(&self.timer);
        if let Some(old) = slot.take() {
            let _ = old.stop.send(true);
        }
        let (stop, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(Self::run_timer(
            Arc::downgrade(self),
            self.config.interval,
            stop_rx,
        ));
        *slot = Some(Timer { stop, handle });
    }

    fn timer_running(&self) -> bool {
        lock(&self.timer)
            .as_ref()
            .is_some_and(|t| !t.handle.is_finished())
    }

    async fn run_timer(inner: Weak<Self>, period: Duration, mut stop: watch::Receiver<bool>) {
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
            let Some(inner) = inner.upgrade() else {
                break;
            };
            if !inner.poll_once(&stop).await {
                break;
            }
        }
    }

    async fn poll_once(&self, stop: &watch::Receiver<bool>) -> bool {
        let payment_id = {
            let machine = lock(&self.machine);
            if !machine.wants_polling() {
                return false;
            }
            match machine.payment_id() {
                Some(id) => id.to_string(),
                None => return false,
            }
        };

        let result = self.api.status(&payment_id).await;
        // paused or closed while the request was in flight
        if *stop.borrow() {
            return false;
        }
        let keep_polling = self.update(|m| m.record_poll(result));
        if !keep_polling {
            let snapshot = self.snapshots.borrow().clone();
            tracing::info!(
                payment_id = %payment_id,
                state = ?snapshot.state,
                attempts = snapshot.attempts,
                "Status polling stopped"
            );
        }
        keep_polling
    }
}

pub struct ClientStatusPoller {
    inner: Arc<Inner>,
}

impl ClientStatusPoller {
    pub fn new(api: Arc<dyn StatusApi>, config: PollerConfig) -> Self {
        let machine = PollMachine::new(config.clone());
        let (snapshots, _) = watch::channel(machine.snapshot());
        Self {
            inner: Arc::new(Inner {
                api,
                config,
                machine: Mutex::new(machine),
                timer: Mutex::new(None),
                snapshots,
                last_request: Mutex::new(None),
            }),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<PollerSnapshot> {
        self.inner.snapshots.subscribe()
    }

    pub fn snapshot(&self) -> PollerSnapshot {
        lock(&self.inner.machine).snapshot()
    }

    pub fn state(&self) -> PollState {
        lock(&self.inner.machine).state()
    }

    pub fn is_timer_running(&self) -> bool {
        self.inner.timer_running()
    }

    pub async fn initiate(&self, request: InitiatePaymentRequest) -> PollerSnapshot {
        let state = self.state();
        if matches!(state, PollState::Initiating | PollState::Polling) {
            return self.snapshot();
        }

        self.inner.stop_timer();
        *lock(&self.inner.last_request) = Some(request.clone());
        self.inner.update(PollMachine::begin_initiate);

        let result = self
            .inner
            .api
            .initiate(&request)
            .await
            .map(|response| response.payment_id);

        if let Err(e) = &result {
            tracing::warn!(error = %e, "Payment initiation failed");
        }
        let polling = self.inner.update(|m| {
            m.initiated(result);
            m.wants_polling()
        });
        if polling {
            self.inner.start_timer();
        }
        self.snapshot()
    }

    /// A refused cancel means the payment already settled; a status check
    /// picks up the real outcome.
    pub async fn cancel(&self) -> Result<PollerSnapshot, PollerError> {
        let Some(payment_id) = lock(&self.inner.machine).payment_id().map(str::to_string) else {
            return Ok(self.snapshot());
        };

        let response = self.inner.api.cancel(&payment_id).await?;
        if response.success {
            self.inner.stop_timer();
            self.inner.update(|m| m.cancelled(response.message));
        } else {
            self.check_now().await;
            if self.state().is_settled() {
                self.inner.stop_timer();
            }
        }
        Ok(self.snapshot())
    }

    pub fn set_visibility(&self, visibility: Visibility) {
        match visibility {
            Visibility::Hidden => {
                if self.inner.timer_running() {
                    tracing::debug!("Page hidden, status polling paused");
                }
                self.inner.stop_timer();
            }
            Visibility::Visible => {
                let resume = lock(&self.inner.machine).wants_polling();
                if resume && !self.inner.timer_running() {
                    tracing::debug!("Page visible, status polling resumed");
                    self.inner.start_timer();
                }
            }
        }
    }

    pub async fn check_now(&self) -> PollerSnapshot {
        let payment_id = lock(&self.inner.machine).payment_id().map(str::to_string);
        if let Some(payment_id) = payment_id {
            let result = self.inner.api.status(&payment_id).await;
            let settled = self.inner.update(|m| {
                m.record_check(result);
                m.state().is_settled()
            });
            if settled {
                self.inner.stop_timer();
            }
        }
        self.snapshot()
    }

    pub async fn retry(&self) -> PollerSnapshot {
        if !self.state().can_retry() {
            return self.snapshot();
        }
        let request = lock(&self.inner.last_request).clone();
        match request {
            Some(request) => self.initiate(request).await,
            None => self.snapshot(),
        }
    }

    pub fn close(&self) {
        self.inner.stop_timer();
        self.inner.update(PollMachine::reset);
    }
}

impl Drop for ClientStatusPoller {
    fn drop(&mut self) {
        if let Some(timer) = lock(&self.inner.timer).take() {
            timer.handle.abort();
        }
    }
}
