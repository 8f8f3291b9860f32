use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Success,
    Cancelled,
    Failed,
    Timeout,
}

impl TransactionStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Success => "success",
            TransactionStatus::Cancelled => "cancelled",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Timeout => "timeout",
        }
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub public_id: String,
    pub user_id: Option<String>,
    pub amount: f64,
    pub method: String,
    pub status: TransactionStatus,
    pub created_at: DateTime<Utc>,
    pub failure_reason: Option<String>,
    pub failure_id: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl Transaction {
    pub fn new_pending(
        user_id: Option<String>,
        amount: f64,
        method: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        let id = Uuid::new_v4().to_string();
        let public_id = format!("PAY-{}", &id.replace('-', "")[..10].to_uppercase());

        Self {
            id,
            public_id,
            user_id,
            amount,
            method: method.into(),
            status: TransactionStatus::Pending,
            created_at,
            failure_reason: None,
            failure_id: None,
            processed_at: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == TransactionStatus::Pending
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelCause {
    // pending past the staleness threshold
    Stale,
    Timeout,
    ConnectionError,
    UserCancelled,
}

impl CancelCause {
    pub fn failure_prefix(self) -> &'static str {
        match self {
            CancelCause::Stale => "STL",
            CancelCause::Timeout => "TMO",
            CancelCause::ConnectionError => "CON",
            CancelCause::UserCancelled => "USR",
        }
    }

    pub fn generate_failure_id(self, now: DateTime<Utc>) -> String {
        let suffix = Uuid::new_v4().simple().to_string();
        format!(
            "{}-{}-{}",
            self.failure_prefix(),
            now.format("%Y%m%d%H%M%S"),
            &suffix[..6].to_uppercase()
        )
    }
}

#[derive(Debug, Clone)]
pub struct TerminalUpdate {
    pub status: TransactionStatus,
    pub failure_reason: Option<String>,
    pub failure_id: Option<String>,
    pub processed_at: DateTime<Utc>,
}

impl TerminalUpdate {
    pub fn cancelled(cause: CancelCause, reason: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            status: TransactionStatus::Cancelled,
            failure_reason: Some(reason.into()),
            failure_id: Some(cause.generate_failure_id(now)),
            processed_at: now,
        }
    }

    // provider-reported outcomes; timeouts go through `cancelled` instead
    pub fn resolved(status: TransactionStatus, reason: Option<String>, now: DateTime<Utc>) -> Self {
        let failure_id = match status {
            TransactionStatus::Failed => Some(format!("PRV-{}", now.format("%Y%m%d%H%M%S"))),
            _ => None,
        };

        Self {
            status,
            failure_reason: reason,
            failure_id,
            processed_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_pending_is_non_terminal() {
        assert!(!TransactionStatus::Pending.is_terminal());
        for status in [
            TransactionStatus::Success,
            TransactionStatus::Cancelled,
            TransactionStatus::Failed,
            TransactionStatus::Timeout,
        ] {
            assert!(status.is_terminal(), "{status} should be terminal");
        }
    }

    #[test]
    fn failure_id_prefix_identifies_cause() {
        let now = Utc::now();
        assert!(CancelCause::Stale.generate_failure_id(now).starts_with("STL-"));
        assert!(CancelCause::Timeout.generate_failure_id(now).starts_with("TMO-"));
        assert!(CancelCause::ConnectionError
            .generate_failure_id(now)
            .starts_with("CON-"));
    }

    #[test]
    fn provider_failure_gets_failure_id() {
        let now = Utc::now();
        let failed = TerminalUpdate::resolved(TransactionStatus::Failed, None, now);
        assert!(failed.failure_id.unwrap().starts_with("PRV-"));
        let settled = TerminalUpdate::resolved(TransactionStatus::Success, None, now);
        assert!(settled.failure_id.is_none());
    }

    #[test]
    fn new_transaction_is_pending_with_public_id() {
        let tx = Transaction::new_pending(Some("u1".into()), 150.0, "mpesa", Utc::now());
        assert!(tx.is_pending());
        assert!(tx.public_id.starts_with("PAY-"));
        assert_eq!(tx.public_id.len(), 14);
    }
}
