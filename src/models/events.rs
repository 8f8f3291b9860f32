use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{CancelCause, TransactionStatus};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentCancelled {
    #[serde(rename = "vendaId")]
    pub transaction_id: String,
    #[serde(rename = "publicId")]
    pub public_id: String,
    #[serde(rename = "motivo")]
    pub reason: String,
    #[serde(rename = "tipoErro")]
    pub error_kind: CancelCause,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentStatusUpdate {
    #[serde(rename = "vendaId")]
    pub transaction_id: String,
    #[serde(rename = "publicId")]
    pub public_id: String,
    pub status: TransactionStatus,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum RealtimeEvent {
    #[serde(rename = "payment_cancelled")]
    Cancelled(PaymentCancelled),
    #[serde(rename = "payment_status_update")]
    StatusUpdate(PaymentStatusUpdate),
}

impl RealtimeEvent {
    pub fn room(&self) -> &str {
        match self {
            RealtimeEvent::Cancelled(e) => &e.transaction_id,
            RealtimeEvent::StatusUpdate(e) => &e.transaction_id,
        }
    }
}
