use std::fmt::Display;

use chrono::{DateTime, Utc};
use payrec_engine::{
    db_types::{Invoice, PaymentStatus, Transaction, TransactionItem, TransitionRecord},
    GatewayStatus,
    Verdict,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonResponse {
    pub success: bool,
    pub message: String,
}

impl JsonResponse {
    pub fn success<S: Display>(message: S) -> Self {
        Self { success: true, message: message.to_string() }
    }

    pub fn failure<S: Display>(message: S) -> Self {
        Self { success: false, message: message.to_string() }
    }
}

/// The gateway's payment notification payload. The signature middleware has already verified the timestamped
/// HMAC over the raw body by the time this is deserialized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentNotification {
    /// Our transaction code; the gateway echoes back what checkout gave it.
    pub order_code: String,
    /// The gateway's identifier for this payment event. Feeds the idempotency key.
    pub event_id: String,
    pub transaction_status: GatewayStatus,
    #[serde(default)]
    pub gross_amount: Option<String>,
    #[serde(default)]
    pub transaction_time: Option<DateTime<Utc>>,
}

/// The alternate-channel notification variant (bank transfer, e-wallet). Same reconciliation semantics, different
/// field vocabulary on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelNotification {
    pub reference: String,
    pub channel: String,
    pub notification_id: String,
    pub state: GatewayStatus,
    #[serde(default)]
    pub paid_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForceStatusRequest {
    pub code: String,
    pub status: PaymentStatus,
    /// Mandatory audit trail entry; persisted verbatim on the transition record.
    pub reason: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StaleQuery {
    pub minutes: Option<i64>,
}

/// The committed state a read returns: current status plus items and the full transition log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionView {
    pub transaction: Transaction,
    pub items: Vec<TransactionItem>,
    pub transitions: Vec<TransitionRecord>,
}

/// A structured receipt for a settled transaction. The notification service renders it; we only supply the record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceView {
    pub invoice: Invoice,
    pub items: Vec<TransactionItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerdictResponse {
    pub code: String,
    pub decision: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous: Option<PaymentStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new: Option<PaymentStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl VerdictResponse {
    pub fn new(code: impl Display, verdict: &Verdict) -> Self {
        match verdict {
            Verdict::Accepted { previous, new } => Self {
                code: code.to_string(),
                decision: "accepted".to_string(),
                previous: Some(*previous),
                new: Some(*new),
                reason: None,
            },
            Verdict::Superseded => Self {
                code: code.to_string(),
                decision: "superseded".to_string(),
                previous: None,
                new: None,
                reason: None,
            },
            Verdict::Rejected(reason) => Self {
                code: code.to_string(),
                decision: "rejected".to_string(),
                previous: None,
                new: None,
                reason: Some(reason.to_string()),
            },
        }
    }
}
