use std::{fmt::Display, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db_types::{ConversionError, Money, PaymentStatus};

/// The one outbound call the engine makes against the payment gateway: a status lookup by the gateway's order
/// reference. Used by the backfill sweep and the manual re-check; webhooks never need it.
///
/// Implementations must bound the call with a timeout. The engine treats lookup failures as transient and retries
/// on the next sweep; it never holds a transaction lock across this call.
#[allow(async_fn_in_trait)]
pub trait GatewayClient: Clone {
    async fn lookup_status(&self, gateway_ref: &str) -> Result<GatewayStatusReport, GatewayError>;
}

//--------------------------------------    GatewayStatus     --------------------------------------------------------
/// The gateway's own status vocabulary. Mapped to the engine's status set here and nowhere else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayStatus {
    Capture,
    Settlement,
    Pending,
    Deny,
    Cancel,
    Expire,
    Refund,
    PartialRefund,
}

impl GatewayStatus {
    pub fn to_payment_status(self) -> PaymentStatus {
        match self {
            GatewayStatus::Capture | GatewayStatus::Settlement => PaymentStatus::Settled,
            GatewayStatus::Pending => PaymentStatus::Pending,
            GatewayStatus::Deny | GatewayStatus::Cancel => PaymentStatus::Failed,
            GatewayStatus::Expire => PaymentStatus::Expired,
            GatewayStatus::Refund | GatewayStatus::PartialRefund => PaymentStatus::Refunded,
        }
    }
}

impl Display for GatewayStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            GatewayStatus::Capture => "capture",
            GatewayStatus::Settlement => "settlement",
            GatewayStatus::Pending => "pending",
            GatewayStatus::Deny => "deny",
            GatewayStatus::Cancel => "cancel",
            GatewayStatus::Expire => "expire",
            GatewayStatus::Refund => "refund",
            GatewayStatus::PartialRefund => "partial_refund",
        };
        write!(f, "{s}")
    }
}

impl FromStr for GatewayStatus {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "capture" => Ok(Self::Capture),
            "settlement" => Ok(Self::Settlement),
            "pending" => Ok(Self::Pending),
            "deny" => Ok(Self::Deny),
            "cancel" => Ok(Self::Cancel),
            "expire" => Ok(Self::Expire),
            "refund" => Ok(Self::Refund),
            "partial_refund" => Ok(Self::PartialRefund),
            s => Err(ConversionError(format!("Unknown gateway status: {s}"))),
        }
    }
}

//--------------------------------------  GatewayStatusReport --------------------------------------------------------
/// What a status lookup returns. `transaction_id` is the gateway's own identifier for the payment attempt and feeds
/// the idempotency key, so a poll and a webhook reporting the same gateway event deduplicate against each other.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayStatusReport {
    pub gateway_ref: String,
    pub transaction_id: String,
    pub status: GatewayStatus,
    pub gross_amount: Option<Money>,
    pub transaction_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// Network fault or timeout. Retried on the next sweep; never terminal.
    #[error("Gateway unreachable: {0}")]
    Transient(String),
    #[error("Gateway does not know the reference {0}")]
    UnknownReference(String),
    #[error("Gateway response could not be understood: {0}")]
    Protocol(String),
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn vocabulary_mapping() {
        assert_eq!(GatewayStatus::Capture.to_payment_status(), PaymentStatus::Settled);
        assert_eq!(GatewayStatus::Settlement.to_payment_status(), PaymentStatus::Settled);
        assert_eq!(GatewayStatus::Pending.to_payment_status(), PaymentStatus::Pending);
        assert_eq!(GatewayStatus::Deny.to_payment_status(), PaymentStatus::Failed);
        assert_eq!(GatewayStatus::Cancel.to_payment_status(), PaymentStatus::Failed);
        assert_eq!(GatewayStatus::Expire.to_payment_status(), PaymentStatus::Expired);
        assert_eq!(GatewayStatus::Refund.to_payment_status(), PaymentStatus::Refunded);
        assert_eq!(GatewayStatus::PartialRefund.to_payment_status(), PaymentStatus::Refunded);
    }

    #[test]
    fn vocabulary_round_trip() {
        for s in ["capture", "settlement", "pending", "deny", "cancel", "expire", "refund", "partial_refund"] {
            let status: GatewayStatus = s.parse().unwrap();
            assert_eq!(status.to_string(), s);
        }
        assert!("unknown".parse::<GatewayStatus>().is_err());
    }
}
