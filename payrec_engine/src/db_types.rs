use std::{fmt::Display, str::FromStr};

use chrono::{DateTime, Utc};
use log::error;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};
use thiserror::Error;

pub use payrec_common::Money;

#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct ConversionError(pub String);

//--------------------------------------        TxCode        --------------------------------------------------------
/// The external-facing, stable transaction code. Assigned at checkout and used by the storefront, the gateway and
/// operators alike to refer to a purchase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
#[sqlx(transparent)]
pub struct TxCode(pub String);

impl FromStr for TxCode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

impl From<String> for TxCode {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl Display for TxCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TxCode {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

//--------------------------------------    PaymentStatus     --------------------------------------------------------
/// The engine's closed set of payment states. Conflicting reports from concurrent sources are resolved by rank, not
/// by arrival order: an automatic source can never move a transaction to a lower-ranked status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
pub enum PaymentStatus {
    /// Checkout has issued the transaction, no confirmation from the gateway yet.
    Initiated,
    /// The gateway has acknowledged the transaction but payment has not cleared.
    Pending,
    /// Payment has cleared in full. Terminal for automatic sources, except for a subsequent refund.
    Settled,
    /// The gateway denied or the buyer cancelled the payment. Terminal.
    Failed,
    /// The payment window lapsed before the buyer paid. Terminal.
    Expired,
    /// A settled payment was returned to the buyer. Terminal, only reachable from `Settled`.
    Refunded,
}

impl PaymentStatus {
    /// The rank used to resolve conflicting concurrent reports. A status observed by an automatic source is only
    /// accepted if its rank is strictly greater than the current one.
    pub fn rank(&self) -> u8 {
        match self {
            PaymentStatus::Initiated => 0,
            PaymentStatus::Pending => 1,
            PaymentStatus::Settled | PaymentStatus::Failed | PaymentStatus::Expired => 2,
            PaymentStatus::Refunded => 3,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.rank() >= 2
    }
}

impl Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PaymentStatus::Initiated => write!(f, "Initiated"),
            PaymentStatus::Pending => write!(f, "Pending"),
            PaymentStatus::Settled => write!(f, "Settled"),
            PaymentStatus::Failed => write!(f, "Failed"),
            PaymentStatus::Expired => write!(f, "Expired"),
            PaymentStatus::Refunded => write!(f, "Refunded"),
        }
    }
}

impl FromStr for PaymentStatus {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Initiated" => Ok(Self::Initiated),
            "Pending" => Ok(Self::Pending),
            "Settled" => Ok(Self::Settled),
            "Failed" => Ok(Self::Failed),
            "Expired" => Ok(Self::Expired),
            "Refunded" => Ok(Self::Refunded),
            s => Err(ConversionError(format!("Invalid payment status: {s}"))),
        }
    }
}

impl From<String> for PaymentStatus {
    fn from(value: String) -> Self {
        value.parse().unwrap_or_else(|_| {
            error!("Invalid payment status: {value}. But this conversion cannot fail. Defaulting to Initiated");
            PaymentStatus::Initiated
        })
    }
}

//--------------------------------------     EventSource      --------------------------------------------------------
/// Where a status observation entered the engine. All three converge on the same transition authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
pub enum EventSource {
    Webhook,
    Poll,
    Manual,
}

impl Display for EventSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventSource::Webhook => write!(f, "Webhook"),
            EventSource::Poll => write!(f, "Poll"),
            EventSource::Manual => write!(f, "Manual"),
        }
    }
}

impl FromStr for EventSource {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Webhook" => Ok(Self::Webhook),
            "Poll" => Ok(Self::Poll),
            "Manual" => Ok(Self::Manual),
            s => Err(ConversionError(format!("Invalid event source: {s}"))),
        }
    }
}

//--------------------------------------       Decision       --------------------------------------------------------
/// The authority's decision on an observation, as stored on a transition record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
pub enum Decision {
    Accepted,
    Superseded,
    Rejected,
}

impl Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Decision::Accepted => write!(f, "Accepted"),
            Decision::Superseded => write!(f, "Superseded"),
            Decision::Rejected => write!(f, "Rejected"),
        }
    }
}

impl FromStr for Decision {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Accepted" => Ok(Self::Accepted),
            "Superseded" => Ok(Self::Superseded),
            "Rejected" => Ok(Self::Rejected),
            s => Err(ConversionError(format!("Invalid decision: {s}"))),
        }
    }
}

//--------------------------------------     RejectReason     --------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
pub enum RejectReason {
    /// The transaction is already in a terminal state.
    AlreadyTerminal,
    /// A lower-ranked observation arrived after a higher-ranked status was recorded.
    Stale,
    /// The observed status cannot legally follow the current one (e.g. a refund on an unsettled transaction).
    IllegalTransition,
    /// The transaction code is unknown.
    NotFound,
}

impl Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::AlreadyTerminal => write!(f, "AlreadyTerminal"),
            RejectReason::Stale => write!(f, "Stale"),
            RejectReason::IllegalTransition => write!(f, "IllegalTransition"),
            RejectReason::NotFound => write!(f, "NotFound"),
        }
    }
}

impl FromStr for RejectReason {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AlreadyTerminal" => Ok(Self::AlreadyTerminal),
            "Stale" => Ok(Self::Stale),
            "IllegalTransition" => Ok(Self::IllegalTransition),
            "NotFound" => Ok(Self::NotFound),
            s => Err(ConversionError(format!("Invalid reject reason: {s}"))),
        }
    }
}

//--------------------------------------      ItemStatus      --------------------------------------------------------
/// Fulfillment sub-status of a single purchased item, tracked independently of the parent's payment status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
pub enum ItemStatus {
    PendingDelivery,
    Delivered,
    Refunded,
}

impl Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ItemStatus::PendingDelivery => write!(f, "PendingDelivery"),
            ItemStatus::Delivered => write!(f, "Delivered"),
            ItemStatus::Refunded => write!(f, "Refunded"),
        }
    }
}

impl FromStr for ItemStatus {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PendingDelivery" => Ok(Self::PendingDelivery),
            "Delivered" => Ok(Self::Delivered),
            "Refunded" => Ok(Self::Refunded),
            s => Err(ConversionError(format!("Invalid item status: {s}"))),
        }
    }
}

//--------------------------------------     Transaction      --------------------------------------------------------
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Transaction {
    pub id: i64,
    pub code: TxCode,
    /// The order reference assigned by the gateway at checkout. Used for status lookups.
    pub gateway_ref: String,
    pub buyer_id: String,
    pub amount: Money,
    pub currency: String,
    pub status: PaymentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

//--------------------------------------    NewTransaction    --------------------------------------------------------
/// What the checkout collaborator supplies when a purchase is created. Insertion is idempotent on the code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTransaction {
    pub code: TxCode,
    pub gateway_ref: String,
    pub buyer_id: String,
    pub amount: Money,
    pub currency: String,
    #[serde(default)]
    pub items: Vec<NewTransactionItem>,
}

impl NewTransaction {
    pub fn new(code: TxCode, gateway_ref: String, buyer_id: String, amount: Money) -> Self {
        Self { code, gateway_ref, buyer_id, amount, currency: "IDR".to_string(), items: Vec::new() }
    }

    pub fn with_item(mut self, item: NewTransactionItem) -> Self {
        self.items.push(item);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTransactionItem {
    pub product_ref: String,
    pub description: String,
    pub quantity: i64,
    pub unit_price: Money,
}

//--------------------------------------   TransactionItem    --------------------------------------------------------
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct TransactionItem {
    pub id: i64,
    pub tx_code: TxCode,
    pub product_ref: String,
    pub description: String,
    pub quantity: i64,
    pub unit_price: Money,
    pub status: ItemStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

//--------------------------------------   IdempotencyKey     --------------------------------------------------------
/// Derived per inbound event as (transaction code, observed status, the gateway's own event identifier). No two
/// transition records may carry the same key with an `Accepted` decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyKey {
    pub code: TxCode,
    pub observed: PaymentStatus,
    pub gateway_event_id: String,
}

impl IdempotencyKey {
    pub fn new(code: &TxCode, observed: PaymentStatus, gateway_event_id: &str) -> Self {
        Self { code: code.clone(), observed, gateway_event_id: gateway_event_id.to_string() }
    }

    /// The stable fingerprint stored on transition records and checked by the idempotency guard.
    pub fn fingerprint(&self) -> String {
        format!("{}:{}:{}", self.code, self.observed, self.gateway_event_id)
    }
}

//--------------------------------------  TransitionRecord    --------------------------------------------------------
/// One immutable, append-only audit entry per observation the authority decided on. Replaying the `Accepted` records
/// of a transaction in `seq` order reproduces its current status.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub id: i64,
    pub tx_code: TxCode,
    /// Per-transaction monotonic sequence number. Sources race, so wall-clock order is meaningless.
    pub seq: i64,
    pub source: EventSource,
    pub observed: PaymentStatus,
    /// The status in force after the decision. Equal to `observed` for accepted records, and to the status that
    /// remained in force for superseded/rejected ones.
    pub resulting: PaymentStatus,
    pub decision: Decision,
    pub reject_reason: Option<RejectReason>,
    pub fingerprint: String,
    pub gateway_event_id: String,
    pub is_override: bool,
    pub override_reason: Option<String>,
    /// When the gateway says the event occurred. Audit only; never used for ordering.
    pub observed_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// The authority-side view of a record before `seq` and timestamps are assigned by the store.
#[derive(Debug, Clone)]
pub struct NewTransitionRecord {
    pub tx_code: TxCode,
    pub source: EventSource,
    pub observed: PaymentStatus,
    pub resulting: PaymentStatus,
    pub decision: Decision,
    pub reject_reason: Option<RejectReason>,
    pub fingerprint: String,
    pub gateway_event_id: String,
    pub is_override: bool,
    pub override_reason: Option<String>,
    pub observed_at: DateTime<Utc>,
}

//--------------------------------------       Invoice        --------------------------------------------------------
/// The structured receipt materialised when a transaction settles. Rendering is a collaborator concern; the engine
/// only supplies the record.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Invoice {
    pub id: i64,
    pub invoice_no: String,
    pub tx_code: TxCode,
    pub buyer_id: String,
    pub amount: Money,
    pub currency: String,
    pub issued_at: DateTime<Utc>,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn rank_ordering() {
        assert!(PaymentStatus::Initiated.rank() < PaymentStatus::Pending.rank());
        assert!(PaymentStatus::Pending.rank() < PaymentStatus::Settled.rank());
        assert_eq!(PaymentStatus::Settled.rank(), PaymentStatus::Failed.rank());
        assert_eq!(PaymentStatus::Failed.rank(), PaymentStatus::Expired.rank());
        assert!(PaymentStatus::Settled.rank() < PaymentStatus::Refunded.rank());
    }

    #[test]
    fn terminal_statuses() {
        assert!(!PaymentStatus::Initiated.is_terminal());
        assert!(!PaymentStatus::Pending.is_terminal());
        assert!(PaymentStatus::Settled.is_terminal());
        assert!(PaymentStatus::Failed.is_terminal());
        assert!(PaymentStatus::Expired.is_terminal());
        assert!(PaymentStatus::Refunded.is_terminal());
    }

    #[test]
    fn status_round_trip() {
        for status in [
            PaymentStatus::Initiated,
            PaymentStatus::Pending,
            PaymentStatus::Settled,
            PaymentStatus::Failed,
            PaymentStatus::Expired,
            PaymentStatus::Refunded,
        ] {
            assert_eq!(status.to_string().parse::<PaymentStatus>().unwrap(), status);
        }
    }

    #[test]
    fn fingerprint_is_stable() {
        let code = TxCode::from("TX-1001".to_string());
        let key = IdempotencyKey::new(&code, PaymentStatus::Settled, "evt-77");
        assert_eq!(key.fingerprint(), "TX-1001:Settled:evt-77");
        let again = IdempotencyKey::new(&code, PaymentStatus::Settled, "evt-77");
        assert_eq!(key, again);
    }
}
