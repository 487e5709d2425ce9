use chrono::Duration;
use thiserror::Error;

use crate::db_types::{
    IdempotencyKey,
    Invoice,
    NewTransaction,
    NewTransitionRecord,
    PaymentStatus,
    Transaction,
    TransactionItem,
    TransitionRecord,
    TxCode,
};

/// The contract a backend must fulfil to act as the Transaction Store.
///
/// The store is the single source of truth for transaction status, but it never decides transitions by itself: the
/// [`TransitionAuthority`](crate::TransitionAuthority) is the only caller of the mutating methods, and serialises
/// them per transaction code. The store's part of the bargain is that [`Self::commit_transition`] is conditional on
/// the expected current status, so even a misbehaving caller cannot produce a lost update.
#[allow(async_fn_in_trait)]
pub trait ReconDatabase: Clone {
    /// The URL of the database
    fn url(&self) -> &str;

    /// Stores a new `Initiated` transaction and its items in a single atomic transaction.
    /// This call is idempotent on the transaction code.
    /// Returns the record, and `false` in the second element if the transaction already existed.
    async fn insert_transaction(&self, tx: NewTransaction) -> Result<(Transaction, bool), StoreError>;

    async fn fetch_transaction(&self, code: &TxCode) -> Result<Option<Transaction>, StoreError>;

    async fn fetch_items(&self, code: &TxCode) -> Result<Vec<TransactionItem>, StoreError>;

    /// Returns the full transition log for a transaction, ordered by sequence number.
    async fn fetch_transitions(&self, code: &TxCode) -> Result<Vec<TransitionRecord>, StoreError>;

    /// The idempotency guard: has an observation with this key already been accepted?
    async fn accepted_record_exists(&self, key: &IdempotencyKey) -> Result<bool, StoreError>;

    /// Atomically applies an accepted transition: updates the status conditional on `expected` still being the
    /// current status, and appends the transition record with the next per-transaction sequence number.
    ///
    /// If the conditional update matches no row the store returns [`StoreError::ConcurrentModification`]; under the
    /// authority's per-code lock this indicates a writer outside the engine and is surfaced, never swallowed.
    async fn commit_transition(
        &self,
        expected: PaymentStatus,
        record: NewTransitionRecord,
    ) -> Result<(Transaction, TransitionRecord), StoreError>;

    /// Appends a non-accepted (superseded or rejected) decision to the transition log. The transaction row is not
    /// touched.
    async fn record_decision(&self, record: NewTransitionRecord) -> Result<TransitionRecord, StoreError>;

    /// Fetches transactions still in a non-terminal status whose last transition is older than `older_than`.
    /// This is the poller's work list.
    async fn fetch_stale_transactions(&self, older_than: Duration) -> Result<Vec<Transaction>, StoreError>;

    /// Marks all pending-delivery items of the transaction as delivered. The update is constrained to parents in
    /// `Settled` status; items of an unsettled transaction are left untouched. Returns the number of items updated.
    async fn mark_items_delivered(&self, code: &TxCode) -> Result<u64, StoreError>;

    /// Marks all delivered items of the transaction as refunded. Only items that were actually delivered qualify.
    /// Returns the number of items updated.
    async fn mark_delivered_items_refunded(&self, code: &TxCode) -> Result<u64, StoreError>;

    /// Materialises the invoice for a settled transaction. Idempotent: the existing invoice is returned if one was
    /// already generated.
    async fn insert_invoice(&self, tx: &Transaction) -> Result<Invoice, StoreError>;

    async fn fetch_invoice(&self, code: &TxCode) -> Result<Option<Invoice>, StoreError>;

    /// Claims the (transaction, target status) side-effect slot. Returns `false` when the effect has already run to
    /// completion. A slot that was claimed but never completed (dispatcher crash) can be claimed again, because the
    /// dispatcher's effects are individually idempotent.
    async fn claim_side_effect(&self, code: &TxCode, target: PaymentStatus) -> Result<bool, StoreError>;

    /// Marks the (transaction, target status) side effect as completed.
    async fn complete_side_effect(&self, code: &TxCode, target: PaymentStatus) -> Result<(), StoreError>;

    /// Closes the database connection.
    async fn close(&mut self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("Internal database error: {0}")]
    DatabaseError(String),
    #[error("The requested transaction {0} does not exist")]
    TransactionNotFound(TxCode),
    #[error("Conditional status update for {0} matched no row; a concurrent writer changed the transaction")]
    ConcurrentModification(TxCode),
    #[error("No invoice exists for transaction {0}")]
    InvoiceNotFound(TxCode),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::DatabaseError(e.to_string())
    }
}
