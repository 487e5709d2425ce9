use serde::{Deserialize, Serialize};

use crate::db_types::{EventSource, PaymentStatus, Transaction};

/// Published by the transition authority after an accepted transition has been committed. Carries both the old and
/// new status so subscribers can act on the edge, not just the destination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionAcceptedEvent {
    pub transaction: Transaction,
    pub previous: PaymentStatus,
    pub source: EventSource,
}

impl TransitionAcceptedEvent {
    pub fn new(transaction: Transaction, previous: PaymentStatus, source: EventSource) -> Self {
        Self { transaction, previous, source }
    }

    pub fn new_status(&self) -> PaymentStatus {
        self.transaction.status
    }
}
