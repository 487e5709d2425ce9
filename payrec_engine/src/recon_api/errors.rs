use thiserror::Error;

use crate::{
    db_types::TxCode,
    traits::{GatewayError, StoreError},
};

#[derive(Debug, Clone, Error)]
pub enum ReconError {
    #[error("Database error: {0}")]
    Store(#[from] StoreError),
    /// The per-transaction lock could not be acquired within the configured window. Callers must retry with
    /// backoff; the engine never silently skips an observation.
    #[error("Could not acquire the lock for transaction {0} in time")]
    LockTimeout(TxCode),
    #[error("A forced status change requires a non-empty reason")]
    OverrideReasonRequired,
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),
}
