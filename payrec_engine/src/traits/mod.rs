//! # Backend and collaborator contracts.
//!
//! This module defines the interface contracts the reconciliation engine depends on.
//!
//! ## The Transaction Store
//! The [`ReconDatabase`] trait is the single source of truth for transaction state. It is the only shared mutable
//! resource in the engine; every other component is stateless with respect to transaction status. Backends provide
//! idempotent inserts, the conditional status update the authority's single-writer discipline rests on, the
//! append-only transition log, and the side-effect ledger the dispatcher keys its effects on.
//!
//! ## The Gateway
//! The [`GatewayClient`] trait covers the one outbound call the engine makes: looking up the gateway-side status of
//! a transaction. The gateway is untrusted input; its status vocabulary is mapped to the engine's closed status set
//! here, in one place.
mod data_objects;
mod gateway;
mod recon_database;

pub use data_objects::SweepResult;
pub use gateway::{GatewayClient, GatewayError, GatewayStatus, GatewayStatusReport};
pub use recon_database::{ReconDatabase, StoreError};
