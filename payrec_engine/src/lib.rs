//! Payrec Reconciliation Engine
//!
//! The reconciliation engine guarantees that every transaction converges to a single, correct, terminal payment
//! state exactly once, even though payment confirmations arrive over two unreliable channels (gateway webhooks and
//! status polling) and operators can intervene manually. This library contains the core logic for the engine. It is
//! HTTP-framework agnostic; the `payrec_server` crate hosts the web-facing surface.
//!
//! The library is divided into three main sections:
//! 1. Database management and control ([`mod@sqlite`]). SQLite is the supported backend. You should never need to
//!    access the database directly. Instead, use the public API provided by the engine. The exception is the data
//!    types used in the database, which are defined in the `db_types` module and are public.
//! 2. The engine public API ([`mod@recon_api`]). The [`TransitionAuthority`] is the single arbiter of transaction
//!    status; all three inbound sources (webhook, poll, manual) funnel through its `apply` call. The [`Reconciler`]
//!    layers the gateway-lookup flows (re-check, backfill sweep, forced overrides) on top of it.
//! 3. Events and side effects ([`mod@events`], [`SideEffectDispatcher`]). Accepted transitions are published to
//!    subscribers through a simple actor-style hook system; the dispatcher consumes them and performs fulfillment
//!    effects (delivery unlock, invoicing, refunds, inventory release) exactly once per accepted transition.
pub mod db_types;
mod dispatcher;
pub mod events;
mod recon_api;
pub mod traits;

#[cfg(feature = "sqlite")]
mod sqlite;

#[cfg(feature = "sqlite")]
pub mod test_utils;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteDatabase;

pub use dispatcher::SideEffectDispatcher;
pub use recon_api::{
    authority::{TransitionAuthority, Verdict},
    errors::ReconError,
    reconciler::Reconciler,
};
pub use traits::{GatewayClient, GatewayError, GatewayStatus, GatewayStatusReport, ReconDatabase, StoreError};
