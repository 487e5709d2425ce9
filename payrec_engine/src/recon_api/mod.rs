//! # Reconciliation engine public API
//!
//! The `recon_api` module exposes the programmatic API for the reconciliation engine.
//!
//! * [`authority`] hosts the [`TransitionAuthority`](authority::TransitionAuthority), the single arbiter of
//!   transaction status. Nothing else in the system mutates a transaction's status; the webhook handler, the
//!   poller and the manual endpoints all funnel their observations through its `apply` call and act on the verdict.
//! * [`reconciler`] layers the gateway-lookup flows on top of the authority: the single-transaction re-check, the
//!   stale-transaction backfill sweep, and the operator's forced override.
//!
//! The pattern for using the APIs follows the backend-trait convention: an instance is created by supplying a
//! database backend implementing [`ReconDatabase`](crate::traits::ReconDatabase), e.g.
//!
//! ```rust,ignore
//! use payrec_engine::{events::EventProducers, SqliteDatabase, TransitionAuthority};
//! let db = SqliteDatabase::new_with_url(url, 25).await?;
//! let authority = TransitionAuthority::new(db, EventProducers::default());
//! let verdict = authority.apply(&code, EventSource::Webhook, observed, "evt-1", occurred_at).await?;
//! ```
pub mod authority;
pub mod errors;
pub mod reconciler;
