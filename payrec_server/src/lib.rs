//! # Payrec server
//! This module hosts the web-facing surface of the reconciliation engine. It is responsible for:
//! * Terminating gateway payment notifications (webhooks), verifying their HMAC signature, and feeding the
//!   transition authority.
//! * Running the backfill sweep worker that compensates for lost webhooks.
//! * Exposing the operator endpoints: re-check, force-status, stale listing, transaction and invoice reads.
//!
//! ## Configuration
//! The server is configured via environment variables. See [config](config/index.html) for more information.
//!
//! ## Routes
//! * `/health`: liveness check, returns 200 OK.
//! * `/webhook/payment`, `/webhook/channel`: gateway callback endpoints, HMAC-protected.
//! * `/api/...`: operator endpoints, API-key protected.
pub mod cli;
pub mod config;
pub mod data_objects;
pub mod errors;
pub mod helpers;
pub mod integrations;
pub mod middleware;
pub mod poller;
pub mod routes;
pub mod server;
pub mod webhook_routes;

#[cfg(test)]
mod endpoint_tests;
