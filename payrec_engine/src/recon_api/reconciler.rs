use chrono::{Duration, Utc};
use log::*;

use crate::{
    db_types::{EventSource, PaymentStatus, Transaction, TxCode},
    recon_api::{
        authority::{TransitionAuthority, Verdict},
        errors::ReconError,
    },
    traits::{GatewayClient, ReconDatabase, StoreError, SweepResult},
};

/// `Reconciler` drives the flows that need a gateway lookup: the backfill sweep that compensates for lost webhooks,
/// the operator's single-transaction re-check, and the forced override.
///
/// All status mutations still go through the [`TransitionAuthority`]; the reconciler only fetches gateway state and
/// feeds it in. Lookups always happen before the authority takes the transaction lock, so gateway latency never
/// extends a critical section.
#[derive(Clone)]
pub struct Reconciler<B: Clone, G: Clone> {
    authority: TransitionAuthority<B>,
    gateway: G,
}

impl<B, G> Reconciler<B, G>
where
    B: ReconDatabase,
    G: GatewayClient,
{
    pub fn new(authority: TransitionAuthority<B>, gateway: G) -> Self {
        Self { authority, gateway }
    }

    /// Operator "re-check now": one immediate gateway lookup, routed through the authority exactly like the poller.
    /// Not privileged; the rank rules apply unchanged.
    pub async fn recheck_now(&self, code: &TxCode) -> Result<Verdict, ReconError> {
        let tx = self
            .authority
            .db()
            .fetch_transaction(code)
            .await?
            .ok_or_else(|| StoreError::TransactionNotFound(code.clone()))?;
        let report = self.gateway.lookup_status(&tx.gateway_ref).await?;
        let observed = report.status.to_payment_status();
        let occurred_at = report.transaction_time.unwrap_or_else(Utc::now);
        debug!("🕵️️ Re-check for {code}: gateway reports {} ({observed})", report.status);
        self.authority.apply(code, EventSource::Poll, observed, &report.transaction_id, occurred_at).await
    }

    /// Operator "force status": bypasses the rank rules by design. The reason string is mandatory and lands on the
    /// transition record for audit.
    pub async fn force_status(
        &self,
        code: &TxCode,
        target: PaymentStatus,
        reason: &str,
    ) -> Result<Verdict, ReconError> {
        self.authority.apply_override(code, target, reason, Utc::now()).await
    }

    /// One backfill sweep: every transaction still non-terminal and untouched for longer than `older_than` gets a
    /// gateway lookup and a `Poll` observation. Individual failures are tallied and left for the next sweep; the
    /// batch always runs to the end.
    pub async fn sweep_stale(&self, older_than: Duration) -> Result<SweepResult, ReconError> {
        let stale = self.authority.db().fetch_stale_transactions(older_than).await?;
        let mut result = SweepResult::default();
        for tx in stale {
            result.checked += 1;
            let report = match self.gateway.lookup_status(&tx.gateway_ref).await {
                Ok(report) => report,
                Err(e) => {
                    warn!("🕰️ Gateway lookup for {} failed, leaving it for the next sweep: {e}", tx.code);
                    result.failures += 1;
                    continue;
                },
            };
            let observed = report.status.to_payment_status();
            let occurred_at = report.transaction_time.unwrap_or_else(Utc::now);
            match self.authority.apply(&tx.code, EventSource::Poll, observed, &report.transaction_id, occurred_at).await
            {
                Ok(Verdict::Accepted { previous, new }) => {
                    info!("🕰️ Backfill moved {} from {previous} to {new}", tx.code);
                    result.accepted += 1;
                },
                Ok(Verdict::Superseded) => result.superseded += 1,
                Ok(Verdict::Rejected(_)) => result.rejected += 1,
                Err(e) => {
                    warn!("🕰️ Could not apply backfill observation for {}: {e}", tx.code);
                    result.failures += 1;
                },
            }
        }
        Ok(result)
    }

    /// Diagnostic listing of transactions pending beyond the staleness threshold.
    pub async fn list_stale(&self, older_than: Duration) -> Result<Vec<Transaction>, ReconError> {
        Ok(self.authority.db().fetch_stale_transactions(older_than).await?)
    }

    pub fn authority(&self) -> &TransitionAuthority<B> {
        &self.authority
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }
}
