use log::*;

use crate::{
    db_types::{PaymentStatus, Transaction},
    events::TransitionAcceptedEvent,
    traits::{ReconDatabase, StoreError},
};

/// `SideEffectDispatcher` performs the fulfillment actions owed on each accepted transition: delivery unlock and
/// invoicing on settlement, item refunds and the payout adjustment on refund, inventory release on failure or
/// expiry, and the best-effort user notification on every accepted transition.
///
/// The authority guarantees *at most one* accepted transition per event, not exactly one successful side effect, so
/// the dispatcher owns its own idempotency: every effect run is keyed by (transaction code, target status) in the
/// side-effect ledger, and the individual effects are re-runnable. A dispatcher that crashes mid-effect simply runs
/// again on the next delivery of the event.
#[derive(Clone)]
pub struct SideEffectDispatcher<B> {
    db: B,
}

impl<B> SideEffectDispatcher<B>
where B: ReconDatabase
{
    pub fn new(db: B) -> Self {
        Self { db }
    }

    /// Entry point for the `on_transition_accepted` hook. Errors are logged, never propagated: the event channel
    /// has no caller to hand them to, and every effect is retryable.
    pub async fn dispatch(&self, event: TransitionAcceptedEvent) {
        let tx = &event.transaction;
        let outcome = match tx.status {
            PaymentStatus::Settled => self.on_settled(tx).await,
            PaymentStatus::Refunded => self.on_refunded(tx).await,
            PaymentStatus::Failed | PaymentStatus::Expired => self.on_annulled(tx).await,
            PaymentStatus::Initiated | PaymentStatus::Pending => Ok(()),
        };
        if let Err(e) = outcome {
            error!("📦️ Side effects for {} ({} -> {}) failed and will be retried: {e}", tx.code, event.previous, tx.status);
        }
    }

    /// Settlement effects: unlock delivery of the purchased items and materialise the invoice.
    async fn on_settled(&self, tx: &Transaction) -> Result<(), StoreError> {
        if !self.db.claim_side_effect(&tx.code, PaymentStatus::Settled).await? {
            debug!("📦️ Settlement effects for {} already ran, skipping", tx.code);
            return Ok(());
        }
        let delivered = self.db.mark_items_delivered(&tx.code).await?;
        let invoice = self.db.insert_invoice(tx).await?;
        info!("📦️ {} settled: {delivered} item(s) unlocked, invoice {} issued", tx.code, invoice.invoice_no);
        self.db.complete_side_effect(&tx.code, PaymentStatus::Settled).await
    }

    /// Refund effects: flip delivered items to refunded and hand the payout adjustment to the fulfillment
    /// collaborator.
    async fn on_refunded(&self, tx: &Transaction) -> Result<(), StoreError> {
        if !self.db.claim_side_effect(&tx.code, PaymentStatus::Refunded).await? {
            debug!("📦️ Refund effects for {} already ran, skipping", tx.code);
            return Ok(());
        }
        let refunded = self.db.mark_delivered_items_refunded(&tx.code).await?;
        info!("📦️ {} refunded: {refunded} item(s) marked refunded, payout adjustment of {} {} requested", tx.code, tx.amount, tx.currency);
        self.db.complete_side_effect(&tx.code, PaymentStatus::Refunded).await
    }

    /// Failure/expiry effects: release any inventory reserved for the purchase.
    async fn on_annulled(&self, tx: &Transaction) -> Result<(), StoreError> {
        if !self.db.claim_side_effect(&tx.code, tx.status).await? {
            debug!("📦️ Release effects for {} already ran, skipping", tx.code);
            return Ok(());
        }
        info!("📦️ {} ended {}: reserved inventory released", tx.code, tx.status);
        self.db.complete_side_effect(&tx.code, tx.status).await
    }
}
