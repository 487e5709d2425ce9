use std::{
    collections::HashMap,
    fmt::Debug,
    sync::{Arc, Mutex},
    time::Duration,
};

use chrono::{DateTime, Utc};
use log::*;
use tokio::time::timeout;

use crate::{
    db_types::{
        Decision,
        EventSource,
        IdempotencyKey,
        NewTransaction,
        NewTransitionRecord,
        PaymentStatus,
        RejectReason,
        Transaction,
        TxCode,
    },
    events::{EventProducers, TransitionAcceptedEvent},
    recon_api::errors::ReconError,
    traits::ReconDatabase,
};

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Outcome of an [`TransitionAuthority::apply`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// The observation won: the status changed from `previous` to `new` and the side-effect dispatcher will run.
    Accepted { previous: PaymentStatus, new: PaymentStatus },
    /// Duplicate or same-status delivery. Safe no-op.
    Superseded,
    /// The observation lost against the current state. The reason is recorded for audit.
    Rejected(RejectReason),
}

impl Verdict {
    pub fn decision(&self) -> Decision {
        match self {
            Verdict::Accepted { .. } => Decision::Accepted,
            Verdict::Superseded => Decision::Superseded,
            Verdict::Rejected(_) => Decision::Rejected,
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, Verdict::Accepted { .. })
    }
}

/// `TransitionAuthority` is the single arbiter of transaction status.
///
/// All three inbound sources (webhook, poll, manual) converge here. The authority serialises writes per transaction
/// code with an async lock registry, deduplicates deliveries through the idempotency guard, resolves conflicting
/// signals with the status rank rule, appends every decision to the transition log, and publishes accepted
/// transitions to the event producers after the commit.
///
/// Locks are per transaction code; different transactions never contend. The critical section contains only store
/// I/O — gateway lookups happen in the [`Reconciler`](crate::Reconciler) before `apply` is ever called.
#[derive(Clone)]
pub struct TransitionAuthority<B: Clone> {
    db: B,
    producers: EventProducers,
    // Clones share the registry, so every handle to the same authority serialises on the same per-code locks.
    locks: LockRegistry,
    lock_timeout: Duration,
}

impl<B: Clone> Debug for TransitionAuthority<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TransitionAuthority")
    }
}

impl<B: Clone> TransitionAuthority<B> {
    pub fn new(db: B, producers: EventProducers) -> Self {
        Self { db, producers, locks: LockRegistry::default(), lock_timeout: DEFAULT_LOCK_TIMEOUT }
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }
}

impl<B> TransitionAuthority<B>
where B: ReconDatabase
{
    /// Registers a new transaction supplied by the checkout collaborator. Idempotent on the transaction code, so
    /// a re-delivered checkout message is harmless.
    pub async fn register_transaction(&self, tx: NewTransaction) -> Result<(Transaction, bool), ReconError> {
        let (record, inserted) = self.db.insert_transaction(tx).await?;
        if inserted {
            info!("🔁️ Transaction {} registered as {}", record.code, record.status);
        } else {
            debug!("🔁️ Transaction {} was already registered", record.code);
        }
        Ok((record, inserted))
    }

    /// Apply a status observation from an automatic source (webhook or poll) or a non-privileged manual re-check.
    ///
    /// Returns the verdict. `Accepted` means the status changed and the event producers were notified; both
    /// `Superseded` and `Rejected` are no-ops on the transaction row but still leave a transition record, so the
    /// audit trail is complete regardless of outcome.
    pub async fn apply(
        &self,
        code: &TxCode,
        source: EventSource,
        observed: PaymentStatus,
        gateway_event_id: &str,
        occurred_at: DateTime<Utc>,
    ) -> Result<Verdict, ReconError> {
        let (verdict, event) = self.decide(code, source, observed, gateway_event_id, None, occurred_at).await?;
        if let Some(event) = event {
            self.publish_accepted(event).await;
        }
        Ok(verdict)
    }

    /// Apply an operator override: the rank comparison is bypassed entirely and the observation is accepted
    /// unconditionally, tagged as an override with the operator's reason. This is the only path that can move a
    /// transaction out of a terminal state.
    pub async fn apply_override(
        &self,
        code: &TxCode,
        target: PaymentStatus,
        reason: &str,
        occurred_at: DateTime<Utc>,
    ) -> Result<Verdict, ReconError> {
        if reason.trim().is_empty() {
            return Err(ReconError::OverrideReasonRequired);
        }
        // Overrides are new events, not re-deliveries, so each gets a fresh event id for the idempotency key.
        let event_id = format!("override-{:016x}", rand::random::<u64>());
        let (verdict, event) =
            self.decide(code, EventSource::Manual, target, &event_id, Some(reason), occurred_at).await?;
        if let Some(event) = event {
            self.publish_accepted(event).await;
        }
        Ok(verdict)
    }

    /// Runs the decision procedure inside the per-transaction critical section.
    async fn decide(
        &self,
        code: &TxCode,
        source: EventSource,
        observed: PaymentStatus,
        gateway_event_id: &str,
        override_reason: Option<&str>,
        occurred_at: DateTime<Utc>,
    ) -> Result<(Verdict, Option<TransitionAcceptedEvent>), ReconError> {
        let lock = self.locks.for_code(code);
        let guard = timeout(self.lock_timeout, lock.lock()).await.map_err(|_| {
            warn!("🔁️ Lock acquisition for {code} timed out after {:?}", self.lock_timeout);
            ReconError::LockTimeout(code.clone())
        })?;

        let key = IdempotencyKey::new(code, observed, gateway_event_id);
        let current = match self.db.fetch_transaction(code).await? {
            Some(tx) => tx.status,
            None => {
                warn!("🔁️ Observation from {source} for unknown transaction {code} discarded");
                return Ok((Verdict::Rejected(RejectReason::NotFound), None));
            },
        };
        // The idempotency guard and the seq allocation share the critical section, so two identical deliveries
        // cannot both pass the check.
        if self.db.accepted_record_exists(&key).await? {
            trace!("🔁️ Duplicate delivery of {} for {code} superseded", key.fingerprint());
            let record = self.record(&key, source, current, Verdict::Superseded, None, occurred_at);
            self.db.record_decision(record).await?;
            return Ok((Verdict::Superseded, None));
        }

        let verdict = match override_reason {
            Some(_) => Verdict::Accepted { previous: current, new: observed },
            None => judge(current, observed),
        };
        match verdict.clone() {
            Verdict::Accepted { previous, new } => {
                let record = self.record(&key, source, new, verdict.clone(), override_reason, occurred_at);
                let (updated, _) = self.db.commit_transition(previous, record).await?;
                if override_reason.is_some() {
                    warn!("🔁️ Operator override moved {code} from {previous} to {new}");
                } else {
                    info!("🔁️ {code} moved from {previous} to {new} on a {source} report");
                }
                let event = TransitionAcceptedEvent::new(updated, previous, source);
                drop(guard);
                Ok((verdict, Some(event)))
            },
            Verdict::Superseded => {
                debug!("🔁️ {source} report of {observed} for {code} superseded; status is already {current}");
                let record = self.record(&key, source, current, verdict.clone(), None, occurred_at);
                self.db.record_decision(record).await?;
                Ok((verdict, None))
            },
            Verdict::Rejected(reason) => {
                if reason == RejectReason::AlreadyTerminal && observed.is_terminal() {
                    // A different terminal value from an automatic source points at a gateway-side inconsistency.
                    warn!(
                        "🔁️ Terminal conflict on {code}: {source} reported {observed} but the transaction is \
                         already {current}. Flagging for manual review."
                    );
                } else {
                    debug!("🔁️ {source} report of {observed} for {code} rejected ({reason}); status is {current}");
                }
                let record = self.record(&key, source, current, verdict.clone(), None, occurred_at);
                self.db.record_decision(record).await?;
                Ok((verdict, None))
            },
        }
    }

    fn record(
        &self,
        key: &IdempotencyKey,
        source: EventSource,
        resulting: PaymentStatus,
        verdict: Verdict,
        override_reason: Option<&str>,
        observed_at: DateTime<Utc>,
    ) -> NewTransitionRecord {
        let reject_reason = match &verdict {
            Verdict::Rejected(reason) => Some(*reason),
            _ => None,
        };
        NewTransitionRecord {
            tx_code: key.code.clone(),
            source,
            observed: key.observed,
            resulting,
            decision: verdict.decision(),
            reject_reason,
            fingerprint: key.fingerprint(),
            gateway_event_id: key.gateway_event_id.clone(),
            is_override: override_reason.is_some(),
            override_reason: override_reason.map(|s| s.to_string()),
            observed_at,
        }
    }

    async fn publish_accepted(&self, event: TransitionAcceptedEvent) {
        for producer in &self.producers.transition_accepted_producers {
            debug!("🔁️ Notifying transition-accepted subscribers for {}", event.transaction.code);
            producer.publish_event(event.clone()).await;
        }
    }

    /// Replays the accepted transition records of a transaction in sequence order and returns the status they
    /// reconstruct. Diagnostic companion to the audit trail; the result must always equal the stored status.
    pub async fn replay_status(&self, code: &TxCode) -> Result<PaymentStatus, ReconError> {
        let records = self.db.fetch_transitions(code).await?;
        let status = records
            .iter()
            .filter(|r| r.decision == Decision::Accepted)
            .last()
            .map(|r| r.resulting)
            .unwrap_or(PaymentStatus::Initiated);
        Ok(status)
    }

    pub fn db(&self) -> &B {
        &self.db
    }

    pub fn db_mut(&mut self) -> &mut B {
        &mut self.db
    }
}

/// The rank rule for automatic sources. Runs with the current status already loaded under the lock.
fn judge(current: PaymentStatus, observed: PaymentStatus) -> Verdict {
    use crate::db_types::PaymentStatus::*;
    if observed == current {
        // Same value at any rank, regardless of event id: nothing new to record as accepted.
        return Verdict::Superseded;
    }
    if current.is_terminal() {
        // A settled payment can still be refunded; every other exit from a terminal state needs an operator.
        if current == Settled && observed == Refunded {
            return Verdict::Accepted { previous: current, new: observed };
        }
        return Verdict::Rejected(RejectReason::AlreadyTerminal);
    }
    if observed == Refunded {
        // Refunds are only reachable from Settled.
        return Verdict::Rejected(RejectReason::IllegalTransition);
    }
    if observed.rank() > current.rank() {
        Verdict::Accepted { previous: current, new: observed }
    } else {
        Verdict::Rejected(RejectReason::Stale)
    }
}

/// One async mutex per transaction code, created on first use. The registry map itself is only held long enough to
/// clone the Arc out; the per-code mutex is what the decision procedure holds.
#[derive(Default, Clone)]
struct LockRegistry {
    locks: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl LockRegistry {
    fn for_code(&self, code: &TxCode) -> Arc<tokio::sync::Mutex<()>> {
        let mut map = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        map.entry(code.as_str().to_string()).or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))).clone()
    }
}
