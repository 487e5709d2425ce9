//! `SqliteDatabase` is the concrete SQLite implementation of the Transaction Store.
//!
//! It implements the [`ReconDatabase`] trait over a connection pool, composing the low-level query functions in
//! [`super::db`] into atomic flows where more than one statement is involved.
use std::fmt::Debug;

use chrono::Duration;
use log::*;
use sqlx::SqlitePool;

use super::db::{invoices, items, side_effects, transactions, transitions};
use crate::{
    db_types::{
        IdempotencyKey,
        Invoice,
        NewTransaction,
        NewTransitionRecord,
        PaymentStatus,
        Transaction,
        TransactionItem,
        TransitionRecord,
        TxCode,
    },
    traits::{ReconDatabase, StoreError},
};

#[derive(Clone)]
pub struct SqliteDatabase {
    url: String,
    pool: SqlitePool,
}

impl Debug for SqliteDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "SqliteDatabase ({:?})", self.pool)
    }
}

impl SqliteDatabase {
    /// Creates a new database connection pool with the given maximum number of connections.
    pub async fn new_with_url(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = super::db::new_pool(url, max_connections).await?;
        Ok(Self { url: url.to_string(), pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

impl ReconDatabase for SqliteDatabase {
    fn url(&self) -> &str {
        self.url.as_str()
    }

    async fn insert_transaction(&self, tx: NewTransaction) -> Result<(Transaction, bool), StoreError> {
        let mut db_tx = self.pool.begin().await?;
        let (record, inserted) = transactions::idempotent_insert(&tx, &mut db_tx).await?;
        if inserted {
            items::insert_items(&record.code, &tx.items, &mut db_tx).await?;
            debug!("🗃️ Transaction [{}] stored with {} item(s)", record.code, tx.items.len());
        }
        db_tx.commit().await?;
        Ok((record, inserted))
    }

    async fn fetch_transaction(&self, code: &TxCode) -> Result<Option<Transaction>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        let tx = transactions::fetch_by_code(code, &mut conn).await?;
        Ok(tx)
    }

    async fn fetch_items(&self, code: &TxCode) -> Result<Vec<TransactionItem>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        items::fetch_items(code, &mut conn).await
    }

    async fn fetch_transitions(&self, code: &TxCode) -> Result<Vec<TransitionRecord>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        transitions::fetch_for_transaction(code, &mut conn).await
    }

    async fn accepted_record_exists(&self, key: &IdempotencyKey) -> Result<bool, StoreError> {
        let mut conn = self.pool.acquire().await?;
        transitions::accepted_exists(&key.fingerprint(), &mut conn).await
    }

    async fn commit_transition(
        &self,
        expected: PaymentStatus,
        record: NewTransitionRecord,
    ) -> Result<(Transaction, TransitionRecord), StoreError> {
        let code = record.tx_code.clone();
        let mut db_tx = self.pool.begin().await?;
        let updated = transactions::update_status_checked(&code, expected, record.resulting, &mut db_tx)
            .await?
            .ok_or_else(|| StoreError::ConcurrentModification(code.clone()))?;
        let stored = transitions::insert_record(record, &mut db_tx).await?;
        db_tx.commit().await?;
        trace!("🗃️ Transition #{} for {code} committed ({} -> {})", stored.seq, expected, stored.resulting);
        Ok((updated, stored))
    }

    async fn record_decision(&self, record: NewTransitionRecord) -> Result<TransitionRecord, StoreError> {
        // The seq query and the insert must agree, so even non-accepted records go through a DB transaction.
        let mut db_tx = self.pool.begin().await?;
        let stored = transitions::insert_record(record, &mut db_tx).await?;
        db_tx.commit().await?;
        Ok(stored)
    }

    async fn fetch_stale_transactions(&self, older_than: Duration) -> Result<Vec<Transaction>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        transactions::fetch_stale(older_than, &mut conn).await
    }

    async fn mark_items_delivered(&self, code: &TxCode) -> Result<u64, StoreError> {
        let mut conn = self.pool.acquire().await?;
        items::mark_delivered(code, &mut conn).await
    }

    async fn mark_delivered_items_refunded(&self, code: &TxCode) -> Result<u64, StoreError> {
        let mut conn = self.pool.acquire().await?;
        items::mark_refunded(code, &mut conn).await
    }

    async fn insert_invoice(&self, tx: &Transaction) -> Result<Invoice, StoreError> {
        let mut conn = self.pool.acquire().await?;
        invoices::idempotent_insert(tx, &mut conn).await
    }

    async fn fetch_invoice(&self, code: &TxCode) -> Result<Option<Invoice>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        invoices::fetch_by_code(code, &mut conn).await
    }

    async fn claim_side_effect(&self, code: &TxCode, target: PaymentStatus) -> Result<bool, StoreError> {
        let mut conn = self.pool.acquire().await?;
        side_effects::claim(code, target, &mut conn).await
    }

    async fn complete_side_effect(&self, code: &TxCode, target: PaymentStatus) -> Result<(), StoreError> {
        let mut conn = self.pool.acquire().await?;
        side_effects::complete(code, target, &mut conn).await
    }

    async fn close(&mut self) -> Result<(), StoreError> {
        self.pool.close().await;
        Ok(())
    }
}
