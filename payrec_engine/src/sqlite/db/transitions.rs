use log::trace;
use sqlx::SqliteConnection;

use crate::{
    db_types::{NewTransitionRecord, TransitionRecord, TxCode},
    traits::StoreError,
};

/// Appends a transition record with the next per-transaction sequence number. The caller must hold the
/// transaction's lock (or run inside a DB transaction) so the seq allocation cannot race.
pub async fn insert_record(
    record: NewTransitionRecord,
    conn: &mut SqliteConnection,
) -> Result<TransitionRecord, StoreError> {
    let seq: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(seq), 0) + 1 FROM transitions WHERE tx_code = $1")
        .bind(record.tx_code.as_str())
        .fetch_one(&mut *conn)
        .await?;
    trace!("🗃️ Appending transition #{seq} for {} ({})", record.tx_code, record.decision);
    let record = sqlx::query_as(
        r#"
            INSERT INTO transitions (
                tx_code,
                seq,
                source,
                observed,
                resulting,
                decision,
                reject_reason,
                fingerprint,
                gateway_event_id,
                is_override,
                override_reason,
                observed_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING *;
        "#,
    )
    .bind(record.tx_code)
    .bind(seq)
    .bind(record.source)
    .bind(record.observed)
    .bind(record.resulting)
    .bind(record.decision)
    .bind(record.reject_reason)
    .bind(record.fingerprint)
    .bind(record.gateway_event_id)
    .bind(record.is_override)
    .bind(record.override_reason)
    .bind(record.observed_at)
    .fetch_one(conn)
    .await?;
    Ok(record)
}

/// The idempotency guard's query: does an accepted record with this fingerprint exist?
pub async fn accepted_exists(fingerprint: &str, conn: &mut SqliteConnection) -> Result<bool, StoreError> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM transitions WHERE fingerprint = $1 AND decision = 'Accepted'")
            .bind(fingerprint)
            .fetch_one(conn)
            .await?;
    Ok(count > 0)
}

/// The full transition log for a transaction, in sequence order.
pub async fn fetch_for_transaction(
    code: &TxCode,
    conn: &mut SqliteConnection,
) -> Result<Vec<TransitionRecord>, StoreError> {
    let records = sqlx::query_as("SELECT * FROM transitions WHERE tx_code = $1 ORDER BY seq ASC")
        .bind(code.as_str())
        .fetch_all(conn)
        .await?;
    Ok(records)
}
