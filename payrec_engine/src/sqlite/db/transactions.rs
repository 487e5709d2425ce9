use chrono::Duration;
use log::debug;
use sqlx::SqliteConnection;

use crate::{
    db_types::{NewTransaction, PaymentStatus, Transaction, TxCode},
    traits::StoreError,
};

/// Inserts the transaction into the database, returning `false` in the second element if it already exists.
/// Items are inserted separately so the caller can keep the whole flow in one atomic transaction.
pub async fn idempotent_insert(
    tx: &NewTransaction,
    conn: &mut SqliteConnection,
) -> Result<(Transaction, bool), StoreError> {
    let inserted = match fetch_by_code(&tx.code, conn).await? {
        Some(existing) => (existing, false),
        None => {
            let tx = insert_transaction(tx, conn).await?;
            debug!("🗃️ Transaction [{}] inserted with id {}", tx.code, tx.id);
            (tx, true)
        },
    };
    Ok(inserted)
}

async fn insert_transaction(tx: &NewTransaction, conn: &mut SqliteConnection) -> Result<Transaction, StoreError> {
    let tx = sqlx::query_as(
        r#"
            INSERT INTO transactions (
                code,
                gateway_ref,
                buyer_id,
                amount,
                currency
            ) VALUES ($1, $2, $3, $4, $5)
            RETURNING *;
        "#,
    )
    .bind(&tx.code)
    .bind(&tx.gateway_ref)
    .bind(&tx.buyer_id)
    .bind(tx.amount)
    .bind(&tx.currency)
    .fetch_one(conn)
    .await?;
    Ok(tx)
}

pub async fn fetch_by_code(code: &TxCode, conn: &mut SqliteConnection) -> Result<Option<Transaction>, sqlx::Error> {
    let tx =
        sqlx::query_as("SELECT * FROM transactions WHERE code = $1").bind(code.as_str()).fetch_optional(conn).await?;
    Ok(tx)
}

/// The single-writer discipline at the SQL level: the status only changes if `expected` is still the current
/// status. Returns `None` when the conditional update matched no row.
pub async fn update_status_checked(
    code: &TxCode,
    expected: PaymentStatus,
    new_status: PaymentStatus,
    conn: &mut SqliteConnection,
) -> Result<Option<Transaction>, StoreError> {
    let result = sqlx::query_as(
        "UPDATE transactions SET status = $1, updated_at = CURRENT_TIMESTAMP WHERE code = $2 AND status = $3 \
         RETURNING *",
    )
    .bind(new_status)
    .bind(code.as_str())
    .bind(expected)
    .fetch_optional(conn)
    .await?;
    Ok(result)
}

/// Transactions still in a non-terminal status whose last transition is older than the given duration.
/// `updated_at` is always written by SQL (`CURRENT_TIMESTAMP`), so the comparison stays within one format.
pub async fn fetch_stale(older_than: Duration, conn: &mut SqliteConnection) -> Result<Vec<Transaction>, StoreError> {
    let seconds = older_than.num_seconds();
    let stale = sqlx::query_as(
        "SELECT * FROM transactions WHERE status IN ('Initiated', 'Pending') AND updated_at < datetime('now', '-' \
         || $1 || ' seconds') ORDER BY updated_at ASC",
    )
    .bind(seconds)
    .fetch_all(conn)
    .await?;
    Ok(stale)
}
