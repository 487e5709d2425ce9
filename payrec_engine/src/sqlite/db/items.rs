use sqlx::SqliteConnection;

use crate::{
    db_types::{NewTransactionItem, TransactionItem, TxCode},
    traits::StoreError,
};

pub async fn insert_items(
    code: &TxCode,
    items: &[NewTransactionItem],
    conn: &mut SqliteConnection,
) -> Result<(), StoreError> {
    for item in items {
        sqlx::query(
            "INSERT INTO transaction_items (tx_code, product_ref, description, quantity, unit_price) VALUES ($1, \
             $2, $3, $4, $5)",
        )
        .bind(code.as_str())
        .bind(&item.product_ref)
        .bind(&item.description)
        .bind(item.quantity)
        .bind(item.unit_price)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

pub async fn fetch_items(code: &TxCode, conn: &mut SqliteConnection) -> Result<Vec<TransactionItem>, StoreError> {
    let items = sqlx::query_as("SELECT * FROM transaction_items WHERE tx_code = $1 ORDER BY id ASC")
        .bind(code.as_str())
        .fetch_all(conn)
        .await?;
    Ok(items)
}

/// Unlocks delivery for the transaction's pending items. The guard clause keeps the parent-status constraint in
/// the statement itself: items of an unsettled transaction are never touched.
pub async fn mark_delivered(code: &TxCode, conn: &mut SqliteConnection) -> Result<u64, StoreError> {
    let result = sqlx::query(
        "UPDATE transaction_items SET status = 'Delivered', updated_at = CURRENT_TIMESTAMP WHERE tx_code = $1 AND \
         status = 'PendingDelivery' AND EXISTS (SELECT 1 FROM transactions WHERE code = $1 AND status = 'Settled')",
    )
    .bind(code.as_str())
    .execute(conn)
    .await?;
    Ok(result.rows_affected())
}

/// Marks delivered items as refunded. Items that never reached the buyer do not qualify for a refund record.
pub async fn mark_refunded(code: &TxCode, conn: &mut SqliteConnection) -> Result<u64, StoreError> {
    let result = sqlx::query(
        "UPDATE transaction_items SET status = 'Refunded', updated_at = CURRENT_TIMESTAMP WHERE tx_code = $1 AND \
         status = 'Delivered'",
    )
    .bind(code.as_str())
    .execute(conn)
    .await?;
    Ok(result.rows_affected())
}
