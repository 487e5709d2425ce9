use log::debug;
use sqlx::SqliteConnection;

use crate::{
    db_types::{Invoice, Transaction, TxCode},
    traits::StoreError,
};

/// Materialises the invoice for a settled transaction. Returns the existing record if one was already generated,
/// so a retried dispatcher never produces a second invoice.
pub async fn idempotent_insert(tx: &Transaction, conn: &mut SqliteConnection) -> Result<Invoice, StoreError> {
    if let Some(existing) = fetch_by_code(&tx.code, conn).await? {
        return Ok(existing);
    }
    let invoice_no = format!("INV-{}", tx.code);
    let invoice = sqlx::query_as(
        "INSERT INTO invoices (invoice_no, tx_code, buyer_id, amount, currency) VALUES ($1, $2, $3, $4, $5) \
         RETURNING *",
    )
    .bind(&invoice_no)
    .bind(&tx.code)
    .bind(&tx.buyer_id)
    .bind(tx.amount)
    .bind(&tx.currency)
    .fetch_one(conn)
    .await?;
    debug!("🗃️ Invoice {invoice_no} issued for transaction {}", tx.code);
    Ok(invoice)
}

pub async fn fetch_by_code(code: &TxCode, conn: &mut SqliteConnection) -> Result<Option<Invoice>, StoreError> {
    let invoice =
        sqlx::query_as("SELECT * FROM invoices WHERE tx_code = $1").bind(code.as_str()).fetch_optional(conn).await?;
    Ok(invoice)
}
