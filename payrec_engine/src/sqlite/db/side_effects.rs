use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

use crate::{
    db_types::{PaymentStatus, TxCode},
    traits::StoreError,
};

/// Claims the (transaction, target status) effect slot. Returns `false` if the effect already ran to completion.
/// A slot claimed by a dispatcher that died before completing stays claimable, because the dispatcher's effects
/// are individually idempotent.
pub async fn claim(code: &TxCode, target: PaymentStatus, conn: &mut SqliteConnection) -> Result<bool, StoreError> {
    sqlx::query(
        "INSERT INTO side_effects (tx_code, target_status) VALUES ($1, $2) ON CONFLICT (tx_code, target_status) DO \
         NOTHING",
    )
    .bind(code.as_str())
    .bind(target)
    .execute(&mut *conn)
    .await?;
    let completed_at: Option<Option<DateTime<Utc>>> =
        sqlx::query_scalar("SELECT completed_at FROM side_effects WHERE tx_code = $1 AND target_status = $2")
            .bind(code.as_str())
            .bind(target)
            .fetch_optional(conn)
            .await?;
    Ok(!matches!(completed_at, Some(Some(_))))
}

pub async fn complete(code: &TxCode, target: PaymentStatus, conn: &mut SqliteConnection) -> Result<(), StoreError> {
    sqlx::query(
        "UPDATE side_effects SET completed_at = CURRENT_TIMESTAMP WHERE tx_code = $1 AND target_status = $2",
    )
    .bind(code.as_str())
    .bind(target)
    .execute(conn)
    .await?;
    Ok(())
}
