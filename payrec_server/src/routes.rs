//! Request handler definitions
//!
//! Define each route and its handler here.
//! Handlers that are more than a line or two MUST go into a separate module. Keep this module neat and tidy 🙏
//!
//! Handlers are generic over the store and gateway backends, so the registration in
//! [`server`](crate::server) names the concrete types once (e.g. `get_transaction::<SqliteDatabase,
//! HttpGatewayClient>`). Any long, non-cpu-bound operation (I/O, database calls, gateway lookups) is awaited, never
//! blocked on, so a slow call parks the task instead of wedging the worker.
use actix_web::{get, web, HttpResponse, Responder};
use chrono::Duration;
use log::*;
use payrec_engine::{
    db_types::{NewTransaction, TxCode},
    GatewayClient,
    ReconDatabase,
    Reconciler,
};

use crate::{
    data_objects::{ForceStatusRequest, InvoiceView, StaleQuery, TransactionView, VerdictResponse},
    errors::ServerError,
};

// ----------------------------------------------   Health  ----------------------------------------------------
#[get("/health")]
pub async fn health() -> impl Responder {
    trace!("💻️ Received health check request");
    HttpResponse::Ok().body("👍️\n")
}

//----------------------------------------------   Checkout  ---------------------------------------------------
/// Registration endpoint for the checkout collaborator: a new purchase arrives here as an `Initiated`
/// transaction with a stable code and the gateway order reference. Idempotent on the code.
pub async fn register_transaction<B, G>(
    body: web::Json<NewTransaction>,
    recon: web::Data<Reconciler<B, G>>,
) -> Result<HttpResponse, ServerError>
where
    B: ReconDatabase + 'static,
    G: GatewayClient + 'static,
{
    let new_tx = body.into_inner();
    debug!("💻️ POST transaction registration for {}", new_tx.code);
    let (tx, created) = recon.authority().register_transaction(new_tx).await?;
    if created {
        Ok(HttpResponse::Created().json(tx))
    } else {
        Ok(HttpResponse::Ok().json(tx))
    }
}

//----------------------------------------------   Reads  ------------------------------------------------------
/// Committed transaction state: status, items, and the full transition log. Buyers see status through this read
/// model; reconciliation internals never surface as errors here.
pub async fn get_transaction<B, G>(
    path: web::Path<String>,
    recon: web::Data<Reconciler<B, G>>,
) -> Result<HttpResponse, ServerError>
where
    B: ReconDatabase + 'static,
    G: GatewayClient + 'static,
{
    let code = TxCode::from(path.into_inner());
    debug!("💻️ GET transaction {code}");
    let db = recon.authority().db();
    let transaction = db
        .fetch_transaction(&code)
        .await?
        .ok_or_else(|| ServerError::NoRecordFound(format!("Transaction {code}")))?;
    let items = db.fetch_items(&code).await?;
    let transitions = db.fetch_transitions(&code).await?;
    Ok(HttpResponse::Ok().json(TransactionView { transaction, items, transitions }))
}

/// The structured receipt for a settled transaction.
pub async fn get_invoice<B, G>(
    path: web::Path<String>,
    recon: web::Data<Reconciler<B, G>>,
) -> Result<HttpResponse, ServerError>
where
    B: ReconDatabase + 'static,
    G: GatewayClient + 'static,
{
    let code = TxCode::from(path.into_inner());
    debug!("💻️ GET invoice for {code}");
    let db = recon.authority().db();
    let invoice = db.fetch_invoice(&code).await?.ok_or_else(|| {
        ServerError::NoRecordFound(format!("No invoice for transaction {code}; it may not have settled yet"))
    })?;
    let items = db.fetch_items(&code).await?;
    Ok(HttpResponse::Ok().json(InvoiceView { invoice, items }))
}

//----------------------------------------------   Manual  -----------------------------------------------------
/// Operator "re-check now": immediate gateway lookup for one transaction, routed through the authority with the
/// same (non-privileged) rules as the poller.
pub async fn recheck<B, G>(
    path: web::Path<String>,
    recon: web::Data<Reconciler<B, G>>,
) -> Result<HttpResponse, ServerError>
where
    B: ReconDatabase + 'static,
    G: GatewayClient + 'static,
{
    let code = TxCode::from(path.into_inner());
    info!("💻️ Operator re-check requested for {code}");
    let verdict = recon.recheck_now(&code).await?;
    Ok(HttpResponse::Ok().json(VerdictResponse::new(&code, &verdict)))
}

/// Operator "force status": bypasses the rank rules, requires a reason, and is flagged as an override on the
/// transition record.
pub async fn force_status<B, G>(
    body: web::Json<ForceStatusRequest>,
    recon: web::Data<Reconciler<B, G>>,
) -> Result<HttpResponse, ServerError>
where
    B: ReconDatabase + 'static,
    G: GatewayClient + 'static,
{
    let request = body.into_inner();
    let code = TxCode::from(request.code);
    warn!("💻️ Operator forcing {code} to {}: {}", request.status, request.reason);
    let verdict = recon.force_status(&code, request.status, &request.reason).await?;
    Ok(HttpResponse::Ok().json(VerdictResponse::new(&code, &verdict)))
}

/// Diagnostic: transactions still non-terminal beyond the staleness threshold. `?minutes=` overrides the
/// configured threshold.
pub async fn list_stale<B, G>(
    query: web::Query<StaleQuery>,
    recon: web::Data<Reconciler<B, G>>,
    options: web::Data<ServerOptions>,
) -> Result<HttpResponse, ServerError>
where
    B: ReconDatabase + 'static,
    G: GatewayClient + 'static,
{
    let threshold = query.minutes.map(Duration::minutes).unwrap_or(options.stale_threshold);
    debug!("💻️ GET stale transactions older than {} min", threshold.num_minutes());
    let stale = recon.list_stale(threshold).await?;
    Ok(HttpResponse::Ok().json(stale))
}

/// The handful of config values handlers need, excluding secrets.
#[derive(Clone, Copy, Debug)]
pub struct ServerOptions {
    pub stale_threshold: Duration,
}
