//----------------------------------------------   Webhooks  ----------------------------------------------------
//
// Gateway callback handlers. The HMAC middleware has already authenticated the payload by the time these run, and
// body parsing failures are answered per-request, so one malformed notification never takes a worker down.
//
// Once a notification parses, the answer is 200 regardless of the verdict: superseded duplicates and stale reports
// are the engine working as intended, and a non-2xx would only make the gateway redeliver them. The exception is a
// retryable engine error (lock timeout, store fault), which is answered 5xx precisely so the gateway's retry
// policy kicks in.

use actix_web::{web, HttpResponse};
use chrono::Utc;
use log::*;
use payrec_engine::{
    db_types::{EventSource, TxCode},
    GatewayClient,
    ReconDatabase,
    ReconError,
    Reconciler,
    Verdict,
};

use crate::data_objects::{ChannelNotification, JsonResponse, PaymentNotification};

pub async fn payment_webhook<B, G>(
    body: web::Json<PaymentNotification>,
    recon: web::Data<Reconciler<B, G>>,
) -> HttpResponse
where
    B: ReconDatabase + 'static,
    G: GatewayClient + 'static,
{
    let note = body.into_inner();
    trace!("📨️ Payment notification for {}: {}", note.order_code, note.transaction_status);
    let code = TxCode::from(note.order_code);
    let observed = note.transaction_status.to_payment_status();
    let occurred_at = note.transaction_time.unwrap_or_else(Utc::now);
    let outcome =
        recon.authority().apply(&code, EventSource::Webhook, observed, &note.event_id, occurred_at).await;
    respond(&code, outcome)
}

pub async fn channel_webhook<B, G>(
    body: web::Json<ChannelNotification>,
    recon: web::Data<Reconciler<B, G>>,
) -> HttpResponse
where
    B: ReconDatabase + 'static,
    G: GatewayClient + 'static,
{
    let note = body.into_inner();
    trace!("📨️ {} channel notification for {}: {}", note.channel, note.reference, note.state);
    let code = TxCode::from(note.reference);
    let observed = note.state.to_payment_status();
    let occurred_at = note.paid_at.unwrap_or_else(Utc::now);
    let outcome =
        recon.authority().apply(&code, EventSource::Webhook, observed, &note.notification_id, occurred_at).await;
    respond(&code, outcome)
}

fn respond(code: &TxCode, outcome: Result<Verdict, ReconError>) -> HttpResponse {
    match outcome {
        Ok(Verdict::Accepted { previous, new }) => {
            info!("📨️ Webhook moved {code} from {previous} to {new}");
            HttpResponse::Ok().json(JsonResponse::success(format!("Transaction {code}: {previous} -> {new}")))
        },
        Ok(Verdict::Superseded) => {
            debug!("📨️ Duplicate notification for {code} ignored");
            HttpResponse::Ok().json(JsonResponse::success("Duplicate notification ignored."))
        },
        Ok(Verdict::Rejected(reason)) => {
            debug!("📨️ Notification for {code} discarded ({reason})");
            HttpResponse::Ok().json(JsonResponse::success(format!("Notification discarded ({reason}).")))
        },
        Err(e @ ReconError::LockTimeout(_)) => {
            warn!("📨️ Could not process notification for {code} in time: {e}");
            HttpResponse::ServiceUnavailable().json(JsonResponse::failure("Busy, please retry."))
        },
        Err(e) => {
            warn!("📨️ Unexpected error while handling notification for {code}: {e}");
            HttpResponse::InternalServerError().json(JsonResponse::failure("Unexpected error handling notification."))
        },
    }
}
