//! Endpoint tests: the webhook and operator surfaces wired against a throwaway SQLite store and a stub gateway.
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use actix_web::{http::StatusCode, test, web, App};
use payrec_common::Secret;
use payrec_engine::{
    db_types::{Decision, Money, NewTransaction, NewTransactionItem, PaymentStatus, TxCode},
    events::EventProducers,
    test_utils::prepare_env::{prepare_test_env, random_db_path},
    GatewayClient,
    GatewayError,
    GatewayStatus,
    GatewayStatusReport,
    ReconDatabase,
    Reconciler,
    SqliteDatabase,
    TransitionAuthority,
};
use sqlx::{migrate::MigrateDatabase, Sqlite};

use crate::{
    data_objects::{JsonResponse, TransactionView, VerdictResponse},
    helpers::calculate_hmac,
    middleware::{HmacMiddlewareFactory, OperatorAuthMiddlewareFactory},
    routes::{force_status, get_invoice, get_transaction, list_stale, register_transaction, ServerOptions},
    server::SIGNATURE_HEADER,
    webhook_routes::payment_webhook,
};

const TEST_HMAC_KEY: &str = "test-server-key";
const TEST_API_KEY: &str = "operator-key-123";

/// Builds the `t=...,v1=...` signature header the way the gateway does: HMAC over `"{timestamp}.{body}"`.
fn sign_payload(key: &str, timestamp: i64, payload: &str) -> String {
    let signed = format!("{timestamp}.{payload}");
    format!("t={timestamp},v1={}", calculate_hmac(key, signed.as_bytes()))
}

#[derive(Clone, Default)]
struct StubGateway {
    responses: Arc<Mutex<HashMap<String, GatewayStatusReport>>>,
}

impl StubGateway {
    fn set_status(&self, gateway_ref: &str, status: GatewayStatus, event_id: &str) {
        let report = GatewayStatusReport {
            gateway_ref: gateway_ref.to_string(),
            transaction_id: event_id.to_string(),
            status,
            gross_amount: None,
            transaction_time: None,
        };
        self.responses.lock().unwrap().insert(gateway_ref.to_string(), report);
    }
}

impl GatewayClient for StubGateway {
    async fn lookup_status(&self, gateway_ref: &str) -> Result<GatewayStatusReport, GatewayError> {
        self.responses
            .lock()
            .unwrap()
            .get(gateway_ref)
            .cloned()
            .ok_or_else(|| GatewayError::UnknownReference(gateway_ref.to_string()))
    }
}

async fn new_reconciler() -> (SqliteDatabase, Reconciler<SqliteDatabase, StubGateway>, StubGateway) {
    let url = random_db_path();
    prepare_test_env(&url).await;
    let db = SqliteDatabase::new_with_url(&url, 5).await.expect("Error creating database");
    let gateway = StubGateway::default();
    let authority = TransitionAuthority::new(db.clone(), EventProducers::default());
    let reconciler = Reconciler::new(authority, gateway.clone());
    (db, reconciler, gateway)
}

async fn tear_down(mut db: SqliteDatabase) {
    let url = db.url().to_string();
    let _ = db.close().await;
    Sqlite::drop_database(&url).await.unwrap();
}

fn sample_transaction(code: &str) -> NewTransaction {
    NewTransaction::new(TxCode::from(code.to_string()), format!("gw-{code}"), "buyer-7".to_string(), Money::from(99_000))
        .with_item(NewTransactionItem {
            product_ref: "course-7".to_string(),
            description: "Intro to Tidal Patterns".to_string(),
            quantity: 1,
            unit_price: Money::from(99_000),
        })
}

#[actix_web::test]
async fn webhook_accepts_then_supersedes_duplicates() {
    let (db, reconciler, _gateway) = new_reconciler().await;
    reconciler.authority().register_transaction(sample_transaction("TX-W1")).await.unwrap();
    let app = test::init_service(
        App::new().app_data(web::Data::new(reconciler)).service(
            web::scope("/webhook")
                .wrap(HmacMiddlewareFactory::new(SIGNATURE_HEADER, Secret::new(TEST_HMAC_KEY.to_string()), true))
                .service(
                    web::resource("/payment").route(web::post().to(payment_webhook::<SqliteDatabase, StubGateway>)),
                ),
        ),
    )
    .await;

    let payload = serde_json::json!({
        "order_code": "TX-W1",
        "event_id": "evt-1",
        "transaction_status": "settlement",
        "gross_amount": "990.00"
    })
    .to_string();
    let signature = sign_payload(TEST_HMAC_KEY, chrono::Utc::now().timestamp(), &payload);

    let req = test::TestRequest::post()
        .uri("/webhook/payment")
        .insert_header(("Content-Type", "application/json"))
        .insert_header((SIGNATURE_HEADER, signature.clone()))
        .set_payload(payload.clone())
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: JsonResponse = test::read_body_json(resp).await;
    assert!(body.success);

    // The gateway redelivers the identical notification; still 200, nothing changes
    let req = test::TestRequest::post()
        .uri("/webhook/payment")
        .insert_header(("Content-Type", "application/json"))
        .insert_header((SIGNATURE_HEADER, signature))
        .set_payload(payload)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let code = TxCode::from("TX-W1".to_string());
    let tx = db.fetch_transaction(&code).await.unwrap().unwrap();
    assert_eq!(tx.status, PaymentStatus::Settled);
    let records = db.fetch_transitions(&code).await.unwrap();
    assert_eq!(records.iter().filter(|r| r.decision == Decision::Accepted).count(), 1);
    tear_down(db).await;
}

#[actix_web::test]
async fn webhook_with_bad_signature_is_rejected_at_the_boundary() {
    let (db, reconciler, _gateway) = new_reconciler().await;
    reconciler.authority().register_transaction(sample_transaction("TX-W2")).await.unwrap();
    let app = test::init_service(
        App::new().app_data(web::Data::new(reconciler)).service(
            web::scope("/webhook")
                .wrap(HmacMiddlewareFactory::new(SIGNATURE_HEADER, Secret::new(TEST_HMAC_KEY.to_string()), true))
                .service(
                    web::resource("/payment").route(web::post().to(payment_webhook::<SqliteDatabase, StubGateway>)),
                ),
        ),
    )
    .await;

    let payload = serde_json::json!({
        "order_code": "TX-W2",
        "event_id": "evt-2",
        "transaction_status": "settlement"
    })
    .to_string();
    let now = chrono::Utc::now().timestamp();
    let forged = sign_payload("some-other-key", now, &payload);

    let req = test::TestRequest::post()
        .uri("/webhook/payment")
        .insert_header(("Content-Type", "application/json"))
        .insert_header((SIGNATURE_HEADER, forged))
        .set_payload(payload.clone())
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    // A correctly signed but replayed notification is also turned away
    let replayed = sign_payload(TEST_HMAC_KEY, now - 3600, &payload);
    let req = test::TestRequest::post()
        .uri("/webhook/payment")
        .insert_header(("Content-Type", "application/json"))
        .insert_header((SIGNATURE_HEADER, replayed))
        .set_payload(payload.clone())
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    // No header at all is equally forbidden
    let req = test::TestRequest::post()
        .uri("/webhook/payment")
        .insert_header(("Content-Type", "application/json"))
        .set_payload(payload)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    // The forged call never reached the authority
    let code = TxCode::from("TX-W2".to_string());
    let tx = db.fetch_transaction(&code).await.unwrap().unwrap();
    assert_eq!(tx.status, PaymentStatus::Initiated);
    assert!(db.fetch_transitions(&code).await.unwrap().is_empty());
    tear_down(db).await;
}

#[actix_web::test]
async fn operator_endpoints_require_the_api_key() {
    let (db, reconciler, _gateway) = new_reconciler().await;
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(reconciler))
            .app_data(web::Data::new(ServerOptions { stale_threshold: chrono::Duration::minutes(5) }))
            .service(
                web::scope("/api")
                    .wrap(OperatorAuthMiddlewareFactory::new(Secret::new(TEST_API_KEY.to_string())))
                    .service(
                        web::resource("/stale").route(web::get().to(list_stale::<SqliteDatabase, StubGateway>)),
                    ),
            ),
    )
    .await;

    let req = test::TestRequest::get().uri("/api/stale").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let req = test::TestRequest::get()
        .uri("/api/stale")
        .insert_header(("Authorization", "Bearer wrong-key"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let req = test::TestRequest::get()
        .uri("/api/stale")
        .insert_header(("Authorization", format!("Bearer {TEST_API_KEY}")))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    tear_down(db).await;
}

#[actix_web::test]
async fn force_status_persists_the_override_reason() {
    let (db, reconciler, _gateway) = new_reconciler().await;
    reconciler.authority().register_transaction(sample_transaction("TX-M1")).await.unwrap();
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(reconciler))
            .service(
                web::scope("/api")
                    .wrap(OperatorAuthMiddlewareFactory::new(Secret::new(TEST_API_KEY.to_string())))
                    .service(
                        web::resource("/force-status")
                            .route(web::post().to(force_status::<SqliteDatabase, StubGateway>)),
                    )
                    .service(
                        web::resource("/transaction/{code}")
                            .route(web::get().to(get_transaction::<SqliteDatabase, StubGateway>)),
                    ),
            ),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/api/force-status")
        .insert_header(("Authorization", format!("Bearer {TEST_API_KEY}")))
        .set_json(serde_json::json!({
            "code": "TX-M1",
            "status": "Settled",
            "reason": "confirmed with gateway support, ref 8812"
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let verdict: VerdictResponse = test::read_body_json(resp).await;
    assert_eq!(verdict.decision, "accepted");

    let req = test::TestRequest::get()
        .uri("/api/transaction/TX-M1")
        .insert_header(("Authorization", format!("Bearer {TEST_API_KEY}")))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let view: TransactionView = test::read_body_json(resp).await;
    assert_eq!(view.transaction.status, PaymentStatus::Settled);
    let override_record = view.transitions.iter().find(|r| r.is_override).expect("override record must exist");
    assert_eq!(override_record.override_reason.as_deref(), Some("confirmed with gateway support, ref 8812"));
    tear_down(db).await;
}

#[actix_web::test]
async fn missing_reason_is_a_bad_request() {
    let (db, reconciler, _gateway) = new_reconciler().await;
    reconciler.authority().register_transaction(sample_transaction("TX-M2")).await.unwrap();
    let app = test::init_service(
        App::new().app_data(web::Data::new(reconciler)).service(
            web::scope("/api")
                .wrap(OperatorAuthMiddlewareFactory::new(Secret::new(TEST_API_KEY.to_string())))
                .service(
                    web::resource("/force-status").route(web::post().to(force_status::<SqliteDatabase, StubGateway>)),
                ),
        ),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/api/force-status")
        .insert_header(("Authorization", format!("Bearer {TEST_API_KEY}")))
        .set_json(serde_json::json!({ "code": "TX-M2", "status": "Settled", "reason": "  " }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    tear_down(db).await;
}

#[actix_web::test]
async fn recheck_and_reads_round_trip() {
    let (db, reconciler, gateway) = new_reconciler().await;
    reconciler.authority().register_transaction(sample_transaction("TX-P1")).await.unwrap();
    gateway.set_status("gw-TX-P1", GatewayStatus::Settlement, "evt-p1");
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(reconciler))
            .service(
                web::scope("/api")
                    .wrap(OperatorAuthMiddlewareFactory::new(Secret::new(TEST_API_KEY.to_string())))
                    .service(
                        web::resource("/transactions")
                            .route(web::post().to(register_transaction::<SqliteDatabase, StubGateway>)),
                    )
                    .service(
                        web::resource("/recheck/{code}")
                            .route(web::post().to(crate::routes::recheck::<SqliteDatabase, StubGateway>)),
                    )
                    .service(
                        web::resource("/invoice/{code}")
                            .route(web::get().to(get_invoice::<SqliteDatabase, StubGateway>)),
                    ),
            ),
    )
    .await;

    // No invoice before settlement
    let req = test::TestRequest::get()
        .uri("/api/invoice/TX-P1")
        .insert_header(("Authorization", format!("Bearer {TEST_API_KEY}")))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    // Operator re-check pulls the settled state from the gateway
    let req = test::TestRequest::post()
        .uri("/api/recheck/TX-P1")
        .insert_header(("Authorization", format!("Bearer {TEST_API_KEY}")))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let verdict: VerdictResponse = test::read_body_json(resp).await;
    assert_eq!(verdict.decision, "accepted");
    assert_eq!(verdict.new, Some(PaymentStatus::Settled));

    // Re-registering the same transaction is idempotent
    let req = test::TestRequest::post()
        .uri("/api/transactions")
        .insert_header(("Authorization", format!("Bearer {TEST_API_KEY}")))
        .set_json(sample_transaction("TX-P1"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK, "existing transaction answers 200, not 201");

    let code = TxCode::from("TX-P1".to_string());
    let tx = db.fetch_transaction(&code).await.unwrap().unwrap();
    assert_eq!(tx.status, PaymentStatus::Settled);
    tear_down(db).await;
}
