#![allow(dead_code)]
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use log::*;
use payrec_engine::{
    db_types::{Money, NewTransaction, NewTransactionItem, TxCode},
    test_utils::prepare_env::{prepare_test_env, random_db_path},
    GatewayClient,
    GatewayError,
    GatewayStatus,
    GatewayStatusReport,
    ReconDatabase,
    SqliteDatabase,
};
use sqlx::{migrate::MigrateDatabase, Sqlite};

pub async fn setup() -> SqliteDatabase {
    let url = random_db_path();
    prepare_test_env(&url).await;
    SqliteDatabase::new_with_url(&url, 5).await.expect("Error creating database")
}

pub async fn tear_down(mut db: SqliteDatabase) {
    let url = db.url().to_string();
    if let Err(e) = db.close().await {
        error!("🚀️ Failed to close database: {e}");
    }
    Sqlite::drop_database(&url).await.unwrap();
}

pub fn new_transaction(code: &str) -> NewTransaction {
    NewTransaction::new(TxCode::from(code.to_string()), format!("gw-{code}"), "buyer-1".to_string(), Money::from(150_000))
        .with_item(NewTransactionItem {
            product_ref: "ebook-42".to_string(),
            description: "A Field Guide to Reconciliation".to_string(),
            quantity: 1,
            unit_price: Money::from(150_000),
        })
}

/// An in-memory gateway: tests decide what each order reference reports, or make a reference fail outright.
#[derive(Clone, Default)]
pub struct StubGateway {
    responses: Arc<Mutex<HashMap<String, GatewayStatusReport>>>,
}

impl StubGateway {
    pub fn set_status(&self, gateway_ref: &str, status: GatewayStatus, event_id: &str) {
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
