//! The reqwest-based implementation of the engine's [`GatewayClient`] trait.
//!
//! One endpoint matters to reconciliation: the status lookup by gateway order reference. The client authenticates
//! with the shared server key (HTTP basic auth, key as username) and bounds every call with the configured
//! timeout, so a wedged gateway stalls a single sweep item rather than the whole sweep.
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::*;
use payrec_common::Money;
use payrec_engine::{GatewayClient, GatewayError, GatewayStatus, GatewayStatusReport};
use reqwest::{
    header::{HeaderMap, HeaderValue},
    Client,
    StatusCode,
};
use serde::Deserialize;

use crate::{config::GatewayConfig, errors::ServerError};

#[derive(Clone)]
pub struct HttpGatewayClient {
    base_url: String,
    client: Arc<Client>,
}

impl HttpGatewayClient {
    pub fn new(config: &GatewayConfig) -> Result<Self, ServerError> {
        let mut headers = HeaderMap::with_capacity(2);
        let credentials = base64::encode(format!("{}:", config.server_key.reveal()));
        let val = HeaderValue::from_str(&format!("Basic {credentials}"))
            .map_err(|e| ServerError::InitializeError(e.to_string()))?;
        headers.insert("Authorization", val);
        headers.insert("Accept", HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.lookup_timeout)
            .build()
            .map_err(|e| ServerError::InitializeError(e.to_string()))?;
        Ok(Self { base_url: config.base_url.trim_end_matches('/').to_string(), client: Arc::new(client) })
    }
}

impl GatewayClient for HttpGatewayClient {
    async fn lookup_status(&self, gateway_ref: &str) -> Result<GatewayStatusReport, GatewayError> {
        let url = format!("{}/v2/{gateway_ref}/status", self.base_url);
        trace!("🌐️ Gateway status lookup: {url}");
        let response = self.client.get(&url).send().await.map_err(|e| {
            if e.is_timeout() {
                GatewayError::Transient(format!("status lookup timed out: {e}"))
            } else {
                GatewayError::Transient(e.to_string())
            }
        })?;
        match response.status() {
            s if s.is_success() => {
                let raw: RawStatusResponse =
                    response.json().await.map_err(|e| GatewayError::Protocol(e.to_string()))?;
                Ok(raw.into_report())
            },
            StatusCode::NOT_FOUND => Err(GatewayError::UnknownReference(gateway_ref.to_string())),
            s => {
                let message = response.text().await.unwrap_or_default();
                Err(GatewayError::Transient(format!("gateway answered {s}: {message}")))
            },
        }
    }
}

/// The wire shape of the gateway's status response.
#[derive(Debug, Clone, Deserialize)]
struct RawStatusResponse {
    order_id: String,
    transaction_id: String,
    transaction_status: GatewayStatus,
    #[serde(default)]
    gross_amount: Option<String>,
    #[serde(default)]
    transaction_time: Option<DateTime<Utc>>,
}

impl RawStatusResponse {
    fn into_report(self) -> GatewayStatusReport {
        let gross_amount = self.gross_amount.as_deref().and_then(parse_gateway_amount);
        GatewayStatusReport {
            gateway_ref: self.order_id,
            transaction_id: self.transaction_id,
            status: self.transaction_status,
            gross_amount,
            transaction_time: self.transaction_time,
        }
    }
}

/// The gateway reports amounts as decimal strings ("150000.00"). Convert to minor units.
fn parse_gateway_amount(raw: &str) -> Option<Money> {
    let (major, minor) = match raw.split_once('.') {
        Some((major, minor)) => (major, minor),
        None => (raw, "0"),
    };
    let major: i64 = major.parse().ok()?;
    let minor: i64 = format!("{:0<2}", minor.chars().take(2).collect::<String>()).parse().ok()?;
    Some(Money::from(major * 100 + minor))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn amount_parsing() {
        assert_eq!(parse_gateway_amount("150000.00"), Some(Money::from(15_000_000)));
        assert_eq!(parse_gateway_amount("25.5"), Some(Money::from(2_550)));
        assert_eq!(parse_gateway_amount("99"), Some(Money::from(9_900)));
        assert_eq!(parse_gateway_amount("not-a-number"), None);
    }
}
