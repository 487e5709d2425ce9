//! Webhook signature middleware for Actix Web.
//!
//! The gateway signs every notification it delivers: it takes the delivery timestamp and the raw request body,
//! computes HMAC-SHA256 over `"{timestamp}.{body}"` with the shared server key, and sends
//!
//! ```text
//! X-Payrec-Signature: t=<unix seconds>,v1=<base64 hmac>
//! ```
//!
//! Verification re-derives the signature from the raw bytes and additionally bounds the timestamp to a small
//! window, so a captured notification cannot be replayed later to flip a transaction a second time. Signatures are
//! compared through their SHA-256 digests, not byte-by-byte.
//!
//! Wrap the webhook scope with this middleware so that a forged, corrupted or replayed notification is rejected
//! before it ever reaches the transition authority.

use std::{
    future::{ready, Ready},
    rc::Rc,
};

use actix_http::h1;
use actix_web::{
    dev::{forward_ready, Payload, Service, ServiceRequest, ServiceResponse, Transform},
    error::{ErrorBadRequest, ErrorForbidden},
    web,
    Error,
};
use chrono::Utc;
use futures::future::LocalBoxFuture;
use log::{trace, warn};
use payrec_common::Secret;
use thiserror::Error;

use crate::helpers::{calculate_hmac, sha256_digest};

/// How far a notification's `t=` may drift from our clock before it is treated as a replay.
const SIGNATURE_TOLERANCE_SECS: i64 = 300;

pub struct HmacMiddlewareFactory {
    signature_header: String,
    key: Secret<String>,
    // If false, then the middleware will not check the signature and always allow the call
    enabled: bool,
}

impl HmacMiddlewareFactory {
    pub fn new(signature_header: &str, key: Secret<String>, enabled: bool) -> Self {
        HmacMiddlewareFactory { signature_header: signature_header.into(), key, enabled }
    }
}

impl<S, B> Transform<S, ServiceRequest> for HmacMiddlewareFactory
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Error = Error;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;
    type InitError = ();
    type Response = ServiceResponse<B>;
    type Transform = HmacMiddlewareService<S>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(HmacMiddlewareService {
            signature_header: self.signature_header.clone(),
            key: self.key.clone(),
            enabled: self.enabled,
            service: Rc::new(service),
        }))
    }
}

pub struct HmacMiddlewareService<S> {
    signature_header: String,
    key: Secret<String>,
    enabled: bool,
    service: Rc<S>,
}

impl<S, B> Service<ServiceRequest> for HmacMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;
    type Response = ServiceResponse<B>;

    forward_ready!(service);

    fn call(&self, mut req: ServiceRequest) -> Self::Future {
        let service = Rc::clone(&self.service);
        let secret = self.key.reveal().clone();
        let signature_header = self.signature_header.clone();
        let enabled = self.enabled;
        Box::pin(async move {
            trace!("🔐️ Checking signature for request");
            if !enabled {
                trace!("🔐️ Signature checks are disabled. Allowing request.");
                return service.call(req).await;
            }
            let data = req.extract::<web::Bytes>().await.map_err(|e| {
                warn!("🔐️ Failed to extract request data: {:?}", e);
                ErrorBadRequest("Failed to extract request data.")
            })?;
            let header = req.headers().get(&signature_header).and_then(|v| v.to_str().ok()).ok_or_else(|| {
                warn!("🔐️ No signature found in request. Denying access.");
                ErrorForbidden("No signature found.")
            })?;
            match verify_signature(&secret, header, data.as_ref(), Utc::now().timestamp()) {
                Ok(()) => {
                    trace!("🔐️ Signature check for request ✅️");
                    req.set_payload(bytes_to_payload(data));
                    service.call(req).await
                },
                Err(e) => {
                    warn!("🔐️ {e}. Denying access.");
                    Err(ErrorForbidden("Invalid signature."))
                },
            }
        })
    }
}

#[derive(Debug, Clone, Error)]
enum SignatureError {
    #[error("The signature header is not in t=...,v1=... form")]
    Malformed,
    #[error("The signature timestamp is {0}s away from our clock; replay window exceeded")]
    Stale(i64),
    #[error("The signature does not match the payload")]
    Mismatch,
}

/// Splits `t=<unix seconds>,v1=<base64>` into its parts. Unknown fields are ignored so the gateway can add
/// scheme versions without breaking older servers.
fn parse_signature_header(value: &str) -> Option<(i64, &str)> {
    let mut timestamp = None;
    let mut signature = None;
    for part in value.split(',') {
        match part.trim().split_once('=') {
            Some(("t", v)) => timestamp = v.parse::<i64>().ok(),
            Some(("v1", v)) => signature = Some(v),
            _ => {},
        }
    }
    Some((timestamp?, signature?))
}

fn verify_signature(secret: &str, header: &str, body: &[u8], now: i64) -> Result<(), SignatureError> {
    let (timestamp, provided) = parse_signature_header(header).ok_or(SignatureError::Malformed)?;
    let drift = (now - timestamp).abs();
    if drift > SIGNATURE_TOLERANCE_SECS {
        return Err(SignatureError::Stale(drift));
    }
    let mut signed = format!("{timestamp}.").into_bytes();
    signed.extend_from_slice(body);
    let expected = calculate_hmac(secret, &signed);
    if sha256_digest(provided.as_bytes()) == sha256_digest(expected.as_bytes()) {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

fn bytes_to_payload(buf: web::Bytes) -> Payload {
    let (_, mut pl) = h1::Payload::create(true);
    pl.unread_data(buf);
    Payload::from(pl)
}

#[cfg(test)]
mod test {
    use super::*;

    const KEY: &str = "server-key";
    const BODY: &[u8] = b"{\"order_code\":\"TX-1\"}";

    fn sign(key: &str, timestamp: i64, body: &[u8]) -> String {
        let mut signed = format!("{timestamp}.").into_bytes();
        signed.extend_from_slice(body);
        format!("t={timestamp},v1={}", calculate_hmac(key, &signed))
    }

    #[test]
    fn valid_signature_passes() {
        let now = 1_760_000_000;
        let header = sign(KEY, now, BODY);
        assert!(verify_signature(KEY, &header, BODY, now).is_ok());
        // A little clock drift is fine
        assert!(verify_signature(KEY, &header, BODY, now + 120).is_ok());
    }

    #[test]
    fn wrong_key_or_body_is_a_mismatch() {
        let now = 1_760_000_000;
        let header = sign("some-other-key", now, BODY);
        assert!(matches!(verify_signature(KEY, &header, BODY, now), Err(SignatureError::Mismatch)));
        let header = sign(KEY, now, BODY);
        assert!(matches!(verify_signature(KEY, &header, b"tampered", now), Err(SignatureError::Mismatch)));
    }

    #[test]
    fn replayed_timestamp_is_rejected() {
        let then = 1_760_000_000;
        let header = sign(KEY, then, BODY);
        // The signature itself is valid, but the delivery is outside the replay window
        let result = verify_signature(KEY, &header, BODY, then + SIGNATURE_TOLERANCE_SECS + 60);
        assert!(matches!(result, Err(SignatureError::Stale(_))));
    }

    #[test]
    fn malformed_headers_are_rejected() {
        let now = 1_760_000_000;
        for header in ["", "v1=abc", "t=123", "t=abc,v1=def", "nonsense"] {
            assert!(matches!(verify_signature(KEY, header, BODY, now), Err(SignatureError::Malformed)), "{header}");
        }
        // Unknown fields are tolerated as long as t and v1 are present
        let header = format!("{},v2=future", sign(KEY, now, BODY));
        assert!(verify_signature(KEY, &header, BODY, now).is_ok());
    }
}
