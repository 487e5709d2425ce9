//! Operator API-key middleware.
//!
//! The manual reconciliation endpoints can override the engine's invariants, so they sit behind a bearer token
//! checked here. The configured key and the presented key are compared through their SHA-256 digests, so the
//! comparison does not leak the match length.

use std::{
    future::{ready, Ready},
    rc::Rc,
};

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error,
};
use futures::future::LocalBoxFuture;
use log::{trace, warn};
use payrec_common::Secret;

use crate::{
    errors::{AuthError, ServerError},
    helpers::sha256_digest,
};

pub struct OperatorAuthMiddlewareFactory {
    key: Secret<String>,
}

impl OperatorAuthMiddlewareFactory {
    pub fn new(key: Secret<String>) -> Self {
        OperatorAuthMiddlewareFactory { key }
    }
}

impl<S, B> Transform<S, ServiceRequest> for OperatorAuthMiddlewareFactory
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Error = Error;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;
    type InitError = ();
    type Response = ServiceResponse<B>;
    type Transform = OperatorAuthMiddlewareService<S>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(OperatorAuthMiddlewareService { key: self.key.clone(), service: Rc::new(service) }))
    }
}

pub struct OperatorAuthMiddlewareService<S> {
    key: Secret<String>,
    service: Rc<S>,
}

impl<S, B> Service<ServiceRequest> for OperatorAuthMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;
    type Response = ServiceResponse<B>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = Rc::clone(&self.service);
        let expected = self.key.reveal().clone();
        Box::pin(async move {
            trace!("🔑️ Checking operator credentials");
            let presented = req
                .headers()
                .get("Authorization")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
                .map(|v| v.trim().to_string());
            let presented = match presented {
                Some(p) if !p.is_empty() => p,
                _ => {
                    warn!("🔑️ Operator call without credentials denied");
                    return Err(ServerError::AuthenticationError(AuthError::MissingCredentials).into());
                },
            };
            if sha256_digest(presented.as_bytes()) == sha256_digest(expected.as_bytes()) {
                trace!("🔑️ Operator credentials ✅️");
                service.call(req).await
            } else {
                warn!("🔑️ Operator call with an invalid API key denied");
                Err(ServerError::AuthenticationError(AuthError::InvalidApiKey).into())
            }
        })
    }
}
