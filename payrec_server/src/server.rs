use std::{
    future::Future,
    pin::Pin,
    time::Duration,
};

use actix_web::{
    dev::{Server, Service},
    http::KeepAlive,
    middleware::Logger,
    web,
    App,
    HttpServer,
};
use futures::{future::ok, FutureExt, TryFutureExt};
use log::{info, warn};
use payrec_engine::{
    events::{EventHandlers, EventHooks},
    Reconciler,
    SideEffectDispatcher,
    SqliteDatabase,
    TransitionAuthority,
};

use crate::{
    config::ServerConfig,
    errors::{AuthError, ServerError, ServerError::AuthenticationError},
    helpers::get_remote_ip,
    integrations::gateway::HttpGatewayClient,
    middleware::{HmacMiddlewareFactory, OperatorAuthMiddlewareFactory},
    poller::start_sweep_worker,
    routes::{
        force_status,
        get_invoice,
        get_transaction,
        health,
        list_stale,
        recheck,
        register_transaction,
        ServerOptions,
    },
    webhook_routes::{channel_webhook, payment_webhook},
};

/// The header the gateway delivers its `t=...,v1=...` payload signature in.
pub const SIGNATURE_HEADER: &str = "X-Payrec-Signature";

const EVENT_BUFFER_SIZE: usize = 64;

pub async fn run_server(config: ServerConfig) -> Result<(), ServerError> {
    let db = SqliteDatabase::new_with_url(&config.database_url, 25)
        .await
        .map_err(|e| ServerError::InitializeError(e.to_string()))?;
    let reconciler = build_reconciler(&config, db).await?;
    start_sweep_worker(reconciler.clone(), config.sweep_interval, config.stale_threshold);
    let srv = create_server_instance(config, reconciler)?;
    srv.await.map_err(|e| ServerError::Unspecified(e.to_string()))
}

/// Wires the full engine together: one store, one authority (and thus one lock registry), the side-effect
/// dispatcher and notification hook on the event channel, and the gateway client. Every worker and route handler
/// shares clones of this one reconciler, so per-transaction locking is process-wide.
pub async fn build_reconciler(
    config: &ServerConfig,
    db: SqliteDatabase,
) -> Result<Reconciler<SqliteDatabase, HttpGatewayClient>, ServerError> {
    let dispatcher = SideEffectDispatcher::new(db.clone());
    let mut hooks = EventHooks::default();
    hooks.on_transition_accepted(move |event| {
        let dispatcher = dispatcher.clone();
        Box::pin(async move { dispatcher.dispatch(event).await }) as Pin<Box<dyn Future<Output = ()> + Send>>
    });
    hooks.on_notification(|event| {
        // Fire-and-forget hand-off to the notification service; delivery is its concern.
        Box::pin(async move {
            info!(
                "🔔️ Buyer {} notified: transaction {} is now {}",
                event.transaction.buyer_id, event.transaction.code, event.transaction.status
            );
        }) as Pin<Box<dyn Future<Output = ()> + Send>>
    });
    let handlers = EventHandlers::new(EVENT_BUFFER_SIZE, hooks);
    let producers = handlers.producers();
    handlers.start_handlers().await;
    let authority = TransitionAuthority::new(db, producers);
    let gateway = HttpGatewayClient::new(&config.gateway)?;
    Ok(Reconciler::new(authority, gateway))
}

pub fn create_server_instance(
    config: ServerConfig,
    reconciler: Reconciler<SqliteDatabase, HttpGatewayClient>,
) -> Result<Server, ServerError> {
    let host = config.host.clone();
    let port = config.port;
    // One Data instance created up front: worker threads share it instead of building their own engine state.
    let recon_data = web::Data::new(reconciler);
    let options = web::Data::new(ServerOptions { stale_threshold: config.stale_threshold });
    let srv = HttpServer::new(move || {
        let app = App::new()
            .wrap(Logger::new("%t (%D ms) %s %a %{Host}i %U").log_target("payrec::access_log"))
            .app_data(recon_data.clone())
            .app_data(options.clone());
        // Operator routes sit behind the API key
        let api_scope = web::scope("/api")
            .wrap(OperatorAuthMiddlewareFactory::new(config.operator_api_key.clone()))
            .service(
                web::resource("/transactions")
                    .route(web::post().to(register_transaction::<SqliteDatabase, HttpGatewayClient>)),
            )
            .service(
                web::resource("/transaction/{code}")
                    .route(web::get().to(get_transaction::<SqliteDatabase, HttpGatewayClient>)),
            )
            .service(
                web::resource("/invoice/{code}")
                    .route(web::get().to(get_invoice::<SqliteDatabase, HttpGatewayClient>)),
            )
            .service(
                web::resource("/recheck/{code}").route(web::post().to(recheck::<SqliteDatabase, HttpGatewayClient>)),
            )
            .service(
                web::resource("/force-status")
                    .route(web::post().to(force_status::<SqliteDatabase, HttpGatewayClient>)),
            )
            .service(web::resource("/stale").route(web::get().to(list_stale::<SqliteDatabase, HttpGatewayClient>)));
        let use_x_forwarded_for = config.use_x_forwarded_for;
        let whitelist = config.gateway.whitelist.clone();
        let webhook_scope = web::scope("/webhook")
            .wrap_fn(move |req, srv| {
                // Check the peer against the gateway IP whitelist, if one is configured.
                let peer_ip = get_remote_ip(req.request(), use_x_forwarded_for);
                let whitelisted = match (peer_ip, &whitelist) {
                    (Some(ip), Some(whitelist)) => {
                        info!("Gateway webhook from {ip}");
                        whitelist.contains(&ip)
                    },
                    (_, None) => true,
                    (None, Some(_)) => {
                        warn!("No IP address found in webhook request, denying access.");
                        false
                    },
                };
                if whitelisted {
                    srv.call(req).map_ok(|res| res.map_into_boxed_body()).boxed_local()
                } else {
                    ok(req.error_response(AuthenticationError(AuthError::ForbiddenPeer)).map_into_boxed_body())
                        .boxed_local()
                }
            })
            .wrap(HmacMiddlewareFactory::new(
                SIGNATURE_HEADER,
                config.gateway.server_key.clone(),
                config.gateway.hmac_checks,
            ))
            .service(
                web::resource("/payment")
                    .route(web::post().to(payment_webhook::<SqliteDatabase, HttpGatewayClient>)),
            )
            .service(
                web::resource("/channel")
                    .route(web::post().to(channel_webhook::<SqliteDatabase, HttpGatewayClient>)),
            );
        app.service(health).service(api_scope).service(webhook_scope)
    })
    .keep_alive(KeepAlive::Timeout(Duration::from_secs(600)))
    .bind((host.as_str(), port))?
    .run();
    Ok(srv)
}
