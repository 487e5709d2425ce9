use std::{env, net::IpAddr, time::Duration};

use chrono::Duration as ChronoDuration;
use log::*;
use payrec_common::{helpers::parse_boolean_flag, Secret};

const DEFAULT_PAYREC_HOST: &str = "127.0.0.1";
const DEFAULT_PAYREC_PORT: u16 = 8480;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 120;
const DEFAULT_STALE_THRESHOLD_MINS: i64 = 5;
const DEFAULT_GATEWAY_TIMEOUT_SECS: u64 = 10;

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    /// If true, the X-Forwarded-For header will be used to determine the client's IP address, rather than the
    /// connection's remote address.
    pub use_x_forwarded_for: bool,
    /// How often the backfill sweep runs.
    pub sweep_interval: Duration,
    /// How long a transaction may sit in a non-terminal status before the sweep re-checks it against the gateway.
    /// Webhooks are normally fast, so a few minutes is plenty.
    pub stale_threshold: ChronoDuration,
    /// The bearer token operators must present on `/api` calls.
    pub operator_api_key: Secret<String>,
    /// Payment gateway configuration
    pub gateway: GatewayConfig,
}

#[derive(Clone, Debug, Default)]
pub struct GatewayConfig {
    /// Base URL of the gateway's API, e.g. "https://api.gateway.example".
    pub base_url: String,
    /// The shared server key. Signs webhook payloads and authenticates status lookups.
    pub server_key: Secret<String>,
    /// If false, webhook HMAC verification is skipped and every call is let through. Test rigs only.
    pub hmac_checks: bool,
    /// If supplied, requests against /webhook endpoints will be checked against a whitelist of gateway IP
    /// addresses. To explicitly disable the whitelist, set the env var to "false", "none", or "0".
    pub whitelist: Option<Vec<IpAddr>>,
    /// Timeout on outbound status lookups. Lookups past this are transient failures, retried on the next sweep.
    pub lookup_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_PAYREC_HOST.to_string(),
            port: DEFAULT_PAYREC_PORT,
            database_url: String::default(),
            use_x_forwarded_for: false,
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            stale_threshold: ChronoDuration::minutes(DEFAULT_STALE_THRESHOLD_MINS),
            operator_api_key: Secret::new(String::default()),
            gateway: GatewayConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn new(host: &str, port: u16) -> Self {
        Self { host: host.to_string(), port, ..Default::default() }
    }

    pub fn from_env_or_default() -> Self {
        let host = env::var("PAYREC_HOST").ok().unwrap_or_else(|| DEFAULT_PAYREC_HOST.into());
        let port = env::var("PAYREC_PORT")
            .map(|s| {
                s.parse::<u16>().unwrap_or_else(|e| {
                    error!(
                        "🪛️ {s} is not a valid port for PAYREC_PORT. {e} Using the default, {DEFAULT_PAYREC_PORT}, \
                         instead."
                    );
                    DEFAULT_PAYREC_PORT
                })
            })
            .ok()
            .unwrap_or(DEFAULT_PAYREC_PORT);
        let database_url = env::var("PAYREC_DATABASE_URL").ok().unwrap_or_else(|| {
            error!("🪛️ PAYREC_DATABASE_URL is not set. Please set it to the URL for the payrec database.");
            String::default()
        });
        let use_x_forwarded_for = parse_boolean_flag(env::var("PAYREC_USE_X_FORWARDED_FOR").ok(), false);
        let sweep_interval = env::var("PAYREC_SWEEP_INTERVAL_SECS")
            .map_err(|_| {
                info!(
                    "🪛️ PAYREC_SWEEP_INTERVAL_SECS is not set. Using the default value of \
                     {DEFAULT_SWEEP_INTERVAL_SECS} s."
                )
            })
            .and_then(|s| {
                s.parse::<u64>()
                    .map(Duration::from_secs)
                    .map_err(|e| warn!("🪛️ Invalid configuration value for PAYREC_SWEEP_INTERVAL_SECS. {e}"))
            })
            .ok()
            .unwrap_or(Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS));
        let stale_threshold = env::var("PAYREC_STALE_THRESHOLD_MINS")
            .map_err(|_| {
                info!(
                    "🪛️ PAYREC_STALE_THRESHOLD_MINS is not set. Using the default value of \
                     {DEFAULT_STALE_THRESHOLD_MINS} min."
                )
            })
            .and_then(|s| {
                s.parse::<i64>()
                    .map(ChronoDuration::minutes)
                    .map_err(|e| warn!("🪛️ Invalid configuration value for PAYREC_STALE_THRESHOLD_MINS. {e}"))
            })
            .ok()
            .unwrap_or(ChronoDuration::minutes(DEFAULT_STALE_THRESHOLD_MINS));
        let operator_api_key = match env::var("PAYREC_OPERATOR_API_KEY") {
            Ok(key) if !key.trim().is_empty() => Secret::new(key),
            _ => {
                let key = format!("{:032x}", rand::random::<u128>());
                warn!(
                    "🚨️🚨️🚨️ PAYREC_OPERATOR_API_KEY has not been set. I'm using a random value for this session: \
                     {key}. DO NOT operate like this in production; set the environment variable instead. 🚨️🚨️🚨️"
                );
                Secret::new(key)
            },
        };
        let gateway = GatewayConfig::from_env_or_defaults();
        Self { host, port, database_url, use_x_forwarded_for, sweep_interval, stale_threshold, operator_api_key, gateway }
    }
}

impl GatewayConfig {
    pub fn from_env_or_defaults() -> Self {
        let base_url = env::var("PAYREC_GATEWAY_URL").ok().unwrap_or_else(|| {
            error!("🪛️ PAYREC_GATEWAY_URL is not set. Please set it to the base URL of the payment gateway API.");
            String::default()
        });
        let server_key = env::var("PAYREC_GATEWAY_SERVER_KEY").ok().unwrap_or_else(|| {
            error!(
                "🪛️ PAYREC_GATEWAY_SERVER_KEY is not set. Please set it to the shared server key for your gateway \
                 account."
            );
            String::default()
        });
        let server_key = Secret::new(server_key);
        let hmac_checks = parse_boolean_flag(env::var("PAYREC_GATEWAY_HMAC_CHECKS").ok(), true);
        if !hmac_checks {
            warn!("🚨️ Webhook HMAC checks are disabled. Anyone can post payment notifications. Test rigs only!");
        }
        let whitelist = env::var("PAYREC_GATEWAY_IP_WHITELIST").ok().and_then(|s| {
            if ["none", "false", "0"].contains(&s.to_lowercase().as_str()) {
                info!(
                    "🪛️ Gateway IP whitelist is disabled. If this is not what you want, set \
                     PAYREC_GATEWAY_IP_WHITELIST to a comma-separated list of IP addresses to enable it."
                );
                return None;
            }
            let ip_addrs = s
                .split(',')
                .filter_map(|s| {
                    s.trim()
                        .parse()
                        .map_err(|e| {
                            warn!("🪛️ Ignoring invalid IP address ({s}) in PAYREC_GATEWAY_IP_WHITELIST: {e}");
                            None::<IpAddr>
                        })
                        .ok()
                })
                .collect::<Vec<IpAddr>>();
            Some(ip_addrs)
        });
        match &whitelist {
            Some(whitelist) if whitelist.is_empty() => {
                warn!(
                    "🚨️ The gateway IP whitelist was configured, but is empty. The server will run, but won't \
                     authorise any incoming gateway requests."
                );
            },
            None => {
                info!("🪛️ No gateway IP whitelist is set. Only HMAC validation will be used.");
            },
            Some(v) => {
                let addrs = v.iter().map(|a| a.to_string()).collect::<Vec<_>>().join(", ");
                info!("🪛️ Gateway IP whitelist: {addrs}");
            },
        }
        let lookup_timeout = env::var("PAYREC_GATEWAY_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(DEFAULT_GATEWAY_TIMEOUT_SECS));
        Self { base_url, server_key, hmac_checks, whitelist, lookup_timeout }
    }
}
