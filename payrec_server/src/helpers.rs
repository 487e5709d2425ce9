use std::{net::IpAddr, str::FromStr};

use actix_web::HttpRequest;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// HMAC-SHA256 over the given data with the shared server key, base64-encoded. The gateway signs
/// `"{timestamp}.{raw body}"` with this and puts the result in the `v1=` field of the signature header.
pub fn calculate_hmac(secret: &str, data: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(data);
    base64::encode(mac.finalize().into_bytes())
}

/// Fixed-width digest used to compare secrets and signatures without leaking the match length.
pub fn sha256_digest(value: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(value);
    hasher.finalize().into()
}

/// Get the remote IP address from the request. The `X-Forwarded-For` header is consulted first, iif
/// `use_x_forwarded_for` is set to true in the configuration; otherwise the peer address from the connection info
/// is used.
pub fn get_remote_ip(req: &HttpRequest, use_x_forwarded_for: bool) -> Option<IpAddr> {
    let forwarded = use_x_forwarded_for
        .then(|| {
            req.headers()
                .get("X-Forwarded-For")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.split(',').next())
                .and_then(|s| IpAddr::from_str(s.trim()).ok())
        })
        .flatten();
    forwarded.or_else(|| {
        let peer_addr = req.connection_info().peer_addr().map(|a| a.to_string());
        peer_addr.and_then(|s| {
            // The peer address may or may not carry a port
            IpAddr::from_str(&s).ok().or_else(|| s.rsplit_once(':').and_then(|(ip, _)| IpAddr::from_str(ip).ok()))
        })
    })
}
