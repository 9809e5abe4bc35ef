//! Webhook signature verification.
//!
//! The upstream scheduling system signs each webhook body with
//! HMAC-SHA256 over the raw bytes and sends `sha256=<hex>` in the
//! `X-Webhook-Signature` header. Verification must run on the body
//! exactly as received: reserializing parsed JSON would not reproduce
//! the original byte stream.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-webhook-signature";

const ALGORITHM_TAG: &str = "sha256=";

/// Computes the signature header value for `body`.
pub fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        // HMAC accepts keys of any length.
        Err(_) => return String::new(),
    };
    mac.update(body);
    format!("{ALGORITHM_TAG}{}", hex::encode(mac.finalize().into_bytes()))
}

/// Verifies `signature_header` against the raw request body.
///
/// `secret = None` means verification is deliberately disabled and every
/// request passes; callers are expected to log that condition loudly.
pub fn verify(body: &[u8], signature_header: &str, secret: Option<&str>) -> bool {
    let Some(secret) = secret else {
        return true;
    };

    let expected = sign(secret, body);
    constant_time_eq(expected.as_bytes(), signature_header.trim().as_bytes())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}
