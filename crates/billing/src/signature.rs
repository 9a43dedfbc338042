//! Stripe webhook signature verification
//!
//! Stripe signs `"{t}.{raw_body}"` with HMAC-SHA256 keyed by the endpoint's
//! signing secret and sends `Stripe-Signature: t=<unix>,v1=<hex>[,v1=<hex>...]`.
//! Verification runs on the exact bytes received, before any parsing.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Parsed `Stripe-Signature` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeader {
    pub timestamp: i64,
    /// Every `v1` entry; more than one is sent while a secret is being rolled.
    pub signatures: Vec<String>,
}

impl SignatureHeader {
    /// Parse the header. Returns `None` without a numeric `t` or without any `v1`.
    pub fn parse(header: &str) -> Option<Self> {
        let mut timestamp = None;
        let mut signatures = Vec::new();

        for part in header.split(',') {
            if let Some((key, value)) = part.trim().split_once('=') {
                match key {
                    "t" => timestamp = value.parse::<i64>().ok(),
                    "v1" if !value.is_empty() => signatures.push(value.to_string()),
                    _ => {}
                }
            }
        }

        if signatures.is_empty() {
            return None;
        }
        Some(Self {
            timestamp: timestamp?,
            signatures,
        })
    }

    /// Whether the signing time is within `tolerance_secs` of `now` (either direction).
    /// A tolerance of zero accepts any timestamp.
    pub fn is_fresh(&self, now: i64, tolerance_secs: u64) -> bool {
        if tolerance_secs == 0 {
            return true;
        }
        now.abs_diff(self.timestamp) <= tolerance_secs
    }
}

/// Hex HMAC-SHA256 of `"{timestamp}.{raw_body}"`.
pub fn compute_signature(raw_body: &[u8], timestamp: i64, secret: &str) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(raw_body);
    Some(hex::encode(mac.finalize().into_bytes()))
}

/// Check a `Stripe-Signature` header against the raw request body.
///
/// The whole secret string, `whsec_` prefix included, is the HMAC key.
/// Any matching `v1` entry verifies. Freshness is not checked here; see
/// [`SignatureHeader::is_fresh`].
pub fn verify_signature(raw_body: &[u8], header: &str, secret: &str) -> bool {
    if secret.is_empty() {
        return false;
    }
    let Some(parsed) = SignatureHeader::parse(header) else {
        return false;
    };
    let Some(expected) = compute_signature(raw_body, parsed.timestamp, secret) else {
        return false;
    };

    parsed
        .signatures
        .iter()
        .any(|candidate| bool::from(candidate.as_bytes().ct_eq(expected.as_bytes())))
}
