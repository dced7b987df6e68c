//! HMAC-SHA256 request signing.
//!
//! The caller signs the raw request body with the shared worker secret and
//! sends the hex digest in the [`SIGNATURE_HEADER`] header. Verification
//! runs over the exact bytes received, before any JSON parsing.

use hmac::{Hmac, Mac};
use sha2::Sha256;

/// Name of the header carrying the hex-encoded body signature.
pub const SIGNATURE_HEADER: &str = "x-signature";

type HmacSha256 = Hmac<Sha256>;

/// Compute the lowercase hex HMAC-SHA256 of `body` under `secret`.
pub fn compute_signature(secret: &str, body: &[u8]) -> String {
    let mut mac = new_mac(secret);
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Check `signature` (hex, either case) against `body`.
///
/// Missing, empty, or non-hex signatures are rejected outright. The digest
/// comparison itself is constant-time.
pub fn verify_signature(secret: &str, body: &[u8], signature: Option<&str>) -> bool {
    let Some(signature) = signature.map(str::trim).filter(|s| !s.is_empty()) else {
        return false;
    };
    let Ok(expected) = hex::decode(signature) else {
        return false;
    };
    let mut mac = new_mac(secret);
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

fn new_mac(secret: &str) -> HmacSha256 {
    HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length")
}
