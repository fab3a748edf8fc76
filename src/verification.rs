use base64::Engine as _;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Header Shopify uses to carry the base64 HMAC of the raw request body.
pub const SHOPIFY_HMAC_HEADER: &str = "x-shopify-hmac-sha256";

/// Compute the base64-encoded HMAC-SHA256 of `body` keyed with `secret`.
pub fn compute_signature(body: &[u8], secret: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key size");
    mac.update(body);
    base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes())
}

/// Verify a Shopify-style webhook signature.
///
/// `body` must be the exact bytes received on the wire. A missing header is
/// treated like any other non-matching signature.
pub fn verify_shopify_hmac(body: &[u8], claimed: Option<&str>, secret: &[u8]) -> bool {
    let Some(claimed) = claimed else {
        return false;
    };

    let computed = compute_signature(body, secret);
    let (computed, claimed) = (computed.as_bytes(), claimed.as_bytes());

    if computed.len() != claimed.len() {
        return false;
    }

    computed.ct_eq(claimed).into()
}
