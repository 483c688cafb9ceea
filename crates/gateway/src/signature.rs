use hmac::{Hmac, Mac};
use sha2::Sha256;

/// Verify a webhook signature (`X-Hub-Signature-256`).
///
/// The header carries `sha256=<hex>` over the raw request body, keyed with
/// the tenant's webhook secret. Comparison is constant time via
/// `Mac::verify_slice`. Returns true iff the signature is valid.
pub fn verify_signature(secret: &str, body: &[u8], signature_header: &str) -> bool {
    let Some(hex_sig) = signature_header.strip_prefix("sha256=") else {
        return false;
    };

    let Ok(expected) = hex::decode(hex_sig) else {
        return false;
    };

    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);

    mac.verify_slice(&expected).is_ok()
}

/// Produce the signature header value for a body and secret. Used by tests
/// and by outbound webhook replays.
pub fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}
