use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};
use subtle::ConstantTimeEq;

/// Digest used by a merchant protocol to sign request bodies.
///
/// Every protocol signs the same way: hash of the raw JSON body followed by
/// the project's secret key, hex encoded. Only the digest differs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureAlgorithm {
    Sha1,
    Sha256,
    Sha512,
}

/// Compute the signature of `payload` for `secret_key`.
pub fn compute_signature(algorithm: SignatureAlgorithm, payload: &[u8], secret_key: &str) -> String {
    match algorithm {
        SignatureAlgorithm::Sha1 => digest_hex::<Sha1>(payload, secret_key),
        SignatureAlgorithm::Sha256 => digest_hex::<Sha256>(payload, secret_key),
        SignatureAlgorithm::Sha512 => digest_hex::<Sha512>(payload, secret_key),
    }
}

/// Receiver-side check of a signature produced by [`compute_signature`].
pub fn verify_signature(
    algorithm: SignatureAlgorithm,
    payload: &[u8],
    secret_key: &str,
    signature_hex: &str,
) -> bool {
    let Ok(received) = hex::decode(signature_hex.trim()) else {
        return false;
    };
    let Ok(expected) = hex::decode(compute_signature(algorithm, payload, secret_key)) else {
        return false;
    };

    received.as_slice().ct_eq(expected.as_slice()).into()
}

/// Parse an `Authorization: Signature <hex>` header value.
pub fn parse_authorization_header(value: &str) -> Option<&str> {
    let (scheme, signature) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("signature") {
        return None;
    }
    let signature = signature.trim();
    if signature.is_empty() {
        None
    } else {
        Some(signature)
    }
}

/// Stable notification id: sha256 of order id followed by event name.
pub fn notification_id(order_id: &str, event: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(order_id.as_bytes());
    hasher.update(event.as_bytes());
    hex::encode(hasher.finalize())
}

fn digest_hex<D: Digest>(payload: &[u8], secret_key: &str) -> String {
    let mut hasher = D::new();
    hasher.update(payload);
    hasher.update(secret_key.as_bytes());
    hex::encode(hasher.finalize())
}
