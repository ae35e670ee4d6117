//! HMAC signature computation and verification.
//!
//! Every provider signs the raw request body with a shared secret. The digest
//! algorithm and header encoding vary per provider; the comparison does not:
//! it is always constant-time via [`subtle::ConstantTimeEq`].
//!
//! [`Digest::Sha1`] exists only for the deploy platform, which has never
//! offered anything stronger. New providers use [`Digest::Sha256`].

use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::{Digest as _, Sha256};
use subtle::ConstantTimeEq;

/// HMAC digest algorithm used by a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Digest {
    Sha256,
    /// Legacy. Kept for backward compatibility with the deploy platform.
    Sha1,
}

/// Computes the HMAC of `payload` keyed by `secret`.
///
/// Returns `None` only if the MAC cannot be keyed, which HMAC never refuses
/// in practice since it accepts keys of any length.
pub fn compute_signature(digest: Digest, payload: &[u8], secret: &[u8]) -> Option<Vec<u8>> {
    match digest {
        Digest::Sha256 => {
            let mut mac = Hmac::<Sha256>::new_from_slice(secret).ok()?;
            mac.update(payload);
            Some(mac.finalize().into_bytes().to_vec())
        }
        Digest::Sha1 => {
            let mut mac = Hmac::<Sha1>::new_from_slice(secret).ok()?;
            mac.update(payload);
            Some(mac.finalize().into_bytes().to_vec())
        }
    }
}

/// Decodes a hex signature, optionally stripping a `<prefix>=` marker.
///
/// With `prefix = Some("sha256")` the header must start with `sha256=`; with
/// `None` the whole header is hex. Returns `None` for anything malformed.
pub fn parse_signature_header(header: &str, prefix: Option<&str>) -> Option<Vec<u8>> {
    let hex_sig = match prefix {
        Some(prefix) => header.trim().strip_prefix(prefix)?.strip_prefix('=')?,
        None => header.trim(),
    };
    hex::decode(hex_sig).ok()
}

/// Verifies `provided` against the HMAC of `payload` in constant time.
pub fn verify_signature(digest: Digest, payload: &[u8], provided: &[u8], secret: &[u8]) -> bool {
    match compute_signature(digest, payload, secret) {
        Some(expected) => expected.ct_eq(provided).into(),
        None => false,
    }
}

/// Hex-encoded SHA-256 of arbitrary content, used for content-hash
/// idempotency keys.
pub fn content_hash(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}
