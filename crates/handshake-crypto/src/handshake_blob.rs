//! Signed handshake blob (`hs`) — the bundle each side attaches to its first
//! `request`/`confirm` frame to assert identity and advertise an ephemeral
//! X25519 public key.
//!
//! The signature covers the canonical string `"nonce|kx_pub|timestamp"`,
//! where `kx_pub` is the base64 encoding carried in the blob itself — this
//! binds the signature to the exact bytes a verifier will parse, rather than
//! to some other in-memory representation.

use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::signatures::{Signature, SigningKey, VerifyingKey};
use crate::x25519::PublicKey as KxPublicKey;
use crate::CryptoError;

/// Which side of the handshake produced this blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandshakeBlobType {
    /// Sent by the initiator with its first `request`.
    Init,
    /// Sent by the responder with its `confirm`.
    Response,
}

/// The `hs` field of a bus frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakeBlob {
    /// Which side produced this blob.
    #[serde(rename = "type")]
    pub blob_type: HandshakeBlobType,
    /// Must equal the plaintext nonce carried in the enclosing frame.
    pub nonce: String,
    /// Sender's ephemeral X25519 public key, base64.
    pub kx_pub: String,
    /// Sender's long-term Ed25519 public key, base64.
    pub sign_pub: String,
    /// RFC 3339 timestamp of when the blob was signed.
    pub timestamp: String,
    /// Ed25519 signature (base64) over `"nonce|kx_pub|timestamp"`.
    pub sig: String,
}

/// Build and sign a handshake blob.
///
/// # Errors
///
/// Returns [`CryptoError::MalformedEncoding`] if the current time cannot be
/// formatted as RFC 3339 (never happens in practice).
pub fn build(
    blob_type: HandshakeBlobType,
    nonce: &str,
    kx_pub: &KxPublicKey,
    sign_priv: &SigningKey,
) -> Result<HandshakeBlob, CryptoError> {
    let timestamp = OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .map_err(|e| CryptoError::MalformedEncoding(e.to_string()))?;
    let kx_pub_b64 = base64_encode(kx_pub.as_bytes());
    let sign_pub_b64 = base64_encode(&sign_priv.verifying_key().to_bytes());

    let canonical = canonical_string(nonce, &kx_pub_b64, &timestamp);
    let sig = sign_priv.sign(canonical.as_bytes());

    Ok(HandshakeBlob {
        blob_type,
        nonce: nonce.to_string(),
        kx_pub: kx_pub_b64,
        sign_pub: sign_pub_b64,
        timestamp,
        sig: base64_encode(sig.as_bytes()),
    })
}

/// Verify a handshake blob's signature and TTL, returning the sender's
/// parsed signing and key-exchange public keys on success.
///
/// `ttl_seconds` bounds how far the blob's `timestamp` may drift from now in
/// either direction (duplicated clock skew leniency, matching the spec's
/// symmetric TTL window).
///
/// # Errors
///
/// Returns [`CryptoError::HandshakeRejected`] for malformed fields,
/// [`CryptoError::InvalidSignature`] if the signature does not verify, or
/// [`CryptoError::TtlExceeded`] if the timestamp is outside the TTL window.
pub fn verify(
    blob: &HandshakeBlob,
    ttl_seconds: i64,
) -> Result<(VerifyingKey, KxPublicKey), CryptoError> {
    let kx_pub_bytes = base64_decode(&blob.kx_pub)?;
    let sign_pub_bytes = base64_decode(&blob.sign_pub)?;
    let sig_bytes = base64_decode(&blob.sig)?;

    let kx_pub_arr: [u8; 32] = kx_pub_bytes
        .as_slice()
        .try_into()
        .map_err(|_| CryptoError::HandshakeRejected("kx_pub wrong length"))?;
    let sign_pub_arr: [u8; 32] = sign_pub_bytes
        .as_slice()
        .try_into()
        .map_err(|_| CryptoError::HandshakeRejected("sign_pub wrong length"))?;

    let sign_pub = VerifyingKey::from_bytes(&sign_pub_arr)?;
    let sig = Signature::from_slice(&sig_bytes)?;

    let canonical = canonical_string(&blob.nonce, &blob.kx_pub, &blob.timestamp);
    sign_pub
        .verify(canonical.as_bytes(), &sig)
        .map_err(|_| CryptoError::InvalidSignature)?;

    let blob_time = OffsetDateTime::parse(&blob.timestamp, &Rfc3339)
        .map_err(|_| CryptoError::HandshakeRejected("malformed timestamp"))?;
    let now = OffsetDateTime::now_utc();
    let drift = (now - blob_time).whole_seconds().abs();
    if drift > ttl_seconds {
        return Err(CryptoError::TtlExceeded);
    }

    Ok((sign_pub, KxPublicKey::from_bytes(kx_pub_arr)))
}

fn canonical_string(nonce: &str, kx_pub_b64: &str, timestamp: &str) -> String {
    format!("{nonce}|{kx_pub_b64}|{timestamp}")
}

fn base64_encode(bytes: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

fn base64_decode(s: &str) -> Result<Vec<u8>, CryptoError> {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD
        .decode(s)
        .map_err(|e| CryptoError::MalformedEncoding(e.to_string()))
}
