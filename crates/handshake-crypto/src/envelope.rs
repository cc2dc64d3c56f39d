//! AES-GCM secure envelope (`sec`) — the sealed wrapper around an application
//! `message` carried over the bus once a session key has been derived.
//!
//! The envelope is signed as well as encrypted: the signature covers the
//! canonical JSON of the envelope (nonce, ciphertext, plaintext hash,
//! timestamp), so a recipient can detect tampering with the AEAD framing
//! itself before even attempting to decrypt.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::signatures::{Signature, SigningKey, VerifyingKey};
use crate::CryptoError;

/// Current UTC time as RFC 3339, for stamping a freshly sealed envelope.
#[must_use]
pub fn now_iso8601() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

/// The `sec` envelope carried in a bus frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// 12-byte AES-GCM nonce, base64.
    pub nonce: String,
    /// AEAD ciphertext (covers the serialized plaintext message), base64.
    pub ciphertext: String,
    /// SHA-256 of the plaintext, base64 — checked after decryption.
    pub hash: String,
    /// ISO-8601 timestamp of when the envelope was sealed.
    pub ts: String,
}

/// A `sec` frame field: the envelope plus its signature over the envelope's
/// canonical JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecureEnvelope {
    /// The sealed envelope.
    pub envelope: Envelope,
    /// Ed25519 signature (base64) over `canonical_json(envelope)`.
    pub sig: String,
}

/// Seal a JSON `message` value into a `sec` envelope using the given session
/// key and signing key.
///
/// # Errors
///
/// Returns [`CryptoError::EncryptionFailed`] if AES-GCM sealing fails, or
/// [`CryptoError::MalformedEncoding`] if the message cannot be serialized.
pub fn seal(
    session_key: &[u8; 32],
    sign_priv: &SigningKey,
    message: &serde_json::Value,
    now_iso8601: &str,
) -> Result<SecureEnvelope, CryptoError> {
    let plaintext = serde_json::to_vec(message)
        .map_err(|e| CryptoError::MalformedEncoding(e.to_string()))?;

    let mut nonce_bytes = [0u8; 12];
    crate::random::fill_random(&mut nonce_bytes)?;

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(session_key));
    let nonce = Nonce::from_slice(&nonce_bytes);
    let ciphertext = cipher
        .encrypt(
            nonce,
            Payload {
                msg: &plaintext,
                aad: &[],
            },
        )
        .map_err(|_| CryptoError::EncryptionFailed)?;

    let hash = Sha256::digest(&plaintext);

    let envelope = Envelope {
        nonce: base64_encode(&nonce_bytes),
        ciphertext: base64_encode(&ciphertext),
        hash: base64_encode(&hash),
        ts: now_iso8601.to_string(),
    };

    let canonical = canonical_json(&envelope)?;
    let sig = sign_priv.sign(canonical.as_bytes());

    Ok(SecureEnvelope {
        envelope,
        sig: base64_encode(sig.as_bytes()),
    })
}

/// Open a `sec` envelope: verify the signature, decrypt, and verify the
/// plaintext hash, returning the original JSON `message`.
///
/// # Errors
///
/// Returns [`CryptoError::InvalidSignature`] if the envelope signature does
/// not verify, [`CryptoError::DecryptionFailed`] if AEAD authentication
/// fails, [`CryptoError::HashMismatch`] if the decrypted plaintext does not
/// match the declared hash, or [`CryptoError::MalformedEncoding`] for
/// malformed base64/JSON.
pub fn open(
    session_key: &[u8; 32],
    peer_sign_pub: &VerifyingKey,
    sealed: &SecureEnvelope,
) -> Result<serde_json::Value, CryptoError> {
    let canonical = canonical_json(&sealed.envelope)?;
    let sig_bytes = base64_decode(&sealed.sig)?;
    let sig = Signature::from_slice(&sig_bytes).map_err(|_| CryptoError::InvalidSignature)?;
    peer_sign_pub
        .verify(canonical.as_bytes(), &sig)
        .map_err(|_| CryptoError::InvalidSignature)?;

    let nonce_bytes = base64_decode(&sealed.envelope.nonce)?;
    if nonce_bytes.len() != 12 {
        return Err(CryptoError::InvalidNonceLength);
    }
    let ciphertext = base64_decode(&sealed.envelope.ciphertext)?;

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(session_key));
    let nonce = Nonce::from_slice(&nonce_bytes);
    let plaintext = cipher
        .decrypt(
            nonce,
            Payload {
                msg: &ciphertext,
                aad: &[],
            },
        )
        .map_err(|_| CryptoError::DecryptionFailed)?;

    let expected_hash = base64_decode(&sealed.envelope.hash)?;
    let actual_hash = Sha256::digest(&plaintext);
    if actual_hash.as_slice() != expected_hash.as_slice() {
        return Err(CryptoError::HashMismatch);
    }

    serde_json::from_slice(&plaintext).map_err(|e| CryptoError::MalformedEncoding(e.to_string()))
}

/// Canonical JSON of the envelope for signing: the struct's declared field
/// order (nonce, ciphertext, hash, ts) serialized with serde_json, which both
/// sides of the handshake produce identically since they share this type.
fn canonical_json(envelope: &Envelope) -> Result<String, CryptoError> {
    serde_json::to_string(envelope).map_err(|e| CryptoError::MalformedEncoding(e.to_string()))
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

#[cfg(test)]
mod tests {
    use super::*;
    use rand_core::OsRng;

    #[test]
    fn test_seal_open_roundtrip() {
        let signing_key = SigningKey::generate(&mut OsRng);
        let verifying_key = signing_key.verifying_key();
        let session_key = [0x11u8; 32];
        let message = serde_json::json!({"hello": "world", "n": 42});

        let sealed = seal(&session_key, &signing_key, &message, "2026-07-26T00:00:00Z").unwrap();
        let opened = open(&session_key, &verifying_key, &sealed).unwrap();

        assert_eq!(opened, message);
    }

    #[test]
    fn test_wrong_session_key_fails_decryption() {
        let signing_key = SigningKey::generate(&mut OsRng);
        let verifying_key = signing_key.verifying_key();
        let session_key = [0x11u8; 32];
        let wrong_key = [0x22u8; 32];
        let message = serde_json::json!("secret payload");

        let sealed = seal(&session_key, &signing_key, &message, "2026-07-26T00:00:00Z").unwrap();
        let result = open(&wrong_key, &verifying_key, &sealed);

        assert!(matches!(result, Err(CryptoError::DecryptionFailed)));
    }

    #[test]
    fn test_tampered_signature_fails() {
        let signing_key = SigningKey::generate(&mut OsRng);
        let other_key = SigningKey::generate(&mut OsRng);
        let wrong_verifier = other_key.verifying_key();
        let session_key = [0x33u8; 32];
        let message = serde_json::json!("payload");

        let sealed = seal(&session_key, &signing_key, &message, "2026-07-26T00:00:00Z").unwrap();
        let result = open(&session_key, &wrong_verifier, &sealed);

        assert!(matches!(result, Err(CryptoError::InvalidSignature)));
    }

    #[test]
    fn test_tampered_hash_detected() {
        let signing_key = SigningKey::generate(&mut OsRng);
        let verifying_key = signing_key.verifying_key();
        let session_key = [0x44u8; 32];
        let message = serde_json::json!("payload");

        let mut sealed = seal(&session_key, &signing_key, &message, "2026-07-26T00:00:00Z").unwrap();
        // Corrupt the declared hash but keep the signature as originally computed
        // over a *different* hash value — this should now fail signature
        // verification since the signed canonical JSON includes the hash field.
        sealed.envelope.hash = base64_encode(&[0u8; 32]);

        let result = open(&session_key, &verifying_key, &sealed);
        assert!(result.is_err());
    }
}
