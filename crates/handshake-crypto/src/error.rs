//! Cryptographic error types.

use thiserror::Error;

/// Cryptographic errors
#[derive(Debug, Error)]
pub enum CryptoError {
    /// AEAD encryption failed
    #[error("encryption failed")]
    EncryptionFailed,

    /// AEAD decryption failed (authentication failure)
    #[error("decryption failed: authentication failure")]
    DecryptionFailed,

    /// Invalid key length
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength {
        /// Expected length
        expected: usize,
        /// Actual length
        actual: usize,
    },

    /// Invalid nonce length
    #[error("invalid nonce length")]
    InvalidNonceLength,

    /// Invalid signature
    #[error("invalid signature")]
    InvalidSignature,

    /// Invalid public key encoding
    #[error("invalid public key")]
    InvalidPublicKey,

    /// Handshake blob signature or structure rejected
    #[error("handshake blob rejected: {0}")]
    HandshakeRejected(&'static str),

    /// Handshake or envelope timestamp outside the allowed TTL window
    #[error("timestamp outside TTL window")]
    TtlExceeded,

    /// Secure envelope integrity hash did not match the decrypted plaintext
    #[error("envelope hash mismatch")]
    HashMismatch,

    /// Random number generation failed
    #[error("random number generation failed")]
    RandomFailed,

    /// An invalid parameter was supplied to a KDF or cipher constructor
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Key derivation failed
    #[error("key derivation failed")]
    KeyDerivationFailed,

    /// Malformed base64/JSON encoding of a crypto structure
    #[error("malformed encoding: {0}")]
    MalformedEncoding(String),

    /// Unsupported identity-file format version
    #[error("unsupported identity format version: {0}")]
    UnsupportedVersion(u8),
}
