//! # Handshake Crypto
//!
//! Cryptographic primitives for the handshake engine.
//!
//! This crate provides:
//! - Ephemeral X25519 key exchange
//! - Ed25519 signatures for handshake blobs and secure envelopes
//! - HKDF-SHA256 session key derivation
//! - AES-GCM secure envelope seal/open
//! - scrypt-based identity-at-rest sealing
//! - Constant-time comparison helpers
//!
//! ## Cryptographic Suite
//!
//! | Function | Algorithm | Security Level |
//! |----------|-----------|----------------|
//! | Key Exchange | X25519 | 128-bit |
//! | Session KDF | HKDF-SHA256 | 128-bit |
//! | AEAD | AES-256-GCM | 256-bit key |
//! | Signatures | Ed25519 | 128-bit |
//! | Identity KDF | scrypt (N=2^14, r=8, p=1) | memory-hard |

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod constant_time;
pub mod envelope;
pub mod error;
pub mod handshake_blob;
pub mod identity;
pub mod random;
pub mod session_keys;
pub mod signatures;
pub mod x25519;

pub use error::CryptoError;

/// X25519 public key size
pub const X25519_PUBLIC_KEY_SIZE: usize = 32;

/// X25519 secret key size
pub const X25519_SECRET_KEY_SIZE: usize = 32;

/// AES-256-GCM key size
pub const AES_GCM_KEY_SIZE: usize = 32;

/// AES-GCM nonce size
pub const AES_GCM_NONCE_SIZE: usize = 12;

/// SHA-256 output size
pub const SHA256_OUTPUT_SIZE: usize = 32;

/// Ed25519 public key size
pub const ED25519_PUBLIC_KEY_SIZE: usize = 32;

/// Ed25519 secret key size
pub const ED25519_SECRET_KEY_SIZE: usize = 32;

/// Ed25519 signature size
pub const ED25519_SIGNATURE_SIZE: usize = 64;

/// HKDF `info` string binding derived session keys to this protocol.
pub const SESSION_HKDF_INFO: &[u8] = b"summoner-session-v1";
