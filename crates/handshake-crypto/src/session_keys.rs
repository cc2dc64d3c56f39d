//! HKDF-SHA256 session key derivation.
//!
//! A completed handshake yields an X25519 shared secret; this module turns
//! that shared secret into a 32-byte symmetric session key bound to this
//! protocol via a fixed `info` string, so the same shared secret used by a
//! different protocol would never produce the same key.

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{CryptoError, SESSION_HKDF_INFO};

/// A derived session key (32 bytes). Zeroized on drop, never persisted.
#[derive(ZeroizeOnDrop)]
pub struct SessionKey([u8; 32]);

impl SessionKey {
    /// Derive a session key from an X25519 shared secret via HKDF-SHA256.
    ///
    /// Uses `SESSION_HKDF_INFO` as the `info` parameter and no salt, per the
    /// handshake's wire contract.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::KeyDerivationFailed`] if the HKDF expand step
    /// rejects the requested output length (never happens for 32 bytes, but
    /// surfaced rather than unwrapped).
    pub fn derive(shared_secret: &[u8]) -> Result<Self, CryptoError> {
        let hk = Hkdf::<Sha256>::new(None, shared_secret);
        let mut okm = [0u8; 32];
        hk.expand(SESSION_HKDF_INFO, &mut okm)
            .map_err(|_| CryptoError::KeyDerivationFailed)?;
        Ok(Self(okm))
    }

    /// Get the raw key bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl Clone for SessionKey {
    fn clone(&self) -> Self {
        Self(self.0)
    }
}

impl Drop for SessionKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}
