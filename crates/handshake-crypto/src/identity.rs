//! At-rest identity sealing: scrypt passphrase-based key derivation plus
//! AES-GCM, wrapping the four keys that make up an agent's long-term
//! identity (Ed25519 signing keypair, X25519 key-exchange keypair).
//!
//! The on-disk shape mirrors a self-describing sealed blob: KDF parameters
//! and AEAD nonce travel alongside the ciphertext so a passphrase change can
//! re-derive with different parameters without touching unrelated fields.

use scrypt::Params as ScryptParams;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::CryptoError;

const SCRYPT_LOG_N: u8 = 14; // N = 2^14
const SCRYPT_R: u32 = 8;
const SCRYPT_P: u32 = 1;
const CURRENT_VERSION: u8 = 1;

/// The plaintext identity material: an agent's long-term keypairs.
///
/// Zeroized on drop. Never serialized directly — only ever through
/// [`seal`]/[`unseal`].
#[derive(ZeroizeOnDrop)]
pub struct Identity {
    /// Stable logical name for this agent, carried through sealing.
    #[zeroize(skip)]
    pub agent_id: String,
    /// Ed25519 signing private key seed (32 bytes).
    pub sign_priv: [u8; 32],
    /// Ed25519 public key (32 bytes). Not secret, but zeroized alongside.
    pub sign_pub: [u8; 32],
    /// X25519 key-exchange private key (32 bytes).
    pub kx_priv: [u8; 32],
    /// X25519 public key (32 bytes). Not secret.
    pub kx_pub: [u8; 32],
}

/// scrypt parameters recorded alongside a sealed identity so `unseal` can
/// reproduce the same derived key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KdfParams {
    /// Always `"scrypt"`; present for forward-compatible format detection.
    pub name: String,
    /// `log2(N)` cost parameter.
    pub log_n: u8,
    /// Block size parameter.
    pub r: u32,
    /// Parallelization parameter.
    pub p: u32,
    /// Random 16-byte salt, base64.
    pub salt: String,
}

/// AEAD parameters recorded alongside a sealed identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AeadParams {
    /// Always `"aes-gcm"`.
    pub name: String,
    /// 12-byte nonce, base64.
    pub nonce: String,
}

/// The on-disk sealed identity file contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SealedIdentity {
    /// Format version, for future migration.
    pub version: u8,
    /// KDF parameters used to derive the sealing key from the passphrase.
    pub kdf: KdfParams,
    /// AEAD parameters used to seal the plaintext identity.
    pub aead: AeadParams,
    /// AES-GCM ciphertext of the serialized plaintext identity, base64.
    pub ciphertext: String,
}

#[derive(Serialize, Deserialize)]
struct PlaintextIdentity {
    agent_id: String,
    sign_priv: String,
    sign_pub: String,
    kx_priv: String,
    kx_pub: String,
}

/// Seal an [`Identity`] under a passphrase, producing a [`SealedIdentity`]
/// suitable for writing to disk.
///
/// # Errors
///
/// Returns [`CryptoError::KeyDerivationFailed`] if scrypt parameters are
/// rejected, or [`CryptoError::EncryptionFailed`] if sealing fails.
pub fn seal(identity: &Identity, passphrase: &str) -> Result<SealedIdentity, CryptoError> {
    let mut salt = [0u8; 16];
    crate::random::fill_random(&mut salt)?;

    let derived = derive_key(passphrase, &salt)?;

    let plaintext = PlaintextIdentity {
        agent_id: identity.agent_id.clone(),
        sign_priv: base64_encode(&identity.sign_priv),
        sign_pub: base64_encode(&identity.sign_pub),
        kx_priv: base64_encode(&identity.kx_priv),
        kx_pub: base64_encode(&identity.kx_pub),
    };
    let plaintext_bytes = serde_json::to_vec(&plaintext)
        .map_err(|e| CryptoError::MalformedEncoding(e.to_string()))?;

    let mut nonce_bytes = [0u8; 12];
    crate::random::fill_random(&mut nonce_bytes)?;

    let ciphertext = aead_seal(&derived, &nonce_bytes, &plaintext_bytes)?;

    Ok(SealedIdentity {
        version: CURRENT_VERSION,
        kdf: KdfParams {
            name: "scrypt".to_string(),
            log_n: SCRYPT_LOG_N,
            r: SCRYPT_R,
            p: SCRYPT_P,
            salt: base64_encode(&salt),
        },
        aead: AeadParams {
            name: "aes-gcm".to_string(),
            nonce: base64_encode(&nonce_bytes),
        },
        ciphertext: base64_encode(&ciphertext),
    })
}

/// Unseal a [`SealedIdentity`] with the given passphrase.
///
/// # Errors
///
/// Returns [`CryptoError::UnsupportedVersion`] for an unknown format version,
/// [`CryptoError::MalformedEncoding`] for corrupt base64/JSON/KDF params, or
/// [`CryptoError::DecryptionFailed`] if the passphrase is wrong or the
/// ciphertext has been tampered with.
pub fn unseal(sealed: &SealedIdentity, passphrase: &str) -> Result<Identity, CryptoError> {
    if sealed.version != CURRENT_VERSION {
        return Err(CryptoError::UnsupportedVersion(sealed.version));
    }
    if sealed.kdf.name != "scrypt" {
        return Err(CryptoError::MalformedEncoding(format!(
            "unsupported kdf: {}",
            sealed.kdf.name
        )));
    }

    let salt = base64_decode(&sealed.kdf.salt)?;
    let params = ScryptParams::new(sealed.kdf.log_n, sealed.kdf.r, sealed.kdf.p, 32)
        .map_err(|_| CryptoError::InvalidParameter("scrypt params".to_string()))?;
    let derived = derive_key_with_params(passphrase, &salt, params)?;

    let nonce_bytes = base64_decode(&sealed.aead.nonce)?;
    let ciphertext = base64_decode(&sealed.ciphertext)?;

    let plaintext_bytes = aead_open(&derived, &nonce_bytes, &ciphertext)?;
    let plaintext: PlaintextIdentity = serde_json::from_slice(&plaintext_bytes)
        .map_err(|e| CryptoError::MalformedEncoding(e.to_string()))?;

    Ok(Identity {
        agent_id: plaintext.agent_id,
        sign_priv: to_array(&base64_decode(&plaintext.sign_priv)?)?,
        sign_pub: to_array(&base64_decode(&plaintext.sign_pub)?)?,
        kx_priv: to_array(&base64_decode(&plaintext.kx_priv)?)?,
        kx_pub: to_array(&base64_decode(&plaintext.kx_pub)?)?,
    })
}

/// Generate a fresh identity: a new Ed25519 signing keypair and a new
/// X25519 key-exchange keypair, tagged with `agent_id`.
#[must_use]
pub fn generate(agent_id: impl Into<String>) -> Identity {
    use crate::signatures::SigningKey;
    use crate::x25519::PrivateKey as KxPrivateKey;
    use rand_core::OsRng;

    let sign_key = SigningKey::generate(&mut OsRng);
    let kx_priv = KxPrivateKey::generate(&mut OsRng);
    let kx_pub = kx_priv.public_key();

    Identity {
        agent_id: agent_id.into(),
        sign_priv: sign_key.to_bytes(),
        sign_pub: sign_key.verifying_key().to_bytes(),
        kx_priv: kx_priv.to_bytes(),
        kx_pub: kx_pub.to_bytes(),
    }
}

/// Re-seal an identity under a new passphrase. Callers should write the
/// result to a temp file and atomically rename over the original, so a
/// crash mid-rotation never leaves a half-written file.
///
/// # Errors
///
/// Propagates [`unseal`]'s errors if `old_passphrase` is wrong, or
/// [`seal`]'s errors if re-sealing fails.
pub fn rotate(
    sealed: &SealedIdentity,
    old_passphrase: &str,
    new_passphrase: &str,
) -> Result<SealedIdentity, CryptoError> {
    let identity = unseal(sealed, old_passphrase)?;
    seal(&identity, new_passphrase)
}

struct DerivedKey([u8; 32]);

impl Drop for DerivedKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

fn derive_key(passphrase: &str, salt: &[u8]) -> Result<DerivedKey, CryptoError> {
    let params = ScryptParams::new(SCRYPT_LOG_N, SCRYPT_R, SCRYPT_P, 32)
        .map_err(|_| CryptoError::InvalidParameter("scrypt params".to_string()))?;
    derive_key_with_params(passphrase, salt, params)
}

fn derive_key_with_params(
    passphrase: &str,
    salt: &[u8],
    params: ScryptParams,
) -> Result<DerivedKey, CryptoError> {
    let mut out = [0u8; 32];
    scrypt::scrypt(passphrase.as_bytes(), salt, &params, &mut out)
        .map_err(|_| CryptoError::KeyDerivationFailed)?;
    Ok(DerivedKey(out))
}

fn aead_seal(key: &DerivedKey, nonce: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    use aes_gcm::aead::{Aead, KeyInit, Payload};
    use aes_gcm::{Aes256Gcm, Key, Nonce};

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key.0));
    cipher
        .encrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: plaintext,
                aad: &[],
            },
        )
        .map_err(|_| CryptoError::EncryptionFailed)
}

fn aead_open(key: &DerivedKey, nonce: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    use aes_gcm::aead::{Aead, KeyInit, Payload};
    use aes_gcm::{Aes256Gcm, Key, Nonce};

    if nonce.len() != 12 {
        return Err(CryptoError::InvalidNonceLength);
    }
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key.0));
    cipher
        .decrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad: &[],
            },
        )
        .map_err(|_| CryptoError::DecryptionFailed)
}

fn to_array(bytes: &[u8]) -> Result<[u8; 32], CryptoError> {
    bytes
        .try_into()
        .map_err(|_| CryptoError::MalformedEncoding("expected 32 bytes".to_string()))
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

    fn sample_identity() -> Identity {
        Identity {
            agent_id: "alice".to_string(),
            sign_priv: [0x01u8; 32],
            sign_pub: [0x02u8; 32],
            kx_priv: [0x03u8; 32],
            kx_pub: [0x04u8; 32],
        }
    }

    #[test]
    fn test_seal_unseal_roundtrip() {
        let identity = sample_identity();
        let sealed = seal(&identity, "correct horse battery staple").unwrap();
        let recovered = unseal(&sealed, "correct horse battery staple").unwrap();

        assert_eq!(recovered.agent_id, identity.agent_id);
        assert_eq!(recovered.sign_priv, identity.sign_priv);
        assert_eq!(recovered.sign_pub, identity.sign_pub);
        assert_eq!(recovered.kx_priv, identity.kx_priv);
        assert_eq!(recovered.kx_pub, identity.kx_pub);
    }

    #[test]
    fn test_wrong_passphrase_fails_deterministically() {
        let identity = sample_identity();
        let sealed = seal(&identity, "right passphrase").unwrap();

        let result = unseal(&sealed, "wrong passphrase");
        assert!(matches!(result, Err(CryptoError::DecryptionFailed)));
    }

    #[test]
    fn test_corrupt_ciphertext_rejected() {
        let identity = sample_identity();
        let mut sealed = seal(&identity, "pw").unwrap();
        sealed.ciphertext = base64_encode(&[0u8; 48]);

        assert!(unseal(&sealed, "pw").is_err());
    }

    #[test]
    fn test_unsupported_version_rejected() {
        let identity = sample_identity();
        let mut sealed = seal(&identity, "pw").unwrap();
        sealed.version = 99;

        assert!(matches!(
            unseal(&sealed, "pw"),
            Err(CryptoError::UnsupportedVersion(99))
        ));
    }

    #[test]
    fn test_rotate_changes_passphrase() {
        let identity = sample_identity();
        let sealed = seal(&identity, "old pass").unwrap();
        let rotated = rotate(&sealed, "old pass", "new pass").unwrap();

        assert!(unseal(&rotated, "old pass").is_err());
        let recovered = unseal(&rotated, "new pass").unwrap();
        assert_eq!(recovered.sign_priv, identity.sign_priv);
    }
}
