//! File-backed Identity Store, §4.2.
//!
//! Unlike a node identity that only ever needs its public key (the
//! original node identity discards its signing private key entirely), this
//! store's whole purpose is to persist and later re-derive the private
//! signing and key-exchange material, so it seals the full keypair set
//! rather than just deriving a public node id.

use std::path::{Path, PathBuf};

use handshake_crypto::identity::{self, Identity as CryptoIdentity, SealedIdentity};

use crate::error::Error;

const IDENTITY_PASSPHRASE_ENV: &str = "IDENTITY_PASSPHRASE";

/// An agent's long-term identity, held in memory after unsealing.
pub struct Identity {
    inner: CryptoIdentity,
}

impl Identity {
    /// This agent's stable id.
    #[must_use]
    pub fn agent_id(&self) -> &str {
        &self.inner.agent_id
    }

    /// The Ed25519 signing key material (32-byte seed).
    #[must_use]
    pub fn sign_priv(&self) -> &[u8; 32] {
        &self.inner.sign_priv
    }

    /// The Ed25519 public key.
    #[must_use]
    pub fn sign_pub(&self) -> &[u8; 32] {
        &self.inner.sign_pub
    }

    /// The X25519 key-exchange private key.
    #[must_use]
    pub fn kx_priv(&self) -> &[u8; 32] {
        &self.inner.kx_priv
    }

    /// The X25519 public key.
    #[must_use]
    pub fn kx_pub(&self) -> &[u8; 32] {
        &self.inner.kx_pub
    }

    /// Wrap an already-generated crypto identity, bypassing disk entirely.
    /// Used by engine tests that need an `Identity` without a passphrase or
    /// filesystem round trip.
    #[must_use]
    pub fn from_crypto(inner: CryptoIdentity) -> Self {
        Self { inner }
    }
}

/// Read the `IDENTITY_PASSPHRASE` environment variable.
///
/// # Errors
///
/// Returns [`Error::Fatal`] if the variable is unset — per §7, a missing
/// passphrase when loading or creating an identity is a fatal condition,
/// not a retryable one.
pub fn passphrase_from_env() -> Result<String, Error> {
    std::env::var(IDENTITY_PASSPHRASE_ENV)
        .map_err(|_| Error::Fatal(format!("{IDENTITY_PASSPHRASE_ENV} is not set")))
}

fn identity_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("id_agent_{name}.json"))
}

/// Load the identity for `name` from `dir`, or create and persist a fresh
/// one if no identity file exists yet.
///
/// # Errors
///
/// Returns [`Error::Identity`] for a wrong passphrase or corrupt file, and
/// [`Error::Io`] for filesystem failures. Never returns a partially
/// unsealed [`Identity`].
pub async fn load_or_create(dir: &Path, name: &str, passphrase: &str) -> Result<Identity, Error> {
    let path = identity_path(dir, name);

    if tokio::fs::try_exists(&path).await? {
        let bytes = tokio::fs::read(&path).await?;
        let sealed: SealedIdentity = serde_json::from_slice(&bytes)
            .map_err(|e| Error::Identity(format!("corrupt identity file: {e}")))?;
        let inner = identity::unseal(&sealed, passphrase)
            .map_err(|e| Error::Identity(format!("bad passphrase or corrupt identity: {e}")))?;
        return Ok(Identity { inner });
    }

    let fresh = generate(name);
    let sealed = identity::seal(&fresh, passphrase)
        .map_err(|e| Error::Identity(format!("failed to seal new identity: {e}")))?;
    write_atomic(&path, &sealed).await?;
    Ok(Identity { inner: fresh })
}

/// Re-seal the identity for `name` under a new passphrase, replacing the
/// file atomically.
///
/// # Errors
///
/// Returns [`Error::Identity`] if `old_passphrase` is wrong, and
/// [`Error::Io`] for filesystem failures.
pub async fn rotate(
    dir: &Path,
    name: &str,
    old_passphrase: &str,
    new_passphrase: &str,
) -> Result<(), Error> {
    let path = identity_path(dir, name);
    let bytes = tokio::fs::read(&path).await?;
    let sealed: SealedIdentity = serde_json::from_slice(&bytes)
        .map_err(|e| Error::Identity(format!("corrupt identity file: {e}")))?;

    let rotated = identity::rotate(&sealed, old_passphrase, new_passphrase)
        .map_err(|e| Error::Identity(format!("rotation failed: {e}")))?;

    write_atomic(&path, &rotated).await
}

async fn write_atomic(path: &Path, sealed: &SealedIdentity) -> Result<(), Error> {
    let bytes = serde_json::to_vec_pretty(sealed)
        .map_err(|e| Error::Identity(format!("failed to serialize identity: {e}")))?;

    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, &bytes).await?;
    tokio::fs::rename(&tmp_path, path).await?;
    Ok(())
}

fn generate(name: &str) -> CryptoIdentity {
    let suffix = handshake_crypto::random::random_8().unwrap_or([0u8; 8]);
    identity::generate(format!("{name}-{}", hex::encode(suffix)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_load_or_create_then_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let first = load_or_create(dir.path(), "alice", "pw").await.unwrap();
        let agent_id = first.agent_id().to_string();
        let sign_priv = *first.sign_priv();

        let second = load_or_create(dir.path(), "alice", "pw").await.unwrap();
        assert_eq!(second.agent_id(), agent_id);
        assert_eq!(*second.sign_priv(), sign_priv);
    }

    #[tokio::test]
    async fn test_wrong_passphrase_fails() {
        let dir = tempfile::tempdir().unwrap();
        load_or_create(dir.path(), "alice", "right").await.unwrap();

        let result = load_or_create(dir.path(), "alice", "wrong").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_rotate_changes_passphrase() {
        let dir = tempfile::tempdir().unwrap();
        load_or_create(dir.path(), "alice", "old").await.unwrap();
        rotate(dir.path(), "alice", "old", "new").await.unwrap();

        assert!(load_or_create(dir.path(), "alice", "old").await.is_err());
        assert!(load_or_create(dir.path(), "alice", "new").await.is_ok());
    }
}
