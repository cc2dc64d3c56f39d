//! Per-peer, per-role FSM row storage, §3/§4.5.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::error::RoleStateError;
use crate::fsm::Role;

/// Optional crypto metadata captured once a handshake has been verified.
#[derive(Debug, Clone, Default)]
pub struct PeerCryptoMeta {
    /// Peer's long-term Ed25519 public key, base64, once observed.
    pub peer_sign_pub: Option<String>,
    /// Peer's ephemeral X25519 public key, base64, once observed.
    pub peer_kx_pub: Option<String>,
    /// Unix seconds of the last verified handshake blob.
    pub last_handshake_at: Option<i64>,
    /// Unix seconds of the last secure message exchanged.
    pub last_secure_message_at: Option<i64>,
}

/// One row: the complete FSM and session state for a `(self, role, peer)`
/// conversation.
#[derive(Debug, Clone)]
pub struct RoleState {
    /// Current FSM state, stringly-named to stay role-agnostic at the
    /// storage layer (`fsm` interprets it per track).
    pub state: String,
    /// Last nonce this side emitted and is waiting to be echoed.
    pub local_nonce: Option<String>,
    /// Last nonce the peer emitted that this side must echo next.
    pub peer_nonce: Option<String>,
    /// This side's session reference.
    pub local_reference: Option<String>,
    /// The peer's session reference.
    pub peer_reference: Option<String>,
    /// Completed request/respond rounds in the current session.
    pub exchange_count: u32,
    /// Bounded retry counter in finalize states.
    pub finalize_retry_count: u32,
    /// Last observed transport address (informational only).
    pub peer_address: Option<String>,
    /// Optional captured crypto metadata.
    pub crypto: PeerCryptoMeta,
}

impl RoleState {
    /// A freshly created row for a given role, defaulting to that role's
    /// ready state per §3's lifecycle rule.
    #[must_use]
    pub fn fresh(role: Role) -> Self {
        Self {
            state: role.ready_state().to_string(),
            local_nonce: None,
            peer_nonce: None,
            local_reference: None,
            peer_reference: None,
            exchange_count: 0,
            finalize_retry_count: 0,
            peer_address: None,
            crypto: PeerCryptoMeta::default(),
        }
    }
}

/// Identifies a single role-state row.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoleStateKey {
    /// This agent's id.
    pub self_id: String,
    /// Which track this row belongs to.
    pub role: Role,
    /// The peer's id.
    pub peer_id: String,
}

impl RoleStateKey {
    /// Build a key.
    pub fn new(self_id: impl Into<String>, role: Role, peer_id: impl Into<String>) -> Self {
        Self {
            self_id: self_id.into(),
            role,
            peer_id: peer_id.into(),
        }
    }
}

/// Concurrent, per-row-locked store of [`RoleState`] rows. Different peers'
/// rows never contend on each other's lock.
#[derive(Default)]
pub struct RoleStateStore {
    rows: DashMap<RoleStateKey, Arc<Mutex<RoleState>>>,
}

impl RoleStateStore {
    /// Construct an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the row for `key`, creating it with `RoleState::fresh` if it
    /// does not yet exist.
    #[must_use]
    pub fn get_or_create(&self, key: &RoleStateKey) -> Arc<Mutex<RoleState>> {
        self.rows
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(RoleState::fresh(key.role))))
            .clone()
    }

    /// Read a snapshot of the row for `key`.
    ///
    /// # Errors
    ///
    /// Returns [`RoleStateError::NotFound`] if no row exists for `key`.
    pub async fn read(&self, key: &RoleStateKey) -> Result<RoleState, RoleStateError> {
        let row = self.rows.get(key).ok_or(RoleStateError::NotFound)?.clone();
        Ok(row.lock().await.clone())
    }

    /// Apply `update` to the row for `key` under its lock, creating the row
    /// first if needed.
    pub async fn update<F>(&self, key: &RoleStateKey, update: F)
    where
        F: FnOnce(&mut RoleState),
    {
        let row = self.get_or_create(key);
        let mut guard = row.lock().await;
        update(&mut guard);
    }

    /// All known peer rows for `(self_id, role)`, used by the send driver
    /// to iterate every conversation in a tick.
    #[must_use]
    pub fn scan(&self, self_id: &str, role: Role) -> Vec<RoleStateKey> {
        self.rows
            .iter()
            .filter(|entry| entry.key().self_id == self_id && entry.key().role == role)
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Drop the row entirely (distinct from resetting its fields — used
    /// only by tests and maintenance tooling; the spec's teardown paths
    /// reset fields in place rather than removing rows).
    pub fn remove(&self, key: &RoleStateKey) {
        self.rows.remove(key);
    }
}

/// Current Unix time in seconds, used to stamp crypto metadata.
#[must_use]
pub fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
