//! Per-agent dispatcher tying the Message Bus Client, State Machine Core,
//! Nonce Log, Role State Store, State Sync Bridge and Send Driver together.
//!
//! One [`Engine`] runs per local identity. Inbound frames are dispatched to
//! whichever `(role, peer)` row they belong to; rows for different peers
//! proceed independently, while frames for the same row serialize on that
//! row's lock, matching §5's concurrency model.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use handshake_crypto::envelope::SecureEnvelope;
use handshake_crypto::random::random_8;
use handshake_crypto::session_keys::SessionKey;
use handshake_crypto::signatures::{SigningKey, VerifyingKey};
use handshake_crypto::x25519::{PrivateKey as KxPrivateKey, PublicKey as KxPublicKey};
use tokio::sync::mpsc;

use crate::bus::BusClient;
use crate::config::EngineConfig;
use crate::error::Error;
use crate::frame::{Frame, Intent};
use crate::fsm::{self, Role, TransitionOutcome, VerifiedHandshake};
use crate::identity_store::Identity;
use crate::nonce_log::{NonceLog, NonceOutcome, NoncePairKey};
use crate::role_state::{RoleState, RoleStateKey, RoleStateStore};
use crate::send_driver::{self, OutboxQueue};
use crate::sync_bridge;

fn base64_decode(s: &str) -> Option<Vec<u8>> {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.decode(s).ok()
}

/// Which role a peer's inbound frame addresses, determined by `intent`
/// alone (each intent belongs to exactly one track, §4.7).
fn role_for_intent(intent: Intent) -> Role {
    match intent {
        Intent::Register | Intent::Reconnect | Intent::Request | Intent::Conclude | Intent::Close => {
            Role::Responder
        }
        Intent::Confirm | Intent::Respond | Intent::Finish => Role::Initiator,
    }
}

fn mint_reference() -> String {
    hex::encode(random_8().unwrap_or([0u8; 8]))
}

/// Per-peer delivered application payloads, accumulated until drained by the
/// embedder via [`Engine::take_messages`] — the inbound mirror of
/// [`OutboxQueue`]'s outbound queueing.
#[derive(Default)]
struct InboxQueue {
    pending: DashMap<String, Vec<serde_json::Value>>,
}

impl InboxQueue {
    fn new() -> Self {
        Self::default()
    }

    fn push(&self, peer_id: impl Into<String>, value: serde_json::Value) {
        self.pending.entry(peer_id.into()).or_default().push(value);
    }

    fn take_all(&self, peer_id: &str) -> Vec<serde_json::Value> {
        self.pending.remove(peer_id).map(|(_, v)| v).unwrap_or_default()
    }
}

/// Shared engine state, cloned (by `Arc`) into every spawned task.
pub struct Engine {
    self_id: String,
    sign_priv: SigningKey,
    kx_priv: KxPrivateKey,
    kx_pub: KxPublicKey,
    config: EngineConfig,
    store: Arc<RoleStateStore>,
    nonce_log: Arc<NonceLog>,
    outbox: Arc<OutboxQueue>,
    inbox: Arc<InboxQueue>,
    /// Derived session keys, one per `(role, peer)` row once its handshake
    /// has been verified (§4.4/§5/§9). Cleared on that row's final teardown
    /// step alongside the nonce log's pair purge.
    session_keys: Arc<DashMap<RoleStateKey, [u8; 32]>>,
    outbound: mpsc::Sender<Frame>,
}

impl Engine {
    /// Build an engine around an already-unsealed `identity` and a
    /// connected bus channel's outbound sender.
    #[must_use]
    pub fn new(identity: &Identity, config: EngineConfig, outbound: mpsc::Sender<Frame>) -> Self {
        Self {
            self_id: identity.agent_id().to_string(),
            sign_priv: SigningKey::from_bytes(identity.sign_priv()),
            kx_priv: KxPrivateKey::from_bytes(*identity.kx_priv()),
            kx_pub: KxPublicKey::from_bytes(*identity.kx_pub()),
            config,
            store: Arc::new(RoleStateStore::new()),
            nonce_log: Arc::new(NonceLog::new()),
            outbox: Arc::new(OutboxQueue::new()),
            inbox: Arc::new(InboxQueue::new()),
            session_keys: Arc::new(DashMap::new()),
            outbound,
        }
    }

    /// This agent's id.
    #[must_use]
    pub fn self_id(&self) -> &str {
        &self.self_id
    }

    /// Queue an application payload to be sealed/sent with the next
    /// outbound exchange-round frame to `peer_id`.
    pub fn queue_message(&self, peer_id: impl Into<String>, value: serde_json::Value) {
        self.outbox.queue(peer_id, value);
    }

    /// Drain every application payload delivered from `peer_id` since the
    /// last call, in arrival order. Covers both plaintext `message` frames
    /// and `sec` envelopes opened in [`Engine::dispatch`].
    pub fn take_messages(&self, peer_id: &str) -> Vec<serde_json::Value> {
        self.inbox.take_all(peer_id)
    }

    /// Snapshot the current row for `(role, peer_id)`, if one exists.
    /// Exposed for observability and tests; the engine itself never reads
    /// a row without holding its lock for the duration of a transition.
    pub async fn row_state(&self, role: Role, peer_id: &str) -> Option<crate::role_state::RoleState> {
        let key = RoleStateKey::new(self.self_id.clone(), role, peer_id);
        self.store.read(&key).await.ok()
    }

    /// Connect to the bus at `addr`, building an engine wired to the
    /// connection's real outbound sender, paired with the inbound receiver
    /// to drive with [`Engine::run`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the bus connection cannot be established.
    pub async fn connect(
        identity: &Identity,
        config: EngineConfig,
        addr: &str,
    ) -> Result<(Arc<Self>, mpsc::Receiver<Frame>), Error> {
        let bus = BusClient::connect(addr, identity.agent_id().to_string()).await?;
        let engine = Arc::new(Self::new(identity, config, bus.outbound));
        Ok((engine, bus.inbound))
    }

    /// Run this engine until the bus connection closes: spawns the periodic
    /// tick task and drives the inbound dispatch loop on the current task.
    pub async fn run(self: Arc<Self>, mut inbound: mpsc::Receiver<Frame>) -> Result<(), Error> {
        let tick_store = self.store.clone();
        let tick_nonce_log = self.nonce_log.clone();
        let tick_self_id = self.self_id.clone();
        let tick_outbound = self.outbound.clone();
        let init_final_limit = self.config.init_final_limit;
        let tick_interval_secs = self.config.tick_interval_secs;
        tokio::spawn(async move {
            send_driver::run_periodic_tick(
                tick_store,
                tick_nonce_log,
                tick_self_id,
                tick_outbound,
                init_final_limit,
                tick_interval_secs,
            )
            .await;
        });

        let sweep_engine = self.clone();
        let sweep_interval_secs = self.config.tick_interval_secs;
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(tokio::time::Duration::from_secs(sweep_interval_secs.max(1)));
            loop {
                ticker.tick().await;
                sweep_engine.sweep_finalize_timeouts().await;
            }
        });

        while let Some(frame) = inbound.recv().await {
            self.dispatch(frame).await;
        }
        Ok(())
    }

    /// Apply one inbound frame directly, bypassing the bus connection.
    /// This is the same path [`Engine::run`] drives per frame off the wire;
    /// exposed for embedders supplying their own transport and for tests
    /// that wire two engines together without a real bus socket.
    pub async fn handle_frame(&self, frame: Frame) {
        self.dispatch(frame).await;
    }

    /// Apply one inbound frame's transition and, if it committed, run the
    /// matching event-driven send for that row.
    #[tracing::instrument(skip(self, frame), fields(from = %frame.from, intent = %frame.intent))]
    async fn dispatch(&self, mut frame: Frame) {
        let role = role_for_intent(frame.intent);
        let key = RoleStateKey::new(self.self_id.clone(), role, frame.from.clone());

        let npk = NoncePairKey::new(key.self_id.as_str(), role.as_str(), key.peer_id.as_str());
        // Only peek at freshness here; the nonce is recorded further down,
        // once the transition it gates has actually been applied, so a
        // frame later dropped (stale `hs`, echo mismatch) never consumes it.
        let nonce_outcome = frame.my_nonce.as_deref().map(|n| {
            if self.nonce_log.received_contains(&npk, n) {
                NonceOutcome::Duplicate
            } else {
                NonceOutcome::Fresh
            }
        });

        let row_lock = self.store.get_or_create(&key);
        let outcome = {
            let mut guard = row_lock.lock().await;

            // For `sec` frames, verification and decryption occur before
            // handing `message` to the FSM (§4.1).
            let mut opened_secure = false;
            if let Some(sealed) = frame.sec.take() {
                match self.open_secure(&key, &guard, &sealed) {
                    Some(value) => {
                        frame.message = Some(value);
                        opened_secure = true;
                    }
                    None => {
                        tracing::warn!("dropping frame whose sec envelope failed to open");
                        return;
                    }
                }
            }

            let result = match role {
                Role::Initiator => fsm::initiator_on_frame(
                    &mut guard,
                    &frame,
                    nonce_outcome,
                    self.config.exchange_limit,
                    self.config.hs_ttl_seconds,
                ),
                Role::Responder => fsm::responder_on_frame(
                    &mut guard,
                    &frame,
                    nonce_outcome,
                    self.config.hs_ttl_seconds,
                ),
            };

            match result {
                Ok((TransitionOutcome::Applied, verified)) => {
                    if let Some(v) = &verified {
                        guard.crypto.last_handshake_at = Some(crate::role_state::now_unix());
                        if let Some(session_key) = self.derive_session_key(v) {
                            self.session_keys.insert(key.clone(), session_key);
                        }
                    }
                    if opened_secure {
                        guard.crypto.last_secure_message_at = Some(crate::role_state::now_unix());
                    }
                    self.mint_reference_if_needed(&mut guard);
                    if let Some(n) = frame.my_nonce.as_deref() {
                        self.nonce_log.mark_received(&npk, n);
                    }
                    if let Some(value) = frame.message.take() {
                        self.inbox.push(key.peer_id.clone(), value);
                    }
                    Some(())
                }
                Ok((TransitionOutcome::Ignored, _)) => None,
                Err(e) => {
                    tracing::info!(error = %e, "dropping frame that failed verification");
                    None
                }
            }
        };

        if outcome.is_none() {
            return;
        }

        let purges_nonces = (role == Role::Responder && frame.intent == Intent::Close)
            || (role == Role::Initiator && frame.intent == Intent::Finish);
        if purges_nonces {
            self.nonce_log.purge_pair(&npk);
            self.session_keys.remove(&key);
        }

        send_driver::send_for_row(
            &self.store,
            &self.nonce_log,
            &self.outbox,
            &key,
            &self.sign_priv,
            &self.kx_pub,
            &self.session_keys,
            &self.outbound,
        )
        .await;
    }

    /// Derive this row's session key from a just-verified handshake blob's
    /// asserted `peer_kx_pub`, via X25519 ECDH against this identity's
    /// `kx_priv` followed by HKDF-SHA256 (§4.4). Returns `None` if the
    /// blob's key is malformed or a low-order point — both already-rare
    /// conditions gated by the signature check `verify_hs` performed.
    fn derive_session_key(&self, verified: &VerifiedHandshake) -> Option<[u8; 32]> {
        let bytes = base64_decode(&verified.peer_kx_pub)?;
        let arr: [u8; 32] = bytes.as_slice().try_into().ok()?;
        let peer_pub = KxPublicKey::from_bytes(arr);
        let shared = self.kx_priv.exchange(&peer_pub)?;
        let session_key = SessionKey::derive(shared.as_bytes()).ok()?;
        Some(*session_key.as_bytes())
    }

    /// Open a `sec` envelope against this row's cached session key and the
    /// peer's verified long-term signing key. Returns `None` on a missing
    /// key, missing peer identity, or any verification/decryption failure.
    fn open_secure(&self, key: &RoleStateKey, row: &RoleState, sealed: &SecureEnvelope) -> Option<serde_json::Value> {
        let session_key = *self.session_keys.get(key)?;
        let peer_sign_pub_bytes = base64_decode(row.crypto.peer_sign_pub.as_deref()?)?;
        let arr: [u8; 32] = peer_sign_pub_bytes.as_slice().try_into().ok()?;
        let verifying = VerifyingKey::from_bytes(&arr).ok()?;
        handshake_crypto::envelope::open(&session_key, &verifying, sealed).ok()
    }

    /// Mint a fresh `local_reference` the moment a row enters a finalize
    /// state with none set yet, so the next tick's `conclude`/`finish` has a
    /// reference to carry (§4.8's ticks assume one already exists).
    fn mint_reference_if_needed(&self, state: &mut crate::role_state::RoleState) {
        let needs_reference = matches!(
            state.state.as_str(),
            "init_finalize_propose" | "resp_finalize"
        );
        if needs_reference && state.local_reference.is_none() {
            state.local_reference = Some(mint_reference());
        }
    }

    /// Run one round of the periodic maintenance tick directly, without
    /// waiting for [`Engine::run`]'s spawned interval. Exposed so tests and
    /// embedders that manage their own scheduling can drive the tick
    /// deterministically.
    pub async fn tick_once(&self) {
        send_driver::tick_once(
            &self.store,
            &self.nonce_log,
            &self.self_id,
            &self.outbound,
            self.config.init_final_limit,
        )
        .await;
    }

    /// Run one round of finalize-timeout sweeps across every known row,
    /// independent of the periodic tick's maintenance sends. Intended to be
    /// called on the same cadence as the tick (§4.9's bounded retry loops).
    pub async fn sweep_finalize_timeouts(&self) {
        for key in self.store.scan(&self.self_id, Role::Responder) {
            let row_lock = self.store.get_or_create(&key);
            let mut guard = row_lock.lock().await;
            if fsm::responder_finalize_timeout(&mut guard, self.config.resp_final_limit) {
                drop(guard);
                let npk = NoncePairKey::new(key.self_id.as_str(), Role::Responder.as_str(), key.peer_id.as_str());
                self.nonce_log.purge_pair(&npk);
            }
        }
    }

    /// Export the current advertised state of every known row, for the
    /// State Sync Bridge's upload half.
    pub async fn upload_states(&self) -> HashMap<String, String> {
        let mut out = sync_bridge::upload(&self.store, &self.self_id, Role::Initiator).await;
        out.extend(sync_bridge::upload(&self.store, &self.self_id, Role::Responder).await);
        out
    }

    /// Ingest externally-dispatched allowed next-states, for the State Sync
    /// Bridge's download half.
    pub async fn download_states(&self, allowed: &HashMap<String, Vec<String>>) {
        sync_bridge::download(&self.store, &self.self_id, allowed).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use handshake_crypto::identity as crypto_identity;

    fn test_config() -> EngineConfig {
        EngineConfig::with_defaults("alice".to_string())
    }

    #[test]
    fn test_role_for_intent_maps_each_track() {
        assert_eq!(role_for_intent(Intent::Register), Role::Responder);
        assert_eq!(role_for_intent(Intent::Reconnect), Role::Responder);
        assert_eq!(role_for_intent(Intent::Request), Role::Responder);
        assert_eq!(role_for_intent(Intent::Conclude), Role::Responder);
        assert_eq!(role_for_intent(Intent::Close), Role::Responder);
        assert_eq!(role_for_intent(Intent::Confirm), Role::Initiator);
        assert_eq!(role_for_intent(Intent::Respond), Role::Initiator);
        assert_eq!(role_for_intent(Intent::Finish), Role::Initiator);
    }

    #[tokio::test]
    async fn test_dispatch_register_moves_responder_row_to_confirm() {
        let identity = crate::identity_store::Identity::from_crypto(crypto_identity::generate("alice"));
        let (tx, mut rx) = mpsc::channel(8);
        let engine = Arc::new(Engine::new(&identity, test_config(), tx));

        engine
            .dispatch(Frame {
                from: "bob".to_string(),
                to: None,
                intent: Intent::Register,
                my_nonce: None,
                your_nonce: None,
                my_ref: None,
                your_ref: None,
                hs: None,
                message: None,
                sec: None,
            })
            .await;

        let key = RoleStateKey::new("alice", Role::Responder, "bob");
        let row = engine.store.read(&key).await.unwrap();
        assert_eq!(row.state, "resp_confirm");

        // Confirm state triggers the event-driven sender to emit `confirm`.
        let sent = rx.recv().await.unwrap();
        assert_eq!(sent.intent, Intent::Confirm);
    }
}
