//! Send Driver: periodic tick and event-driven sender, §4.8.
//!
//! Two schedules feed the same outbound channel. `run_periodic_tick` fires
//! roughly once a second and handles maintenance frames (broadcasts,
//! reconnects, finalize retries). `run_event_driven_sender` runs right after
//! a receive handler commits a transition, so it observes the row's
//! just-updated fields — notably a freshly cleared `local_nonce`.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::time::{interval, Duration};

use handshake_crypto::envelope::{self, SecureEnvelope};
use handshake_crypto::handshake_blob::{self, HandshakeBlobType};
use handshake_crypto::random::random_8;
use handshake_crypto::signatures::SigningKey;
use handshake_crypto::x25519::PublicKey as KxPublicKey;

use crate::frame::{Frame, Intent};
use crate::fsm::{self, Role};
use crate::nonce_log::{NonceLog, NoncePairKey};
use crate::role_state::{RoleState, RoleStateKey, RoleStateStore};

/// Seal `message` into a `sec` envelope when a session key exists for this
/// row, per §4.8's "if a session key exists and there is a `message`, seal
/// to `sec`". Falls back to dropping (not sending plaintext) a message that
/// fails to seal despite a key being present.
fn seal_outbound(
    session_key: Option<&[u8; 32]>,
    sign_priv: &SigningKey,
    message: Option<serde_json::Value>,
) -> (Option<serde_json::Value>, Option<SecureEnvelope>) {
    let (Some(session_key), Some(msg)) = (session_key, message.as_ref()) else {
        return (message, None);
    };
    match envelope::seal(session_key, sign_priv, msg, &envelope::now_iso8601()) {
        Ok(sealed) => (None, Some(sealed)),
        Err(e) => {
            tracing::warn!(error = %e, "failed to seal outbound message, dropping payload");
            (None, None)
        }
    }
}

/// Per-peer application payloads waiting to be sealed and sent on the next
/// exchange round. Keyed by peer id; a send consumes the queued value.
#[derive(Default)]
pub struct OutboxQueue {
    pending: DashMap<String, serde_json::Value>,
}

impl OutboxQueue {
    /// An empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `value` to be attached to the next outbound frame to `peer_id`,
    /// replacing any value already queued for that peer.
    pub fn queue(&self, peer_id: impl Into<String>, value: serde_json::Value) {
        self.pending.insert(peer_id.into(), value);
    }

    fn take(&self, peer_id: &str) -> Option<serde_json::Value> {
        self.pending.remove(peer_id).map(|(_, v)| v)
    }
}

fn mint_nonce() -> String {
    hex::encode(random_8().unwrap_or([0u8; 8]))
}

async fn send(outbound: &mpsc::Sender<Frame>, frame: Frame) {
    if outbound.send(frame).await.is_err() {
        tracing::warn!("outbound channel closed, dropping frame");
    }
}

/// Run the ~1 Hz periodic tick forever, driving maintenance frames for every
/// known row of `self_id` across both roles. Intended to be spawned as its
/// own task; returns only if `outbound` is closed and every send fails.
pub async fn run_periodic_tick(
    store: Arc<RoleStateStore>,
    nonce_log: Arc<NonceLog>,
    self_id: String,
    outbound: mpsc::Sender<Frame>,
    init_final_limit: u32,
    tick_interval_secs: u64,
) {
    let mut ticker = interval(Duration::from_secs(tick_interval_secs.max(1)));
    loop {
        ticker.tick().await;
        tick_once(&store, &nonce_log, &self_id, &outbound, init_final_limit).await;
    }
}

/// A single tick's worth of maintenance sends, factored out so tests can
/// drive it deterministically without waiting on a real timer.
pub async fn tick_once(
    store: &RoleStateStore,
    nonce_log: &NonceLog,
    self_id: &str,
    outbound: &mpsc::Sender<Frame>,
    init_final_limit: u32,
) {
    for key in store.scan(self_id, Role::Initiator) {
        tick_initiator_row(store, nonce_log, &key, outbound, init_final_limit).await;
    }
    for key in store.scan(self_id, Role::Responder) {
        tick_responder_row(store, &key, outbound).await;
    }

    send(
        outbound,
        Frame {
            from: self_id.to_string(),
            to: None,
            intent: Intent::Register,
            my_nonce: None,
            your_nonce: None,
            my_ref: None,
            your_ref: None,
            hs: None,
            message: None,
            sec: None,
        },
    )
    .await;
}

async fn tick_initiator_row(
    store: &RoleStateStore,
    nonce_log: &NonceLog,
    key: &RoleStateKey,
    outbound: &mpsc::Sender<Frame>,
    init_final_limit: u32,
) {
    let Ok(row) = store.read(key).await else {
        return;
    };

    match row.state.as_str() {
        "init_ready" => {
            if let Some(peer_ref) = row.peer_reference.clone() {
                send(
                    outbound,
                    Frame {
                        from: key.self_id.clone(),
                        to: Some(key.peer_id.clone()),
                        intent: Intent::Reconnect,
                        my_nonce: None,
                        your_nonce: None,
                        my_ref: None,
                        your_ref: Some(peer_ref),
                        hs: None,
                        message: None,
                        sec: None,
                    },
                )
                .await;
            }
        }
        "init_finalize_close" => {
            let your_ref = row.peer_reference.clone();
            let my_ref = row.local_reference.clone();
            let mut cutover = false;
            store
                .update(key, |r| {
                    r.finalize_retry_count += 1;
                    cutover = fsm::initiator_finalize_cutover(r, init_final_limit);
                })
                .await;
            if cutover {
                let npk = NoncePairKey::new(key.self_id.as_str(), Role::Initiator.as_str(), key.peer_id.as_str());
                nonce_log.purge_pair(&npk);
            }
            send(
                outbound,
                Frame {
                    from: key.self_id.clone(),
                    to: Some(key.peer_id.clone()),
                    intent: Intent::Close,
                    my_nonce: None,
                    your_nonce: None,
                    my_ref,
                    your_ref,
                    hs: None,
                    message: None,
                    sec: None,
                },
            )
            .await;
        }
        _ => {}
    }
}

async fn tick_responder_row(store: &RoleStateStore, key: &RoleStateKey, outbound: &mpsc::Sender<Frame>) {
    let Ok(row) = store.read(key).await else {
        return;
    };

    if row.state == "resp_finalize" {
        store.update(key, |r| r.finalize_retry_count += 1).await;
        send(
            outbound,
            Frame {
                from: key.self_id.clone(),
                to: Some(key.peer_id.clone()),
                intent: Intent::Finish,
                my_nonce: None,
                your_nonce: None,
                my_ref: row.local_reference.clone(),
                your_ref: row.peer_reference.clone(),
                hs: None,
                message: None,
                sec: None,
            },
        )
        .await;
    }
}

/// Event-driven sends for a single `(self, role, peer)` row, invoked right
/// after that row's receive handler returns.
pub async fn send_for_row(
    store: &RoleStateStore,
    nonce_log: &NonceLog,
    outbox: &OutboxQueue,
    key: &RoleStateKey,
    sign_priv: &SigningKey,
    kx_pub: &KxPublicKey,
    session_keys: &DashMap<RoleStateKey, [u8; 32]>,
    outbound: &mpsc::Sender<Frame>,
) {
    let Ok(row) = store.read(key).await else {
        return;
    };
    let session_key = session_keys.get(key).map(|v| *v);

    match key.role {
        Role::Initiator => {
            send_initiator_event(store, nonce_log, outbox, key, &row, sign_priv, kx_pub, session_key, outbound).await
        }
        Role::Responder => {
            send_responder_event(store, nonce_log, outbox, key, &row, sign_priv, kx_pub, session_key, outbound).await
        }
    }
}

async fn send_initiator_event(
    store: &RoleStateStore,
    nonce_log: &NonceLog,
    outbox: &OutboxQueue,
    key: &RoleStateKey,
    row: &RoleState,
    sign_priv: &SigningKey,
    kx_pub: &KxPublicKey,
    session_key: Option<[u8; 32]>,
    outbound: &mpsc::Sender<Frame>,
) {
    match row.state.as_str() {
        "init_exchange" => {
            let nonce = mint_nonce();
            let npk = NoncePairKey::new(key.self_id.as_str(), Role::Initiator.as_str(), key.peer_id.as_str());
            nonce_log.record_sent(&npk, &nonce);

            let first_of_cycle = row.exchange_count == 0;
            let hs = if first_of_cycle {
                handshake_blob::build(HandshakeBlobType::Init, &nonce, kx_pub, sign_priv).ok()
            } else {
                None
            };

            let message = outbox.take(&key.peer_id);
            let (message, sec) = seal_outbound(session_key.as_ref(), sign_priv, message);
            store
                .update(key, |r| r.local_nonce = Some(nonce.clone()))
                .await;

            send(
                outbound,
                Frame {
                    from: key.self_id.clone(),
                    to: Some(key.peer_id.clone()),
                    intent: Intent::Request,
                    my_nonce: Some(nonce),
                    your_nonce: row.peer_nonce.clone(),
                    my_ref: None,
                    your_ref: None,
                    hs,
                    message,
                    sec,
                },
            )
            .await;
        }
        "init_finalize_propose" => {
            store.update(key, |r| r.finalize_retry_count += 1).await;
            send(
                outbound,
                Frame {
                    from: key.self_id.clone(),
                    to: Some(key.peer_id.clone()),
                    intent: Intent::Conclude,
                    my_nonce: None,
                    your_nonce: None,
                    my_ref: row.local_reference.clone(),
                    your_ref: None,
                    hs: None,
                    message: None,
                    sec: None,
                },
            )
            .await;
        }
        _ => {}
    }
}

async fn send_responder_event(
    store: &RoleStateStore,
    nonce_log: &NonceLog,
    outbox: &OutboxQueue,
    key: &RoleStateKey,
    row: &RoleState,
    sign_priv: &SigningKey,
    kx_pub: &KxPublicKey,
    session_key: Option<[u8; 32]>,
    outbound: &mpsc::Sender<Frame>,
) {
    match row.state.as_str() {
        "resp_confirm" => {
            let nonce = mint_nonce();
            let npk = NoncePairKey::new(key.self_id.as_str(), Role::Responder.as_str(), key.peer_id.as_str());
            nonce_log.record_sent(&npk, &nonce);
            let hs = handshake_blob::build(HandshakeBlobType::Response, &nonce, kx_pub, sign_priv).ok();

            store
                .update(key, |r| r.local_nonce = Some(nonce.clone()))
                .await;

            send(
                outbound,
                Frame {
                    from: key.self_id.clone(),
                    to: Some(key.peer_id.clone()),
                    intent: Intent::Confirm,
                    my_nonce: Some(nonce),
                    your_nonce: None,
                    my_ref: None,
                    your_ref: None,
                    hs,
                    message: None,
                    sec: None,
                },
            )
            .await;
        }
        "resp_exchange" => {
            let nonce = mint_nonce();
            let npk = NoncePairKey::new(key.self_id.as_str(), Role::Responder.as_str(), key.peer_id.as_str());
            nonce_log.record_sent(&npk, &nonce);
            let message = outbox.take(&key.peer_id);
            let (message, sec) = seal_outbound(session_key.as_ref(), sign_priv, message);

            store
                .update(key, |r| r.local_nonce = Some(nonce.clone()))
                .await;

            send(
                outbound,
                Frame {
                    from: key.self_id.clone(),
                    to: Some(key.peer_id.clone()),
                    intent: Intent::Respond,
                    my_nonce: Some(nonce),
                    your_nonce: row.peer_nonce.clone(),
                    my_ref: None,
                    your_ref: None,
                    hs: None,
                    message,
                    sec,
                },
            )
            .await;
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use handshake_crypto::x25519::PrivateKey as KxPrivateKey;
    use rand_core::OsRng;

    fn test_identity() -> (SigningKey, KxPublicKey) {
        let sign_priv = SigningKey::generate(&mut OsRng);
        let kx_priv = KxPrivateKey::generate(&mut OsRng);
        (sign_priv, kx_priv.public_key())
    }

    #[tokio::test]
    async fn test_tick_emits_register_broadcast() {
        let store = RoleStateStore::new();
        let nonce_log = NonceLog::new();
        let (tx, mut rx) = mpsc::channel(8);
        tick_once(&store, &nonce_log, "alice", &tx, 3).await;

        let frame = rx.recv().await.unwrap();
        assert_eq!(frame.intent, Intent::Register);
        assert!(frame.to.is_none());
    }

    #[tokio::test]
    async fn test_tick_reconnects_when_peer_reference_known() {
        let store = RoleStateStore::new();
        let key = RoleStateKey::new("alice", Role::Initiator, "bob");
        store
            .update(&key, |r| {
                r.state = "init_ready".to_string();
                r.peer_reference = Some("ref-123".to_string());
            })
            .await;

        let nonce_log = NonceLog::new();
        let (tx, mut rx) = mpsc::channel(8);
        tick_once(&store, &nonce_log, "alice", &tx, 3).await;

        let first = rx.recv().await.unwrap();
        assert_eq!(first.intent, Intent::Reconnect);
        assert_eq!(first.your_ref.as_deref(), Some("ref-123"));
    }

    #[tokio::test]
    async fn test_event_driven_sender_emits_request_with_hs_on_first_round() {
        let store = RoleStateStore::new();
        let nonce_log = NonceLog::new();
        let outbox = OutboxQueue::new();
        let key = RoleStateKey::new("alice", Role::Initiator, "bob");
        store
            .update(&key, |r| r.state = "init_exchange".to_string())
            .await;

        let (sign_priv, kx_pub) = test_identity();
        let session_keys = DashMap::new();
        let (tx, mut rx) = mpsc::channel(8);
        send_for_row(&store, &nonce_log, &outbox, &key, &sign_priv, &kx_pub, &session_keys, &tx).await;

        let frame = rx.recv().await.unwrap();
        assert_eq!(frame.intent, Intent::Request);
        assert!(frame.hs.is_some());
        assert!(frame.my_nonce.is_some());
    }

    #[tokio::test]
    async fn test_event_driven_sender_omits_hs_on_later_rounds() {
        let store = RoleStateStore::new();
        let nonce_log = NonceLog::new();
        let outbox = OutboxQueue::new();
        let key = RoleStateKey::new("alice", Role::Initiator, "bob");
        store
            .update(&key, |r| {
                r.state = "init_exchange".to_string();
                r.exchange_count = 1;
            })
            .await;

        let (sign_priv, kx_pub) = test_identity();
        let session_keys = DashMap::new();
        let (tx, mut rx) = mpsc::channel(8);
        send_for_row(&store, &nonce_log, &outbox, &key, &sign_priv, &kx_pub, &session_keys, &tx).await;

        let frame = rx.recv().await.unwrap();
        assert!(frame.hs.is_none());
    }

    #[tokio::test]
    async fn test_event_driven_sender_seals_message_when_session_key_present() {
        let store = RoleStateStore::new();
        let nonce_log = NonceLog::new();
        let outbox = OutboxQueue::new();
        let key = RoleStateKey::new("alice", Role::Initiator, "bob");
        store
            .update(&key, |r| {
                r.state = "init_exchange".to_string();
                r.exchange_count = 1;
            })
            .await;
        outbox.queue("bob", serde_json::json!({"hello": "bob"}));

        let (sign_priv, kx_pub) = test_identity();
        let session_keys = DashMap::new();
        session_keys.insert(key.clone(), [0x42u8; 32]);
        let (tx, mut rx) = mpsc::channel(8);
        send_for_row(&store, &nonce_log, &outbox, &key, &sign_priv, &kx_pub, &session_keys, &tx).await;

        let frame = rx.recv().await.unwrap();
        assert!(frame.message.is_none(), "sealed message must not also ride plaintext");
        assert!(frame.sec.is_some());
    }

    #[tokio::test]
    async fn test_event_driven_sender_sends_plaintext_without_session_key() {
        let store = RoleStateStore::new();
        let nonce_log = NonceLog::new();
        let outbox = OutboxQueue::new();
        let key = RoleStateKey::new("alice", Role::Initiator, "bob");
        store
            .update(&key, |r| {
                r.state = "init_exchange".to_string();
                r.exchange_count = 1;
            })
            .await;
        outbox.queue("bob", serde_json::json!({"hello": "bob"}));

        let (sign_priv, kx_pub) = test_identity();
        let session_keys = DashMap::new();
        let (tx, mut rx) = mpsc::channel(8);
        send_for_row(&store, &nonce_log, &outbox, &key, &sign_priv, &kx_pub, &session_keys, &tx).await;

        let frame = rx.recv().await.unwrap();
        assert!(frame.sec.is_none());
        assert!(frame.message.is_some());
    }
}
