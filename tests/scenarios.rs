//! Integration tests for the six named handshake scenarios: two in-process
//! [`Engine`]s wired through their own outbound channels, with frames
//! relayed by hand rather than over a real bus socket.

use std::sync::Arc;

use handshake_core::fsm::Role;
use handshake_core::{Engine, EngineConfig, Frame, Intent};
use handshake_crypto::identity as crypto_identity;
use tokio::sync::mpsc::Receiver;
use tokio::time::{timeout, Duration};

use test_helpers::ci_timeout;

fn make_engine(name: &str) -> (Arc<Engine>, Receiver<Frame>) {
    let identity =
        handshake_core::identity_store::Identity::from_crypto(crypto_identity::generate(name));
    let (tx, rx) = tokio::sync::mpsc::channel(32);
    let engine = Arc::new(Engine::new(&identity, EngineConfig::with_defaults(name), tx));
    (engine, rx)
}

/// Pull the next frame off `rx`, failing the test if none arrives quickly.
async fn next_frame(rx: &mut Receiver<Frame>) -> Frame {
    timeout(ci_timeout(Duration::from_secs(2)), rx.recv())
        .await
        .expect("frame did not arrive in time")
        .expect("outbound channel closed")
}

/// Drain `rx` until a frame with the given intent is found, relaying every
/// other frame (broadcasts, duplicate reconnects) to `other` along the way.
/// Used to step past the periodic `register` broadcast that precedes every
/// tick's maintenance send.
async fn next_frame_of(rx: &mut Receiver<Frame>, intent: Intent) -> Frame {
    loop {
        let frame = next_frame(rx).await;
        if frame.intent == intent {
            return frame;
        }
    }
}

/// Drives one full happy-path round between two fresh agents: broadcast
/// hello, signed exchange, and finalize teardown. Returns both engines with
/// their rows left at `init_ready` / `resp_ready`, references retained.
async fn run_happy_path(alice: &Arc<Engine>, alice_rx: &mut Receiver<Frame>, bob: &Arc<Engine>, bob_rx: &mut Receiver<Frame>) {
    // Bob's tick broadcasts `register`; Alice's responder row for Bob moves
    // to `resp_confirm` and replies `confirm` with an `hs(response)` blob.
    bob.tick_once().await;
    let register = next_frame_of(bob_rx, Intent::Register).await;
    alice.handle_frame(register).await;
    let confirm = next_frame(alice_rx).await;
    assert_eq!(confirm.intent, Intent::Confirm);
    assert!(confirm.hs.is_some());

    // Bob's initiator row for Alice moves `init_ready` -> `init_exchange` and
    // immediately replies `request` with `hs(init)` attached (first round).
    bob.handle_frame(confirm).await;
    let request = next_frame(bob_rx).await;
    assert_eq!(request.intent, Intent::Request);
    assert!(request.hs.is_some());

    // Three more exchange rounds before Bob's initiator row cuts over to
    // `init_finalize_propose` (EXCHANGE_LIMIT = 3) and sends `conclude`.
    let mut next = request;
    loop {
        alice.handle_frame(next.clone()).await;
        let respond = next_frame(alice_rx).await;
        assert_eq!(respond.intent, Intent::Respond);

        bob.handle_frame(respond).await;
        let from_bob = next_frame(bob_rx).await;
        if from_bob.intent == Intent::Conclude {
            alice.handle_frame(from_bob).await;
            break;
        }
        assert_eq!(from_bob.intent, Intent::Request);
        assert!(from_bob.hs.is_none(), "hs only attaches on the first round");
        next = from_bob;
    }

    // Alice's responder row is now `resp_finalize`; her tick sends `finish`.
    alice.tick_once().await;
    let finish = next_frame_of(alice_rx, Intent::Finish).await;

    bob.handle_frame(finish).await;
    // Bob's initiator row is now `init_finalize_close`; his tick sends `close`.
    bob.tick_once().await;
    let close = next_frame_of(bob_rx, Intent::Close).await;

    alice.handle_frame(close).await;
}

#[tokio::test]
async fn scenario_happy_path_completes_and_retains_references() {
    let (alice, mut alice_rx) = make_engine("alice");
    let (bob, mut bob_rx) = make_engine("bob");

    run_happy_path(&alice, &mut alice_rx, &bob, &mut bob_rx).await;

    let alice_row = alice.row_state(Role::Responder, bob.self_id()).await.unwrap();
    assert_eq!(alice_row.state, "resp_ready");
    assert_eq!(alice_row.exchange_count, 0);
    assert_eq!(alice_row.finalize_retry_count, 0);
    assert!(alice_row.peer_reference.is_some());
    assert!(alice_row.local_reference.is_some());

    let bob_row = bob.row_state(Role::Initiator, alice.self_id()).await.unwrap();
    assert_eq!(bob_row.state, "init_ready");
    assert_eq!(bob_row.finalize_retry_count, 0);
    assert!(bob_row.peer_reference.is_some());
    assert!(bob_row.local_reference.is_some());
}

#[tokio::test]
async fn scenario_duplicate_request_nonce_ignored() {
    let (alice, mut alice_rx) = make_engine("alice");
    let (bob, mut bob_rx) = make_engine("bob");

    bob.tick_once().await;
    let register = next_frame_of(&mut bob_rx, Intent::Register).await;
    alice.handle_frame(register).await;
    let confirm = next_frame(&mut alice_rx).await;

    bob.handle_frame(confirm).await;
    let request = next_frame(&mut bob_rx).await;

    alice.handle_frame(request.clone()).await;
    let respond = next_frame(&mut alice_rx).await;
    let row_after_first = alice.row_state(Role::Responder, "bob").await.unwrap();

    // Replay the exact same `request` frame: same `my_nonce`, already seen.
    alice.handle_frame(request).await;
    let row_after_replay = alice.row_state(Role::Responder, "bob").await.unwrap();

    assert_eq!(row_after_first.state, row_after_replay.state);
    assert_eq!(row_after_first.exchange_count, row_after_replay.exchange_count);
    assert!(alice_rx.try_recv().is_err(), "a replayed frame must not trigger a second reply");
    drop(respond);
}

#[tokio::test]
async fn scenario_stale_handshake_blob_rejected() {
    use handshake_crypto::handshake_blob::{self, HandshakeBlobType};
    use handshake_crypto::signatures::SigningKey;
    use handshake_crypto::x25519::PrivateKey as KxPrivateKey;
    use rand_core::OsRng;

    let (alice, mut alice_rx) = make_engine("alice");

    let sign_priv = SigningKey::generate(&mut OsRng);
    let kx_pub = KxPrivateKey::generate(&mut OsRng).public_key();
    let mut hs = handshake_blob::build(HandshakeBlobType::Response, "n1", &kx_pub, &sign_priv).unwrap();
    hs.timestamp = "2000-01-01T00:00:00Z".to_string();

    let register = Frame {
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
    };
    alice.handle_frame(register).await;
    let confirm_probe = next_frame(&mut alice_rx).await;
    assert_eq!(confirm_probe.intent, Intent::Confirm);

    // Hand-craft a `request` carrying an expired `hs` blob, echoing the
    // `my_nonce` Alice just emitted, so only the TTL check can fail it.
    let stale_request = Frame {
        from: "bob".to_string(),
        to: Some("alice".to_string()),
        intent: Intent::Request,
        my_nonce: Some("deadbeefdeadbeef".to_string()),
        your_nonce: confirm_probe.my_nonce.clone(),
        my_ref: None,
        your_ref: None,
        hs: Some(hs),
        message: None,
        sec: None,
    };

    let before = alice.row_state(Role::Responder, "bob").await.unwrap();
    alice.handle_frame(stale_request).await;
    let after = alice.row_state(Role::Responder, "bob").await.unwrap();

    assert_eq!(before.state, after.state, "a stale hs blob must not advance the row");
    assert!(alice_rx.try_recv().is_err(), "a rejected frame produces no reply");
}

#[tokio::test]
async fn scenario_reconnect_resumes_with_retained_reference() {
    let (alice, mut alice_rx) = make_engine("alice");
    let (bob, mut bob_rx) = make_engine("bob");

    run_happy_path(&alice, &mut alice_rx, &bob, &mut bob_rx).await;

    let alice_ref_before = alice
        .row_state(Role::Responder, "bob")
        .await
        .unwrap()
        .local_reference
        .unwrap();

    // Bob's next tick finds `peer_reference` already known and sends a
    // targeted `reconnect` ahead of his broadcast `register`.
    bob.tick_once().await;
    let reconnect = next_frame_of(&mut bob_rx, Intent::Reconnect).await;
    assert_eq!(reconnect.your_ref.as_deref(), Some(alice_ref_before.as_str()));

    alice.handle_frame(reconnect).await;
    let confirm = next_frame(&mut alice_rx).await;
    assert_eq!(confirm.intent, Intent::Confirm);

    let alice_row = alice.row_state(Role::Responder, "bob").await.unwrap();
    assert_eq!(alice_row.state, "resp_confirm");
    assert!(alice_row.local_reference.is_none(), "reconnect clears the stale local_reference");
}

#[tokio::test]
async fn scenario_initiator_finalize_cutover_reverts_to_ready() {
    use handshake_core::role_state::{RoleStateKey, RoleStateStore};

    let store = RoleStateStore::new();
    let key = RoleStateKey::new("bob", Role::Initiator, "alice");
    store
        .update(&key, |r| {
            r.state = "init_finalize_close".to_string();
            r.local_reference = Some("bob-ref".to_string());
            r.peer_reference = None;
            r.finalize_retry_count = 3;
        })
        .await;

    let nonce_log = handshake_core::NonceLog::new();
    let (tx, mut rx) = tokio::sync::mpsc::channel(8);

    // INIT_FINAL_LIMIT defaults to 3: the tick that pushes the count to 4
    // is the one that cuts back over to `init_ready`.
    handshake_core::send_driver::tick_once(&store, &nonce_log, "bob", &tx, 3).await;
    let close = next_frame_of(&mut rx, Intent::Close).await;
    assert_eq!(close.my_ref.as_deref(), Some("bob-ref"));

    let row = store.read(&key).await.unwrap();
    assert_eq!(row.state, "init_ready");
    assert_eq!(row.finalize_retry_count, 0);
    assert_eq!(row.local_reference.as_deref(), Some("bob-ref"), "kept for a future reconnect");
}

#[tokio::test]
async fn scenario_responder_finalize_timeout_wipes_references() {
    use handshake_core::fsm;
    use handshake_core::role_state::{RoleStateKey, RoleStateStore};

    let store = RoleStateStore::new();
    let key = RoleStateKey::new("alice", Role::Responder, "bob");
    store
        .update(&key, |r| {
            r.state = "resp_finalize".to_string();
            r.local_reference = Some("alice-ref".to_string());
            r.peer_reference = Some("bob-ref".to_string());
            r.finalize_retry_count = 6;
        })
        .await;

    let mut row = store.read(&key).await.unwrap();
    // RESP_FINAL_LIMIT defaults to 5; 6 already exceeds it.
    let timed_out = fsm::responder_finalize_timeout(&mut row, 5);
    assert!(timed_out);
    assert_eq!(row.state, "resp_ready");
    assert!(row.local_reference.is_none());
    assert!(row.peer_reference.is_none());

    store.update(&key, |r| *r = row.clone()).await;
    let persisted = store.read(&key).await.unwrap();
    assert_eq!(persisted.state, "resp_ready");
}
