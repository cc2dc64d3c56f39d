//! Initiator/responder transition tables, §4.7.
//!
//! Each `on_*` function implements one row of the spec's transition table:
//! it checks preconditions against the current [`RoleState`] and the
//! inbound frame, and if they hold, applies the effects and returns the new
//! state. Preconditions that fail leave the row's `state` field untouched
//! and return [`TransitionOutcome::Ignored`], per §3's invariant that
//! failed preconditions are no-ops, not errors.
//!
//! Nonce freshness/replay checks are the caller's responsibility (the
//! Nonce Log is a separate component, §4.3) — these functions take the
//! *outcome* of that check as a parameter rather than owning the log.
//! Handshake blob signature/TTL verification, by contrast, is
//! self-contained (it needs only the blob itself) and is performed here.

use handshake_crypto::handshake_blob::{self, HandshakeBlob};

use crate::error::Error;
use crate::frame::{Frame, Intent};
use crate::nonce_log::NonceOutcome;
use crate::role_state::RoleState;

/// Which track a role-state row belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The side that opens a session.
    Initiator,
    /// The side that answers.
    Responder,
}

impl Role {
    /// This role's `*_ready` state label, the lifecycle default for a
    /// freshly created row.
    #[must_use]
    pub fn ready_state(self) -> &'static str {
        match self {
            Role::Initiator => InitiatorState::Ready.as_str(),
            Role::Responder => ResponderState::Ready.as_str(),
        }
    }

    /// The string used as the nonce log / role-state-scan role key.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Initiator => "initiator",
            Role::Responder => "responder",
        }
    }
}

/// The initiator track's four states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitiatorState {
    /// Idle, awaiting a `confirm` or ready to (re)start.
    Ready,
    /// Mid exchange rounds.
    Exchange,
    /// Sent `conclude`, awaiting `finish`.
    FinalizePropose,
    /// Sent `close`, awaiting retry cutover or a fresh cycle.
    FinalizeClose,
}

impl InitiatorState {
    /// Parse the stored state-label string, if it names an initiator
    /// state.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "init_ready" => Some(Self::Ready),
            "init_exchange" => Some(Self::Exchange),
            "init_finalize_propose" => Some(Self::FinalizePropose),
            "init_finalize_close" => Some(Self::FinalizeClose),
            _ => None,
        }
    }

    /// The stored state-label string for this state.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ready => "init_ready",
            Self::Exchange => "init_exchange",
            Self::FinalizePropose => "init_finalize_propose",
            Self::FinalizeClose => "init_finalize_close",
        }
    }
}

/// The responder track's four states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponderState {
    /// Idle, awaiting `register`/`reconnect`.
    Ready,
    /// Sent `confirm`, awaiting the first `request`.
    Confirm,
    /// Mid exchange rounds.
    Exchange,
    /// Sent `finish`, awaiting `close` or retry timeout.
    Finalize,
}

impl ResponderState {
    /// Parse the stored state-label string, if it names a responder state.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "resp_ready" => Some(Self::Ready),
            "resp_confirm" => Some(Self::Confirm),
            "resp_exchange" => Some(Self::Exchange),
            "resp_finalize" => Some(Self::Finalize),
            _ => None,
        }
    }

    /// The stored state-label string for this state.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ready => "resp_ready",
            Self::Confirm => "resp_confirm",
            Self::Exchange => "resp_exchange",
            Self::Finalize => "resp_finalize",
        }
    }
}

/// Whether a transition applied or the frame was ignored (preconditions
/// unmet, or no rule matches the current state/intent pair).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// Preconditions held; `state` and related fields were updated.
    Applied,
    /// Preconditions did not hold, or no rule applies; row unchanged.
    Ignored,
}

/// A verified handshake blob's relevant output, passed back to the caller
/// (the engine) so it can derive and cache a session key using the local
/// identity's `kx_priv`, which this module has no access to.
#[derive(Debug, Clone)]
pub struct VerifiedHandshake {
    /// Peer's long-term Ed25519 public key, base64.
    pub peer_sign_pub: String,
    /// Peer's ephemeral X25519 public key, base64.
    pub peer_kx_pub: String,
}

fn verify_hs(hs: &HandshakeBlob, ttl_seconds: i64) -> Result<VerifiedHandshake, Error> {
    let (sign_pub, kx_pub) = handshake_blob::verify(hs, ttl_seconds)?;
    Ok(VerifiedHandshake {
        peer_sign_pub: base64_encode(&sign_pub.to_bytes()),
        peer_kx_pub: base64_encode(kx_pub.as_bytes()),
    })
}

fn base64_encode(bytes: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Apply an inbound frame to an initiator-track row, per §4.7's Initiator
/// track table.
///
/// `nonce_outcome` is the result of the caller's
/// `NonceLog::record_received_once` call on `frame.my_nonce`, if present.
///
/// # Errors
///
/// Returns [`Error::Crypto`] if `frame.hs` is present but fails
/// signature/TTL verification (the frame must still be dropped by the
/// caller, not treated as a hard failure).
pub fn initiator_on_frame(
    state: &mut RoleState,
    frame: &Frame,
    nonce_outcome: Option<NonceOutcome>,
    exchange_limit: u32,
    hs_ttl_seconds: i64,
) -> Result<(TransitionOutcome, Option<VerifiedHandshake>), Error> {
    let Some(current) = InitiatorState::parse(&state.state) else {
        return Ok((TransitionOutcome::Ignored, None));
    };

    match (current, frame.intent) {
        (InitiatorState::Ready, Intent::Confirm) => {
            let Some(my_nonce) = &frame.my_nonce else {
                return Ok((TransitionOutcome::Ignored, None));
            };
            if nonce_outcome != Some(NonceOutcome::Fresh) {
                return Ok((TransitionOutcome::Ignored, None));
            }

            let verified = match &frame.hs {
                Some(hs) => Some(verify_hs(hs, hs_ttl_seconds)?),
                None => None,
            };

            state.peer_nonce = Some(my_nonce.clone());
            if let Some(v) = &verified {
                state.crypto.peer_sign_pub = Some(v.peer_sign_pub.clone());
                state.crypto.peer_kx_pub = Some(v.peer_kx_pub.clone());
            }
            state.state = InitiatorState::Exchange.as_str().to_string();
            Ok((TransitionOutcome::Applied, verified))
        }

        (InitiatorState::Exchange, Intent::Respond) => {
            let Some(your_nonce) = &frame.your_nonce else {
                return Ok((TransitionOutcome::Ignored, None));
            };
            let Some(my_nonce) = &frame.my_nonce else {
                return Ok((TransitionOutcome::Ignored, None));
            };
            if state.local_nonce.as_deref() != Some(your_nonce.as_str()) {
                return Ok((TransitionOutcome::Ignored, None));
            }
            if nonce_outcome != Some(NonceOutcome::Fresh) {
                return Ok((TransitionOutcome::Ignored, None));
            }

            state.exchange_count += 1;
            state.peer_nonce = Some(my_nonce.clone());
            state.local_nonce = None;

            if state.exchange_count > exchange_limit {
                state.state = InitiatorState::FinalizePropose.as_str().to_string();
            }
            Ok((TransitionOutcome::Applied, None))
        }

        (InitiatorState::FinalizePropose, Intent::Finish) => {
            let Some(your_ref) = &frame.your_ref else {
                return Ok((TransitionOutcome::Ignored, None));
            };
            if state.local_reference.as_deref() != Some(your_ref.as_str()) {
                return Ok((TransitionOutcome::Ignored, None));
            }
            state.peer_reference = frame.my_ref.clone();
            state.state = InitiatorState::FinalizeClose.as_str().to_string();
            Ok((TransitionOutcome::Applied, None))
        }

        _ => Ok((TransitionOutcome::Ignored, None)),
    }
}

/// Cut an initiator row in `init_finalize_close` back to `init_ready` once
/// `finalize_retry_count` exceeds `init_final_limit`, retaining both
/// references to support in-run reconnect (§4.7, §4.9 Scenario 5).
///
/// Returns whether the cutover applied.
pub fn initiator_finalize_cutover(state: &mut RoleState, init_final_limit: u32) -> bool {
    if InitiatorState::parse(&state.state) != Some(InitiatorState::FinalizeClose) {
        return false;
    }
    if state.finalize_retry_count <= init_final_limit {
        return false;
    }
    state.state = InitiatorState::Ready.as_str().to_string();
    state.exchange_count = 0;
    state.finalize_retry_count = 0;
    true
}

/// Apply an inbound frame to a responder-track row, per §4.7's Responder
/// track table.
///
/// # Errors
///
/// Returns [`Error::Crypto`] if `frame.hs` is present but fails
/// signature/TTL verification.
pub fn responder_on_frame(
    state: &mut RoleState,
    frame: &Frame,
    nonce_outcome: Option<NonceOutcome>,
    hs_ttl_seconds: i64,
) -> Result<(TransitionOutcome, Option<VerifiedHandshake>), Error> {
    let Some(current) = ResponderState::parse(&state.state) else {
        return Ok((TransitionOutcome::Ignored, None));
    };

    match (current, frame.intent) {
        (ResponderState::Ready, Intent::Register) => {
            if frame.to.is_some() {
                return Ok((TransitionOutcome::Ignored, None));
            }
            if state.local_reference.is_some() {
                return Ok((TransitionOutcome::Ignored, None));
            }
            state.state = ResponderState::Confirm.as_str().to_string();
            Ok((TransitionOutcome::Applied, None))
        }

        (ResponderState::Ready, Intent::Reconnect) => {
            let Some(your_ref) = &frame.your_ref else {
                return Ok((TransitionOutcome::Ignored, None));
            };
            if state.local_reference.as_deref() != Some(your_ref.as_str()) {
                return Ok((TransitionOutcome::Ignored, None));
            }
            state.local_reference = None;
            state.state = ResponderState::Confirm.as_str().to_string();
            Ok((TransitionOutcome::Applied, None))
        }

        (ResponderState::Confirm, Intent::Request) => {
            let Some(your_nonce) = &frame.your_nonce else {
                return Ok((TransitionOutcome::Ignored, None));
            };
            let Some(my_nonce) = &frame.my_nonce else {
                return Ok((TransitionOutcome::Ignored, None));
            };
            if state.local_nonce.as_deref() != Some(your_nonce.as_str()) {
                return Ok((TransitionOutcome::Ignored, None));
            }
            if nonce_outcome != Some(NonceOutcome::Fresh) {
                return Ok((TransitionOutcome::Ignored, None));
            }

            let verified = match &frame.hs {
                Some(hs) => Some(verify_hs(hs, hs_ttl_seconds)?),
                None => None,
            };

            state.peer_nonce = Some(my_nonce.clone());
            state.local_nonce = None;
            state.exchange_count = 1;
            if let Some(v) = &verified {
                state.crypto.peer_sign_pub = Some(v.peer_sign_pub.clone());
                state.crypto.peer_kx_pub = Some(v.peer_kx_pub.clone());
            }
            state.state = ResponderState::Exchange.as_str().to_string();
            Ok((TransitionOutcome::Applied, verified))
        }

        (ResponderState::Exchange, Intent::Request) => {
            let Some(your_nonce) = &frame.your_nonce else {
                return Ok((TransitionOutcome::Ignored, None));
            };
            let Some(my_nonce) = &frame.my_nonce else {
                return Ok((TransitionOutcome::Ignored, None));
            };
            if state.local_nonce.as_deref() != Some(your_nonce.as_str()) {
                return Ok((TransitionOutcome::Ignored, None));
            }
            if nonce_outcome != Some(NonceOutcome::Fresh) {
                return Ok((TransitionOutcome::Ignored, None));
            }

            state.exchange_count += 1;
            state.peer_nonce = Some(my_nonce.clone());
            state.local_nonce = None;
            Ok((TransitionOutcome::Applied, None))
        }

        (ResponderState::Exchange, Intent::Conclude) => {
            state.peer_reference = frame.my_ref.clone();
            state.exchange_count = 0;
            state.state = ResponderState::Finalize.as_str().to_string();
            Ok((TransitionOutcome::Applied, None))
        }

        (ResponderState::Finalize, Intent::Close) => {
            let Some(your_ref) = &frame.your_ref else {
                return Ok((TransitionOutcome::Ignored, None));
            };
            if state.local_reference.as_deref() != Some(your_ref.as_str()) {
                return Ok((TransitionOutcome::Ignored, None));
            }
            state.peer_reference = frame.my_ref.clone();
            state.finalize_retry_count = 0;
            state.exchange_count = 0;
            state.state = ResponderState::Ready.as_str().to_string();
            Ok((TransitionOutcome::Applied, None))
        }

        _ => Ok((TransitionOutcome::Ignored, None)),
    }
}

/// Wipe a responder row's references once `finalize_retry_count` exceeds
/// `resp_final_limit` without a valid `close` (§4.7, §4.9 Scenario 6).
///
/// Returns whether the timeout applied.
pub fn responder_finalize_timeout(state: &mut RoleState, resp_final_limit: u32) -> bool {
    if ResponderState::parse(&state.state) != Some(ResponderState::Finalize) {
        return false;
    }
    if state.finalize_retry_count <= resp_final_limit {
        return false;
    }
    state.local_reference = None;
    state.peer_reference = None;
    state.state = ResponderState::Ready.as_str().to_string();
    true
}

/// Validate that `frame.intent` is a value this role's track can ever
/// accept from any state, ahead of the full table dispatch. Used to
/// classify frames for the [`Error::ProtocolViolation`] diagnostic path
/// rather than silently ignoring truly out-of-protocol intents.
#[must_use]
pub fn intent_valid_for_role(role: Role, intent: Intent) -> bool {
    match role {
        Role::Initiator => matches!(intent, Intent::Confirm | Intent::Respond | Intent::Finish),
        Role::Responder => matches!(
            intent,
            Intent::Register | Intent::Reconnect | Intent::Request | Intent::Conclude | Intent::Close
        ),
    }
}

/// Build the [`Error::ProtocolViolation`] diagnostic for a frame whose
/// intent is structurally valid for the role but not accepted from the
/// row's current state.
#[must_use]
pub fn protocol_violation(state: &RoleState, frame: &Frame) -> Error {
    Error::ProtocolViolation {
        intent: frame.intent.to_string(),
        state: state.state.clone(),
    }
}
