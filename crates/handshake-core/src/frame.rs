//! The bus frame contract, §4.1.

use serde::{Deserialize, Serialize};

use handshake_crypto::envelope::SecureEnvelope;
use handshake_crypto::handshake_blob::HandshakeBlob;

use crate::error::FrameError;

/// The `intent` field: what kind of message this frame carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    /// Responder-side broadcast hello.
    Register,
    /// Initiator asks to resume a prior session reference.
    Reconnect,
    /// Responder's handshake reply.
    Confirm,
    /// Initiator's exchange-round message.
    Request,
    /// Responder's exchange-round reply.
    Respond,
    /// Initiator signals end of exchange rounds.
    Conclude,
    /// Responder acknowledges conclude, proposing finalize.
    Finish,
    /// Either side's finalize acknowledgment, completing teardown.
    Close,
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Intent::Register => "register",
            Intent::Reconnect => "reconnect",
            Intent::Confirm => "confirm",
            Intent::Request => "request",
            Intent::Respond => "respond",
            Intent::Conclude => "conclude",
            Intent::Finish => "finish",
            Intent::Close => "close",
        };
        f.write_str(s)
    }
}

/// A bus frame, exactly as carried over the line-delimited JSON message
/// bus. `message` and `sec` are mutually exclusive application payload
/// representations: plaintext before a session key exists, sealed after.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    /// Sender's agent id.
    pub from: String,
    /// Recipient's agent id, or `None` for broadcast.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    /// What kind of message this is.
    pub intent: Intent,
    /// Nonce this side is emitting and awaiting an echo for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub my_nonce: Option<String>,
    /// Nonce this side is echoing back to the peer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub your_nonce: Option<String>,
    /// Session reference this side is asserting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub my_ref: Option<String>,
    /// Session reference this side is echoing back to the peer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub your_ref: Option<String>,
    /// Signed handshake blob, present on the first request/confirm of a
    /// cycle.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hs: Option<HandshakeBlob>,
    /// Plaintext application payload, before a session key exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<serde_json::Value>,
    /// Sealed application payload, once a session key exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sec: Option<SecureEnvelope>,
}

impl Frame {
    /// Run the mandatory receive-hook validation: non-empty `from`, and if
    /// `to` is present it must equal `self_agent_id`. Unknown intents are
    /// rejected by serde at deserialization time (`Intent` has a closed
    /// variant set), so they never reach this check.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::MissingField`] if `from` is empty, or
    /// [`FrameError::SenderMismatch`] if `to` names a different agent.
    pub fn validate_receive(&self, self_agent_id: &str) -> Result<(), FrameError> {
        if self.from.trim().is_empty() {
            return Err(FrameError::MissingField("from"));
        }
        if let Some(to) = &self.to {
            if to != self_agent_id {
                return Err(FrameError::SenderMismatch {
                    expected: self_agent_id.to_string(),
                    actual: to.clone(),
                });
            }
        }
        Ok(())
    }

    /// Parse a single line of the bus (one JSON object) into a `Frame`.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::MalformedJson`] if the line is not a valid
    /// `Frame`.
    pub fn from_line(line: &str) -> Result<Self, FrameError> {
        serde_json::from_str(line).map_err(|e| FrameError::MalformedJson(e.to_string()))
    }

    /// Serialize this frame as a single bus line (no trailing newline).
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::MalformedJson`] if serialization fails (never
    /// happens for a well-formed `Frame`, but surfaced rather than
    /// unwrapped).
    pub fn to_line(&self) -> Result<String, FrameError> {
        serde_json::to_string(self).map_err(|e| FrameError::MalformedJson(e.to_string()))
    }

    /// Apply the mandatory send-hook: stamp `from`.
    pub fn stamp_sender(&mut self, agent_id: &str) {
        self.from = agent_id.to_string();
    }
}
