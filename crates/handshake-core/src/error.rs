//! Error types and the failure-semantics taxonomy.
//!
//! Every error the engine can produce is classified into one of six
//! categories, each with a fixed disposition: drop the frame and log at a
//! given level, abort the in-flight transition and retry next tick, or
//! refuse to start at all. [`ErrorCategory`] is that disposition; callers
//! match on it rather than on individual [`Error`] variants so new error
//! variants never silently bypass the handling rule for their category.

use thiserror::Error;

/// One of the six failure-semantics categories a frame/transition error
/// falls into, each with a fixed disposition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Malformed frame or blob. Disposition: drop, log at `info`.
    Validation,
    /// Duplicate or stale nonce. Disposition: drop, log at `warn`.
    Replay,
    /// Signature, AEAD, or key-derivation failure. Disposition: drop, log
    /// at `warn`.
    Crypto,
    /// Frame arrived for a state that doesn't accept it. Disposition:
    /// drop, log at `info`.
    Protocol,
    /// Identity/role-state/nonce-log I/O failure. Disposition: abort this
    /// transition, retry on the next tick, log at `error`.
    Storage,
    /// Unrecoverable startup condition. Disposition: refuse to start.
    Fatal,
}

impl ErrorCategory {
    /// Whether this category's disposition is to retry the operation on
    /// the next tick, rather than drop it permanently.
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorCategory::Storage)
    }

    /// Whether this category should prevent the engine from starting at
    /// all, rather than being handled per-frame at runtime.
    #[must_use]
    pub fn is_fatal(self) -> bool {
        matches!(self, ErrorCategory::Fatal)
    }
}

/// Engine-level errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Frame-level validation error.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// Role state store error.
    #[error("role state error: {0}")]
    RoleState(#[from] RoleStateError),

    /// Cryptographic error.
    #[error("crypto error: {0}")]
    Crypto(#[from] handshake_crypto::CryptoError),

    /// Nonce was a duplicate of a previously recorded event for this
    /// `(self, role, peer)`.
    #[error("duplicate nonce")]
    ReplayedNonce,

    /// Frame's intent is not valid for the role state's current FSM state.
    #[error("frame intent {intent} not valid from state {state}")]
    ProtocolViolation {
        /// The frame's `intent` field.
        intent: String,
        /// The current FSM state name.
        state: String,
    },

    /// Identity store I/O failure.
    #[error("identity store error: {0}")]
    Identity(String),

    /// Underlying I/O failure (bus socket, identity file).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A fatal condition that should prevent the engine from starting.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl Error {
    /// Classify this error into its failure-semantics category.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Frame(_) => ErrorCategory::Validation,
            Error::ReplayedNonce => ErrorCategory::Replay,
            Error::Crypto(_) => ErrorCategory::Crypto,
            Error::ProtocolViolation { .. } => ErrorCategory::Protocol,
            Error::RoleState(_) | Error::Identity(_) | Error::Io(_) => ErrorCategory::Storage,
            Error::Fatal(_) => ErrorCategory::Fatal,
        }
    }
}

/// Frame-level (wire contract) errors, checked by the receive hook before
/// any frame reaches the FSM.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Frame body is not valid JSON.
    #[error("malformed frame json: {0}")]
    MalformedJson(String),

    /// Required field missing or of the wrong shape.
    #[error("missing or invalid field: {0}")]
    MissingField(&'static str),

    /// Unknown `intent` value.
    #[error("unknown intent: {0}")]
    UnknownIntent(String),

    /// `from` field did not match the frame's declared sender in context
    /// where that is checkable (e.g. replying to a known peer).
    #[error("sender mismatch: expected {expected}, got {actual}")]
    SenderMismatch {
        /// Expected sender agent id.
        expected: String,
        /// Actual sender agent id in the frame.
        actual: String,
    },

    /// `your_nonce` did not match the counterpart's recorded local nonce.
    #[error("nonce mismatch")]
    NonceMismatch,
}

/// Role State Store errors.
#[derive(Debug, Error)]
pub enum RoleStateError {
    /// No row exists for the given key and none was permitted to be
    /// created implicitly.
    #[error("no role state row for key")]
    NotFound,

    /// Underlying storage I/O failure.
    #[error("role state storage failure: {0}")]
    Storage(String),
}
