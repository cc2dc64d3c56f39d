//! # Handshake Core
//!
//! Multi-peer cryptographic handshake and session protocol engine: role-scoped
//! per-peer state machines, signed X25519 handshakes, AES-GCM secure message
//! envelopes, and replay-protected nonce logging over a line-delimited JSON
//! message bus.
//!
//! This crate provides:
//! - **Identity Store**: load/seal/rotate an agent's long-term keypairs
//! - **Nonce Log**: append-only, replay-protected record of seen nonces
//! - **Role State Store**: one row per `(self, role, peer)` tracking FSM state
//! - **State Machine Core**: the initiator and responder transition tables
//! - **Send Driver**: periodic tick plus event-driven frame emission
//! - **State Sync Bridge**: translates role-state rows to/from bus-visible form
//! - **Message Bus Client**: line-delimited JSON frames over a socket
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                   Engine (per self_id dispatcher)             │
//! ├───────────────────────────┬──────────────────────────────────┤
//! │        Send Driver         │       State Machine Core        │
//! │  (tick + event-driven send) │  (initiator / responder FSMs)  │
//! ├───────────────────────────┴──────────────────────────────────┤
//! │   Role State Store   │   Nonce Log   │   State Sync Bridge   │
//! ├───────────────────────┴───────────────┴───────────────────────┤
//! │                  Message Bus Client (JSON frames)              │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Structure
//!
//! - [`identity_store`]: Sealed, file-backed long-term identity
//! - [`nonce_log`]: Replay protection
//! - [`role_state`]: Per-peer, per-role FSM row storage
//! - [`fsm`]: Initiator/responder state transition tables
//! - [`sync_bridge`]: Role-state row to/from bus-visible frame translation
//! - [`bus`]: Message bus client
//! - [`send_driver`]: Tick loop and event-driven sender
//! - [`engine`]: Per-agent dispatcher tying the above together
//! - [`frame`]: Bus frame encoding/decoding
//! - [`config`]: Tunables
//! - [`error`]: Error types and the failure-semantics taxonomy

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod bus;
pub mod config;
pub mod engine;
pub mod error;
pub mod frame;
pub mod fsm;
pub mod identity_store;
pub mod nonce_log;
pub mod role_state;
pub mod send_driver;
pub mod sync_bridge;

pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{Error, ErrorCategory};
pub use frame::{Frame, Intent};
pub use fsm::{InitiatorState, ResponderState, Role};
pub use nonce_log::{NonceFlow, NonceLog, NonceOutcome};
pub use role_state::{RoleState, RoleStateKey, RoleStateStore};

/// Default handshake blob/envelope TTL window, in seconds.
pub const HS_TTL_SECONDS: i64 = 60;

/// Maximum initiator exchange round-trips before falling back.
pub const EXCHANGE_LIMIT: u32 = 3;

/// Maximum initiator finalize retries before reverting to `init_ready`.
pub const INIT_FINAL_LIMIT: u32 = 3;

/// Maximum responder finalize retries before reverting to `resp_ready`.
pub const RESP_FINAL_LIMIT: u32 = 5;

/// Send Driver tick interval, in seconds.
pub const TICK_INTERVAL_SECS: u64 = 1;
