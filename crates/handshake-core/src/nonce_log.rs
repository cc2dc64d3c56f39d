//! Append-only, replay-protected nonce log, §4.3.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use dashmap::DashMap;

/// Which direction a nonce event travelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NonceFlow {
    /// This agent emitted the nonce.
    Sent,
    /// This agent received the nonce from a peer.
    Received,
}

/// Result of [`NonceLog::record_received_once`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NonceOutcome {
    /// Nonce had not been seen before for this pair; now recorded.
    Fresh,
    /// Nonce was already recorded for this pair; state must not change.
    Duplicate,
}

/// Key identifying a `(self, role, peer)` conversation for nonce tracking.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NoncePairKey {
    /// This agent's id.
    pub self_id: String,
    /// `"initiator"` or `"responder"`.
    pub role: String,
    /// The peer's id.
    pub peer_id: String,
}

impl NoncePairKey {
    /// Build a key for a conversation pair.
    pub fn new(self_id: impl Into<String>, role: impl Into<String>, peer_id: impl Into<String>) -> Self {
        Self {
            self_id: self_id.into(),
            role: role.into(),
            peer_id: peer_id.into(),
        }
    }
}

#[derive(Default)]
struct PairLog {
    sent: HashSet<String>,
    received: HashSet<String>,
}

/// Append-only record of sent and received nonces scoped by
/// `(self, role, peer)`, with dedupe queries and per-pair purge.
///
/// Per-pair state is guarded by its own mutex so that different peers'
/// rows never contend on one another (per §5's "different peers proceed in
/// parallel" requirement).
#[derive(Default)]
pub struct NonceLog {
    pairs: DashMap<NoncePairKey, Arc<Mutex<PairLog>>>,
}

impl NonceLog {
    /// Construct an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn pair(&self, key: &NoncePairKey) -> Arc<Mutex<PairLog>> {
        self.pairs
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(PairLog::default())))
            .clone()
    }

    /// Record a nonce this agent sent. Always appends; sent nonces are not
    /// deduped (a resend by the send driver is a fresh logical emission).
    pub fn record_sent(&self, key: &NoncePairKey, nonce: &str) {
        let pair = self.pair(key);
        pair.lock().unwrap().sent.insert(nonce.to_string());
    }

    /// Record a nonce this agent received, atomically checking whether it
    /// was already seen for this pair.
    pub fn record_received_once(&self, key: &NoncePairKey, nonce: &str) -> NonceOutcome {
        let pair = self.pair(key);
        let mut guard = pair.lock().unwrap();
        if guard.received.contains(nonce) {
            NonceOutcome::Duplicate
        } else {
            guard.received.insert(nonce.to_string());
            NonceOutcome::Fresh
        }
    }

    /// Check whether a received nonce has already been recorded for this
    /// pair, without recording it. Used by callers that must decide a
    /// frame's freshness before committing to a transition, so a frame that
    /// is later dropped never consumes its nonce (see [`Self::mark_received`]).
    #[must_use]
    pub fn received_contains(&self, key: &NoncePairKey, nonce: &str) -> bool {
        let pair = self.pair(key);
        pair.lock().unwrap().received.contains(nonce)
    }

    /// Record a nonce this agent received, unconditionally. Callers should
    /// have already checked [`Self::received_contains`] and only call this
    /// once the transition it gates has actually been applied.
    pub fn mark_received(&self, key: &NoncePairKey, nonce: &str) {
        let pair = self.pair(key);
        pair.lock().unwrap().received.insert(nonce.to_string());
    }

    /// Delete all entries for a pair. Used on successful close.
    pub fn purge_pair(&self, key: &NoncePairKey) {
        self.pairs.remove(key);
    }

    /// Number of received-nonce entries recorded for a pair, for tests and
    /// diagnostics ("zero rows after close" invariant).
    #[must_use]
    pub fn received_count(&self, key: &NoncePairKey) -> usize {
        self.pairs
            .get(key)
            .map(|p| p.lock().unwrap().received.len())
            .unwrap_or(0)
    }

    /// Check a handshake timestamp against the TTL window. `now` and `ts`
    /// are both Unix seconds; `window` is the allowed absolute drift in
    /// either direction.
    #[must_use]
    pub fn ttl_check(now: i64, ts: i64, window: i64) -> bool {
        (now - ts).abs() <= window
    }
}
