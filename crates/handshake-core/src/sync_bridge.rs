//! State Sync Bridge: translates role-state rows to/from bus-visible form,
//! §4.6.

use std::collections::HashMap;

use crate::fsm::Role;
use crate::role_state::{RoleStateKey, RoleStateStore};

const INITIATOR_PREFERENCE: &[&str] = &[
    "init_ready",
    "init_finalize_close",
    "init_finalize_propose",
    "init_exchange",
    "init_exchange_0",
];

const RESPONDER_PREFERENCE: &[&str] = &[
    "resp_ready",
    "resp_finalize",
    "resp_confirm",
    "resp_exchange",
    "resp_exchange_0",
];

fn preference_order(role: Role) -> &'static [&'static str] {
    match role {
        Role::Initiator => INITIATOR_PREFERENCE,
        Role::Responder => RESPONDER_PREFERENCE,
    }
}

/// Produce a mapping from `"<role>:<peer_id>"` to the current `state` for
/// every known row of `(self_id, role)`.
///
/// Returns an empty map if no peer rows are known for this role, per
/// §4.6's "no inbound peer known this cycle" rule.
pub async fn upload(
    store: &RoleStateStore,
    self_id: &str,
    role: Role,
) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for key in store.scan(self_id, role) {
        if let Ok(row) = store.read(&key).await {
            out.insert(format!("{}:{}", role.as_str(), key.peer_id), row.state);
        }
    }
    out
}

/// Ingest a set of allowed next-states per `"<role>:<peer_id>"` compound
/// key, choosing among multiple allowed states by the role's preference
/// order, and writing the chosen state to the exact row.
///
/// Keys without a `":"` separator are ignored. Keys whose role prefix does
/// not match `self_id`'s own scope are still honored as long as they parse
/// (the bridge is role-agnostic about *which* self issued the download; the
/// caller is expected to only pass keys relevant to its own rows).
pub async fn download(
    store: &RoleStateStore,
    self_id: &str,
    allowed: &HashMap<String, Vec<String>>,
) {
    for (compound_key, states) in allowed {
        let Some((role_str, peer_id)) = compound_key.split_once(':') else {
            continue;
        };
        let role = match role_str {
            "initiator" => Role::Initiator,
            "responder" => Role::Responder,
            _ => continue,
        };
        if states.is_empty() {
            continue;
        }

        let chosen = choose_preferred(role, states);
        let Some(chosen) = chosen else {
            continue;
        };

        let key = RoleStateKey::new(self_id, role, peer_id);
        store
            .update(&key, |row| {
                row.state = chosen.to_string();
            })
            .await;
    }
}

fn choose_preferred<'a>(role: Role, allowed: &'a [String]) -> Option<&'a str> {
    let order = preference_order(role);
    for candidate in order {
        if let Some(found) = allowed.iter().find(|s| s.as_str() == *candidate) {
            return Some(found.as_str());
        }
    }
    // Fall back to the first allowed entry if none matched the known
    // preference list, rather than silently dropping an otherwise valid
    // instruction.
    allowed.first().map(String::as_str)
}
