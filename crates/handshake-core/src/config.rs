//! Engine tunables, §6/§12.

use serde::{Deserialize, Serialize};

fn default_exchange_limit() -> u32 {
    crate::EXCHANGE_LIMIT
}

fn default_init_final_limit() -> u32 {
    crate::INIT_FINAL_LIMIT
}

fn default_resp_final_limit() -> u32 {
    crate::RESP_FINAL_LIMIT
}

fn default_hs_ttl_seconds() -> i64 {
    crate::HS_TTL_SECONDS
}

fn default_tick_interval_secs() -> u64 {
    crate::TICK_INTERVAL_SECS
}

/// The six tunables of §6, plus the agent's own name. Deserializes from the
/// CLI's TOML config with spec-matching defaults for any field left unset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// This agent's stable name, used to locate its identity file.
    pub agent_name: String,

    /// Initiator exchange-round cutover threshold.
    #[serde(default = "default_exchange_limit")]
    pub exchange_limit: u32,

    /// Initiator finalize retry cap.
    #[serde(default = "default_init_final_limit")]
    pub init_final_limit: u32,

    /// Responder finalize retry cap.
    #[serde(default = "default_resp_final_limit")]
    pub resp_final_limit: u32,

    /// Handshake nonce TTL window, in seconds.
    #[serde(default = "default_hs_ttl_seconds")]
    pub hs_ttl_seconds: i64,

    /// Periodic tick cadence, in seconds.
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
}

impl EngineConfig {
    /// Build a config for `agent_name` using the spec's default tunables.
    #[must_use]
    pub fn with_defaults(agent_name: impl Into<String>) -> Self {
        Self {
            agent_name: agent_name.into(),
            exchange_limit: default_exchange_limit(),
            init_final_limit: default_init_final_limit(),
            resp_final_limit: default_resp_final_limit(),
            hs_ttl_seconds: default_hs_ttl_seconds(),
            tick_interval_secs: default_tick_interval_secs(),
        }
    }

    /// Check tunables are non-zero and sane. Mirrors the reference CLI
    /// config's `validate()` shape, but returns a typed error rather than
    /// `anyhow::bail!` since this lives in the engine crate.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Fatal`] if any tunable is zero or the agent
    /// name is empty.
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.agent_name.trim().is_empty() {
            return Err(crate::Error::Fatal("agent_name must not be empty".into()));
        }
        if self.exchange_limit == 0 {
            return Err(crate::Error::Fatal("exchange_limit must be > 0".into()));
        }
        if self.init_final_limit == 0 {
            return Err(crate::Error::Fatal("init_final_limit must be > 0".into()));
        }
        if self.resp_final_limit == 0 {
            return Err(crate::Error::Fatal("resp_final_limit must be > 0".into()));
        }
        if self.hs_ttl_seconds <= 0 {
            return Err(crate::Error::Fatal("hs_ttl_seconds must be > 0".into()));
        }
        if self.tick_interval_secs == 0 {
            return Err(crate::Error::Fatal("tick_interval_secs must be > 0".into()));
        }
        Ok(())
    }
}
