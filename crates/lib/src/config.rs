//! Runtime configuration shared by the client and server engines.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunables for commit processing, client commit waits and key derivation.
///
/// All durations are stored in milliseconds so the struct round-trips through
/// any serde format without custom adapters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Delay between coordinator sweeps.
    pub commit_sweep_interval_ms: u64,
    /// Transient failures tolerated before a transaction is marked failed.
    pub max_commit_attempts: u32,
    /// How long a client waits for a requested commit to finish.
    pub commit_wait_timeout_ms: u64,
    /// How often a waiting client polls the transaction status.
    pub commit_poll_interval_ms: u64,
    /// Argon2id parameters, used both for client key derivation and for the
    /// server's slow hash of challenge keys.
    pub hashing: HashingConfig,
    /// Secret used to derive stable fake salts for unknown usernames.
    ///
    /// When unset the server generates a random one at startup, which keeps
    /// fake salts stable only for the lifetime of the process.
    pub server_secret: Option<String>,
}

impl Config {
    pub fn commit_sweep_interval(&self) -> Duration {
        Duration::from_millis(self.commit_sweep_interval_ms)
    }

    pub fn commit_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.commit_wait_timeout_ms)
    }

    pub fn commit_poll_interval(&self) -> Duration {
        Duration::from_millis(self.commit_poll_interval_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            commit_sweep_interval_ms: 100,
            max_commit_attempts: 5,
            commit_wait_timeout_ms: 30_000,
            commit_poll_interval_ms: 50,
            hashing: HashingConfig::default(),
            server_secret: None,
        }
    }
}

/// Argon2id cost parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HashingConfig {
    /// Memory cost in KiB.
    pub memory_kib: u32,
    /// Number of passes.
    pub iterations: u32,
    /// Degree of parallelism.
    pub parallelism: u32,
}

impl HashingConfig {
    /// The cheapest parameters Argon2 accepts.
    ///
    /// Only for tests and local experiments; these offer no real resistance to
    /// offline guessing.
    pub fn insecure_fast() -> Self {
        Self {
            memory_kib: argon2::Params::MIN_M_COST,
            iterations: argon2::Params::MIN_T_COST,
            parallelism: argon2::Params::MIN_P_COST,
        }
    }
}

impl Default for HashingConfig {
    fn default() -> Self {
        Self {
            memory_kib: argon2::Params::DEFAULT_M_COST,
            iterations: argon2::Params::DEFAULT_T_COST,
            parallelism: argon2::Params::DEFAULT_P_COST,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_fills_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"max_commit_attempts": 9, "hashing": {"iterations": 4}}"#)
                .unwrap();
        assert_eq!(config.max_commit_attempts, 9);
        assert_eq!(config.commit_sweep_interval(), Duration::from_millis(100));
        assert_eq!(config.hashing.iterations, 4);
        assert_eq!(config.hashing.memory_kib, argon2::Params::DEFAULT_M_COST);
    }
}
