//! Wallet configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunables for a wallet and the threads it owns.
///
/// Every field has a default, so a partial JSON object is a valid config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalletConfig {
    /// Deadline on every network request (ms).
    pub request_timeout_ms: u64,

    /// Extra passes over the candidate peers when fetching a missing block.
    pub fetch_retries: u32,

    /// Upper bound on ancestors fetched for one incoming block.
    pub max_backfill: usize,

    /// Events buffered per subscriber before it starts lagging.
    pub update_capacity: usize,

    /// Deadline for each fire-and-forget push to a peer (ms).
    pub post_timeout_ms: u64,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 10_000,
            fetch_retries: 2,
            max_backfill: 10_000,
            update_capacity: 256,
            post_timeout_ms: 10_000,
        }
    }
}

impl WalletConfig {
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn post_timeout(&self) -> Duration {
        Duration::from_millis(self.post_timeout_ms)
    }
}
