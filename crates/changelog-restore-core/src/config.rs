//! Configuration for the changelog reader.

use serde::{Deserialize, Serialize};

/// Tuning knobs for a [`ChangelogReader`](crate::ChangelogReader).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreConfig {
    /// Upper bound on a single consumer poll in milliseconds (default: 10).
    ///
    /// Kept small so the owning thread can interleave restoration with its
    /// other bookkeeping.
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,

    /// Identifier of the owning stream thread, carried into log lines.
    #[serde(default)]
    pub thread_id: Option<String>,
}

impl Default for RestoreConfig {
    fn default() -> Self {
        Self {
            poll_timeout_ms: default_poll_timeout_ms(),
            thread_id: None,
        }
    }
}

fn default_poll_timeout_ms() -> u64 {
    10
}
