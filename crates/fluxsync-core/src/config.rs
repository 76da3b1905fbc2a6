// ── Synchronizer tuning ──
//
// Runtime knobs for a multiplexer. Built by the caller (usually from a
// `fluxsync-config` profile) and handed to `Multiplexer::new`; core never
// reads configuration files.

use std::time::Duration;

use fluxsync_api::ReconnectConfig;

/// Configuration for one [`Multiplexer`](crate::Multiplexer).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Retry policy for opening and re-opening the shared subscription.
    pub reconnect: ReconnectConfig,

    /// How long an empty demand set keeps the subscription open before it
    /// is closed. New demand inside this window cancels the close.
    pub linger: Duration,

    /// Capacity of the error side-channel. Slow receivers miss the oldest errors.
    pub error_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            reconnect: ReconnectConfig::default(),
            linger: Duration::from_millis(100),
            error_capacity: 256,
        }
    }
}

impl SyncConfig {
    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn with_linger(mut self, linger: Duration) -> Self {
        self.linger = linger;
        self
    }
}
