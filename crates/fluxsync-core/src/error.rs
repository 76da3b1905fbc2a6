// ── Synchronization error types ──
//
// Errors surfaced by the synchronizer to bindings and listeners. Raw
// transport errors never reach listeners directly; they are folded into
// `SyncError::Transport` together with the affected channel set and the
// retry attempt that failed.

use thiserror::Error;

/// Error returned by a listener callback.
pub type ListenerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Unified error type for the core crate.
#[derive(Debug, Clone, Error)]
pub enum SyncError {
    // ── Transport errors ─────────────────────────────────────────────
    /// The shared subscription failed to open or dropped mid-stream.
    ///
    /// `terminal` is set once the retry budget is exhausted; no further
    /// reconnect is attempted until the demanded channel set changes.
    /// `auth` marks a handshake the server refused for its credentials.
    #[error("Subscription to [{}] failed (attempt {attempt}): {reason}", .channels.join(", "))]
    Transport {
        channels: Vec<String>,
        reason: String,
        attempt: u32,
        terminal: bool,
        auth: bool,
    },

    // ── Data errors ──────────────────────────────────────────────────
    /// A sample on `channel` could not be decoded or failed validation.
    #[error("Dropped sample on '{channel}': {reason}")]
    Decode { channel: String, reason: String },

    // ── Programmer errors ────────────────────────────────────────────
    /// A channel was registered with a schema other than the one it is bound to.
    #[error("Channel '{channel}' is bound to schema {bound}, cannot register it as {requested}")]
    SchemaMismatch {
        channel: String,
        bound: String,
        requested: String,
    },

    /// A listener callback returned an error.
    #[error("Listener on '{channel}' failed: {message}")]
    Listener { channel: String, message: String },

    // ── Lifecycle errors ─────────────────────────────────────────────
    #[error("Synchronizer is shut down")]
    Closed,
}

impl SyncError {
    pub(crate) fn transport(
        err: &fluxsync_api::Error,
        channels: impl IntoIterator<Item = impl Into<String>>,
        attempt: u32,
        terminal: bool,
    ) -> Self {
        Self::Transport {
            channels: channels.into_iter().map(Into::into).collect(),
            reason: err.to_string(),
            attempt,
            terminal,
            auth: err.is_auth_failure(),
        }
    }

    /// Returns `true` for transport failures.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }

    /// Returns `true` if the synchronizer gave up reconnecting.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Transport { terminal: true, .. } | Self::Closed)
    }

    /// Returns `true` if the server rejected the credentials.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Self::Transport { auth: true, .. })
    }

    /// The channel this error concerns, if it concerns exactly one.
    pub fn channel(&self) -> Option<&str> {
        match self {
            Self::Decode { channel, .. }
            | Self::SchemaMismatch { channel, .. }
            | Self::Listener { channel, .. } => Some(channel),
            Self::Transport { channels, .. } if channels.len() == 1 => {
                channels.first().map(String::as_str)
            }
            _ => None,
        }
    }
}
