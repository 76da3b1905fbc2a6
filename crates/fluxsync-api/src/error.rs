use thiserror::Error;

/// Top-level error type for the `fluxsync-api` crate.
///
/// Covers every failure mode of the streaming transport: connecting,
/// the subscription handshake, mid-stream drops, and wire decoding.
/// `fluxsync-core` folds these into its own synchronization errors.
#[derive(Debug, Error)]
pub enum Error {
    // ── Connection ──────────────────────────────────────────────────
    /// WebSocket connection could not be established.
    #[error("WebSocket connection failed: {0}")]
    WebSocketConnect(String),

    /// The server answered the upgrade request with a non-101 status.
    #[error("WebSocket handshake rejected with HTTP {status}")]
    HandshakeRejected { status: u16 },

    /// WebSocket closed by the server or the network.
    #[error("WebSocket closed (code {code}): {reason}")]
    WebSocketClosed { code: u16, reason: String },

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Server did not acknowledge a subscription in time.
    #[error("Subscription not acknowledged after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    // ── Stream ──────────────────────────────────────────────────────
    /// The server reported an error on an open streamer.
    #[error("Server error: {message}")]
    Server { message: String },

    /// The stream ended without a close handshake.
    #[error("Stream ended unexpectedly")]
    StreamEnded,

    /// The streamer was already closed.
    #[error("Streamer is closed")]
    StreamerClosed,

    // ── Data ────────────────────────────────────────────────────────
    /// A wire message could not be decoded, with the raw text for debugging.
    #[error("Malformed wire message: {message}")]
    Protocol { message: String, body: String },

    /// A series payload does not match its declared data type.
    #[error("Invalid series: {0}")]
    InvalidSeries(String),
}

impl Error {
    /// Returns `true` if reconnecting might resolve this error.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::WebSocketConnect(_)
                | Self::WebSocketClosed { .. }
                | Self::Timeout { .. }
                | Self::StreamEnded
                | Self::Server { .. }
        ) || matches!(self, Self::HandshakeRejected { status } if *status >= 500 || *status == 429)
    }

    /// Returns `true` if the server refused the credentials.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Self::HandshakeRejected { status: 401 | 403 })
    }

    /// Returns `true` if the error was raised before the subscription opened.
    pub fn is_connect_failure(&self) -> bool {
        matches!(
            self,
            Self::WebSocketConnect(_)
                | Self::HandshakeRejected { .. }
                | Self::InvalidUrl(_)
                | Self::Timeout { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(Error::StreamEnded.is_transient());
        assert!(Error::Timeout { timeout_ms: 10 }.is_transient());
        assert!(!Error::InvalidSeries("odd length".into()).is_transient());
        assert!(!Error::StreamerClosed.is_transient());
    }

    #[test]
    fn connect_failure_classification() {
        assert!(Error::WebSocketConnect("refused".into()).is_connect_failure());
        assert!(Error::HandshakeRejected { status: 401 }.is_connect_failure());
        assert!(!Error::StreamEnded.is_connect_failure());
    }

    #[test]
    fn handshake_rejection_classification() {
        let unauthorized = Error::HandshakeRejected { status: 401 };
        assert!(unauthorized.is_auth_failure());
        assert!(!unauthorized.is_transient());
        assert!(Error::HandshakeRejected { status: 403 }.is_auth_failure());

        let unavailable = Error::HandshakeRejected { status: 503 };
        assert!(!unavailable.is_auth_failure());
        assert!(unavailable.is_transient());

        // A refused socket whose text happens to contain "401" is not an auth failure.
        assert!(!Error::WebSocketConnect("connect to 10.0.0.1:4010 refused".into()).is_auth_failure());
    }
}
