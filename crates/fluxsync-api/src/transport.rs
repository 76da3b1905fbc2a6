// ── Streaming transport contract ──
//
// The synchronization layer only ever talks to these two traits. The
// WebSocket transport in this crate implements them; tests substitute
// scripted in-memory transports.

use async_trait::async_trait;

use crate::error::Error;
use crate::frame::Frame;

/// Opens streamers against a server.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Open a streamer over `channels`.
    ///
    /// Resolves once the server has acknowledged the subscription, so a
    /// returned streamer is live: no frame produced after this point is lost.
    async fn open_streamer(&self, channels: &[String]) -> Result<Box<dyn Streamer>, Error>;
}

/// A single open subscription yielding frames for a set of channels.
#[async_trait]
pub trait Streamer: Send {
    /// Wait for the next frame. `None` means the stream has ended.
    ///
    /// Must be cancel-safe: dropping the future before it resolves must not
    /// lose a frame, since callers race it against other events.
    async fn next(&mut self) -> Option<Result<Frame, Error>>;

    /// Retarget the streamer at a new channel set without reopening it.
    async fn update(&mut self, channels: &[String]) -> Result<(), Error>;

    /// Request a clean close. The streamer is unusable afterwards, even if
    /// this returns an error.
    async fn close(&mut self) -> Result<(), Error>;
}
