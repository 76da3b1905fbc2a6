//! Wire types and streaming transport for channel state synchronization.
//!
//! - **[`Frame`] / [`Series`] / [`DataType`]**: the unit of delivery on a
//!   streamer and its encoded sample columns.
//! - **[`Transport`] / [`Streamer`]**: the contract the synchronization
//!   layer consumes: open a subscription over a channel set, read frames,
//!   retarget it, close it.
//! - **[`WebSocketTransport`]**: the production transport.
//! - **[`ReconnectConfig`]**: exponential backoff used when a streamer drops.

pub mod backoff;
pub mod error;
pub mod frame;
pub mod transport;
pub mod websocket;

pub use backoff::{ReconnectConfig, calculate_backoff};
pub use error::Error;
pub use frame::{DataType, Frame, FrameEntry, Series};
pub use transport::{Streamer, Transport};
pub use websocket::{ConnectionConfig, WebSocketStreamer, WebSocketTransport};
