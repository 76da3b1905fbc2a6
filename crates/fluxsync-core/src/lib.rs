// fluxsync-core: Shared-subscription state synchronization between a
// streaming transport and many independent listeners.

pub mod bind;
pub mod config;
pub mod control;
pub mod decode;
pub mod error;
pub mod model;
pub mod multiplexer;
pub mod registry;
pub mod schema;
pub mod stream;

// ── Primary re-exports ──────────────────────────────────────────────
pub use bind::{
    ALIASES, LABELS, RANGES, RELATIONSHIPS, ResourceChannels, STATUSES, Scope, TASKS,
};
pub use config::SyncConfig;
pub use control::{
    CONTROL_STATE, CONTROL_STATE_CHANNEL, ControlUpdate, StateTracker, TrackerStatus, Transfer,
};
pub use error::{ListenerError, SyncError};
pub use multiplexer::{ConnectionState, Multiplexer, MuxStats};
pub use registry::{Listener, Observer, Registry, Subscription, observer};
pub use schema::{Channel, JsonSchema, RawJson, Schema, ValidationError, Validated};
pub use stream::{ValueStream, ValueWatchStream};

pub use model::{
    Alias, AliasKey, KeyError, Label, OntologyId, Range, Relationship, Status, Task, TimeRange,
    Variant,
};

// Wire types consumers need alongside the synchronizer.
pub use fluxsync_api::{Frame, ReconnectConfig, Series, Transport};
