//! Control-state tracking.
//!
//! Control over a resource (a channel, usually) is held by one subject at a
//! time with some authority. Every handover is published as a [`Transfer`]
//! on [`CONTROL_STATE_CHANNEL`]. A [`StateTracker`] folds those transfers
//! into a `resource -> State` map and exposes it as a watch.
//!
//! ```rust,ignore
//! let tracker = StateTracker::open(&mux)?;
//! let mut states = tracker.subscribe();
//! while states.changed().await.is_ok() {
//!     for state in states.borrow().values() {
//!         println!("{} held by {}", state.resource, state.subject.name);
//!     }
//! }
//! tracker.close().await;
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use fluxsync_api::Transport;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::config::SyncConfig;
use crate::error::{ListenerError, SyncError};
use crate::multiplexer::Multiplexer;
use crate::registry::{Listener, Subscription};
use crate::schema::{Channel, JsonSchema};

/// Well-known channel carrying control transfers.
pub const CONTROL_STATE_CHANNEL: &str = "sy_node_1_control";

pub const CONTROL_STATE: Channel<JsonSchema<ControlUpdate>> =
    Channel::new(CONTROL_STATE_CHANNEL, JsonSchema::new());

/// Key of a controlled resource.
pub type Resource = u32;

// ── Wire types ───────────────────────────────────────────────────────

/// Who holds control.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Subject {
    pub key: String,
    pub name: String,
}

/// Control of one resource by one subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    pub subject: Subject,
    pub resource: Resource,
    pub authority: u8,
}

/// A handover. `from: None` is an acquisition, `to: None` a release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    #[serde(default)]
    pub from: Option<State>,
    #[serde(default)]
    pub to: Option<State>,
}

impl Transfer {
    pub fn is_release(&self) -> bool {
        self.to.is_none()
    }

    /// The resource this transfer concerns.
    pub fn resource(&self) -> Option<Resource> {
        self.to
            .as_ref()
            .or(self.from.as_ref())
            .map(|state| state.resource)
    }
}

impl fmt::Display for Transfer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let holder = |s: &Option<State>| {
            s.as_ref()
                .map_or_else(|| "nobody".to_owned(), |s| format!("{} ({})", s.subject.name, s.authority))
        };
        match self.resource() {
            Some(resource) => write!(
                f,
                "resource {resource}: {} -> {}",
                holder(&self.from),
                holder(&self.to)
            ),
            None => f.write_str("empty transfer"),
        }
    }
}

/// One control update: every transfer applied in a single step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlUpdate {
    pub transfers: Vec<Transfer>,
}

/// Apply `transfers` to `states` in order.
pub fn apply_transfers(states: &mut HashMap<Resource, State>, transfers: &[Transfer]) {
    for transfer in transfers {
        match (&transfer.from, &transfer.to) {
            (_, Some(to)) => {
                states.insert(to.resource, to.clone());
            }
            (Some(from), None) => {
                states.remove(&from.resource);
            }
            (None, None) => {}
        }
    }
}

// ── TrackerStatus ────────────────────────────────────────────────────

/// Whether the tracker's view can be trusted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerStatus {
    /// Subscribed, no update received since the subscription (re)opened.
    Pending,
    /// Updates are arriving.
    Live,
    /// The subscription dropped; the view may be stale until it reopens.
    Disconnected { reason: String },
    /// Reconnecting was abandoned.
    Failed { reason: String },
    /// The tracker was closed.
    Closed,
}

impl TrackerStatus {
    pub fn is_stale(&self) -> bool {
        !matches!(self, Self::Live | Self::Pending)
    }
}

// ── StateTracker ─────────────────────────────────────────────────────

struct Shared {
    states: watch::Sender<Arc<HashMap<Resource, State>>>,
    status: watch::Sender<TrackerStatus>,
}

struct TrackerListener(Arc<Shared>);

impl Listener<ControlUpdate> for TrackerListener {
    fn on_change(&self, update: &ControlUpdate) -> Result<(), ListenerError> {
        self.0.states.send_modify(|states| {
            apply_transfers(Arc::make_mut(states), &update.transfers);
        });
        self.0
            .status
            .send_if_modified(|status| set_status(status, TrackerStatus::Live));
        debug!(transfers = update.transfers.len(), "control state updated");
        Ok(())
    }

    fn on_transport_error(&self, error: &SyncError) {
        let next = if error.is_terminal() {
            TrackerStatus::Failed {
                reason: error.to_string(),
            }
        } else {
            TrackerStatus::Disconnected {
                reason: error.to_string(),
            }
        };
        self.0.status.send_if_modified(|status| set_status(status, next));
    }

    fn on_transport_restored(&self) {
        self.0.status.send_if_modified(|status| match *status {
            TrackerStatus::Disconnected { .. } | TrackerStatus::Failed { .. } => {
                set_status(status, TrackerStatus::Pending)
            }
            _ => false,
        });
        debug!("control state subscription restored");
    }
}

fn set_status(current: &mut TrackerStatus, next: TrackerStatus) -> bool {
    if *current == next {
        return false;
    }
    *current = next;
    true
}

/// Tracks which subject controls which resource.
///
/// Opened either on a shared [`Multiplexer`] or, with
/// [`dedicated`](Self::dedicated), on a private one. Release it with
/// [`close`](Self::close); dropping also unsubscribes, but does not wait
/// for a private multiplexer to shut down.
pub struct StateTracker {
    shared: Arc<Shared>,
    subscription: Subscription,
    owned: Option<Multiplexer>,
}

impl fmt::Debug for StateTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateTracker")
            .field("status", &*self.shared.status.borrow())
            .field("resources", &self.shared.states.borrow().len())
            .field("dedicated", &self.owned.is_some())
            .finish()
    }
}

impl StateTracker {
    /// Track control state through a shared multiplexer.
    pub fn open(mux: &Multiplexer) -> Result<Self, SyncError> {
        let (states, _) = watch::channel(Arc::new(HashMap::new()));
        let (status, _) = watch::channel(TrackerStatus::Pending);
        let shared = Arc::new(Shared { states, status });
        let subscription = mux.register(&CONTROL_STATE, TrackerListener(Arc::clone(&shared)))?;
        info!(channel = CONTROL_STATE_CHANNEL, "control state tracker opened");
        Ok(Self {
            shared,
            subscription,
            owned: None,
        })
    }

    /// Track control state over a private subscription whose only demand is
    /// the control channel.
    pub fn dedicated(transport: Arc<dyn Transport>, config: SyncConfig) -> Result<Self, SyncError> {
        let mux = Multiplexer::new(transport, config);
        let mut tracker = Self::open(&mux)?;
        tracker.owned = Some(mux);
        Ok(tracker)
    }

    /// Current control state by resource.
    pub fn states(&self) -> Arc<HashMap<Resource, State>> {
        Arc::clone(&self.shared.states.borrow())
    }

    pub fn get(&self, resource: Resource) -> Option<State> {
        self.shared.states.borrow().get(&resource).cloned()
    }

    /// Follow state changes.
    pub fn subscribe(&self) -> watch::Receiver<Arc<HashMap<Resource, State>>> {
        self.shared.states.subscribe()
    }

    pub fn status(&self) -> TrackerStatus {
        self.shared.status.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<TrackerStatus> {
        self.shared.status.subscribe()
    }

    /// The multiplexer owned by a dedicated tracker.
    pub fn multiplexer(&self) -> Option<&Multiplexer> {
        self.owned.as_ref()
    }

    /// Release the subscription, and shut down the private multiplexer of a
    /// dedicated tracker.
    pub async fn close(self) {
        self.subscription.unsubscribe();
        if let Some(mux) = &self.owned {
            mux.shutdown().await;
        }
        self.shared
            .status
            .send_if_modified(|status| set_status(status, TrackerStatus::Closed));
        info!("control state tracker closed");
    }
}
