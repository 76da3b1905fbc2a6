// ── Shared stream multiplexer ──
//
// One transport subscription shared by every listener. A background
// driver follows the registry's demand set: it opens the subscription
// when the set becomes non-empty, retargets it as channels come and go,
// and closes it once the set has stayed empty for the linger window.
// Dropped subscriptions are retried with exponential backoff.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use fluxsync_api::{Error as ApiError, Frame, Streamer, Transport, calculate_backoff};
use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::registry::{Listener, Registry, Subscription};
use crate::schema::{Channel, Schema};

// ── ConnectionState ──────────────────────────────────────────────────

/// State of the shared subscription, observable by bindings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No channels demanded, nothing open.
    Idle,
    /// Waiting for the transport to acknowledge the subscription.
    Opening,
    /// Frames are flowing.
    Open,
    /// The subscription failed or dropped; waiting to retry.
    Reconnecting { attempt: u32 },
    /// Demand dropped to zero; the subscription closes unless new demand
    /// arrives within the linger window.
    Closing,
    /// Retries exhausted. Nothing is retried until the demand set changes.
    Failed,
}

impl ConnectionState {
    /// `true` while frames can be delivered.
    pub fn is_open(self) -> bool {
        matches!(self, Self::Open | Self::Closing)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Opening => f.write_str("opening"),
            Self::Open => f.write_str("open"),
            Self::Reconnecting { attempt } => write!(f, "reconnecting (attempt {attempt})"),
            Self::Closing => f.write_str("closing"),
            Self::Failed => f.write_str("failed"),
        }
    }
}

/// Counters describing the driver's work so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MuxStats {
    /// Subscriptions successfully opened.
    pub opens: u64,
    /// Subscriptions released, cleanly or after a drop.
    pub closes: u64,
    /// Channel-set retargets on an open subscription.
    pub updates: u64,
    /// Frames received.
    pub frames: u64,
    /// Subscriptions currently open (0 or 1).
    pub live: u64,
}

// ── Multiplexer ──────────────────────────────────────────────────────

/// The shared synchronizer handle.
///
/// Cheaply cloneable via `Arc<MuxInner>`; construct one per backend and
/// pass it down to every binding. Dropping the last clone cancels the
/// driver.
#[derive(Clone)]
pub struct Multiplexer {
    inner: Arc<MuxInner>,
}

struct MuxInner {
    registry: Arc<Registry>,
    state: watch::Sender<ConnectionState>,
    stats: watch::Sender<MuxStats>,
    errors: broadcast::Sender<Arc<SyncError>>,
    cancel: CancellationToken,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for MuxInner {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl fmt::Debug for Multiplexer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Multiplexer")
            .field("state", &*self.inner.state.borrow())
            .field("registry", &self.inner.registry)
            .finish_non_exhaustive()
    }
}

impl Multiplexer {
    /// Create a multiplexer over `transport` and spawn its driver.
    ///
    /// Must be called from within a Tokio runtime. Nothing is opened until
    /// the first listener registers.
    pub fn new(transport: Arc<dyn Transport>, config: SyncConfig) -> Self {
        let registry = Arc::new(Registry::new());
        let (state, _) = watch::channel(ConnectionState::Idle);
        let (stats, _) = watch::channel(MuxStats::default());
        let (errors, _) = broadcast::channel(config.error_capacity.max(1));
        let cancel = CancellationToken::new();

        let driver = Driver {
            demand: registry.watch_demand(),
            registry: Arc::clone(&registry),
            transport,
            config,
            state: state.clone(),
            stats: stats.clone(),
            errors: errors.clone(),
            cancel: cancel.clone(),
        };
        let handle = tokio::spawn(driver.run());

        Self {
            inner: Arc::new(MuxInner {
                registry,
                state,
                stats,
                errors,
                cancel,
                driver: Mutex::new(Some(handle)),
            }),
        }
    }

    /// Register `listener` on `channel`. See [`Registry::register`].
    ///
    /// While the subscription is reconnecting or has failed, the new
    /// listener's `on_transport_error` is called before this returns.
    pub fn register<S, L>(
        &self,
        channel: &Channel<S>,
        listener: L,
    ) -> Result<Subscription, SyncError>
    where
        S: Schema + Clone,
        L: Listener<S::Value>,
    {
        self.inner.registry.register(channel, listener)
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.inner.registry
    }

    /// The transport error that took the subscription down, until it reopens.
    pub fn outage(&self) -> Option<Arc<SyncError>> {
        self.inner.registry.outage()
    }

    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Error side-channel: decode, listener and transport failures.
    pub fn errors(&self) -> broadcast::Receiver<Arc<SyncError>> {
        self.inner.errors.subscribe()
    }

    pub fn stats(&self) -> MuxStats {
        *self.inner.stats.borrow()
    }

    /// Stop the driver, closing any open subscription.
    ///
    /// Further registrations fail with [`SyncError::Closed`]. Existing
    /// subscriptions stay valid but receive nothing more.
    pub async fn shutdown(&self) {
        self.inner.registry.close();
        self.inner.cancel.cancel();
        if let Some(handle) = self.inner.driver.lock().await.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "multiplexer driver did not exit cleanly");
            }
        }
        debug!("multiplexer shut down");
    }
}

// ── Driver ───────────────────────────────────────────────────────────

enum Served {
    /// Demand drained and the subscription was closed.
    Drained,
    /// Retry budget exhausted.
    Failed,
    Cancelled,
}

enum Pump {
    Drained,
    Cancelled,
    Dropped(ApiError),
}

enum Retry {
    Again,
    GiveUp,
    Drained,
    Cancelled,
}

enum Linger {
    Resumed,
    Expired,
    Cancelled,
}

struct Driver {
    registry: Arc<Registry>,
    demand: watch::Receiver<BTreeSet<String>>,
    transport: Arc<dyn Transport>,
    config: SyncConfig,
    state: watch::Sender<ConnectionState>,
    stats: watch::Sender<MuxStats>,
    errors: broadcast::Sender<Arc<SyncError>>,
    cancel: CancellationToken,
}

impl Driver {
    async fn run(mut self) {
        while let Some(channels) = self.wait_for_demand().await {
            match self.serve(channels).await {
                Served::Drained => self.registry.clear_outage(),
                Served::Cancelled => break,
                Served::Failed => {
                    self.set_state(ConnectionState::Failed);
                    if !self.wait_for_demand_change().await {
                        break;
                    }
                }
            }
        }
        self.set_state(ConnectionState::Idle);
        debug!("multiplexer driver exiting");
    }

    /// Wait until at least one channel is demanded. `None` on cancel.
    async fn wait_for_demand(&mut self) -> Option<BTreeSet<String>> {
        loop {
            let demanded = self.demand.borrow_and_update().clone();
            if !demanded.is_empty() {
                return Some(demanded);
            }
            self.set_state(ConnectionState::Idle);
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return None,
                changed = self.demand.changed() => changed.ok()?,
            }
        }
    }

    async fn wait_for_demand_change(&mut self) -> bool {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => false,
            changed = self.demand.changed() => changed.is_ok(),
        }
    }

    /// Open, pump and reopen the subscription until demand drains, retries
    /// run out, or the driver is cancelled.
    async fn serve(&mut self, mut channels: BTreeSet<String>) -> Served {
        let mut attempt: u32 = 0;
        loop {
            if attempt == 0 {
                self.set_state(ConnectionState::Opening);
            }
            let list: Vec<String> = channels.iter().cloned().collect();
            let opened = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Served::Cancelled,
                opened = self.transport.open_streamer(&list) => opened,
            };

            let err = match opened {
                Ok(mut streamer) => {
                    attempt = 0;
                    self.bump(|s| {
                        s.opens += 1;
                        s.live += 1;
                    });
                    self.set_state(ConnectionState::Open);
                    info!(channels = ?list, "subscription open");
                    self.registry.notify_restored(channels.iter());

                    let outcome = self.pump(streamer.as_mut(), &mut channels).await;
                    self.release(streamer.as_mut()).await;
                    match outcome {
                        Pump::Drained => return Served::Drained,
                        Pump::Cancelled => return Served::Cancelled,
                        Pump::Dropped(err) => err,
                    }
                }
                Err(err) => err,
            };

            match self.retry(&mut channels, &err, &mut attempt).await {
                Retry::Again => {}
                Retry::GiveUp => return Served::Failed,
                Retry::Drained => return Served::Drained,
                Retry::Cancelled => return Served::Cancelled,
            }
        }
    }

    /// Deliver frames and follow demand changes on an open subscription.
    async fn pump(&mut self, streamer: &mut dyn Streamer, channels: &mut BTreeSet<String>) -> Pump {
        loop {
            let demanded = self.demand.borrow_and_update().clone();
            if demanded.is_empty() {
                match self.linger().await {
                    Linger::Resumed => continue,
                    Linger::Expired => return Pump::Drained,
                    Linger::Cancelled => return Pump::Cancelled,
                }
            }
            if demanded != *channels {
                let list: Vec<String> = demanded.iter().cloned().collect();
                if let Err(err) = streamer.update(&list).await {
                    return Pump::Dropped(err);
                }
                debug!(channels = ?list, "subscription retargeted");
                *channels = demanded;
                self.bump(|s| s.updates += 1);
            }

            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Pump::Cancelled,
                changed = self.demand.changed() => {
                    if changed.is_err() {
                        return Pump::Cancelled;
                    }
                }
                next = streamer.next() => match next {
                    Some(Ok(frame)) => self.dispatch(&frame),
                    Some(Err(err)) => return Pump::Dropped(err),
                    None => return Pump::Dropped(ApiError::StreamEnded),
                },
            }
        }
    }

    /// Hold the subscription open for the linger window after demand drains.
    async fn linger(&mut self) -> Linger {
        self.set_state(ConnectionState::Closing);
        let deadline = tokio::time::sleep(self.config.linger);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Linger::Cancelled,
                () = &mut deadline => return Linger::Expired,
                changed = self.demand.changed() => {
                    if changed.is_err() {
                        return Linger::Cancelled;
                    }
                    if !self.demand.borrow().is_empty() {
                        debug!("new demand during linger, keeping subscription open");
                        self.set_state(ConnectionState::Open);
                        return Linger::Resumed;
                    }
                }
            }
        }
    }

    /// Report a failed or dropped subscription and back off before the next
    /// attempt.
    async fn retry(
        &mut self,
        channels: &mut BTreeSet<String>,
        err: &ApiError,
        attempt: &mut u32,
    ) -> Retry {
        let reconnect = &self.config.reconnect;
        let terminal = reconnect.exhausted(*attempt);
        let report = SyncError::transport(err, channels.iter().cloned(), *attempt, terminal);

        if terminal {
            error!(error = %err, attempt = *attempt, "subscription failed, giving up");
        } else {
            warn!(error = %err, attempt = *attempt, "subscription failed");
        }
        self.registry.notify_transport_error(channels.iter(), &report);
        self.publish(report);
        if terminal {
            return Retry::GiveUp;
        }

        let delay = calculate_backoff(*attempt, reconnect);
        *attempt += 1;
        self.set_state(ConnectionState::Reconnecting { attempt: *attempt });
        info!(?delay, attempt = *attempt, "retrying subscription");

        tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Retry::Cancelled,
            () = tokio::time::sleep(delay) => {}
        }

        let demanded = self.demand.borrow_and_update().clone();
        if demanded.is_empty() {
            return Retry::Drained;
        }
        *channels = demanded;
        Retry::Again
    }

    async fn release(&mut self, streamer: &mut dyn Streamer) {
        if let Err(e) = streamer.close().await {
            debug!(error = %e, "error closing subscription");
        }
        self.bump(|s| {
            s.closes += 1;
            s.live = s.live.saturating_sub(1);
        });
        info!("subscription closed");
    }

    fn dispatch(&self, frame: &Frame) {
        self.bump(|s| s.frames += 1);
        for err in self.registry.dispatch(frame) {
            self.publish(err);
        }
    }

    fn publish(&self, err: SyncError) {
        // No receivers is fine; the error was already logged.
        let _ = self.errors.send(Arc::new(err));
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            debug!(from = %current, to = %state, "connection state");
            *current = state;
            true
        });
    }

    fn bump(&self, update: impl FnOnce(&mut MuxStats)) {
        self.stats.send_modify(update);
    }
}
