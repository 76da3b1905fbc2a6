// ── Listener registry ──
//
// Channel name -> (bound schema, listeners). The set of channels with at
// least one listener is the demand set; it is published through a `watch`
// channel that the multiplexer driver follows. Registration and release
// are synchronous; opening and closing the transport subscription is the
// driver's concern.

use std::any::{Any, type_name};
use std::collections::BTreeSet;
use std::fmt;
use std::marker::PhantomData;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use fluxsync_api::Frame;
use tokio::sync::watch;
use tracing::{debug, trace, warn};

use crate::decode;
use crate::error::{ListenerError, SyncError};
use crate::schema::{Channel, ErasedSchema, Schema, SchemaKey};

// ── Listener ─────────────────────────────────────────────────────────

/// Receives decoded values for one channel.
///
/// Any `Fn(&T)` closure is a listener. Implement the trait directly to
/// report failures or to observe transport errors.
pub trait Listener<T>: Send + Sync + 'static {
    /// Called once per decoded sample, in arrival order.
    fn on_change(&self, value: &T) -> Result<(), ListenerError>;

    /// Called when the shared subscription fails or drops.
    ///
    /// A listener registered while the subscription is down is called once
    /// with the most recent failure.
    fn on_transport_error(&self, _error: &SyncError) {}

    /// Called when the subscription reopens after a transport error.
    fn on_transport_restored(&self) {}
}

impl<T, F> Listener<T> for F
where
    F: Fn(&T) + Send + Sync + 'static,
{
    fn on_change(&self, value: &T) -> Result<(), ListenerError> {
        self(value);
        Ok(())
    }
}

/// A listener built from two closures: one for values, one for transport errors.
pub struct Observer<C, E> {
    on_change: C,
    on_error: E,
}

/// Build a listener that also observes transport errors.
pub fn observer<C, E>(on_change: C, on_error: E) -> Observer<C, E> {
    Observer {
        on_change,
        on_error,
    }
}

impl<T, C, E> Listener<T> for Observer<C, E>
where
    C: Fn(&T) + Send + Sync + 'static,
    E: Fn(&SyncError) + Send + Sync + 'static,
{
    fn on_change(&self, value: &T) -> Result<(), ListenerError> {
        (self.on_change)(value);
        Ok(())
    }

    fn on_transport_error(&self, error: &SyncError) {
        (self.on_error)(error);
    }
}

// ── Type erasure ─────────────────────────────────────────────────────

trait ErasedListener: Send + Sync {
    fn deliver(&self, value: &(dyn Any + Send + Sync)) -> Result<(), ListenerError>;
    fn transport_error(&self, error: &SyncError);
    fn restored(&self);
}

struct Typed<T, L> {
    listener: L,
    _value: PhantomData<fn(&T)>,
}

impl<T, L> ErasedListener for Typed<T, L>
where
    T: Send + Sync + 'static,
    L: Listener<T>,
{
    fn deliver(&self, value: &(dyn Any + Send + Sync)) -> Result<(), ListenerError> {
        match value.downcast_ref::<T>() {
            Some(value) => self.listener.on_change(value),
            None => Err(format!("sample is not a {}", type_name::<T>()).into()),
        }
    }

    fn transport_error(&self, error: &SyncError) {
        self.listener.on_transport_error(error);
    }

    fn restored(&self) {
        self.listener.on_transport_restored();
    }
}

struct ListenerSlot {
    id: u64,
    channel: String,
    active: AtomicBool,
    listener: Box<dyn ErasedListener>,
}

impl ListenerSlot {
    fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    fn notify(&self, event: impl FnOnce(&dyn ErasedListener), what: &str) {
        if catch_unwind(AssertUnwindSafe(|| event(self.listener.as_ref()))).is_err() {
            warn!(channel = %self.channel, "listener panicked handling {what}");
        }
    }
}

struct ChannelEntry {
    key: SchemaKey,
    schema: Arc<dyn ErasedSchema>,
    listeners: Vec<Arc<ListenerSlot>>,
}

// ── Registry ─────────────────────────────────────────────────────────

/// Registered listeners keyed by channel name.
///
/// Thread-safe: channel entries live in a `DashMap`, and dispatch works on
/// a snapshot of each channel's listeners so callbacks may register or
/// unsubscribe listeners (including themselves) while a frame is being
/// delivered.
pub struct Registry {
    channels: DashMap<String, ChannelEntry>,
    demand: watch::Sender<BTreeSet<String>>,
    outage: watch::Sender<Option<Arc<SyncError>>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("demand", &*self.demand.borrow())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl Registry {
    pub fn new() -> Self {
        let (demand, _) = watch::channel(BTreeSet::new());
        let (outage, _) = watch::channel(None);
        Self {
            channels: DashMap::new(),
            demand,
            outage,
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        }
    }

    /// Register `listener` for values on `channel`.
    ///
    /// The first registration of a channel name binds it to the channel's
    /// schema; later registrations must use the same schema. The returned
    /// guard unsubscribes when dropped.
    pub fn register<S, L>(
        self: &Arc<Self>,
        channel: &Channel<S>,
        listener: L,
    ) -> Result<Subscription, SyncError>
    where
        S: Schema + Clone,
        L: Listener<S::Value>,
    {
        if self.is_closed() {
            return Err(SyncError::Closed);
        }

        let name = channel.name();
        let key = SchemaKey::of(channel.schema());
        let slot = Arc::new(ListenerSlot {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            channel: name.to_owned(),
            active: AtomicBool::new(true),
            listener: Box::new(Typed {
                listener,
                _value: PhantomData,
            }),
        });

        let mut entry = self
            .channels
            .entry(name.to_owned())
            .or_insert_with(|| ChannelEntry {
                key: key.clone(),
                schema: Arc::new(channel.schema().clone()),
                listeners: Vec::new(),
            });

        if entry.key != key {
            return Err(SyncError::SchemaMismatch {
                channel: name.to_owned(),
                bound: entry.key.name().to_owned(),
                requested: key.name().to_owned(),
            });
        }

        entry.listeners.push(Arc::clone(&slot));
        let listeners = entry.listeners.len();
        if listeners == 1 {
            self.demand.send_if_modified(|demand| demand.insert(name.to_owned()));
        }
        drop(entry);

        debug!(channel = name, listeners, "listener registered");

        // Read after the slot is visible: a concurrent fan-out either
        // included this slot or published its error before we got here.
        let outage = self.outage.borrow().clone();
        if let Some(error) = outage.filter(|e| affects(e, name)) {
            debug!(channel = name, "listener registered during outage");
            slot.notify(|l| l.transport_error(&error), "a transport error");
        }

        Ok(Subscription {
            registry: Arc::downgrade(self),
            slot,
        })
    }

    fn release(&self, slot: &ListenerSlot) {
        let Some(mut entry) = self.channels.get_mut(&slot.channel) else {
            return;
        };
        entry.listeners.retain(|s| s.id != slot.id);
        let listeners = entry.listeners.len();
        if listeners == 0 {
            self.demand
                .send_if_modified(|demand| demand.remove(&slot.channel));
        }
        drop(entry);
        debug!(channel = %slot.channel, listeners, "listener released");
    }

    /// Channels that currently have at least one listener.
    pub fn demand(&self) -> BTreeSet<String> {
        self.demand.borrow().clone()
    }

    /// Follow changes to the demand set.
    pub fn watch_demand(&self) -> watch::Receiver<BTreeSet<String>> {
        self.demand.subscribe()
    }

    pub fn listener_count(&self, channel: &str) -> usize {
        self.channels
            .get(channel)
            .map_or(0, |entry| entry.listeners.len())
    }

    /// Total listeners across all channels.
    pub fn live_listeners(&self) -> usize {
        self.channels
            .iter()
            .map(|entry| entry.listeners.len())
            .sum()
    }

    /// Reject further registrations. Existing subscriptions stay valid.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    // ── Dispatch ─────────────────────────────────────────────────────

    fn snapshot(&self, channel: &str) -> Option<(Arc<dyn ErasedSchema>, Vec<Arc<ListenerSlot>>)> {
        let entry = self.channels.get(channel)?;
        if entry.listeners.is_empty() {
            return None;
        }
        Some((Arc::clone(&entry.schema), entry.listeners.clone()))
    }

    /// Decode `frame` and deliver every valid sample to the listeners of its
    /// channel.
    ///
    /// Never panics on bad input: samples that fail to decode or validate
    /// are dropped and returned as [`SyncError::Decode`] (one per sample),
    /// failing listeners as [`SyncError::Listener`]. Channels without
    /// listeners are skipped.
    pub fn dispatch(&self, frame: &Frame) -> Vec<SyncError> {
        let mut errors = Vec::new();

        for entry in decode::dispatch_order(frame) {
            let Some((schema, listeners)) = self.snapshot(&entry.channel) else {
                trace!(channel = %entry.channel, "no listeners, skipping series");
                continue;
            };

            for sample in decode::decode_series(&entry.series) {
                let value = match sample
                    .and_then(|raw| schema.parse_erased(&raw).map_err(|e| e.to_string()))
                {
                    Ok(value) => value,
                    Err(reason) => {
                        warn!(channel = %entry.channel, %reason, "dropping invalid sample");
                        errors.push(SyncError::Decode {
                            channel: entry.channel.clone(),
                            reason,
                        });
                        continue;
                    }
                };

                for slot in &listeners {
                    if !slot.is_active() {
                        continue;
                    }
                    if let Err(message) = invoke(slot, &*value) {
                        warn!(channel = %entry.channel, %message, "listener failed");
                        errors.push(SyncError::Listener {
                            channel: entry.channel.clone(),
                            message,
                        });
                    }
                }
            }
        }

        errors
    }

    /// Tell every active listener on `channels` that the subscription failed.
    ///
    /// The error is kept until [`notify_restored`](Self::notify_restored) so
    /// listeners registered in the meantime learn of it too.
    pub fn notify_transport_error<'a>(
        &self,
        channels: impl IntoIterator<Item = &'a String>,
        error: &SyncError,
    ) {
        self.outage.send_replace(Some(Arc::new(error.clone())));
        for channel in channels {
            let Some((_, listeners)) = self.snapshot(channel) else {
                continue;
            };
            for slot in listeners.iter().filter(|slot| slot.is_active()) {
                slot.notify(|l| l.transport_error(error), "a transport error");
            }
        }
    }

    /// Tell the listeners on `channels` that the subscription is back.
    ///
    /// No-op unless a transport error was reported since the last restore.
    pub fn notify_restored<'a>(&self, channels: impl IntoIterator<Item = &'a String>) {
        if self.outage.send_replace(None).is_none() {
            return;
        }
        for channel in channels {
            let Some((_, listeners)) = self.snapshot(channel) else {
                continue;
            };
            for slot in listeners.iter().filter(|slot| slot.is_active()) {
                slot.notify(|l| l.restored(), "a restored subscription");
            }
        }
    }

    /// Forget the outstanding transport error without notifying anyone.
    pub(crate) fn clear_outage(&self) {
        self.outage.send_replace(None);
    }

    /// The most recent transport error, while the subscription is down.
    pub fn outage(&self) -> Option<Arc<SyncError>> {
        self.outage.borrow().clone()
    }
}

fn affects(error: &SyncError, channel: &str) -> bool {
    match error {
        SyncError::Transport { channels, .. } => channels.iter().any(|c| c == channel),
        _ => true,
    }
}

fn invoke(slot: &ListenerSlot, value: &(dyn Any + Send + Sync)) -> Result<(), String> {
    match catch_unwind(AssertUnwindSafe(|| slot.listener.deliver(value))) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err("listener panicked".into()),
    }
}

// ── Subscription ─────────────────────────────────────────────────────

/// Guard for one registered listener.
///
/// Dropping the guard unsubscribes. [`unsubscribe`](Self::unsubscribe) may
/// be called any number of times; only the first call has an effect. A
/// listener that is unsubscribed while a frame is being dispatched is not
/// invoked for the rest of that frame.
#[must_use = "dropping a Subscription immediately unsubscribes its listener"]
pub struct Subscription {
    registry: Weak<Registry>,
    slot: Arc<ListenerSlot>,
}

impl Subscription {
    pub fn channel(&self) -> &str {
        &self.slot.channel
    }

    pub fn is_active(&self) -> bool {
        self.slot.is_active()
    }

    pub fn unsubscribe(&self) {
        if !self.slot.active.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(registry) = self.registry.upgrade() {
            registry.release(&self.slot);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("channel", &self.slot.channel)
            .field("id", &self.slot.id)
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;

    use fluxsync_api::Series;
    use pretty_assertions::assert_eq;
    use serde::Deserialize;
    use serde_json::json;

    use super::*;
    use crate::schema::{JsonSchema, RawJson, Validated};

    #[derive(Debug, Clone, PartialEq, Deserialize)]
    struct Status {
        variant: String,
    }

    const STATUS: Channel<JsonSchema<Status>> = Channel::new("status", JsonSchema::new());

    fn recorder<T: Clone + Send + 'static>() -> (Arc<Mutex<Vec<T>>>, impl Fn(&T) + Send + Sync + 'static)
    {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move |value: &T| sink.lock().unwrap().push(value.clone()))
    }

    fn unreachable_listener(status: &Status) {
        panic!("listener must not be called, got {status:?}");
    }

    fn status_frame(docs: &[serde_json::Value]) -> Frame {
        Frame::single("status", Series::from_json(docs))
    }

    #[test]
    fn demand_tracks_first_and_last_listener() {
        let registry = Arc::new(Registry::new());
        let mut demand = registry.watch_demand();

        let a = registry.register(&STATUS, |_: &Status| {}).unwrap();
        assert!(demand.has_changed().unwrap());
        assert_eq!(demand.borrow_and_update().len(), 1);

        let b = registry.register(&STATUS, |_: &Status| {}).unwrap();
        assert!(!demand.has_changed().unwrap());
        assert_eq!(registry.listener_count("status"), 2);

        a.unsubscribe();
        assert!(registry.demand().contains("status"));
        drop(b);
        assert!(registry.demand().is_empty());
        assert_eq!(registry.live_listeners(), 0);
    }

    #[test]
    fn unsubscribe_twice_is_a_no_op() {
        let registry = Arc::new(Registry::new());
        let keep = registry.register(&STATUS, |_: &Status| {}).unwrap();
        let sub = registry.register(&STATUS, |_: &Status| {}).unwrap();

        sub.unsubscribe();
        sub.unsubscribe();
        drop(sub);

        assert!(keep.is_active());
        assert_eq!(registry.listener_count("status"), 1);
    }

    #[test]
    fn mismatched_schema_is_rejected_and_binding_persists() {
        let registry = Arc::new(Registry::new());
        drop(registry.register(&STATUS, |_: &Status| {}).unwrap());

        let raw = Channel::new("status", RawJson);
        let err = registry.register(&raw, |_: &serde_json::Value| {}).unwrap_err();
        match err {
            SyncError::SchemaMismatch { channel, bound, requested } => {
                assert_eq!(channel, "status");
                assert!(bound.ends_with("Status"), "{bound}");
                assert_eq!(requested, "json");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(registry.demand().is_empty());
    }

    fn known_variant(status: &Status) -> Result<(), String> {
        match status.variant.as_str() {
            "success" | "error" => Ok(()),
            other => Err(format!("unknown variant {other}")),
        }
    }

    #[test]
    fn validated_schemas_are_identified_by_name() {
        let registry = Arc::new(Registry::new());
        let strict = Channel::new("status", Validated::<Status>::new("known_variant", known_variant));
        let _bound = registry.register(&strict, |_: &Status| {}).unwrap();

        let other = Channel::new("status", Validated::<Status>::new("any_variant", |_| Ok(())));
        assert!(matches!(
            registry.register(&other, |_: &Status| {}),
            Err(SyncError::SchemaMismatch { ref bound, ref requested, .. })
                if bound == "known_variant" && requested == "any_variant"
        ));

        // Same name, same type: the channel keeps its first predicate.
        let renamed = Channel::new("status", Validated::<Status>::new("known_variant", |_| Ok(())));
        let (seen, on_status) = recorder::<Status>();
        let _late = registry.register(&renamed, on_status).unwrap();

        let errors = registry.dispatch(&status_frame(&[json!({ "variant": "info" })]));
        assert_eq!(errors.len(), 1);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn both_listeners_receive_each_value_once() {
        let registry = Arc::new(Registry::new());
        let (first, on_first) = recorder::<Status>();
        let (second, on_second) = recorder::<Status>();
        let _a = registry.register(&STATUS, on_first).unwrap();
        let _b = registry.register(&STATUS, on_second).unwrap();

        let errors = registry.dispatch(&status_frame(&[json!({ "variant": "success" })]));

        assert!(errors.is_empty());
        let expected = vec![Status { variant: "success".into() }];
        assert_eq!(*first.lock().unwrap(), expected);
        assert_eq!(*second.lock().unwrap(), expected);
    }

    #[test]
    fn invalid_sample_is_reported_once_and_not_delivered() {
        let registry = Arc::new(Registry::new());
        let (seen, on_status) = recorder::<Status>();
        let _a = registry.register(&STATUS, on_status).unwrap();
        let _b = registry.register(&STATUS, unreachable_listener).unwrap();

        let errors = registry.dispatch(&status_frame(&[json!({ "level": 3 })]));

        assert_eq!(errors.len(), 1);
        assert!(matches!(&errors[0], SyncError::Decode { channel, .. } if channel == "status"));
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn valid_samples_survive_an_invalid_neighbour() {
        let registry = Arc::new(Registry::new());
        let (seen, on_status) = recorder::<Status>();
        let _sub = registry.register(&STATUS, on_status).unwrap();

        let errors = registry.dispatch(&status_frame(&[
            json!({ "variant": "info" }),
            json!(42),
            json!({ "variant": "error" }),
        ]));

        assert_eq!(errors.len(), 1);
        let variants: Vec<String> = seen.lock().unwrap().iter().map(|s| s.variant.clone()).collect();
        assert_eq!(variants, vec!["info", "error"]);
    }

    struct Failing;

    impl Listener<Status> for Failing {
        fn on_change(&self, _value: &Status) -> Result<(), ListenerError> {
            Err("render failed".into())
        }
    }

    #[test]
    fn failing_listener_does_not_stop_others() {
        let registry = Arc::new(Registry::new());
        let _bad = registry.register(&STATUS, Failing).unwrap();
        let _panics = registry.register(&STATUS, unreachable_listener).unwrap();
        let (seen, on_status) = recorder::<Status>();
        let _good = registry.register(&STATUS, on_status).unwrap();

        let errors = registry.dispatch(&status_frame(&[json!({ "variant": "warning" })]));

        assert_eq!(errors.len(), 2);
        assert!(errors.iter().all(|e| matches!(e, SyncError::Listener { .. })));
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn listener_removed_mid_dispatch_is_skipped() {
        let registry = Arc::new(Registry::new());
        let victim: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

        let handle = Arc::clone(&victim);
        let _remover = registry
            .register(&STATUS, move |_: &Status| {
                if let Some(sub) = handle.lock().unwrap().take() {
                    sub.unsubscribe();
                }
            })
            .unwrap();
        let (seen, on_status) = recorder::<Status>();
        *victim.lock().unwrap() = Some(registry.register(&STATUS, on_status).unwrap());

        registry.dispatch(&status_frame(&[json!({ "variant": "info" })]));

        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(registry.listener_count("status"), 1);
    }

    #[test]
    fn listener_can_unsubscribe_itself() {
        let registry = Arc::new(Registry::new());
        let own: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let calls = Arc::new(AtomicU64::new(0));

        let (handle, counter) = (Arc::clone(&own), Arc::clone(&calls));
        let sub = registry
            .register(&STATUS, move |_: &Status| {
                counter.fetch_add(1, Ordering::SeqCst);
                if let Some(sub) = handle.lock().unwrap().take() {
                    sub.unsubscribe();
                }
            })
            .unwrap();
        *own.lock().unwrap() = Some(sub);

        registry.dispatch(&status_frame(&[
            json!({ "variant": "info" }),
            json!({ "variant": "info" }),
        ]));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(registry.demand().is_empty());
    }

    #[test]
    fn frames_for_unregistered_channels_are_ignored() {
        let registry = Arc::new(Registry::new());
        let _sub = registry.register(&STATUS, unreachable_listener).unwrap();

        let frame = Frame::single("other", Series::from_json(&[json!({ "variant": "x" })]));
        assert!(registry.dispatch(&frame).is_empty());
    }

    #[test]
    fn transport_errors_reach_observers() {
        let registry = Arc::new(Registry::new());
        let (errors, on_error) = recorder::<SyncError>();
        let _sub = registry
            .register(&STATUS, observer(|_: &Status| {}, move |e: &SyncError| on_error(e)))
            .unwrap();

        let err = SyncError::transport(&fluxsync_api::Error::StreamEnded, ["status"], 0, false);
        registry.notify_transport_error(&registry.demand(), &err);

        assert_eq!(errors.lock().unwrap().len(), 1);
    }

    struct Health {
        errors: Mutex<Vec<SyncError>>,
        restored: AtomicU64,
    }

    struct HealthListener(Arc<Health>);

    impl Listener<Status> for HealthListener {
        fn on_change(&self, _value: &Status) -> Result<(), ListenerError> {
            Ok(())
        }

        fn on_transport_error(&self, error: &SyncError) {
            self.0.errors.lock().unwrap().push(error.clone());
        }

        fn on_transport_restored(&self) {
            self.0.restored.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn health() -> Arc<Health> {
        Arc::new(Health {
            errors: Mutex::new(Vec::new()),
            restored: AtomicU64::new(0),
        })
    }

    #[test]
    fn late_listener_learns_of_outstanding_outage() {
        let registry = Arc::new(Registry::new());
        let _early = registry.register(&STATUS, |_: &Status| {}).unwrap();
        let err = SyncError::transport(&fluxsync_api::Error::StreamEnded, ["status"], 10, true);
        registry.notify_transport_error(&registry.demand(), &err);

        let late = health();
        let _sub = registry.register(&STATUS, HealthListener(Arc::clone(&late))).unwrap();

        let errors = late.errors.lock().unwrap();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].is_terminal());
        assert!(registry.outage().is_some());
    }

    #[test]
    fn outage_on_other_channels_is_not_replayed() {
        let registry = Arc::new(Registry::new());
        let err = SyncError::transport(&fluxsync_api::Error::StreamEnded, ["other"], 1, false);
        registry.notify_transport_error(["other".to_owned()].iter(), &err);

        let late = health();
        let _sub = registry.register(&STATUS, HealthListener(Arc::clone(&late))).unwrap();
        assert!(late.errors.lock().unwrap().is_empty());
    }

    #[test]
    fn restore_is_reported_once_and_clears_outage() {
        let registry = Arc::new(Registry::new());
        let watcher = health();
        let _sub = registry.register(&STATUS, HealthListener(Arc::clone(&watcher))).unwrap();

        registry.notify_restored(&registry.demand());
        assert_eq!(watcher.restored.load(Ordering::SeqCst), 0);

        let err = SyncError::transport(&fluxsync_api::Error::StreamEnded, ["status"], 0, false);
        registry.notify_transport_error(&registry.demand(), &err);
        registry.notify_restored(&registry.demand());
        registry.notify_restored(&registry.demand());

        assert_eq!(watcher.restored.load(Ordering::SeqCst), 1);
        assert!(registry.outage().is_none());

        let late = health();
        let _late = registry.register(&STATUS, HealthListener(Arc::clone(&late))).unwrap();
        assert!(late.errors.lock().unwrap().is_empty());
    }

    #[test]
    fn closed_registry_rejects_registration() {
        let registry = Arc::new(Registry::new());
        let existing = registry.register(&STATUS, |_: &Status| {}).unwrap();
        registry.close();

        assert!(matches!(
            registry.register(&STATUS, |_: &Status| {}),
            Err(SyncError::Closed)
        ));
        assert!(existing.is_active());
    }

    #[test]
    fn subscription_outliving_registry_drops_cleanly() {
        let registry = Arc::new(Registry::new());
        let sub = registry.register(&STATUS, |_: &Status| {}).unwrap();
        drop(registry);
        sub.unsubscribe();
        assert!(!sub.is_active());
    }
}
