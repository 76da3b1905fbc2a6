// ── Feature bindings ──
//
// Fixed channel/schema pairs for the synchronized resource kinds, plus a
// `Scope` that ties a group of subscriptions to one owner's lifetime.

use std::collections::HashMap;

use tracing::debug;
use uuid::Uuid;

use crate::error::SyncError;
use crate::model::{Alias, AliasKey, Label, Range, Relationship, Status, Task};
use crate::multiplexer::Multiplexer;
use crate::registry::{Listener, Subscription};
use crate::schema::{Channel, JsonSchema, Schema};

// ── Resource channels ────────────────────────────────────────────────

/// The set/delete channel pair of one resource kind.
///
/// `on_set` receives full resources as they are created or changed,
/// `on_delete` receives the keys of removed ones.
#[derive(Debug, Clone)]
pub struct ResourceChannels<V, K> {
    pub set: Channel<JsonSchema<V>>,
    pub delete: Channel<JsonSchema<K>>,
}

impl<V, K> ResourceChannels<V, K>
where
    V: serde::de::DeserializeOwned + Send + Sync + 'static,
    K: serde::de::DeserializeOwned + Send + Sync + 'static,
{
    pub const fn new(set: &'static str, delete: &'static str) -> Self {
        Self {
            set: Channel::new(set, JsonSchema::new()),
            delete: Channel::new(delete, JsonSchema::new()),
        }
    }

    pub fn on_set<L>(&self, mux: &Multiplexer, listener: L) -> Result<Subscription, SyncError>
    where
        L: Listener<V>,
    {
        mux.register(&self.set, listener)
    }

    pub fn on_delete<L>(&self, mux: &Multiplexer, listener: L) -> Result<Subscription, SyncError>
    where
        L: Listener<K>,
    {
        mux.register(&self.delete, listener)
    }
}

pub const STATUSES: ResourceChannels<Status, String> =
    ResourceChannels::new("sy_status_set", "sy_status_delete");

pub const TASKS: ResourceChannels<Task, u64> =
    ResourceChannels::new("sy_task_set", "sy_task_delete");

pub const RANGES: ResourceChannels<Range, Uuid> =
    ResourceChannels::new("sy_range_set", "sy_range_delete");

pub const LABELS: ResourceChannels<Label, Uuid> =
    ResourceChannels::new("sy_label_set", "sy_label_delete");

pub const ALIASES: ResourceChannels<Alias, AliasKey> =
    ResourceChannels::new("sy_range_alias_set", "sy_range_alias_delete");

/// Ontology edges: parent/child links, labels attached to resources.
pub const RELATIONSHIPS: ResourceChannels<Relationship, Relationship> =
    ResourceChannels::new("sy_ontology_relationship_set", "sy_ontology_relationship_delete");

// ── Scope ────────────────────────────────────────────────────────────

/// Subscriptions owned by one component, keyed by slot.
///
/// Binding into an occupied slot replaces the previous subscription, so
/// re-running a component's setup never leaks a registration. Dropping
/// the scope releases everything it holds.
#[derive(Debug, Default)]
pub struct Scope {
    slots: HashMap<String, Subscription>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `listener` on `channel` under `slot`.
    ///
    /// The new subscription is taken before the old one in the same slot is
    /// released, so rebinding a channel never lets its demand drop to zero.
    /// On error the slot keeps its previous subscription.
    pub fn bind<S, L>(
        &mut self,
        slot: impl Into<String>,
        mux: &Multiplexer,
        channel: &Channel<S>,
        listener: L,
    ) -> Result<(), SyncError>
    where
        S: Schema + Clone,
        L: Listener<S::Value>,
    {
        let subscription = mux.register(channel, listener)?;
        self.insert(slot, subscription);
        Ok(())
    }

    /// Take ownership of an existing subscription.
    pub fn insert(&mut self, slot: impl Into<String>, subscription: Subscription) {
        let slot = slot.into();
        debug!(slot = %slot, channel = subscription.channel(), "binding scope slot");
        if let Some(previous) = self.slots.insert(slot, subscription) {
            previous.unsubscribe();
        }
    }

    /// Release the subscription in `slot`. Returns `false` if the slot was empty.
    pub fn release(&mut self, slot: &str) -> bool {
        self.slots.remove(slot).is_some()
    }

    pub fn contains(&self, slot: &str) -> bool {
        self.slots.contains_key(slot)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Release every subscription.
    pub fn clear(&mut self) {
        self.slots.clear();
    }
}
