//! Subscription Registry
//!
//! The registry owns every subscription and the indexes over them:
//!
//! - the primary store, id → subscription
//! - one observation table per observee, path → ids
//! - one reverse index per observer, used only for teardown
//! - one binding record per observer, binding name → id
//!
//! Every insert and remove updates all four in a single step, so a
//! subscription is never visible in one index but not another. Relays
//! (see [`relay`](super::relay)) live in a table of their own, indexed by
//! both of their ends.
//!
//! # Re-entrancy
//!
//! Callbacks run synchronously and routinely call back into the registry:
//! unbinding themselves, registering new observers, or dropping the last
//! handle to an object, which fires its destruction hook and tears down its
//! subscriptions. The state therefore sits behind a re-entrant lock, and
//! the `RefCell` inside it is only ever borrowed for short, callback-free
//! sections.
//!
//! Removed subscriptions are dropped after the borrow ends. Dropping one
//! drops its callback, which may hold the last handle to some object and so
//! re-enter `teardown`.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, OnceLock};

use indexmap::{IndexMap, IndexSet};
use parking_lot::ReentrantMutex;
use tracing::debug;

use super::relay::Relay;
use super::subscription::{
    Callback, CallbackResult, Change, Context, ObservingOptions, Subscribe, Subscription,
    SubscriptionId,
};
use crate::config::RegistryConfig;
use crate::error::{Error, Result};
use crate::object::{ObjectId, ObjectRef, Observable, PropertyPath};

/// Handle to a subscription registry.
///
/// Cloning is cheap and yields a handle to the same registry.
#[derive(Clone)]
pub struct Registry {
    pub(crate) inner: Arc<Inner>,
}

pub(crate) struct Inner {
    pub(crate) config: RegistryConfig,
    pub(crate) state: ReentrantMutex<RefCell<State>>,
}

/// Per-observer subscription ids and binding names.
#[derive(Default)]
struct ReverseIndex {
    subscriptions: IndexSet<SubscriptionId>,
    bindings: IndexMap<String, SubscriptionId>,
}

#[derive(Default)]
pub(crate) struct State {
    subscriptions: HashMap<SubscriptionId, Arc<Subscription>>,
    observees: HashMap<ObjectId, IndexMap<PropertyPath, IndexSet<SubscriptionId>>>,
    observers: HashMap<ObjectId, ReverseIndex>,
    relays: HashMap<SubscriptionId, Arc<Relay>>,
    /// Relay ids by parent and by child.
    relay_links: HashMap<ObjectId, IndexSet<SubscriptionId>>,
    /// Objects whose destruction hook already points at this registry.
    pub(crate) armed: HashSet<ObjectId>,
    /// Current nesting of `notify` calls.
    pub(crate) depth: usize,
}

impl State {
    fn insert(&mut self, subscription: Arc<Subscription>) -> Result<()> {
        if let Some(name) = &subscription.binding {
            let taken = self
                .observers
                .get(&subscription.observer_id)
                .is_some_and(|index| index.bindings.contains_key(name));
            if taken {
                return Err(Error::DuplicateBinding {
                    observer: subscription.observer_id,
                    name: name.clone(),
                });
            }
        }

        let index = self.observers.entry(subscription.observer_id).or_default();
        index.subscriptions.insert(subscription.id);
        if let Some(name) = &subscription.binding {
            index.bindings.insert(name.clone(), subscription.id);
        }

        self.observees
            .entry(subscription.observee_id)
            .or_default()
            .entry(subscription.path.clone())
            .or_default()
            .insert(subscription.id);

        self.subscriptions.insert(subscription.id, subscription);
        Ok(())
    }

    fn remove(&mut self, id: SubscriptionId) -> Option<Arc<Subscription>> {
        let subscription = self.subscriptions.remove(&id)?;

        if let Some(table) = self.observees.get_mut(&subscription.observee_id) {
            if let Some(ids) = table.get_mut(&subscription.path) {
                ids.shift_remove(&id);
                if ids.is_empty() {
                    table.shift_remove(&subscription.path);
                }
            }
            if table.is_empty() {
                self.observees.remove(&subscription.observee_id);
            }
        }

        if let Some(index) = self.observers.get_mut(&subscription.observer_id) {
            index.subscriptions.shift_remove(&id);
            if let Some(name) = &subscription.binding {
                if index.bindings.get(name) == Some(&id) {
                    index.bindings.shift_remove(name);
                }
            }
            if index.subscriptions.is_empty() {
                self.observers.remove(&subscription.observer_id);
            }
        }

        Some(subscription)
    }

    pub(crate) fn contains(&self, id: SubscriptionId) -> bool {
        self.subscriptions.contains_key(&id)
    }

    pub(crate) fn insert_relay(&mut self, relay: Arc<Relay>) {
        for object in [relay.parent_id, relay.child_id] {
            self.relay_links.entry(object).or_default().insert(relay.id);
        }
        self.relays.insert(relay.id, relay);
    }

    fn remove_relay(&mut self, id: SubscriptionId) -> Option<Arc<Relay>> {
        let relay = self.relays.remove(&id)?;
        for object in [relay.parent_id, relay.child_id] {
            if let Some(ids) = self.relay_links.get_mut(&object) {
                ids.shift_remove(&id);
                if ids.is_empty() {
                    self.relay_links.remove(&object);
                }
            }
        }
        Some(relay)
    }

    pub(crate) fn contains_relay(&self, id: SubscriptionId) -> bool {
        self.relays.contains_key(&id)
    }

    /// Relays whose child is `child`, oldest first.
    pub(crate) fn relays_from(&self, child: ObjectId) -> Vec<Arc<Relay>> {
        let Some(ids) = self.relay_links.get(&child) else {
            return Vec::new();
        };
        let mut relays: Vec<Arc<Relay>> = ids
            .iter()
            .filter_map(|id| self.relays.get(id))
            .filter(|relay| relay.child_id == child)
            .cloned()
            .collect();
        relays.sort_by_key(|relay| relay.id);
        relays
    }

    /// Ids of every subscription the object takes part in, either side.
    fn involving(&self, object: ObjectId) -> Vec<SubscriptionId> {
        let mut ids: Vec<SubscriptionId> = self
            .observees
            .get(&object)
            .into_iter()
            .flat_map(|table| table.values().flatten().copied())
            .collect();
        if let Some(index) = self.observers.get(&object) {
            ids.extend(index.subscriptions.iter().copied());
        }
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// Subscriptions on `observee` affected by a change at `path`, in
    /// registration order. A change at `a` affects observers of `a.b`.
    pub(crate) fn matching(
        &self,
        observee: ObjectId,
        path: &PropertyPath,
    ) -> Vec<Arc<Subscription>> {
        let Some(table) = self.observees.get(&observee) else {
            return Vec::new();
        };
        let mut batch: Vec<Arc<Subscription>> = table
            .iter()
            .filter(|(observed, _)| path.is_prefix_of(observed))
            .flat_map(|(_, ids)| ids.iter())
            .filter_map(|id| self.subscriptions.get(id).cloned())
            .collect();
        batch.sort_by_key(|subscription| subscription.id);
        batch
    }

    pub(crate) fn binding(&self, observer: ObjectId, name: &str) -> Option<Arc<Subscription>> {
        let id = self.observers.get(&observer)?.bindings.get(name)?;
        self.subscriptions.get(id).cloned()
    }

    pub(crate) fn binding_names(&self, observer: ObjectId) -> Vec<String> {
        self.observers
            .get(&observer)
            .map(|index| index.bindings.keys().cloned().collect())
            .unwrap_or_default()
    }
}

impl Registry {
    /// Create a registry with the default configuration.
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    pub fn with_config(config: RegistryConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                state: ReentrantMutex::new(RefCell::new(State::default())),
            }),
        }
    }

    /// The process-wide registry.
    pub fn global() -> &'static Registry {
        static GLOBAL: OnceLock<Registry> = OnceLock::new();
        GLOBAL.get_or_init(Registry::new)
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.inner.config
    }

    /// Register a subscription.
    ///
    /// Both ends get their destruction hooks armed. If initial delivery was
    /// requested it happens before this returns; should it fail, the
    /// subscription is removed again and the error returned.
    pub fn register(&self, spec: Subscribe) -> Result<SubscriptionId> {
        let observer = spec.observer.clone();
        let observee = spec.observee.clone();
        let subscription = Arc::new(Subscription::from_spec(spec));
        let id = subscription.id;

        let state = self.inner.state.lock();
        state.borrow_mut().insert(subscription.clone())?;
        self.arm(&state, observer.as_ref());
        self.arm(&state, observee.as_ref());

        debug!(
            subscription = %id,
            observer = %subscription.observer_id,
            observee = %subscription.observee_id,
            path = %subscription.path,
            binding = subscription.binding.as_deref(),
            "registered subscription"
        );

        if subscription.options.initial {
            if let Err(err) = self.deliver_initial(&subscription, &observee) {
                let removed = state.borrow_mut().remove(id);
                drop(removed);
                return Err(err);
            }
        }

        Ok(id)
    }

    /// Observe `path` on `observee` with a callback receiving the full change.
    pub fn add_observer<O, S, F>(
        &self,
        observer: &O,
        observee: &S,
        path: &str,
        options: ObservingOptions,
        context: Option<Context>,
        callback: F,
    ) -> Result<SubscriptionId>
    where
        O: ObjectRef,
        S: ObjectRef,
        F: Fn(&Change<'_>) -> CallbackResult + Send + Sync + 'static,
    {
        let path = PropertyPath::parse(path)?;
        let mut spec =
            Subscribe::new(observer, observee, path, Callback::raw(callback)).options(options);
        spec.context = context;
        self.register(spec)
    }

    /// Observe `path` on `observee` with a callback receiving only the observee.
    pub fn add_observee_callback<O, S, F>(
        &self,
        observer: &O,
        observee: &S,
        path: &str,
        options: ObservingOptions,
        context: Option<Context>,
        callback: F,
    ) -> Result<SubscriptionId>
    where
        O: ObjectRef,
        S: ObjectRef,
        F: Fn(&Arc<dyn Observable>) -> CallbackResult + Send + Sync + 'static,
    {
        let path = PropertyPath::parse(path)?;
        let mut spec = Subscribe::new(observer, observee, path, Callback::observee_only(callback))
            .options(options);
        spec.context = context;
        self.register(spec)
    }

    /// [`add_observee_callback`](Self::add_observee_callback) with no options
    /// and no context.
    pub fn watch<O, S, F>(
        &self,
        observer: &O,
        observee: &S,
        path: &str,
        callback: F,
    ) -> Result<SubscriptionId>
    where
        O: ObjectRef,
        S: ObjectRef,
        F: Fn(&Arc<dyn Observable>) -> CallbackResult + Send + Sync + 'static,
    {
        self.add_observee_callback(observer, observee, path, ObservingOptions::NONE, None, callback)
    }

    /// Remove a subscription or relay. Unknown ids are ignored.
    ///
    /// Returns whether anything was removed.
    pub fn unregister(&self, id: SubscriptionId) -> bool {
        let state = self.inner.state.lock();
        let removed = state.borrow_mut().remove(id);
        if let Some(subscription) = removed {
            debug!(subscription = %id, path = %subscription.path, "unregistered subscription");
            return true;
        }
        let relay = state.borrow_mut().remove_relay(id);
        relay.is_some()
    }

    /// Alias for [`unregister`](Self::unregister).
    pub fn remove_observer(&self, id: SubscriptionId) -> bool {
        self.unregister(id)
    }

    /// Remove every subscription in which `object` is observer or observee,
    /// and every relay it is either end of. Returns the number of
    /// subscriptions removed.
    ///
    /// Runs automatically when an object with an armed hook is destroyed.
    /// Safe to call at any time, including from inside a callback.
    pub fn teardown(&self, object: ObjectId) -> usize {
        let state = self.inner.state.lock();
        let ids = state.borrow().involving(object);
        let removed: Vec<Arc<Subscription>> = ids
            .into_iter()
            .filter_map(|id| state.borrow_mut().remove(id))
            .collect();

        let relays: Vec<SubscriptionId> = state
            .borrow()
            .relay_links
            .get(&object)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default();
        for id in relays {
            state.borrow_mut().remove_relay(id);
        }

        if !removed.is_empty() {
            debug!(object = %object, count = removed.len(), "tore down subscriptions");
        }
        removed.len()
    }

    /// Number of live subscriptions. Relays are not counted.
    pub fn len(&self) -> usize {
        self.inner.state.lock().borrow().subscriptions.len()
    }

    /// Whether the registry holds no subscriptions and no relays.
    pub fn is_empty(&self) -> bool {
        let state = self.inner.state.lock();
        let current = state.borrow();
        current.subscriptions.is_empty() && current.relays.is_empty()
    }

    pub fn contains(&self, id: SubscriptionId) -> bool {
        self.inner.state.lock().borrow().contains(id)
    }

    /// Number of subscriptions observing `observee`.
    pub fn observation_count(&self, observee: ObjectId) -> usize {
        self.inner
            .state
            .lock()
            .borrow()
            .observees
            .get(&observee)
            .map_or(0, |table| table.values().map(IndexSet::len).sum())
    }

    /// Ids of the subscriptions `observer` holds, in registration order.
    pub fn observer_subscriptions(&self, observer: ObjectId) -> Vec<SubscriptionId> {
        self.inner
            .state
            .lock()
            .borrow()
            .observers
            .get(&observer)
            .map(|index| index.subscriptions.iter().copied().collect())
            .unwrap_or_default()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("config", &self.inner.config)
            .field("subscriptions", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::Model;
    use serde_json::json;
    use std::sync::atomic::{AtomicI32, Ordering};

    #[test]
    fn register_indexes_both_sides() {
        let registry = Registry::new();
        let observer = Model::new(&registry);
        let observee = Model::with_properties(&registry, [("name", json!("a"))]);

        let id = registry
            .watch(&observer, &observee, "name", |_| Ok(()))
            .unwrap();

        assert!(registry.contains(id));
        assert_eq!(registry.observation_count(observee.id()), 1);
        assert_eq!(registry.observer_subscriptions(observer.id()), [id]);
    }

    #[test]
    fn unregister_is_idempotent() {
        let registry = Registry::new();
        let observer = Model::new(&registry);
        let observee = Model::with_properties(&registry, [("name", json!("a"))]);
        let id = registry.watch(&observer, &observee, "name", |_| Ok(())).unwrap();

        assert!(registry.unregister(id));
        assert!(!registry.unregister(id));
        assert!(registry.is_empty());
        assert_eq!(registry.observation_count(observee.id()), 0);
        assert!(registry.observer_subscriptions(observer.id()).is_empty());
    }

    #[test]
    fn teardown_removes_both_directions() {
        let registry = Registry::new();
        let a = Model::with_properties(&registry, [("x", json!(1))]);
        let b = Model::with_properties(&registry, [("y", json!(1))]);
        let c = Model::with_properties(&registry, [("z", json!(1))]);

        registry.watch(&a, &b, "y", |_| Ok(())).unwrap();
        registry.watch(&b, &c, "z", |_| Ok(())).unwrap();
        registry.watch(&c, &a, "x", |_| Ok(())).unwrap();

        assert_eq!(registry.teardown(b.id()), 2);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.teardown(b.id()), 0);
    }

    #[test]
    fn named_subscriptions_collide() {
        let registry = Registry::new();
        let observer = Model::new(&registry);
        let observee = Model::with_properties(&registry, [("name", json!("a"))]);
        let path = PropertyPath::parse("name").unwrap();

        let spec = || {
            Subscribe::new(&observer, &observee, path.clone(), Callback::raw(|_| Ok(())))
                .named("label")
        };
        registry.register(spec()).unwrap();
        let err = registry.register(spec()).unwrap_err();

        assert!(matches!(err, Error::DuplicateBinding { ref name, .. } if name == "label"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn global_registry_is_shared() {
        let registry = Registry::global();
        assert!(Arc::ptr_eq(&registry.inner, &Registry::global().inner));

        let observer = Model::new(registry);
        let observee = Model::with_properties(Registry::global(), [("x", json!(0))]);
        let calls = Arc::new(AtomicI32::new(0));
        let calls_clone = calls.clone();
        let id = registry
            .watch(&observer, &observee, "x", move |_| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();

        observee.set("x", 1).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        drop(observer);
        assert!(!Registry::global().contains(id));
    }

    #[test]
    fn self_observation_is_torn_down_once() {
        let registry = Registry::new();
        let model = Model::with_properties(&registry, [("x", json!(1))]);
        let calls = Arc::new(AtomicI32::new(0));
        let calls_clone = calls.clone();

        registry
            .watch(&model, &model, "x", move |_| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();

        model.set("x", 2).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(registry.teardown(model.id()), 1);
    }
}
