//! Model
//!
//! A ready-made observable host: an ordered bag of named properties that
//! announces every write to its registry.
//!
//! ```rust,ignore
//! let registry = Registry::new();
//! let player = Model::with_properties(&registry, [("score", json!(10))]);
//!
//! player.set("score", json!(15))?; // observers of `score` run here
//! ```
//!
//! Writes are announced after the property lock is released, so callbacks
//! are free to read or write the same model.
//!
//! Host objects stored with [`Model::insert_object`] are relayed: their own
//! changes are announced again on the model under the key they are stored
//! at, so observers of `address.city` hear about `address` changing its
//! `city`.

use std::fmt;
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};

use super::{Lifetime, ObjectId, Observable, Property, PropertyAccess, PropertyPath};
use crate::error::{PathError, Result};
use crate::observe::{ChangeKind, Registry, SubscriptionId};

/// An observable property bag.
pub struct Model {
    lifetime: Lifetime,
    registry: Registry,
    this: Weak<Model>,
    properties: RwLock<IndexMap<String, Property>>,
    /// Relay per key holding a host object.
    relays: Mutex<IndexMap<String, SubscriptionId>>,
}

impl Model {
    /// Create an empty model announcing changes to `registry`.
    pub fn new(registry: &Registry) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            lifetime: Lifetime::new(),
            registry: registry.clone(),
            this: this.clone(),
            properties: RwLock::new(IndexMap::new()),
            relays: Mutex::new(IndexMap::new()),
        })
    }

    /// Create a model with initial properties. Nothing is announced.
    pub fn with_properties<I, K>(registry: &Registry, properties: I) -> Arc<Self>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let model = Self::new(registry);
        model.properties.write().extend(
            properties
                .into_iter()
                .map(|(key, value)| (key.into(), Property::Value(value))),
        );
        model
    }

    /// The model's identity.
    pub fn id(&self) -> ObjectId {
        self.lifetime.id()
    }

    /// Current value of a top-level property.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.properties.read().get(key).cloned().map(Property::into_value)
    }

    /// Current value at a dotted path.
    pub fn value_at(&self, path: &str) -> Result<Value> {
        let path = PropertyPath::parse(path)?;
        Ok(super::path::resolve(self, &path)?)
    }

    /// Set a top-level property, creating it if needed, and announce it.
    pub fn set(&self, key: &str, value: impl Into<Value>) -> Result<()> {
        let path = key_path(key)?;
        let value = value.into();
        let old = self
            .properties
            .write()
            .insert(key.to_owned(), Property::Value(value.clone()));
        self.detach(key);
        self.announce(&path, ChangeKind::Setting, old.map(Property::into_value), Some(value))
    }

    /// Set the value at a dotted path, announcing the change on the first
    /// segment.
    pub fn set_path(&self, path: &str, value: impl Into<Value>) -> Result<()> {
        let path = PropertyPath::parse(path)?;
        super::path::apply(self, &path, value.into())
    }

    /// Store another host object under `key`. Paths through `key` traverse
    /// into it. The change is announced with the object's snapshot.
    ///
    /// The object's own changes are relayed to this model's observers as
    /// changes of `key.<path>` for as long as it stays under `key`.
    pub fn insert_object<T: Observable>(&self, key: &str, object: Arc<T>) -> Result<()> {
        let path = key_path(key)?;
        self.detach(key);
        if let Some(this) = self.this.upgrade() {
            let relay = self.registry.relay(&this, key, &object)?;
            self.relays.lock().insert(key.to_owned(), relay);
        }

        let snapshot = object.snapshot();
        let old = self
            .properties
            .write()
            .insert(key.to_owned(), Property::Object(object));
        self.announce(&path, ChangeKind::Setting, old.map(Property::into_value), Some(snapshot))
    }

    /// Remove a property and announce the removal. Returns the old value.
    pub fn remove(&self, key: &str) -> Result<Option<Value>> {
        let path = key_path(key)?;
        let old = self
            .properties
            .write()
            .shift_remove(key)
            .map(Property::into_value);
        self.detach(key);
        if old.is_some() {
            self.announce(&path, ChangeKind::Removal, old.clone(), None)?;
        }
        Ok(old)
    }

    /// Property names in insertion order.
    pub fn keys(&self) -> Vec<String> {
        self.properties.read().keys().cloned().collect()
    }

    /// Stop relaying the object stored under `key`, if any.
    fn detach(&self, key: &str) {
        let relay = self.relays.lock().shift_remove(key);
        if let Some(id) = relay {
            self.registry.unregister(id);
        }
    }

    fn announce(
        &self,
        path: &PropertyPath,
        kind: ChangeKind,
        old: Option<Value>,
        new: Option<Value>,
    ) -> Result<()> {
        self.registry.notify(self.id(), path, kind, old, new)
    }
}

/// A top-level key as a single-segment path. Dotted keys are rejected since
/// they would be announced as nested paths.
fn key_path(key: &str) -> Result<PropertyPath> {
    let path = PropertyPath::parse(key)?;
    if path.len() != 1 {
        return Err(PathError::Invalid(key.to_owned()).into());
    }
    Ok(path)
}

impl PropertyAccess for Model {
    fn property(&self, key: &str) -> Option<Property> {
        self.properties.read().get(key).cloned()
    }

    fn set_property(&self, key: &str, value: Value) -> Result<bool> {
        let path = key_path(key)?;
        let old = {
            let mut properties = self.properties.write();
            match properties.get_mut(key) {
                Some(slot) => std::mem::replace(slot, Property::Value(value.clone())),
                None => return Ok(false),
            }
        };
        self.detach(key);
        self.announce(&path, ChangeKind::Setting, Some(old.into_value()), Some(value))?;
        Ok(true)
    }

    fn snapshot(&self) -> Value {
        let properties: Vec<(String, Property)> = self
            .properties
            .read()
            .iter()
            .map(|(key, prop)| (key.clone(), prop.clone()))
            .collect();
        Value::Object(
            properties
                .into_iter()
                .map(|(key, prop)| (key, prop.into_value()))
                .collect::<Map<String, Value>>(),
        )
    }
}

impl Observable for Model {
    fn lifetime(&self) -> &Lifetime {
        &self.lifetime
    }
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("id", &self.id())
            .field("properties", &self.snapshot())
            .finish()
    }
}
