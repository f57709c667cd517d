//! Host Object Capabilities
//!
//! The observation layer does not know how a host stores its properties or
//! when it mutates them. Hosts plug in through two traits:
//!
//! - [`PropertyAccess`]: read and write a property by name. Anything that can
//!   appear in the middle of a path implements this.
//! - [`Observable`]: a `PropertyAccess` that also has an identity and a
//!   [`Lifetime`], so the registry can tear subscriptions down when it dies.
//!
//! Hosts report mutations by calling
//! [`Registry::notify`](crate::observe::Registry::notify). [`Model`] is a
//! ready-made host that does so on every write.

mod lifetime;
mod model;
pub mod path;

pub use lifetime::Lifetime;
pub use model::Model;
pub use path::PropertyPath;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use serde_json::Value;

use crate::error::Result;

/// Identity of an observable object.
///
/// Allocated once per [`Lifetime`] and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId(u64);

impl ObjectId {
    /// Generate a new unique object ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What a property lookup yields.
#[derive(Clone)]
pub enum Property {
    /// A plain value. JSON objects inside it can still be traversed.
    Value(Value),
    /// Another host object, traversed through its own [`PropertyAccess`].
    Object(Arc<dyn PropertyAccess>),
}

impl Property {
    /// Collapse into a plain value, snapshotting host objects.
    pub fn into_value(self) -> Value {
        match self {
            Property::Value(value) => value,
            Property::Object(object) => object.snapshot(),
        }
    }
}

impl fmt::Debug for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Property::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Property::Object(object) => f.debug_tuple("Object").field(&object.snapshot()).finish(),
        }
    }
}

impl From<Value> for Property {
    fn from(value: Value) -> Self {
        Property::Value(value)
    }
}

/// Named property access supplied by the host.
pub trait PropertyAccess: Send + Sync {
    /// Look up a property. `None` means the object has no such member.
    fn property(&self, key: &str) -> Option<Property>;

    /// Replace a property's value.
    ///
    /// Returns `Ok(false)` when the object has no such member. Errors are
    /// whatever the host's change notification produced.
    fn set_property(&self, key: &str, value: Value) -> Result<bool>;

    /// The whole object as a plain value, used when a path ends on a host
    /// object rather than a value.
    fn snapshot(&self) -> Value {
        Value::Null
    }
}

/// A host object that can be observed or act as an observer.
pub trait Observable: PropertyAccess + 'static {
    /// The object's destruction hook registry. Its id is the object's identity.
    fn lifetime(&self) -> &Lifetime;

    /// Shorthand for `self.lifetime().id()`.
    fn object_id(&self) -> ObjectId {
        self.lifetime().id()
    }
}

/// A strong handle to an observable object.
///
/// Implemented for `Arc<T>` of any concrete observable as well as for
/// `Arc<dyn Observable>`, so registry methods accept either.
pub trait ObjectRef {
    /// Borrow the object.
    fn as_observable(&self) -> &dyn Observable;

    /// A type-erased strong handle.
    fn to_observable(&self) -> Arc<dyn Observable>;

    /// A reference that does not keep the object alive.
    fn downgrade(&self) -> Weak<dyn Observable> {
        Arc::downgrade(&self.to_observable())
    }

    /// The object's identity.
    fn id(&self) -> ObjectId {
        self.as_observable().object_id()
    }
}

impl<T: Observable> ObjectRef for Arc<T> {
    fn as_observable(&self) -> &dyn Observable {
        &**self
    }

    fn to_observable(&self) -> Arc<dyn Observable> {
        self.clone()
    }
}

impl ObjectRef for Arc<dyn Observable> {
    fn as_observable(&self) -> &dyn Observable {
        &**self
    }

    fn to_observable(&self) -> Arc<dyn Observable> {
        self.clone()
    }
}
