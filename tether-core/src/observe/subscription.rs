//! Subscription types.
//!
//! A subscription links one observer to one path on one observee. Both ends
//! are held weakly: a subscription never keeps either object alive, and a
//! dead end is never called back.

use std::any::Any;
use std::fmt;
use std::ops::BitOr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::binding::ValueTransformer;
use crate::error::BoxError;
use crate::object::{ObjectId, ObjectRef, Observable, PropertyPath};

/// Unique identifier for a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// Generate a new unique subscription ID.
    ///
    /// IDs increase monotonically, so ordering by ID is registration order.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Which values a subscription wants delivered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservingOptions {
    /// Deliver one synthetic notification carrying the current value as soon
    /// as the subscription is registered.
    pub initial: bool,
    /// Attach the previous value to change notifications.
    pub old: bool,
    /// Attach the new value to change notifications.
    pub new: bool,
}

impl ObservingOptions {
    pub const NONE: Self = Self { initial: false, old: false, new: false };
    pub const INITIAL: Self = Self { initial: true, old: false, new: false };
    pub const OLD: Self = Self { initial: false, old: true, new: false };
    pub const NEW: Self = Self { initial: false, old: false, new: true };

    /// `self` with initial delivery switched on or off.
    pub const fn with_initial(self, initial: bool) -> Self {
        Self { initial, ..self }
    }
}

impl BitOr for ObservingOptions {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self {
            initial: self.initial || rhs.initial,
            old: self.old || rhs.old,
            new: self.new || rhs.new,
        }
    }
}

/// The kind of mutation a notification describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    /// The value was replaced.
    Setting,
    /// Elements were inserted into a collection value.
    Insertion,
    /// The value, or elements of a collection value, were removed.
    Removal,
    /// Elements of a collection value were replaced.
    Replacement,
}

/// Opaque caller payload handed back with every raw notification.
pub type Context = Arc<dyn Any + Send + Sync>;

/// Result returned by callbacks.
pub type CallbackResult = Result<(), BoxError>;

/// Callback receiving the full change description.
pub type RawCallback = Box<dyn Fn(&Change<'_>) -> CallbackResult + Send + Sync>;

/// Callback receiving only the observee.
pub type ObserveeCallback = Box<dyn Fn(&Arc<dyn Observable>) -> CallbackResult + Send + Sync>;

/// How a subscription is called back.
pub enum Callback {
    Raw(RawCallback),
    ObserveeOnly(ObserveeCallback),
}

impl Callback {
    pub fn raw<F>(f: F) -> Self
    where
        F: Fn(&Change<'_>) -> CallbackResult + Send + Sync + 'static,
    {
        Callback::Raw(Box::new(f))
    }

    pub fn observee_only<F>(f: F) -> Self
    where
        F: Fn(&Arc<dyn Observable>) -> CallbackResult + Send + Sync + 'static,
    {
        Callback::ObserveeOnly(Box::new(f))
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Callback::Raw(_) => f.write_str("Callback::Raw"),
            Callback::ObserveeOnly(_) => f.write_str("Callback::ObserveeOnly"),
        }
    }
}

/// A change notification as seen by a raw callback.
pub struct Change<'a> {
    /// The observed path, as registered.
    pub path: &'a PropertyPath,
    /// The object whose property changed.
    pub observee: &'a Arc<dyn Observable>,
    pub kind: ChangeKind,
    /// Previous value, if requested with [`ObservingOptions::old`].
    pub old: Option<Value>,
    /// New value, if requested with [`ObservingOptions::new`] or this is the
    /// initial delivery.
    pub new: Option<Value>,
    /// Whether this is the synthetic notification issued at registration.
    pub initial: bool,
    context: Option<&'a Context>,
}

impl<'a> Change<'a> {
    /// The registration context, if it is a `T`.
    pub fn context<T: Any>(&self) -> Option<&'a T> {
        self.context.and_then(|context| context.downcast_ref::<T>())
    }
}

impl fmt::Debug for Change<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Change")
            .field("path", self.path)
            .field("observee", &self.observee.object_id())
            .field("kind", &self.kind)
            .field("old", &self.old)
            .field("new", &self.new)
            .field("initial", &self.initial)
            .finish()
    }
}

/// Everything needed to register a subscription.
///
/// ```rust,ignore
/// let id = registry.register(
///     Subscribe::new(&observer, &observee, "score".parse()?, Callback::raw(|change| {
///         println!("{:?}", change.new);
///         Ok(())
///     }))
///     .options(ObservingOptions::NEW | ObservingOptions::INITIAL)
///     .named("score-label"),
/// )?;
/// ```
///
/// The builder holds strong handles to both ends until it is registered; the
/// registered subscription keeps only weak ones.
pub struct Subscribe {
    pub(crate) observer: Arc<dyn Observable>,
    pub(crate) observee: Arc<dyn Observable>,
    pub(crate) path: PropertyPath,
    pub(crate) options: ObservingOptions,
    pub(crate) context: Option<Context>,
    pub(crate) callback: Callback,
    pub(crate) binding: Option<String>,
    pub(crate) transformer: Option<Arc<dyn ValueTransformer>>,
}

impl Subscribe {
    pub fn new<O, S>(observer: &O, observee: &S, path: PropertyPath, callback: Callback) -> Self
    where
        O: ObjectRef,
        S: ObjectRef,
    {
        Self {
            observer: observer.to_observable(),
            observee: observee.to_observable(),
            path,
            options: ObservingOptions::NONE,
            context: None,
            callback,
            binding: None,
            transformer: None,
        }
    }

    pub fn options(mut self, options: ObservingOptions) -> Self {
        self.options = options;
        self
    }

    pub fn context(mut self, context: Context) -> Self {
        self.context = Some(context);
        self
    }

    /// Give the subscription a binding name, unique per observer.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.binding = Some(name.into());
        self
    }

    pub(crate) fn transformer(mut self, transformer: Option<Arc<dyn ValueTransformer>>) -> Self {
        self.transformer = transformer;
        self
    }
}

/// A registered subscription. Lives in the registry's primary store.
pub(crate) struct Subscription {
    pub(crate) id: SubscriptionId,
    pub(crate) observer: Weak<dyn Observable>,
    pub(crate) observer_id: ObjectId,
    pub(crate) observee: Weak<dyn Observable>,
    pub(crate) observee_id: ObjectId,
    pub(crate) path: PropertyPath,
    pub(crate) options: ObservingOptions,
    pub(crate) context: Option<Context>,
    pub(crate) callback: Callback,
    pub(crate) binding: Option<String>,
    pub(crate) transformer: Option<Arc<dyn ValueTransformer>>,
}

impl Subscription {
    pub(crate) fn from_spec(spec: Subscribe) -> Self {
        Self {
            id: SubscriptionId::new(),
            observer: Arc::downgrade(&spec.observer),
            observer_id: spec.observer.object_id(),
            observee: Arc::downgrade(&spec.observee),
            observee_id: spec.observee.object_id(),
            path: spec.path,
            options: spec.options,
            context: spec.context,
            callback: spec.callback,
            binding: spec.binding,
            transformer: spec.transformer,
        }
    }

    /// Call back with a change on `observee`.
    pub(crate) fn invoke(
        &self,
        observee: &Arc<dyn Observable>,
        kind: ChangeKind,
        old: Option<Value>,
        new: Option<Value>,
        initial: bool,
    ) -> CallbackResult {
        match &self.callback {
            Callback::Raw(callback) => callback(&Change {
                path: &self.path,
                observee,
                kind,
                old,
                new,
                initial,
                context: self.context.as_ref(),
            }),
            Callback::ObserveeOnly(callback) => callback(observee),
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("observer", &self.observer_id)
            .field("observee", &self.observee_id)
            .field("path", &self.path)
            .field("options", &self.options)
            .field("binding", &self.binding)
            .field("callback", &self.callback)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscription_ids_are_ordered() {
        let first = SubscriptionId::new();
        let second = SubscriptionId::new();
        assert!(first < second);
    }

    #[test]
    fn options_combine() {
        let options = ObservingOptions::NEW | ObservingOptions::OLD;
        assert!(options.new && options.old && !options.initial);
        assert!(options.with_initial(true).initial);
        assert_eq!(ObservingOptions::default(), ObservingOptions::NONE);
    }

    #[test]
    fn change_kind_serializes_lowercase() {
        assert_eq!(
            serde_json::to_value(ChangeKind::Removal).unwrap(),
            serde_json::json!("removal")
        );
    }
}
