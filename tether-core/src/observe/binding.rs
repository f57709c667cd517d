//! Binding Engine
//!
//! A binding keeps a property of the observer in step with a path on the
//! observee. It is an ordinary named subscription whose callback writes the
//! (optionally transformed) new value into the observer:
//!
//! ```rust,ignore
//! registry.bind(&label, "text", &player, "score", Some(Arc::new(
//!     FnTransformer::new(|v| v.as_i64().map(|n| json!(format!("{n} pts")))),
//! )))?;
//! ```
//!
//! Binding names are unique per observer. Binding again under the same name
//! replaces the old binding, so there is never more than one.
//!
//! # Cycles
//!
//! Two bindings pointing at each other would echo forever. Writes that would
//! not change the target are skipped, which settles the common two-way case;
//! the registry's dispatch depth limit catches the rest.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use super::registry::Registry;
use super::subscription::{Callback, ObservingOptions, Subscribe};
use crate::error::{Error, PathError, Result};
use crate::object::path::{apply, resolve};
use crate::object::{ObjectRef, Observable, PropertyPath};

/// Converts values flowing through a binding.
pub trait ValueTransformer: Send + Sync {
    /// Observee value to observer value. `None` passes the value through
    /// unchanged.
    fn forward(&self, value: &Value) -> Option<Value>;

    /// Observer value to observee value, used by
    /// [`Registry::write_back`]. `None` means the transformer is one-way.
    fn reverse(&self, _value: &Value) -> Option<Value> {
        None
    }
}

type MapFn = Box<dyn Fn(&Value) -> Option<Value> + Send + Sync>;

/// A transformer built from closures.
pub struct FnTransformer {
    forward: MapFn,
    reverse: Option<MapFn>,
}

impl FnTransformer {
    pub fn new<F>(forward: F) -> Self
    where
        F: Fn(&Value) -> Option<Value> + Send + Sync + 'static,
    {
        Self {
            forward: Box::new(forward),
            reverse: None,
        }
    }

    /// Make the transformer reversible.
    pub fn with_reverse<R>(mut self, reverse: R) -> Self
    where
        R: Fn(&Value) -> Option<Value> + Send + Sync + 'static,
    {
        self.reverse = Some(Box::new(reverse));
        self
    }
}

impl ValueTransformer for FnTransformer {
    fn forward(&self, value: &Value) -> Option<Value> {
        (self.forward)(value)
    }

    fn reverse(&self, value: &Value) -> Option<Value> {
        self.reverse.as_ref().and_then(|reverse| reverse(value))
    }
}

impl fmt::Debug for FnTransformer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnTransformer")
            .field("reversible", &self.reverse.is_some())
            .finish()
    }
}

/// Flips booleans in both directions. Other values pass through.
#[derive(Debug, Clone, Copy, Default)]
pub struct NegateBoolean;

impl ValueTransformer for NegateBoolean {
    fn forward(&self, value: &Value) -> Option<Value> {
        value.as_bool().map(|b| Value::Bool(!b))
    }

    fn reverse(&self, value: &Value) -> Option<Value> {
        self.forward(value)
    }
}

/// `true` when the value is `null`.
#[derive(Debug, Clone, Copy, Default)]
pub struct IsNull;

impl ValueTransformer for IsNull {
    fn forward(&self, value: &Value) -> Option<Value> {
        Some(Value::Bool(value.is_null()))
    }
}

/// `true` when the value is anything but `null`.
#[derive(Debug, Clone, Copy, Default)]
pub struct IsNotNull;

impl ValueTransformer for IsNotNull {
    fn forward(&self, value: &Value) -> Option<Value> {
        Some(Value::Bool(!value.is_null()))
    }
}

impl Registry {
    /// Bind the observer property `binding` to `path` on `observee`.
    ///
    /// Both paths must resolve, up to a `null` along the way, or the path
    /// error is returned and nothing changes. Any existing binding with the
    /// same name on `observer` is then replaced. With
    /// [`sync_on_bind`](crate::RegistryConfig::sync_on_bind) the current
    /// value is written straight away; if that fails the binding is removed
    /// again and the error returned.
    pub fn bind<O, S>(
        &self,
        observer: &O,
        binding: &str,
        observee: &S,
        path: &str,
        transformer: Option<Arc<dyn ValueTransformer>>,
    ) -> Result<()>
    where
        O: ObjectRef,
        S: ObjectRef,
    {
        let target = PropertyPath::parse(binding)?;
        let source = PropertyPath::parse(path)?;

        let _guard = self.inner.state.lock();
        let value = reachable(observee.as_observable(), &source)?;
        reachable(observer.as_observable(), &target)?;
        self.unbind(observer, binding);

        let weak_observer = observer.downgrade();
        let forward = transformer.clone();
        let target_path = target.clone();
        let callback = Callback::raw(move |change| {
            let Some(observer) = weak_observer.upgrade() else {
                return Ok(());
            };
            let value = transformed(forward.as_deref(), change.new.clone());
            write_target(&*observer, &target_path, value)?;
            Ok(())
        });

        let spec = Subscribe::new(observer, observee, source.clone(), callback)
            .options(ObservingOptions::NEW)
            .named(binding)
            .transformer(transformer.clone());
        let id = self.register(spec)?;
        debug!(
            observer = %observer.id(),
            observee = %observee.id(),
            binding,
            path = %source,
            "bound"
        );

        if self.inner.config.sync_on_bind {
            let value = transformed(transformer.as_deref(), Some(value));
            if let Err(err) = write_target(observer.as_observable(), &target, value) {
                self.unregister(id);
                return Err(err);
            }
        }

        Ok(())
    }

    /// Remove the binding `binding` from `observer`. Returns whether one
    /// existed.
    pub fn unbind<O: ObjectRef>(&self, observer: &O, binding: &str) -> bool {
        let id = self
            .inner
            .state
            .lock()
            .borrow()
            .binding(observer.id(), binding)
            .map(|subscription| subscription.id);
        match id {
            Some(id) => {
                debug!(observer = %observer.id(), binding, "unbound");
                self.unregister(id)
            }
            None => false,
        }
    }

    /// The observee path behind a binding, if it exists.
    pub fn info_for_binding<O: ObjectRef>(
        &self,
        observer: &O,
        binding: &str,
    ) -> Option<PropertyPath> {
        self.inner
            .state
            .lock()
            .borrow()
            .binding(observer.id(), binding)
            .map(|subscription| subscription.path.clone())
    }

    /// Names of every binding on `observer`, oldest first.
    pub fn bindings<O: ObjectRef>(&self, observer: &O) -> Vec<String> {
        self.inner.state.lock().borrow().binding_names(observer.id())
    }

    /// Push an observer-side value back through a binding to its observee.
    ///
    /// The value goes through the transformer's reverse direction; bindings
    /// without a transformer pass it unchanged.
    pub fn write_back<O: ObjectRef>(
        &self,
        observer: &O,
        binding: &str,
        value: Value,
    ) -> Result<()> {
        let subscription = self
            .inner
            .state
            .lock()
            .borrow()
            .binding(observer.id(), binding)
            .ok_or_else(|| Error::UnknownBinding(binding.to_owned()))?;

        let value = match &subscription.transformer {
            Some(transformer) => transformer
                .reverse(&value)
                .ok_or_else(|| Error::NotReversible(binding.to_owned()))?,
            None => value,
        };
        let observee = subscription
            .observee
            .upgrade()
            .ok_or_else(|| Error::UnknownBinding(binding.to_owned()))?;

        apply(&*observee, &subscription.path, value)
    }
}

/// The value at `path`, with a broken chain read as `null`. Unknown members
/// are an error.
fn reachable(object: &dyn Observable, path: &PropertyPath) -> Result<Value> {
    match resolve(object, path) {
        Ok(value) => Ok(value),
        Err(PathError::NullInChain { .. }) => Ok(Value::Null),
        Err(err) => Err(err.into()),
    }
}

fn transformed(transformer: Option<&dyn ValueTransformer>, value: Option<Value>) -> Value {
    let value = value.unwrap_or(Value::Null);
    match transformer {
        Some(transformer) => transformer.forward(&value).unwrap_or(value),
        None => value,
    }
}

/// Write `value` into the observer unless it is already there.
fn write_target(observer: &dyn Observable, path: &PropertyPath, value: Value) -> Result<()> {
    if resolve(observer, path).is_ok_and(|current| current == value) {
        return Ok(());
    }
    apply(observer, path, value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::Model;
    use crate::RegistryConfig;
    use serde_json::json;

    fn doubled() -> Option<Arc<dyn ValueTransformer>> {
        Some(Arc::new(
            FnTransformer::new(|v| v.as_i64().map(|n| json!(n * 2)))
                .with_reverse(|v| v.as_i64().map(|n| json!(n / 2))),
        ))
    }

    #[test]
    fn bind_syncs_and_follows() {
        let registry = Registry::new();
        let label = Model::with_properties(&registry, [("text", Value::Null)]);
        let player = Model::with_properties(&registry, [("score", json!(10))]);

        registry.bind(&label, "text", &player, "score", doubled()).unwrap();
        assert_eq!(label.get("text"), Some(json!(20)));

        player.set("score", 15).unwrap();
        assert_eq!(label.get("text"), Some(json!(30)));
    }

    #[test]
    fn bind_without_sync_waits_for_a_change() {
        let registry = Registry::with_config(RegistryConfig {
            sync_on_bind: false,
            ..Default::default()
        });
        let label = Model::with_properties(&registry, [("text", json!("-"))]);
        let player = Model::with_properties(&registry, [("name", json!("Ann"))]);

        registry.bind(&label, "text", &player, "name", None).unwrap();
        assert_eq!(label.get("text"), Some(json!("-")));

        player.set("name", "Bob").unwrap();
        assert_eq!(label.get("text"), Some(json!("Bob")));
    }

    #[test]
    fn rebinding_replaces() {
        let registry = Registry::new();
        let label = Model::with_properties(&registry, [("text", Value::Null)]);
        let player =
            Model::with_properties(&registry, [("name", json!("Ann")), ("score", json!(1))]);

        registry.bind(&label, "text", &player, "name", None).unwrap();
        registry.bind(&label, "text", &player, "score", None).unwrap();

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.bindings(&label), ["text"]);
        assert_eq!(
            registry.info_for_binding(&label, "text"),
            Some(PropertyPath::parse("score").unwrap())
        );

        player.set("name", "Bob").unwrap();
        assert_eq!(label.get("text"), Some(json!(1)));
    }

    #[test]
    fn unresolvable_paths_are_refused() {
        let registry = Registry::new();
        let label = Model::with_properties(&registry, [("text", Value::Null)]);
        let player = Model::new(&registry);

        let err = registry.bind(&label, "text", &player, "missing", None).unwrap_err();
        assert!(matches!(err.path_error(), Some(PathError::UnknownSegment { .. })));
        assert!(registry.is_empty());

        let player = Model::with_properties(&registry, [("name", json!("Ann"))]);
        let err = registry.bind(&label, "nope", &player, "name", None).unwrap_err();
        assert!(matches!(err.path_error(), Some(PathError::UnknownSegment { .. })));
        assert!(registry.bindings(&label).is_empty());
    }

    #[test]
    fn paths_are_checked_without_sync() {
        let registry = Registry::with_config(RegistryConfig {
            sync_on_bind: false,
            ..Default::default()
        });
        let label = Model::with_properties(&registry, [("text", json!("-"))]);
        let player = Model::with_properties(&registry, [("name", json!("Ann"))]);

        let err = registry.bind(&label, "text", &player, "missing", None).unwrap_err();
        assert!(matches!(
            err.path_error(),
            Some(PathError::UnknownSegment { segment, .. }) if segment == "missing"
        ));

        let err = registry.bind(&label, "nope", &player, "name", None).unwrap_err();
        assert!(matches!(
            err.path_error(),
            Some(PathError::UnknownSegment { segment, .. }) if segment == "nope"
        ));
        assert!(registry.is_empty());
        assert_eq!(label.get("text"), Some(json!("-")));
    }

    #[test]
    fn failed_rebind_keeps_the_old_binding() {
        let registry = Registry::new();
        let label = Model::with_properties(&registry, [("text", Value::Null)]);
        let player = Model::with_properties(&registry, [("name", json!("Ann"))]);

        registry.bind(&label, "text", &player, "name", None).unwrap();
        assert!(registry.bind(&label, "text", &player, "missing", None).is_err());

        assert_eq!(
            registry.info_for_binding(&label, "text"),
            Some(PropertyPath::parse("name").unwrap())
        );
        player.set("name", "Bob").unwrap();
        assert_eq!(label.get("text"), Some(json!("Bob")));
    }

    #[test]
    fn null_in_source_chain_binds_null() {
        let registry = Registry::new();
        let label = Model::with_properties(&registry, [("text", json!("x"))]);
        let player = Model::with_properties(&registry, [("owner", Value::Null)]);

        registry.bind(&label, "text", &player, "owner.name", None).unwrap();
        assert_eq!(label.get("text"), Some(Value::Null));

        player.set("owner", json!({ "name": "Ann" })).unwrap();
        assert_eq!(label.get("text"), Some(json!("Ann")));
    }

    #[test]
    fn unbind_is_a_no_op_when_absent() {
        let registry = Registry::new();
        let label = Model::new(&registry);
        assert!(!registry.unbind(&label, "text"));
        assert_eq!(registry.info_for_binding(&label, "text"), None);
    }

    #[test]
    fn write_back_uses_the_reverse_transform() {
        let registry = Registry::new();
        let label =
            Model::with_properties(&registry, [("text", Value::Null), ("flag", Value::Null)]);
        let player =
            Model::with_properties(&registry, [("score", json!(10)), ("alive", json!(true))]);

        registry.bind(&label, "text", &player, "score", doubled()).unwrap();
        registry.bind(&label, "flag", &player, "alive", Some(Arc::new(IsNull))).unwrap();

        registry.write_back(&label, "text", json!(50)).unwrap();
        assert_eq!(player.get("score"), Some(json!(25)));
        assert_eq!(label.get("text"), Some(json!(50)));

        let err = registry.write_back(&label, "flag", json!(true)).unwrap_err();
        assert!(matches!(err, Error::NotReversible(ref name) if name == "flag"));

        let err = registry.write_back(&label, "other", json!(1)).unwrap_err();
        assert!(matches!(err, Error::UnknownBinding(_)));
    }

    #[test]
    fn built_in_transformers() {
        assert_eq!(NegateBoolean.forward(&json!(true)), Some(json!(false)));
        assert_eq!(NegateBoolean.reverse(&json!(false)), Some(json!(true)));
        assert_eq!(NegateBoolean.forward(&json!(3)), None);
        assert_eq!(IsNull.forward(&Value::Null), Some(json!(true)));
        assert_eq!(IsNotNull.forward(&json!(0)), Some(json!(true)));
        assert_eq!(IsNotNull.reverse(&json!(true)), None);
    }

    #[test]
    fn two_way_bindings_settle() {
        let registry = Registry::new();
        let a = Model::with_properties(&registry, [("v", json!(1))]);
        let b = Model::with_properties(&registry, [("v", json!(0))]);

        registry.bind(&a, "v", &b, "v", None).unwrap();
        registry.bind(&b, "v", &a, "v", None).unwrap();
        assert_eq!(a.get("v"), Some(json!(0)));

        a.set("v", 7).unwrap();
        assert_eq!(b.get("v"), Some(json!(7)));
        b.set("v", 9).unwrap();
        assert_eq!(a.get("v"), Some(json!(9)));
    }
}
