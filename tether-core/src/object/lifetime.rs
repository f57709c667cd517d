//! Destruction Hooks
//!
//! A [`Lifetime`] is embedded in every observable host object. It carries the
//! object's identity and runs a list of one-shot hooks when it is dropped,
//! which happens exactly when the owning object is reclaimed.
//!
//! By the time hooks run, the object's strong count is already zero, so any
//! `Weak` pointing at it fails to upgrade. Hooks receive the id instead of
//! the object.

use std::fmt;

use parking_lot::Mutex;
use smallvec::SmallVec;

use super::ObjectId;

type DestroyHook = Box<dyn FnOnce(ObjectId) + Send>;

/// Identity plus destruction hooks of a host object.
pub struct Lifetime {
    id: ObjectId,
    hooks: Mutex<SmallVec<[DestroyHook; 1]>>,
}

impl Lifetime {
    /// Create a lifetime with a fresh identity.
    pub fn new() -> Self {
        Self {
            id: ObjectId::new(),
            hooks: Mutex::new(SmallVec::new()),
        }
    }

    /// The owning object's identity.
    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// Register a hook to run once when the owning object is destroyed.
    pub fn on_destroy<F>(&self, hook: F)
    where
        F: FnOnce(ObjectId) + Send + 'static,
    {
        self.hooks.lock().push(Box::new(hook));
    }

    /// Number of hooks waiting to fire.
    pub fn hook_count(&self) -> usize {
        self.hooks.lock().len()
    }
}

impl Default for Lifetime {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Lifetime {
    fn drop(&mut self) {
        let hooks = std::mem::take(self.hooks.get_mut());
        for hook in hooks {
            hook(self.id);
        }
    }
}

impl fmt::Debug for Lifetime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lifetime")
            .field("id", &self.id)
            .field("hook_count", &self.hook_count())
            .finish()
    }
}
