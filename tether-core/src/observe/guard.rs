//! Lifetime guards.
//!
//! The first time an object takes part in a subscription, the registry
//! hangs one destruction hook on its [`Lifetime`](crate::object::Lifetime).
//! When the object dies the hook tears down every subscription naming it,
//! whichever side it was on. Later subscriptions reuse the same hook.
//!
//! The hook holds the registry weakly; a registry that is gone has nothing
//! left to tear down.

use std::cell::RefCell;
use std::sync::Arc;

use tracing::trace;

use super::registry::{Registry, State};
use crate::object::{ObjectId, Observable};

impl Registry {
    /// Arm the destruction hook for `object` unless already armed.
    pub(crate) fn arm(&self, state: &RefCell<State>, object: &dyn Observable) {
        let id = object.object_id();
        if !state.borrow_mut().armed.insert(id) {
            return;
        }

        let registry = Arc::downgrade(&self.inner);
        object.lifetime().on_destroy(move |id| {
            if let Some(inner) = registry.upgrade() {
                Registry { inner }.destroyed(id);
            }
        });
        trace!(object = %id, "armed destruction hook");
    }

    fn destroyed(&self, object: ObjectId) {
        let state = self.inner.state.lock();
        state.borrow_mut().armed.remove(&object);
        let count = self.teardown(object);
        trace!(object = %object, count, "object destroyed");
    }
}
