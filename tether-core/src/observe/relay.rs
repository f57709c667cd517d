//! Relays
//!
//! A host object stored inside another one announces its own changes under
//! its own identity. Observers of the outer object see paths such as
//! `address.city`, so those changes have to be announced again on the outer
//! object with the key in front.
//!
//! A relay does exactly that: every change notified on the child is
//! re-notified on the parent under `key.<path>`. It holds the parent weakly
//! and is torn down with either object, like any subscription.

use std::fmt;
use std::sync::{Arc, Weak};

use tracing::debug;

use super::registry::Registry;
use super::subscription::SubscriptionId;
use crate::error::Result;
use crate::object::{ObjectId, ObjectRef, Observable, PropertyPath};

pub(crate) struct Relay {
    pub(crate) id: SubscriptionId,
    pub(crate) parent: Weak<dyn Observable>,
    pub(crate) parent_id: ObjectId,
    pub(crate) child_id: ObjectId,
    pub(crate) key: PropertyPath,
}

impl fmt::Debug for Relay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Relay")
            .field("id", &self.id)
            .field("parent", &self.parent_id)
            .field("child", &self.child_id)
            .field("key", &self.key)
            .finish()
    }
}

impl Registry {
    /// Re-announce every change on `child` on `parent`, under `key`.
    ///
    /// [`Model::insert_object`](crate::Model::insert_object) sets this up
    /// for the objects it stores. The returned id can be passed to
    /// [`unregister`](Self::unregister).
    pub fn relay<P, C>(&self, parent: &P, key: &str, child: &C) -> Result<SubscriptionId>
    where
        P: ObjectRef,
        C: ObjectRef,
    {
        let relay = Arc::new(Relay {
            id: SubscriptionId::new(),
            parent: parent.downgrade(),
            parent_id: parent.id(),
            child_id: child.id(),
            key: PropertyPath::parse(key)?,
        });
        let id = relay.id;
        debug!(
            relay = %id,
            parent = %relay.parent_id,
            child = %relay.child_id,
            key = %relay.key,
            "relaying"
        );

        let state = self.inner.state.lock();
        state.borrow_mut().insert_relay(relay);
        self.arm(&state, parent.as_observable());
        self.arm(&state, child.as_observable());
        Ok(id)
    }
}
