//! Dispatcher
//!
//! Turns a host's change notification into callback invocations.
//!
//! # How Dispatch Works
//!
//! 1. The host calls [`Registry::notify`] with the observee, the changed path
//!    and the old/new values.
//!
//! 2. The registry snapshots the subscriptions on that observee whose path
//!    equals the changed path or lies beneath it. The snapshot is taken per
//!    call; nothing is cached.
//!
//! 3. Each subscription in the snapshot is called once, in registration
//!    order, unless an earlier callback in the same batch removed it or one
//!    of its ends has died. Subscriptions added during the batch wait for the
//!    next notification.
//!
//! 4. Relays from the observee re-notify their parent under
//!    `key.<path>`, which starts a nested dispatch there.
//!
//! 5. A failing callback does not stop the batch. The first failure is
//!    returned once the batch is done.
//!
//! Delivery is synchronous on the caller's thread.

use std::cell::RefCell;
use std::sync::Arc;

use serde_json::Value;
use tracing::{trace, warn};

use super::registry::{Registry, State};
use super::subscription::{ChangeKind, Subscription, SubscriptionId};
use crate::error::{BoxError, Error, PathError, Result};
use crate::object::path::{lookup, resolve};
use crate::object::{ObjectId, Observable, PropertyPath};

/// Tracks `notify` nesting for the lifetime of one call.
struct DepthGuard<'a> {
    state: &'a RefCell<State>,
}

impl<'a> DepthGuard<'a> {
    fn enter(state: &'a RefCell<State>, limit: usize, path: &PropertyPath) -> Result<Self> {
        let mut current = state.borrow_mut();
        if current.depth >= limit {
            return Err(Error::DispatchDepthExceeded {
                limit,
                path: path.to_string(),
            });
        }
        current.depth += 1;
        Ok(Self { state })
    }
}

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.state.borrow_mut().depth -= 1;
    }
}

impl Registry {
    /// Deliver a change of `path` on `observee` to its subscribers.
    ///
    /// `old` and `new` are attached to each notification according to the
    /// subscription's options. Subscriptions on deeper paths get their new
    /// value re-read from the observee and their old value looked up inside
    /// `old`.
    pub fn notify(
        &self,
        observee: ObjectId,
        path: &PropertyPath,
        kind: ChangeKind,
        old: Option<Value>,
        new: Option<Value>,
    ) -> Result<()> {
        let state = self.inner.state.lock();
        let _depth = DepthGuard::enter(&state, self.inner.config.max_dispatch_depth, path)?;

        let current = state.borrow();
        let batch = current.matching(observee, path);
        let relays = current.relays_from(observee);
        drop(current);
        if batch.is_empty() && relays.is_empty() {
            return Ok(());
        }
        trace!(
            observee = %observee,
            path = %path,
            subscribers = batch.len(),
            relays = relays.len(),
            "dispatching change"
        );

        let mut failure = None;
        for subscription in &batch {
            if !state.borrow().contains(subscription.id) {
                continue;
            }
            let (Some(_observer), Some(target)) =
                (subscription.observer.upgrade(), subscription.observee.upgrade())
            else {
                continue;
            };

            let options = subscription.options;
            let (old, new) = if subscription.path.len() == path.len() {
                (old.clone().filter(|_| options.old), new.clone().filter(|_| options.new))
            } else {
                let rest = &subscription.path.segments()[path.len()..];
                let nested_old = options
                    .old
                    .then(|| old.as_ref().and_then(|value| lookup(value, rest)))
                    .flatten();
                let nested_new = options
                    .new
                    .then(|| current_value(target.as_ref(), &subscription.path))
                    .flatten();
                (nested_old, nested_new)
            };

            if let Err(source) = subscription.invoke(&target, kind, old, new, false) {
                record_failure(&mut failure, subscription.id, source);
            }
        }

        for relay in &relays {
            if !state.borrow().contains_relay(relay.id) {
                continue;
            }
            let Some(_parent) = relay.parent.upgrade() else {
                continue;
            };
            let forwarded = relay.key.join(path);
            let relayed = self.notify(relay.parent_id, &forwarded, kind, old.clone(), new.clone());
            if let Err(err) = relayed {
                record_failure(&mut failure, relay.id, Box::new(err));
            }
        }

        failure.map_or(Ok(()), Err)
    }

    /// Issue the synthetic notification for a subscription registered with
    /// `initial`: the current value as `new`, no `old`.
    pub(crate) fn deliver_initial(
        &self,
        subscription: &Subscription,
        observee: &Arc<dyn Observable>,
    ) -> Result<()> {
        let new = match resolve(&**observee, &subscription.path) {
            Ok(value) => Some(value),
            Err(PathError::NullInChain { path, segment }) => {
                trace!(%path, %segment, "null in chain during initial delivery");
                None
            }
            Err(err) => return Err(err.into()),
        };

        subscription
            .invoke(observee, ChangeKind::Setting, None, new, true)
            .map_err(|source| Error::Callback {
                subscription: subscription.id,
                source,
            })
    }
}

/// Current value at `path`, or `None` when the chain is broken.
fn current_value(observee: &dyn Observable, path: &PropertyPath) -> Option<Value> {
    match resolve(observee, path) {
        Ok(value) => Some(value),
        Err(err) => {
            trace!(%path, error = %err, "nested path did not resolve");
            None
        }
    }
}

fn record_failure(failure: &mut Option<Error>, subscription: SubscriptionId, source: BoxError) {
    if failure.is_none() {
        *failure = Some(Error::Callback { subscription, source });
    } else {
        warn!(subscription = %subscription, error = %source, "callback failed");
    }
}
