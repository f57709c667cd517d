//! Observation and Binding
//!
//! This module is the registry side of the crate: who observes what, and how
//! a change reaches them.
//!
//! # How Observation Works
//!
//! 1. **Register**: [`Registry::add_observer`] (or [`Registry::watch`],
//!    [`Registry::register`]) records a subscription linking an observer to a
//!    path on an observee. Both objects get a destruction hook.
//!
//! 2. **Notify**: when the host mutates a property it calls
//!    [`Registry::notify`]. Every subscription on that path, or beneath it,
//!    is called back synchronously.
//!
//! 3. **Teardown**: when either object is dropped its hook removes every
//!    subscription it takes part in. Nothing is ever delivered to, or read
//!    from, a dead object.
//!
//! Bindings ([`Registry::bind`]) are named subscriptions that copy the
//! observed value into a property of the observer. Relays
//! ([`Registry::relay`]) forward the changes of a nested host object to the
//! object holding it.

mod binding;
mod dispatch;
mod guard;
mod registry;
mod relay;
mod subscription;

pub use binding::{FnTransformer, IsNotNull, IsNull, NegateBoolean, ValueTransformer};
pub use registry::Registry;
pub use subscription::{
    Callback, CallbackResult, Change, ChangeKind, Context, ObserveeCallback, ObservingOptions,
    RawCallback, Subscribe, SubscriptionId,
};
