//! Tether Core
//!
//! Property observation and data binding between objects that come and go.
//! It provides:
//!
//! - Key-path observation with old/new/initial values
//! - Callbacks with an opaque context or with just the observee
//! - Named bindings with optional value transformers
//! - Automatic teardown: a subscription dies with either of its ends
//!
//! The crate never owns the objects it links. Hosts describe themselves
//! through the traits in [`object`] and report their own mutations.
//!
//! # Architecture
//!
//! - `object`: host capabilities, property paths, lifetimes and [`Model`]
//! - `observe`: the subscription registry, dispatch and bindings
//! - `config`: registry tuning
//! - `error`: error types
//!
//! # Example
//!
//! ```rust,ignore
//! use tether_core::{Model, Registry};
//! use serde_json::json;
//!
//! let registry = Registry::new();
//! let player = Model::with_properties(&registry, [("score", json!(10))]);
//! let label = Model::with_properties(&registry, [("text", json!(null))]);
//!
//! // Keep label.text in step with player.score
//! registry.bind(&label, "text", &player, "score", None)?;
//! assert_eq!(label.get("text"), Some(json!(10)));
//!
//! player.set("score", 15)?;
//! assert_eq!(label.get("text"), Some(json!(15)));
//!
//! // Dropping either side removes the binding
//! drop(player);
//! assert!(registry.is_empty());
//! ```

pub mod config;
pub mod error;
pub mod object;
pub mod observe;

pub use config::RegistryConfig;
pub use error::{BoxError, Error, PathError, Result};
pub use object::{
    Lifetime, Model, ObjectId, ObjectRef, Observable, Property, PropertyAccess, PropertyPath,
};
pub use observe::{ChangeKind, ObservingOptions, Registry, SubscriptionId, ValueTransformer};
pub use serde_json::Value;
