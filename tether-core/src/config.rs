//! Registry Configuration
//!
//! Tunables for a [`Registry`](crate::observe::Registry). Every field has a
//! default, so a partial JSON document is enough:
//!
//! ```rust,ignore
//! let config = RegistryConfig::from_json(r#"{ "max_dispatch_depth": 8 }"#)?;
//! let registry = Registry::with_config(config);
//! ```

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Configuration for a registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// How deeply notifications may nest before dispatch gives up.
    ///
    /// A binding whose target is itself observed triggers a nested dispatch.
    /// Two bindings pointing at each other would otherwise recurse forever.
    pub max_dispatch_depth: usize,

    /// Push the current source value into the target when a binding is
    /// created, instead of waiting for the first change.
    pub sync_on_bind: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_dispatch_depth: 64,
            sync_on_bind: true,
        }
    }
}

impl RegistryConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
