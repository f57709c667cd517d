//! Error Types
//!
//! Every fallible operation in the crate returns [`Result`]. Path problems are
//! reported through [`PathError`] so callers can tell a missing member apart
//! from a `null` somewhere in the middle of a chain.

use thiserror::Error;

use crate::object::ObjectId;
use crate::observe::SubscriptionId;

/// Boxed error returned by user callbacks.
///
/// Callbacks may fail with any error type; the dispatcher carries it back to
/// whoever triggered the mutation.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Failure to parse or traverse a property path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    /// The path string is empty or contains an empty segment.
    #[error("invalid property path `{0}`")]
    Invalid(String),

    /// An intermediate value along the path is `null`.
    #[error("`{segment}` is null while resolving `{path}`")]
    NullInChain { path: String, segment: String },

    /// A segment names a member the intermediate value does not have.
    #[error("unknown segment `{segment}` while resolving `{path}`")]
    UnknownSegment { path: String, segment: String },
}

/// Top-level error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Path(#[from] PathError),

    /// A named subscription collided with an existing binding of the same
    /// observer outside of `bind`, which always replaces.
    #[error("binding `{name}` is already registered for observer {observer}")]
    DuplicateBinding { observer: ObjectId, name: String },

    /// A callback failed. Dispatch still reached the rest of the batch.
    #[error("callback for subscription {subscription} failed: {source}")]
    Callback {
        subscription: SubscriptionId,
        #[source]
        source: BoxError,
    },

    /// Notifications nested deeper than the configured limit, usually a
    /// binding cycle.
    #[error("dispatch depth limit of {limit} exceeded while notifying `{path}`")]
    DispatchDepthExceeded { limit: usize, path: String },

    #[error("no binding named `{0}`")]
    UnknownBinding(String),

    #[error("binding `{0}` has no reverse transformation")]
    NotReversible(String),

    #[error("invalid registry configuration: {0}")]
    Config(#[from] serde_json::Error),
}

impl Error {
    /// The path error behind this error, if any.
    ///
    /// Looks through callback failures so a binding that could not write its
    /// target still reports the underlying path problem.
    pub fn path_error(&self) -> Option<&PathError> {
        match self {
            Error::Path(err) => Some(err),
            Error::Callback { source, .. } => match source.downcast_ref::<Error>() {
                Some(inner) => inner.path_error(),
                None => source.downcast_ref::<PathError>(),
            },
            _ => None,
        }
    }
}
