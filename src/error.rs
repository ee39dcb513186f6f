//! Error types.

use std::fmt;
use std::sync::Arc;

/// Message reported when no registered source can satisfy a query.
pub const UNRESOLVABLE_MESSAGE: &str = "There is no source definition which resolves the query";

/// Invalid models, queries, providers, sources or registrations.
///
/// These are programming errors surfaced synchronously when the offending
/// value is built; nothing in the crate recovers from them.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A model was declared without a name.
    #[error("a model must have a name")]
    EmptyModelName,

    /// A model was declared without fields.
    #[error("model `{model}` must declare at least one field")]
    NoFields {
        /// Model name.
        model: String,
    },

    /// The identity field is not one of the model's fields.
    #[error("model `{model}` has no identity field `{field}`")]
    MissingIdField {
        /// Model name.
        model: String,
        /// Configured identity field.
        field: String,
    },

    /// Fields were requested that the model does not define.
    #[error("All fields must be defined within your model. Missing: {}", .fields.join(", "))]
    MissingFields {
        /// Model name.
        model: String,
        /// Every unknown field.
        fields: Vec<String>,
    },

    /// A value of the wrong shape was assigned to a submodel field.
    #[error("field `{field}` of model `{model}` holds a `{expected}` instance")]
    InvalidSubmodel {
        /// Model name.
        model: String,
        /// Submodel field.
        field: String,
        /// Expected submodel name.
        expected: String,
    },

    /// The instance has no identity value but the operation needs one.
    #[error("instance of model `{model}` has no identity value")]
    MissingInstanceId {
        /// Model name.
        model: String,
    },

    /// Two models were registered under one name.
    #[error("model `{name}` is already registered")]
    DuplicateModel {
        /// Model name.
        name: String,
    },

    /// A GET source must declare what it returns.
    #[error("source `{source_id}` must declare what it returns")]
    MissingReturns {
        /// Source id.
        source_id: String,
    },

    /// A source serves no models.
    #[error("source `{source_id}` must serve at least one model")]
    NoModels {
        /// Source id.
        source_id: String,
    },

    /// A named return was declared twice.
    #[error("source `{source_id}` declares the return `{name}` twice")]
    DuplicateReturn {
        /// Source id.
        source_id: String,
        /// Return name.
        name: String,
    },

    /// Two sources were registered under one id.
    #[error("source `{id}` is already registered")]
    DuplicateSource {
        /// Source id.
        id: String,
    },

    /// Sources were bound to a driver name that was never registered.
    #[error("no driver registered under `{name}`")]
    UnknownDriver {
        /// Driver name.
        name: String,
    },
}

/// A driver response that does not match what the source declared.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    /// A list provider received something other than an array.
    #[error("expected a list of `{model}` data")]
    ExpectedList {
        /// Model name.
        model: String,
    },

    /// An item provider, or a list element, was not an object.
    #[error("expected an object of `{model}` data")]
    ExpectedObject {
        /// Model name.
        model: String,
    },

    /// An entity in the response has no identity value.
    #[error("`{model}` data is missing its identity field `{field}`")]
    MissingIdentity {
        /// Model name.
        model: String,
        /// Identity field.
        field: String,
    },

    /// A DELETE query finished but does not name the deleted entity.
    #[error("cannot delete `{model}` without a model id")]
    MissingModelId {
        /// Model name.
        model: String,
    },
}

/// Errors from evaluating a dependent query map.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DependencyError {
    /// Query slots read each other in a cycle.
    #[error("dependency cycle detected: {}", .path.join(" -> "))]
    Cycle {
        /// Slot names forming the cycle.
        path: Vec<String>,
    },

    /// A slot's query could not be built.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A slot read a sibling that is never defined.
    #[error("query `{from}` reads unknown query `{name}`")]
    UnknownQuery {
        /// Slot doing the read.
        from: String,
        /// Slot that does not exist.
        name: String,
    },
}

/// Outcome delivered to query callbacks when a query fails.
#[derive(Debug, Clone)]
pub enum QueryError {
    /// No registered source satisfies the query.
    Unresolvable,

    /// The driver reported an error.
    Driver {
        /// Error raised by the driver.
        error: Arc<anyhow::Error>,
        /// Response status code, when the transport has one.
        code: Option<u16>,
    },

    /// The response could not be stored.
    Cache(CacheError),
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryError::Unresolvable => f.write_str(UNRESOLVABLE_MESSAGE),
            QueryError::Driver { error, .. } => write!(f, "{}", error),
            QueryError::Cache(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for QueryError {}

impl From<CacheError> for QueryError {
    fn from(err: CacheError) -> Self {
        QueryError::Cache(err)
    }
}

impl QueryError {
    /// Wraps a driver error.
    pub fn driver(error: impl Into<anyhow::Error>, code: Option<u16>) -> Self {
        QueryError::Driver {
            error: Arc::new(error.into()),
            code,
        }
    }

    /// Response status code attached to a driver error.
    pub fn code(&self) -> Option<u16> {
        match self {
            QueryError::Driver { code, .. } => *code,
            _ => None,
        }
    }

    /// Attempts to downcast a driver error to a specific type.
    pub fn downcast_ref<E: std::error::Error + Send + Sync + 'static>(&self) -> Option<&E> {
        match self {
            QueryError::Driver { error, .. } => error.downcast_ref::<E>(),
            _ => None,
        }
    }
}
