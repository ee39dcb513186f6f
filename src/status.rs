//! Query status values as written to the store.

use std::fmt;

use serde::Serialize;

/// Lifecycle status of a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    /// A driver call for the query is in flight.
    Pending,
    /// Data for the query is in the store.
    Success,
    /// The query failed or could not be resolved.
    Error,
    /// The query has parameters that depend on data not loaded yet.
    UndefinedParams,
}

impl Status {
    /// Canonical upper-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Pending => "PENDING",
            Status::Success => "SUCCESS",
            Status::Error => "ERROR",
            Status::UndefinedParams => "UNDEFINED_PARAMS",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of one query hash, with optional response code and error text.
///
/// The default record has no status: the query has never been seen.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusRecord {
    /// Current status, `None` when the query is unknown.
    pub status: Option<Status>,
    /// Response status code reported by the driver.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,
    /// Error message for [`Status::Error`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StatusRecord {
    /// A record carrying only `status`.
    pub fn new(status: Status) -> Self {
        Self {
            status: Some(status),
            code: None,
            error: None,
        }
    }

    /// An error record.
    pub fn error(message: impl Into<String>, code: Option<u16>) -> Self {
        Self {
            status: Some(Status::Error),
            code,
            error: Some(message.into()),
        }
    }

    /// Whether the status is [`Status::Pending`].
    pub fn is_pending(&self) -> bool {
        self.status == Some(Status::Pending)
    }

    /// Whether the status is [`Status::Success`].
    pub fn is_success(&self) -> bool {
        self.status == Some(Status::Success)
    }

    /// Whether the status is [`Status::Error`].
    pub fn is_error(&self) -> bool {
        self.status == Some(Status::Error)
    }

    /// Whether the status is [`Status::UndefinedParams`].
    pub fn is_undefined_params(&self) -> bool {
        self.status == Some(Status::UndefinedParams)
    }
}
