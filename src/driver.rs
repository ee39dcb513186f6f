//! Transport drivers and their completion handles.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use crate::query::Query;
use crate::resolver::Resolver;
use crate::source::SourceDefinition;

/// Executes a query against the endpoint described by a source definition.
///
/// A driver must eventually call exactly one of [`Completion::success`] or
/// [`Completion::fail`]. It may do so before returning or later, from any
/// thread.
///
/// Closures with the same signature implement this trait.
pub trait Driver: Send + Sync {
    /// Starts the request for `query`.
    fn invoke(&self, source: &Arc<SourceDefinition>, query: &Query, completion: Completion);
}

impl<F> Driver for F
where
    F: Fn(&Arc<SourceDefinition>, &Query, Completion) + Send + Sync,
{
    fn invoke(&self, source: &Arc<SourceDefinition>, query: &Query, completion: Completion) {
        self(source, query, completion)
    }
}

/// Transport metadata that accompanies a response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseMeta {
    headers: BTreeMap<String, String>,
    status: Option<u16>,
}

impl ResponseMeta {
    /// Empty metadata.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a header. Names are stored lower-cased.
    pub fn header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    /// Sets the response status code.
    pub fn status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Looks up a header, ignoring case.
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Response status code.
    pub fn status_code(&self) -> Option<u16> {
        self.status
    }
}

/// Handle a driver uses to report the outcome of one query.
#[must_use = "a query stays pending until its completion is used"]
pub struct Completion {
    resolver: Resolver,
    query: Query,
    source: Arc<SourceDefinition>,
}

impl Completion {
    pub(crate) fn new(resolver: Resolver, query: Query, source: Arc<SourceDefinition>) -> Self {
        Self {
            resolver,
            query,
            source,
        }
    }

    /// The query being completed.
    pub fn query(&self) -> &Query {
        &self.query
    }

    /// The source the query was matched to.
    pub fn source(&self) -> &Arc<SourceDefinition> {
        &self.source
    }

    /// Reports response data.
    pub fn success(self, data: Value, meta: ResponseMeta) {
        self.resolver.success(&self.query, &self.source, data, &meta);
    }

    /// Reports a failure.
    pub fn fail(self, error: impl Into<anyhow::Error>, meta: ResponseMeta) {
        self.resolver
            .fail(&self.query, &self.source, error.into(), &meta);
    }
}
