//! Tracer trait for observing query resolution.
//!
//! This module defines the [`Tracer`] trait and related types for observing
//! how queries are deduplicated, matched to sources and completed. The
//! default [`NoopTracer`] provides zero-cost when tracing is not needed.
//!
//! # Example
//!
//! ```ignore
//! use query_source::{Manager, SpanId, Tracer, TracerQuery, Resolution};
//!
//! struct PrintTracer;
//!
//! impl Tracer for PrintTracer {
//!     fn new_span_id(&self) -> SpanId {
//!         SpanId(1)
//!     }
//!
//!     fn on_resolution(&self, _span_id: SpanId, query: TracerQuery, result: Resolution) {
//!         println!("{} -> {:?}", query.hash, result);
//!     }
//! }
//!
//! let manager = Manager::builder().tracer(PrintTracer).build();
//! ```

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::query::{Query, QueryHash};

/// Unique identifier for one resolve pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SpanId(pub u64);

/// A query as seen by tracers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TracerQuery {
    /// Model name (e.g. "user").
    pub model: String,
    /// Canonical query hash.
    pub hash: QueryHash,
}

impl TracerQuery {
    /// Create a tracer view of `query`.
    #[inline]
    pub fn new(query: &Query) -> Self {
        Self {
            model: query.model().name().to_string(),
            hash: query.hash(),
        }
    }
}

/// What happened when a query was added to the resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddOutcome {
    /// The query is pending resolution.
    Registered,
    /// The query was linked to an identical pending or in-flight query.
    Duplicate,
    /// A forced query reset an identical pending query.
    Forced,
    /// The query was already registered.
    Ignored,
}

/// How a pending query was handled during a resolve pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The query already had a status.
    AlreadyResolved,
    /// Fresh data was found in the cache.
    CacheHit,
    /// An identical query is in flight.
    InFlight,
    /// The query failed before and was not forced.
    PreviouslyFailed,
    /// Some parameters are not resolved yet.
    UndefinedParams,
    /// No source satisfies the query.
    Unresolvable,
    /// The query was sent to a driver.
    Dispatched {
        /// Id of the matched source.
        source: String,
    },
}

/// How an in-flight query finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionResult {
    /// Data was stored.
    Success,
    /// The driver or the cache reported an error.
    Failed {
        /// Error text.
        message: String,
    },
}

/// Tracer trait for observing query resolution.
///
/// Implementations can collect events for testing, forward to the `tracing`
/// crate, or provide custom observability.
///
/// All methods except [`new_span_id`](Tracer::new_span_id) have default
/// empty implementations, so you only need to override the events you're
/// interested in.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync` as completions may arrive from
/// driver threads.
pub trait Tracer: Send + Sync + 'static {
    /// Generate a new unique span ID. Called at the start of each resolve
    /// pass.
    fn new_span_id(&self) -> SpanId;

    /// Called when a query is added.
    #[inline]
    fn on_query_added(&self, _query: TracerQuery, _outcome: AddOutcome) {}

    /// Called when a resolve pass starts.
    #[inline]
    fn on_resolve_start(&self, _span_id: SpanId, _pending: usize) {}

    /// Called for every pending query examined in a pass.
    #[inline]
    fn on_resolution(&self, _span_id: SpanId, _query: TracerQuery, _result: Resolution) {}

    /// Called when a pass writes its batched statuses.
    #[inline]
    fn on_status_flush(&self, _span_id: SpanId, _statuses: usize) {}

    /// Called when a pass ends.
    #[inline]
    fn on_resolve_end(&self, _span_id: SpanId, _dispatched: usize) {}

    /// Called when a driver completes a query.
    #[inline]
    fn on_query_complete(&self, _query: TracerQuery, _result: CompletionResult) {}
}

/// Zero-cost tracer that discards all events.
///
/// This is the default tracer for [`Manager`](crate::Manager).
pub struct NoopTracer;

/// Global span counter for NoopTracer.
static NOOP_SPAN_COUNTER: AtomicU64 = AtomicU64::new(1);

impl Tracer for NoopTracer {
    #[inline(always)]
    fn new_span_id(&self) -> SpanId {
        SpanId(NOOP_SPAN_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_noop_tracer_span_id() {
        let tracer = NoopTracer;
        let id1 = tracer.new_span_id();
        let id2 = tracer.new_span_id();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_tracer_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<NoopTracer>();
        assert_send_sync::<Arc<dyn Tracer>>();
    }
}
