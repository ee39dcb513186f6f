//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use query_source::{
    AddOutcome, Completion, CompletionResult, Driver, Manager, MemoryStore, Model, Query,
    Resolution, ResponseMeta, SourceDefinition, SpanId, StateStore, Tracer, TracerQuery,
};
use serde_json::Value;

pub fn user_model() -> Model {
    Model::builder("user")
        .field("id", 0)
        .field("name", "")
        .field("email", "")
        .build()
        .unwrap()
}

pub fn post_model() -> Model {
    Model::builder("post")
        .field("id", 0)
        .field("title", "")
        .field("author_id", 0)
        .build()
        .unwrap()
}

// =============================================================================
// Drivers
// =============================================================================

/// Answers every query synchronously from the source's `meta`.
///
/// `meta.returns` is the success payload; without it the driver fails with
/// `meta.error` and `meta.code`. `meta.cache_control` becomes the
/// `Cache-Control` header.
#[derive(Clone, Default)]
pub struct MockDriver {
    calls: Arc<AtomicUsize>,
    queries: Arc<Mutex<Vec<String>>>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Hashes of the queries the driver received, in order.
    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().clone()
    }
}

impl Driver for MockDriver {
    fn invoke(&self, source: &Arc<SourceDefinition>, query: &Query, completion: Completion) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.queries.lock().push(query.hash().to_string());

        let meta = source.meta();
        let mut response = ResponseMeta::new();
        if let Some(cache_control) = meta.get("cache_control").and_then(Value::as_str) {
            response = response.header("Cache-Control", cache_control);
        }
        match meta.get("returns") {
            Some(data) => completion.success(data.clone(), response),
            None => {
                let message = meta
                    .get("error")
                    .and_then(Value::as_str)
                    .unwrap_or("request failed")
                    .to_string();
                if let Some(code) = meta.get("code").and_then(Value::as_u64) {
                    response = response.status(code as u16);
                }
                completion.fail(anyhow::anyhow!(message), response);
            }
        }
    }
}

/// Parks completions so tests decide when and how queries finish.
#[derive(Clone, Default)]
pub struct DeferredDriver {
    parked: Arc<Mutex<Vec<Completion>>>,
    calls: Arc<AtomicUsize>,
}

impl DeferredDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn parked(&self) -> usize {
        self.parked.lock().len()
    }

    /// Takes the oldest parked completion.
    pub fn take(&self) -> Completion {
        let mut parked = self.parked.lock();
        assert!(!parked.is_empty(), "no parked completion");
        parked.remove(0)
    }

    pub fn succeed_next(&self, data: Value) {
        self.take().success(data, ResponseMeta::new());
    }

    pub fn fail_next(&self, message: &str, code: Option<u16>) {
        let mut meta = ResponseMeta::new();
        if let Some(code) = code {
            meta = meta.status(code);
        }
        self.take().fail(anyhow::anyhow!(message.to_string()), meta);
    }
}

impl Driver for DeferredDriver {
    fn invoke(&self, _source: &Arc<SourceDefinition>, _query: &Query, completion: Completion) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.parked.lock().push(completion);
    }
}

// =============================================================================
// Store and tracer
// =============================================================================

/// A memory store that counts dispatches.
pub struct CountingStore {
    pub store: Arc<MemoryStore>,
    writes: Arc<AtomicUsize>,
}

impl CountingStore {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let writes = Arc::new(AtomicUsize::new(0));
        let counter = writes.clone();
        store.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        Self { store, writes }
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn shared(&self) -> Arc<dyn StateStore> {
        self.store.clone()
    }
}

/// Records tracer events as readable strings.
#[derive(Clone, Default)]
pub struct CollectingTracer {
    events: Arc<Mutex<Vec<String>>>,
    spans: Arc<AtomicUsize>,
}

impl CollectingTracer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl Tracer for CollectingTracer {
    fn new_span_id(&self) -> SpanId {
        SpanId(self.spans.fetch_add(1, Ordering::SeqCst) as u64 + 1)
    }

    fn on_query_added(&self, query: TracerQuery, outcome: AddOutcome) {
        self.events
            .lock()
            .push(format!("added:{}:{:?}", query.model, outcome));
    }

    fn on_resolve_start(&self, _span_id: SpanId, pending: usize) {
        self.events.lock().push(format!("start:{}", pending));
    }

    fn on_resolution(&self, _span_id: SpanId, query: TracerQuery, result: Resolution) {
        let result = match result {
            Resolution::Dispatched { .. } => "Dispatched".to_string(),
            other => format!("{:?}", other),
        };
        self.events
            .lock()
            .push(format!("resolution:{}:{}", query.model, result));
    }

    fn on_status_flush(&self, _span_id: SpanId, statuses: usize) {
        self.events.lock().push(format!("flush:{}", statuses));
    }

    fn on_resolve_end(&self, _span_id: SpanId, dispatched: usize) {
        self.events.lock().push(format!("end:{}", dispatched));
    }

    fn on_query_complete(&self, query: TracerQuery, result: CompletionResult) {
        let result = match result {
            CompletionResult::Success => "Success".to_string(),
            CompletionResult::Failed { .. } => "Failed".to_string(),
        };
        self.events
            .lock()
            .push(format!("complete:{}:{}", query.model, result));
    }
}

// =============================================================================
// Managers
// =============================================================================

pub fn mock_manager() -> (Manager, MockDriver) {
    let driver = MockDriver::new();
    let manager = Manager::builder().driver("mock", driver.clone()).build();
    (manager, driver)
}

pub fn deferred_manager() -> (Manager, DeferredDriver) {
    let driver = DeferredDriver::new();
    let manager = Manager::builder()
        .driver("deferred", driver.clone())
        .build();
    (manager, driver)
}

/// Collects callback results for later inspection.
#[derive(Clone, Default)]
pub struct Callbacks {
    results: Arc<Mutex<Vec<Result<Value, String>>>>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, query: Query) -> Query {
        let results = self.results.clone();
        query.with_callback(move |result| {
            results.lock().push(result.map_err(|err| err.to_string()));
        })
    }

    pub fn results(&self) -> Vec<Result<Value, String>> {
        self.results.lock().clone()
    }
}
