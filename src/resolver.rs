//! Query resolution: deduplication, source matching and driver dispatch.
//!
//! A resolve pass examines every pending query in insertion order. Status
//! changes made during the pass are batched and written to the store once.
//! Callbacks and driver invocations run after the resolver lock is released,
//! so drivers that complete synchronously may re-enter the resolver.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;

use crate::cache::{expiry_from_meta, Cache};
use crate::driver::{Completion, ResponseMeta};
use crate::error::{QueryError, UNRESOLVABLE_MESSAGE};
use crate::params::Params;
use crate::query::{Query, QueryHash, QueryId};
use crate::source::{SourceDefinition, Sources};
use crate::status::{Status, StatusRecord};
use crate::store::{Action, ReturnedIds, State};
use crate::tracer::{AddOutcome, CompletionResult, Resolution, Tracer, TracerQuery};

/// Resolver-side state of one query.
struct Tracked {
    /// The query as dispatched, including injected default parameters.
    query: Query,
    /// Internal status. Set once the query is resolved, pending or failed.
    status: Option<Status>,
    /// Queries with the same hash that share this query's outcome.
    duplicates: Vec<QueryId>,
    /// Ids returned by the driver for this query.
    returned_ids: ReturnedIds,
    /// Source the query was dispatched to.
    source: Option<Arc<SourceDefinition>>,
}

impl Tracked {
    fn new(query: Query) -> Self {
        Self {
            query,
            status: None,
            duplicates: Vec::new(),
            returned_ids: ReturnedIds::new(),
            source: None,
        }
    }
}

#[derive(Default)]
struct ResolverState {
    /// Queries waiting for the next pass, in insertion order.
    pending: Vec<QueryId>,
    pending_hashes: HashMap<QueryHash, QueryId>,
    /// Dispatched queries awaiting completion.
    in_flight: HashMap<QueryHash, QueryId>,
    tracked: HashMap<QueryId, Tracked>,
    /// Released in-flight queries and the duplicate that took over their
    /// completion.
    successors: HashMap<QueryId, QueryId>,
    /// Status writes batched during a pass.
    status_map: BTreeMap<QueryHash, StatusRecord>,
}

type Deferred = Vec<(Query, Result<Value, QueryError>)>;

impl ResolverState {
    /// Ids of `id` and every transitive duplicate.
    fn family(&self, id: QueryId) -> Vec<QueryId> {
        let mut seen = HashSet::new();
        let mut stack = vec![id];
        let mut family = Vec::new();
        while let Some(next) = stack.pop() {
            if !seen.insert(next) {
                continue;
            }
            family.push(next);
            if let Some(tracked) = self.tracked.get(&next) {
                stack.extend(tracked.duplicates.iter().copied());
            }
        }
        family
    }

    /// The tracked query a completion for `id` belongs to.
    fn completion_root(&mut self, id: QueryId) -> QueryId {
        let mut root = id;
        while let Some(next) = self.successors.remove(&root) {
            root = next;
        }
        root
    }

    /// Removes `id`, handing its duplicates to its parent or, when it has
    /// none, to the first surviving duplicate. Returns the query that took
    /// over, if any.
    fn detach(&mut self, id: QueryId) -> Option<QueryId> {
        let released = self.tracked.remove(&id)?;
        let orphans: Vec<QueryId> = released
            .duplicates
            .into_iter()
            .filter(|duplicate| self.tracked.contains_key(duplicate))
            .collect();

        let parent = self
            .tracked
            .iter()
            .find(|(_, tracked)| tracked.duplicates.contains(&id))
            .map(|(parent, _)| *parent);
        for tracked in self.tracked.values_mut() {
            tracked.duplicates.retain(|duplicate| *duplicate != id);
        }

        if let Some(parent) = parent {
            for orphan in orphans {
                self.link(parent, orphan);
            }
            return None;
        }

        let (&survivor, rest) = orphans.split_first()?;
        let tracked = self.tracked.get_mut(&survivor)?;
        for duplicate in rest {
            if !tracked.duplicates.contains(duplicate) {
                tracked.duplicates.push(*duplicate);
            }
        }
        if tracked.source.is_none() {
            tracked.source = released.source;
        }
        if tracked.returned_ids.is_empty() {
            tracked.returned_ids = released.returned_ids;
        }
        Some(survivor)
    }

    fn set_status(&mut self, id: QueryId, status: Option<Status>) {
        for member in self.family(id) {
            if let Some(tracked) = self.tracked.get_mut(&member) {
                tracked.status = status;
            }
        }
    }

    fn link(&mut self, parent: QueryId, child: QueryId) {
        if parent == child {
            return;
        }
        if let Some(tracked) = self.tracked.get_mut(&parent) {
            if !tracked.duplicates.contains(&child) {
                tracked.duplicates.push(child);
            }
        }
    }

    /// Replaces the parameters of `id` and its duplicates, returning the
    /// updated query.
    fn apply_params(&mut self, id: QueryId, params: &Params) -> Option<Query> {
        for member in self.family(id) {
            if let Some(tracked) = self.tracked.get_mut(&member) {
                tracked.query = tracked.query.with_params(params.clone());
            }
        }
        self.tracked.get(&id).map(|tracked| tracked.query.clone())
    }

    fn queries(&self, ids: &[QueryId]) -> Vec<Query> {
        ids.iter()
            .filter_map(|id| self.tracked.get(id).map(|tracked| tracked.query.clone()))
            .collect()
    }

    /// Checks whether the cache or an in-flight request already covers the
    /// query.
    fn skip_from_cache(
        &mut self,
        query: &Query,
        hash: &QueryHash,
        status: &StatusRecord,
        state: &State,
        deferred: &mut Deferred,
    ) -> Option<Resolution> {
        if !Cache::expired_at(query, state, Utc::now()) {
            if let (data, true) = Cache::query_data(query, state) {
                if !status.is_success() {
                    self.status_map
                        .insert(hash.clone(), StatusRecord::new(Status::Success));
                }
                let data = data.map(|data| data.to_value()).unwrap_or(Value::Null);
                deferred.push((query.clone(), Ok(data)));
                return Some(Resolution::CacheHit);
            }
        }

        let parent = self.in_flight.get(hash).copied();
        if status.is_pending() || parent.is_some() {
            self.set_status(query.id(), Some(Status::Pending));
            match parent {
                Some(parent) => self.link(parent, query.id()),
                None => tracing::warn!(
                    query = %hash,
                    "there is no parent definition found for in-flight query"
                ),
            }
            return Some(Resolution::InFlight);
        }

        if status.is_error() && !query.is_forced() {
            return Some(Resolution::PreviouslyFailed);
        }

        None
    }
}

struct ResolverInner {
    cache: Cache,
    tracer: Arc<dyn Tracer>,
    state: Mutex<ResolverState>,
}

/// Matches queries to sources and tracks them until completion.
///
/// Cloning is cheap; clones share state.
#[derive(Clone)]
pub struct Resolver {
    inner: Arc<ResolverInner>,
}

impl Resolver {
    /// Creates a resolver writing through `cache`.
    pub fn new(cache: Cache, tracer: Arc<dyn Tracer>) -> Self {
        Self {
            inner: Arc::new(ResolverInner {
                cache,
                tracer,
                state: Mutex::new(ResolverState::default()),
            }),
        }
    }

    /// The cache this resolver writes through.
    pub fn cache(&self) -> &Cache {
        &self.inner.cache
    }

    /// Queues `query` for the next pass, or links it to an identical query
    /// that is already pending or in flight.
    pub fn add_query(&self, query: Query) {
        let hash = query.hash();
        let id = query.id();
        let mut state = self.inner.state.lock();

        let pending = state.pending_hashes.get(&hash).copied();
        let existing = pending.or_else(|| state.in_flight.get(&hash).copied());

        let outcome = match existing {
            None => {
                let forced = query.is_forced();
                let tracked = state
                    .tracked
                    .entry(id)
                    .or_insert_with(|| Tracked::new(query.clone()));
                if forced {
                    tracked.query = query.clone();
                    tracked.status = None;
                }
                state.pending.push(id);
                state.pending_hashes.insert(hash, id);
                AddOutcome::Registered
            }
            Some(existing) if existing == id => AddOutcome::Ignored,
            Some(existing) => {
                state
                    .tracked
                    .entry(id)
                    .or_insert_with(|| Tracked::new(query.clone()));
                let outcome = if query.is_forced() && pending == Some(existing) {
                    if let Some(parent) = state.tracked.get_mut(&existing) {
                        parent.status = None;
                    }
                    AddOutcome::Forced
                } else {
                    AddOutcome::Duplicate
                };
                if pending != Some(existing) {
                    if let Some(child) = state.tracked.get_mut(&id) {
                        child.status = Some(Status::Pending);
                    }
                }
                state.link(existing, id);
                outcome
            }
        };
        drop(state);

        tracing::debug!(query = %query, ?outcome, "query added");
        self.inner
            .tracer
            .on_query_added(TracerQuery::new(&query), outcome);
    }

    /// Resolves every pending query against `sources`.
    pub fn resolve_all(&self, sources: &Sources) {
        let tracer = &self.inner.tracer;
        let store = self.inner.cache.store();
        let snapshot = store.state();

        let mut deferred: Deferred = Vec::new();
        let mut dispatch: Vec<(Query, Arc<SourceDefinition>)> = Vec::new();

        let (span_id, status_map) = {
            let mut state = self.inner.state.lock();
            if state.pending.is_empty() {
                return;
            }
            let span_id = tracer.new_span_id();
            let pending = std::mem::take(&mut state.pending);
            state.pending_hashes.clear();
            tracer.on_resolve_start(span_id, pending.len());

            for id in pending {
                let resolution = Self::resolve_one(
                    &mut state,
                    id,
                    sources,
                    &snapshot,
                    &mut deferred,
                    &mut dispatch,
                );
                if let Some((query, resolution)) = resolution {
                    tracing::debug!(query = %query, ?resolution, "query resolution");
                    tracer.on_resolution(span_id, TracerQuery::new(&query), resolution);
                }
            }

            (span_id, std::mem::take(&mut state.status_map))
        };

        if !status_map.is_empty() {
            tracer.on_status_flush(span_id, status_map.len());
            store.dispatch(Action::UpdateQueryStatuses(status_map));
        }

        for (query, result) in deferred {
            query.notify(result);
        }

        let dispatched = dispatch.len();
        for (query, source) in dispatch {
            let completion = Completion::new(self.clone(), query.clone(), source.clone());
            source.driver().invoke(&source, &query, completion);
        }

        tracer.on_resolve_end(span_id, dispatched);
    }

    fn resolve_one(
        state: &mut ResolverState,
        id: QueryId,
        sources: &Sources,
        snapshot: &State,
        deferred: &mut Deferred,
        dispatch: &mut Vec<(Query, Arc<SourceDefinition>)>,
    ) -> Option<(Query, Resolution)> {
        let tracked = state.tracked.get(&id)?;
        let query = tracked.query.clone();
        if tracked.status.is_some() {
            return Some((query, Resolution::AlreadyResolved));
        }

        let hash = query.hash();
        let status = snapshot.status(&hash);
        if let Some(resolution) = state.skip_from_cache(&query, &hash, &status, snapshot, deferred) {
            return Some((query, resolution));
        }

        if query.params().has_unresolved() {
            if !status.is_undefined_params() {
                state
                    .status_map
                    .insert(hash, StatusRecord::new(Status::UndefinedParams));
            }
            return Some((query, Resolution::UndefinedParams));
        }

        let Some(source) = sources.find(&query).cloned() else {
            tracing::warn!(query = %query, "{}", UNRESOLVABLE_MESSAGE);
            state
                .status_map
                .insert(hash, StatusRecord::error(UNRESOLVABLE_MESSAGE, None));
            state.set_status(id, Some(Status::Error));
            deferred.push((query.clone(), Err(QueryError::Unresolvable)));
            return Some((query, Resolution::Unresolvable));
        };

        let params = source.add_default_params(query.params());
        let query = if &params != query.params() {
            state.apply_params(id, &params)?
        } else {
            query
        };

        let hash = query.hash();
        let status = snapshot.status(&hash);
        if let Some(resolution) = state.skip_from_cache(&query, &hash, &status, snapshot, deferred) {
            return Some((query, resolution));
        }

        state.in_flight.insert(hash.clone(), id);
        state.set_status(id, Some(Status::Pending));
        if let Some(tracked) = state.tracked.get_mut(&id) {
            tracked.source = Some(source.clone());
        }
        state
            .status_map
            .insert(hash, StatusRecord::new(Status::Pending));
        dispatch.push((query.clone(), source.clone()));

        Some((
            query,
            Resolution::Dispatched {
                source: source.id().to_string(),
            },
        ))
    }

    /// Marks the in-flight entry of `query` as done and returns the id its
    /// outcome is recorded under, with that query and its duplicates.
    fn finish(&self, query: &Query, hash: &QueryHash, status: Status) -> (QueryId, Vec<Query>) {
        let mut state = self.inner.state.lock();
        let root = state.completion_root(query.id());
        if state.in_flight.get(hash) == Some(&root) {
            state.in_flight.remove(hash);
        }
        state.set_status(root, Some(status));
        let family = state.family(root);
        (root, state.queries(&family))
    }

    pub(crate) fn success(
        &self,
        query: &Query,
        source: &Arc<SourceDefinition>,
        data: Value,
        meta: &ResponseMeta,
    ) {
        let hash = query.hash();
        let expires = expiry_from_meta(meta, source.cache_for(), Utc::now());
        let (root, family) = self.finish(query, &hash, Status::Success);

        match self.inner.cache.store_query(query, source, &data, expires) {
            Ok(returned_ids) => {
                {
                    let mut state = self.inner.state.lock();
                    for member in state.family(root) {
                        if let Some(tracked) = state.tracked.get_mut(&member) {
                            tracked.returned_ids = returned_ids.clone();
                        }
                    }
                }
                tracing::debug!(query = %hash, source = source.id(), "query succeeded");
                self.inner
                    .tracer
                    .on_query_complete(TracerQuery::new(query), CompletionResult::Success);
                for member in family {
                    member.notify(Ok(data.clone()));
                }
            }
            Err(err) => {
                tracing::warn!(
                    query = %hash,
                    source = %source,
                    error = %err,
                    "could not store query response"
                );
                let message = err.to_string();
                self.inner
                    .cache
                    .store()
                    .dispatch(Action::UpdateQueryStatuses(
                        [(hash, StatusRecord::error(message.clone(), None))]
                            .into_iter()
                            .collect(),
                    ));
                self.inner.state.lock().set_status(root, Some(Status::Error));
                self.inner.tracer.on_query_complete(
                    TracerQuery::new(query),
                    CompletionResult::Failed { message },
                );
                let err = QueryError::Cache(err);
                for member in family {
                    member.notify(Err(err.clone()));
                }
            }
        }
    }

    pub(crate) fn fail(
        &self,
        query: &Query,
        source: &Arc<SourceDefinition>,
        error: anyhow::Error,
        meta: &ResponseMeta,
    ) {
        let hash = query.hash();
        let (_, family) = self.finish(query, &hash, Status::Error);
        let message = error.to_string();

        tracing::warn!(
            query = %hash,
            source = %source,
            error = %message,
            "query failed"
        );

        self.inner
            .cache
            .store()
            .dispatch(Action::UpdateQueryStatuses(
                [(hash, StatusRecord::error(message.clone(), meta.status_code()))]
                    .into_iter()
                    .collect(),
            ));
        self.inner.tracer.on_query_complete(
            TracerQuery::new(query),
            CompletionResult::Failed { message },
        );

        let err = QueryError::Driver {
            error: Arc::new(error),
            code: meta.status_code(),
        };
        for member in family {
            member.notify(Err(err.clone()));
        }
    }

    /// Forgets `query`. A completion that is still outstanding is applied
    /// to the store but no longer reported to the query.
    ///
    /// Duplicates of `query` keep sharing its outcome: the first of them
    /// takes over its place in the pending queue or in flight.
    pub fn release(&self, query: &Query) {
        let id = query.id();
        let mut state = self.inner.state.lock();
        let survivor = state.detach(id);

        match survivor {
            Some(survivor) => {
                for pending in state.pending.iter_mut().filter(|pending| **pending == id) {
                    *pending = survivor;
                }
                for holder in state.pending_hashes.values_mut().filter(|holder| **holder == id) {
                    *holder = survivor;
                }
                let mut took_flight = false;
                for holder in state.in_flight.values_mut().filter(|holder| **holder == id) {
                    *holder = survivor;
                    took_flight = true;
                }
                if took_flight {
                    state.successors.insert(id, survivor);
                }
                for successor in state.successors.values_mut().filter(|next| **next == id) {
                    *successor = survivor;
                }
            }
            None => {
                state.pending.retain(|pending| *pending != id);
                state.pending_hashes.retain(|_, pending| *pending != id);
                state.in_flight.retain(|_, holder| *holder != id);
            }
        }
        tracing::trace!(query = %query, survivor = ?survivor, "query released");
    }

    /// The tracked form of `query`, with any injected default parameters.
    pub fn resolved_query(&self, query: &Query) -> Option<Query> {
        self.with_tracked(query, |tracked| tracked.query.clone())
    }

    /// Internal status of `query`.
    pub fn status(&self, query: &Query) -> Option<Status> {
        self.with_tracked(query, |tracked| tracked.status).flatten()
    }

    /// Ids the driver returned for `query`.
    pub fn returned_ids(&self, query: &Query) -> Option<ReturnedIds> {
        self.with_tracked(query, |tracked| tracked.returned_ids.clone())
    }

    /// Source `query` was dispatched to.
    pub fn source(&self, query: &Query) -> Option<Arc<SourceDefinition>> {
        self.with_tracked(query, |tracked| tracked.source.clone())
            .flatten()
    }

    /// Queries sharing `query`'s outcome.
    pub fn duplicates(&self, query: &Query) -> Vec<Query> {
        let state = self.inner.state.lock();
        match state.tracked.get(&query.id()) {
            Some(tracked) => state.queries(&tracked.duplicates),
            None => Vec::new(),
        }
    }

    /// Hashes of queries awaiting the next pass.
    pub fn pending(&self) -> Vec<QueryHash> {
        let state = self.inner.state.lock();
        state
            .pending
            .iter()
            .filter_map(|id| state.tracked.get(id).map(|tracked| tracked.query.hash()))
            .collect()
    }

    /// Hashes of dispatched queries awaiting completion.
    pub fn in_flight(&self) -> Vec<QueryHash> {
        self.inner.state.lock().in_flight.keys().cloned().collect()
    }

    fn with_tracked<T>(&self, query: &Query, f: impl FnOnce(&Tracked) -> T) -> Option<T> {
        self.inner.state.lock().tracked.get(&query.id()).map(f)
    }
}

impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Resolver")
            .field("pending", &state.pending.len())
            .field("in_flight", &state.in_flight.len())
            .field("tracked", &state.tracked.len())
            .finish()
    }
}
