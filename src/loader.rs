//! Keeps a query map in sync with changing caller properties.

use std::fmt;

use crate::dependency::{DependencyGraph, PropInspector, QueryScope};
use crate::error::{ConfigError, DependencyError};
use crate::instance::Instance;
use crate::manager::{Manager, Props, QueryMap};
use crate::query::Query;

/// Evaluates a query function against caller properties and feeds the
/// resulting queries to a [`Manager`].
///
/// Call [`update`](Self::update) whenever the properties change or a
/// dispatched query completes; only queries that changed are added again.
///
/// # Example
///
/// ```ignore
/// let mut loader = Loader::new(manager.clone(), |props: &Page, scope| {
///     scope.query("user", |_| Ok(user.get_item(Params::new().set("id", props.user_id))));
///     scope.query("posts", |deps| {
///         let author = deps.field("user", "id");
///         Ok(post.get_list(Params::new().set_opt("author", author)))
///     });
/// });
/// loader.update(&Page { user_id: 1 })?;
/// let props = loader.props();
/// ```
pub struct Loader<P> {
    manager: Manager,
    inspector: PropInspector<P>,
    queries: QueryMap,
    graph: DependencyGraph,
}

impl<P> Loader<P> {
    /// Creates a loader for `query_fn`. Nothing is queried until the first
    /// [`update`](Self::update).
    pub fn new<F>(manager: Manager, query_fn: F) -> Self
    where
        F: Fn(&P, &mut QueryScope<'_>) + Send + Sync + 'static,
    {
        Self::with_inspector(manager, PropInspector::new(query_fn))
    }

    /// Creates a loader sharing an existing inspector.
    pub fn with_inspector(manager: Manager, inspector: PropInspector<P>) -> Self {
        Self {
            manager,
            inspector,
            queries: QueryMap::new(),
            graph: DependencyGraph::default(),
        }
    }

    /// Recomputes the query map for `props`, adds the queries that changed,
    /// releases those that went away and resolves.
    ///
    /// Returns the names of the slots whose query changed.
    pub fn update(&mut self, props: &P) -> Result<Vec<String>, DependencyError> {
        let computed = self
            .inspector
            .compute_held(props, &self.manager, &self.queries)?;

        let mut next = QueryMap::new();
        let mut changed = Vec::new();
        for (slot, query) in computed.queries {
            match self.queries.remove(&slot) {
                Some(current) if current.is(&query) => {
                    next.insert(slot, current);
                }
                previous => {
                    if let Some(previous) = previous {
                        self.manager.release(&previous);
                    }
                    self.manager.add_query(query.clone());
                    changed.push(slot.clone());
                    next.insert(slot, query);
                }
            }
        }

        let removed = std::mem::replace(&mut self.queries, next);
        for (slot, query) in removed {
            tracing::debug!(slot = %slot, "releasing query");
            self.manager.release(&query);
        }
        self.graph = computed.graph;

        if !changed.is_empty() {
            tracing::debug!(changed = ?changed, "query map changed");
            self.manager.resolve();
        }
        Ok(changed)
    }

    /// Statuses and data for the current query map.
    pub fn props(&self) -> Props {
        self.manager.props(&self.queries)
    }

    /// The current query map.
    pub fn queries(&self) -> &QueryMap {
        &self.queries
    }

    /// Query held in `slot`.
    pub fn query(&self, slot: &str) -> Option<&Query> {
        self.queries.get(slot)
    }

    /// Reads between the current slots.
    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// The manager queries are sent to.
    pub fn manager(&self) -> &Manager {
        &self.manager
    }

    /// Forces the query in `slot` through resolution again.
    ///
    /// Returns `false` when there is no such slot.
    pub fn reload(&self, slot: &str) -> bool {
        match self.queries.get(slot) {
            Some(query) => {
                self.manager.reload(query);
                true
            }
            None => false,
        }
    }

    /// See [`Manager::create_model`].
    pub fn create_model(&self, instance: &Instance) -> Result<Query, ConfigError> {
        self.manager.create_model(instance)
    }

    /// See [`Manager::update_model`].
    pub fn update_model(&self, instance: &Instance) -> Result<Query, ConfigError> {
        self.manager.update_model(instance)
    }

    /// See [`Manager::delete_model`].
    pub fn delete_model(&self, instance: &Instance) -> Result<Query, ConfigError> {
        self.manager.delete_model(instance)
    }
}

impl<P> Drop for Loader<P> {
    fn drop(&mut self) {
        for query in self.queries.values() {
            self.manager.release(query);
        }
    }
}

impl<P> fmt::Debug for Loader<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Loader")
            .field("queries", &self.queries.keys().collect::<Vec<_>>())
            .field("graph", &self.graph)
            .finish()
    }
}
