//! Query maps whose parameters depend on sibling queries.
//!
//! A query function builds every slot of a query map through
//! [`QueryScope::query`]. Reads of sibling slots go through [`Deps`], which
//! records an edge and returns `None` while the sibling has no data. `None`
//! becomes an unresolved parameter, so the dependent query reports
//! `UNDEFINED_PARAMS` until its parent resolves and the map is computed
//! again.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::Value;
use slab::Slab;

use crate::error::{ConfigError, DependencyError};
use crate::instance::{FieldValue, Instance};
use crate::manager::{Manager, PropValue, Props, QueryMap};
use crate::query::Query;

/// Reads sibling slots while one slot's query is built.
pub struct Deps<'a> {
    slot: &'a str,
    props: &'a Props,
    reads: &'a mut Vec<(String, String)>,
}

impl Deps<'_> {
    fn record(&mut self, parent: &str) {
        let edge = (self.slot.to_string(), parent.to_string());
        if !self.reads.contains(&edge) {
            self.reads.push(edge);
        }
    }

    /// The loaded instance in `slot`, `None` while it is blank.
    pub fn item(&mut self, slot: &str) -> Option<Instance> {
        self.record(slot);
        match self.props.get(slot)? {
            PropValue::Item(instance) if !instance.is_blank() => Some(instance.clone()),
            _ => None,
        }
    }

    /// One field of the loaded instance in `slot`.
    ///
    /// Nested instances are returned as plain JSON.
    pub fn field(&mut self, slot: &str, field: &str) -> Option<Value> {
        let instance = self.item(slot)?;
        match instance.get(field)? {
            FieldValue::Unset => None,
            FieldValue::Value(value) => Some(value.clone()),
            FieldValue::Model(nested) => Some(nested.values()),
        }
    }

    /// The loaded list in `slot`, `None` until its query succeeded.
    pub fn list(&mut self, slot: &str) -> Option<Vec<Instance>> {
        self.record(slot);
        let loaded = self.props.status(slot).is_some_and(|status| status.is_success());
        match self.props.get(slot)? {
            PropValue::List(items) if loaded => Some(items.clone()),
            _ => None,
        }
    }
}

/// Collects the slots of one query map evaluation.
pub struct QueryScope<'a> {
    props: &'a Props,
    queries: QueryMap,
    reads: Vec<(String, String)>,
    error: Option<ConfigError>,
}

impl<'a> QueryScope<'a> {
    fn new(props: &'a Props) -> Self {
        Self {
            props,
            queries: QueryMap::new(),
            reads: Vec::new(),
            error: None,
        }
    }

    /// Builds the query for `slot`. `build` may read sibling slots through
    /// the [`Deps`] it receives.
    pub fn query<F>(&mut self, slot: impl Into<String>, build: F)
    where
        F: FnOnce(&mut Deps<'_>) -> Result<Query, ConfigError>,
    {
        let slot = slot.into();
        let mut deps = Deps {
            slot: &slot,
            props: self.props,
            reads: &mut self.reads,
        };
        match build(&mut deps) {
            Ok(query) => {
                self.queries.insert(slot, query);
            }
            Err(err) => {
                self.error.get_or_insert(err);
            }
        }
    }
}

/// Result of [`PropInspector::compute`].
#[derive(Debug, Clone)]
pub struct Computed {
    /// Query per slot.
    pub queries: QueryMap,
    /// Which slots read which.
    pub graph: DependencyGraph,
}

type QueryFn<P> = Arc<dyn Fn(&P, &mut QueryScope<'_>) + Send + Sync>;

/// Evaluates a query function, resolving sibling reads from the store.
pub struct PropInspector<P> {
    query_fn: QueryFn<P>,
}

impl<P> Clone for PropInspector<P> {
    fn clone(&self) -> Self {
        Self {
            query_fn: self.query_fn.clone(),
        }
    }
}

impl<P> PropInspector<P> {
    /// Wraps a query function.
    pub fn new<F>(query_fn: F) -> Self
    where
        F: Fn(&P, &mut QueryScope<'_>) + Send + Sync + 'static,
    {
        Self {
            query_fn: Arc::new(query_fn),
        }
    }

    /// Evaluates the query function until the query map stops changing.
    ///
    /// Each pass reads the data the store holds for the previous pass's
    /// queries, so slots whose parents are cached resolve in one call.
    /// Parents that still need fetching leave their children unresolved.
    pub fn compute(&self, props: &P, manager: &Manager) -> Result<Computed, DependencyError> {
        self.compute_held(props, manager, &QueryMap::new())
    }

    /// Like [`compute`](Self::compute), reading sibling slots through the
    /// queries in `held` where they match the freshly built ones.
    ///
    /// A held query keeps the identity it was resolved under, so a parent
    /// whose data is not cacheable still reads as loaded once it succeeded.
    pub fn compute_held(
        &self,
        props: &P,
        manager: &Manager,
        held: &QueryMap,
    ) -> Result<Computed, DependencyError> {
        let mut current = Props::default();
        let mut previous: Option<QueryMap> = None;
        let mut passes = 0;

        loop {
            let mut scope = QueryScope::new(&current);
            (self.query_fn)(props, &mut scope);
            if let Some(err) = scope.error {
                return Err(err.into());
            }
            let QueryScope { queries, reads, .. } = scope;
            passes += 1;

            let stable = previous
                .as_ref()
                .is_some_and(|previous| same_queries(previous, &queries));
            if stable || passes > queries.len() {
                let graph = DependencyGraph::build(&queries, &reads)?;
                graph.evaluation_order()?;
                return Ok(Computed { queries, graph });
            }

            current = manager.props(&prefer_held(&queries, held));
            previous = Some(queries);
        }
    }
}

fn prefer_held(queries: &QueryMap, held: &QueryMap) -> QueryMap {
    queries
        .iter()
        .map(|(slot, query)| {
            let query = match held.get(slot) {
                Some(current) if current.is(query) => current,
                _ => query,
            };
            (slot.clone(), query.clone())
        })
        .collect()
}

fn same_queries(a: &QueryMap, b: &QueryMap) -> bool {
    a.len() == b.len()
        && a.iter()
            .zip(b.iter())
            .all(|((ka, qa), (kb, qb))| ka == kb && qa.is(qb))
}

#[derive(Debug, Clone)]
struct Node {
    name: String,
    parents: Vec<usize>,
    children: Vec<usize>,
}

/// Slots of a query map and the reads between them.
///
/// A slot's parents are the slots it reads; its children read it.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: Slab<Node>,
    index: HashMap<String, usize>,
}

impl DependencyGraph {
    /// Builds the graph. Every read must name a slot of `queries`.
    pub fn build(
        queries: &QueryMap,
        reads: &[(String, String)],
    ) -> Result<Self, DependencyError> {
        let mut graph = DependencyGraph::default();
        for slot in queries.keys() {
            let key = graph.nodes.insert(Node {
                name: slot.clone(),
                parents: Vec::new(),
                children: Vec::new(),
            });
            graph.index.insert(slot.clone(), key);
        }
        for (child, parent) in reads {
            let (Some(&c), Some(&p)) = (graph.index.get(child), graph.index.get(parent)) else {
                return Err(DependencyError::UnknownQuery {
                    from: child.clone(),
                    name: parent.clone(),
                });
            };
            if !graph.nodes[c].parents.contains(&p) {
                graph.nodes[c].parents.push(p);
                graph.nodes[p].children.push(c);
            }
        }
        Ok(graph)
    }

    fn names(&self, keys: &[usize]) -> Vec<&str> {
        keys.iter().map(|&k| self.nodes[k].name.as_str()).collect()
    }

    /// Slots `slot` reads.
    pub fn parents(&self, slot: &str) -> Vec<&str> {
        self.index
            .get(slot)
            .map(|&k| self.names(&self.nodes[k].parents))
            .unwrap_or_default()
    }

    /// Slots reading `slot`.
    pub fn children(&self, slot: &str) -> Vec<&str> {
        self.index
            .get(slot)
            .map(|&k| self.names(&self.nodes[k].children))
            .unwrap_or_default()
    }

    /// Slots reading no sibling, in name order.
    pub fn roots(&self) -> Vec<&str> {
        let mut roots: Vec<&str> = self
            .nodes
            .iter()
            .filter(|(_, node)| node.parents.is_empty())
            .map(|(_, node)| node.name.as_str())
            .collect();
        roots.sort_unstable();
        roots
    }

    /// Slots ordered so every slot follows the slots it reads.
    pub fn evaluation_order(&self) -> Result<Vec<String>, DependencyError> {
        let mut names: Vec<(&str, usize)> = self
            .index
            .iter()
            .map(|(name, &key)| (name.as_str(), key))
            .collect();
        names.sort_unstable();

        let mut done = HashSet::new();
        let mut order = Vec::with_capacity(names.len());
        let mut stack: Vec<usize> = Vec::new();
        for (_, key) in names {
            self.visit(key, &mut stack, &mut done, &mut order)?;
        }
        Ok(order)
    }

    fn visit(
        &self,
        key: usize,
        stack: &mut Vec<usize>,
        done: &mut HashSet<usize>,
        order: &mut Vec<String>,
    ) -> Result<(), DependencyError> {
        if done.contains(&key) {
            return Ok(());
        }
        if let Some(start) = stack.iter().position(|&k| k == key) {
            let mut path: Vec<String> = stack[start..]
                .iter()
                .map(|&k| self.nodes[k].name.clone())
                .collect();
            path.push(self.nodes[key].name.clone());
            return Err(DependencyError::Cycle { path });
        }

        stack.push(key);
        for &parent in &self.nodes[key].parents {
            self.visit(parent, stack, done, order)?;
        }
        stack.pop();

        done.insert(key);
        order.push(self.nodes[key].name.clone());
        Ok(())
    }
}
