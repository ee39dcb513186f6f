//! The caller-facing facade tying store, cache, resolver and sources
//! together.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;

use crate::cache::{Cache, CachedData};
use crate::driver::Driver;
use crate::error::ConfigError;
use crate::instance::Instance;
use crate::kind::ReturnType;
use crate::model::SchemaRegistry;
use crate::params::Params;
use crate::query::{Query, QueryBuilder};
use crate::resolver::Resolver;
use crate::source::{SourceDefinition, SourceDefinitionBuilder, Sources};
use crate::status::{Status, StatusRecord};
use crate::store::{MemoryStore, State, StateStore};
use crate::tracer::{NoopTracer, Tracer};

/// Queries keyed by the name callers read them under.
pub type QueryMap = BTreeMap<String, Query>;

/// Data for one named query.
#[derive(Debug, Clone, PartialEq)]
pub enum PropValue {
    /// One instance, blank while unloaded.
    Item(Instance),
    /// A list of instances, empty while unloaded.
    List(Vec<Instance>),
}

/// Statuses and data for a [`QueryMap`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Props {
    status: BTreeMap<String, StatusRecord>,
    data: BTreeMap<String, PropValue>,
}

impl Props {
    /// Status reported for `name`.
    pub fn status(&self, name: &str) -> Option<&StatusRecord> {
        self.status.get(name)
    }

    /// Every reported status.
    pub fn statuses(&self) -> &BTreeMap<String, StatusRecord> {
        &self.status
    }

    /// Data for `name`.
    pub fn get(&self, name: &str) -> Option<&PropValue> {
        self.data.get(name)
    }

    /// Item data for `name`.
    pub fn item(&self, name: &str) -> Option<&Instance> {
        match self.data.get(name)? {
            PropValue::Item(instance) => Some(instance),
            PropValue::List(_) => None,
        }
    }

    /// List data for `name`.
    pub fn list(&self, name: &str) -> Option<&[Instance]> {
        match self.data.get(name)? {
            PropValue::List(items) => Some(items),
            PropValue::Item(_) => None,
        }
    }
}

struct ManagerInner {
    store: Arc<dyn StateStore>,
    registry: RwLock<SchemaRegistry>,
    drivers: HashMap<String, Arc<dyn Driver>>,
    sources: RwLock<Sources>,
    resolver: Resolver,
}

/// Owns the store, the registered sources and the resolver.
///
/// Cloning is cheap; clones share state.
///
/// # Example
///
/// ```ignore
/// let manager = Manager::builder()
///     .driver("http", http_driver)
///     .build();
/// manager.add_sources("http", vec![
///     SourceDefinition::builder()
///         .returns(user.item(Fields::All)?)
///         .param("id")
///         .meta(json!({ "url": "/users/:id" })),
/// ])?;
///
/// let query = user.get_item(Params::new().set("id", 1));
/// manager.add_query(query.clone());
/// manager.resolve();
/// ```
#[derive(Clone)]
pub struct Manager {
    inner: Arc<ManagerInner>,
}

impl Manager {
    /// Create a manager with an in-memory store and no drivers.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Create a builder for customizing the manager.
    pub fn builder() -> ManagerBuilder {
        ManagerBuilder::new()
    }

    /// The state store.
    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.inner.store
    }

    /// Current store snapshot.
    pub fn state(&self) -> Arc<State> {
        self.inner.store.state()
    }

    /// The resolver.
    pub fn resolver(&self) -> &Resolver {
        &self.inner.resolver
    }

    /// The cache.
    pub fn cache(&self) -> &Cache {
        self.inner.resolver.cache()
    }

    /// Snapshot of the registered models.
    pub fn registry(&self) -> SchemaRegistry {
        self.inner.registry.read().clone()
    }

    /// Looks up a registered source by id.
    pub fn source(&self, id: &str) -> Option<Arc<SourceDefinition>> {
        self.inner.sources.read().get(id).cloned()
    }

    /// Registers `defs`, all served by the driver registered as `driver`.
    ///
    /// Either every definition is registered or none is.
    pub fn add_sources<I>(&self, driver: &str, defs: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = SourceDefinitionBuilder>,
    {
        let driver = self.driver(driver)?;
        let built = defs
            .into_iter()
            .map(|def| def.build(driver.clone()))
            .collect::<Result<Vec<_>, _>>()?;

        let mut sources = self.inner.sources.write();
        let mut registry = self.inner.registry.write();
        let mut next_sources = sources.clone();
        let mut next_registry = registry.clone();
        for def in built {
            for model in def.models() {
                next_registry.register(model)?;
            }
            next_sources.add(def)?;
        }
        *sources = next_sources;
        *registry = next_registry;
        Ok(())
    }

    /// Registers one definition served by the driver registered as `driver`.
    pub fn add_source(
        &self,
        driver: &str,
        def: SourceDefinitionBuilder,
    ) -> Result<Arc<SourceDefinition>, ConfigError> {
        let driver = self.driver(driver)?;
        self.register(def.build(driver)?)
    }

    /// Registers one definition served by `driver`.
    pub fn add_source_with<D>(
        &self,
        driver: D,
        def: SourceDefinitionBuilder,
    ) -> Result<Arc<SourceDefinition>, ConfigError>
    where
        D: Driver + 'static,
    {
        self.register(def.build(Arc::new(driver))?)
    }

    fn register(&self, def: SourceDefinition) -> Result<Arc<SourceDefinition>, ConfigError> {
        let mut sources = self.inner.sources.write();
        let mut registry = self.inner.registry.write();
        let mut next_registry = registry.clone();
        for model in def.models() {
            next_registry.register(model)?;
        }
        let def = sources.add(def)?;
        *registry = next_registry;
        Ok(def)
    }

    fn driver(&self, name: &str) -> Result<Arc<dyn Driver>, ConfigError> {
        self.inner
            .drivers
            .get(name)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownDriver {
                name: name.to_string(),
            })
    }

    /// Queues `query` for the next [`resolve`](Self::resolve).
    pub fn add_query(&self, query: Query) {
        self.inner.resolver.add_query(query);
    }

    /// Resolves every queued query.
    pub fn resolve(&self) {
        let sources = self.inner.sources.read().clone();
        self.inner.resolver.resolve_all(&sources);
    }

    /// Queues `query` as forced and resolves.
    ///
    /// A stored error no longer blocks the query, so it is sent again unless
    /// fresh data is cached.
    pub fn reload(&self, query: &Query) {
        self.add_query(query.clone().forced());
        self.resolve();
    }

    /// Stops tracking `query`.
    pub fn release(&self, query: &Query) {
        self.inner.resolver.release(query);
    }

    /// Builds the query, queues it and resolves immediately.
    pub fn submit(&self, query: QueryBuilder) -> Result<Query, ConfigError> {
        let query = query.build()?;
        self.add_query(query.clone());
        self.resolve();
        Ok(query)
    }

    /// Sends a CREATE query for `instance`.
    pub fn create_model(&self, instance: &Instance) -> Result<Query, ConfigError> {
        self.submit(Query::create(instance))
    }

    /// Sends an UPDATE query for `instance`, which must have an identity.
    pub fn update_model(&self, instance: &Instance) -> Result<Query, ConfigError> {
        require_id(instance)?;
        self.submit(Query::update(instance))
    }

    /// Sends a DELETE query for `instance`, which must have an identity.
    pub fn delete_model(&self, instance: &Instance) -> Result<Query, ConfigError> {
        require_id(instance)?;
        self.submit(Query::delete(instance))
    }

    /// Fetches the entity `instance` identifies, by its identity field.
    pub fn get_model(&self, instance: &Instance) -> Result<Query, ConfigError> {
        let model = instance.model();
        let id = require_id(instance)?;
        self.submit(
            Query::builder(model)
                .return_type(ReturnType::Item)
                .params(Params::new().set(model.id_field(), id)),
        )
    }

    /// Store status of `query`, under its resolved hash.
    pub fn query_status(&self, query: &Query) -> StatusRecord {
        let resolved = self.resolved(query);
        self.state().status(&resolved.hash())
    }

    fn resolved(&self, query: &Query) -> Query {
        self.inner
            .resolver
            .resolved_query(query)
            .unwrap_or_else(|| query.clone())
    }

    /// Statuses and data for each named query.
    ///
    /// A query that was not resolved by this manager and whose cached data
    /// is stale reports `PENDING` unless the store holds an error or an
    /// undefined-parameters status for it. Data falls back to a blank
    /// instance or an empty list.
    pub fn props(&self, queries: &QueryMap) -> Props {
        let state = self.state();
        let now = Utc::now();
        let mut props = Props::default();

        for (name, query) in queries {
            let resolved = self.resolved(query);
            let stored = state.status(&resolved.hash());
            let internal = self.inner.resolver.status(query);

            let respect_cache = internal != Some(Status::Success)
                && !stored.is_error()
                && !stored.is_undefined_params();
            let status = if respect_cache && Cache::expired_at(&resolved, &state, now) {
                StatusRecord::new(Status::Pending)
            } else {
                stored
            };
            props.status.insert(name.clone(), status);

            let model = resolved.model();
            let value = match Cache::query_data(&resolved, &state).0 {
                Some(CachedData::Item(data)) => PropValue::Item(model.instance(data)),
                Some(CachedData::List(items)) => {
                    PropValue::List(items.into_iter().map(|data| model.instance(data)).collect())
                }
                None if resolved.return_type() == Some(ReturnType::Item) => {
                    PropValue::Item(model.blank())
                }
                None => PropValue::List(Vec::new()),
            };
            props.data.insert(name.clone(), value);
        }

        props
    }
}

fn require_id(instance: &Instance) -> Result<serde_json::Value, ConfigError> {
    instance
        .id()
        .cloned()
        .ok_or_else(|| ConfigError::MissingInstanceId {
            model: instance.model().name().to_string(),
        })
}

impl Default for Manager {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Manager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Manager")
            .field("drivers", &self.inner.drivers.keys().collect::<Vec<_>>())
            .field("sources", &self.inner.sources.read().len())
            .field("resolver", &self.inner.resolver)
            .finish()
    }
}

/// Builder for [`Manager`].
///
/// # Example
///
/// ```ignore
/// let manager = Manager::builder()
///     .store(store.clone())
///     .registry(SchemaRegistry::new().with(&user)?)
///     .driver("http", http_driver)
///     .tracer(MyTracer)
///     .build();
/// ```
pub struct ManagerBuilder {
    store: Option<Arc<dyn StateStore>>,
    registry: SchemaRegistry,
    drivers: HashMap<String, Arc<dyn Driver>>,
    tracer: Arc<dyn Tracer>,
}

impl Default for ManagerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ManagerBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self {
            store: None,
            registry: SchemaRegistry::new(),
            drivers: HashMap::new(),
            tracer: Arc::new(NoopTracer),
        }
    }

    /// Use `store` instead of a fresh [`MemoryStore`].
    pub fn store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Start from a registry of known models.
    pub fn registry(mut self, registry: SchemaRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Register `driver` under `name`. A later registration under the same
    /// name replaces the earlier one.
    pub fn driver<D>(mut self, name: impl Into<String>, driver: D) -> Self
    where
        D: Driver + 'static,
    {
        self.drivers.insert(name.into(), Arc::new(driver));
        self
    }

    /// Register an already shared driver under `name`.
    pub fn shared_driver(mut self, name: impl Into<String>, driver: Arc<dyn Driver>) -> Self {
        self.drivers.insert(name.into(), driver);
        self
    }

    /// Set the tracer observing resolution.
    pub fn tracer<T: Tracer>(mut self, tracer: T) -> Self {
        self.tracer = Arc::new(tracer);
        self
    }

    /// Build the manager with the configured settings.
    pub fn build(self) -> Manager {
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryStore::new()) as Arc<dyn StateStore>);
        let cache = Cache::new(store.clone());
        Manager {
            inner: Arc::new(ManagerInner {
                store,
                registry: RwLock::new(self.registry),
                drivers: self.drivers,
                sources: RwLock::new(Sources::new()),
                resolver: Resolver::new(cache, self.tracer),
            }),
        }
    }
}
