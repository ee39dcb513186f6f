//! Source definitions: the API endpoints queries are resolved against.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::driver::Driver;
use crate::error::ConfigError;
use crate::kind::QueryKind;
use crate::model::Model;
use crate::params::Params;
use crate::provider::{Provider, Returns};
use crate::query::Query;
use crate::satisfy;

static NEXT_SOURCE_ID: AtomicU64 = AtomicU64::new(1);

/// A parameter a source accepts, with an optional default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamSpec {
    name: String,
    default: Option<Value>,
}

impl ParamSpec {
    /// Parameter name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Value injected when a query leaves the parameter out.
    pub fn default(&self) -> Option<&Value> {
        self.default.as_ref()
    }
}

/// A registered capability: what an endpoint returns, which parameters it
/// takes and the driver that calls it.
pub struct SourceDefinition {
    id: String,
    returns: Returns,
    params: Vec<ParamSpec>,
    optional_params: Vec<ParamSpec>,
    kind: QueryKind,
    models: Vec<Model>,
    meta: Value,
    cache_for: Option<Duration>,
    driver: Arc<dyn Driver>,
}

impl SourceDefinition {
    /// Starts a source definition. Defaults to a GET with no parameters.
    pub fn builder() -> SourceDefinitionBuilder {
        SourceDefinitionBuilder::default()
    }

    /// Unique id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// What the source returns.
    pub fn returns(&self) -> &Returns {
        &self.returns
    }

    /// Required parameters.
    pub fn params(&self) -> &[ParamSpec] {
        &self.params
    }

    /// Optional parameters.
    pub fn optional_params(&self) -> &[ParamSpec] {
        &self.optional_params
    }

    /// Operation kind served.
    pub fn kind(&self) -> QueryKind {
        self.kind
    }

    /// Models served.
    pub fn models(&self) -> &[Model] {
        &self.models
    }

    /// Opaque driver configuration, e.g. a URL template.
    pub fn meta(&self) -> &Value {
        &self.meta
    }

    /// Time-to-live applied when a response carries no cache headers.
    pub fn cache_for(&self) -> Option<Duration> {
        self.cache_for
    }

    /// Driver invoked for matched queries.
    pub fn driver(&self) -> &Arc<dyn Driver> {
        &self.driver
    }

    /// Whether the source takes no parameters at all.
    pub fn has_no_params(&self) -> bool {
        self.params.is_empty() && self.optional_params.is_empty()
    }

    /// The provider returning `model`, if any.
    pub fn provider_for(&self, model: &Model) -> Option<&Provider> {
        self.returns.provider_for(model)
    }

    /// Fills parameters the query leaves undefined with this source's
    /// defaults.
    pub fn add_default_params(&self, params: &Params) -> Params {
        let mut params = params.clone();
        for spec in self.params.iter().chain(&self.optional_params) {
            if let Some(default) = &spec.default {
                if !params.is_defined(&spec.name) {
                    params.insert(spec.name.clone(), Some(default.clone()));
                }
            }
        }
        params
    }
}

impl fmt::Display for SourceDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let models: Vec<&str> = self.models.iter().map(Model::name).collect();
        write!(
            f,
            "SourceDefinition(id: {}, kind: {}, models: {})",
            self.id,
            self.kind,
            models.join(", ")
        )
    }
}

impl fmt::Debug for SourceDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceDefinition")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("returns", &self.returns)
            .field("params", &self.params)
            .field("optional_params", &self.optional_params)
            .field("meta", &self.meta)
            .field("cache_for", &self.cache_for)
            .finish_non_exhaustive()
    }
}

/// Builder for [`SourceDefinition`]. The driver is supplied at
/// [`build`](Self::build) time, usually by [`Manager::add_sources`].
///
/// [`Manager::add_sources`]: crate::Manager::add_sources
#[derive(Debug, Clone)]
pub struct SourceDefinitionBuilder {
    id: Option<String>,
    returns: Returns,
    named: Vec<(String, Provider)>,
    params: Vec<ParamSpec>,
    optional_params: Vec<ParamSpec>,
    kind: QueryKind,
    model: Option<Model>,
    meta: Value,
    cache_for: Option<Duration>,
}

impl Default for SourceDefinitionBuilder {
    fn default() -> Self {
        Self {
            id: None,
            returns: Returns::None,
            named: Vec::new(),
            params: Vec::new(),
            optional_params: Vec::new(),
            kind: QueryKind::Get,
            model: None,
            meta: Value::Null,
            cache_for: None,
        }
    }
}

impl SourceDefinitionBuilder {
    /// Explicit id. A unique id is generated otherwise.
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// The source returns the whole response for `provider`.
    pub fn returns(mut self, provider: Provider) -> Self {
        self.returns = Returns::Single(provider);
        self
    }

    /// The source returns data for `provider` under the response key `name`.
    ///
    /// Any named return makes the source polymorphic.
    pub fn returns_named(mut self, name: impl Into<String>, provider: Provider) -> Self {
        self.named.push((name.into(), provider));
        self
    }

    /// Adds a required parameter.
    pub fn param(mut self, name: impl Into<String>) -> Self {
        self.params.push(ParamSpec {
            name: name.into(),
            default: None,
        });
        self
    }

    /// Adds a required parameter that falls back to `default`.
    pub fn param_default(mut self, name: impl Into<String>, default: impl Into<Value>) -> Self {
        self.params.push(ParamSpec {
            name: name.into(),
            default: Some(default.into()),
        });
        self
    }

    /// Adds an optional parameter.
    pub fn optional_param(mut self, name: impl Into<String>) -> Self {
        self.optional_params.push(ParamSpec {
            name: name.into(),
            default: None,
        });
        self
    }

    /// Adds an optional parameter injected with `default` when left out.
    pub fn optional_param_default(
        mut self,
        name: impl Into<String>,
        default: impl Into<Value>,
    ) -> Self {
        self.optional_params.push(ParamSpec {
            name: name.into(),
            default: Some(default.into()),
        });
        self
    }

    /// Operation kind served.
    pub fn kind(mut self, kind: QueryKind) -> Self {
        self.kind = kind;
        self
    }

    /// Model served by a source that returns nothing, e.g. a DELETE.
    pub fn model(mut self, model: &Model) -> Self {
        self.model = Some(model.clone());
        self
    }

    /// Opaque driver configuration.
    pub fn meta(mut self, meta: impl Into<Value>) -> Self {
        self.meta = meta.into();
        self
    }

    /// Time-to-live used when responses carry no cache headers.
    pub fn cache_for(mut self, ttl: Duration) -> Self {
        self.cache_for = Some(ttl);
        self
    }

    /// Validates the definition and binds it to `driver`.
    pub fn build(self, driver: Arc<dyn Driver>) -> Result<SourceDefinition, ConfigError> {
        let id = self
            .id
            .unwrap_or_else(|| format!("source-{}", NEXT_SOURCE_ID.fetch_add(1, Ordering::Relaxed)));

        let returns = if self.named.is_empty() {
            self.returns
        } else {
            let mut seen = HashSet::new();
            for (name, _) in &self.named {
                if !seen.insert(name.as_str()) {
                    return Err(ConfigError::DuplicateReturn {
                        source_id: id,
                        name: name.clone(),
                    });
                }
            }
            Returns::Named(self.named)
        };

        if self.kind.is_get() && returns.is_none() {
            return Err(ConfigError::MissingReturns { source_id: id });
        }

        let models = match self.model {
            Some(model) => vec![model],
            None => returns.models(),
        };
        if models.is_empty() {
            return Err(ConfigError::NoModels { source_id: id });
        }

        Ok(SourceDefinition {
            id,
            returns,
            params: self.params,
            optional_params: self.optional_params,
            kind: self.kind,
            models,
            meta: self.meta,
            cache_for: self.cache_for,
            driver,
        })
    }
}

/// Registered source definitions in registration order.
#[derive(Debug, Default, Clone)]
pub struct Sources {
    defs: Vec<Arc<SourceDefinition>>,
    ids: HashSet<String>,
}

impl Sources {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `def`, rejecting duplicate ids.
    pub fn add(&mut self, def: SourceDefinition) -> Result<Arc<SourceDefinition>, ConfigError> {
        if !self.ids.insert(def.id.clone()) {
            return Err(ConfigError::DuplicateSource { id: def.id });
        }
        let def = Arc::new(def);
        self.defs.push(def.clone());
        Ok(def)
    }

    /// The first registered source satisfying `query`.
    pub fn find(&self, query: &Query) -> Option<&Arc<SourceDefinition>> {
        self.defs.iter().find(|def| satisfy::satisfies(def, query))
    }

    /// Looks up a source by id.
    pub fn get(&self, id: &str) -> Option<&Arc<SourceDefinition>> {
        self.defs.iter().find(|def| def.id == id)
    }

    /// Iterates sources in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<SourceDefinition>> {
        self.defs.iter()
    }

    /// Number of registered sources.
    pub fn len(&self) -> usize {
        self.defs.len()
    }

    /// Whether no source is registered.
    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }
}
