//! Models: entity schemas shared by instances, providers and queries.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::error::ConfigError;
use crate::instance::Instance;
use crate::kind::{Fields, QueryKind, ReturnType};
use crate::params::Params;
use crate::provider::Provider;
use crate::query::Query;

/// Transforms raw entity data before an instance is built from it.
pub type DataFilter = Arc<dyn Fn(Map<String, Value>) -> Map<String, Value> + Send + Sync>;

/// How a model field is populated.
#[derive(Debug, Clone)]
pub enum FieldKind {
    /// Plain JSON value with a default.
    Value(Value),
    /// Nested entity of another model; defaults to that model's blank.
    Model(Model),
}

#[derive(Debug, Clone)]
pub(crate) struct FieldDef {
    pub(crate) name: String,
    pub(crate) kind: FieldKind,
}

struct ModelSchema {
    name: String,
    fields: Vec<FieldDef>,
    index: HashMap<String, usize>,
    id_field: String,
    id_index: usize,
    filter: Option<DataFilter>,
}

/// An entity type.
///
/// The schema is fixed when the model is built and shared by every clone,
/// instance, provider and query that references it. Two models are equal
/// when they have the same name; a [`SchemaRegistry`] keeps names unique.
#[derive(Clone)]
pub struct Model(Arc<ModelSchema>);

impl Model {
    /// Starts declaring a model named `name`.
    pub fn builder(name: impl Into<String>) -> ModelBuilder {
        ModelBuilder::new(name)
    }

    /// Model name.
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Name of the identity field.
    pub fn id_field(&self) -> &str {
        &self.0.id_field
    }

    /// Field names in declaration order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.0.fields.iter().map(|def| def.name.as_str())
    }

    /// Whether `field` is part of the schema.
    pub fn has_field(&self, field: &str) -> bool {
        self.0.index.contains_key(field)
    }

    /// How `field` is populated.
    pub fn field_kind(&self, field: &str) -> Option<&FieldKind> {
        self.index_of(field).map(|i| &self.0.fields[i].kind)
    }

    /// The model nested under `field`, if it is a submodel field.
    pub fn submodel(&self, field: &str) -> Option<&Model> {
        match self.field_kind(field) {
            Some(FieldKind::Model(model)) => Some(model),
            _ => None,
        }
    }

    /// Checks that every requested field exists, naming all unknown ones.
    pub fn assert_fields_exist(&self, fields: &Fields) -> Result<(), ConfigError> {
        let Some(names) = fields.names() else {
            return Ok(());
        };
        let missing: Vec<String> = names
            .iter()
            .filter(|name| !self.has_field(name))
            .cloned()
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::MissingFields {
                model: self.name().to_string(),
                fields: missing,
            })
        }
    }

    /// A provider returning one entity with `fields`.
    pub fn item(&self, fields: impl Into<Fields>) -> Result<Provider, ConfigError> {
        Provider::new(self.clone(), fields.into(), ReturnType::Item)
    }

    /// A provider returning a list of entities with `fields`.
    pub fn list(&self, fields: impl Into<Fields>) -> Result<Provider, ConfigError> {
        Provider::new(self.clone(), fields.into(), ReturnType::List)
    }

    /// GET query for a single entity with every field.
    pub fn get_item(&self, params: Params) -> Query {
        self.get_query(Fields::All, ReturnType::Item, params)
    }

    /// GET query for a list of entities with every field.
    pub fn get_list(&self, params: Params) -> Query {
        self.get_query(Fields::All, ReturnType::List, params)
    }

    /// GET query for a single entity with only `fields`.
    pub fn get_item_fields(
        &self,
        fields: impl Into<Fields>,
        params: Params,
    ) -> Result<Query, ConfigError> {
        Query::builder(self)
            .fields(fields)
            .return_type(ReturnType::Item)
            .params(params)
            .build()
    }

    /// GET query for a list of entities with only `fields`.
    pub fn get_list_fields(
        &self,
        fields: impl Into<Fields>,
        params: Params,
    ) -> Result<Query, ConfigError> {
        Query::builder(self)
            .fields(fields)
            .return_type(ReturnType::List)
            .params(params)
            .build()
    }

    fn get_query(&self, fields: Fields, return_type: ReturnType, params: Params) -> Query {
        Query::unchecked(
            self.clone(),
            fields,
            QueryKind::Get,
            Some(return_type),
            params,
        )
    }

    /// An instance with every field at its default and no identity.
    ///
    /// A blank instance is how unloaded data is represented.
    pub fn blank(&self) -> Instance {
        Instance::blank(self.clone())
    }

    /// Builds an instance from raw entity data.
    pub fn instance(&self, data: Map<String, Value>) -> Instance {
        Instance::from_data(self.clone(), data)
    }

    /// Applies the model's data filter, if one is configured.
    pub fn filter_data(&self, data: Map<String, Value>) -> Map<String, Value> {
        match &self.0.filter {
            Some(filter) => filter(data),
            None => data,
        }
    }

    pub(crate) fn defs(&self) -> &[FieldDef] {
        &self.0.fields
    }

    pub(crate) fn index_of(&self, field: &str) -> Option<usize> {
        self.0.index.get(field).copied()
    }

    pub(crate) fn id_index(&self) -> usize {
        self.0.id_index
    }
}

impl PartialEq for Model {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || self.0.name == other.0.name
    }
}

impl Eq for Model {}

impl std::hash::Hash for Model {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.name.hash(state);
    }
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("name", &self.0.name)
            .field("id_field", &self.0.id_field)
            .field(
                "fields",
                &self.0.fields.iter().map(|def| &def.name).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Builder for [`Model`].
///
/// # Example
///
/// ```ignore
/// let user = Model::builder("user")
///     .field("id", 0)
///     .field("name", "")
///     .field("email", "")
///     .build()?;
/// ```
pub struct ModelBuilder {
    name: String,
    fields: Vec<FieldDef>,
    id_field: String,
    filter: Option<DataFilter>,
}

impl ModelBuilder {
    /// Creates a builder for a model named `name` with identity field `id`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            id_field: "id".to_string(),
            filter: None,
        }
    }

    /// Declares a plain field. Redeclaring a field replaces it in place.
    pub fn field(self, name: impl Into<String>, default: impl Into<Value>) -> Self {
        self.push(name.into(), FieldKind::Value(default.into()))
    }

    /// Declares a field holding a nested entity of `model`.
    pub fn submodel(self, name: impl Into<String>, model: &Model) -> Self {
        self.push(name.into(), FieldKind::Model(model.clone()))
    }

    /// Sets the identity field. Defaults to `id`.
    pub fn id_field(mut self, name: impl Into<String>) -> Self {
        self.id_field = name.into();
        self
    }

    /// Sets a filter applied to raw data before an instance is built.
    pub fn filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(Map<String, Value>) -> Map<String, Value> + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(filter));
        self
    }

    fn push(mut self, name: String, kind: FieldKind) -> Self {
        match self.fields.iter_mut().find(|def| def.name == name) {
            Some(def) => def.kind = kind,
            None => self.fields.push(FieldDef { name, kind }),
        }
        self
    }

    /// Validates and builds the model.
    pub fn build(self) -> Result<Model, ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::EmptyModelName);
        }
        if self.fields.is_empty() {
            return Err(ConfigError::NoFields { model: self.name });
        }
        let index: HashMap<String, usize> = self
            .fields
            .iter()
            .enumerate()
            .map(|(i, def)| (def.name.clone(), i))
            .collect();
        let Some(&id_index) = index.get(&self.id_field) else {
            return Err(ConfigError::MissingIdField {
                model: self.name,
                field: self.id_field,
            });
        };
        Ok(Model(Arc::new(ModelSchema {
            name: self.name,
            fields: self.fields,
            index,
            id_field: self.id_field,
            id_index,
            filter: self.filter,
        })))
    }
}

/// Registry of every model known to a manager, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    models: BTreeMap<String, Model>,
}

impl SchemaRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `model`, rejecting a second model with the same name.
    pub fn register(&mut self, model: &Model) -> Result<(), ConfigError> {
        if let Some(existing) = self.models.get(model.name()) {
            if Arc::ptr_eq(&existing.0, &model.0) {
                return Ok(());
            }
            return Err(ConfigError::DuplicateModel {
                name: model.name().to_string(),
            });
        }
        self.models.insert(model.name().to_string(), model.clone());
        Ok(())
    }

    /// Registers `model` and returns the registry, for chaining.
    pub fn with(mut self, model: &Model) -> Result<Self, ConfigError> {
        self.register(model)?;
        Ok(self)
    }

    /// Looks up a model by name.
    pub fn get(&self, name: &str) -> Option<&Model> {
        self.models.get(name)
    }

    /// Whether a model named `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.models.contains_key(name)
    }

    /// Iterates registered models in name order.
    pub fn iter(&self) -> impl Iterator<Item = &Model> {
        self.models.values()
    }
}
