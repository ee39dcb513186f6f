//! Queries: declarative requests for model data.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::error::{ConfigError, QueryError};
use crate::instance::Instance;
use crate::kind::{Fields, QueryKind, ReturnType};
use crate::model::Model;
use crate::params::Params;
use crate::store::EntityId;

static NEXT_QUERY_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one constructed query. Clones share it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryId(u64);

impl QueryId {
    fn next() -> Self {
        QueryId(NEXT_QUERY_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Canonical serialization of a query, the key for deduplication, status and
/// cached results.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct QueryHash(String);

impl QueryHash {
    /// The hash text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for QueryHash {
    fn from(hash: String) -> Self {
        QueryHash(hash)
    }
}

impl From<&str> for QueryHash {
    fn from(hash: &str) -> Self {
        QueryHash(hash.to_string())
    }
}

impl fmt::Display for QueryHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Completion callback attached to a query.
pub type QueryCallback = Arc<dyn Fn(Result<Value, QueryError>) + Send + Sync>;

/// A request for model data.
///
/// Queries are values: status, duplicates and returned ids live in the
/// resolver, keyed by [`QueryId`].
#[derive(Clone)]
pub struct Query {
    id: QueryId,
    model: Model,
    fields: Fields,
    kind: QueryKind,
    return_type: Option<ReturnType>,
    params: Params,
    body: Option<Value>,
    model_id: Option<EntityId>,
    callback: Option<QueryCallback>,
    force: bool,
}

impl Query {
    /// Starts a query for `model`. Defaults to a GET for every field.
    pub fn builder(model: &Model) -> QueryBuilder {
        QueryBuilder::new(model.clone())
    }

    /// CREATE query sending `instance` as the body.
    pub fn create(instance: &Instance) -> QueryBuilder {
        Self::mutation(QueryKind::Create, instance)
    }

    /// UPDATE query sending `instance` as the body, targeting its identity.
    pub fn update(instance: &Instance) -> QueryBuilder {
        Self::mutation(QueryKind::Update, instance)
    }

    /// DELETE query targeting `instance`'s identity.
    pub fn delete(instance: &Instance) -> QueryBuilder {
        Self::mutation(QueryKind::Delete, instance)
    }

    fn mutation(kind: QueryKind, instance: &Instance) -> QueryBuilder {
        let mut builder = Query::builder(instance.model())
            .kind(kind)
            .body(instance.values());
        builder.model_id = instance.entity_id();
        builder
    }

    pub(crate) fn unchecked(
        model: Model,
        fields: Fields,
        kind: QueryKind,
        return_type: Option<ReturnType>,
        params: Params,
    ) -> Self {
        Self {
            id: QueryId::next(),
            model,
            fields,
            kind,
            return_type,
            params,
            body: None,
            model_id: None,
            callback: None,
            force: false,
        }
    }

    /// Identity shared by clones of this query.
    pub fn id(&self) -> QueryId {
        self.id
    }

    /// Queried model.
    pub fn model(&self) -> &Model {
        &self.model
    }

    /// Requested fields.
    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    /// Operation kind.
    pub fn kind(&self) -> QueryKind {
        self.kind
    }

    /// Expected return type, `None` when the query accepts any.
    pub fn return_type(&self) -> Option<ReturnType> {
        self.return_type
    }

    /// Parameters.
    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Request body.
    pub fn body(&self) -> Option<&Value> {
        self.body.as_ref()
    }

    /// Identity of the entity targeted by UPDATE and DELETE queries.
    pub fn model_id(&self) -> Option<&EntityId> {
        self.model_id.as_ref()
    }

    /// Whether the query bypasses deduplication against a pending parent.
    pub fn is_forced(&self) -> bool {
        self.force
    }

    /// Returns this query marked as forced. The id is kept.
    pub fn forced(mut self) -> Self {
        self.force = true;
        self
    }

    /// Returns this query with `callback` attached. The id is kept.
    pub fn with_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(Result<Value, QueryError>) + Send + Sync + 'static,
    {
        self.callback = Some(Arc::new(callback));
        self
    }

    pub(crate) fn with_params(&self, params: Params) -> Self {
        Self {
            params,
            ..self.clone()
        }
    }

    pub(crate) fn notify(&self, result: Result<Value, QueryError>) {
        if let Some(callback) = &self.callback {
            callback(result);
        }
    }

    /// Structural equality: model, fields, params, kind, return type and
    /// body.
    pub fn is(&self, other: &Query) -> bool {
        self.model == other.model
            && self.fields == other.fields
            && self.params == other.params
            && self.kind == other.kind
            && self.return_type == other.return_type
            && self.body == other.body
    }

    /// Canonical hash. Equal for queries that are [`Query::is`] each other.
    pub fn hash(&self) -> QueryHash {
        QueryHash(self.to_string())
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Query(Model: {}, Fields: {}, Params: {}, Body: ",
            self.model.name(),
            self.fields,
            self.params
        )?;
        match &self.body {
            Some(body) => write!(f, "{}", body)?,
            None => f.write_str("undefined")?,
        }
        write!(
            f,
            ", QueryType: {}), ReturnType: {})",
            self.kind,
            self.return_type.map(|r| r.as_str()).unwrap_or("")
        )
    }
}

impl fmt::Debug for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("id", &self.id)
            .field("hash", &self.to_string())
            .field("model_id", &self.model_id)
            .field("force", &self.force)
            .finish()
    }
}

/// Builder for [`Query`].
pub struct QueryBuilder {
    model: Model,
    fields: Fields,
    kind: QueryKind,
    return_type: Option<ReturnType>,
    params: Params,
    body: Option<Value>,
    model_id: Option<EntityId>,
    callback: Option<QueryCallback>,
    force: bool,
}

impl QueryBuilder {
    fn new(model: Model) -> Self {
        Self {
            model,
            fields: Fields::All,
            kind: QueryKind::Get,
            return_type: None,
            params: Params::new(),
            body: None,
            model_id: None,
            callback: None,
            force: false,
        }
    }

    /// Fields to request.
    pub fn fields(mut self, fields: impl Into<Fields>) -> Self {
        self.fields = fields.into();
        self
    }

    /// Operation kind.
    pub fn kind(mut self, kind: QueryKind) -> Self {
        self.kind = kind;
        self
    }

    /// Expected return type.
    pub fn return_type(mut self, return_type: ReturnType) -> Self {
        self.return_type = Some(return_type);
        self
    }

    /// Replaces every parameter.
    pub fn params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    /// Adds one defined parameter.
    pub fn param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(name, Some(value.into()));
        self
    }

    /// Request body.
    pub fn body(mut self, body: impl Into<Value>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Identity of the targeted entity.
    pub fn model_id(mut self, id: impl Into<EntityId>) -> Self {
        self.model_id = Some(id.into());
        self
    }

    /// Completion callback.
    pub fn callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(Result<Value, QueryError>) + Send + Sync + 'static,
    {
        self.callback = Some(Arc::new(callback));
        self
    }

    /// Bypasses deduplication against a pending parent.
    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Validates the field selection and builds the query.
    pub fn build(self) -> Result<Query, ConfigError> {
        self.model.assert_fields_exist(&self.fields)?;
        Ok(Query {
            id: QueryId::next(),
            model: self.model,
            fields: self.fields,
            kind: self.kind,
            return_type: self.return_type,
            params: self.params,
            body: self.body,
            model_id: self.model_id,
            callback: self.callback,
            force: self.force,
        })
    }
}
