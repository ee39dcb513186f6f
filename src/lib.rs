//! Query-Source: declarative data queries resolved against API sources.
//!
//! Callers describe *what* data they need as [`Query`] values over a
//! [`Model`]. Each API endpoint is registered once as a [`SourceDefinition`]
//! describing what it returns and which parameters it needs. The
//! [`Manager`] matches queries to sources, deduplicates identical requests,
//! invokes the source's [`Driver`] and normalizes the response into an
//! entity cache shared by every query.
//!
//! # Key Features
//!
//! - **Satisfiability matching**: queries are routed to the first source whose
//!   kind, model, parameters, fields and return type satisfy them
//! - **Normalized cache**: entities are stored once by model and id, with
//!   HTTP-style expiry and tombstones for deletions
//! - **Deduplication**: identical pending or in-flight queries share one request
//! - **Batched status writes**: one store write per resolve pass
//! - **Dependent queries**: [`PropInspector`] and [`Loader`] build queries whose
//!   parameters come from sibling queries' data
//!
//! # Example
//!
//! ```ignore
//! use query_source::{Fields, Manager, Model, Params, ResponseMeta, SourceDefinition};
//! use serde_json::json;
//!
//! let user = Model::builder("user")
//!     .field("id", 0)
//!     .field("name", "")
//!     .build()?;
//!
//! let manager = Manager::builder()
//!     .driver("http", |_source: &_, _query: &_, completion: query_source::Completion| {
//!         completion.success(json!({ "id": 1, "name": "Ada" }), ResponseMeta::new());
//!     })
//!     .build();
//!
//! manager.add_sources("http", vec![
//!     SourceDefinition::builder()
//!         .returns(user.item(Fields::All)?)
//!         .param("id"),
//! ])?;
//!
//! let query = user.get_item(Params::new().set("id", 1));
//! manager.add_query(query.clone());
//! manager.resolve();
//!
//! let props = manager.props(&[("user".to_string(), query)].into_iter().collect());
//! assert!(props.status("user").unwrap().is_success());
//! ```
//!
//! # Observability
//!
//! Resolution decisions are logged through `tracing`. Structured events are
//! available by installing a [`Tracer`] with [`ManagerBuilder::tracer`].

#![warn(missing_docs)]

mod cache;
mod dependency;
mod driver;
mod error;
mod instance;
mod kind;
mod loader;
mod manager;
mod model;
mod params;
mod provider;
mod query;
mod resolver;
pub mod satisfy;
mod source;
mod status;
mod store;
pub mod tracer;

pub use cache::{expiry_from_meta, Cache, CachedData};
pub use dependency::{Computed, DependencyGraph, Deps, PropInspector, QueryScope};
pub use driver::{Completion, Driver, ResponseMeta};
pub use error::{CacheError, ConfigError, DependencyError, QueryError, UNRESOLVABLE_MESSAGE};
pub use instance::{FieldValue, Instance};
pub use kind::{Fields, QueryKind, ReturnType};
pub use loader::Loader;
pub use manager::{Manager, ManagerBuilder, PropValue, Props, QueryMap};
pub use model::{DataFilter, FieldKind, Model, ModelBuilder, SchemaRegistry};
pub use params::Params;
pub use provider::{Provider, Returns};
pub use query::{Query, QueryBuilder, QueryCallback, QueryHash, QueryId};
pub use resolver::Resolver;
pub use source::{ParamSpec, SourceDefinition, SourceDefinitionBuilder, Sources};
pub use status::{Status, StatusRecord};
pub use store::{
    Action, EntityId, EntityRecord, MemoryStore, ModelCollection, ModelData, ReturnedIds, State,
    StateStore, Subscription,
};
pub use tracer::{
    AddOutcome, CompletionResult, NoopTracer, Resolution, SpanId, Tracer, TracerQuery,
};
