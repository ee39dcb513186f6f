//! Normalization of driver responses and cache lookups over the store.

use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::{Map, Value};

use crate::driver::ResponseMeta;
use crate::error::CacheError;
use crate::kind::{QueryKind, ReturnType};
use crate::query::Query;
use crate::source::SourceDefinition;
use crate::status::{Status, StatusRecord};
use crate::store::{
    Action, EntityId, EntityRecord, ModelCollection, ReturnedIds, State, StateStore,
};

/// Entity data read back for a query.
#[derive(Debug, Clone, PartialEq)]
pub enum CachedData {
    /// One entity's raw fields.
    Item(Map<String, Value>),
    /// Raw fields of each entity, in the order the query returned them.
    List(Vec<Map<String, Value>>),
}

impl CachedData {
    /// Plain JSON form, as handed to query callbacks.
    pub fn to_value(&self) -> Value {
        match self {
            CachedData::Item(data) => Value::Object(data.clone()),
            CachedData::List(items) => {
                Value::Array(items.iter().cloned().map(Value::Object).collect())
            }
        }
    }
}

/// Reads and writes query results through a [`StateStore`].
#[derive(Clone)]
pub struct Cache {
    store: Arc<dyn StateStore>,
}

impl Cache {
    /// Creates a cache over `store`.
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    /// Normalizes `response` into per-entity records.
    ///
    /// Returns the records of every model the source returns, plus the ids
    /// of the query's own model in response order.
    pub fn parse_api_data(
        query: &Query,
        source: &SourceDefinition,
        response: &Value,
        expires: DateTime<Utc>,
    ) -> Result<(ModelCollection, ReturnedIds), CacheError> {
        let mut collection = ModelCollection::new();
        let mut returned_ids = ReturnedIds::new();

        for (name, provider) in source.returns().providers() {
            let model = provider.model();
            let data = match name {
                Some(name) => response.get(name).unwrap_or(&Value::Null),
                None => response,
            };
            let items: Vec<&Map<String, Value>> = match provider.return_type() {
                ReturnType::List => data
                    .as_array()
                    .ok_or_else(|| CacheError::ExpectedList {
                        model: model.name().to_string(),
                    })?
                    .iter()
                    .map(|item| {
                        item.as_object().ok_or_else(|| CacheError::ExpectedObject {
                            model: model.name().to_string(),
                        })
                    })
                    .collect::<Result<_, _>>()?,
                ReturnType::Item | ReturnType::None => {
                    vec![data.as_object().ok_or_else(|| CacheError::ExpectedObject {
                        model: model.name().to_string(),
                    })?]
                }
            };

            let records = collection.entry(model.name().to_string()).or_default();
            for item in items {
                let id = item
                    .get(model.id_field())
                    .and_then(EntityId::from_value)
                    .ok_or_else(|| CacheError::MissingIdentity {
                        model: model.name().to_string(),
                        field: model.id_field().to_string(),
                    })?;
                if model == query.model() {
                    returned_ids.push(id.clone());
                }
                match records.get_mut(&id) {
                    Some(record) => record.data.extend(item.clone()),
                    None => {
                        records.insert(
                            id,
                            EntityRecord {
                                data: item.clone(),
                                expires,
                                deleted: false,
                            },
                        );
                    }
                }
            }
        }

        Ok((collection, returned_ids))
    }

    /// Writes a completed query's response to the store.
    ///
    /// Returns the ids recorded for the query, empty for DELETE queries and
    /// bodiless mutations.
    pub fn store_query(
        &self,
        query: &Query,
        source: &SourceDefinition,
        response: &Value,
        expires: DateTime<Utc>,
    ) -> Result<ReturnedIds, CacheError> {
        let hash = query.hash();

        if query.kind() == QueryKind::Delete {
            let id = query.model_id().cloned().ok_or_else(|| CacheError::MissingModelId {
                model: query.model().name().to_string(),
            })?;
            self.store.dispatch(Action::DeleteData {
                hash,
                model: query.model().name().to_string(),
                id,
            });
            return Ok(ReturnedIds::new());
        }

        if source.returns().is_none() || (response.is_null() && !query.kind().is_get()) {
            self.store.dispatch(Action::UpdateQueryStatuses(
                [(hash, StatusRecord::new(Status::Success))].into_iter().collect(),
            ));
            return Ok(ReturnedIds::new());
        }

        let (data, returned_ids) = Self::parse_api_data(query, source, response, expires)?;
        self.store.dispatch(Action::UpdateData {
            hash,
            data,
            returned_ids: returned_ids.clone(),
            expires,
        });
        Ok(returned_ids)
    }

    /// Cached data for `query` from the current snapshot.
    pub fn get_query_data(&self, query: &Query) -> (Option<CachedData>, bool) {
        Self::query_data(query, &self.store.state())
    }

    /// Cached data for `query` in `state`, and whether it is a full hit.
    ///
    /// Missing or deleted entities are left out and make the lookup a miss,
    /// so the query is fetched again.
    pub fn query_data(query: &Query, state: &State) -> (Option<CachedData>, bool) {
        if !query.kind().is_get() {
            return (None, false);
        }
        let Some(ids) = state.returned_ids(&query.hash()) else {
            return (None, false);
        };

        let model = query.model().name();
        let mut hit = true;
        let mut items = Vec::with_capacity(ids.len());
        for id in ids.iter() {
            match state.entity(model, id) {
                Some(record) if !record.deleted => items.push(record.data.clone()),
                _ => hit = false,
            }
        }

        if query.return_type() == Some(ReturnType::Item) {
            match items.into_iter().next() {
                Some(item) => (Some(CachedData::Item(item)), hit),
                None => (None, false),
            }
        } else {
            (Some(CachedData::List(items)), hit)
        }
    }

    /// Status of `query` in the current snapshot.
    pub fn get_query_status(&self, query: &Query) -> StatusRecord {
        self.store.state().status(&query.hash())
    }

    /// Whether `query`'s data is missing or stale now.
    pub fn has_query_expired(&self, query: &Query) -> bool {
        Self::expired_at(query, &self.store.state(), Utc::now())
    }

    /// Whether `query`'s data in `state` is missing or stale at `now`.
    pub fn expired_at(query: &Query, state: &State, now: DateTime<Utc>) -> bool {
        state
            .expiry(&query.hash())
            .map_or(true, |expires| expires <= now)
    }
}

/// When a response received at `now` goes stale.
///
/// A `Cache-Control` header wins: its `max-age` is added to `now`, and
/// without one the response is stale immediately. Otherwise a future
/// `Expires` header is used, then the source's TTL, then `now`.
pub fn expiry_from_meta(
    meta: &ResponseMeta,
    cache_for: Option<std::time::Duration>,
    now: DateTime<Utc>,
) -> DateTime<Utc> {
    if let Some(cache_control) = meta.get_header("cache-control") {
        return max_age(cache_control)
            .and_then(ChronoDuration::try_seconds)
            .and_then(|age| now.checked_add_signed(age))
            .unwrap_or(now);
    }
    if let Some(expires) = meta.get_header("expires").and_then(parse_http_date) {
        if expires > now {
            return expires;
        }
    }
    cache_for
        .and_then(|ttl| ChronoDuration::from_std(ttl).ok())
        .and_then(|ttl| now.checked_add_signed(ttl))
        .unwrap_or(now)
}

fn max_age(cache_control: &str) -> Option<i64> {
    cache_control.split(',').find_map(|directive| {
        let (name, value) = directive.trim().split_once('=')?;
        if name.trim().eq_ignore_ascii_case("max-age") {
            value.trim().trim_matches('"').parse::<i64>().ok()
        } else {
            None
        }
    })
}

fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value)
        .or_else(|_| DateTime::parse_from_rfc3339(value))
        .map(|date| date.with_timezone(&Utc))
        .ok()
}
