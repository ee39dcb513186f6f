//! The entity store: statuses, normalized entity data and per-query ids.
//!
//! State only changes through [`Action`]s. Readers take an immutable
//! [`Arc<State>`] snapshot.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::{Map, Value};
use slab::Slab;

use crate::query::QueryHash;
use crate::status::{Status, StatusRecord};

/// Identity of one entity within its model, always a string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    /// Reads an identity from a JSON string or number.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(EntityId(s.clone())),
            Value::Number(n) => Some(EntityId(n.to_string())),
            _ => None,
        }
    }

    /// The identity text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(id: &str) -> Self {
        EntityId(id.to_string())
    }
}

impl From<String> for EntityId {
    fn from(id: String) -> Self {
        EntityId(id)
    }
}

macro_rules! entity_id_from_int {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for EntityId {
                fn from(id: $ty) -> Self {
                    EntityId(id.to_string())
                }
            }
        )*
    };
}

entity_id_from_int!(i32, i64, u32, u64, usize);

/// Ids returned for one query, in response order without repeats.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ReturnedIds(Vec<EntityId>);

impl ReturnedIds {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `id` unless already present.
    pub fn push(&mut self, id: EntityId) {
        if !self.0.contains(&id) {
            self.0.push(id);
        }
    }

    /// Whether `id` is present.
    pub fn contains(&self, id: &EntityId) -> bool {
        self.0.contains(id)
    }

    /// Iterates ids in order.
    pub fn iter(&self) -> impl Iterator<Item = &EntityId> {
        self.0.iter()
    }

    /// Number of ids.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no ids are present.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<EntityId> for ReturnedIds {
    fn from_iter<I: IntoIterator<Item = EntityId>>(iter: I) -> Self {
        let mut ids = ReturnedIds::new();
        for id in iter {
            ids.push(id);
        }
        ids
    }
}

/// Stored data of one entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityRecord {
    /// Raw fields as returned by drivers.
    pub data: Map<String, Value>,
    /// When the data goes stale.
    pub expires: DateTime<Utc>,
    /// Tombstone set by a successful DELETE.
    pub deleted: bool,
}

/// Entity records of one model, keyed by id.
pub type ModelData = BTreeMap<EntityId, EntityRecord>;

/// Entity records of several models, keyed by model name.
pub type ModelCollection = BTreeMap<String, ModelData>;

/// Snapshot of the whole store.
#[derive(Debug, Clone, Default, Serialize)]
pub struct State {
    status: BTreeMap<QueryHash, StatusRecord>,
    data: ModelCollection,
    queries_to_ids: BTreeMap<QueryHash, ReturnedIds>,
    queries_to_expiry: BTreeMap<QueryHash, DateTime<Utc>>,
}

impl State {
    /// Status of `hash`. Empty when the query was never seen.
    pub fn status(&self, hash: &QueryHash) -> StatusRecord {
        self.status.get(hash).cloned().unwrap_or_default()
    }

    /// Every recorded status.
    pub fn statuses(&self) -> &BTreeMap<QueryHash, StatusRecord> {
        &self.status
    }

    /// Stored record for one entity.
    pub fn entity(&self, model: &str, id: &EntityId) -> Option<&EntityRecord> {
        self.data.get(model).and_then(|records| records.get(id))
    }

    /// Stored records of one model.
    pub fn model_data(&self, model: &str) -> Option<&ModelData> {
        self.data.get(model)
    }

    /// Ids a query returned.
    pub fn returned_ids(&self, hash: &QueryHash) -> Option<&ReturnedIds> {
        self.queries_to_ids.get(hash)
    }

    /// When a query's data goes stale.
    pub fn expiry(&self, hash: &QueryHash) -> Option<DateTime<Utc>> {
        self.queries_to_expiry.get(hash).copied()
    }

    /// Applies `action`.
    pub fn apply(&mut self, action: Action) {
        match action {
            Action::UpdateQueryStatuses(statuses) => {
                self.status.extend(statuses);
            }
            Action::UpdateData {
                hash,
                data,
                returned_ids,
                expires,
            } => {
                for (model, records) in data {
                    let stored = self.data.entry(model).or_default();
                    for (id, record) in records {
                        match stored.get_mut(&id) {
                            Some(existing) => {
                                existing.data.extend(record.data);
                                existing.expires = record.expires;
                                existing.deleted = false;
                            }
                            None => {
                                stored.insert(id, record);
                            }
                        }
                    }
                }
                self.queries_to_ids.insert(hash.clone(), returned_ids);
                self.queries_to_expiry.insert(hash.clone(), expires);
                self.status.insert(hash, StatusRecord::new(Status::Success));
            }
            Action::DeleteData { hash, model, id } => {
                self.data
                    .entry(model)
                    .or_default()
                    .entry(id)
                    .or_insert_with(|| EntityRecord {
                        data: Map::new(),
                        expires: Utc::now(),
                        deleted: false,
                    })
                    .deleted = true;
                self.status.insert(hash, StatusRecord::new(Status::Success));
            }
        }
    }
}

/// A state transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Replaces the status records of the given hashes.
    UpdateQueryStatuses(BTreeMap<QueryHash, StatusRecord>),
    /// Merges entity data and records a query's ids, expiry and success.
    UpdateData {
        /// Query that produced the data.
        hash: QueryHash,
        /// Normalized entity records.
        data: ModelCollection,
        /// Ids of the query's own model, in response order.
        returned_ids: ReturnedIds,
        /// When the query's data goes stale.
        expires: DateTime<Utc>,
    },
    /// Tombstones one entity and marks the DELETE query successful.
    DeleteData {
        /// DELETE query.
        hash: QueryHash,
        /// Model name.
        model: String,
        /// Deleted entity.
        id: EntityId,
    },
}

/// A subscribable state container.
pub trait StateStore: Send + Sync {
    /// Current snapshot.
    fn state(&self) -> Arc<State>;

    /// Applies `action` atomically.
    fn dispatch(&self, action: Action);
}

type Listener = Arc<dyn Fn(&State) + Send + Sync>;

/// Handle returned by [`MemoryStore::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subscription(usize);

/// In-memory [`StateStore`].
///
/// Listeners run after each dispatch, outside the store's locks, and see
/// the new snapshot.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<Arc<State>>,
    listeners: Mutex<Slab<Listener>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener called after every dispatch.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&State) + Send + Sync + 'static,
    {
        Subscription(self.listeners.lock().insert(Arc::new(listener)))
    }

    /// Removes a listener. Returns `false` if it was already removed.
    pub fn unsubscribe(&self, subscription: Subscription) -> bool {
        self.listeners.lock().try_remove(subscription.0).is_some()
    }
}

impl StateStore for MemoryStore {
    fn state(&self) -> Arc<State> {
        self.state.read().clone()
    }

    fn dispatch(&self, action: Action) {
        let snapshot = {
            let mut state = self.state.write();
            Arc::make_mut(&mut *state).apply(action);
            Arc::clone(&*state)
        };
        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener(&snapshot);
        }
    }
}

impl fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStore")
            .field("state", &*self.state.read())
            .field("listeners", &self.listeners.lock().len())
            .finish()
    }
}
