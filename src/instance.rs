//! Immutable model instances.

use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::error::ConfigError;
use crate::model::{FieldKind, Model};
use crate::store::EntityId;

/// Value held by one field of an [`Instance`].
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// No value. Only the identity field of a blank instance is unset.
    Unset,
    /// Plain JSON value.
    Value(Value),
    /// Nested entity.
    Model(Instance),
}

/// Snapshot of one entity's fields.
///
/// Instances never change; [`Instance::set`], [`Instance::merge`] and
/// [`Instance::unset_id`] return new instances.
#[derive(Clone)]
pub struct Instance {
    model: Model,
    values: Arc<Vec<FieldValue>>,
}

impl Instance {
    pub(crate) fn blank(model: Model) -> Self {
        let id_index = model.id_index();
        let values = model
            .defs()
            .iter()
            .enumerate()
            .map(|(i, def)| match &def.kind {
                _ if i == id_index => FieldValue::Unset,
                FieldKind::Value(default) => FieldValue::Value(default.clone()),
                FieldKind::Model(sub) => FieldValue::Model(sub.blank()),
            })
            .collect();
        Self {
            model,
            values: Arc::new(values),
        }
    }

    /// Builds an instance from raw data.
    ///
    /// The model's filter runs first. Unknown keys are ignored, missing
    /// fields take their defaults and objects under submodel fields become
    /// nested instances.
    pub(crate) fn from_data(model: Model, data: Map<String, Value>) -> Self {
        let mut data = model.filter_data(data);
        let mut values = Self::blank(model.clone()).values.as_ref().clone();
        for (i, def) in model.defs().iter().enumerate() {
            if let Some(value) = data.remove(&def.name) {
                values[i] = Self::field_value(&def.kind, value);
            }
        }
        Self {
            model,
            values: Arc::new(values),
        }
    }

    fn field_value(kind: &FieldKind, value: Value) -> FieldValue {
        match (kind, value) {
            (FieldKind::Model(sub), Value::Object(data)) => {
                FieldValue::Model(Instance::from_data(sub.clone(), data))
            }
            (_, value) => FieldValue::Value(value),
        }
    }

    /// The instance's model.
    pub fn model(&self) -> &Model {
        &self.model
    }

    /// Raw field value.
    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.model.index_of(field).map(|i| &self.values[i])
    }

    /// Plain JSON value of `field`. `None` for unset and nested fields.
    pub fn value(&self, field: &str) -> Option<&Value> {
        match self.get(field) {
            Some(FieldValue::Value(value)) => Some(value),
            _ => None,
        }
    }

    /// Nested instance under `field`.
    pub fn submodel(&self, field: &str) -> Option<&Instance> {
        match self.get(field) {
            Some(FieldValue::Model(instance)) => Some(instance),
            _ => None,
        }
    }

    /// Identity value, if set.
    pub fn id(&self) -> Option<&Value> {
        match &self.values[self.model.id_index()] {
            FieldValue::Value(value) => Some(value),
            _ => None,
        }
    }

    /// Identity value as a store key.
    pub fn entity_id(&self) -> Option<EntityId> {
        self.id().and_then(EntityId::from_value)
    }

    /// Whether the identity is unset, the marker for data not loaded yet.
    pub fn is_blank(&self) -> bool {
        matches!(self.values[self.model.id_index()], FieldValue::Unset)
    }

    /// Returns a copy with `field` set to `value`.
    pub fn set(&self, field: &str, value: impl Into<Value>) -> Result<Instance, ConfigError> {
        let i = self.require(field)?;
        let value = Self::field_value(&self.model.defs()[i].kind, value.into());
        Ok(self.with_value(i, value))
    }

    /// Returns a copy with the nested instance under `field` replaced.
    pub fn set_submodel(&self, field: &str, instance: Instance) -> Result<Instance, ConfigError> {
        let i = self.require(field)?;
        match &self.model.defs()[i].kind {
            FieldKind::Model(sub) if *sub == instance.model => {
                Ok(self.with_value(i, FieldValue::Model(instance)))
            }
            FieldKind::Model(sub) => Err(ConfigError::InvalidSubmodel {
                model: self.model.name().to_string(),
                field: field.to_string(),
                expected: sub.name().to_string(),
            }),
            FieldKind::Value(_) => Err(ConfigError::InvalidSubmodel {
                model: self.model.name().to_string(),
                field: field.to_string(),
                expected: instance.model.name().to_string(),
            }),
        }
    }

    /// Returns a copy with every key of `data` applied.
    ///
    /// Fails without applying anything if any key is not a field.
    pub fn merge(&self, data: Map<String, Value>) -> Result<Instance, ConfigError> {
        let missing: Vec<String> = data
            .keys()
            .filter(|key| !self.model.has_field(key))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(ConfigError::MissingFields {
                model: self.model.name().to_string(),
                fields: missing,
            });
        }
        let mut values = self.values.as_ref().clone();
        for (key, value) in data {
            if let Some(i) = self.model.index_of(&key) {
                values[i] = Self::field_value(&self.model.defs()[i].kind, value);
            }
        }
        Ok(Self {
            model: self.model.clone(),
            values: Arc::new(values),
        })
    }

    /// Returns a copy without an identity, e.g. to create a duplicate.
    pub fn unset_id(&self) -> Instance {
        self.with_value(self.model.id_index(), FieldValue::Unset)
    }

    /// Plain JSON projection. Nested instances are unwrapped and unset
    /// fields omitted.
    pub fn values(&self) -> Value {
        let map: Map<String, Value> = self
            .model
            .defs()
            .iter()
            .zip(self.values.iter())
            .filter_map(|(def, value)| match value {
                FieldValue::Unset => None,
                FieldValue::Value(value) => Some((def.name.clone(), value.clone())),
                FieldValue::Model(instance) => Some((def.name.clone(), instance.values())),
            })
            .collect();
        Value::Object(map)
    }

    fn require(&self, field: &str) -> Result<usize, ConfigError> {
        self.model
            .index_of(field)
            .ok_or_else(|| ConfigError::MissingFields {
                model: self.model.name().to_string(),
                fields: vec![field.to_string()],
            })
    }

    fn with_value(&self, i: usize, value: FieldValue) -> Instance {
        let mut values = self.values.as_ref().clone();
        values[i] = value;
        Self {
            model: self.model.clone(),
            values: Arc::new(values),
        }
    }
}

impl PartialEq for Instance {
    fn eq(&self, other: &Self) -> bool {
        self.model == other.model && self.values == other.values
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.model.name(), self.values())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn models() -> (Model, Model) {
        let user = Model::builder("user")
            .field("id", 0)
            .field("name", "")
            .build()
            .unwrap();
        let post = Model::builder("post")
            .field("id", 0)
            .field("title", "")
            .submodel("author", &user)
            .build()
            .unwrap();
        (user, post)
    }

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_blank_has_defaults_without_identity() {
        let (user, post) = models();
        let blank = post.blank();
        assert!(blank.is_blank());
        assert_eq!(blank.id(), None);
        assert_eq!(blank.values(), json!({ "title": "", "author": { "name": "" } }));
        assert_eq!(blank.submodel("author"), Some(&user.blank()));
    }

    #[test]
    fn test_from_data_builds_submodels_and_ignores_unknown_keys() {
        let (_, post) = models();
        let instance = post.instance(object(json!({
            "id": 3,
            "title": "hello",
            "extra": true,
            "author": { "id": 1, "name": "ann" }
        })));
        assert_eq!(instance.entity_id(), Some(EntityId::from("3")));
        assert_eq!(instance.submodel("author").unwrap().value("name"), Some(&json!("ann")));
        assert_eq!(instance.get("extra"), None);
    }

    #[test]
    fn test_filter_runs_before_construction() {
        let user = Model::builder("user")
            .field("id", 0)
            .field("name", "")
            .filter(|mut data| {
                if let Some(Value::String(name)) = data.get("name").cloned() {
                    data.insert("name".into(), Value::String(name.to_uppercase()));
                }
                data
            })
            .build()
            .unwrap();
        let instance = user.instance(object(json!({ "id": 1, "name": "ann" })));
        assert_eq!(instance.value("name"), Some(&json!("ANN")));
    }

    #[test]
    fn test_set_and_merge_return_new_instances() {
        let (user, _) = models();
        let blank = user.blank();
        let named = blank.set("name", "bob").unwrap();
        assert_eq!(blank.value("name"), Some(&json!("")));
        assert_eq!(named.value("name"), Some(&json!("bob")));

        let merged = named.merge(object(json!({ "id": 7 }))).unwrap();
        assert_eq!(merged.values(), json!({ "id": 7, "name": "bob" }));
        assert!(merged.unset_id().is_blank());

        let err = merged.merge(object(json!({ "nope": 1 }))).unwrap_err();
        assert!(matches!(err, ConfigError::MissingFields { .. }));
    }

    #[test]
    fn test_set_submodel_checks_model() {
        let (user, post) = models();
        let author = user.instance(object(json!({ "id": 2, "name": "cy" })));
        let instance = post.blank().set_submodel("author", author.clone()).unwrap();
        assert_eq!(instance.submodel("author"), Some(&author));
        assert!(post.blank().set_submodel("author", post.blank()).is_err());
    }
}
