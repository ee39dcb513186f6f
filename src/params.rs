//! Query parameters.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;

/// Named query parameters.
///
/// A parameter is either a defined JSON value or *unresolved*: the
/// placeholder used when the value depends on another query that has not
/// produced data yet. Queries holding an unresolved parameter are never sent
/// to a driver.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params(BTreeMap<String, Option<Value>>);

impl Params {
    /// Creates an empty parameter set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a defined parameter.
    pub fn set(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(name.into(), Some(value.into()));
        self
    }

    /// Adds a parameter that may still be unresolved.
    pub fn set_opt<V: Into<Value>>(mut self, name: impl Into<String>, value: Option<V>) -> Self {
        self.0.insert(name.into(), value.map(Into::into));
        self
    }

    /// Adds an unresolved parameter.
    pub fn unresolved(mut self, name: impl Into<String>) -> Self {
        self.0.insert(name.into(), None);
        self
    }

    /// Inserts a parameter in place, returning the previous entry.
    pub fn insert(&mut self, name: impl Into<String>, value: Option<Value>) -> Option<Option<Value>> {
        self.0.insert(name.into(), value)
    }

    /// The defined value of `name`, if any.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name).and_then(Option::as_ref)
    }

    /// Whether `name` is present, defined or not.
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Whether `name` is present with a defined value.
    pub fn is_defined(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Whether any parameter is unresolved.
    pub fn has_unresolved(&self) -> bool {
        self.0.values().any(Option::is_none)
    }

    /// Names of the unresolved parameters.
    pub fn unresolved_names(&self) -> impl Iterator<Item = &str> {
        self.0
            .iter()
            .filter(|(_, value)| value.is_none())
            .map(|(name, _)| name.as_str())
    }

    /// Number of parameters, defined or not.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` when there are no parameters.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates every parameter in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&Value>)> {
        self.0.iter().map(|(name, value)| (name.as_str(), value.as_ref()))
    }

    /// Defined parameters as a JSON object, for drivers building requests.
    pub fn to_json(&self) -> Value {
        Value::Object(
            self.0
                .iter()
                .filter_map(|(name, value)| value.clone().map(|value| (name.clone(), value)))
                .collect(),
        )
    }
}

/// Canonical rendering used inside query hashes. Keys are in sorted order and
/// unresolved values render as `undefined`.
impl fmt::Display for Params {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (name, value)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}:", Value::String(name.clone()))?;
            match value {
                Some(value) => write!(f, "{}", value)?,
                None => f.write_str("undefined")?,
            }
        }
        f.write_str("}")
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Params {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Params(
            iter.into_iter()
                .map(|(name, value)| (name.into(), Some(value.into())))
                .collect(),
        )
    }
}
