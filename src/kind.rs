//! Query kinds, return types and field selections.

use std::fmt;

use serde::Serialize;

/// The operation a query performs against its model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueryKind {
    /// Reads one or more entities.
    Get,
    /// Creates an entity.
    Create,
    /// Updates an existing entity.
    Update,
    /// Deletes an existing entity.
    Delete,
}

impl QueryKind {
    /// Canonical upper-case name used in query hashes.
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryKind::Get => "GET",
            QueryKind::Create => "CREATE",
            QueryKind::Update => "UPDATE",
            QueryKind::Delete => "DELETE",
        }
    }

    /// Returns `true` for [`QueryKind::Get`].
    pub fn is_get(&self) -> bool {
        matches!(self, QueryKind::Get)
    }
}

impl fmt::Display for QueryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shape of the data a provider returns or a query expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReturnType {
    /// A single entity.
    Item,
    /// An ordered list of entities.
    List,
    /// No data. Only valid for non-GET queries.
    None,
}

impl ReturnType {
    /// Canonical upper-case name used in query hashes.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReturnType::Item => "ITEM",
            ReturnType::List => "LIST",
            ReturnType::None => "NONE",
        }
    }
}

impl fmt::Display for ReturnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fields requested by a query or returned by a provider.
///
/// `Only` always holds a sorted, de-duplicated list; build it through
/// [`Fields::only`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Fields {
    /// Every field of the model.
    All,
    /// A subset of the model's fields.
    Only(Vec<String>),
}

impl Fields {
    /// Builds a sorted, de-duplicated field subset.
    pub fn only<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut fields: Vec<String> = fields.into_iter().map(Into::into).collect();
        fields.sort();
        fields.dedup();
        Fields::Only(fields)
    }

    /// Returns `true` for [`Fields::All`].
    pub fn is_all(&self) -> bool {
        matches!(self, Fields::All)
    }

    /// The explicit field names, or `None` for [`Fields::All`].
    pub fn names(&self) -> Option<&[String]> {
        match self {
            Fields::All => None,
            Fields::Only(fields) => Some(fields),
        }
    }

    /// Whether this selection covers every field in `other`.
    pub fn covers(&self, other: &Fields) -> bool {
        match (self, other) {
            (Fields::All, _) => true,
            (Fields::Only(_), Fields::All) => false,
            (Fields::Only(ours), Fields::Only(theirs)) => {
                theirs.iter().all(|field| ours.binary_search(field).is_ok())
            }
        }
    }
}

impl<S: Into<String>, const N: usize> From<[S; N]> for Fields {
    fn from(fields: [S; N]) -> Self {
        Fields::only(fields)
    }
}

impl<S: Into<String>> From<Vec<S>> for Fields {
    fn from(fields: Vec<S>) -> Self {
        Fields::only(fields)
    }
}

impl fmt::Display for Fields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fields::All => f.write_str("*"),
            Fields::Only(fields) => f.write_str(&fields.join(", ")),
        }
    }
}
