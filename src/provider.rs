//! Providers: what a source definition returns.

use crate::error::ConfigError;
use crate::kind::{Fields, ReturnType};
use crate::model::Model;

/// A model, a field selection and whether one or many entities come back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provider {
    model: Model,
    fields: Fields,
    return_type: ReturnType,
}

impl Provider {
    pub(crate) fn new(
        model: Model,
        fields: Fields,
        return_type: ReturnType,
    ) -> Result<Self, ConfigError> {
        model.assert_fields_exist(&fields)?;
        Ok(Self {
            model,
            fields,
            return_type,
        })
    }

    /// Model returned.
    pub fn model(&self) -> &Model {
        &self.model
    }

    /// Fields returned.
    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    /// Item or list.
    pub fn return_type(&self) -> ReturnType {
        self.return_type
    }
}

/// Everything a source definition returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Returns {
    /// The source returns no data.
    None,
    /// The whole response is data for one provider.
    Single(Provider),
    /// The response is an object; each key holds data for one provider.
    ///
    /// A source with named returns is always treated as polymorphic, even
    /// with a single entry.
    Named(Vec<(String, Provider)>),
}

impl Returns {
    /// Whether this is [`Returns::None`].
    pub fn is_none(&self) -> bool {
        matches!(self, Returns::None)
    }

    /// Whether responses are keyed by provider name.
    pub fn is_polymorphic(&self) -> bool {
        matches!(self, Returns::Named(_))
    }

    /// Iterates every provider with its response key, `None` for a single
    /// provider.
    pub fn providers(&self) -> Vec<(Option<&str>, &Provider)> {
        match self {
            Returns::None => Vec::new(),
            Returns::Single(provider) => vec![(None, provider)],
            Returns::Named(named) => named
                .iter()
                .map(|(name, provider)| (Some(name.as_str()), provider))
                .collect(),
        }
    }

    /// The first provider returning `model`.
    pub fn provider_for(&self, model: &Model) -> Option<&Provider> {
        self.providers()
            .into_iter()
            .map(|(_, provider)| provider)
            .find(|provider| provider.model() == model)
    }

    /// Distinct models returned, in declaration order.
    pub fn models(&self) -> Vec<Model> {
        let mut models: Vec<Model> = Vec::new();
        for (_, provider) in self.providers() {
            if !models.contains(provider.model()) {
                models.push(provider.model().clone());
            }
        }
        models
    }
}

impl From<Provider> for Returns {
    fn from(provider: Provider) -> Self {
        Returns::Single(provider)
    }
}
