//! The satisfiability chain deciding whether a source can serve a query.
//!
//! Checks run cheapest first and stop at the first failure.

use crate::kind::ReturnType;
use crate::provider::Returns;
use crate::query::Query;
use crate::source::SourceDefinition;

type Check = fn(&SourceDefinition, &Query) -> bool;

const CHAIN: [Check; 5] = [
    satisfies_kind,
    satisfies_model,
    satisfies_params,
    satisfies_fields,
    satisfies_return_type,
];

/// Whether `source` can serve `query`.
pub fn satisfies(source: &SourceDefinition, query: &Query) -> bool {
    CHAIN.iter().all(|check| check(source, query))
}

/// The source serves the query's operation kind.
pub fn satisfies_kind(source: &SourceDefinition, query: &Query) -> bool {
    source.kind() == query.kind()
}

/// The source serves the query's model.
pub fn satisfies_model(source: &SourceDefinition, query: &Query) -> bool {
    source.models().contains(query.model())
}

/// Every required parameter has a defined value, from the query or from a
/// source default. A source without parameters only serves queries without
/// parameters.
pub fn satisfies_params(source: &SourceDefinition, query: &Query) -> bool {
    let params = query.params();
    if source.has_no_params() {
        return params.is_empty();
    }
    source.params().iter().all(|spec| {
        params.is_defined(spec.name())
            || spec.default().is_some()
            || source
                .optional_params()
                .iter()
                .any(|opt| opt.name() == spec.name() && opt.default().is_some())
    })
}

/// The source returns every requested field of the query's model.
pub fn satisfies_fields(source: &SourceDefinition, query: &Query) -> bool {
    if query.return_type() == Some(ReturnType::None) {
        return true;
    }
    if !query.kind().is_get() && matches!(source.returns(), Returns::None) {
        return true;
    }
    match source.provider_for(query.model()) {
        Some(provider) => provider.fields().covers(query.fields()),
        None => false,
    }
}

/// The provider returns an item or a list as the query expects.
pub fn satisfies_return_type(source: &SourceDefinition, query: &Query) -> bool {
    let Some(expected) = query.return_type() else {
        return true;
    };
    if !query.kind().is_get() {
        return true;
    }
    source
        .provider_for(query.model())
        .map_or(false, |provider| provider.return_type() == expected)
}
