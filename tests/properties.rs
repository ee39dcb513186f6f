//! Property tests for field ordering and query identity.

mod common;

use std::collections::BTreeMap;

use common::user_model;
use proptest::prelude::*;
use query_source::{Fields, Params};

const FIELDS: [&str; 3] = ["email", "id", "name"];

fn arb_field() -> impl Strategy<Value = String> {
    prop_oneof![
        Just(FIELDS[0].to_string()),
        Just(FIELDS[1].to_string()),
        Just(FIELDS[2].to_string()),
    ]
}

fn arb_params() -> impl Strategy<Value = BTreeMap<String, i64>> {
    prop::collection::btree_map("[a-z]{1,6}", any::<i64>(), 0..5)
}

proptest! {
    #[test]
    fn prop_requested_fields_are_sorted(fields in prop::collection::vec(arb_field(), 1..6)) {
        let user = user_model();
        let query = user.get_item_fields(fields.clone(), Params::new()).unwrap();

        let mut expected = fields;
        expected.sort();
        expected.dedup();
        prop_assert_eq!(query.fields(), &Fields::Only(expected));
    }

    #[test]
    fn prop_equal_components_give_equal_hashes(params in arb_params()) {
        let user = user_model();
        let forward: Params = params.iter().map(|(k, v)| (k.clone(), *v)).collect();
        let backward: Params = params.iter().rev().map(|(k, v)| (k.clone(), *v)).collect();

        let a = user.get_list(forward);
        let b = user.get_list(backward);
        prop_assert!(a.is(&b));
        prop_assert_eq!(a.hash(), b.hash());
    }

    #[test]
    fn prop_changed_param_flips_identity(params in arb_params(), name in "[a-z]{1,6}", value in any::<i64>()) {
        let user = user_model();
        let base: Params = params.iter().map(|(k, v)| (k.clone(), *v)).collect();
        let changed = base.clone().set(name.clone(), value);
        prop_assume!(params.get(&name) != Some(&value));

        let a = user.get_list(base);
        let b = user.get_list(changed);
        prop_assert!(!a.is(&b));
        prop_assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn prop_unresolved_param_blocks_only_itself(params in arb_params(), name in "[A-Z]{1,4}") {
        let base: Params = params.iter().map(|(k, v)| (k.clone(), *v)).collect();
        let blocked = base.clone().unresolved(name.clone());

        prop_assert!(!base.has_unresolved());
        prop_assert!(blocked.has_unresolved());
        prop_assert_eq!(blocked.unresolved_names().collect::<Vec<_>>(), vec![name.as_str()]);
        prop_assert_eq!(blocked.to_json(), base.to_json());
    }
}
