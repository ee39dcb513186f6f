//! Tests for query construction, structural equality and hashing.

mod common;

use common::{post_model, user_model};
use pretty_assertions::assert_eq;
use query_source::{ConfigError, Fields, Params, Query, QueryKind, ReturnType};
use serde_json::json;

// =============================================================================
// Construction
// =============================================================================

#[test]
fn test_get_item_fields_sorts_fields() {
    let user = user_model();
    let query = user
        .get_item_fields(["name", "id", "email"], Params::new().set("id", 1))
        .unwrap();

    assert_eq!(
        query.fields(),
        &Fields::Only(vec!["email".into(), "id".into(), "name".into()])
    );
    assert_eq!(query.kind(), QueryKind::Get);
    assert_eq!(query.return_type(), Some(ReturnType::Item));
}

#[test]
fn test_unknown_fields_are_rejected() {
    let user = user_model();
    let err = user
        .get_list_fields(["name", "age", "height"], Params::new())
        .unwrap_err();

    assert_eq!(
        err,
        ConfigError::MissingFields {
            model: "user".into(),
            fields: vec!["age".into(), "height".into()],
        }
    );
    assert_eq!(
        err.to_string(),
        "All fields must be defined within your model. Missing: age, height"
    );
}

#[test]
fn test_builder_defaults() {
    let user = user_model();
    let query = Query::builder(&user).build().unwrap();

    assert_eq!(query.kind(), QueryKind::Get);
    assert_eq!(query.fields(), &Fields::All);
    assert_eq!(query.return_type(), None);
    assert!(query.params().is_empty());
    assert!(query.body().is_none());
    assert!(!query.is_forced());
}

// =============================================================================
// Structural equality
// =============================================================================

#[test]
fn test_identical_queries_are_equal() {
    let user = user_model();
    let a = user.get_item(Params::new().set("id", 1));
    let b = user.get_item(Params::new().set("id", 1));

    assert_ne!(a.id(), b.id());
    assert!(a.is(&b));
    assert_eq!(a.hash(), b.hash());
}

#[test]
fn test_changing_any_component_flips_is() {
    let user = user_model();
    let post = post_model();
    let base = user.get_item(Params::new().set("id", 1));

    let variants = vec![
        post.get_item(Params::new().set("id", 1)),
        user.get_item_fields(["name"], Params::new().set("id", 1)).unwrap(),
        user.get_list(Params::new().set("id", 1)),
        user.get_item(Params::new().set("id", 2)),
        Query::builder(&user)
            .kind(QueryKind::Update)
            .return_type(ReturnType::Item)
            .param("id", 1)
            .build()
            .unwrap(),
        Query::builder(&user)
            .return_type(ReturnType::Item)
            .param("id", 1)
            .body(json!({ "name": "x" }))
            .build()
            .unwrap(),
    ];

    for variant in variants {
        assert!(!base.is(&variant), "{} should differ from {}", variant, base);
        assert_ne!(base.hash(), variant.hash());
    }
}

#[test]
fn test_callback_and_force_do_not_affect_identity() {
    let user = user_model();
    let a = user.get_list(Params::new());
    let b = user.get_list(Params::new()).forced().with_callback(|_| {});

    assert!(a.is(&b));
    assert_eq!(a.hash(), b.hash());
}

// =============================================================================
// Hash format
// =============================================================================

#[test]
fn test_hash_lists_params_sorted() {
    let post = post_model();
    let query = post.get_list(Params::new().set("title", "x").set("author_id", 3));

    assert_eq!(
        query.to_string(),
        r#"Query(Model: post, Fields: *, Params: {"author_id":3,"title":"x"}, Body: undefined, QueryType: GET), ReturnType: LIST)"#
    );
}

#[test]
fn test_hash_marks_unresolved_params() {
    let post = post_model();
    let query = post.get_list(Params::new().unresolved("author_id"));

    assert!(query.params().has_unresolved());
    assert!(query.hash().as_str().contains(r#"{"author_id":undefined}"#));
}

#[test]
fn test_hash_of_mutation_includes_body() {
    let user = user_model();
    let instance = user
        .blank()
        .set("id", 7)
        .unwrap()
        .set("name", "Grace")
        .unwrap();
    let query = Query::update(&instance).build().unwrap();

    assert_eq!(
        query.hash().as_str(),
        r#"Query(Model: user, Fields: *, Params: {}, Body: {"email":"","id":7,"name":"Grace"}, QueryType: UPDATE), ReturnType: )"#
    );
}
