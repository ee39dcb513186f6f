//! Tests for query deduplication, batching and completion handling.

mod common;

use common::{
    deferred_manager, mock_manager, user_model, Callbacks, CollectingTracer, CountingStore,
    DeferredDriver, MockDriver,
};
use pretty_assertions::assert_eq;
use query_source::{Fields, Manager, Params, SourceDefinition, StateStore, Status};
use serde_json::json;

fn user_sources(manager: &Manager, driver: &str, meta: serde_json::Value) {
    let user = user_model();
    manager
        .add_sources(
            driver,
            vec![SourceDefinition::builder()
                .returns(user.item(Fields::All).unwrap())
                .param("id")
                .meta(meta)],
        )
        .unwrap();
}

// =============================================================================
// Deduplication
// =============================================================================

#[test]
fn test_identical_pending_queries_share_one_request() {
    let (manager, driver) = deferred_manager();
    user_sources(&manager, "deferred", json!({}));
    let user = user_model();
    let callbacks = Callbacks::new();

    let a = callbacks.attach(user.get_item(Params::new().set("id", 1)));
    let b = callbacks.attach(user.get_item(Params::new().set("id", 1)));
    manager.add_query(a.clone());
    manager.add_query(b.clone());
    manager.resolve();

    assert_eq!(driver.calls(), 1);
    assert_eq!(manager.resolver().duplicates(&a).len(), 1);

    driver.succeed_next(json!({ "id": 1, "name": "Ada" }));

    assert_eq!(callbacks.results().len(), 2);
    assert_eq!(manager.resolver().status(&a), Some(Status::Success));
    assert_eq!(manager.resolver().status(&b), Some(Status::Success));
}

#[test]
fn test_adding_the_same_query_twice_is_ignored() {
    let (manager, driver) = deferred_manager();
    user_sources(&manager, "deferred", json!({}));
    let user = user_model();

    let query = user.get_item(Params::new().set("id", 1));
    manager.add_query(query.clone());
    manager.add_query(query.clone());
    manager.resolve();

    assert_eq!(driver.calls(), 1);
    assert!(manager.resolver().duplicates(&query).is_empty());
}

#[test]
fn test_query_added_while_in_flight_becomes_duplicate() {
    let (manager, driver) = deferred_manager();
    user_sources(&manager, "deferred", json!({}));
    let user = user_model();
    let callbacks = Callbacks::new();

    let first = user.get_item(Params::new().set("id", 1));
    manager.add_query(first.clone());
    manager.resolve();
    assert_eq!(manager.resolver().in_flight().len(), 1);

    let second = callbacks.attach(user.get_item(Params::new().set("id", 1)));
    manager.add_query(second.clone());
    assert_eq!(manager.resolver().status(&second), Some(Status::Pending));
    manager.resolve();
    assert_eq!(driver.calls(), 1);

    driver.succeed_next(json!({ "id": 1, "name": "Ada" }));
    assert_eq!(
        callbacks.results(),
        vec![Ok::<_, String>(json!({ "id": 1, "name": "Ada" }))]
    );
    assert_eq!(manager.resolver().status(&second), Some(Status::Success));
    assert!(manager.resolver().in_flight().is_empty());
}

#[test]
fn test_default_params_reach_duplicates() {
    let (manager, driver) = deferred_manager();
    let user = user_model();
    manager
        .add_sources(
            "deferred",
            vec![SourceDefinition::builder()
                .returns(user.item(Fields::All).unwrap())
                .param("id")
                .optional_param_default("expand", "profile")],
        )
        .unwrap();

    let a = user.get_item(Params::new().set("id", 1));
    let b = user.get_item(Params::new().set("id", 1));
    manager.add_query(a.clone());
    manager.add_query(b.clone());
    manager.resolve();
    assert_eq!(driver.calls(), 1);

    let resolved_a = manager.resolver().resolved_query(&a).unwrap();
    let resolved_b = manager.resolver().resolved_query(&b).unwrap();
    assert_eq!(resolved_a.params().get("expand"), Some(&json!("profile")));
    assert_eq!(resolved_a.hash(), resolved_b.hash());
    assert_ne!(resolved_a.hash(), a.hash());
    assert!(manager.query_status(&b).is_pending());
}

// =============================================================================
// Batching
// =============================================================================

#[test]
fn test_one_status_write_per_pass() {
    let store = CountingStore::new();
    let driver = DeferredDriver::new();
    let manager = Manager::builder()
        .store(store.shared())
        .driver("deferred", driver.clone())
        .build();
    user_sources(&manager, "deferred", json!({}));
    let user = user_model();

    for id in 1..=3 {
        manager.add_query(user.get_item(Params::new().set("id", id)));
    }
    manager.resolve();

    assert_eq!(driver.calls(), 3);
    assert_eq!(store.writes(), 1);
    assert_eq!(store.store.state().statuses().len(), 3);
}

#[test]
fn test_resolve_twice_writes_nothing_new() {
    let store = CountingStore::new();
    let driver = MockDriver::new();
    let manager = Manager::builder()
        .store(store.shared())
        .driver("mock", driver.clone())
        .build();
    user_sources(&manager, "mock", json!({ "returns": { "id": 1, "name": "Ada" } }));
    let user = user_model();

    let query = user.get_item(Params::new().set("id", 1));
    manager.add_query(query.clone());
    manager.resolve();
    let writes = store.writes();

    manager.resolve();
    manager.add_query(query.clone());
    manager.resolve();

    assert_eq!(store.writes(), writes);
    assert_eq!(driver.calls(), 1);
}

// =============================================================================
// Cache interaction
// =============================================================================

#[test]
fn test_fresh_cache_skips_the_driver() {
    let (manager, driver) = mock_manager();
    user_sources(
        &manager,
        "mock",
        json!({ "returns": { "id": 1, "name": "Ada" }, "cache_control": "max-age=3600" }),
    );
    let user = user_model();
    let callbacks = Callbacks::new();

    manager.add_query(user.get_item(Params::new().set("id", 1)));
    manager.resolve();
    assert_eq!(driver.calls(), 1);

    let again = callbacks.attach(user.get_item(Params::new().set("id", 1)));
    manager.add_query(again.clone());
    manager.resolve();

    assert_eq!(driver.calls(), 1);
    assert_eq!(
        callbacks.results(),
        vec![Ok::<_, String>(json!({ "id": 1, "name": "Ada" }))]
    );
}

#[test]
fn test_stale_cache_refetches() {
    let (manager, driver) = mock_manager();
    user_sources(&manager, "mock", json!({ "returns": { "id": 1, "name": "Ada" } }));
    let user = user_model();

    manager.add_query(user.get_item(Params::new().set("id", 1)));
    manager.resolve();
    manager.add_query(user.get_item(Params::new().set("id", 1)));
    manager.resolve();

    assert_eq!(driver.calls(), 2);
}

// =============================================================================
// Failures
// =============================================================================

#[test]
fn test_failed_query_is_not_retried_until_forced() {
    let (manager, driver) = deferred_manager();
    user_sources(&manager, "deferred", json!({}));
    let user = user_model();

    let query = user.get_item(Params::new().set("id", 1));
    manager.add_query(query.clone());
    manager.resolve();
    driver.fail_next("boom", Some(503));

    let status = manager.query_status(&query);
    assert!(status.is_error());
    assert_eq!(status.code, Some(503));
    assert_eq!(status.error.as_deref(), Some("boom"));

    let retry = user.get_item(Params::new().set("id", 1));
    manager.add_query(retry);
    manager.resolve();
    assert_eq!(driver.calls(), 1);

    manager.reload(&query);
    assert_eq!(driver.calls(), 2);
    assert!(manager.query_status(&query).is_pending());

    driver.succeed_next(json!({ "id": 1, "name": "Ada" }));
    assert!(manager.query_status(&query).is_success());
}

#[test]
fn test_forced_duplicate_resets_pending_parent() {
    let (manager, driver) = deferred_manager();
    user_sources(&manager, "deferred", json!({}));
    let user = user_model();

    let parent = user.get_item(Params::new().set("id", 1));
    let forced = user.get_item(Params::new().set("id", 1)).forced();
    manager.add_query(parent.clone());
    manager.add_query(forced.clone());
    manager.resolve();

    assert_eq!(driver.calls(), 1);
    assert_eq!(manager.resolver().duplicates(&parent).len(), 1);
}

#[test]
fn test_released_query_gets_no_callback() {
    let (manager, driver) = deferred_manager();
    user_sources(&manager, "deferred", json!({}));
    let user = user_model();
    let callbacks = Callbacks::new();

    let query = callbacks.attach(user.get_item(Params::new().set("id", 1)));
    manager.add_query(query.clone());
    manager.resolve();
    manager.release(&query);

    driver.succeed_next(json!({ "id": 1 }));
    assert!(callbacks.results().is_empty());
    assert!(manager.query_status(&query).is_success());
    assert!(manager.resolver().in_flight().is_empty());
}

#[test]
fn test_released_in_flight_query_hands_over_to_duplicate() {
    let (manager, driver) = deferred_manager();
    user_sources(&manager, "deferred", json!({}));
    let user = user_model();
    let callbacks = Callbacks::new();

    let first = user.get_item(Params::new().set("id", 1));
    manager.add_query(first.clone());
    manager.resolve();

    let second = callbacks.attach(user.get_item(Params::new().set("id", 1)));
    manager.add_query(second.clone());
    manager.release(&first);
    assert_eq!(manager.resolver().in_flight().len(), 1);

    driver.succeed_next(json!({ "id": 1, "name": "Ada" }));

    assert_eq!(
        callbacks.results(),
        vec![Ok::<_, String>(json!({ "id": 1, "name": "Ada" }))]
    );
    assert_eq!(manager.resolver().status(&second), Some(Status::Success));
    assert!(manager.resolver().in_flight().is_empty());

    let map = [("user".to_string(), second)].into_iter().collect();
    assert!(manager.props(&map).status("user").unwrap().is_success());
}

#[test]
fn test_released_pending_query_hands_over_to_duplicate() {
    let (manager, driver) = deferred_manager();
    user_sources(&manager, "deferred", json!({}));
    let user = user_model();
    let callbacks = Callbacks::new();

    let first = user.get_item(Params::new().set("id", 1));
    let second = callbacks.attach(user.get_item(Params::new().set("id", 1)));
    manager.add_query(first.clone());
    manager.add_query(second.clone());
    manager.release(&first);
    manager.resolve();

    assert_eq!(driver.calls(), 1);
    assert_eq!(manager.resolver().pending().len(), 0);
    driver.succeed_next(json!({ "id": 1, "name": "Ada" }));
    assert_eq!(callbacks.results().len(), 1);
    assert_eq!(manager.resolver().status(&second), Some(Status::Success));
}

#[test]
fn test_query_added_after_release_is_dispatched_again() {
    let (manager, driver) = deferred_manager();
    user_sources(&manager, "deferred", json!({}));
    let user = user_model();
    let callbacks = Callbacks::new();

    let first = user.get_item(Params::new().set("id", 1));
    manager.add_query(first.clone());
    manager.resolve();
    manager.release(&first);

    let second = callbacks.attach(user.get_item(Params::new().set("id", 1)));
    manager.add_query(second.clone());
    manager.resolve();
    assert_eq!(driver.calls(), 2);

    driver.succeed_next(json!({ "id": 1, "name": "Old" }));
    assert!(callbacks.results().is_empty());
    driver.succeed_next(json!({ "id": 1, "name": "New" }));
    assert_eq!(
        callbacks.results(),
        vec![Ok::<_, String>(json!({ "id": 1, "name": "New" }))]
    );
}

#[test]
fn test_cache_shape_error_becomes_query_error() {
    let (manager, driver) = deferred_manager();
    user_sources(&manager, "deferred", json!({}));
    let user = user_model();
    let callbacks = Callbacks::new();

    let query = callbacks.attach(user.get_item(Params::new().set("id", 1)));
    manager.add_query(query.clone());
    manager.resolve();
    driver.succeed_next(json!([1, 2, 3]));

    assert_eq!(
        callbacks.results(),
        vec![Err::<serde_json::Value, _>("expected an object of `user` data".to_string())]
    );
    assert!(manager.query_status(&query).is_error());
    assert_eq!(manager.resolver().status(&query), Some(Status::Error));
}

// =============================================================================
// Tracing
// =============================================================================

#[test]
fn test_tracer_sees_resolution_events() {
    let tracer = CollectingTracer::new();
    let driver = MockDriver::new();
    let manager = Manager::builder()
        .driver("mock", driver)
        .tracer(tracer.clone())
        .build();
    user_sources(&manager, "mock", json!({ "returns": { "id": 1 } }));
    let user = user_model();

    manager.add_query(user.get_item(Params::new().set("id", 1)));
    manager.add_query(user.get_item(Params::new().set("id", 1)));
    manager.resolve();

    assert_eq!(
        tracer.events(),
        vec![
            "added:user:Registered",
            "added:user:Duplicate",
            "start:1",
            "resolution:user:Dispatched",
            "flush:1",
            "complete:user:Success",
            "end:1",
        ]
    );
}
