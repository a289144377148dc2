use mirra_link::{
    Backend, EventHandler, LinkConfig, LinkError, RemoteBackend, RemoteStore, SourceLink,
};
use mirra_types::{ModelId, SourceDiff, SourceEvent, Ticket};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn make_backend() -> (RemoteBackend, Arc<RemoteStore>) {
    let store = Arc::new(RemoteStore::new());
    (RemoteBackend::new(store.clone(), test_config()), store)
}

fn test_config() -> LinkConfig {
    LinkConfig {
        subscribe_retries: 3,
        retry_backoff_ms: 1,
        flush_timeout_ms: 1_000,
    }
}

fn collector() -> (EventHandler, Arc<Mutex<Vec<SourceEvent>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let handler: EventHandler = Arc::new(move |event| sink.lock().unwrap().push(event));
    (handler, seen)
}

fn labels(seen: &Arc<Mutex<Vec<SourceEvent>>>) -> Vec<&'static str> {
    seen.lock().unwrap().iter().map(SourceEvent::label).collect()
}

/// Push delivery is asynchronous; poll until the subscriber saw `n` events.
async fn wait_for_events(seen: &Arc<Mutex<Vec<SourceEvent>>>, n: usize) {
    for _ in 0..500 {
        if seen.lock().unwrap().len() >= n {
            return;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!(
        "expected {n} events, saw {:?}",
        labels(seen)
    );
}

// ── Push delivery ────────────────────────────────────────────────

#[tokio::test]
async fn subscriber_observes_snapshot_then_changes_in_order() {
    let (backend, _store) = make_backend();
    let diff = SourceDiff::new("project", "p");
    let id = diff.source_id;
    backend.create_source(None, diff).await.unwrap();

    let link = backend.link(id);
    let (handler, seen) = collector();
    link.set_handler(ModelId::new(), handler).await.unwrap();

    link.set_field("name", json!("one")).await.unwrap();
    link.set_field("name", json!("two")).await.unwrap();

    wait_for_events(&seen, 3).await;
    assert_eq!(labels(&seen), vec!["added", "modified", "modified"]);
    // Per-record order is preserved through the push channel.
    assert_eq!(seen.lock().unwrap()[1].diff().unwrap().name, "one");
    assert_eq!(seen.lock().unwrap()[2].diff().unwrap().name, "two");
}

#[tokio::test]
async fn child_creation_notifies_parent_subscriber() {
    let (backend, _store) = make_backend();
    let parent = SourceDiff::new("project", "p");
    let pid = parent.source_id;
    backend.create_source(None, parent).await.unwrap();

    let link = backend.link(pid);
    let (handler, seen) = collector();
    link.set_handler(ModelId::new(), handler).await.unwrap();

    let child = SourceDiff::new("system", "c");
    backend.create_source(Some(pid), child).await.unwrap();

    wait_for_events(&seen, 2).await;
    assert_eq!(labels(&seen), vec!["added", "child-added"]);
}

#[tokio::test]
async fn removal_pushes_removed_to_every_descendant_subscriber() {
    let (backend, store) = make_backend();
    let root = SourceDiff::new("project", "p");
    let rid = root.source_id;
    backend.create_source(None, root).await.unwrap();
    let child = SourceDiff::new("system", "c");
    let cid = child.source_id;
    backend.create_source(Some(rid), child).await.unwrap();

    let (child_handler, child_seen) = collector();
    backend
        .link(cid)
        .set_handler(ModelId::new(), child_handler)
        .await
        .unwrap();

    backend.link(rid).remove().await.unwrap();
    assert!(!store.exists(rid));
    assert!(!store.exists(cid));

    wait_for_events(&child_seen, 2).await;
    assert_eq!(labels(&child_seen), vec!["added", "removed"]);
}

// ── Subscription contract ────────────────────────────────────────

#[tokio::test]
async fn duplicate_subscribe_is_rejected() {
    let (backend, _store) = make_backend();
    let diff = SourceDiff::new("system", "s");
    let id = diff.source_id;
    backend.create_source(None, diff).await.unwrap();

    let link = backend.link(id);
    let requester = ModelId::new();
    let (first, first_seen) = collector();
    let (second, _second_seen) = collector();

    link.set_handler(requester, first).await.unwrap();
    let err = link.set_handler(requester, second).await.unwrap_err();
    assert!(matches!(err, LinkError::AlreadySubscribed));

    link.set_field("name", json!("still-mine")).await.unwrap();
    wait_for_events(&first_seen, 2).await;
}

#[tokio::test]
async fn subscribe_to_missing_record_fails_without_retry_exhaustion() {
    let (backend, _store) = make_backend();
    let link = backend.link(mirra_types::SourceId::new());
    let (handler, _seen) = collector();
    // EntityMissing is terminal, not transient: no retries, immediate error.
    let err = link.set_handler(ModelId::new(), handler).await.unwrap_err();
    assert!(matches!(err, LinkError::EntityMissing(_)));
}

// ── Bounded retry policy ─────────────────────────────────────────

#[tokio::test]
async fn transient_subscribe_failures_are_retried_within_budget() {
    let (backend, store) = make_backend();
    let diff = SourceDiff::new("system", "s");
    let id = diff.source_id;
    backend.create_source(None, diff).await.unwrap();

    store.fail_next_writes(2);
    let link = backend.link(id);
    let (handler, seen) = collector();
    link.set_handler(ModelId::new(), handler).await.unwrap();
    wait_for_events(&seen, 1).await;
}

#[tokio::test]
async fn retry_budget_exhaustion_surfaces_the_failure() {
    let store = Arc::new(RemoteStore::new());
    let backend = RemoteBackend::new(
        store.clone(),
        LinkConfig {
            subscribe_retries: 2,
            retry_backoff_ms: 1,
            flush_timeout_ms: 1_000,
        },
    );
    let diff = SourceDiff::new("system", "s");
    let id = diff.source_id;
    backend.create_source(None, diff).await.unwrap();

    store.fail_next_writes(10);
    let (handler, _seen) = collector();
    let err = backend
        .link(id)
        .set_handler(ModelId::new(), handler)
        .await
        .unwrap_err();
    assert!(matches!(err, LinkError::Backend(_)));
}

// ── Tickets ──────────────────────────────────────────────────────

#[tokio::test]
async fn ticket_roundtrip_applies_staged_value() {
    let (backend, store) = make_backend();
    let diff = SourceDiff::new("value", "v");
    let id = diff.source_id;
    backend.create_source(None, diff).await.unwrap();

    let link = backend.link(id);
    link.insert_ticket(Ticket::rename(id, "pushed")).await.unwrap();
    let applied = link.process_tickets().await.unwrap();

    assert_eq!(applied, 1);
    assert_eq!(store.diff_of(id).unwrap().name, "pushed");
    assert_eq!(store.queued_tickets(id), 0);
}

#[tokio::test]
async fn partial_flush_keeps_remainder_for_retry() {
    let (backend, store) = make_backend();
    let diff = SourceDiff::new("value", "v");
    let id = diff.source_id;
    backend.create_source(None, diff).await.unwrap();

    let link = backend.link(id);
    link.insert_ticket(Ticket::rename(id, "a")).await.unwrap();
    link.insert_ticket(Ticket::rename(id, "b")).await.unwrap();

    store.fail_next_writes(1);
    assert!(link.process_tickets().await.is_err());
    assert_eq!(store.queued_tickets(id), 2);

    assert_eq!(link.process_tickets().await.unwrap(), 2);
    assert_eq!(store.diff_of(id).unwrap().name, "b");
}
