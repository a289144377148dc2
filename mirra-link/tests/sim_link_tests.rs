use mirra_link::{Backend, EventHandler, LinkError, SimBackend, SimStore, SourceLink};
use mirra_types::{ModelId, SourceDiff, SourceEvent, Ticket};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::{Arc, Mutex};

fn make_backend() -> (SimBackend, Arc<SimStore>) {
    let store = Arc::new(SimStore::new());
    (SimBackend::new(store.clone()), store)
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

// ── Records ──────────────────────────────────────────────────────

#[tokio::test]
async fn create_and_inspect() {
    let (backend, store) = make_backend();
    let diff = SourceDiff::new("project", "p");
    let id = diff.source_id;

    backend.create_source(None, diff).await.unwrap();
    assert!(store.exists(id));
    assert_eq!(store.diff_of(id).unwrap().name, "p");
}

#[tokio::test]
async fn set_field_updates_record_and_notifies_inline() {
    let (backend, store) = make_backend();
    let diff = SourceDiff::new("project", "p");
    let id = diff.source_id;
    backend.create_source(None, diff).await.unwrap();

    let link = backend.link(id);
    let (handler, seen) = collector();
    link.set_handler(ModelId::new(), handler).await.unwrap();

    link.set_field("name", json!("renamed")).await.unwrap();

    assert_eq!(store.diff_of(id).unwrap().name, "renamed");
    // Inline delivery: snapshot first, then the modification.
    assert_eq!(labels(&seen), vec!["added", "modified"]);
    assert_eq!(seen.lock().unwrap()[1].diff().unwrap().name, "renamed");
}

#[tokio::test]
async fn set_field_on_missing_record_is_entity_missing() {
    let (backend, _store) = make_backend();
    let link = backend.link(mirra_types::SourceId::new());
    let err = link.set_field("name", json!("x")).await.unwrap_err();
    assert!(matches!(err, LinkError::EntityMissing(_)));
}

// ── Subscriptions ────────────────────────────────────────────────

#[tokio::test]
async fn subscribe_delivers_initial_snapshot() {
    let (backend, _store) = make_backend();
    let diff = SourceDiff::new("system", "s");
    let id = diff.source_id;
    backend.create_source(None, diff).await.unwrap();

    let link = backend.link(id);
    let requester = ModelId::new();
    let (handler, seen) = collector();

    assert!(!link.has_handler(requester).await);
    link.set_handler(requester, handler).await.unwrap();
    assert!(link.has_handler(requester).await);

    assert_eq!(labels(&seen), vec!["added"]);
    assert_eq!(seen.lock().unwrap()[0].diff().unwrap().name, "s");
}

#[tokio::test]
async fn duplicate_subscribe_is_rejected_and_first_stays_active() {
    let (backend, _store) = make_backend();
    let diff = SourceDiff::new("system", "s");
    let id = diff.source_id;
    backend.create_source(None, diff).await.unwrap();

    let link = backend.link(id);
    let requester = ModelId::new();
    let (first, seen_first) = collector();
    let (second, seen_second) = collector();

    link.set_handler(requester, first).await.unwrap();
    let err = link.set_handler(requester, second).await.unwrap_err();
    assert!(matches!(err, LinkError::AlreadySubscribed));

    link.set_field("name", json!("still-mine")).await.unwrap();
    assert_eq!(labels(&seen_first), vec!["added", "modified"]);
    // The rejected handler observed nothing, not even the snapshot.
    assert!(seen_second.lock().unwrap().is_empty());
}

#[tokio::test]
async fn remove_handler_allows_resubscribe() {
    let (backend, _store) = make_backend();
    let diff = SourceDiff::new("system", "s");
    let id = diff.source_id;
    backend.create_source(None, diff).await.unwrap();

    let link = backend.link(id);
    let requester = ModelId::new();
    let (handler, _seen) = collector();
    link.set_handler(requester, handler).await.unwrap();

    link.remove_handler(requester).await.unwrap();
    assert!(!link.has_handler(requester).await);

    let (handler, seen) = collector();
    link.set_handler(requester, handler).await.unwrap();
    assert_eq!(labels(&seen), vec!["added"]);
}

#[tokio::test]
async fn subscribe_to_missing_record_fails() {
    let (backend, _store) = make_backend();
    let link = backend.link(mirra_types::SourceId::new());
    let (handler, _seen) = collector();
    let err = link.set_handler(ModelId::new(), handler).await.unwrap_err();
    assert!(matches!(err, LinkError::EntityMissing(_)));
}

// ── Tickets ──────────────────────────────────────────────────────

#[tokio::test]
async fn tickets_flush_fifo_and_apply() {
    let (backend, store) = make_backend();
    let diff = SourceDiff::new("value", "v");
    let id = diff.source_id;
    backend.create_source(None, diff).await.unwrap();

    let link = backend.link(id);
    link.insert_ticket(Ticket::rename(id, "first")).await.unwrap();
    link.insert_ticket(Ticket::rename(id, "second")).await.unwrap();
    assert_eq!(store.queued_tickets(id), 2);

    let applied = link.process_tickets().await.unwrap();
    assert_eq!(applied, 2);
    assert_eq!(store.queued_tickets(id), 0);
    // FIFO: the later rename wins.
    assert_eq!(store.diff_of(id).unwrap().name, "second");
}

#[tokio::test]
async fn transient_failure_leaves_remainder_queued() {
    let (backend, store) = make_backend();
    let diff = SourceDiff::new("value", "v");
    let id = diff.source_id;
    backend.create_source(None, diff).await.unwrap();

    let link = backend.link(id);
    link.insert_ticket(Ticket::rename(id, "a")).await.unwrap();
    link.insert_ticket(Ticket::rename(id, "b")).await.unwrap();

    store.fail_next_writes(1);
    let err = link.process_tickets().await.unwrap_err();
    assert!(matches!(err, LinkError::Backend(_)));
    // Nothing was lost; both tickets wait for the next flush.
    assert_eq!(store.queued_tickets(id), 2);

    let applied = link.process_tickets().await.unwrap();
    assert_eq!(applied, 2);
    assert_eq!(store.diff_of(id).unwrap().name, "b");
}

#[tokio::test]
async fn malformed_ticket_fails_terminally_and_is_dropped() {
    let (backend, store) = make_backend();
    let diff = SourceDiff::new("value", "v");
    let id = diff.source_id;
    backend.create_source(None, diff).await.unwrap();

    let link = backend.link(id);
    link.insert_ticket(Ticket::set_field(id, "order", json!("not a number")))
        .await
        .unwrap();

    let err = link.process_tickets().await.unwrap_err();
    // Terminal, not transient: the bad ticket dies instead of wedging the
    // queue on retry forever.
    assert!(matches!(err, LinkError::InvalidField(_)));
    assert_eq!(store.queued_tickets(id), 0);

    link.insert_ticket(Ticket::rename(id, "after")).await.unwrap();
    assert_eq!(link.process_tickets().await.unwrap(), 1);
    assert_eq!(store.diff_of(id).unwrap().name, "after");
}

#[tokio::test]
async fn empty_flush_is_a_noop() {
    let (backend, _store) = make_backend();
    let diff = SourceDiff::new("value", "v");
    let id = diff.source_id;
    backend.create_source(None, diff).await.unwrap();

    assert_eq!(backend.link(id).process_tickets().await.unwrap(), 0);
}

// ── Removal ──────────────────────────────────────────────────────

#[tokio::test]
async fn remove_notifies_subscribers_and_parent() {
    let (backend, store) = make_backend();
    let parent = SourceDiff::new("project", "p");
    let pid = parent.source_id;
    backend.create_source(None, parent).await.unwrap();
    let child = SourceDiff::new("system", "c");
    let cid = child.source_id;
    backend.create_source(Some(pid), child).await.unwrap();

    let (parent_handler, parent_seen) = collector();
    let (child_handler, child_seen) = collector();
    backend
        .link(pid)
        .set_handler(ModelId::new(), parent_handler)
        .await
        .unwrap();
    backend
        .link(cid)
        .set_handler(ModelId::new(), child_handler)
        .await
        .unwrap();

    backend.link(cid).remove().await.unwrap();

    assert!(!store.exists(cid));
    assert!(store.children_of(pid).is_empty());
    assert_eq!(labels(&parent_seen), vec!["added", "child-removed"]);
    assert_eq!(labels(&child_seen), vec!["added", "removed"]);
}

#[tokio::test]
async fn remove_cascades_the_whole_subtree() {
    let (backend, store) = make_backend();
    let root = SourceDiff::new("project", "p");
    let rid = root.source_id;
    backend.create_source(None, root).await.unwrap();
    let mid = SourceDiff::new("system", "m");
    let mid_id = mid.source_id;
    backend.create_source(Some(rid), mid).await.unwrap();
    let leaf = SourceDiff::new("state", "l");
    let leaf_id = leaf.source_id;
    backend.create_source(Some(mid_id), leaf).await.unwrap();

    let (leaf_handler, leaf_seen) = collector();
    backend
        .link(leaf_id)
        .set_handler(ModelId::new(), leaf_handler)
        .await
        .unwrap();

    backend.link(rid).remove().await.unwrap();

    assert!(!store.exists(rid));
    assert!(!store.exists(mid_id));
    assert!(!store.exists(leaf_id));
    // Descendants observe their own removal.
    assert_eq!(labels(&leaf_seen), vec!["added", "removed"]);
}
