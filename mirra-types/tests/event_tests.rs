use mirra_types::{SourceDiff, SourceEvent};

#[test]
fn diff_accessor_covers_every_carrying_variant() {
    let diff = SourceDiff::new("object", "o");

    for event in [
        SourceEvent::Added(diff.clone()),
        SourceEvent::Modified(diff.clone()),
        SourceEvent::ChildAdded(diff.clone()),
        SourceEvent::ChildRemoved(diff.clone()),
    ] {
        assert_eq!(event.diff(), Some(&diff));
    }
    assert_eq!(SourceEvent::Removed.diff(), None);
}

#[test]
fn labels_are_stable() {
    let diff = SourceDiff::new("object", "o");
    assert_eq!(SourceEvent::Added(diff.clone()).label(), "added");
    assert_eq!(SourceEvent::Modified(diff.clone()).label(), "modified");
    assert_eq!(SourceEvent::Removed.label(), "removed");
    assert_eq!(SourceEvent::ChildAdded(diff.clone()).label(), "child-added");
    assert_eq!(SourceEvent::ChildRemoved(diff).label(), "child-removed");
}

#[test]
fn events_roundtrip_through_json() {
    let diff = SourceDiff::new("object", "o");
    for event in [
        SourceEvent::Modified(diff),
        SourceEvent::Removed,
    ] {
        let json = serde_json::to_string(&event).unwrap();
        let back: SourceEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event, back);
    }
}
