use mirra_types::{ModelId, SourceId, TicketId};
use std::collections::HashSet;

#[test]
fn model_ids_are_unique() {
    let ids: HashSet<ModelId> = (0..1000).map(|_| ModelId::new()).collect();
    assert_eq!(ids.len(), 1000);
}

#[test]
fn model_id_roundtrips_through_display() {
    let id = ModelId::new();
    let parsed: ModelId = id.to_string().parse().unwrap();
    assert_eq!(id, parsed);
}

#[test]
fn source_id_roundtrips_through_display() {
    let id = SourceId::new();
    let parsed: SourceId = id.to_string().parse().unwrap();
    assert_eq!(id, parsed);
}

#[test]
fn ids_serialize_transparently() {
    let id = SourceId::new();
    let json = serde_json::to_string(&id).unwrap();
    assert_eq!(json, format!("\"{id}\""));
    let back: SourceId = serde_json::from_str(&json).unwrap();
    assert_eq!(id, back);
}

#[test]
fn ticket_ids_are_unique() {
    assert_ne!(TicketId::new().to_string(), TicketId::new().to_string());
}

#[test]
fn from_uuid_preserves_value() {
    let uuid = uuid::Uuid::new_v4();
    assert_eq!(ModelId::from_uuid(uuid).as_uuid(), uuid);
    assert_eq!(SourceId::from_uuid(uuid).as_uuid(), uuid);
}
