//! Field application shared by both backends.

use mirra_types::{now_ms, Location, SourceDiff};
use serde_json::Value;

/// Overwrites one named field on a snapshot, bumping `updated_at`.
///
/// The well-known mirrored fields (`name`, `order`, `location`, `data`)
/// are typed; anything else lands under the kind-specific `data` object.
pub(crate) fn apply_field(diff: &mut SourceDiff, field: &str, value: Value) -> Result<(), String> {
    match field {
        "name" => match value {
            Value::String(s) => diff.name = s,
            other => return Err(format!("name must be a string, got {other}")),
        },
        "order" => match value.as_u64().and_then(|n| u32::try_from(n).ok()) {
            Some(n) => diff.order = n,
            None => return Err(format!("order must be an unsigned 32-bit integer, got {value}")),
        },
        "location" => match serde_json::from_value::<Location>(value) {
            Ok(loc) => diff.location = loc,
            Err(e) => return Err(format!("invalid location: {e}")),
        },
        "data" => diff.data = value,
        other => {
            if !diff.data.is_object() {
                diff.data = Value::Object(serde_json::Map::new());
            }
            if let Some(obj) = diff.data.as_object_mut() {
                obj.insert(other.to_string(), value);
            }
        }
    }
    diff.updated_at = now_ms();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sets_typed_fields() {
        let mut diff = SourceDiff::new("state", "s1");
        apply_field(&mut diff, "name", json!("renamed")).unwrap();
        apply_field(&mut diff, "order", json!(7)).unwrap();
        apply_field(&mut diff, "location", json!({"x": 1.0, "y": 2.0})).unwrap();
        assert_eq!(diff.name, "renamed");
        assert_eq!(diff.order, 7);
        assert_eq!(diff.location, Location::new(1.0, 2.0));
    }

    #[test]
    fn unknown_field_lands_in_data() {
        let mut diff = SourceDiff::new("state", "s1");
        apply_field(&mut diff, "color", json!("red")).unwrap();
        assert_eq!(diff.data["color"], json!("red"));
    }

    #[test]
    fn rejects_out_of_range_order() {
        let mut diff = SourceDiff::new("state", "s1").with_order(7);
        assert!(apply_field(&mut diff, "order", json!(u64::from(u32::MAX) + 1)).is_err());
        assert!(apply_field(&mut diff, "order", json!(-1)).is_err());
        assert_eq!(diff.order, 7);
    }

    #[test]
    fn rejects_wrongly_typed_name() {
        let mut diff = SourceDiff::new("state", "s1");
        assert!(apply_field(&mut diff, "name", json!(42)).is_err());
        assert_eq!(diff.name, "s1");
    }
}
