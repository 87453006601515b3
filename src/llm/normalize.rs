//! Repairs for common gaps in model-produced JSON, applied before schema
//! validation.

use serde_json::{Map, Value};

pub trait ResponseNormalizer: Send + Sync {
    fn name(&self) -> &str;

    fn normalize(&self, value: &mut Value);
}

/// Fills in edge fields models tend to drop or null out.
///
/// Every object under `edges` ends up with a `fact` key (null if missing)
/// and integer id fields (0 if missing, null or unparsable).
pub struct EdgeFieldsNormalizer {
    key: String,
    id_fields: Vec<String>,
}

impl Default for EdgeFieldsNormalizer {
    fn default() -> Self {
        Self {
            key: "edges".to_string(),
            id_fields: vec!["source_entity_id".to_string(), "target_entity_id".to_string()],
        }
    }
}

impl ResponseNormalizer for EdgeFieldsNormalizer {
    fn name(&self) -> &str {
        "edge_fields"
    }

    fn normalize(&self, value: &mut Value) {
        let Some(edges) = value.get_mut(&self.key).and_then(Value::as_array_mut) else {
            return;
        };
        for edge in edges.iter_mut().filter_map(Value::as_object_mut) {
            edge.entry("fact").or_insert(Value::Null);
            for field in &self.id_fields {
                coerce_integer(edge, field);
            }
        }
    }
}

/// Ensures entity resolutions that name a `duplicate_idx` also carry a
/// `duplicates` list.
pub struct DuplicatesNormalizer {
    key: String,
}

impl Default for DuplicatesNormalizer {
    fn default() -> Self {
        Self {
            key: "entity_resolutions".to_string(),
        }
    }
}

impl ResponseNormalizer for DuplicatesNormalizer {
    fn name(&self) -> &str {
        "duplicates"
    }

    fn normalize(&self, value: &mut Value) {
        let Some(items) = value.get_mut(&self.key).and_then(Value::as_array_mut) else {
            return;
        };
        for item in items.iter_mut().filter_map(Value::as_object_mut) {
            if item.contains_key("duplicate_idx") {
                match item.get("duplicates") {
                    Some(Value::Array(_)) => {}
                    _ => {
                        item.insert("duplicates".to_string(), Value::Array(Vec::new()));
                    }
                }
            }
        }
    }
}

fn coerce_integer(object: &mut Map<String, Value>, field: &str) {
    let coerced = match object.get(field) {
        Some(Value::Number(n)) if n.is_i64() || n.is_u64() => return,
        Some(Value::Number(n)) => n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64),
        Some(Value::String(s)) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    object.insert(field.to_string(), Value::from(coerced.unwrap_or(0)));
}

pub fn default_normalizers() -> Vec<Box<dyn ResponseNormalizer>> {
    vec![
        Box::new(EdgeFieldsNormalizer::default()),
        Box::new(DuplicatesNormalizer::default()),
    ]
}

pub fn apply_all(normalizers: &[Box<dyn ResponseNormalizer>], value: &mut Value) {
    for normalizer in normalizers {
        normalizer.normalize(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn null_ids_become_zero_and_fact_is_added() {
        let mut value = json!({ "edges": [{ "source_entity_id": null }] });
        apply_all(&default_normalizers(), &mut value);
        assert_eq!(
            value,
            json!({ "edges": [{ "source_entity_id": 0, "target_entity_id": 0, "fact": null }] })
        );
    }

    #[test]
    fn existing_values_are_kept_and_strings_parsed() {
        let mut value = json!({ "edges": [{
            "source_entity_id": 3,
            "target_entity_id": "7",
            "fact": "Alice knows Bob"
        }]});
        apply_all(&default_normalizers(), &mut value);
        assert_eq!(value["edges"][0]["source_entity_id"], json!(3));
        assert_eq!(value["edges"][0]["target_entity_id"], json!(7));
        assert_eq!(value["edges"][0]["fact"], json!("Alice knows Bob"));
    }

    #[test]
    fn duplicates_default_to_empty_list() {
        let mut value = json!({ "entity_resolutions": [
            { "id": 1, "duplicate_idx": -1 },
            { "id": 2, "duplicate_idx": 0, "duplicates": [4] },
            { "id": 3 }
        ]});
        apply_all(&default_normalizers(), &mut value);
        assert_eq!(value["entity_resolutions"][0]["duplicates"], json!([]));
        assert_eq!(value["entity_resolutions"][1]["duplicates"], json!([4]));
        assert!(value["entity_resolutions"][2].get("duplicates").is_none());
    }

    #[test]
    fn unrelated_documents_are_untouched() {
        let mut value = json!({ "relevance_score": 0.5, "edges": "not a list" });
        let before = value.clone();
        apply_all(&default_normalizers(), &mut value);
        assert_eq!(value, before);
    }
}
