//! Extraction schemas handed to the structured client.
//!
//! A schema is a JSON Schema document, either written by hand or derived
//! from a Rust type with `schemars`. It is rendered into the prompt and
//! used to validate the parsed reply.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use jsonschema::Validator;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::errors::RagError;

#[derive(Clone)]
pub struct ExtractionSchema {
    name: String,
    document: Value,
    validator: Arc<Validator>,
}

impl fmt::Debug for ExtractionSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionSchema")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl ExtractionSchema {
    pub fn new(name: impl Into<String>, document: Value) -> Result<Self, RagError> {
        let name = name.into();
        let validator = jsonschema::validator_for(&document).map_err(|err| {
            RagError::Configuration(format!("schema '{}' does not compile: {}", name, err))
        })?;
        Ok(Self {
            name,
            document,
            validator: Arc::new(validator),
        })
    }

    /// Derives the schema from a Rust type.
    pub fn for_type<T: JsonSchema>() -> Result<Self, RagError> {
        let schema = schemars::schema_for!(T);
        let document = serde_json::to_value(&schema)
            .map_err(|err| RagError::Configuration(format!("schema serialization failed: {}", err)))?;
        Self::new(T::schema_name(), document)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn document(&self) -> &Value {
        &self.document
    }

    pub fn validate(&self, value: &Value) -> Result<(), RagError> {
        let errors: Vec<String> = self
            .validator
            .iter_errors(value)
            .map(|err| err.to_string())
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(RagError::SchemaViolation(errors.join("; ")))
        }
    }

    /// Top-level required properties typed as arrays.
    pub fn array_keys(&self) -> Vec<String> {
        let Some(required) = self.document.get("required").and_then(Value::as_array) else {
            return Vec::new();
        };
        required
            .iter()
            .filter_map(Value::as_str)
            .filter(|key| {
                self.document
                    .pointer(&format!("/properties/{}", key))
                    .map(|prop| has_type(prop, "array"))
                    .unwrap_or(false)
            })
            .map(str::to_string)
            .collect()
    }

    /// Integer properties anywhere in the schema, sorted by name.
    pub fn integer_fields(&self) -> Vec<String> {
        let mut found = BTreeSet::new();
        collect_integer_fields(&self.document, &mut found);
        found.into_iter().collect()
    }

    /// Text appended to the prompt so the model returns an instance, not the schema.
    pub fn instructions(&self) -> String {
        let rendered = serde_json::to_string_pretty(&self.document).unwrap_or_default();
        let mut text = format!(
            "\n\nRespond ONLY with a valid JSON object that contains example data conforming to this schema:\n{}\n\n\
             Do NOT return the schema itself. Return a JSON object with real values that satisfy the schema.",
            rendered
        );

        let ids = self.integer_fields();
        if !ids.is_empty() {
            text.push_str(&format!(
                " Always include valid integers for {}; if a value cannot be determined, use 0 instead of null.",
                ids.iter()
                    .map(|name| format!("`{}`", name))
                    .collect::<Vec<_>>()
                    .join(", ")
            ));
        }

        let arrays = self.array_keys();
        if !arrays.is_empty() {
            text.push_str(&format!(
                " If nothing is found, return an empty array for {} instead of omitting it.",
                arrays
                    .iter()
                    .map(|name| format!("`{}`", name))
                    .collect::<Vec<_>>()
                    .join(", ")
            ));
        }
        text
    }
}

fn has_type(schema: &Value, wanted: &str) -> bool {
    match schema.get("type") {
        Some(Value::String(kind)) => kind == wanted,
        Some(Value::Array(kinds)) => kinds.iter().any(|k| k.as_str() == Some(wanted)),
        _ => false,
    }
}

fn collect_integer_fields(node: &Value, found: &mut BTreeSet<String>) {
    match node {
        Value::Object(map) => {
            if let Some(Value::Object(props)) = map.get("properties") {
                for (name, prop) in props {
                    if has_type(prop, "integer") {
                        found.insert(name.clone());
                    }
                }
            }
            for value in map.values() {
                collect_integer_fields(value, found);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_integer_fields(item, found);
            }
        }
        _ => {}
    }
}

/// A relation between two extracted entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Edge {
    pub relation_type: String,
    pub source_entity_id: i64,
    pub target_entity_id: i64,
    #[serde(default)]
    pub fact: Option<String>,
    #[serde(default)]
    pub valid_at: Option<String>,
    #[serde(default)]
    pub invalid_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ExtractedEdges {
    pub edges: Vec<Edge>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ExtractedEntity {
    pub name: String,
    pub entity_type_id: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ExtractedEntities {
    pub extracted_entities: Vec<ExtractedEntity>,
}

/// Whether an extracted entity duplicates an existing one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct EntityResolution {
    pub id: i64,
    pub name: String,
    /// Index of the best duplicate candidate, -1 when none.
    pub duplicate_idx: i64,
    pub duplicates: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct EntityResolutions {
    pub entity_resolutions: Vec<EntityResolution>,
}

/// Relevance judgement used by the reranker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RelevanceScore {
    /// 0.0 (irrelevant) to 1.0 (answers the query).
    pub relevance_score: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn edges_schema() -> ExtractionSchema {
        ExtractionSchema::for_type::<ExtractedEdges>().unwrap()
    }

    #[test]
    fn derived_schema_validates_instances() {
        let schema = edges_schema();
        let good = json!({ "edges": [{
            "relation_type": "WORKS_AT",
            "source_entity_id": 1,
            "target_entity_id": 2,
            "fact": "Alice works at Acme"
        }]});
        assert!(schema.validate(&good).is_ok());
        assert!(schema.validate(&json!({ "edges": [] })).is_ok());

        let bad = json!({ "edges": [{ "relation_type": "WORKS_AT", "source_entity_id": null }] });
        assert!(matches!(schema.validate(&bad), Err(RagError::SchemaViolation(_))));
        assert!(schema.validate(&json!({})).is_err());
    }

    #[test]
    fn instructions_mention_ids_and_empty_arrays() {
        let text = edges_schema().instructions();
        assert!(text.contains("Do NOT return the schema itself"));
        assert!(text.contains("`source_entity_id`"));
        assert!(text.contains("`target_entity_id`"));
        assert!(text.contains("use 0 instead of null"));
        assert!(text.contains("empty array for `edges`"));
    }

    #[test]
    fn hand_written_schema() {
        let schema = ExtractionSchema::new(
            "score",
            json!({
                "type": "object",
                "properties": { "relevance_score": { "type": "number" } },
                "required": ["relevance_score"]
            }),
        )
        .unwrap();
        assert!(schema.validate(&json!({ "relevance_score": 0.4 })).is_ok());
        assert!(schema.validate(&json!({ "relevance_score": "high" })).is_err());
        assert!(schema.array_keys().is_empty());
        assert!(schema.integer_fields().is_empty());
    }

    #[test]
    fn broken_schema_is_a_configuration_error() {
        let err = ExtractionSchema::new("broken", json!({ "type": 12 })).unwrap_err();
        assert!(matches!(err, RagError::Configuration(_)));
    }
}
