use serde_json::{Map, Value};

use crate::core::errors::RagError;

const PROVIDERS: [&str; 2] = ["ollama", "lmstudio"];

pub fn validate_config(config: &Value) -> Result<(), RagError> {
    let root = config
        .as_object()
        .ok_or_else(|| config_type_error("root", "object"))?;

    if let Some(chunking) = expect_optional_object(root, "chunking")? {
        validate_u64_field(chunking, "chunking.chunk_size", "chunk_size", 1, 1_000_000)?;
        validate_u64_field(chunking, "chunking.overlap", "overlap", 0, 1_000_000)?;

        let chunk_size = chunking
            .get("chunk_size")
            .and_then(Value::as_u64)
            .unwrap_or(500);
        let overlap = chunking.get("overlap").and_then(Value::as_u64).unwrap_or(100);
        if overlap >= chunk_size {
            return Err(RagError::Configuration(format!(
                "Invalid config at 'chunking': overlap ({}) must be smaller than chunk_size ({})",
                overlap, chunk_size
            )));
        }
    }

    if let Some(embedding) = expect_optional_object(root, "embedding")? {
        validate_enum_field(embedding, "embedding.provider", "provider", &PROVIDERS)?;
        validate_optional_string_field(embedding, "embedding.base_url", "base_url")?;
        validate_optional_string_field(embedding, "embedding.model", "model")?;
        validate_u64_field(embedding, "embedding.dimension", "dimension", 1, 65_536)?;
        validate_u64_field(embedding, "embedding.timeout_secs", "timeout_secs", 1, 86_400)?;
        validate_u64_field(
            embedding,
            "embedding.requests_per_second",
            "requests_per_second",
            1,
            100_000,
        )?;
    }

    if let Some(generation) = expect_optional_object(root, "generation")? {
        validate_enum_field(generation, "generation.provider", "provider", &PROVIDERS)?;
        validate_optional_string_field(generation, "generation.base_url", "base_url")?;
        validate_optional_string_field(generation, "generation.model", "model")?;
        validate_f64_field(generation, "generation.temperature", "temperature", 0.0, 2.0)?;
        validate_u64_field(
            generation,
            "generation.max_output_tokens",
            "max_output_tokens",
            1,
            1_000_000,
        )?;
        validate_u64_field(generation, "generation.timeout_secs", "timeout_secs", 1, 86_400)?;
        validate_u64_field(generation, "generation.max_retries", "max_retries", 0, 10)?;
        validate_u64_field(
            generation,
            "generation.retry_backoff_ms",
            "retry_backoff_ms",
            0,
            60_000,
        )?;
        validate_enum_field(
            generation,
            "generation.transmission",
            "transmission",
            &["chat", "prompt"],
        )?;
    }

    if let Some(store) = expect_optional_object(root, "store")? {
        validate_enum_field(store, "store.backend", "backend", &["sqlite", "postgres"])?;
        validate_enum_field(
            store,
            "store.metric",
            "metric",
            &["cosine", "l2", "inner_product"],
        )?;
        validate_optional_string_field(store, "store.database_url", "database_url")?;
        validate_optional_string_field(store, "store.sqlite_path", "sqlite_path")?;
        validate_identifier_field(store, "store.table", "table")?;
        validate_u64_field(store, "store.max_connections", "max_connections", 1, 256)?;
    }

    if let Some(retrieval) = expect_optional_object(root, "retrieval")? {
        validate_u64_field(retrieval, "retrieval.top_k", "top_k", 1, 1_000)?;
        validate_bool_field(retrieval, "retrieval.rerank", "rerank")?;
        validate_optional_string_field(retrieval, "retrieval.system_prompt", "system_prompt")?;
    }

    Ok(())
}

fn expect_optional_object<'a>(
    root: &'a Map<String, Value>,
    key: &str,
) -> Result<Option<&'a Map<String, Value>>, RagError> {
    match root.get(key) {
        Some(Value::Object(map)) => Ok(Some(map)),
        Some(_) => Err(config_type_error(key, "object")),
        None => Ok(None),
    }
}

fn validate_bool_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
) -> Result<(), RagError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    if value.as_bool().is_some() {
        return Ok(());
    }
    Err(config_type_error(path, "boolean"))
}

fn validate_u64_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
    min: u64,
    max: u64,
) -> Result<(), RagError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    if value.is_null() {
        return Ok(());
    }
    let Some(number) = value.as_u64() else {
        return Err(config_type_error(path, "integer"));
    };
    if number < min || number > max {
        return Err(RagError::Configuration(format!(
            "Invalid config at '{}': must be between {} and {}",
            path, min, max
        )));
    }
    Ok(())
}

fn validate_f64_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
    min: f64,
    max: f64,
) -> Result<(), RagError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    let Some(number) = value.as_f64() else {
        return Err(config_type_error(path, "number"));
    };
    if number < min || number > max {
        return Err(RagError::Configuration(format!(
            "Invalid config at '{}': must be between {} and {}",
            path, min, max
        )));
    }
    Ok(())
}

fn validate_optional_string_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
) -> Result<(), RagError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    if value.is_null() {
        return Ok(());
    }
    let Some(text) = value.as_str() else {
        return Err(config_type_error(path, "string"));
    };
    if text.trim().is_empty() {
        return Err(RagError::Configuration(format!(
            "Invalid config at '{}': value cannot be empty",
            path
        )));
    }
    Ok(())
}

fn validate_enum_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
    allowed: &[&str],
) -> Result<(), RagError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    let Some(text) = value.as_str() else {
        return Err(config_type_error(path, "string"));
    };
    if !allowed.contains(&text) {
        return Err(RagError::Configuration(format!(
            "Invalid config at '{}': expected one of {}",
            path,
            allowed.join(", ")
        )));
    }
    Ok(())
}

/// Table names are spliced into SQL, so only plain identifiers pass.
fn validate_identifier_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
) -> Result<(), RagError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    let Some(text) = value.as_str() else {
        return Err(config_type_error(path, "string"));
    };
    if !is_sql_identifier(text) {
        return Err(RagError::Configuration(format!(
            "Invalid config at '{}': '{}' is not a valid table name",
            path, text
        )));
    }
    Ok(())
}

pub fn is_sql_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    text.len() <= 63 && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn config_type_error(path: &str, expected: &str) -> RagError {
    RagError::Configuration(format!(
        "Invalid config at '{}': expected {}",
        path, expected
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accepts_empty_config() {
        assert!(validate_config(&json!({})).is_ok());
    }

    #[test]
    fn rejects_overlap_not_smaller_than_chunk_size() {
        let err = validate_config(&json!({ "chunking": { "chunk_size": 100, "overlap": 100 } }))
            .unwrap_err();
        assert!(err.to_string().contains("overlap"));

        // overlap alone is checked against the default chunk size
        assert!(validate_config(&json!({ "chunking": { "overlap": 600 } })).is_err());
        assert!(validate_config(&json!({ "chunking": { "chunk_size": 10, "overlap": 9 } })).is_ok());
    }

    #[test]
    fn rejects_unsafe_table_names() {
        assert!(validate_config(&json!({ "store": { "table": "chunks; DROP TABLE x" } })).is_err());
        assert!(validate_config(&json!({ "store": { "table": "1chunks" } })).is_err());
        assert!(validate_config(&json!({ "store": { "table": "doc_chunks_v2" } })).is_ok());
    }

    #[test]
    fn rejects_unknown_enum_values_and_ranges() {
        assert!(validate_config(&json!({ "store": { "metric": "hamming" } })).is_err());
        assert!(validate_config(&json!({ "generation": { "transmission": "stream" } })).is_err());
        assert!(validate_config(&json!({ "generation": { "temperature": 3.5 } })).is_err());
        assert!(validate_config(&json!({ "retrieval": { "top_k": 0 } })).is_err());
        assert!(validate_config(&json!({ "embedding": { "dimension": "768" } })).is_err());
    }
}
