use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{json, Map, Value};

use super::defaults::RagConfig;
use super::paths::AppPaths;
use super::validation::validate_config;
use crate::core::errors::RagError;

const REDACT_PLACEHOLDER: &str = "****";

const SENSITIVE_PATTERNS: [&str; 8] = [
    "api_key",
    "secret",
    "password",
    "_token",
    "token_",
    "credential",
    "database_url",
    "bearer",
];

const SENSITIVE_WHITELIST: [&str; 3] = ["max_tokens", "max_output_tokens", "tokens"];

#[derive(Clone)]
pub struct ConfigService {
    paths: Arc<AppPaths>,
}

impl ConfigService {
    pub fn new(paths: Arc<AppPaths>) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &AppPaths {
        &self.paths
    }

    pub fn config_path(&self) -> PathBuf {
        if let Ok(path) = env::var("LOCALRAG_CONFIG_PATH") {
            return PathBuf::from(path);
        }

        let user_config = self.paths.data_dir.join("config.yml");
        if user_config.exists() {
            return user_config;
        }

        self.paths.project_root.join("config.yml")
    }

    /// Raw merged configuration: `config.yml`, then `secrets.yml`, then the environment.
    pub fn load_value(&self) -> Value {
        let public_config = load_yaml_file(&self.config_path());
        let secrets_config = load_yaml_file(&self.paths.secrets_path);
        let merged = deep_merge(&public_config, &secrets_config);
        apply_env_overrides(merged, |key| env::var(key).ok())
    }

    pub fn load(&self) -> Result<RagConfig, RagError> {
        let value = self.load_value();
        parse_config(&value)
    }

    pub fn redact_sensitive_values(&self, value: &Value) -> Value {
        redact_sensitive_values(value)
    }
}

pub fn parse_config(value: &Value) -> Result<RagConfig, RagError> {
    validate_config(value)?;
    serde_json::from_value(value.clone())
        .map_err(|err| RagError::Configuration(format!("invalid config: {}", err)))
}

fn load_yaml_file(path: &Path) -> Value {
    if !path.exists() {
        return Value::Object(Map::new());
    }

    match fs::read_to_string(path) {
        Ok(contents) => match serde_yaml::from_str::<Value>(&contents) {
            Ok(value @ Value::Object(_)) => value,
            Ok(_) => Value::Object(Map::new()),
            Err(err) => {
                tracing::warn!("Ignoring unparsable config {}: {}", path.display(), err);
                Value::Object(Map::new())
            }
        },
        Err(_) => Value::Object(Map::new()),
    }
}

fn apply_env_overrides<F>(config: Value, lookup: F) -> Value
where
    F: Fn(&str) -> Option<String>,
{
    let mut overrides = Map::new();

    if let Some(url) = lookup("LOCALRAG_EMBEDDING_URL") {
        overrides.insert("embedding".to_string(), json!({ "base_url": url }));
    }
    if let Some(url) = lookup("LOCALRAG_GENERATION_URL") {
        overrides.insert("generation".to_string(), json!({ "base_url": url }));
    }
    if let Some(model) = lookup("LOCALRAG_GENERATION_MODEL") {
        let section = overrides
            .entry("generation".to_string())
            .or_insert_with(|| json!({}));
        if let Some(obj) = section.as_object_mut() {
            obj.insert("model".to_string(), json!(model));
        }
    }

    let database_url = lookup("LOCALRAG_DATABASE_URL")
        .or_else(|| lookup("DATABASE_URL"))
        .or_else(|| postgres_url_from_parts(&lookup));
    if let Some(url) = database_url {
        overrides.insert("store".to_string(), json!({ "database_url": url }));
    }

    deep_merge(&config, &Value::Object(overrides))
}

fn postgres_url_from_parts<F>(lookup: &F) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    let password = lookup("POSTGRES_PASSWORD")?;
    let host = lookup("POSTGRES_HOST").unwrap_or_else(|| "localhost".to_string());
    let port = lookup("POSTGRES_PORT").unwrap_or_else(|| "5432".to_string());
    let dbname = lookup("POSTGRES_DBNAME").unwrap_or_else(|| "postgres".to_string());
    let user = lookup("POSTGRES_USERNAME").unwrap_or_else(|| "postgres".to_string());
    Some(format!(
        "postgres://{}:{}@{}:{}/{}",
        user, password, host, port, dbname
    ))
}

fn deep_merge(base: &Value, override_value: &Value) -> Value {
    match (base, override_value) {
        (Value::Object(base_map), Value::Object(override_map)) => {
            let mut merged: Map<String, Value> = base_map.clone();
            for (key, value) in override_map {
                let merged_value = match merged.get(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => value.clone(),
                };
                merged.insert(key.clone(), merged_value);
            }
            Value::Object(merged)
        }
        _ => override_value.clone(),
    }
}

fn redact_sensitive_values(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut redacted = Map::new();
            for (key, val) in map {
                if is_sensitive_key(key) && !val.is_null() {
                    redacted.insert(key.clone(), Value::String(REDACT_PLACEHOLDER.to_string()));
                } else {
                    redacted.insert(key.clone(), redact_sensitive_values(val));
                }
            }
            Value::Object(redacted)
        }
        Value::Array(items) => Value::Array(items.iter().map(redact_sensitive_values).collect()),
        _ => value.clone(),
    }
}

fn is_sensitive_key(key: &str) -> bool {
    let key_lower = key.to_lowercase();
    if SENSITIVE_WHITELIST
        .iter()
        .any(|allowed| *allowed == key_lower)
    {
        return false;
    }
    SENSITIVE_PATTERNS
        .iter()
        .any(|pattern| key_lower.contains(pattern))
}
