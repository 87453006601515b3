//! Ollama HTTP backends for generation and embeddings.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

use super::provider::{EmbeddingBackend, GenerationBackend};
use super::types::{clean_input, GenerationRequest, ProviderModel, ResponseFormat};
use crate::core::config::{EmbeddingConfig, GenerationConfig, TransmissionMode};
use crate::core::errors::RagError;

/// Reduces a configured URL to the server root.
///
/// Accepts `http://host:11434`, `.../api` or a full endpoint such as
/// `.../api/generate`.
pub fn api_root(base_url: &str) -> String {
    let mut root = base_url.trim().trim_end_matches('/');
    for suffix in ["/api/generate", "/api/chat", "/api/embeddings", "/api/embed", "/api/tags", "/api"] {
        if let Some(stripped) = root.strip_suffix(suffix) {
            root = stripped;
            break;
        }
    }
    root.to_string()
}

fn build_client(timeout_secs: u64) -> Result<Client, RagError> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|err| RagError::Configuration(format!("failed to build HTTP client: {}", err)))
}

async fn error_for_status(res: reqwest::Response, what: &str) -> Result<reqwest::Response, RagError> {
    if res.status().is_success() {
        return Ok(res);
    }
    let status = res.status();
    let text = res.text().await.unwrap_or_default();
    Err(RagError::Backend(format!("Ollama {} error ({}): {}", what, status, text)))
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagInfo>,
}

#[derive(Deserialize)]
struct TagInfo {
    name: String,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Clone)]
pub struct OllamaGenerator {
    root: String,
    client: Client,
}

impl OllamaGenerator {
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self, RagError> {
        Ok(Self {
            root: api_root(base_url),
            client: build_client(timeout_secs)?,
        })
    }

    pub fn from_config(config: &GenerationConfig) -> Result<Self, RagError> {
        Self::new(config.base_url(), config.timeout_secs)
    }

    fn request_body(request: &GenerationRequest) -> Value {
        let mut body = json!({
            "model": request.model,
            "stream": false,
            "options": {
                "temperature": request.temperature,
                "num_predict": request.max_output_tokens,
            },
        });

        if let Some(obj) = body.as_object_mut() {
            match request.transmission {
                TransmissionMode::Chat => {
                    let messages: Vec<Value> = request
                        .messages
                        .iter()
                        .map(|m| json!({ "role": m.role.as_str(), "content": clean_input(&m.content) }))
                        .collect();
                    obj.insert("messages".to_string(), Value::Array(messages));
                }
                TransmissionMode::Prompt => {
                    obj.insert("prompt".to_string(), json!(request.flattened_prompt()));
                }
            }
            if request.format == ResponseFormat::Json {
                obj.insert("format".to_string(), json!("json"));
            }
            if let Some(keep_alive) = &request.keep_alive {
                obj.insert("keep_alive".to_string(), json!(keep_alive));
            }
        }
        body
    }
}

#[async_trait]
impl GenerationBackend for OllamaGenerator {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn health_check(&self) -> Result<bool, RagError> {
        let url = format!("{}/api/tags", self.root);
        match self.client.get(&url).send().await {
            Ok(resp) => Ok(resp.status().is_success()),
            Err(_) => Ok(false),
        }
    }

    async fn list_models(&self) -> Result<Vec<ProviderModel>, RagError> {
        let url = format!("{}/api/tags", self.root);
        let res = self.client.get(&url).send().await.map_err(RagError::backend)?;
        let res = error_for_status(res, "tags").await?;
        let tags: TagsResponse = res
            .json()
            .await
            .map_err(|err| RagError::MalformedResponse(err.to_string()))?;

        Ok(tags
            .models
            .into_iter()
            .map(|tag| ProviderModel {
                id: tag.model.unwrap_or_else(|| tag.name.clone()),
                name: tag.name,
            })
            .collect())
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, RagError> {
        let (path, pointer) = match request.transmission {
            TransmissionMode::Chat => ("/api/chat", "/message/content"),
            TransmissionMode::Prompt => ("/api/generate", "/response"),
        };
        let url = format!("{}{}", self.root, path);

        tracing::debug!("Ollama request to {} ({} messages)", url, request.messages.len());
        let res = self
            .client
            .post(&url)
            .json(&Self::request_body(request))
            .send()
            .await
            .map_err(RagError::backend)?;
        let res = error_for_status(res, "generation").await?;

        let payload: Value = res
            .json()
            .await
            .map_err(|err| RagError::MalformedResponse(err.to_string()))?;

        payload
            .pointer(pointer)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| RagError::MalformedResponse(format!("missing '{}' in Ollama reply", pointer)))
    }
}

#[derive(Clone)]
pub struct OllamaEmbedder {
    root: String,
    model: String,
    client: Client,
}

impl OllamaEmbedder {
    pub fn new(base_url: &str, model: &str, timeout_secs: u64) -> Result<Self, RagError> {
        Ok(Self {
            root: api_root(base_url),
            model: model.to_string(),
            client: build_client(timeout_secs)?,
        })
    }

    pub fn from_config(config: &EmbeddingConfig) -> Result<Self, RagError> {
        Self::new(config.base_url(), &config.model, config.timeout_secs)
    }
}

/// Reads `embedding`, or the first entry of `embeddings`.
///
/// Any non-numeric entry rejects the whole vector.
fn parse_embedding(payload: &Value) -> Option<Vec<f32>> {
    let values = payload
        .get("embedding")
        .and_then(Value::as_array)
        .or_else(|| payload.pointer("/embeddings/0").and_then(Value::as_array))?;
    values
        .iter()
        .map(|v| v.as_f64().map(|f| f as f32))
        .collect()
}

#[async_trait]
impl EmbeddingBackend for OllamaEmbedder {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>, RagError> {
        let url = format!("{}/api/embed", self.root);
        let res = self
            .client
            .post(&url)
            .json(&json!({ "model": self.model, "input": text }))
            .send()
            .await
            .map_err(|err| RagError::embedding(preview(text), err))?;

        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(RagError::embedding(
                preview(text),
                format!("Ollama returned {}: {}", status, body),
            ));
        }

        let payload: Value = res
            .json()
            .await
            .map_err(|err| RagError::embedding(preview(text), err))?;

        parse_embedding(&payload)
            .ok_or_else(|| RagError::embedding(preview(text), "reply carried no embedding"))
    }
}

/// Short identification of a text for error messages.
pub fn preview(text: &str) -> String {
    let trimmed = text.trim();
    let mut out: String = trimmed.chars().take(48).collect();
    if trimmed.chars().count() > 48 {
        out.push_str("...");
    }
    format!("\"{}\"", out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::Message;
    use crate::test_support::serve;

    fn request(transmission: TransmissionMode) -> GenerationRequest {
        let config = GenerationConfig {
            transmission,
            ..GenerationConfig::default()
        };
        GenerationRequest::new(
            vec![Message::system("Be terse."), Message::user("Say hi.")],
            &config,
        )
        .with_format(ResponseFormat::Json)
    }

    #[test]
    fn api_root_strips_known_endpoints() {
        assert_eq!(api_root("http://h:11434/"), "http://h:11434");
        assert_eq!(api_root("http://h:11434/api"), "http://h:11434");
        assert_eq!(api_root("http://h:11434/api/generate"), "http://h:11434");
    }

    #[test]
    fn prompt_mode_flattens_messages() {
        let body = OllamaGenerator::request_body(&request(TransmissionMode::Prompt));
        assert_eq!(body["prompt"], json!("system: Be terse.\nuser: Say hi."));
        assert!(body.get("messages").is_none());
        assert_eq!(body["format"], json!("json"));
        assert_eq!(body["stream"], json!(false));
        assert_eq!(body["options"]["num_predict"], json!(1000));
        assert_eq!(body["keep_alive"], json!("5m"));
    }

    #[test]
    fn chat_mode_sends_role_tagged_messages() {
        let body = OllamaGenerator::request_body(&request(TransmissionMode::Chat));
        assert_eq!(body["messages"][0], json!({ "role": "system", "content": "Be terse." }));
        assert!(body.get("prompt").is_none());
    }

    #[test]
    fn embedding_reply_shapes() {
        assert_eq!(parse_embedding(&json!({ "embedding": [0.5, 1] })), Some(vec![0.5, 1.0]));
        assert_eq!(parse_embedding(&json!({ "embeddings": [[2.0]] })), Some(vec![2.0]));
        assert_eq!(parse_embedding(&json!({ "other": 1 })), None);
    }

    #[test]
    fn non_numeric_entries_reject_the_vector() {
        assert_eq!(parse_embedding(&json!({ "embedding": [0.5, null, 1.0] })), None);
        assert_eq!(parse_embedding(&json!({ "embeddings": [[1.0, "x"]] })), None);
    }

    #[tokio::test]
    async fn null_in_embedding_reply_is_an_embedding_error() {
        let (url, _seen) = serve(vec![(200, r#"{"embedding":[0.1,null,0.3,0.4]}"#.to_string())]).await;
        let backend = OllamaEmbedder::new(&url, "nomic-embed-text:latest", 5).unwrap();
        assert!(matches!(
            backend.embed_one("passage").await,
            Err(RagError::EmbeddingBackend { .. })
        ));
    }

    #[tokio::test]
    async fn chat_generation_reads_message_content() {
        let (url, seen) = serve(vec![(
            200,
            r#"{"message":{"role":"assistant","content":"{\"ok\":true}"},"done":true}"#.to_string(),
        )])
        .await;

        let backend = OllamaGenerator::new(&url, 5).unwrap();
        let text = backend.generate(&request(TransmissionMode::Chat)).await.unwrap();
        assert_eq!(text, r#"{"ok":true}"#);

        let seen = seen.await.unwrap();
        assert_eq!(seen[0].path(), "/api/chat");
        assert_eq!(seen[0].json()["model"], json!(GenerationConfig::default().model));
    }

    #[tokio::test]
    async fn prompt_generation_reads_response_field() {
        let (url, seen) = serve(vec![(200, r#"{"response":"hello","done":true}"#.to_string())]).await;

        let backend = OllamaGenerator::new(&format!("{}/api/generate", url), 5).unwrap();
        let text = backend.generate(&request(TransmissionMode::Prompt)).await.unwrap();
        assert_eq!(text, "hello");
        assert_eq!(seen.await.unwrap()[0].path(), "/api/generate");
    }

    #[tokio::test]
    async fn server_errors_become_backend_errors() {
        let (url, _seen) = serve(vec![(500, r#"{"error":"model not loaded"}"#.to_string())]).await;
        let backend = OllamaGenerator::new(&url, 5).unwrap();
        let err = backend.generate(&request(TransmissionMode::Chat)).await.unwrap_err();
        assert!(matches!(err, RagError::Backend(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn list_models_reads_tags() {
        let (url, _seen) = serve(vec![(
            200,
            r#"{"models":[{"name":"nomic-embed-text:latest","model":"nomic-embed-text:latest"},{"name":"qwen2.5vl:7b"}]}"#
                .to_string(),
        )])
        .await;
        let backend = OllamaGenerator::new(&url, 5).unwrap();
        let models = backend.list_models().await.unwrap();
        let ids: Vec<&str> = models.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["nomic-embed-text:latest", "qwen2.5vl:7b"]);
    }

    #[tokio::test]
    async fn embedding_sends_model_and_input() {
        let (url, seen) = serve(vec![(200, r#"{"embeddings":[[0.1,0.2,0.3]]}"#.to_string())]).await;
        let backend = OllamaEmbedder::new(&url, "nomic-embed-text:latest", 5).unwrap();

        let vector = backend.embed_one("some passage").await.unwrap();
        assert_eq!(vector.len(), 3);

        let seen = seen.await.unwrap();
        assert_eq!(seen[0].path(), "/api/embed");
        assert_eq!(
            seen[0].json(),
            json!({ "model": "nomic-embed-text:latest", "input": "some passage" })
        );
    }

    #[tokio::test]
    async fn embedding_failure_names_the_text() {
        let (url, _seen) = serve(vec![(404, r#"{"error":"no such model"}"#.to_string())]).await;
        let backend = OllamaEmbedder::new(&url, "missing", 5).unwrap();
        match backend.embed_one("the offending passage").await.unwrap_err() {
            RagError::EmbeddingBackend { item, .. } => assert!(item.contains("the offending passage")),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
