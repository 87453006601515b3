//! LM Studio (OpenAI-compatible) backends.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

use super::provider::{EmbeddingBackend, GenerationBackend};
use super::types::{clean_input, GenerationRequest, Message, ProviderModel};
use crate::core::config::{EmbeddingConfig, GenerationConfig, TransmissionMode};
use crate::core::errors::RagError;

#[derive(Deserialize)]
struct OpenAiModelsResponse {
    data: Vec<OpenAiModelInfo>,
}

#[derive(Deserialize)]
struct OpenAiModelInfo {
    id: String,
}

fn build_client(timeout_secs: u64) -> Result<Client, RagError> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|err| RagError::Configuration(format!("failed to build HTTP client: {}", err)))
}

fn normalize_base(base_url: &str) -> String {
    let base = base_url.trim().trim_end_matches('/');
    base.strip_suffix("/v1").unwrap_or(base).to_string()
}

#[derive(Clone)]
pub struct LmStudioGenerator {
    base_url: String,
    client: Client,
}

impl LmStudioGenerator {
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self, RagError> {
        Ok(Self {
            base_url: normalize_base(base_url),
            client: build_client(timeout_secs)?,
        })
    }

    pub fn from_config(config: &GenerationConfig) -> Result<Self, RagError> {
        Self::new(config.base_url(), config.timeout_secs)
    }

    fn request_body(request: &GenerationRequest) -> Value {
        let messages: Vec<Message> = match request.transmission {
            TransmissionMode::Chat => request.messages.clone(),
            TransmissionMode::Prompt => vec![Message::user(request.flattened_prompt())],
        };
        let messages: Vec<Value> = messages
            .iter()
            .map(|m| json!({ "role": m.role.as_str(), "content": clean_input(&m.content) }))
            .collect();

        // JSON output is requested through the prompt; LM Studio only accepts
        // `json_schema` response formats, not `json_object`.
        json!({
            "model": request.model,
            "messages": messages,
            "stream": false,
            "temperature": request.temperature,
            "max_tokens": request.max_output_tokens,
        })
    }
}

#[async_trait]
impl GenerationBackend for LmStudioGenerator {
    fn name(&self) -> &str {
        "lmstudio"
    }

    async fn health_check(&self) -> Result<bool, RagError> {
        let url = format!("{}/v1/models", self.base_url);
        match self.client.get(&url).send().await {
            Ok(resp) => Ok(resp.status().is_success()),
            Err(_) => Ok(false),
        }
    }

    async fn list_models(&self) -> Result<Vec<ProviderModel>, RagError> {
        let url = format!("{}/v1/models", self.base_url);
        let res = self.client.get(&url).send().await.map_err(RagError::backend)?;

        if !res.status().is_success() {
            return Err(RagError::Backend(format!(
                "Failed to list models: {}",
                res.status()
            )));
        }

        let response: OpenAiModelsResponse = res
            .json()
            .await
            .map_err(|err| RagError::MalformedResponse(err.to_string()))?;

        Ok(response
            .data
            .into_iter()
            .map(|m| ProviderModel {
                id: m.id.clone(),
                name: m.id,
            })
            .collect())
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, RagError> {
        let url = format!("{}/v1/chat/completions", self.base_url);

        let res = self
            .client
            .post(&url)
            .json(&Self::request_body(request))
            .send()
            .await
            .map_err(RagError::backend)?;

        if !res.status().is_success() {
            let text = res.text().await.unwrap_or_default();
            return Err(RagError::Backend(format!("LM Studio chat error: {}", text)));
        }

        let payload: Value = res
            .json()
            .await
            .map_err(|err| RagError::MalformedResponse(err.to_string()))?;

        payload["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| RagError::MalformedResponse("missing choices[0].message.content".to_string()))
    }
}

/// Embeddings through `/v1/embeddings`, which accepts a whole batch per call.
#[derive(Clone)]
pub struct LmStudioEmbedder {
    base_url: String,
    model: String,
    client: Client,
}

impl LmStudioEmbedder {
    pub fn new(base_url: &str, model: &str, timeout_secs: u64) -> Result<Self, RagError> {
        Ok(Self {
            base_url: normalize_base(base_url),
            model: model.to_string(),
            client: build_client(timeout_secs)?,
        })
    }

    pub fn from_config(config: &EmbeddingConfig) -> Result<Self, RagError> {
        Self::new(config.base_url(), &config.model, config.timeout_secs)
    }
}

#[async_trait]
impl EmbeddingBackend for LmStudioEmbedder {
    fn name(&self) -> &str {
        "lmstudio"
    }

    fn supports_batch(&self) -> bool {
        true
    }

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>, RagError> {
        let mut vectors = self.embed_many(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| RagError::embedding(text, "reply carried no embedding"))
    }

    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
        let url = format!("{}/v1/embeddings", self.base_url);
        let batch = format!("batch of {}", texts.len());

        let res = self
            .client
            .post(&url)
            .json(&json!({ "model": self.model, "input": texts }))
            .send()
            .await
            .map_err(|err| RagError::embedding(batch.clone(), err))?;

        if !res.status().is_success() {
            let text = res.text().await.unwrap_or_default();
            return Err(RagError::embedding(batch, format!("LM Studio embed error: {}", text)));
        }

        let payload: Value = res
            .json()
            .await
            .map_err(|err| RagError::embedding(batch.clone(), err))?;

        let mut embeddings = Vec::new();
        if let Some(data) = payload["data"].as_array() {
            for item in data {
                if let Some(vals) = item["embedding"].as_array() {
                    let vector: Option<Vec<f32>> =
                        vals.iter().map(|v| v.as_f64().map(|f| f as f32)).collect();
                    let vector = vector.ok_or_else(|| {
                        RagError::embedding(batch.clone(), "embedding contained a non-numeric value")
                    })?;
                    embeddings.push(vector);
                }
            }
        }

        if embeddings.len() != texts.len() {
            return Err(RagError::embedding(
                batch,
                format!("expected {} embeddings, got {}", texts.len(), embeddings.len()),
            ));
        }
        Ok(embeddings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::serve;

    #[tokio::test]
    async fn chat_completion_reads_first_choice() {
        let (url, seen) = serve(vec![(
            200,
            r#"{"choices":[{"message":{"role":"assistant","content":"pong"}}]}"#.to_string(),
        )])
        .await;

        let backend = LmStudioGenerator::new(&format!("{}/v1", url), 5).unwrap();
        let request = GenerationRequest::new(vec![Message::user("ping")], &GenerationConfig::default());
        assert_eq!(backend.generate(&request).await.unwrap(), "pong");

        let seen = seen.await.unwrap();
        assert_eq!(seen[0].path(), "/v1/chat/completions");
        assert_eq!(seen[0].json()["messages"][0]["content"], json!("ping"));
    }

    #[tokio::test]
    async fn batch_embedding_is_one_request() {
        let (url, seen) = serve(vec![(
            200,
            r#"{"data":[{"embedding":[1.0,0.0]},{"embedding":[0.0,1.0]}]}"#.to_string(),
        )])
        .await;

        let backend = LmStudioEmbedder::new(&url, "embedder", 5).unwrap();
        let vectors = backend
            .embed_many(&["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
        assert_eq!(seen.await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn short_batch_reply_is_an_error() {
        let (url, _seen) = serve(vec![(200, r#"{"data":[{"embedding":[1.0]}]}"#.to_string())]).await;
        let backend = LmStudioEmbedder::new(&url, "embedder", 5).unwrap();
        let err = backend
            .embed_many(&["a".to_string(), "b".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::EmbeddingBackend { .. }));
    }

    #[tokio::test]
    async fn non_numeric_values_are_an_error() {
        let (url, _seen) = serve(vec![(200, r#"{"data":[{"embedding":[1.0,null]}]}"#.to_string())]).await;
        let backend = LmStudioEmbedder::new(&url, "embedder", 5).unwrap();
        let err = backend.embed_one("a").await.unwrap_err();
        assert!(err.to_string().contains("non-numeric"));
    }
}
