//! Structured-output client.
//!
//! Each call composes the conversation (appending schema instructions to
//! the last message), sends it, recovers a JSON object from the reply,
//! normalizes it and validates it against the schema. Recoverable failures
//! append a corrective user message and try again, up to
//! `1 + max_retries` attempts in total.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use super::normalize::{apply_all, default_normalizers, ResponseNormalizer};
use super::provider::GenerationBackend;
use super::schema::ExtractionSchema;
use super::types::{GenerationRequest, Message, ResponseFormat};
use crate::core::config::GenerationConfig;
use crate::core::errors::RagError;

pub struct StructuredClient {
    backend: Arc<dyn GenerationBackend>,
    config: GenerationConfig,
    normalizers: Vec<Box<dyn ResponseNormalizer>>,
}

impl StructuredClient {
    pub fn new(backend: Arc<dyn GenerationBackend>, config: GenerationConfig) -> Self {
        Self {
            backend,
            config,
            normalizers: default_normalizers(),
        }
    }

    pub fn with_normalizers(mut self, normalizers: Vec<Box<dyn ResponseNormalizer>>) -> Self {
        self.normalizers = normalizers;
        self
    }

    pub fn backend(&self) -> &Arc<dyn GenerationBackend> {
        &self.backend
    }

    pub fn config(&self) -> &GenerationConfig {
        &self.config
    }

    /// Returns a JSON object satisfying `schema` (when given).
    ///
    /// `messages` is extended in place with the schema instructions and any
    /// corrective messages, so callers can inspect the final conversation.
    pub async fn generate_structured(
        &self,
        messages: &mut Vec<Message>,
        schema: Option<&ExtractionSchema>,
    ) -> Result<Value, RagError> {
        if let Some(schema) = schema {
            append_to_last(messages, &schema.instructions())?;
        }
        self.converse(messages, ResponseFormat::Json, |raw| {
            let mut value = parse_json_response(raw)?;
            apply_all(&self.normalizers, &mut value);
            if let Some(schema) = schema {
                schema.validate(&value)?;
            }
            Ok(value)
        })
        .await
    }

    /// Plain-text completion with the same retry policy.
    pub async fn complete(&self, messages: &mut Vec<Message>) -> Result<String, RagError> {
        self.converse(messages, ResponseFormat::Text, |raw| {
            let text = raw.trim();
            if text.is_empty() {
                Err(RagError::MalformedResponse("empty response".to_string()))
            } else {
                Ok(text.to_string())
            }
        })
        .await
    }

    async fn converse<T, F>(
        &self,
        messages: &mut Vec<Message>,
        format: ResponseFormat,
        interpret: F,
    ) -> Result<T, RagError>
    where
        F: Fn(&str) -> Result<T, RagError>,
    {
        if messages.is_empty() {
            return Err(RagError::Configuration(
                "cannot generate from an empty conversation".to_string(),
            ));
        }

        let max_retries = self.config.max_retries;
        let mut attempts = 0;

        loop {
            attempts += 1;
            let outcome = match self.send(messages, format).await {
                Ok(raw) => interpret(&raw),
                Err(err) => Err(err),
            };

            match outcome {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempts <= max_retries => {
                    tracing::warn!(
                        "{} attempt {}/{} failed: {}",
                        self.backend.name(),
                        attempts,
                        max_retries + 1,
                        err
                    );
                    messages.push(Message::user(corrective_message(&err)));
                    let backoff = self.config.retry_backoff_ms * attempts as u64;
                    if backoff > 0 {
                        tokio::time::sleep(Duration::from_millis(backoff)).await;
                    }
                }
                Err(err) => {
                    tracing::error!(
                        "{} generation failed after {} attempt(s): {}",
                        self.backend.name(),
                        attempts,
                        err
                    );
                    return Err(err);
                }
            }
        }
    }

    async fn send(&self, messages: &[Message], format: ResponseFormat) -> Result<String, RagError> {
        let request = GenerationRequest::new(messages.to_vec(), &self.config).with_format(format);
        let limit = Duration::from_secs(self.config.timeout_secs);

        match tokio::time::timeout(limit, self.backend.generate(&request)).await {
            Ok(result) => result,
            Err(_) => Err(RagError::Timeout(format!(
                "no reply from {} within {}s",
                self.backend.name(),
                self.config.timeout_secs
            ))),
        }
    }
}

fn append_to_last(messages: &mut [Message], suffix: &str) -> Result<(), RagError> {
    let last = messages.last_mut().ok_or_else(|| {
        RagError::Configuration("cannot generate from an empty conversation".to_string())
    })?;
    last.content.push_str(suffix);
    Ok(())
}

/// Message sent back to the model after a failed attempt.
pub fn corrective_message(err: &RagError) -> String {
    format!(
        "The previous response attempt was invalid. Error type: {}. Error details: {}. \
         Please try again with a valid response, ensuring the output matches the expected \
         format and constraints.",
        err.kind(),
        err
    )
}

/// Parses `raw` as JSON, falling back to the span between the first `{`
/// and the last `}` when the model wrapped its answer in prose.
pub fn parse_json_response(raw: &str) -> Result<Value, RagError> {
    if let Ok(value) = serde_json::from_str::<Value>(raw.trim()) {
        return Ok(value);
    }

    let (Some(start), Some(end)) = (raw.find('{'), raw.rfind('}')) else {
        return Err(RagError::MalformedResponse(format!(
            "no JSON object in reply: {}",
            truncate(raw)
        )));
    };
    if end <= start {
        return Err(RagError::MalformedResponse(format!(
            "no JSON object in reply: {}",
            truncate(raw)
        )));
    }

    serde_json::from_str::<Value>(&raw[start..=end]).map_err(|err| {
        RagError::MalformedResponse(format!("{} in reply: {}", err, truncate(raw)))
    })
}

fn truncate(raw: &str) -> String {
    raw.chars().take(200).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::schema::ExtractedEdges;
    use crate::llm::types::ProviderModel;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    /// Replays canned replies and records every request it receives.
    struct ScriptedBackend {
        replies: Mutex<Vec<Result<String, RagError>>>,
        seen: Mutex<Vec<GenerationRequest>>,
    }

    impl ScriptedBackend {
        fn new(replies: Vec<Result<String, RagError>>) -> Arc<Self> {
            let mut replies = replies;
            replies.reverse();
            Arc::new(Self {
                replies: Mutex::new(replies),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.seen.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl GenerationBackend for ScriptedBackend {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn health_check(&self) -> Result<bool, RagError> {
            Ok(true)
        }

        async fn list_models(&self) -> Result<Vec<ProviderModel>, RagError> {
            Ok(Vec::new())
        }

        async fn generate(&self, request: &GenerationRequest) -> Result<String, RagError> {
            self.seen.lock().unwrap().push(request.clone());
            self.replies
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Ok("not json".to_string()))
        }
    }

    fn config(max_retries: usize) -> GenerationConfig {
        GenerationConfig {
            max_retries,
            retry_backoff_ms: 0,
            ..GenerationConfig::default()
        }
    }

    fn edges_schema() -> ExtractionSchema {
        ExtractionSchema::for_type::<ExtractedEdges>().unwrap()
    }

    #[test]
    fn json_is_recovered_from_surrounding_noise() {
        assert_eq!(
            parse_json_response("noise {\"edges\": []} trailing").unwrap(),
            json!({ "edges": [] })
        );
        assert_eq!(parse_json_response(" {\"a\": 1} ").unwrap(), json!({ "a": 1 }));
        assert!(matches!(
            parse_json_response("} backwards {"),
            Err(RagError::MalformedResponse(_))
        ));
        assert!(parse_json_response("no braces at all").is_err());
        assert!(parse_json_response("{ broken: }").is_err());
    }

    #[tokio::test]
    async fn always_malformed_replies_use_exactly_three_attempts() {
        let backend = ScriptedBackend::new(vec![]);
        let client = StructuredClient::new(backend.clone(), config(2));
        let mut messages = vec![Message::system("Extract edges."), Message::user("Alice met Bob.")];

        let err = client
            .generate_structured(&mut messages, Some(&edges_schema()))
            .await
            .unwrap_err();

        assert!(matches!(err, RagError::MalformedResponse(_)));
        assert_eq!(backend.calls(), 3);
        // one corrective message per retry
        assert_eq!(messages.len(), 4);

        let seen = backend.seen.lock().unwrap();
        let lengths: Vec<usize> = seen.iter().map(|r| r.messages.len()).collect();
        assert_eq!(lengths, vec![2, 3, 4]);
        assert!(seen[2].messages[3].content.contains("MalformedResponseError"));
        assert_eq!(seen[0].format, ResponseFormat::Json);
    }

    #[tokio::test]
    async fn schema_instructions_are_appended_to_the_last_message() {
        let backend = ScriptedBackend::new(vec![Ok("{\"edges\": []}".to_string())]);
        let client = StructuredClient::new(backend.clone(), config(2));
        let mut messages = vec![Message::system("Extract edges."), Message::user("Alice met Bob.")];

        let value = client
            .generate_structured(&mut messages, Some(&edges_schema()))
            .await
            .unwrap();

        assert_eq!(value, json!({ "edges": [] }));
        assert_eq!(messages[0].content, "Extract edges.");
        assert!(messages[1].content.starts_with("Alice met Bob."));
        assert!(messages[1].content.contains("Do NOT return the schema itself"));
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn normalization_runs_before_validation() {
        let reply = r#"Sure! {"edges": [{"relation_type": "KNOWS", "source_entity_id": null, "target_entity_id": 2}]}"#;
        let backend = ScriptedBackend::new(vec![Ok(reply.to_string())]);
        let client = StructuredClient::new(backend.clone(), config(2));
        let mut messages = vec![Message::user("Alice knows Bob.")];

        let value = client
            .generate_structured(&mut messages, Some(&edges_schema()))
            .await
            .unwrap();

        assert_eq!(value["edges"][0]["source_entity_id"], json!(0));
        assert_eq!(value["edges"][0]["fact"], Value::Null);
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn schema_violation_is_retried_then_succeeds() {
        let backend = ScriptedBackend::new(vec![
            Ok(r#"{"edge": []}"#.to_string()),
            Ok(r#"{"edges": []}"#.to_string()),
        ]);
        let client = StructuredClient::new(backend.clone(), config(2));
        let mut messages = vec![Message::user("Alice met Bob.")];

        client
            .generate_structured(&mut messages, Some(&edges_schema()))
            .await
            .unwrap();

        assert_eq!(backend.calls(), 2);
        assert!(messages[1].content.contains("SchemaViolationError"));
    }

    #[tokio::test]
    async fn non_retryable_errors_surface_immediately() {
        let backend = ScriptedBackend::new(vec![Err(RagError::Configuration("bad model".to_string()))]);
        let client = StructuredClient::new(backend.clone(), config(2));
        let mut messages = vec![Message::user("hi")];

        let err = client.generate_structured(&mut messages, None).await.unwrap_err();
        assert!(matches!(err, RagError::Configuration(_)));
        assert_eq!(backend.calls(), 1);
        assert_eq!(messages.len(), 1);
    }

    #[tokio::test]
    async fn zero_retries_means_one_attempt() {
        let backend = ScriptedBackend::new(vec![Err(RagError::Backend("503".to_string()))]);
        let client = StructuredClient::new(backend.clone(), config(0));
        let mut messages = vec![Message::user("hi")];

        assert!(client.complete(&mut messages).await.is_err());
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn backend_errors_are_retried_for_plain_completions() {
        let backend = ScriptedBackend::new(vec![
            Err(RagError::Timeout("slow".to_string())),
            Ok("  The answer is 42.  ".to_string()),
        ]);
        let client = StructuredClient::new(backend.clone(), config(2));
        let mut messages = vec![Message::user("What is the answer?")];

        let text = client.complete(&mut messages).await.unwrap();
        assert_eq!(text, "The answer is 42.");
        assert_eq!(backend.seen.lock().unwrap()[0].format, ResponseFormat::Text);
    }

    #[tokio::test]
    async fn empty_conversation_is_rejected() {
        let client = StructuredClient::new(ScriptedBackend::new(vec![]), config(2));
        let mut messages = Vec::new();
        assert!(matches!(
            client.generate_structured(&mut messages, Some(&edges_schema())).await,
            Err(RagError::Configuration(_))
        ));
    }
}
