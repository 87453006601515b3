use serde::{Deserialize, Serialize};

pub const DEFAULT_OLLAMA_BASE_URL: &str = "http://127.0.0.1:11434";
pub const DEFAULT_LMSTUDIO_BASE_URL: &str = "http://127.0.0.1:1234";
pub const DEFAULT_EMBEDDING_MODEL: &str = "nomic-embed-text:latest";
pub const DEFAULT_GENERATION_MODEL: &str = "qwen2.5vl:7b";
pub const DEFAULT_TABLE: &str = "embeddings_table";

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a friendly assistant. \
Answer the user's question using the reference material provided. \
Respond in a concise, technically credible tone. \
If the reference material does not contain the answer, say that you don't know.";

/// Fully resolved configuration, built once at start-up.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RagConfig {
    pub chunking: ChunkingConfig,
    pub embedding: EmbeddingConfig,
    pub generation: GenerationConfig,
    pub store: StoreConfig,
    pub retrieval: RetrievalConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Ollama,
    Lmstudio,
}

impl ProviderKind {
    pub fn default_base_url(&self) -> &'static str {
        match self {
            ProviderKind::Ollama => DEFAULT_OLLAMA_BASE_URL,
            ProviderKind::Lmstudio => DEFAULT_LMSTUDIO_BASE_URL,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Window length in whitespace-delimited words.
    pub chunk_size: usize,
    /// Words shared by consecutive windows.
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            overlap: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: ProviderKind,
    pub base_url: Option<String>,
    pub model: String,
    pub dimension: usize,
    pub timeout_secs: u64,
    /// Upper bound on embedding calls per second; unbounded when absent.
    pub requests_per_second: Option<u32>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Ollama,
            base_url: None,
            model: DEFAULT_EMBEDDING_MODEL.to_string(),
            dimension: 768,
            timeout_secs: 240,
            requests_per_second: None,
        }
    }
}

impl EmbeddingConfig {
    pub fn base_url(&self) -> &str {
        self.base_url
            .as_deref()
            .unwrap_or_else(|| self.provider.default_base_url())
    }
}

/// How the message sequence is handed to the generation backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransmissionMode {
    /// Full role-tagged message list; text comes back in `message.content`.
    Chat,
    /// Messages flattened into one prompt; text comes back in `response`.
    Prompt,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub provider: ProviderKind,
    pub base_url: Option<String>,
    pub model: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub timeout_secs: u64,
    pub max_retries: usize,
    pub retry_backoff_ms: u64,
    pub transmission: TransmissionMode,
    pub keep_alive: Option<String>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Ollama,
            base_url: None,
            model: DEFAULT_GENERATION_MODEL.to_string(),
            temperature: 0.0,
            max_output_tokens: 1000,
            timeout_secs: 720,
            max_retries: 2,
            retry_backoff_ms: 250,
            transmission: TransmissionMode::Chat,
            keep_alive: Some("5m".to_string()),
        }
    }
}

impl GenerationConfig {
    pub fn base_url(&self) -> &str {
        self.base_url
            .as_deref()
            .unwrap_or_else(|| self.provider.default_base_url())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    Sqlite,
    Postgres,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    Cosine,
    L2,
    InnerProduct,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub database_url: Option<String>,
    /// Defaults to `<data_dir>/vectors.db` when unset.
    pub sqlite_path: Option<String>,
    pub table: String,
    pub metric: DistanceMetric,
    pub max_connections: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Sqlite,
            database_url: None,
            sqlite_path: None,
            table: DEFAULT_TABLE.to_string(),
            metric: DistanceMetric::Cosine,
            max_connections: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: usize,
    pub rerank: bool,
    pub system_prompt: String,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 3,
            rerank: false,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_yaml_keeps_section_defaults() {
        let yaml = "generation:\n  model: llama3\n  transmission: prompt\nstore:\n  metric: l2\n";
        let config: RagConfig = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.generation.model, "llama3");
        assert_eq!(config.generation.transmission, TransmissionMode::Prompt);
        assert_eq!(config.generation.max_retries, 2);
        assert_eq!(config.store.metric, DistanceMetric::L2);
        assert_eq!(config.store.table, DEFAULT_TABLE);
        assert_eq!(config.chunking.chunk_size, 500);
        assert_eq!(config.chunking.overlap, 100);
        assert_eq!(config.retrieval.top_k, 3);
    }

    #[test]
    fn base_url_falls_back_to_provider_default() {
        let mut embedding = EmbeddingConfig::default();
        assert_eq!(embedding.base_url(), DEFAULT_OLLAMA_BASE_URL);
        embedding.provider = ProviderKind::Lmstudio;
        assert_eq!(embedding.base_url(), DEFAULT_LMSTUDIO_BASE_URL);
        embedding.base_url = Some("http://gpu-box:11434".to_string());
        assert_eq!(embedding.base_url(), "http://gpu-box:11434");
    }
}
