use thiserror::Error;

use crate::core::errors::RagError;

#[derive(Debug, Error)]
pub enum InitializationError {
    #[error("Failed to load configuration: {0}")]
    Config(#[source] RagError),

    #[error("Failed to initialize similarity store: {0}")]
    Store(#[source] RagError),

    #[error("Failed to initialize LLM backend: {0}")]
    Llm(#[source] RagError),

    #[error("Failed to initialize document sources: {0}")]
    Sources(#[source] RagError),
}
