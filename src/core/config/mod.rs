pub mod defaults;
pub mod paths;
pub mod service;
pub mod validation;

pub use defaults::{
    ChunkingConfig, DistanceMetric, EmbeddingConfig, GenerationConfig, ProviderKind, RagConfig,
    RetrievalConfig, StoreBackend, StoreConfig, TransmissionMode,
};
pub use paths::AppPaths;
pub use service::ConfigService;
