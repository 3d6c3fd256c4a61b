use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Clone, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Local,
    Memory,
}

fn default_storage_kind() -> StorageKind {
    StorageKind::Local
}

#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    pub openai_api_key: String,
    pub surrealdb_address: String,
    pub surrealdb_username: String,
    pub surrealdb_password: String,
    pub surrealdb_namespace: String,
    pub surrealdb_database: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_base_url")]
    pub openai_base_url: String,
    #[serde(default = "default_storage_kind")]
    pub storage: StorageKind,

    /// Embedding backend: "fastembed" (default), "openai" or "hashed".
    #[serde(default = "default_embedding_backend")]
    pub embedding_backend: String,
    pub embedding_model: Option<String>,
    #[serde(default = "default_embedding_dimensions")]
    pub embedding_dimensions: u32,

    // Chunking. Character-based with a fixed overlap so a re-ingest of the
    // same bytes reproduces the identical split.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,

    // Retrieval.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,

    // Generation profiles. "quick" trades capacity for latency.
    #[serde(default = "default_quick_model")]
    pub quick_model: String,
    #[serde(default = "default_detailed_model")]
    pub detailed_model: String,
    #[serde(default = "default_generation_enabled")]
    pub generation_enabled: bool,
    #[serde(default = "default_generation_timeout_secs")]
    pub generation_timeout_secs: u64,
    #[serde(default = "default_retrieval_timeout_secs")]
    pub retrieval_timeout_secs: u64,
}

fn default_data_dir() -> String {
    "./data".to_string()
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_embedding_backend() -> String {
    "fastembed".to_string()
}

fn default_embedding_dimensions() -> u32 {
    384
}

fn default_chunk_size() -> usize {
    1200
}

fn default_chunk_overlap() -> usize {
    200
}

fn default_top_k() -> usize {
    5
}

fn default_similarity_threshold() -> f32 {
    0.35
}

fn default_max_context_chars() -> usize {
    6000
}

fn default_quick_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_detailed_model() -> String {
    "gpt-4o".to_string()
}

fn default_generation_enabled() -> bool {
    true
}

fn default_generation_timeout_secs() -> u64 {
    30
}

fn default_retrieval_timeout_secs() -> u64 {
    10
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default())
        .build()?;

    config.try_deserialize()
}

#[cfg(any(test, feature = "test-utils"))]
impl AppConfig {
    /// Config for tests: in-memory storage, hashed embeddings, no network.
    pub fn test_defaults() -> Self {
        Self {
            openai_api_key: "test-key".to_string(),
            surrealdb_address: "mem://".to_string(),
            surrealdb_username: "root".to_string(),
            surrealdb_password: "root".to_string(),
            surrealdb_namespace: "test".to_string(),
            surrealdb_database: "test".to_string(),
            data_dir: "./data".to_string(),
            openai_base_url: default_base_url(),
            storage: StorageKind::Memory,
            embedding_backend: "hashed".to_string(),
            embedding_model: None,
            embedding_dimensions: 16,
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            top_k: default_top_k(),
            similarity_threshold: default_similarity_threshold(),
            max_context_chars: default_max_context_chars(),
            quick_model: "quick-test-model".to_string(),
            detailed_model: "detailed-test-model".to_string(),
            generation_enabled: true,
            generation_timeout_secs: 5,
            retrieval_timeout_secs: 5,
        }
    }
}
