use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::utils::embedding::EmbeddingBackend;

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
    pub surrealdb_address: String,
    pub surrealdb_username: String,
    pub surrealdb_password: String,
    pub surrealdb_namespace: String,
    pub surrealdb_database: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_storage_kind")]
    pub storage: StorageKind,
    /// Path to the base64 key material for the credential vault. Startup
    /// fails when the file is absent; there is no fallback key.
    #[serde(default = "default_vault_key_path")]
    pub vault_key_path: String,
    #[serde(default)]
    pub embedding_backend: EmbeddingBackend,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_embedding_dimensions")]
    pub embedding_dimensions: u32,
    /// Ambient credential for the embedding endpoint. Tenant keys are only
    /// used for generation, never for embeddings.
    #[serde(default)]
    pub embedding_api_key: String,
    #[serde(default = "default_openai_base_url")]
    pub openai_base_url: String,
    #[serde(default = "default_openai_chat_model")]
    pub openai_chat_model: String,
    /// Ambient Anthropic credential used by the `claude` selector.
    #[serde(default)]
    pub anthropic_api_key: Option<String>,
    #[serde(default = "default_anthropic_base_url")]
    pub anthropic_base_url: String,
    #[serde(default = "default_anthropic_model")]
    pub anthropic_model: String,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    #[serde(default = "default_retrieval_top_k")]
    pub retrieval_top_k: usize,
    #[serde(default = "default_handle_cache_capacity")]
    pub handle_cache_capacity: usize,
}

fn default_data_dir() -> String {
    "./data".to_string()
}

fn default_vault_key_path() -> String {
    "./vault.key".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_embedding_dimensions() -> u32 {
    1536
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_openai_chat_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_anthropic_base_url() -> String {
    "https://api.anthropic.com".to_string()
}

fn default_anthropic_model() -> String {
    "claude-3-5-sonnet-20240620".to_string()
}

fn default_chunk_size() -> usize {
    300
}

fn default_chunk_overlap() -> usize {
    30
}

fn default_retrieval_top_k() -> usize {
    3
}

fn default_handle_cache_capacity() -> usize {
    100
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            surrealdb_address: String::new(),
            surrealdb_username: String::new(),
            surrealdb_password: String::new(),
            surrealdb_namespace: String::new(),
            surrealdb_database: String::new(),
            data_dir: default_data_dir(),
            storage: default_storage_kind(),
            vault_key_path: default_vault_key_path(),
            embedding_backend: EmbeddingBackend::default(),
            embedding_model: default_embedding_model(),
            embedding_dimensions: default_embedding_dimensions(),
            embedding_api_key: String::new(),
            openai_base_url: default_openai_base_url(),
            openai_chat_model: default_openai_chat_model(),
            anthropic_api_key: None,
            anthropic_base_url: default_anthropic_base_url(),
            anthropic_model: default_anthropic_model(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            retrieval_top_k: default_retrieval_top_k(),
            handle_cache_capacity: default_handle_cache_capacity(),
        }
    }
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default())
        .build()?;

    config.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_pipeline_constants() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.chunk_size, 300);
        assert_eq!(cfg.chunk_overlap, 30);
        assert_eq!(cfg.retrieval_top_k, 3);
        assert_eq!(cfg.handle_cache_capacity, 100);
        assert_eq!(cfg.storage, StorageKind::Local);
    }
}
