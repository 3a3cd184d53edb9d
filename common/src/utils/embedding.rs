use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
    sync::Arc,
};

use anyhow::anyhow;
use async_openai::{types::CreateEmbeddingRequestArgs, Client};
use serde::Deserialize;

use crate::error::AppError;
use crate::utils::config::AppConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    OpenAi,
    /// Deterministic token-bucket embeddings; offline, used by tests and
    /// air-gapped deployments.
    Hashed,
}

impl Default for EmbeddingBackend {
    fn default() -> Self {
        Self::OpenAi
    }
}

impl EmbeddingBackend {
    pub fn label(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Hashed => "hashed",
        }
    }
}

impl std::str::FromStr for EmbeddingBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "hashed" => Ok(Self::Hashed),
            other => Err(anyhow!(
                "unknown embedding backend '{other}'. Expected 'openai' or 'hashed'."
            )),
        }
    }
}

/// Everything that distinguishes one embedding deployment from another.
/// The fingerprint is the process-wide cache key for providers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbedderConfig {
    pub backend: EmbeddingBackend,
    pub model: String,
    pub dimensions: u32,
    pub api_key: String,
    pub base_url: String,
}

impl EmbedderConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            backend: config.embedding_backend,
            model: config.embedding_model.clone(),
            dimensions: config.embedding_dimensions,
            api_key: config.embedding_api_key.clone(),
            base_url: config.openai_base_url.clone(),
        }
    }

    /// Cache key: one provider per distinct deployment configuration.
    /// The api key is deliberately excluded so rotation reuses the handle.
    pub fn fingerprint(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            self.backend.label(),
            self.model,
            self.dimensions,
            self.base_url
        )
    }
}

#[derive(Clone)]
pub struct EmbeddingProvider {
    inner: EmbeddingInner,
}

#[derive(Clone)]
enum EmbeddingInner {
    OpenAi {
        client: Arc<Client<async_openai::config::OpenAIConfig>>,
        model: String,
        dimensions: u32,
    },
    Hashed {
        dimension: usize,
    },
}

impl EmbeddingProvider {
    /// Constructs the provider for a configuration. This is the expensive
    /// path that the resource cache amortizes; callers should go through
    /// `ResourcePool::embedder` instead of calling this directly.
    pub fn from_config(config: &EmbedderConfig) -> Result<Self, AppError> {
        match config.backend {
            EmbeddingBackend::OpenAi => {
                let client = Client::with_config(
                    async_openai::config::OpenAIConfig::new()
                        .with_api_key(&config.api_key)
                        .with_api_base(&config.base_url),
                );
                Ok(Self {
                    inner: EmbeddingInner::OpenAi {
                        client: Arc::new(client),
                        model: config.model.clone(),
                        dimensions: config.dimensions,
                    },
                })
            }
            EmbeddingBackend::Hashed => Ok(Self {
                inner: EmbeddingInner::Hashed {
                    dimension: config.dimensions.max(1) as usize,
                },
            }),
        }
    }

    pub fn dimension(&self) -> usize {
        match &self.inner {
            EmbeddingInner::OpenAi { dimensions, .. } => *dimensions as usize,
            EmbeddingInner::Hashed { dimension } => *dimension,
        }
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, AppError> {
        match &self.inner {
            EmbeddingInner::Hashed { dimension } => Ok(hashed_embedding(text, *dimension)),
            EmbeddingInner::OpenAi {
                client,
                model,
                dimensions,
            } => {
                let request = CreateEmbeddingRequestArgs::default()
                    .model(model.clone())
                    .input([text])
                    .dimensions(*dimensions)
                    .build()?;

                let response = client.embeddings().create(request).await?;

                response
                    .data
                    .into_iter()
                    .next()
                    .map(|item| item.embedding)
                    .ok_or_else(|| {
                        AppError::Embedding("no embedding data received from provider".into())
                    })
            }
        }
    }

    pub async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, AppError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        match &self.inner {
            EmbeddingInner::Hashed { dimension } => Ok(texts
                .into_iter()
                .map(|text| hashed_embedding(&text, *dimension))
                .collect()),
            EmbeddingInner::OpenAi {
                client,
                model,
                dimensions,
            } => {
                let expected = texts.len();
                let request = CreateEmbeddingRequestArgs::default()
                    .model(model.clone())
                    .input(texts)
                    .dimensions(*dimensions)
                    .build()?;

                let response = client.embeddings().create(request).await?;

                let embeddings: Vec<Vec<f32>> = response
                    .data
                    .into_iter()
                    .map(|item| item.embedding)
                    .collect();

                if embeddings.len() != expected {
                    return Err(AppError::Embedding(format!(
                        "provider returned {} embeddings for {expected} inputs",
                        embeddings.len()
                    )));
                }

                Ok(embeddings)
            }
        }
    }
}

// Helper functions for hashed embeddings
fn hashed_embedding(text: &str, dimension: usize) -> Vec<f32> {
    let dim = dimension.max(1);
    let mut vector = vec![0.0f32; dim];
    if text.is_empty() {
        return vector;
    }

    for token in tokens(text) {
        let idx = bucket(&token, dim);
        vector[idx] += 1.0;
    }

    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in &mut vector {
            *value /= norm;
        }
    }

    vector
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(|token| token.to_ascii_lowercase())
}

fn bucket(token: &str, dimension: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    token.hash(&mut hasher);
    (hasher.finish() as usize) % dimension
}
