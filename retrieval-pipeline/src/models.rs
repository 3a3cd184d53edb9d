use async_openai::types::{
    ChatCompletionRequestUserMessage, CreateChatCompletionRequestArgs,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use common::{
    error::AppError,
    storage::types::model_selector::ModelSelector,
    utils::config::AppConfig,
};

/// Sampling temperature for answer generation, fixed across providers.
const GENERATION_TEMPERATURE: f32 = 0.3;
/// Upper bound for generated answers; Anthropic requires it explicitly.
const GENERATION_MAX_TOKENS: u32 = 1024;
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// The generation seam: given a resolved selector, an optional tenant
/// credential, and the assembled prompt, produce the answer text.
///
/// Tests swap this for a scripted implementation; production uses
/// `ProviderDispatch`.
#[async_trait]
pub trait ModelDispatch: Send + Sync {
    async fn generate(
        &self,
        selector: ModelSelector,
        credential: Option<&str>,
        prompt: &str,
    ) -> Result<String, AppError>;
}

/// Real provider clients. Each selector variant carries its own credential
/// strategy: OpenAI runs on the tenant's decrypted key, Claude on the
/// deployment's ambient key.
pub struct ProviderDispatch {
    openai_base_url: String,
    openai_chat_model: String,
    anthropic_api_key: Option<String>,
    anthropic_base_url: String,
    anthropic_model: String,
    http: reqwest::Client,
}

impl ProviderDispatch {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            openai_base_url: config.openai_base_url.clone(),
            openai_chat_model: config.openai_chat_model.clone(),
            anthropic_api_key: config.anthropic_api_key.clone(),
            anthropic_base_url: config.anthropic_base_url.clone(),
            anthropic_model: config.anthropic_model.clone(),
            http: reqwest::Client::new(),
        }
    }

    async fn generate_openai(&self, api_key: &str, prompt: &str) -> Result<String, AppError> {
        let client = async_openai::Client::with_config(
            async_openai::config::OpenAIConfig::new()
                .with_api_key(api_key)
                .with_api_base(&self.openai_base_url),
        );

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.openai_chat_model)
            .temperature(GENERATION_TEMPERATURE)
            .max_tokens(GENERATION_MAX_TOKENS)
            .messages([ChatCompletionRequestUserMessage::from(prompt).into()])
            .build()
            .map_err(|e| AppError::Generation(format!("invalid chat request: {e}")))?;

        let response = client
            .chat()
            .create(request)
            .await
            .map_err(|e| AppError::Generation(format!("openai request failed: {e}")))?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.is_empty())
            .ok_or_else(|| AppError::Generation("openai returned no content".into()))
    }

    async fn generate_claude(&self, prompt: &str) -> Result<String, AppError> {
        let api_key = self.anthropic_api_key.as_deref().ok_or_else(|| {
            AppError::Config("anthropic_api_key is not configured for the claude selector".into())
        })?;

        let request = AnthropicRequest {
            model: self.anthropic_model.clone(),
            max_tokens: GENERATION_MAX_TOKENS,
            temperature: GENERATION_TEMPERATURE,
            messages: vec![AnthropicMessage {
                role: "user",
                content: prompt.to_owned(),
            }],
        };

        let response = self
            .http
            .post(format!("{}/v1/messages", self.anthropic_base_url))
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::Generation(format!("anthropic request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Generation(format!(
                "anthropic returned {status}: {body}"
            )));
        }

        let parsed: AnthropicResponse = response
            .json()
            .await
            .map_err(|e| AppError::Generation(format!("malformed anthropic response: {e}")))?;

        let answer: String = parsed
            .content
            .into_iter()
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("");

        if answer.is_empty() {
            return Err(AppError::Generation("anthropic returned no content".into()));
        }

        Ok(answer)
    }
}

#[async_trait]
impl ModelDispatch for ProviderDispatch {
    async fn generate(
        &self,
        selector: ModelSelector,
        credential: Option<&str>,
        prompt: &str,
    ) -> Result<String, AppError> {
        match selector {
            ModelSelector::OpenAi => {
                let api_key = credential.ok_or_else(|| {
                    AppError::Generation("openai selector requires a tenant credential".into())
                })?;
                self.generate_openai(api_key, prompt).await
            }
            ModelSelector::Claude => self.generate_claude(prompt).await,
        }
    }
}

#[derive(Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<AnthropicMessage>,
}

#[derive(Serialize)]
struct AnthropicMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContentBlock>,
}

#[derive(Deserialize)]
struct AnthropicContentBlock {
    text: Option<String>,
}
