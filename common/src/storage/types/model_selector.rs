use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::AppError;

/// The closed set of generation providers a collection can be bound to.
///
/// Selection is total: anything outside this enum is `UnsupportedModel` at
/// the point of use, never a silent default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelSelector {
    /// OpenAI-compatible chat endpoint, paid for with the tenant's own key.
    OpenAi,
    /// Anthropic endpoint using the deployment's ambient credential.
    Claude,
}

impl ModelSelector {
    /// Whether answering through this provider needs the tenant's
    /// decrypted key. `Claude` runs on the ambient credential, so the
    /// stored ciphertext is never touched for it.
    pub fn requires_tenant_credential(&self) -> bool {
        matches!(self, Self::OpenAi)
    }

    pub fn parse(value: &str) -> Result<Self, AppError> {
        match value.to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "claude" => Ok(Self::Claude),
            other => Err(AppError::UnsupportedModel(other.to_owned())),
        }
    }
}

impl std::str::FromStr for ModelSelector {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value)
    }
}

impl fmt::Display for ModelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ModelSelector::OpenAi => "openai",
            ModelSelector::Claude => "claude",
        };
        f.write_str(label)
    }
}
