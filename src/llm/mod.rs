//! Language model providers
//!
//! The loop talks to a model through [`LanguageModel`] only. Providers are
//! chosen once, at session start, from [`ProviderKind`].

pub mod gemini;
pub mod openai;

use crate::config::Settings;
use crate::error::RepairError;
use async_trait::async_trait;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

pub use gemini::GeminiModel;
pub use openai::OpenAiCompatibleModel;

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const HUGGINGFACE_BASE_URL: &str = "https://router.huggingface.co/v1";
const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Openai,
    Huggingface,
    Gemini,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Openai => "openai",
            ProviderKind::Huggingface => "huggingface",
            ProviderKind::Gemini => "gemini",
        }
    }

    /// Environment variables checked for an API key, in order.
    pub fn api_key_env_vars(&self) -> &'static [&'static str] {
        match self {
            ProviderKind::Openai => &["LLM_PROVIDER_API_KEY", "OPENAI_API_KEY"],
            ProviderKind::Huggingface => &["HF_TOKEN", "HUGGINGFACE_API_KEY"],
            ProviderKind::Gemini => &["GEMINI_API_KEY"],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid API key for {provider}")]
    Unauthorized { provider: &'static str },

    #[error("rate limited by {provider} after {retries} retries, try again in a few minutes")]
    RateLimited { provider: &'static str, retries: u32 },

    #[error("{provider} server error ({status}), the service may be temporarily unavailable")]
    Server { provider: &'static str, status: u16 },

    #[error("{provider} API error {status}: {message}")]
    Api {
        provider: &'static str,
        status: u16,
        message: String,
    },

    #[error("failed to parse {provider} response: {message}")]
    Decode {
        provider: &'static str,
        message: String,
    },
}

/// A stateless text generator. Each call carries the full conversation.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Provider and model, for logs.
    fn describe(&self) -> String;

    async fn generate(
        &self,
        messages: &[ChatMessage],
        system_prompt: Option<&str>,
    ) -> Result<String, LlmError>;
}

/// How HTTP 429 responses are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff for the given 1-based retry.
    fn backoff(&self, retry: u32) -> Duration {
        self.initial_backoff * 2u32.saturating_pow(retry.saturating_sub(1))
    }
}

/// Extract a "retry after N seconds" style hint from an error body.
fn parse_retry_after(text: &str) -> Option<u64> {
    let text_lower = text.to_lowercase();
    let pos = text_lower.find("retry")?;
    text_lower[pos..]
        .split_whitespace()
        .skip(1)
        .take(5)
        .filter_map(|word| {
            word.trim_matches(|c: char| !c.is_numeric())
                .parse::<u64>()
                .ok()
        })
        .find(|secs| *secs > 0 && *secs < 300)
}

/// Send a request built by `build`, retrying 429s per `policy`.
/// Returns the body of the first successful response.
pub(crate) async fn send_with_retry<F>(
    provider: &'static str,
    policy: RetryPolicy,
    build: F,
) -> Result<String, LlmError>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let mut retry_count = 0;

    loop {
        let response = build().send().await?;
        let status = response.status();
        let text = response.text().await?;

        if status.is_success() {
            return Ok(text);
        }

        if status.as_u16() == 429 && retry_count < policy.max_retries {
            retry_count += 1;
            let wait = parse_retry_after(&text)
                .map(Duration::from_secs)
                .unwrap_or_else(|| policy.backoff(retry_count));
            warn!(
                "{} rate limited. Retrying in {:?} (attempt {}/{})",
                provider, wait, retry_count, policy.max_retries
            );
            tokio::time::sleep(wait).await;
            continue;
        }

        return Err(match status.as_u16() {
            401 | 403 => LlmError::Unauthorized { provider },
            429 => LlmError::RateLimited {
                provider,
                retries: retry_count,
            },
            code @ 500..=599 => LlmError::Server {
                provider,
                status: code,
            },
            code => LlmError::Api {
                provider,
                status: code,
                message: crate::util::truncate(&text, 200),
            },
        });
    }
}

/// Look up the API key for `provider`: environment first, then keychain.
pub fn resolve_api_key(provider: ProviderKind) -> Result<String, RepairError> {
    let env_vars = provider.api_key_env_vars();
    env_vars
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .find(|key| !key.trim().is_empty())
        .or_else(|| crate::keyring::get_api_key(provider.as_str()))
        .ok_or(RepairError::MissingApiKey {
            provider: provider.as_str(),
            env_var: env_vars[0],
        })
}

/// Build the configured provider.
pub fn build_model(settings: &Settings) -> Result<Box<dyn LanguageModel>, RepairError> {
    let api_key = resolve_api_key(settings.provider)?;
    let client = reqwest::Client::builder()
        .timeout(settings.request_timeout)
        .build()
        .map_err(|e| RepairError::Config(format!("failed to build HTTP client: {}", e)))?;

    let model: Box<dyn LanguageModel> = match settings.provider {
        ProviderKind::Openai => Box::new(OpenAiCompatibleModel::new(
            client,
            ProviderKind::Openai.as_str(),
            settings.openai_base_url.as_deref().unwrap_or(OPENAI_BASE_URL),
            &settings.model,
            api_key,
        )),
        ProviderKind::Huggingface => Box::new(OpenAiCompatibleModel::new(
            client,
            ProviderKind::Huggingface.as_str(),
            HUGGINGFACE_BASE_URL,
            &settings.model,
            api_key,
        )),
        ProviderKind::Gemini => Box::new(GeminiModel::new(
            client,
            GEMINI_BASE_URL,
            &settings.model,
            api_key,
        )),
    };
    Ok(model)
}
