use super::{send_with_retry, ChatMessage, LanguageModel, LlmError, RetryPolicy, Role};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Any endpoint speaking the OpenAI `/chat/completions` protocol
/// (OpenAI itself, self-hosted gateways, the Hugging Face router).
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleModel {
    client: reqwest::Client,
    provider: &'static str,
    endpoint: String,
    model: String,
    api_key: String,
    retry: RetryPolicy,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<&'a ChatMessage>,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: MessageContent,
}

#[derive(Deserialize)]
struct MessageContent {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiCompatibleModel {
    pub fn new(
        client: reqwest::Client,
        provider: &'static str,
        base_url: &str,
        model: &str,
        api_key: String,
    ) -> Self {
        Self {
            client,
            provider,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            model: model.to_string(),
            api_key,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

#[async_trait]
impl LanguageModel for OpenAiCompatibleModel {
    fn describe(&self) -> String {
        format!("{} ({})", self.provider, self.model)
    }

    async fn generate(
        &self,
        messages: &[ChatMessage],
        system_prompt: Option<&str>,
    ) -> Result<String, LlmError> {
        let system = system_prompt.map(|content| ChatMessage {
            role: Role::System,
            content: content.to_string(),
        });
        let request = ChatRequest {
            model: &self.model,
            messages: system.iter().chain(messages.iter()).collect(),
            stream: false,
        };

        let body = send_with_retry(self.provider, self.retry, || {
            self.client
                .post(&self.endpoint)
                .header("Content-Type", "application/json")
                .bearer_auth(&self.api_key)
                .json(&request)
        })
        .await?;

        let parsed: ChatResponse = serde_json::from_str(&body).map_err(|e| LlmError::Decode {
            provider: self.provider,
            message: format!("{}: {}", e, crate::util::truncate(&body, 200)),
        })?;

        Ok(parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default())
    }
}
