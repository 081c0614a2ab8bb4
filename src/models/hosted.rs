use std::time::Duration;

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

use super::{ChatModel, ChatRequest};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

#[derive(Clone, Debug)]
pub struct HostedModelConfig {
    pub name: String,
    pub base_url: String,
    pub api_key: String,
    pub request_timeout: Duration,
}

/// OpenAI-compatible `/chat/completions` client.
pub struct HostedChatModel {
    name: String,
    url: String,
    api_key: String,
    client: Client,
}

impl HostedChatModel {
    pub fn new(cfg: HostedModelConfig) -> Result<Self> {
        if cfg.api_key.trim().is_empty() {
            return Err(PipelineError::Configuration("empty API key".to_string()));
        }
        let client = Client::builder()
            .timeout(cfg.request_timeout)
            .build()
            .map_err(|err| PipelineError::Configuration(format!("build http client: {err}")))?;
        let base = cfg.base_url.trim_end_matches('/');
        Ok(Self {
            name: cfg.name,
            url: format!("{base}/chat/completions"),
            api_key: cfg.api_key,
            client,
        })
    }
}

#[derive(Serialize)]
struct CompletionBody<'a> {
    model: &'a str,
    messages: [Message<'a>; 2],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl ChatModel for HostedChatModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn chat(&self, request: &ChatRequest) -> Result<String> {
        let body = CompletionBody {
            model: &self.name,
            messages: [
                Message {
                    role: "system",
                    content: &request.system,
                },
                Message {
                    role: "user",
                    content: &request.user,
                },
            ],
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().unwrap_or_default();
            let detail: String = detail.chars().take(400).collect();
            return Err(PipelineError::Transport(format!(
                "{} call failed with status {status}: {detail}",
                self.name
            )));
        }

        let parsed: CompletionResponse = response.json()?;
        first_choice_text(parsed).ok_or_else(|| {
            PipelineError::Transport(format!("{} response missing message content", self.name))
        })
    }
}

fn first_choice_text(resp: CompletionResponse) -> Option<String> {
    resp.choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .map(|s| s.trim().to_string())
}
