//! Best-effort one-line summaries for breakpoints.
//!
//! When the agent does not supply a summary, the controller asks the
//! summarizer for one before forwarding the message to the UI. The adapter
//! is strictly best-effort: any failure is logged and yields `None`, never
//! an error into the controller.

mod prompts;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::error::SummarizerError;
use crate::model::{Breakpoint, BreakpointPhase, EventType, Payload, Run};

/// Produces a one-line summary for a breakpoint, or nothing.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, run: &Run, breakpoint: &Breakpoint) -> Option<String>;
}

/// Summarizer that never produces anything. Used when no API key is
/// configured, and in tests.
pub struct NoopSummarizer;

#[async_trait]
impl Summarizer for NoopSummarizer {
    async fn summarize(&self, _run: &Run, _breakpoint: &Breakpoint) -> Option<String> {
        None
    }
}

/// Summarizer backed by an OpenAI-compatible chat completions endpoint.
pub struct OpenAiSummarizer {
    client: Client,
    base_url: String,
    model: String,
    api_key: SecretString,
}

impl OpenAiSummarizer {
    /// Build a summarizer from the environment (`OPENAI_API_KEY`). Returns
    /// `None` when no key is present, which downgrades summarization to a
    /// no-op.
    pub fn from_env(base_url: &str, model: &str) -> Option<Self> {
        let key = std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty());
        let Some(key) = key else {
            tracing::warn!("OPENAI_API_KEY not set, breakpoint summarization disabled");
            return None;
        };
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| Client::new());
        Some(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key: SecretString::new(key),
        })
    }

    async fn complete(&self, system_prompt: String) -> Result<String, SummarizerError> {
        let url = format!("{}/chat/completions", self.base_url);
        let request = ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![ChatCompletionMessage {
                role: "system",
                content: system_prompt,
            }],
        };

        let response = self
            .client
            .post(&url)
            .header(
                "Authorization",
                format!("Bearer {}", self.api_key.expose_secret()),
            )
            .json(&request)
            .send()
            .await
            .map_err(|e| SummarizerError::RequestFailed {
                reason: e.to_string(),
            })?;

        let status = response.status();
        if status.as_u16() == 401 {
            return Err(SummarizerError::AuthFailed);
        }
        if status.as_u16() == 429 {
            return Err(SummarizerError::RateLimited);
        }
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(SummarizerError::RequestFailed {
                reason: format!("HTTP {status}: {body}"),
            });
        }

        let parsed: ChatCompletionResponse =
            serde_json::from_str(&body).map_err(|e| SummarizerError::InvalidResponse {
                reason: format!("JSON parse error: {e}"),
            })?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| SummarizerError::InvalidResponse {
                reason: "no choices in response".to_string(),
            })
    }
}

#[async_trait]
impl Summarizer for OpenAiSummarizer {
    async fn summarize(&self, run: &Run, breakpoint: &Breakpoint) -> Option<String> {
        let prompt = build_prompt(run, breakpoint)?;
        match self.complete(prompt).await {
            Ok(summary) => Some(summary.trim().to_string()),
            Err(e) => {
                tracing::warn!("breakpoint summarization failed: {e}");
                None
            }
        }
    }
}

/// Select and assemble the prompt for a breakpoint. Program lifecycle,
/// debug and message-phase breakpoints are not summarizable.
fn build_prompt(run: &Run, breakpoint: &Breakpoint) -> Option<String> {
    let event = run.event(&breakpoint.event_id)?;
    let data = breakpoint.original_data.as_ref().map(Payload::to_text)?;

    let prompt = match (event.event_type, breakpoint.phase) {
        (EventType::LlmQuery, BreakpointPhase::Begin) => {
            let previous = run
                .queries_before(event.sent_at)
                .last()
                .and_then(|query| query.begin_breakpoint())
                .and_then(Breakpoint::effective_data)
                .map(Payload::to_text)
                .unwrap_or_default();
            format!(
                "{}\n\n\"{previous}\"\n\nBelow is the message to summarize:",
                prompts::SUMMARIZE_QUERY_REQUEST
            )
        }
        (EventType::LlmQuery, BreakpointPhase::End) => {
            prompts::SUMMARIZE_QUERY_RESPONSE.to_string()
        }
        (EventType::ToolInvocation, BreakpointPhase::Begin) => {
            prompts::SUMMARIZE_TOOL_CALL.to_string()
        }
        (EventType::ToolInvocation, BreakpointPhase::End) => {
            prompts::SUMMARIZE_TOOL_RESULT.to_string()
        }
        _ => return None,
    };

    Some(format!("{prompt}\n\n\"{data}\""))
}

#[derive(Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatCompletionMessage>,
}

#[derive(Serialize)]
struct ChatCompletionMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatCompletionChoice>,
}

#[derive(Deserialize)]
struct ChatCompletionChoice {
    message: ChatCompletionChoiceMessage,
}

#[derive(Deserialize)]
struct ChatCompletionChoiceMessage {
    content: Option<String>,
}
