use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use memchr::memchr;
use reqwest::StatusCode;
use std::error::Error as StdError;
use std::fmt;
use std::time::Duration;
use tracing::debug;

use crate::api::{ChatMessage, ChatRequest, ChatResponse};
use crate::core::config::Settings;
use crate::core::message::Conversation;
use crate::core::profile::Profile;
use crate::core::window::WindowManager;

/// Finite, non-restartable sequence of reply fragments.
///
/// Failures after the request is built (bad status, dropped connection,
/// stalled stream) arrive as a single diagnostic fragment and end the stream.
pub type FragmentStream = BoxStream<'static, String>;

/// Failures that prevent a request from being issued at all.
#[derive(Debug)]
pub enum ChatError {
    Encode(serde_json::Error),
    Client(reqwest::Error),
}

impl fmt::Display for ChatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatError::Encode(err) => write!(f, "Failed to encode chat request: {err}"),
            ChatError::Client(err) => write!(f, "Failed to set up HTTP client: {err}"),
        }
    }
}

impl StdError for ChatError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            ChatError::Encode(err) => Some(err),
            ChatError::Client(err) => Some(err),
        }
    }
}

/// Anything that can turn a prompt plus history into a stream of reply text.
pub trait CompletionSource: Send + Sync {
    fn stream_completion(
        &self,
        prompt: &str,
        conversation: &Conversation,
        profile: &Profile,
    ) -> Result<FragmentStream, ChatError>;
}

#[derive(Debug, PartialEq, Eq)]
enum SseLine {
    Fragment(String),
    Done,
    Skip,
}

fn extract_data_payload(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(str::trim_start)
}

fn handle_data_payload(payload: &str) -> SseLine {
    if payload == "[DONE]" {
        return SseLine::Done;
    }
    if payload.trim().is_empty() {
        return SseLine::Skip;
    }

    match serde_json::from_str::<ChatResponse>(payload) {
        Ok(response) => response
            .first_delta_content()
            .map(|content| SseLine::Fragment(content.to_string()))
            .unwrap_or(SseLine::Skip),
        Err(err) => {
            debug!(error = %err, payload, "skipping malformed stream chunk");
            SseLine::Skip
        }
    }
}

fn process_sse_line(line: &str) -> SseLine {
    extract_data_payload(line)
        .map(handle_data_payload)
        .unwrap_or(SseLine::Skip)
}

/// `<base_url>/chat/completions`, tolerating a trailing slash on the base.
fn completions_url(base_url: &str) -> String {
    format!("{}/chat/completions", base_url.trim_end_matches('/'))
}

fn extract_error_summary(value: &serde_json::Value) -> Option<String> {
    let summary = value
        .pointer("/error/message")
        .and_then(|v| v.as_str())
        .map(str::to_owned)
        .or_else(|| {
            value.get("error").and_then(|v| match v {
                serde_json::Value::String(s) => Some(s.to_string()),
                _ => None,
            })
        })
        .or_else(|| {
            value
                .get("message")
                .and_then(|v| v.as_str().map(str::to_owned))
        });

    summary
        .map(|text| text.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|text| !text.is_empty())
}

fn format_status_error(status: StatusCode, body: &str) -> String {
    let summary = serde_json::from_str::<serde_json::Value>(body.trim())
        .ok()
        .and_then(|value| extract_error_summary(&value));

    match summary {
        Some(summary) => format!("[API error] status {}: {}", status.as_u16(), summary),
        None => format!("[API error] status {}", status.as_u16()),
    }
}

fn format_transport_error(err: &dyn fmt::Display) -> String {
    format!("[connection error] {err}")
}

fn format_idle_timeout(idle: Duration) -> String {
    format_transport_error(&format!("no data received for {idle:?}, giving up"))
}

/// Streams chat completions from an OpenAI-compatible endpoint.
#[derive(Clone)]
pub struct ChatStreamService {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    max_response_tokens: usize,
    idle_timeout: Duration,
    window: WindowManager,
}

impl ChatStreamService {
    pub fn new(
        settings: &Settings,
        api_key: String,
        window: WindowManager,
    ) -> Result<Self, ChatError> {
        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .build()
            .map_err(ChatError::Client)?;

        Ok(Self {
            client,
            base_url: settings.base_url.clone(),
            api_key,
            model: settings.model.clone(),
            max_response_tokens: settings.max_response_tokens,
            idle_timeout: settings.idle_timeout,
            window,
        })
    }

    /// `max_tokens` for a request: what is left of the context ceiling after
    /// the serialized messages, capped at the configured response maximum.
    pub fn response_token_cap(&self, messages: &[ChatMessage]) -> Result<usize, ChatError> {
        let serialized = serde_json::to_string(messages).map_err(ChatError::Encode)?;
        let request_cost = self.window.counter().count_tokens(&serialized);
        let remaining = self
            .window
            .limits()
            .max_tokens
            .saturating_sub(request_cost);
        Ok(remaining.min(self.max_response_tokens).max(1))
    }

    pub fn build_request(
        &self,
        prompt: &str,
        conversation: &Conversation,
        profile: &Profile,
    ) -> Result<ChatRequest, ChatError> {
        let messages = self.window.prepare_messages(conversation, profile, prompt);
        let max_tokens = self.response_token_cap(&messages)?;

        Ok(ChatRequest {
            model: self.model.clone(),
            messages,
            stream: true,
            max_tokens,
        })
    }
}

impl CompletionSource for ChatStreamService {
    fn stream_completion(
        &self,
        prompt: &str,
        conversation: &Conversation,
        profile: &Profile,
    ) -> Result<FragmentStream, ChatError> {
        let request = self.build_request(prompt, conversation, profile)?;
        debug!(
            model = %request.model,
            messages = request.messages.len(),
            max_tokens = request.max_tokens,
            "starting completion stream"
        );

        let chat_url = completions_url(&self.base_url);
        let http_request = self
            .client
            .post(chat_url)
            .header("Content-Type", "application/json")
            .bearer_auth(&self.api_key)
            .json(&request);
        let idle = self.idle_timeout;

        let stream = async_stream::stream! {
            let response = match tokio::time::timeout(idle, http_request.send()).await {
                Ok(Ok(response)) => response,
                Ok(Err(err)) => {
                    yield format_transport_error(&err);
                    return;
                }
                Err(_) => {
                    yield format_idle_timeout(idle);
                    return;
                }
            };

            let status = response.status();
            if !status.is_success() {
                // The body only adds a summary; a stalled body still reports the status.
                let body = match tokio::time::timeout(idle, response.text()).await {
                    Ok(Ok(body)) => body,
                    Ok(Err(err)) => {
                        debug!(error = %err, "failed to read error body");
                        String::new()
                    }
                    Err(_) => {
                        debug!(?idle, "timed out reading error body");
                        String::new()
                    }
                };
                yield format_status_error(status, &body);
                return;
            }

            let mut bytes = response.bytes_stream();
            let mut buffer: Vec<u8> = Vec::new();

            loop {
                let next = match tokio::time::timeout(idle, bytes.next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        yield format_idle_timeout(idle);
                        return;
                    }
                };
                let chunk = match next {
                    Some(Ok(chunk)) => chunk,
                    Some(Err(err)) => {
                        yield format_transport_error(&err);
                        return;
                    }
                    None => break,
                };
                buffer.extend_from_slice(&chunk);

                while let Some(newline_pos) = memchr(b'\n', &buffer) {
                    let line_bytes: Vec<u8> = buffer.drain(..=newline_pos).collect();
                    let line = match std::str::from_utf8(&line_bytes) {
                        Ok(line) => line.trim(),
                        Err(err) => {
                            debug!(error = %err, "skipping stream line with invalid UTF-8");
                            continue;
                        }
                    };
                    match process_sse_line(line) {
                        SseLine::Fragment(content) => yield content,
                        SseLine::Done => return,
                        SseLine::Skip => {}
                    }
                }
            }

            // Servers may close without a trailing newline.
            if let Ok(line) = std::str::from_utf8(&buffer) {
                if let SseLine::Fragment(content) = process_sse_line(line.trim()) {
                    yield content;
                }
            }
        };

        Ok(Box::pin(stream))
    }
}
