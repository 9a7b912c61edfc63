//! Streaming chat completions against an OpenAI-compatible endpoint
//!
//! Sends the bounded conversation context and forwards SSE deltas as text
//! fragments in arrival order. The producer task stops as soon as the
//! receiving side is dropped, which is how cancellation propagates here.

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::GenerationConfig;
use crate::error::PipelineError;
use crate::stages::{FragmentStream, Generator};
use crate::types::Turn;

pub struct ChatClient {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    system_prompt: String,
    max_new_tokens: u32,
    temperature: f32,
    top_p: f32,
    repetition_penalty: f32,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
    top_p: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    repetition_penalty: Option<f32>,
    stream: bool,
}

#[derive(Deserialize)]
struct StreamResponse {
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

/// Extract the text delta from one SSE `data:` payload. `[DONE]` and
/// non-content events (role announcements, finish markers) yield `None`.
fn parse_delta(data: &str) -> Option<String> {
    if data == "[DONE]" {
        return None;
    }
    let resp: StreamResponse = serde_json::from_str(data).ok()?;
    resp.choices.first()?.delta.content.clone()
}

impl ChatClient {
    pub fn from_config(config: &GenerationConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            system_prompt: config.system_prompt.clone(),
            max_new_tokens: config.max_new_tokens,
            temperature: config.temperature,
            top_p: config.top_p,
            repetition_penalty: config.repetition_penalty,
        }
    }

    fn build_request(&self, turns: &[Turn]) -> ChatRequest {
        let mut messages = Vec::with_capacity(turns.len() + 1);
        if !self.system_prompt.is_empty() {
            messages.push(ChatMessage {
                role: "system",
                content: self.system_prompt.clone(),
            });
        }
        messages.extend(turns.iter().map(|t| ChatMessage {
            role: t.role.as_api_str(),
            content: t.content.clone(),
        }));
        ChatRequest {
            model: self.model.clone(),
            messages,
            max_tokens: self.max_new_tokens,
            temperature: self.temperature,
            top_p: self.top_p,
            repetition_penalty: (self.repetition_penalty != 1.0)
                .then_some(self.repetition_penalty),
            stream: true,
        }
    }
}

#[async_trait]
impl Generator for ChatClient {
    async fn generate(&self, turns: &[Turn]) -> Result<FragmentStream, PipelineError> {
        let request = self.build_request(turns);
        debug!("Requesting completion: {} messages, model={}", turns.len(), self.model);

        let mut req_builder = self
            .client
            .post(format!("{}/chat/completions", self.base_url));
        if !self.api_key.is_empty() {
            req_builder =
                req_builder.header("Authorization", format!("Bearer {}", self.api_key));
        }

        let response = req_builder
            .json(&request)
            .send()
            .await
            .map_err(|e| PipelineError::Generation(format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::Generation(format!(
                "API error ({}): {}",
                status, body
            )));
        }

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            let mut buffer = String::new();

            while let Some(chunk) = stream.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        let err = PipelineError::Generation(format!("stream read failed: {}", e));
                        let _ = tx.send(Err(err)).await;
                        return;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                // SSE events are separated by blank lines
                while let Some(pos) = buffer.find("\n\n") {
                    let event_str = buffer[..pos].to_string();
                    buffer = buffer[pos + 2..].to_string();

                    for line in event_str.lines() {
                        if let Some(data) = line.strip_prefix("data: ") {
                            if let Some(content) = parse_delta(data) {
                                if tx.send(Ok(content)).await.is_err() {
                                    // Receiver dropped: the turn was cancelled.
                                    warn!("Fragment receiver gone, stopping stream");
                                    return;
                                }
                            }
                        }
                    }
                }
            }
            // Channel closes on drop, signalling end-of-reply.
        });

        Ok(rx)
    }
}
