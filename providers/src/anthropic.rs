//! Anthropic-style provider client (C5): the messages API used by
//! Anthropic itself and by BaseURL-compatible upstreams (Z.AI and similar).
//!
//! The SSE state machine is grounded on the teacher's `sse_types::claude`
//! typed-event module and the `ClaudeParser` it feeds (`claude.rs`), here
//! rebuilt against this system's canonical `Turn`/`Part`/`StreamingChunk`
//! types instead of the teacher's `StreamEvent` callback enum.

use std::sync::Arc;
use std::sync::Mutex;

use forge_types::{
    ClientIdentity, FinishReason, FunctionCall, JsonMap, Part, Provider, Role, StreamingChunk,
    ToolDefinition, Turn,
};
use rand::RngCore;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use crate::client::{ProviderClient, estimate_token_count};
use crate::error::ClientError;
use crate::ratelimit::{RateLimiter, estimate_tokens};
use crate::retry::execute_with_retry;
use crate::sse::SseDecoder;
use crate::stream::{self, ChunkSender, ChunkStream};
use forge_types::RetryConfig;

const CANONICAL_HOST: &str = "https://api.anthropic.com";
const ZAI_MARKER: &str = "z.ai";
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    max_output_tokens: u32,
    temperature: f64,
    thinking_budget: Option<u32>,
    tools: Mutex<Vec<ToolDefinition>>,
    system_instruction: Mutex<Option<String>>,
    rate_limiter: Mutex<Option<Arc<dyn RateLimiter>>>,
    retry: RetryConfig,
}

impl AnthropicClient {
    #[must_use]
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            max_output_tokens: 4096,
            temperature: 1.0,
            thinking_budget: None,
            tools: Mutex::new(Vec::new()),
            system_instruction: Mutex::new(None),
            rate_limiter: Mutex::new(None),
            retry,
        }
    }

    #[must_use]
    pub fn with_thinking_budget(mut self, budget: Option<u32>) -> Self {
        self.thinking_budget = budget;
        self
    }

    /// URL routing for Anthropic-style backends (§4.5 tie-breaks).
    fn endpoint_and_zai(&self) -> (String, bool) {
        if self.base_url.trim_end_matches('/') == CANONICAL_HOST {
            return (format!("{CANONICAL_HOST}/v1/messages"), false);
        }
        if self.base_url.to_ascii_lowercase().contains(ZAI_MARKER) {
            let base = self.base_url.trim_end_matches('/');
            let url = if base.ends_with("/anthropic") {
                format!("{base}/v1/messages")
            } else {
                format!("{base}/anthropic/v1/messages")
            };
            return (url, true);
        }
        (format!("{}/v1/messages", self.base_url.trim_end_matches('/')), false)
    }

    fn build_body(&self, history: &[Turn]) -> Value {
        let messages = turns_to_messages(history);
        let mut body = json!({
            "model": self.model,
            "max_tokens": self.max_output_tokens,
            "messages": messages,
            "stream": true,
        });

        if let Some(system) = self.system_instruction.lock().expect("poisoned").clone() {
            body["system"] = json!(system);
        }

        let tools = self.tools.lock().expect("poisoned").clone();
        if !tools.is_empty() {
            body["tools"] = json!(
                tools
                    .iter()
                    .map(|t| json!({
                        "name": t.name,
                        "description": t.description,
                        "input_schema": t.parameters.normalized(),
                    }))
                    .collect::<Vec<_>>()
            );
        }

        if let Some(budget) = self.thinking_budget {
            body["thinking"] = json!({"type": "enabled", "budget_tokens": budget});
            // Extended thinking forces temperature=1.0 regardless of configured value.
            body["temperature"] = json!(1.0);
        } else {
            body["temperature"] = json!(self.temperature);
        }

        body
    }

    async fn stream_request(
        &self,
        cancel: &CancellationToken,
        history: Vec<Turn>,
    ) -> Result<ChunkStream, ClientError> {
        let (endpoint, is_zai) = self.endpoint_and_zai();
        let body = self.build_body(&history);

        let limiter = self.rate_limiter.lock().expect("poisoned").clone();
        let tokens = estimate_tokens(history.len(), self.max_output_tokens);
        if let Some(limiter) = &limiter {
            limiter.acquire(cancel, tokens).await?;
        }

        let response = execute_with_retry(cancel, &self.retry, || {
            let mut req = self
                .http
                .post(&endpoint)
                .header("content-type", "application/json")
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .json(&body);
            if is_zai {
                req = req.header("authorization", format!("Bearer {}", self.api_key));
            }
            req.send()
        })
        .await;

        let response = match response {
            Ok(r) => r,
            Err(err) => {
                if let Some(limiter) = &limiter {
                    limiter.return_tokens(1, tokens);
                }
                return Err(err);
            }
        };

        let (sender, receiver) = stream::channel();
        let cancel = cancel.clone();
        let byte_stream = response.bytes_stream();
        tokio::spawn(run_anthropic_stream(
            byte_stream,
            sender,
            cancel,
            limiter,
            tokens,
        ));
        Ok(receiver)
    }
}

fn turns_to_messages(history: &[Turn]) -> Vec<Value> {
    let mut messages: Vec<Value> = Vec::new();
    for turn in history {
        let role = match turn.role {
            Role::User => "user",
            Role::Model => "assistant",
        };
        let blocks: Vec<Value> = turn.parts.iter().map(part_to_block).collect();
        let blocks = if blocks.is_empty() {
            vec![json!({"type": "text", "text": "Continue."})]
        } else {
            blocks
        };
        messages.push(json!({"role": role, "content": blocks}));
    }
    messages
}

fn part_to_block(part: &Part) -> Value {
    match part {
        Part::Text(text) => json!({"type": "text", "text": text}),
        Part::FunctionCall(call) => json!({
            "type": "tool_use",
            "id": call.id,
            "name": call.name,
            "input": call.args.0,
        }),
        Part::FunctionResponse(resp) => json!({
            "type": "tool_result",
            "tool_use_id": resp.id,
            "id": resp.id,
            "content": resp.response.0.to_string(),
        }),
        Part::InlineBinaryData { .. } => json!({"type": "text", "text": ""}),
    }
}

/// Replace a missing tool-use id with `"toolu_" + 12 random bytes (hex)`,
/// synthesized exactly once per tool-use block and then used consistently
/// downstream (§9 Anthropic tool id reconciliation).
fn synthesize_tool_id() -> String {
    let mut bytes = [0u8; 12];
    rand::rng().fill_bytes(&mut bytes);
    let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
    format!("toolu_{hex}")
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Event {
    MessageStart {
        message: MessageInfo,
    },
    MessageDelta {
        delta: Option<MessageDeltaInfo>,
        usage: Option<OutputUsage>,
    },
    ContentBlockStart {
        content_block: ContentBlock,
    },
    ContentBlockDelta {
        delta: Delta,
    },
    ContentBlockStop,
    MessageStop,
    Ping,
    Error {
        error: ErrorInfo,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Deserialize, Default)]
struct MessageInfo {
    #[serde(default)]
    usage: Option<InputUsage>,
}

#[derive(Deserialize, Default)]
struct InputUsage {
    #[serde(default)]
    input_tokens: u32,
}

#[derive(Deserialize, Default)]
struct OutputUsage {
    #[serde(default)]
    output_tokens: u32,
}

#[derive(Deserialize)]
struct MessageDeltaInfo {
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Deserialize)]
struct ErrorInfo {
    #[serde(default)]
    message: String,
    #[serde(default, rename = "type")]
    error_type: String,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text { #[serde(default)] text: String },
    ToolUse {
        #[serde(default)]
        id: String,
        #[serde(default)]
        name: String,
    },
    Thinking { #[serde(default)] thinking: String },
    #[serde(other)]
    Unknown,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Delta {
    TextDelta { text: String },
    ThinkingDelta { thinking: String },
    InputJsonDelta { partial_json: String },
    #[serde(other)]
    Unknown,
}

#[derive(Default)]
struct ParserState {
    current_tool_id: Option<String>,
    current_tool_name: String,
    tool_json_accum: String,
    in_tool_block: bool,
    pending_calls: Vec<FunctionCall>,
}

async fn run_anthropic_stream(
    byte_stream: impl futures_util::Stream<Item = reqwest::Result<bytes::Bytes>> + Unpin,
    sender: ChunkSender,
    cancel: CancellationToken,
    limiter: Option<Arc<dyn RateLimiter>>,
    acquired_tokens: u32,
) {
    let mut decoder = SseDecoder::new(byte_stream);
    let mut state = ParserState::default();
    let mut input_tokens = None;
    let mut output_tokens = None;
    let mut finish_reason = FinishReason::Stop;

    loop {
        if sender.is_cancelled() || cancel.is_cancelled() {
            if let Some(limiter) = &limiter {
                limiter.return_tokens(1, acquired_tokens);
            }
            return;
        }

        let payload = tokio::select! {
            () = cancel.cancelled() => {
                let _ = sender.send(StreamingChunk::error("cancelled")).await;
                if let Some(limiter) = &limiter { limiter.return_tokens(1, acquired_tokens); }
                return;
            }
            payload = decoder.next_payload() => payload,
        };

        let payload = match payload {
            Ok(Some(p)) => p,
            Ok(None) => break,
            Err(err) => {
                if let Some(limiter) = &limiter {
                    limiter.return_tokens(1, acquired_tokens);
                }
                let _ = sender.send(StreamingChunk::error(err.user_message())).await;
                return;
            }
        };

        let Ok(event) = serde_json::from_str::<Event>(&payload) else {
            tracing::warn!(raw = %payload, "dropping malformed Anthropic SSE event");
            continue;
        };

        match event {
            Event::MessageStart { message } => {
                if let Some(usage) = message.usage {
                    input_tokens = Some(usage.input_tokens);
                }
            }
            Event::MessageDelta { delta, usage } => {
                if let Some(usage) = usage {
                    output_tokens = Some(usage.output_tokens);
                }
                if let Some(stop_reason) = delta.and_then(|d| d.stop_reason) {
                    finish_reason = match stop_reason.as_str() {
                        "max_tokens" => FinishReason::MaxTokens,
                        _ => FinishReason::Stop,
                    };
                }
            }
            Event::ContentBlockStart { content_block } => match content_block {
                ContentBlock::ToolUse { id, name } => {
                    let id = if id.is_empty() {
                        tracing::warn!(name = %name, "Anthropic tool_use block missing id, synthesizing one");
                        synthesize_tool_id()
                    } else {
                        id
                    };
                    state.current_tool_id = Some(id);
                    state.current_tool_name = name;
                    state.tool_json_accum.clear();
                    state.in_tool_block = true;
                }
                ContentBlock::Text { .. } | ContentBlock::Thinking { .. } | ContentBlock::Unknown => {
                    state.in_tool_block = false;
                }
            },
            Event::ContentBlockDelta { delta } => match delta {
                Delta::TextDelta { text } => {
                    if sender.send(StreamingChunk::text(text)).await.is_err() {
                        if let Some(limiter) = &limiter { limiter.return_tokens(1, acquired_tokens); }
                        return;
                    }
                }
                Delta::ThinkingDelta { thinking } => {
                    if sender.send(StreamingChunk::thinking(thinking)).await.is_err() {
                        if let Some(limiter) = &limiter { limiter.return_tokens(1, acquired_tokens); }
                        return;
                    }
                }
                Delta::InputJsonDelta { partial_json } => {
                    state.tool_json_accum.push_str(&partial_json);
                }
                Delta::Unknown => {}
            },
            Event::ContentBlockStop => {
                if state.in_tool_block {
                    let args = match serde_json::from_str::<Value>(&state.tool_json_accum) {
                        Ok(v) => v,
                        Err(_) => {
                            tracing::error!(
                                raw = %state.tool_json_accum,
                                "failed to parse Anthropic tool-call arguments, degrading to empty args"
                            );
                            json!({})
                        }
                    };
                    if let Some(id) = state.current_tool_id.take() {
                        state.pending_calls.push(FunctionCall {
                            id,
                            name: std::mem::take(&mut state.current_tool_name),
                            args: JsonMap(args),
                        });
                    }
                }
                state.in_tool_block = false;
            }
            Event::MessageStop => break,
            Event::Error { error } => {
                let message = if error.message.is_empty() {
                    format!("Anthropic stream error: {}", error.error_type)
                } else {
                    error.message
                };
                let _ = sender.send(StreamingChunk::error(message)).await;
                if let Some(limiter) = &limiter {
                    limiter.return_tokens(1, acquired_tokens);
                }
                return;
            }
            Event::Ping | Event::Unknown => {}
        }
    }

    let finish = StreamingChunk {
        function_calls: state.pending_calls,
        finish_reason: Some(finish_reason),
        input_tokens,
        output_tokens,
        done: true,
        ..Default::default()
    };
    let _ = sender.send(finish).await;
}

#[async_trait::async_trait]
impl ProviderClient for AnthropicClient {
    async fn send_with_history(
        &self,
        cancel: &CancellationToken,
        history: &[Turn],
        new_message: Turn,
    ) -> Result<ChunkStream, ClientError> {
        let mut full_history = history.to_vec();
        full_history.push(new_message);
        self.stream_request(cancel, full_history).await
    }

    async fn send_tool_responses(
        &self,
        cancel: &CancellationToken,
        history: &[Turn],
        responses: Vec<Part>,
    ) -> Result<ChunkStream, ClientError> {
        let mut full_history = history.to_vec();
        full_history.push(Turn::new(Role::User, responses));
        self.stream_request(cancel, full_history).await
    }

    fn set_tools(&self, tools: Vec<ToolDefinition>) {
        *self.tools.lock().expect("poisoned") = tools;
    }

    fn set_system_instruction(&self, instruction: Option<String>) {
        *self.system_instruction.lock().expect("poisoned") = instruction;
    }

    fn set_rate_limiter(&self, limiter: Arc<dyn RateLimiter>) {
        *self.rate_limiter.lock().expect("poisoned") = Some(limiter);
    }

    fn count_tokens(&self, history: &[Turn]) -> u32 {
        estimate_token_count(history, &self.model)
    }

    fn get_model(&self) -> &str {
        &self.model
    }

    fn with_model(self: Arc<Self>, new_model: String) -> Arc<dyn ProviderClient> {
        Arc::new(AnthropicClient {
            http: self.http.clone(),
            base_url: self.base_url.clone(),
            api_key: self.api_key.clone(),
            model: new_model,
            max_output_tokens: self.max_output_tokens,
            temperature: self.temperature,
            thinking_budget: self.thinking_budget,
            tools: Mutex::new(self.tools.lock().expect("poisoned").clone()),
            system_instruction: Mutex::new(self.system_instruction.lock().expect("poisoned").clone()),
            rate_limiter: Mutex::new(self.rate_limiter.lock().expect("poisoned").clone()),
            retry: self.retry,
        })
    }

    fn identity(&self) -> ClientIdentity {
        ClientIdentity::new(Provider::AnthropicCompatible, self.model.clone())
    }

    async fn close(&self) {}
}
