//! Gemini API-key client (C5): the direct `generativelanguage.googleapis.com`
//! surface, decoded as a stream of top-level JSON values rather than SSE
//! frames (§4.5: "iterator-based for Gemini-API").
//!
//! Grounded on the teacher's `gemini.rs` request/response shape (the
//! `contents`/`systemInstruction`/`generationConfig` wire fields,
//! `functionCall`/`functionResponse` part translation) and on the stream
//! idle-detection timers described in §5.

use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use forge_types::{
    ClientIdentity, FinishReason, FunctionCall, FunctionResponse, JsonMap, Part, Provider, Role,
    StreamingChunk, ToolDefinition, Turn,
};
use futures_util::{Stream, StreamExt};
use serde_json::{Value, json};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::client::{ProviderClient, StatusCallback, estimate_token_count};
use crate::error::ClientError;
use crate::ratelimit::{RateLimiter, estimate_tokens};
use crate::retry::execute_with_retry;
use crate::stream::{self, ChunkSender, ChunkStream};
use forge_types::RetryConfig;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const IDLE_WARNING: Duration = Duration::from_secs(15);
const IDLE_WARNING_REARM: Duration = Duration::from_secs(10);
const IDLE_HARD: Duration = Duration::from_secs(30);

pub struct GeminiApiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    thinking_budget: Option<u32>,
    tools: Mutex<Vec<ToolDefinition>>,
    system_instruction: Mutex<Option<String>>,
    rate_limiter: Mutex<Option<Arc<dyn RateLimiter>>>,
    status_callback: Mutex<Option<Arc<dyn StatusCallback>>>,
    retry: RetryConfig,
}

impl GeminiApiClient {
    #[must_use]
    pub fn new(
        http: reqwest::Client,
        api_key: impl Into<String>,
        model: impl Into<String>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            http,
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
            model: model.into(),
            thinking_budget: None,
            tools: Mutex::new(Vec::new()),
            system_instruction: Mutex::new(None),
            rate_limiter: Mutex::new(None),
            status_callback: Mutex::new(None),
            retry,
        }
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    #[must_use]
    pub fn with_thinking_budget(mut self, budget: Option<u32>) -> Self {
        self.thinking_budget = budget;
        self
    }

    pub fn set_status_callback(&self, callback: Arc<dyn StatusCallback>) {
        *self.status_callback.lock().expect("poisoned") = Some(callback);
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:streamGenerateContent?key={}",
            self.base_url.trim_end_matches('/'),
            self.model,
            self.api_key
        )
    }

    fn build_body(&self, history: &[Turn]) -> Value {
        let contents = turns_to_contents(history);
        let mut body = json!({"contents": contents});

        if let Some(system) = self.system_instruction.lock().expect("poisoned").clone() {
            body["systemInstruction"] = json!({"parts": [{"text": system}]});
        }

        let tools = self.tools.lock().expect("poisoned").clone();
        if !tools.is_empty() {
            body["tools"] = json!([{
                "functionDeclarations": tools.iter().map(|t| json!({
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.parameters,
                })).collect::<Vec<_>>(),
            }]);
        }

        let mut generation_config = serde_json::Map::new();
        if let Some(budget) = self.thinking_budget {
            generation_config.insert(
                "thinkingConfig".to_string(),
                json!({"thinkingBudget": budget}),
            );
        }
        if !generation_config.is_empty() {
            body["generationConfig"] = Value::Object(generation_config);
        }

        body
    }

    async fn stream_request(
        &self,
        cancel: &CancellationToken,
        history: Vec<Turn>,
    ) -> Result<ChunkStream, ClientError> {
        let body = self.build_body(&history);
        let endpoint = self.endpoint();

        let limiter = self.rate_limiter.lock().expect("poisoned").clone();
        let tokens = estimate_tokens(history.len(), 4096);
        if let Some(limiter) = &limiter {
            limiter.acquire(cancel, tokens).await?;
        }

        let response = execute_with_retry(cancel, &self.retry, || {
            self.http
                .post(&endpoint)
                .header("content-type", "application/json")
                .json(&body)
                .send()
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
        let status = self.status_callback.lock().expect("poisoned").clone();
        tokio::spawn(run_gemini_stream(
            response.bytes_stream(),
            sender,
            cancel,
            limiter,
            tokens,
            status,
        ));
        Ok(receiver)
    }
}

fn turns_to_contents(history: &[Turn]) -> Vec<Value> {
    history
        .iter()
        .map(|turn| {
            let role = match turn.role {
                Role::User => "user",
                Role::Model => "model",
            };
            let parts: Vec<Value> = turn.parts.iter().map(part_to_value).collect();
            json!({"role": role, "parts": parts})
        })
        .collect()
}

fn part_to_value(part: &Part) -> Value {
    match part {
        Part::Text(text) => json!({"text": text}),
        Part::FunctionCall(call) => json!({
            "functionCall": {"name": call.name, "args": call.args.0},
        }),
        Part::FunctionResponse(resp) => json!({
            "functionResponse": {"name": resp.name, "response": resp.response.0},
        }),
        Part::InlineBinaryData { mime_type, data } => {
            use base64::Engine;
            json!({
                "inlineData": {
                    "mimeType": mime_type,
                    "data": base64::engine::general_purpose::STANDARD.encode(data),
                },
            })
        }
    }
}

/// Extract complete top-level JSON values from a buffer containing a
/// streamed `[ {...}, {...} ]` array: skip structural `[`, `,`, `]` and
/// whitespace, then scan braces with string-literal awareness to find each
/// value's end.
struct JsonArrayScanner {
    buf: Vec<u8>,
}

impl JsonArrayScanner {
    fn new() -> Self {
        Self { buf: Vec::new() }
    }

    fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    fn next_value(&mut self) -> Option<Value> {
        let start = self.skip_structural(0)?;
        if self.buf.get(start) != Some(&b'{') {
            return None;
        }
        let end = crate::jsonscan::find_balanced_object_end(&self.buf[start..])? + start;
        let slice = &self.buf[start..=end];
        let value: Value = serde_json::from_slice(slice).ok()?;
        self.buf.drain(..=end);
        Some(value)
    }

    fn skip_structural(&self, from: usize) -> Option<usize> {
        self.buf[from..]
            .iter()
            .position(|b| !matches!(b, b'[' | b']' | b',' | b' ' | b'\n' | b'\r' | b'\t'))
            .map(|p| p + from)
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_gemini_stream(
    byte_stream: impl Stream<Item = reqwest::Result<bytes::Bytes>> + Unpin,
    sender: ChunkSender,
    cancel: CancellationToken,
    limiter: Option<Arc<dyn RateLimiter>>,
    acquired_tokens: u32,
    status: Option<Arc<dyn StatusCallback>>,
) {
    let mut byte_stream = byte_stream;
    let mut scanner = JsonArrayScanner::new();
    let mut pending_calls = Vec::new();
    let mut finish_reason = FinishReason::Stop;
    let mut input_tokens = None;
    let mut output_tokens = None;
    let mut warned = false;
    let mut deadline_warn = Instant::now() + IDLE_WARNING;
    let deadline_hard = Instant::now() + IDLE_HARD;

    loop {
        if let Some(value) = scanner.next_value() {
            handle_gemini_value(
                &value,
                &sender,
                &mut pending_calls,
                &mut finish_reason,
                &mut input_tokens,
                &mut output_tokens,
            )
            .await;
            deadline_warn = Instant::now() + IDLE_WARNING;
            if warned {
                warned = false;
                if let Some(status) = &status {
                    status.on_status("stream resumed");
                }
            }
            continue;
        }

        tokio::select! {
            () = cancel.cancelled() => {
                let _ = sender.send(StreamingChunk::error("cancelled")).await;
                if let Some(limiter) = &limiter { limiter.return_tokens(1, acquired_tokens); }
                return;
            }
            () = tokio::time::sleep_until(deadline_hard) => {
                let _ = sender.send(StreamingChunk::error("stream idle for 30s, aborting")).await;
                if let Some(limiter) = &limiter { limiter.return_tokens(1, acquired_tokens); }
                return;
            }
            () = tokio::time::sleep_until(deadline_warn), if !warned => {
                warned = true;
                deadline_warn = Instant::now() + IDLE_WARNING_REARM;
                if let Some(status) = &status {
                    status.on_status("stream idle for 15s, still waiting");
                }
            }
            chunk = byte_stream.next() => {
                match chunk {
                    Some(Ok(bytes)) => scanner.push(&bytes),
                    Some(Err(e)) => {
                        if let Some(limiter) = &limiter { limiter.return_tokens(1, acquired_tokens); }
                        let _ = sender.send(StreamingChunk::error(e.to_string())).await;
                        return;
                    }
                    None => break,
                }
            }
        }
    }

    let finish = StreamingChunk {
        function_calls: pending_calls,
        finish_reason: Some(finish_reason),
        input_tokens,
        output_tokens,
        done: true,
        ..Default::default()
    };
    let _ = sender.send(finish).await;
}

async fn handle_gemini_value(
    value: &Value,
    sender: &ChunkSender,
    pending_calls: &mut Vec<FunctionCall>,
    finish_reason: &mut FinishReason,
    input_tokens: &mut Option<u32>,
    output_tokens: &mut Option<u32>,
) {
    if let Some(usage) = value.get("usageMetadata") {
        if let Some(n) = usage.get("promptTokenCount").and_then(Value::as_u64) {
            *input_tokens = Some(n as u32);
        }
        if let Some(n) = usage.get("candidatesTokenCount").and_then(Value::as_u64) {
            *output_tokens = Some(n as u32);
        }
    }

    let Some(candidate) = value.get("candidates").and_then(|c| c.get(0)) else {
        return;
    };

    if let Some(reason) = candidate.get("finishReason").and_then(Value::as_str) {
        *finish_reason = match reason {
            "MAX_TOKENS" => FinishReason::MaxTokens,
            _ => FinishReason::Stop,
        };
    }

    let Some(parts) = candidate
        .get("content")
        .and_then(|c| c.get("parts"))
        .and_then(Value::as_array)
    else {
        return;
    };

    for part in parts {
        if let Some(text) = part.get("text").and_then(Value::as_str) {
            let _ = sender.send(StreamingChunk::text(text)).await;
        }
        if let Some(call) = part.get("functionCall") {
            let name = call.get("name").and_then(Value::as_str).unwrap_or_default();
            let args = call.get("args").cloned().unwrap_or_else(|| json!({}));
            pending_calls.push(FunctionCall {
                id: format!("gemini_call_{}", pending_calls.len()),
                name: name.to_string(),
                args: JsonMap(args),
            });
        }
    }
}

#[async_trait::async_trait]
impl ProviderClient for GeminiApiClient {
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
        Arc::new(GeminiApiClient {
            http: self.http.clone(),
            base_url: self.base_url.clone(),
            api_key: self.api_key.clone(),
            model: new_model,
            thinking_budget: self.thinking_budget,
            tools: Mutex::new(self.tools.lock().expect("poisoned").clone()),
            system_instruction: Mutex::new(self.system_instruction.lock().expect("poisoned").clone()),
            rate_limiter: Mutex::new(self.rate_limiter.lock().expect("poisoned").clone()),
            status_callback: Mutex::new(self.status_callback.lock().expect("poisoned").clone()),
            retry: self.retry,
        })
    }

    fn identity(&self) -> ClientIdentity {
        ClientIdentity::new(Provider::GeminiApiKey, self.model.clone())
    }

    async fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> GeminiApiClient {
        GeminiApiClient::new(reqwest::Client::new(), "key", "gemini-3-pro", RetryConfig::default())
    }

    #[test]
    fn endpoint_includes_model_and_key() {
        let url = client().endpoint();
        assert!(url.contains("gemini-3-pro"));
        assert!(url.contains("key=key"));
    }

    #[test]
    fn thinking_budget_sets_generation_config() {
        let c = client().with_thinking_budget(Some(1024));
        let body = c.build_body(&[Turn::user_text("hi")]);
        assert_eq!(body["generationConfig"]["thinkingConfig"]["thinkingBudget"], 1024);
    }

    #[test]
    fn scanner_extracts_successive_array_elements() {
        let mut scanner = JsonArrayScanner::new();
        scanner.push(b"[{\"a\":1}, {\"b\":2}]");
        let first = scanner.next_value().unwrap();
        assert_eq!(first["a"], 1);
        let second = scanner.next_value().unwrap();
        assert_eq!(second["b"], 2);
        assert!(scanner.next_value().is_none());
    }

    #[test]
    fn scanner_handles_split_chunks() {
        let mut scanner = JsonArrayScanner::new();
        scanner.push(b"[{\"text\":\"ab");
        assert!(scanner.next_value().is_none());
        scanner.push(b"c\"}]");
        let value = scanner.next_value().unwrap();
        assert_eq!(value["text"], "abc");
    }

    #[test]
    fn scanner_ignores_braces_inside_strings() {
        let mut scanner = JsonArrayScanner::new();
        scanner.push(b"[{\"text\":\"a{b}c\"}]");
        let value = scanner.next_value().unwrap();
        assert_eq!(value["text"], "a{b}c");
    }

    #[test]
    fn system_instruction_is_serialized_as_parts() {
        let c = client();
        c.set_system_instruction(Some("be terse".to_string()));
        let body = c.build_body(&[Turn::user_text("hi")]);
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "be terse");
    }
}
