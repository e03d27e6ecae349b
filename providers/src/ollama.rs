//! Ollama client (C5): a local HTTP backend decoded as newline-delimited
//! JSON, with a text-protocol tool-calling fallback for models whose
//! profile reports `supports_tools = false` (§4.5).

use std::sync::Arc;
use std::sync::Mutex;

use forge_types::{
    ClientIdentity, FinishReason, FunctionCall, JsonMap, Part, Provider, Role, StreamingChunk,
    ToolDefinition, Turn,
};
use futures_util::{Stream, StreamExt};
use regex::Regex;
use std::sync::LazyLock;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use crate::client::{ProviderClient, estimate_token_count};
use crate::error::ClientError;
use crate::jsonscan::find_balanced_object_end;
use crate::ratelimit::{RateLimiter, estimate_tokens};
use crate::retry::execute_with_retry;
use crate::stream::{self, ChunkStream};
use forge_types::RetryConfig;

const DEFAULT_BASE_URL: &str = "http://localhost:11434";

const TOOL_INSTRUCTION_TEMPLATE: &str = "\
You have access to tools, but this model does not support native function \
calling. To call a tool, respond with ONLY a fenced JSON block of the form:\n\
```json\n\
{\"tool\": \"<name>\", \"args\": { ... }}\n\
```\n\
Do not call a tool and write prose in the same response.";

pub struct OllamaClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    supports_tools: bool,
    num_predict: u32,
    temperature: Option<f64>,
    tools: Mutex<Vec<ToolDefinition>>,
    system_instruction: Mutex<Option<String>>,
    rate_limiter: Mutex<Option<Arc<dyn RateLimiter>>>,
    retry: RetryConfig,
}

impl OllamaClient {
    #[must_use]
    pub fn new(
        http: reqwest::Client,
        model: impl Into<String>,
        supports_tools: bool,
        retry: RetryConfig,
    ) -> Self {
        let model = model.into();
        if !Self::base_url_is_loopback(DEFAULT_BASE_URL) {
            tracing::warn!("Ollama base url is not loopback");
        }
        Self {
            http,
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            model,
            supports_tools,
            num_predict: 2048,
            temperature: None,
            tools: Mutex::new(Vec::new()),
            system_instruction: Mutex::new(None),
            rate_limiter: Mutex::new(None),
            retry,
        }
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        if base_url.starts_with("http://") && !Self::base_url_is_loopback(&base_url) {
            tracing::warn!(url = %base_url, "Ollama base url uses plaintext HTTP to a non-loopback host");
        }
        self.base_url = base_url;
        self
    }

    #[must_use]
    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }

    fn base_url_is_loopback(url: &str) -> bool {
        url.contains("localhost") || url.contains("127.0.0.1") || url.contains("[::1]")
    }

    fn endpoint(&self) -> String {
        format!("{}/api/chat", self.base_url.trim_end_matches('/'))
    }

    fn effective_system_instruction(&self) -> Option<String> {
        let base = self.system_instruction.lock().expect("poisoned").clone();
        let tools_empty = self.tools.lock().expect("poisoned").is_empty();
        if self.supports_tools || tools_empty {
            return base;
        }
        Some(match base {
            Some(existing) => format!("{existing}\n\n{TOOL_INSTRUCTION_TEMPLATE}"),
            None => TOOL_INSTRUCTION_TEMPLATE.to_string(),
        })
    }

    fn build_body(&self, history: &[Turn]) -> Value {
        let mut messages = Vec::new();
        if let Some(system) = self.effective_system_instruction() {
            messages.push(json!({"role": "system", "content": system}));
        }
        messages.extend(turns_to_messages(history, !self.supports_tools));

        let mut options = serde_json::Map::new();
        options.insert("num_predict".to_string(), json!(self.num_predict));
        if let Some(temp) = self.temperature {
            options.insert("temperature".to_string(), json!(temp));
        }

        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "stream": true,
            "options": options,
        });

        if self.supports_tools {
            let tools = self.tools.lock().expect("poisoned").clone();
            if !tools.is_empty() {
                body["tools"] = json!(
                    tools
                        .iter()
                        .map(|t| json!({
                            "type": "function",
                            "function": {
                                "name": t.name,
                                "description": t.description,
                                "parameters": t.parameters.normalized(),
                            },
                        }))
                        .collect::<Vec<_>>()
                );
            }
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
        let tokens = estimate_tokens(history.len(), self.num_predict);
        if let Some(limiter) = &limiter {
            limiter.acquire(cancel, tokens).await?;
        }

        let response = execute_with_retry(cancel, &self.retry, || {
            let mut req = self
                .http
                .post(&endpoint)
                .header("content-type", "application/json")
                .json(&body);
            if let Some(key) = &self.api_key {
                req = req.header("authorization", format!("Bearer {key}"));
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
        let fallback = !self.supports_tools;
        tokio::spawn(run_ollama_stream(
            response.bytes_stream(),
            sender,
            cancel,
            limiter,
            tokens,
            fallback,
        ));
        Ok(receiver)
    }
}

/// Linearize function-call/tool-result history into fenced JSON blocks and
/// user-message re-materializations when the target model can't natively
/// represent tool turns (§4.5 Ollama fallback (b)/(c)).
fn turns_to_messages(history: &[Turn], linearize_tools: bool) -> Vec<Value> {
    let mut messages = Vec::new();
    for turn in history {
        if !linearize_tools {
            let role = match turn.role {
                Role::User => "user",
                Role::Model => "assistant",
            };
            let content: String = turn
                .parts
                .iter()
                .filter_map(|p| match p {
                    Part::Text(t) => Some(t.clone()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n");
            messages.push(json!({"role": role, "content": content}));
            continue;
        }

        let mut text_parts = Vec::new();
        for part in &turn.parts {
            match part {
                Part::Text(t) => text_parts.push(t.clone()),
                Part::FunctionCall(call) => {
                    text_parts.push(format!(
                        "```json\n{{\"tool\": {:?}, \"args\": {}}}\n```",
                        call.name, call.args.0
                    ));
                }
                Part::FunctionResponse(resp) => {
                    text_parts.push(format!(
                        "Tool result for {:?}: {}",
                        resp.name, resp.response.0
                    ));
                }
                Part::InlineBinaryData { .. } => {}
            }
        }
        let role = match turn.role {
            Role::User => "user",
            Role::Model => "assistant",
        };
        messages.push(json!({"role": role, "content": text_parts.join("\n")}));
    }
    messages
}

static FENCE_OPEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"```(?:json)?\s*\n").expect("valid regex"));

/// Scan `text` for fenced JSON blocks of the shape `{"tool": ..., "args": ...}`,
/// using balanced-brace scanning (outside string literals) to find each
/// object's extent rather than trusting the closing fence placement.
fn extract_fenced_tool_calls(text: &str) -> (String, Vec<FunctionCall>) {
    let mut calls = Vec::new();
    let mut remaining_text = String::new();
    let mut cursor = 0usize;

    for m in FENCE_OPEN.find_iter(text) {
        remaining_text.push_str(&text[cursor..m.start()]);
        let body_start = m.end();
        let Some(rel_end) = find_balanced_object_end(text[body_start..].as_bytes()) else {
            remaining_text.push_str(&text[m.start()..]);
            cursor = text.len();
            break;
        };
        let object_str = &text[body_start..body_start + rel_end + 1];
        if let Ok(value) = serde_json::from_str::<Value>(object_str) {
            let name = value.get("tool").or_else(|| value.get("name")).and_then(Value::as_str);
            if let Some(name) = name {
                let args = value.get("args").cloned().unwrap_or_else(|| json!({}));
                calls.push(FunctionCall {
                    id: format!("ollama_call_{}", calls.len()),
                    name: name.to_string(),
                    args: JsonMap(args),
                });
            }
        }
        let after_object = body_start + rel_end + 1;
        let fence_close_rel = text[after_object..].find("```").map(|p| p + 3);
        cursor = match fence_close_rel {
            Some(rel) => after_object + rel,
            None => after_object,
        };
    }
    remaining_text.push_str(&text[cursor.min(text.len())..]);
    (remaining_text, calls)
}

async fn run_ollama_stream(
    byte_stream: impl Stream<Item = reqwest::Result<bytes::Bytes>> + Unpin,
    sender: crate::stream::ChunkSender,
    cancel: CancellationToken,
    limiter: Option<Arc<dyn RateLimiter>>,
    acquired_tokens: u32,
    fallback: bool,
) {
    let mut byte_stream = byte_stream;
    let mut buf = Vec::new();
    let mut accumulated_text = String::new();
    let mut finish_reason = FinishReason::Stop;

    loop {
        let line = if let Some(pos) = buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = buf.drain(..=pos).collect();
            Some(line)
        } else {
            None
        };

        let Some(line) = line else {
            tokio::select! {
                () = cancel.cancelled() => {
                    let _ = sender.send(StreamingChunk::error("cancelled")).await;
                    if let Some(limiter) = &limiter { limiter.return_tokens(1, acquired_tokens); }
                    return;
                }
                chunk = byte_stream.next() => {
                    match chunk {
                        Some(Ok(bytes)) => { buf.extend_from_slice(&bytes); continue; }
                        Some(Err(e)) => {
                            if let Some(limiter) = &limiter { limiter.return_tokens(1, acquired_tokens); }
                            let _ = sender.send(StreamingChunk::error(e.to_string())).await;
                            return;
                        }
                        None => break,
                    }
                }
            }
        };

        let text = String::from_utf8_lossy(&line);
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        let Ok(value) = serde_json::from_str::<Value>(trimmed) else {
            tracing::warn!(raw = %trimmed, "dropping malformed Ollama NDJSON line");
            continue;
        };

        if let Some(content) = value
            .get("message")
            .and_then(|m| m.get("content"))
            .and_then(Value::as_str)
        {
            if fallback {
                accumulated_text.push_str(content);
            } else if !content.is_empty() {
                let _ = sender.send(StreamingChunk::text(content)).await;
            }
        }

        if let Some(calls) = value
            .get("message")
            .and_then(|m| m.get("tool_calls"))
            .and_then(Value::as_array)
        {
            for call in calls {
                let name = call
                    .get("function")
                    .and_then(|f| f.get("name"))
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                let args = call
                    .get("function")
                    .and_then(|f| f.get("arguments"))
                    .cloned()
                    .unwrap_or_else(|| json!({}));
                let _ = sender
                    .send(StreamingChunk {
                        function_calls: vec![FunctionCall {
                            id: format!("ollama_call_{name}"),
                            name: name.to_string(),
                            args: JsonMap(args),
                        }],
                        ..Default::default()
                    })
                    .await;
            }
        }

        if value.get("done").and_then(Value::as_bool) == Some(true) {
            break;
        }
    }

    let pending_calls = if fallback {
        let (remaining_text, calls) = extract_fenced_tool_calls(&accumulated_text);
        if !remaining_text.trim().is_empty() {
            let _ = sender.send(StreamingChunk::text(remaining_text)).await;
        }
        if !calls.is_empty() {
            finish_reason = FinishReason::Stop;
        }
        calls
    } else {
        Vec::new()
    };

    let finish = StreamingChunk {
        function_calls: pending_calls,
        finish_reason: Some(finish_reason),
        done: true,
        ..Default::default()
    };
    let _ = sender.send(finish).await;
}

#[async_trait::async_trait]
impl ProviderClient for OllamaClient {
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
        Arc::new(OllamaClient {
            http: self.http.clone(),
            base_url: self.base_url.clone(),
            api_key: self.api_key.clone(),
            model: new_model,
            supports_tools: self.supports_tools,
            num_predict: self.num_predict,
            temperature: self.temperature,
            tools: Mutex::new(self.tools.lock().expect("poisoned").clone()),
            system_instruction: Mutex::new(self.system_instruction.lock().expect("poisoned").clone()),
            rate_limiter: Mutex::new(self.rate_limiter.lock().expect("poisoned").clone()),
            retry: self.retry,
        })
    }

    fn identity(&self) -> ClientIdentity {
        ClientIdentity::new(Provider::Ollama, self.model.clone())
    }

    async fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_augments_system_instruction_with_tool_template() {
        let client = OllamaClient::new(reqwest::Client::new(), "llama3:small", false, RetryConfig::default());
        client.set_tools(vec![ToolDefinition::new(
            "read_file",
            "reads a file",
            forge_types::ToolSchema::object(Default::default(), vec![]),
        )]);
        let instruction = client.effective_system_instruction().unwrap();
        assert!(instruction.contains("fenced JSON"));
    }

    #[test]
    fn native_tool_model_does_not_augment_system_instruction() {
        let client = OllamaClient::new(reqwest::Client::new(), "llama3:70b", true, RetryConfig::default());
        client.set_tools(vec![ToolDefinition::new(
            "read_file",
            "reads a file",
            forge_types::ToolSchema::object(Default::default(), vec![]),
        )]);
        assert!(client.effective_system_instruction().is_none());
    }

    #[test]
    fn extracts_fenced_tool_call_from_response_text() {
        let text = "Sure thing.\n```json\n{\"tool\":\"read_file\",\"args\":{\"path\":\"README.md\"}}\n```\n";
        let (remaining, calls) = extract_fenced_tool_calls(text);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "read_file");
        assert_eq!(calls[0].args.0["path"], "README.md");
        assert!(remaining.contains("Sure thing."));
    }

    #[test]
    fn brace_inside_string_value_does_not_confuse_scanner() {
        let text = "```json\n{\"tool\":\"echo\",\"args\":{\"msg\":\"a}b\"}}\n```";
        let (_, calls) = extract_fenced_tool_calls(text);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].args.0["msg"], "a}b");
    }

    #[test]
    fn plain_text_without_fence_yields_no_calls() {
        let (remaining, calls) = extract_fenced_tool_calls("just a normal reply");
        assert!(calls.is_empty());
        assert_eq!(remaining, "just a normal reply");
    }

    #[test]
    fn linearizes_function_call_into_fenced_json() {
        let history = vec![Turn::new(
            Role::Model,
            vec![Part::FunctionCall(forge_types::FunctionCall {
                id: "1".to_string(),
                name: "calc".to_string(),
                args: JsonMap(json!({"x": 1})),
            })],
        )];
        let messages = turns_to_messages(&history, true);
        let content = messages[0]["content"].as_str().unwrap();
        assert!(content.contains("```json"));
        assert!(content.contains("\"calc\""));
    }

    #[test]
    fn loopback_detection_recognizes_localhost_and_127() {
        assert!(OllamaClient::base_url_is_loopback("http://localhost:11434"));
        assert!(OllamaClient::base_url_is_loopback("http://127.0.0.1:11434"));
        assert!(!OllamaClient::base_url_is_loopback("http://example.com"));
    }
}
