//! Gemini OAuth (Code Assist) client (C5): SSE-framed streaming against the
//! internal Code Assist endpoint, with single-flight token refresh through a
//! caller-supplied [`TokenStore`] (§9 Design Notes: the teacher's client
//! mutating shared config directly on refresh is re-architected behind this
//! trait, so the config saver is just one implementation).
//!
//! SSE framing is shared with [`crate::anthropic`] via [`crate::sse`]; this
//! module owns its own small typed event shape rather than Anthropic's.

use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::{Duration, SystemTime};

use forge_types::{
    ClientIdentity, FinishReason, FunctionCall, JsonMap, Part, Provider, Role, StreamingChunk,
    ToolDefinition, Turn,
};
use serde_json::{Value, json};
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;

use crate::client::{ProviderClient, estimate_token_count};
use crate::error::ClientError;
use crate::ratelimit::{RateLimiter, estimate_tokens};
use crate::retry::execute_with_retry;
use crate::sse::SseDecoder;
use crate::stream::{self, ChunkSender, ChunkStream};
use forge_types::RetryConfig;

const DEFAULT_BASE_URL: &str = "https://cloudcode-pa.googleapis.com";
const REFRESH_BUFFER: Duration = Duration::from_secs(5 * 60);

/// A current OAuth access token plus its expiry.
#[derive(Debug, Clone)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: SystemTime,
}

impl AccessToken {
    #[must_use]
    pub fn needs_refresh(&self) -> bool {
        match self.expires_at.duration_since(SystemTime::now()) {
            Ok(remaining) => remaining < REFRESH_BUFFER,
            Err(_) => true,
        }
    }
}

/// Holds the current token and refreshes it on demand, persisting the
/// refreshed value back to durable config storage. Implementations MUST
/// serialize concurrent refreshes (single-flight by construction: the
/// trait's `refresh` is invoked only while the client's own refresh mutex
/// is held, see [`GeminiOAuthClient::token`]).
#[async_trait::async_trait]
pub trait TokenStore: Send + Sync {
    async fn current(&self) -> AccessToken;
    async fn refresh(&self) -> Result<AccessToken, ClientError>;
    async fn persist(&self, token: &AccessToken);
}

pub struct GeminiOAuthClient {
    http: reqwest::Client,
    base_url: String,
    project: String,
    model: String,
    tokens: Arc<dyn TokenStore>,
    refresh_lock: AsyncMutex<()>,
    thinking_budget: Option<u32>,
    tools: StdMutex<Vec<ToolDefinition>>,
    system_instruction: StdMutex<Option<String>>,
    rate_limiter: StdMutex<Option<Arc<dyn RateLimiter>>>,
    retry: RetryConfig,
}

impl GeminiOAuthClient {
    #[must_use]
    pub fn new(
        http: reqwest::Client,
        project: impl Into<String>,
        model: impl Into<String>,
        tokens: Arc<dyn TokenStore>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            http,
            base_url: DEFAULT_BASE_URL.to_string(),
            project: project.into(),
            model: model.into(),
            tokens,
            refresh_lock: AsyncMutex::new(()),
            thinking_budget: None,
            tools: StdMutex::new(Vec::new()),
            system_instruction: StdMutex::new(None),
            rate_limiter: StdMutex::new(None),
            retry,
        }
    }

    #[must_use]
    pub fn with_thinking_budget(mut self, budget: Option<u32>) -> Self {
        self.thinking_budget = budget;
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/v1internal:streamGenerateContent?alt=sse", self.base_url.trim_end_matches('/'))
    }

    /// Single-flight token acquisition: holds `refresh_lock` across the
    /// expiry check and the refresh call, so concurrent callers serialize
    /// on one refresh instead of racing duplicate requests.
    async fn token(&self) -> Result<String, ClientError> {
        let _guard = self.refresh_lock.lock().await;
        let current = self.tokens.current().await;
        if !current.needs_refresh() {
            return Ok(current.token);
        }
        let refreshed = self.tokens.refresh().await?;
        self.tokens.persist(&refreshed).await;
        Ok(refreshed.token)
    }

    fn build_body(&self, history: &[Turn]) -> Value {
        let contents = turns_to_contents(history);
        let mut request = json!({"contents": contents});

        if let Some(system) = self.system_instruction.lock().expect("poisoned").clone() {
            request["systemInstruction"] = json!({"parts": [{"text": system}]});
        }

        let tools = self.tools.lock().expect("poisoned").clone();
        if !tools.is_empty() {
            request["tools"] = json!([{
                "functionDeclarations": tools.iter().map(|t| json!({
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.parameters,
                })).collect::<Vec<_>>(),
            }]);
        }

        if let Some(budget) = self.thinking_budget {
            request["generationConfig"] = json!({"thinkingConfig": {"thinkingBudget": budget}});
        }

        json!({
            "project": self.project,
            "model": self.model,
            "request": request,
        })
    }

    async fn stream_request(
        &self,
        cancel: &CancellationToken,
        history: Vec<Turn>,
    ) -> Result<ChunkStream, ClientError> {
        let body = self.build_body(&history);
        let endpoint = self.endpoint();
        let token = self.token().await?;

        let limiter = self.rate_limiter.lock().expect("poisoned").clone();
        let tokens = estimate_tokens(history.len(), 4096);
        if let Some(limiter) = &limiter {
            limiter.acquire(cancel, tokens).await?;
        }

        let response = execute_with_retry(cancel, &self.retry, || {
            self.http
                .post(&endpoint)
                .header("authorization", format!("Bearer {token}"))
                .header("content-type", "application/json")
                .header("accept", "text/event-stream")
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
        tokio::spawn(run_oauth_stream(response.bytes_stream(), sender, cancel, limiter, tokens));
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

async fn run_oauth_stream(
    byte_stream: impl futures_util::Stream<Item = reqwest::Result<bytes::Bytes>> + Unpin,
    sender: ChunkSender,
    cancel: CancellationToken,
    limiter: Option<Arc<dyn RateLimiter>>,
    acquired_tokens: u32,
) {
    let mut decoder = SseDecoder::new(byte_stream);
    let mut pending_calls = Vec::new();
    let mut finish_reason = FinishReason::Stop;
    let mut input_tokens = None;
    let mut output_tokens = None;

    loop {
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

        let Ok(value) = serde_json::from_str::<Value>(&payload) else {
            tracing::warn!(raw = %payload, "dropping malformed Gemini-OAuth SSE event");
            continue;
        };

        if let Some(usage) = value.get("usageMetadata") {
            if let Some(n) = usage.get("promptTokenCount").and_then(Value::as_u64) {
                input_tokens = Some(n as u32);
            }
            if let Some(n) = usage.get("candidatesTokenCount").and_then(Value::as_u64) {
                output_tokens = Some(n as u32);
            }
        }

        let Some(candidate) = value.get("candidates").and_then(|c| c.get(0)) else {
            continue;
        };

        if let Some(reason) = candidate.get("finishReason").and_then(Value::as_str) {
            finish_reason = match reason {
                "MAX_TOKENS" => FinishReason::MaxTokens,
                _ => FinishReason::Stop,
            };
        }

        if let Some(parts) = candidate
            .get("content")
            .and_then(|c| c.get("parts"))
            .and_then(Value::as_array)
        {
            for part in parts {
                if let Some(text) = part.get("text").and_then(Value::as_str) {
                    if sender.send(StreamingChunk::text(text)).await.is_err() {
                        if let Some(limiter) = &limiter {
                            limiter.return_tokens(1, acquired_tokens);
                        }
                        return;
                    }
                }
                if let Some(call) = part.get("functionCall") {
                    let name = call.get("name").and_then(Value::as_str).unwrap_or_default();
                    let args = call.get("args").cloned().unwrap_or_else(|| json!({}));
                    pending_calls.push(FunctionCall {
                        id: format!("gemini_oauth_call_{}", pending_calls.len()),
                        name: name.to_string(),
                        args: JsonMap(args),
                    });
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

#[async_trait::async_trait]
impl ProviderClient for GeminiOAuthClient {
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

    /// A character-based estimate only: Gemini-OAuth offers no real
    /// `CountTokens` endpoint in this client, so callers must treat this as
    /// approximate, not wire-accurate (§9 Open Questions).
    fn count_tokens(&self, history: &[Turn]) -> u32 {
        estimate_token_count(history, &self.model)
    }

    fn get_model(&self) -> &str {
        &self.model
    }

    fn with_model(self: Arc<Self>, new_model: String) -> Arc<dyn ProviderClient> {
        Arc::new(GeminiOAuthClient {
            http: self.http.clone(),
            base_url: self.base_url.clone(),
            project: self.project.clone(),
            model: new_model,
            tokens: Arc::clone(&self.tokens),
            refresh_lock: AsyncMutex::new(()),
            thinking_budget: self.thinking_budget,
            tools: StdMutex::new(self.tools.lock().expect("poisoned").clone()),
            system_instruction: StdMutex::new(self.system_instruction.lock().expect("poisoned").clone()),
            rate_limiter: StdMutex::new(self.rate_limiter.lock().expect("poisoned").clone()),
            retry: self.retry,
        })
    }

    fn identity(&self) -> ClientIdentity {
        ClientIdentity::new(Provider::GeminiOAuth, self.model.clone())
    }

    async fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct StaticStore {
        token: StdMutex<AccessToken>,
        refresh_count: AtomicU32,
    }

    #[async_trait::async_trait]
    impl TokenStore for StaticStore {
        async fn current(&self) -> AccessToken {
            self.token.lock().expect("poisoned").clone()
        }

        async fn refresh(&self) -> Result<AccessToken, ClientError> {
            self.refresh_count.fetch_add(1, Ordering::SeqCst);
            let refreshed = AccessToken {
                token: "refreshed".to_string(),
                expires_at: SystemTime::now() + Duration::from_secs(3600),
            };
            *self.token.lock().expect("poisoned") = refreshed.clone();
            Ok(refreshed)
        }

        async fn persist(&self, _token: &AccessToken) {}
    }

    fn client_with(expires_in: Duration) -> (GeminiOAuthClient, Arc<StaticStore>) {
        let store = Arc::new(StaticStore {
            token: StdMutex::new(AccessToken {
                token: "initial".to_string(),
                expires_at: SystemTime::now() + expires_in,
            }),
            refresh_count: AtomicU32::new(0),
        });
        let client = GeminiOAuthClient::new(
            reqwest::Client::new(),
            "my-project",
            "gemini-3-pro",
            store.clone(),
            RetryConfig::default(),
        );
        (client, store)
    }

    #[tokio::test]
    async fn token_not_refreshed_when_far_from_expiry() {
        let (client, store) = client_with(Duration::from_secs(3600));
        let token = client.token().await.unwrap();
        assert_eq!(token, "initial");
        assert_eq!(store.refresh_count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn token_refreshed_within_five_minute_buffer() {
        let (client, store) = client_with(Duration::from_secs(60));
        let token = client.token().await.unwrap();
        assert_eq!(token, "refreshed");
        assert_eq!(store.refresh_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_refreshes_are_single_flight() {
        let (client, store) = client_with(Duration::from_secs(1));
        let client = Arc::new(client);
        let a = Arc::clone(&client);
        let b = Arc::clone(&client);
        let (ra, rb) = tokio::join!(
            tokio::spawn(async move { a.token().await }),
            tokio::spawn(async move { b.token().await }),
        );
        ra.unwrap().unwrap();
        rb.unwrap().unwrap();
        assert_eq!(store.refresh_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn request_body_is_wrapped_with_project_and_model() {
        let (client, _store) = client_with(Duration::from_secs(3600));
        let body = client.build_body(&[Turn::user_text("hi")]);
        assert_eq!(body["project"], "my-project");
        assert_eq!(body["model"], "gemini-3-pro");
        assert!(body["request"]["contents"].is_array());
    }
}
