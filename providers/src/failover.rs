//! Failover client (C6): sticky-current ordered fan-out over sibling
//! clients.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use forge_types::{ClientIdentity, Part, ToolDefinition, Turn};
use tokio_util::sync::CancellationToken;

use crate::client::ProviderClient;
use crate::error::ClientError;
use crate::ratelimit::RateLimiter;
use crate::stream::ChunkStream;

/// Wraps an ordered list of inner clients. For each call, starts from the
/// current (sticky) index and, on non-cancellation failure, advances to
/// the next client. Cancellation short-circuits and is returned to the
/// caller without advancing the index.
pub struct FailoverClient {
    inner: Vec<Arc<dyn ProviderClient>>,
    current: AtomicUsize,
}

impl FailoverClient {
    /// # Panics
    /// Panics if `inner` is empty — a failover client with no clients to
    /// fail over to is a construction error, not a runtime one.
    #[must_use]
    pub fn new(inner: Vec<Arc<dyn ProviderClient>>) -> Self {
        assert!(!inner.is_empty(), "FailoverClient requires at least one inner client");
        Self {
            inner,
            current: AtomicUsize::new(0),
        }
    }

    fn current_index(&self) -> usize {
        self.current.load(Ordering::SeqCst) % self.inner.len()
    }

    fn advance(&self, from: usize) {
        let next = (from + 1) % self.inner.len();
        self.current.store(next, Ordering::SeqCst);
    }

    async fn with_failover<F, Fut>(&self, op: F) -> Result<ChunkStream, ClientError>
    where
        F: Fn(Arc<dyn ProviderClient>) -> Fut,
        Fut: std::future::Future<Output = Result<ChunkStream, ClientError>>,
    {
        let start = self.current_index();
        let mut index = start;
        loop {
            let client = Arc::clone(&self.inner[index]);
            match op(client).await {
                Ok(stream) => return Ok(stream),
                Err(ClientError::Cancelled) => return Err(ClientError::Cancelled),
                Err(err) => {
                    self.advance(index);
                    let next = (index + 1) % self.inner.len();
                    if next == start {
                        return Err(err);
                    }
                    index = next;
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl ProviderClient for FailoverClient {
    async fn send_with_history(
        &self,
        cancel: &CancellationToken,
        history: &[Turn],
        new_message: Turn,
    ) -> Result<ChunkStream, ClientError> {
        self.with_failover(|client| {
            let history = history.to_vec();
            let new_message = new_message.clone();
            async move { client.send_with_history(cancel, &history, new_message).await }
        })
        .await
    }

    async fn send_tool_responses(
        &self,
        cancel: &CancellationToken,
        history: &[Turn],
        responses: Vec<Part>,
    ) -> Result<ChunkStream, ClientError> {
        self.with_failover(|client| {
            let history = history.to_vec();
            let responses = responses.clone();
            async move { client.send_tool_responses(cancel, &history, responses).await }
        })
        .await
    }

    fn set_tools(&self, tools: Vec<ToolDefinition>) {
        for client in &self.inner {
            client.set_tools(tools.clone());
        }
    }

    fn set_system_instruction(&self, instruction: Option<String>) {
        for client in &self.inner {
            client.set_system_instruction(instruction.clone());
        }
    }

    fn set_rate_limiter(&self, limiter: Arc<dyn RateLimiter>) {
        for client in &self.inner {
            client.set_rate_limiter(Arc::clone(&limiter));
        }
    }

    fn count_tokens(&self, history: &[Turn]) -> u32 {
        self.inner[self.current_index()].count_tokens(history)
    }

    fn get_model(&self) -> &str {
        self.inner[self.current_index()].get_model()
    }

    fn with_model(self: Arc<Self>, _new_model: String) -> Arc<dyn ProviderClient> {
        self
    }

    fn identity(&self) -> ClientIdentity {
        self.inner[self.current_index()].identity()
    }

    async fn close(&self) {
        for client in &self.inner {
            client.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream;
    use forge_types::{FinishReason, Provider, StreamingChunk};

    struct FlakyClient {
        identity: ClientIdentity,
        fail: bool,
    }

    #[async_trait::async_trait]
    impl ProviderClient for FlakyClient {
        async fn send_with_history(
            &self,
            _cancel: &CancellationToken,
            _history: &[Turn],
            _new_message: Turn,
        ) -> Result<ChunkStream, ClientError> {
            if self.fail {
                return Err(ClientError::http(500, "boom"));
            }
            let (tx, rx) = stream::channel();
            tx.send(StreamingChunk::terminal(FinishReason::Stop, vec![]))
                .await
                .ok();
            Ok(rx)
        }

        async fn send_tool_responses(
            &self,
            _cancel: &CancellationToken,
            _history: &[Turn],
            _responses: Vec<Part>,
        ) -> Result<ChunkStream, ClientError> {
            unimplemented!()
        }

        fn set_tools(&self, _tools: Vec<ToolDefinition>) {}
        fn set_system_instruction(&self, _instruction: Option<String>) {}
        fn set_rate_limiter(&self, _limiter: Arc<dyn RateLimiter>) {}
        fn count_tokens(&self, _history: &[Turn]) -> u32 {
            0
        }
        fn get_model(&self) -> &str {
            &self.identity.model
        }
        fn with_model(self: Arc<Self>, _new_model: String) -> Arc<dyn ProviderClient> {
            self
        }
        fn identity(&self) -> ClientIdentity {
            self.identity.clone()
        }
        async fn close(&self) {}
    }

    fn flaky(model: &str, fail: bool) -> Arc<dyn ProviderClient> {
        Arc::new(FlakyClient {
            identity: ClientIdentity::new(Provider::Ollama, model.to_string()),
            fail,
        })
    }

    #[tokio::test]
    async fn advances_index_on_failure_and_stays_sticky() {
        let failover = FailoverClient::new(vec![flaky("primary", true), flaky("secondary", false)]);
        let cancel = CancellationToken::new();

        let result = failover.send_with_history(&cancel, &[], Turn::user_text("hi")).await;
        assert!(result.is_ok());
        assert_eq!(failover.current_index(), 1);

        // Subsequent call starts at index 1, not back at 0.
        let result = failover.send_with_history(&cancel, &[], Turn::user_text("hi")).await;
        assert!(result.is_ok());
        assert_eq!(failover.current_index(), 1);
    }

    #[tokio::test]
    async fn cancellation_short_circuits_without_advancing() {
        struct CancelClient;
        #[async_trait::async_trait]
        impl ProviderClient for CancelClient {
            async fn send_with_history(
                &self,
                _cancel: &CancellationToken,
                _history: &[Turn],
                _new_message: Turn,
            ) -> Result<ChunkStream, ClientError> {
                Err(ClientError::Cancelled)
            }
            async fn send_tool_responses(
                &self,
                _cancel: &CancellationToken,
                _history: &[Turn],
                _responses: Vec<Part>,
            ) -> Result<ChunkStream, ClientError> {
                unimplemented!()
            }
            fn set_tools(&self, _tools: Vec<ToolDefinition>) {}
            fn set_system_instruction(&self, _instruction: Option<String>) {}
            fn set_rate_limiter(&self, _limiter: Arc<dyn RateLimiter>) {}
            fn count_tokens(&self, _history: &[Turn]) -> u32 {
                0
            }
            fn get_model(&self) -> &str {
                "cancel"
            }
            fn with_model(self: Arc<Self>, _new_model: String) -> Arc<dyn ProviderClient> {
                self
            }
            fn identity(&self) -> ClientIdentity {
                ClientIdentity::new(Provider::Ollama, "cancel".to_string())
            }
            async fn close(&self) {}
        }

        let failover = FailoverClient::new(vec![Arc::new(CancelClient), flaky("secondary", false)]);
        let cancel = CancellationToken::new();
        let result = failover.send_with_history(&cancel, &[], Turn::user_text("hi")).await;
        assert!(matches!(result, Err(ClientError::Cancelled)));
        assert_eq!(failover.current_index(), 0);
    }
}
