//! The streaming response channel (C4): a bounded chunk sequence plus
//! cooperative cancellation, re-architected from the teacher's
//! callback-based `on_event: impl Fn(StreamEvent)` into an
//! `mpsc` channel + `CancellationToken` pair so the consumer can close or
//! drop the stream to signal the producer without a callback return value.

use forge_types::StreamingChunk;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Suggested bounded capacity for a provider's chunk channel (§4.4).
pub const CHUNK_CHANNEL_CAPACITY: usize = 10;

/// The consumer-facing half of a streaming response.
pub struct ChunkStream {
    receiver: mpsc::Receiver<StreamingChunk>,
    cancel: CancellationToken,
}

impl ChunkStream {
    /// Receive the next chunk, or `None` once the producer has closed the
    /// channel on every exit path (success, error, cancellation).
    pub async fn next(&mut self) -> Option<StreamingChunk> {
        self.receiver.recv().await
    }

    /// Signal the producer to stop sending further chunks. Safe to call
    /// multiple times; dropping the stream has the same effect.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

/// The producer-facing half, held by a provider client's streaming task.
pub struct ChunkSender {
    sender: mpsc::Sender<StreamingChunk>,
    cancel: CancellationToken,
}

impl ChunkSender {
    /// Send a chunk, respecting cancellation at the blocking point. Returns
    /// `Err(())` if the consumer has dropped its receiver or cancelled —
    /// in both cases the producer MUST stop sending.
    pub async fn send(&self, chunk: StreamingChunk) -> Result<(), ()> {
        tokio::select! {
            () = self.cancel.cancelled() => Err(()),
            result = self.sender.send(chunk) => result.map_err(|_| ()),
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

/// Create a bound sender/receiver pair sharing one cancellation token.
#[must_use]
pub fn channel() -> (ChunkSender, ChunkStream) {
    let (tx, rx) = mpsc::channel(CHUNK_CHANNEL_CAPACITY);
    let cancel = CancellationToken::new();
    (
        ChunkSender {
            sender: tx,
            cancel: cancel.clone(),
        },
        ChunkStream {
            receiver: rx,
            cancel,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use forge_types::FinishReason;

    #[tokio::test]
    async fn send_then_receive_round_trips_chunk() {
        let (tx, mut rx) = channel();
        tx.send(StreamingChunk::text("hi")).await.unwrap();
        let received = rx.next().await.unwrap();
        assert_eq!(received.text, "hi");
    }

    #[tokio::test]
    async fn cancel_on_receiver_side_stops_producer_sends() {
        let (tx, rx) = channel();
        rx.cancel();
        let result = tx.send(StreamingChunk::text("late")).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn dropping_receiver_stops_producer_sends() {
        let (tx, rx) = channel();
        drop(rx);
        let result = tx.send(StreamingChunk::terminal(FinishReason::Stop, vec![])).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn closed_channel_yields_none_on_receive() {
        let (tx, mut rx) = channel();
        drop(tx);
        assert!(rx.next().await.is_none());
    }
}
