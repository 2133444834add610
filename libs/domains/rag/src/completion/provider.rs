use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{RagError, RagResult};
use crate::models::{ChatEvent, ChatInput, ChatOutput, ChatUsage, ProviderHealth};

/// Trait for chat completion providers
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Short provider identifier, e.g. "openai"
    fn name(&self) -> String;

    /// Model used when the input does not override it
    fn model(&self) -> String;

    /// Where requests go, for diagnostics
    fn endpoint(&self) -> String;

    /// Single blocking completion
    async fn complete(&self, input: ChatInput) -> RagResult<ChatOutput>;

    /// Streamed completion.
    ///
    /// Text fragments go to [`DeltaSink::send_delta`] in order; usage
    /// increments go to [`DeltaSink::add_usage`]. A send error means the
    /// consumer is gone and the provider should return it as-is.
    async fn stream(&self, input: ChatInput, sink: &mut DeltaSink) -> RagResult<()>;

    async fn health(&self) -> ProviderHealth;
}

/// Producer half of a streamed completion.
///
/// Wraps the bounded channel to the consumer, drops empty fragments, and
/// accumulates usage until the stream completes.
#[derive(Debug)]
pub struct DeltaSink {
    tx: mpsc::Sender<RagResult<ChatEvent>>,
    usage: ChatUsage,
    deltas: usize,
}

impl DeltaSink {
    pub fn new(tx: mpsc::Sender<RagResult<ChatEvent>>) -> Self {
        Self {
            tx,
            usage: ChatUsage::default(),
            deltas: 0,
        }
    }

    /// Sink plus the receiving end, with room for `capacity` buffered items
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<RagResult<ChatEvent>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }

    /// Forward a fragment, waiting while the channel is full.
    ///
    /// Fails with [`RagError::StreamCancelled`] once the consumer dropped.
    pub async fn send_delta(&mut self, text: impl Into<String>) -> RagResult<()> {
        let text = text.into();
        if text.is_empty() {
            return Ok(());
        }
        self.tx
            .send(Ok(ChatEvent::Delta(text)))
            .await
            .map_err(|_| RagError::StreamCancelled)?;
        self.deltas += 1;
        Ok(())
    }

    pub fn add_usage(&mut self, usage: ChatUsage) {
        self.usage += usage;
    }

    pub fn usage(&self) -> ChatUsage {
        self.usage
    }

    pub fn deltas_sent(&self) -> usize {
        self.deltas
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Emit the final usage event
    pub(crate) async fn finish(&self) -> RagResult<()> {
        self.tx
            .send(Ok(ChatEvent::Usage(self.usage)))
            .await
            .map_err(|_| RagError::StreamCancelled)
    }

    /// Emit a terminal error after whatever deltas were already sent
    pub(crate) async fn fail(&self, error: RagError) {
        let _ = self.tx.send(Err(error)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sink_skips_empty_deltas() {
        let (mut sink, mut rx) = DeltaSink::channel(4);
        sink.send_delta("").await.unwrap();
        sink.send_delta("Hi").await.unwrap();
        assert_eq!(sink.deltas_sent(), 1);

        drop(sink);
        assert_eq!(rx.recv().await.unwrap().unwrap(), ChatEvent::Delta("Hi".into()));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_sink_reports_cancellation() {
        let (mut sink, rx) = DeltaSink::channel(1);
        drop(rx);
        assert!(sink.is_closed());
        let err = sink.send_delta("late").await.unwrap_err();
        assert!(matches!(err, RagError::StreamCancelled));
    }

    #[tokio::test]
    async fn test_sink_accumulates_usage() {
        let (mut sink, _rx) = DeltaSink::channel(1);
        sink.add_usage(ChatUsage::new(5, 1));
        sink.add_usage(ChatUsage::new(0, 2));
        assert_eq!(sink.usage(), ChatUsage::new(5, 3));
    }
}
