use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::{Stream, StreamExt};
use observability::{ChatOutcome, RagMetrics};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, instrument, warn};

use crate::completion::{CompletionProvider, DeltaSink};
use crate::error::{RagError, RagResult};
use crate::models::{ChatEvent, ChatInput, ChatOutput, ChatUsage};

/// Default number of buffered events between provider and consumer
pub const DEFAULT_STREAM_BUFFER: usize = 1;

/// Runs chat completions, blocking or streamed
#[derive(Clone)]
pub struct ChatService {
    provider: Arc<dyn CompletionProvider>,
    buffer: usize,
}

impl ChatService {
    pub fn new(provider: Arc<dyn CompletionProvider>) -> Self {
        Self {
            provider,
            buffer: DEFAULT_STREAM_BUFFER,
        }
    }

    /// Channel capacity for streamed completions, at least 1
    pub fn with_buffer(mut self, buffer: usize) -> Self {
        self.buffer = buffer.max(1);
        self
    }

    pub fn provider(&self) -> &Arc<dyn CompletionProvider> {
        &self.provider
    }

    #[instrument(
        skip(self, input),
        fields(provider = %self.provider.name(), messages = input.messages.len())
    )]
    pub async fn handle(&self, input: ChatInput) -> RagResult<ChatOutput> {
        let provider = self.provider.name();
        match self.provider.complete(input).await {
            Ok(output) => {
                RagMetrics::record_chat("blocking", ChatOutcome::Completed);
                RagMetrics::record_tokens(
                    &provider,
                    output.usage.prompt_tokens,
                    output.usage.completion_tokens,
                );
                debug!(total_tokens = output.usage.total_tokens, "Completion finished");
                Ok(output)
            }
            Err(e) => {
                warn!(error = %e, "Completion failed");
                RagMetrics::record_chat("blocking", ChatOutcome::Failed);
                RagMetrics::record_provider_error(&provider, e.kind());
                Err(e)
            }
        }
    }

    /// Start a streamed completion.
    ///
    /// The provider runs on its own task and feeds a bounded channel, so it
    /// suspends whenever the consumer falls behind.
    pub fn handle_stream(&self, input: ChatInput) -> ChatStream {
        let (mut sink, rx) = DeltaSink::channel(self.buffer);
        let provider = Arc::clone(&self.provider);
        let provider_name = provider.name();
        let task_provider = provider_name.clone();

        let task = tokio::spawn(async move {
            match provider.stream(input, &mut sink).await {
                Ok(()) => {
                    if sink.finish().await.is_err() {
                        debug!("Consumer left before usage was delivered");
                    }
                }
                Err(RagError::StreamCancelled) => {
                    debug!(deltas = sink.deltas_sent(), "Stream cancelled by consumer");
                }
                Err(e) => {
                    warn!(error = %e, deltas = sink.deltas_sent(), "Streamed completion failed");
                    RagMetrics::record_provider_error(&task_provider, e.kind());
                    sink.fail(e).await;
                }
            }
        });

        ChatStream {
            inner: ReceiverStream::new(rx),
            task,
            provider: provider_name,
            state: StreamState::Streaming,
        }
    }

    /// Callback adapter over [`ChatService::handle_stream`].
    ///
    /// `on_delta` runs once per fragment in order. `on_usage` runs at most once,
    /// after the last fragment, and only on success. Errors are returned after
    /// the fragments that preceded them were delivered.
    pub async fn handle_stream_with<D, U>(
        &self,
        input: ChatInput,
        mut on_delta: D,
        on_usage: Option<U>,
    ) -> RagResult<()>
    where
        D: FnMut(&str),
        U: FnOnce(ChatUsage),
    {
        let mut stream = self.handle_stream(input);
        let mut on_usage = on_usage;
        while let Some(event) = stream.next().await {
            match event? {
                ChatEvent::Delta(text) => on_delta(&text),
                ChatEvent::Usage(usage) => {
                    if let Some(callback) = on_usage.take() {
                        callback(usage);
                    }
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamState {
    Streaming,
    Finished,
    Cancelled,
}

/// Consumer half of a streamed completion.
///
/// Yields `Delta` events in order, then exactly one `Usage` on success, or an
/// `Err` after any partial output on failure. Dropping or cancelling it closes
/// the channel and aborts the provider task.
pub struct ChatStream {
    inner: ReceiverStream<RagResult<ChatEvent>>,
    task: JoinHandle<()>,
    provider: String,
    state: StreamState,
}

impl ChatStream {
    /// Stop the provider and discard anything still buffered
    pub fn cancel(&mut self) {
        if self.state == StreamState::Streaming {
            self.state = StreamState::Cancelled;
            RagMetrics::record_chat("stream", ChatOutcome::Cancelled);
        }
        self.inner.close();
        self.task.abort();
    }

    pub fn is_cancelled(&self) -> bool {
        self.state == StreamState::Cancelled
    }

    /// Drain the stream into a single output with the same text and usage a
    /// blocking call returns. Streams carry no finish reason, so it stays `None`.
    pub async fn into_output(mut self) -> RagResult<ChatOutput> {
        let mut text = String::new();
        let mut usage = ChatUsage::default();
        while let Some(event) = self.next().await {
            match event? {
                ChatEvent::Delta(delta) => text.push_str(&delta),
                ChatEvent::Usage(total) => usage = total,
            }
        }
        Ok(ChatOutput {
            text,
            usage,
            finish_reason: None,
        })
    }

    fn finish(&mut self, outcome: ChatOutcome) {
        self.state = StreamState::Finished;
        RagMetrics::record_chat("stream", outcome);
    }
}

impl Stream for ChatStream {
    type Item = RagResult<ChatEvent>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.state != StreamState::Streaming {
            return Poll::Ready(None);
        }

        match Pin::new(&mut this.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(ChatEvent::Usage(usage)))) => {
                RagMetrics::record_tokens(
                    &this.provider,
                    usage.prompt_tokens,
                    usage.completion_tokens,
                );
                this.finish(ChatOutcome::Completed);
                Poll::Ready(Some(Ok(ChatEvent::Usage(usage))))
            }
            Poll::Ready(Some(Err(e))) => {
                this.finish(ChatOutcome::Failed);
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                // Producer went away without a terminal event
                this.finish(ChatOutcome::Failed);
                Poll::Ready(Some(Err(RagError::Internal(
                    "completion task ended without a result".to_string(),
                ))))
            }
            other => other,
        }
    }
}

impl Drop for ChatStream {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::{MockCompletionProvider, ScriptedCompletionProvider};
    use crate::models::ChatMessage;
    use std::time::Duration;

    fn input() -> ChatInput {
        ChatInput::new(vec![ChatMessage::user("hello")])
    }

    #[tokio::test]
    async fn test_stream_concatenation_matches_blocking_output() {
        let provider = Arc::new(
            ScriptedCompletionProvider::new(["Hel", "lo", ", ", "world"])
                .with_usage_per_fragment(ChatUsage::new(0, 1)),
        );
        let service = ChatService::new(provider);

        let blocking = service.handle(input()).await.unwrap();
        let streamed = service.handle_stream(input()).into_output().await.unwrap();
        assert_eq!(streamed.text, blocking.text);
        assert_eq!(streamed.usage, blocking.usage);
        assert_eq!(streamed.text, "Hello, world");
        assert_eq!(streamed.finish_reason, None);
    }

    #[tokio::test]
    async fn test_producer_waits_for_slow_consumer() {
        let fragments: Vec<String> = (0..20).map(|i| format!("f{i} ")).collect();
        let provider = Arc::new(ScriptedCompletionProvider::new(fragments.clone()));
        let service = ChatService::new(provider.clone()).with_buffer(1);

        let mut stream = service.handle_stream(input());
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first, ChatEvent::Delta("f0 ".into()));

        // Give the producer time to run ahead if nothing held it back
        tokio::time::sleep(Duration::from_millis(50)).await;
        let read = 1;
        let buffer = 1;
        assert!(
            provider.fragments_sent() <= read + buffer,
            "producer ran ahead: {} fragments sent",
            provider.fragments_sent()
        );

        let rest = stream.into_output().await.unwrap();
        assert_eq!(format!("f0 {}", rest.text), fragments.concat());
        assert_eq!(provider.fragments_sent(), 20);
    }

    #[tokio::test]
    async fn test_usage_arrives_once_after_last_delta() {
        let provider = Arc::new(ScriptedCompletionProvider::new(["a", "b", "c"]));
        let service = ChatService::new(provider).with_buffer(1);

        let events: Vec<_> = service.handle_stream(input()).collect().await;
        assert_eq!(events.len(), 4);
        let usage_positions: Vec<_> = events
            .iter()
            .enumerate()
            .filter(|(_, e)| matches!(e, Ok(ChatEvent::Usage(_))))
            .map(|(i, _)| i)
            .collect();
        assert_eq!(usage_positions, vec![3]);
        assert!(matches!(
            events[3],
            Ok(ChatEvent::Usage(usage)) if usage == ChatUsage::new(0, 3)
        ));
    }

    #[tokio::test]
    async fn test_mid_stream_failure_delivers_partial_then_error() {
        let provider = Arc::new(ScriptedCompletionProvider::new(["a", "b", "c"]).failing_after(2));
        let service = ChatService::new(provider);

        let mut deltas = Vec::new();
        let mut usage_calls = 0;
        let result = service
            .handle_stream_with(
                input(),
                |d| deltas.push(d.to_string()),
                Some(|_usage: ChatUsage| usage_calls += 1),
            )
            .await;

        assert!(matches!(result, Err(RagError::ProviderHttpError { .. })));
        assert_eq!(deltas, vec!["a", "b"]);
        assert_eq!(usage_calls, 0);
    }

    #[tokio::test]
    async fn test_callback_adapter_reports_usage_once() {
        let provider = Arc::new(ScriptedCompletionProvider::new(["x", "y"]));
        let service = ChatService::new(provider);

        let mut text = String::new();
        let mut usages = Vec::new();
        service
            .handle_stream_with(input(), |d| text.push_str(d), Some(|u: ChatUsage| usages.push(u)))
            .await
            .unwrap();
        assert_eq!(text, "xy");
        assert_eq!(usages, vec![ChatUsage::new(0, 2)]);

        service
            .handle_stream_with(input(), |_| {}, None::<fn(ChatUsage)>)
            .await
            .unwrap();
    }

    /// Waits until only the test and the service hold the provider
    async fn wait_for_task_exit(provider: &Arc<ScriptedCompletionProvider>) {
        for _ in 0..100 {
            if Arc::strong_count(provider) == 2 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("provider task still running");
    }

    #[tokio::test]
    async fn test_cancel_stops_provider_without_usage() {
        let provider = Arc::new(
            ScriptedCompletionProvider::new(["1", "2", "3", "4", "5"])
                .with_delay(Duration::from_millis(20)),
        );
        let service = ChatService::new(provider.clone());

        let mut stream = service.handle_stream(input());
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first, ChatEvent::Delta("1".into()));

        stream.cancel();
        assert!(stream.is_cancelled());
        assert!(stream.next().await.is_none());
        wait_for_task_exit(&provider).await;
    }

    #[tokio::test]
    async fn test_dropping_stream_aborts_provider_task() {
        let provider = Arc::new(
            ScriptedCompletionProvider::new(vec!["tick"; 1000]).with_delay(Duration::from_millis(5)),
        );
        let service = ChatService::new(provider.clone());

        let mut stream = service.handle_stream(input());
        assert!(matches!(stream.next().await, Some(Ok(ChatEvent::Delta(_)))));
        drop(stream);
        wait_for_task_exit(&provider).await;
    }

    #[tokio::test]
    async fn test_blocking_errors_propagate() {
        let mut provider = MockCompletionProvider::new();
        provider.expect_name().return_const("mock".to_string());
        provider
            .expect_complete()
            .returning(|_| Err(RagError::invalid_response("no choices")));

        let service = ChatService::new(Arc::new(provider));
        let err = service.handle(input()).await.unwrap_err();
        assert!(matches!(err, RagError::ProviderInvalidResponse { .. }));
    }
}
