use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use super::{CompletionProvider, DeltaSink};
use crate::error::{RagError, RagResult};
use crate::models::{ChatInput, ChatOutput, ChatUsage, ProviderHealth};

const PROVIDER_NAME: &str = "scripted";
const SCRIPTED_MODEL: &str = "scripted-v1";

/// Deterministic completion provider that replays fixed fragments.
///
/// Blocking and streaming calls agree: the blocking text is the fragments
/// joined, its usage the per-fragment usage summed. Requests are recorded
/// for inspection.
#[derive(Debug)]
pub struct ScriptedCompletionProvider {
    fragments: Vec<String>,
    usage_per_fragment: ChatUsage,
    fail_after: Option<usize>,
    delay: Option<Duration>,
    requests: Mutex<Vec<ChatInput>>,
    sent: AtomicUsize,
}

impl ScriptedCompletionProvider {
    pub fn new<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fragments: fragments.into_iter().map(Into::into).collect(),
            usage_per_fragment: ChatUsage::new(0, 1),
            fail_after: None,
            delay: None,
            requests: Mutex::new(Vec::new()),
            sent: AtomicUsize::new(0),
        }
    }

    /// Usage reported alongside every fragment
    pub fn with_usage_per_fragment(mut self, usage: ChatUsage) -> Self {
        self.usage_per_fragment = usage;
        self
    }

    /// Fail once `fragments` fragments have been delivered
    pub fn failing_after(mut self, fragments: usize) -> Self {
        self.fail_after = Some(fragments);
        self
    }

    /// Pause before each fragment
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Inputs received so far, oldest first
    pub fn requests(&self) -> Vec<ChatInput> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }

    /// Fragments accepted by a sink across all streamed calls
    pub fn fragments_sent(&self) -> usize {
        self.sent.load(Ordering::SeqCst)
    }

    fn record(&self, input: ChatInput) {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(input);
        }
    }

    fn failure(&self, delivered: usize) -> RagError {
        RagError::ProviderHttpError {
            status: 500,
            body: format!("scripted failure after {delivered} fragments"),
        }
    }
}

#[async_trait]
impl CompletionProvider for ScriptedCompletionProvider {
    fn name(&self) -> String {
        PROVIDER_NAME.to_string()
    }

    fn model(&self) -> String {
        SCRIPTED_MODEL.to_string()
    }

    fn endpoint(&self) -> String {
        "in-process".to_string()
    }

    async fn complete(&self, input: ChatInput) -> RagResult<ChatOutput> {
        self.record(input);
        if let Some(after) = self.fail_after {
            return Err(self.failure(after.min(self.fragments.len())));
        }

        Ok(ChatOutput {
            text: self.fragments.concat(),
            usage: std::iter::repeat_n(self.usage_per_fragment, self.fragments.len()).sum(),
            finish_reason: Some("stop".to_string()),
        })
    }

    async fn stream(&self, input: ChatInput, sink: &mut DeltaSink) -> RagResult<()> {
        self.record(input);
        for (delivered, fragment) in self.fragments.iter().enumerate() {
            if self.fail_after == Some(delivered) {
                return Err(self.failure(delivered));
            }
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            sink.send_delta(fragment.as_str()).await?;
            self.sent.fetch_add(1, Ordering::SeqCst);
            sink.add_usage(self.usage_per_fragment);
        }

        if let Some(after) = self.fail_after {
            return Err(self.failure(after.min(self.fragments.len())));
        }
        Ok(())
    }

    async fn health(&self) -> ProviderHealth {
        ProviderHealth::healthy(PROVIDER_NAME, SCRIPTED_MODEL, "in-process")
    }
}
