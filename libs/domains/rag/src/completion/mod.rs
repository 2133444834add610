mod openai;
mod provider;
mod scripted;
mod sse;

pub use openai::{DEFAULT_CHAT_MODEL, OpenAIChatProvider};
#[cfg(test)]
pub use provider::MockCompletionProvider;
pub use provider::{CompletionProvider, DeltaSink};
pub use scripted::ScriptedCompletionProvider;
pub use sse::SseDecoder;
