use crate::context::render_context;
use crate::models::{ChatMessage, ContextSource};
use crate::parser::OutputParser;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant that answers questions \
using only the numbered context passages provided with each question. If the context does \
not contain the answer, say that you don't know.";

const NO_CONTEXT: &str = "(no relevant passages were found)";

/// System prompt with the parser's format instructions appended
pub fn system_message(system_prompt: &str, parser: &OutputParser) -> ChatMessage {
    match parser.format_instructions() {
        Some(instructions) => ChatMessage::system(format!("{system_prompt}\n\n{instructions}")),
        None => ChatMessage::system(system_prompt),
    }
}

/// User turn carrying the retrieved context followed by the question
pub fn question_message(sources: &[ContextSource], question: &str) -> ChatMessage {
    let context = if sources.is_empty() {
        NO_CONTEXT.to_string()
    } else {
        render_context(sources)
    };
    ChatMessage::user(format!(
        "Context:\n{context}\n\nQuestion: {}",
        question.trim()
    ))
}

/// Full message list: system, prior turns, then the grounded question
pub fn build_messages(
    system_prompt: &str,
    parser: &OutputParser,
    history: &[ChatMessage],
    sources: &[ContextSource],
    question: &str,
) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(system_message(system_prompt, parser));
    messages.extend_from_slice(history);
    messages.push(question_message(sources, question));
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChatRole;

    fn source(id: &str, text: &str) -> ContextSource {
        ContextSource {
            document_id: id.into(),
            title: id.to_string(),
            chunk_index: 0,
            text: text.to_string(),
            score: 1.0,
        }
    }

    #[test]
    fn test_build_messages_orders_turns() {
        let history = vec![ChatMessage::user("hi"), ChatMessage::assistant("hello")];
        let messages = build_messages(
            "Be brief.",
            &OutputParser::Plain,
            &history,
            &[source("guide", "Install with cargo.")],
            " How do I install it? ",
        );

        let roles: Vec<_> = messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![ChatRole::System, ChatRole::User, ChatRole::Assistant, ChatRole::User]
        );
        assert_eq!(messages[0].content, "Be brief.");
        assert_eq!(
            messages[3].content,
            "Context:\n[1] (guide) Install with cargo.\n\nQuestion: How do I install it?"
        );
    }

    #[test]
    fn test_parser_instructions_extend_system_prompt() {
        let message = system_message("Be brief.", &OutputParser::Citations);
        assert!(message.content.starts_with("Be brief.\n\n"));
        assert!(message.content.contains("[1]"));
    }

    #[test]
    fn test_empty_context_is_explicit() {
        let message = question_message(&[], "anything?");
        assert!(message.content.contains(NO_CONTEXT));
    }
}
