use std::fmt::Write;

use crate::models::{ContextSource, SearchOutput};

/// Project ranked matches into prompt sources, keeping rank order.
///
/// `chunk_index` on the result is the 0-based rank, not the storage index,
/// and the title is the document id.
pub fn to_context_sources(output: &SearchOutput) -> Vec<ContextSource> {
    output
        .matches
        .iter()
        .enumerate()
        .map(|(rank, m)| ContextSource {
            document_id: m.document_id.clone(),
            title: m.document_id.to_string(),
            chunk_index: rank,
            text: m.chunk.text.clone(),
            score: m.score,
        })
        .collect()
}

/// Numbered context block, one `[n] (title) text` entry per source.
///
/// Numbers start at 1 so they line up with `[n]` citations in answers.
pub fn render_context(sources: &[ContextSource]) -> String {
    let mut out = String::new();
    for (i, source) in sources.iter().enumerate() {
        if i > 0 {
            out.push_str("\n\n");
        }
        let _ = write!(out, "[{}] ({}) {}", i + 1, source.title, source.text.trim());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chunk, SearchMatch};

    fn output() -> SearchOutput {
        SearchOutput {
            matches: vec![
                SearchMatch {
                    document_id: "guide".into(),
                    chunk_index: 7,
                    chunk: Chunk::new("Install with cargo."),
                    score: 0.92,
                },
                SearchMatch {
                    document_id: "faq".into(),
                    chunk_index: 2,
                    chunk: Chunk::new(" Runs on Linux. "),
                    score: 0.81,
                },
            ],
        }
    }

    #[test]
    fn test_sources_follow_rank_not_storage_index() {
        let sources = to_context_sources(&output());
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].chunk_index, 0);
        assert_eq!(sources[0].title, "guide");
        assert_eq!(sources[0].score, 0.92);
        assert_eq!(sources[1].chunk_index, 1);
        assert_eq!(sources[1].document_id.as_str(), "faq");
    }

    #[test]
    fn test_render_context_numbers_from_one() {
        let rendered = render_context(&to_context_sources(&output()));
        assert_eq!(
            rendered,
            "[1] (guide) Install with cargo.\n\n[2] (faq) Runs on Linux."
        );
        assert_eq!(render_context(&[]), "");
    }
}
