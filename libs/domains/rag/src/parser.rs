use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use crate::error::{RagError, RagResult};

pub const DEFAULT_FINAL_ANSWER_MARKER: &str = "Final Answer:";

fn default_marker() -> String {
    DEFAULT_FINAL_ANSWER_MARKER.to_string()
}

/// Structured view of a model answer
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
pub struct ParsedOutput {
    pub answer: String,
    /// 1-based source numbers, in first-appearance order
    #[serde(default)]
    pub citations: Vec<usize>,
}

/// Post-processing applied to raw completion text
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutputParser {
    /// Trimmed text, must be non-empty
    #[default]
    Plain,
    /// Text after the last `marker`
    FinalAnswer {
        #[serde(default = "default_marker")]
        marker: String,
    },
    /// Whole text, must cite at least one `[n]` source
    Citations,
    /// First JSON object carrying a string `answer` and optional `citations`
    Json,
}

impl OutputParser {
    pub fn final_answer() -> Self {
        OutputParser::FinalAnswer {
            marker: default_marker(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            OutputParser::Plain => "plain",
            OutputParser::FinalAnswer { .. } => "final_answer",
            OutputParser::Citations => "citations",
            OutputParser::Json => "json",
        }
    }

    /// Instructions appended to the system prompt so the model produces
    /// parseable output
    pub fn format_instructions(&self) -> Option<String> {
        match self {
            OutputParser::Plain => None,
            OutputParser::FinalAnswer { marker } => Some(format!(
                "Think step by step if needed, then finish with a line starting with \"{marker}\" followed by the answer."
            )),
            OutputParser::Citations => Some(
                "Cite the sources you used with their bracketed numbers, for example [1] or [2]."
                    .to_string(),
            ),
            OutputParser::Json => Some(
                "Respond with a single JSON object: {\"answer\": string, \"citations\": [source numbers]}."
                    .to_string(),
            ),
        }
    }

    pub fn parse(&self, raw: &str) -> RagResult<ParsedOutput> {
        match self {
            OutputParser::Plain => parse_plain(raw),
            OutputParser::FinalAnswer { marker } => parse_final_answer(raw, marker),
            OutputParser::Citations => parse_citations(raw),
            OutputParser::Json => parse_json(raw),
        }
    }
}

impl fmt::Display for OutputParser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for OutputParser {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "plain" => Ok(OutputParser::Plain),
            "final_answer" | "final-answer" => Ok(OutputParser::final_answer()),
            "citations" => Ok(OutputParser::Citations),
            "json" => Ok(OutputParser::Json),
            other => Err(RagError::Config(format!("unknown output parser '{other}'"))),
        }
    }
}

fn parse_plain(raw: &str) -> RagResult<ParsedOutput> {
    let answer = raw.trim();
    if answer.is_empty() {
        return Err(RagError::unparsable("output is empty", raw));
    }
    Ok(ParsedOutput {
        answer: answer.to_string(),
        citations: Vec::new(),
    })
}

fn parse_final_answer(raw: &str, marker: &str) -> RagResult<ParsedOutput> {
    let Some(pos) = raw.rfind(marker) else {
        return Err(RagError::unparsable(
            format!("missing '{marker}' marker"),
            raw,
        ));
    };
    let answer = raw[pos + marker.len()..].trim();
    if answer.is_empty() {
        return Err(RagError::unparsable(
            format!("nothing after '{marker}'"),
            raw,
        ));
    }
    Ok(ParsedOutput {
        answer: answer.to_string(),
        citations: Vec::new(),
    })
}

/// `[n]` markers with n >= 1, deduplicated in first-appearance order
pub fn extract_citations(text: &str) -> Vec<usize> {
    let mut citations = Vec::new();
    let mut rest = text;
    while let Some(open) = rest.find('[') {
        rest = &rest[open + 1..];
        let Some(close) = rest.find(']') else {
            break;
        };
        let inner = &rest[..close];
        if !inner.is_empty() && inner.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(n) = inner.parse::<usize>()
                && n >= 1
                && !citations.contains(&n)
            {
                citations.push(n);
            }
            rest = &rest[close + 1..];
        }
    }
    citations
}

fn parse_citations(raw: &str) -> RagResult<ParsedOutput> {
    let answer = raw.trim();
    let citations = extract_citations(answer);
    if citations.is_empty() {
        return Err(RagError::unparsable("no [n] citation found", raw));
    }
    Ok(ParsedOutput {
        answer: answer.to_string(),
        citations,
    })
}

#[derive(Deserialize)]
struct JsonAnswer {
    answer: String,
    #[serde(default)]
    citations: Vec<usize>,
}

/// Body of the first ```json fence, if any
fn fenced_json(raw: &str) -> Option<&str> {
    let start = raw.find("```json")? + "```json".len();
    let body = &raw[start..];
    let end = body.find("```").unwrap_or(body.len());
    Some(&body[..end])
}

/// First JSON object embedded in `text`, ignoring anything around it
fn first_object(text: &str) -> Option<Value> {
    text.match_indices('{').find_map(|(pos, _)| {
        serde_json::Deserializer::from_str(&text[pos..])
            .into_iter::<Value>()
            .next()
            .and_then(Result::ok)
            .filter(Value::is_object)
    })
}

fn parse_json(raw: &str) -> RagResult<ParsedOutput> {
    let candidate = fenced_json(raw).unwrap_or(raw);
    let value = first_object(candidate)
        .ok_or_else(|| RagError::unparsable("no JSON object found", raw))?;

    let parsed: JsonAnswer = serde_json::from_value(value).map_err(|e| {
        RagError::unparsable(format!("JSON object has the wrong shape: {e}"), raw)
    })?;

    let answer = parsed.answer.trim();
    if answer.is_empty() {
        return Err(RagError::unparsable("answer is empty", raw));
    }

    let mut citations = Vec::with_capacity(parsed.citations.len());
    for n in parsed.citations {
        if n >= 1 && !citations.contains(&n) {
            citations.push(n);
        }
    }

    Ok(ParsedOutput {
        answer: answer.to_string(),
        citations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_of(err: RagError) -> String {
        match err {
            RagError::UnparsableOutput { raw, .. } => raw,
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_plain_trims_and_rejects_blank() {
        let parsed = OutputParser::Plain.parse("  Paris \n").unwrap();
        assert_eq!(parsed.answer, "Paris");
        assert_eq!(raw_of(OutputParser::Plain.parse(" \n ").unwrap_err()), " \n ");
    }

    #[test]
    fn test_final_answer_uses_last_marker() {
        let parser = OutputParser::final_answer();
        let parsed = parser
            .parse("Thought: the doc mentions Final Answer: twice.\nFinal Answer: 42")
            .unwrap();
        assert_eq!(parsed.answer, "42");

        let err = parser.parse("I think it's 42").unwrap_err();
        assert_eq!(raw_of(err), "I think it's 42");

        assert!(parser.parse("Final Answer:   ").is_err());
    }

    #[test]
    fn test_custom_marker() {
        let parser = OutputParser::FinalAnswer {
            marker: "ANSWER>".into(),
        };
        assert_eq!(parser.parse("x ANSWER> yes").unwrap().answer, "yes");
    }

    #[test]
    fn test_citations_dedupe_in_order() {
        let parsed = OutputParser::Citations
            .parse("Rust is fast [2] and safe [1][2]. See [x] and [0].")
            .unwrap();
        assert_eq!(parsed.citations, vec![2, 1]);
        assert!(parsed.answer.starts_with("Rust is fast"));

        let err = OutputParser::Citations.parse("No sources here.").unwrap_err();
        assert_eq!(raw_of(err), "No sources here.");
    }

    #[test]
    fn test_extract_citations_handles_nested_brackets() {
        assert_eq!(extract_citations("[[3]] [a [4]] [5"), vec![3, 4]);
    }

    #[test]
    fn test_json_raw_and_fenced() {
        let parsed = OutputParser::Json
            .parse(r#"Sure! {"answer": "Paris", "citations": [1, 3, 1]} Hope that helps."#)
            .unwrap();
        assert_eq!(parsed.answer, "Paris");
        assert_eq!(parsed.citations, vec![1, 3]);

        let fenced = "Here you go:\n```json\n{\"answer\": \"Lyon\"}\n```";
        let parsed = OutputParser::Json.parse(fenced).unwrap();
        assert_eq!(parsed.answer, "Lyon");
        assert!(parsed.citations.is_empty());
    }

    #[test]
    fn test_json_failures_keep_raw() {
        for raw in [
            "no json at all",
            r#"{"answer": 42}"#,
            r#"{"answer": "x", "citations": ["one"]}"#,
            r#"{"answer": "   "}"#,
        ] {
            assert_eq!(raw_of(OutputParser::Json.parse(raw).unwrap_err()), raw);
        }
    }

    #[test]
    fn test_from_str_and_serde_tag() {
        assert_eq!("json".parse::<OutputParser>().unwrap(), OutputParser::Json);
        assert_eq!(
            "Final_Answer".parse::<OutputParser>().unwrap(),
            OutputParser::final_answer()
        );
        assert!("xml".parse::<OutputParser>().is_err());

        let parser: OutputParser = serde_json::from_str(r#"{"kind": "final_answer"}"#).unwrap();
        assert_eq!(parser, OutputParser::final_answer());
        assert_eq!(
            serde_json::to_value(OutputParser::Citations).unwrap(),
            serde_json::json!({"kind": "citations"})
        );
    }
}
