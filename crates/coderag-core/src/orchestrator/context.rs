//! Citation-tagged context and prompt assembly.

use std::fmt::Write as _;

use super::merge::{ContextItem, ContextSource};

/// Phrase the generator is told to use when the context is insufficient.
pub const INSUFFICIENT_CONTEXT: &str = "The context does not contain the required information.";

/// Render items grouped by source; neighbors always come last.
#[must_use]
pub fn build_context(items: &[ContextItem]) -> String {
    let mut out = String::new();
    for (title, source) in [
        ("Nodes", ContextSource::Node),
        ("Code Chunks", ContextSource::Chunk),
        ("Neighbor Nodes", ContextSource::Neighbor),
    ] {
        let mut section = items.iter().filter(|i| i.source == source).peekable();
        if section.peek().is_none() && source == ContextSource::Neighbor {
            continue;
        }
        let _ = writeln!(out, "=== {title} ===");
        for item in section {
            match source {
                ContextSource::Neighbor => {
                    let _ = writeln!(out, "{}", item.citation());
                }
                _ => {
                    let _ = writeln!(out, "{} score={:.3}", item.citation(), item.similarity);
                }
            }
            let _ = writeln!(out, "{}", item.text.trim_end());
            out.push('\n');
        }
    }
    out
}

/// Full generation prompt for a retrieval-backed answer.
#[must_use]
pub fn build_prompt(question: &str, context: &str) -> String {
    format!(
        "You are a codebase analysis assistant.\n\
         \n\
         Use only the following context. Every context item starts with a bracketed \
         citation token; cite items inline by copying those tokens exactly and never invent \
         new ones.\n\
         Format your response as follows:\n\
         1. First, answer in natural sentences, citing the items you rely on.\n\
         2. Then, on a new line starting with \"References:\", list every citation token you used.\n\
         \n\
         If the information is missing, say:\n\
         \"{INSUFFICIENT_CONTEXT}\"\n\
         \n\
         ---------------------\n\
         CONTEXT:\n\
         {context}\n\
         ---------------------\n\
         \n\
         Question:\n\
         {question}\n\
         \n\
         Answer:\n"
    )
}

/// Prompt for questions answered without retrieval.
#[must_use]
pub fn direct_prompt(question: &str) -> String {
    format!(
        "You are a helpful assistant for a code search tool. Answer the user's message \
         directly and conversationally.\n\nUser: {question}\nAssistant:"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, source: ContextSource, similarity: f32) -> ContextItem {
        ContextItem {
            id: id.into(),
            source,
            similarity,
            text: format!("body of {id}\n"),
        }
    }

    #[test]
    fn sections_and_tokens() {
        let ctx = build_context(&[
            item("function:parse_date", ContextSource::Node, 0.8421),
            item("dates.py:1-20", ContextSource::Chunk, 0.5),
            item("module:dates", ContextSource::Neighbor, 0.0),
        ]);
        assert!(ctx.contains("=== Nodes ===\n[node:function:parse_date] score=0.842\nbody of function:parse_date\n"));
        assert!(ctx.contains("=== Code Chunks ===\n[chunk:dates.py:1-20] score=0.500\n"));
        assert!(ctx.contains("=== Neighbor Nodes ===\n[node:module:dates]\n"));
        let nodes = ctx.find("=== Nodes ===").unwrap();
        let chunks = ctx.find("=== Code Chunks ===").unwrap();
        let neighbors = ctx.find("=== Neighbor Nodes ===").unwrap();
        assert!(nodes < chunks && chunks < neighbors);
    }

    #[test]
    fn neighbor_section_omitted_when_empty() {
        let ctx = build_context(&[item("function:f", ContextSource::Node, 0.3)]);
        assert!(!ctx.contains("Neighbor"));
        assert!(ctx.contains("=== Code Chunks ==="));
    }

    #[test]
    fn prompt_carries_no_example_tokens() {
        let prompt = build_prompt("what does f do", "");
        assert!(!prompt.contains("[node:"));
        assert!(!prompt.contains("[chunk:"));
        assert!(prompt.contains(INSUFFICIENT_CONTEXT));
        assert!(prompt.contains("References:"));
        assert!(prompt.trim_end().ends_with("Answer:"));
    }
}
