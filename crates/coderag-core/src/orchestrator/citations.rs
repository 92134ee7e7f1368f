//! Citation token extraction and answer post-formatting.

use std::sync::LazyLock;

use regex::Regex;

static CITATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[(?:node|chunk):[^\]]+\]").expect("citation regex is valid")
});

/// Citation tokens in order of first appearance, without duplicates.
#[must_use]
pub fn extract_references(answer: &str) -> Vec<String> {
    let mut refs: Vec<String> = Vec::new();
    for m in CITATION_RE.find_iter(answer) {
        if !refs.iter().any(|r| r == m.as_str()) {
            refs.push(m.as_str().to_owned());
        }
    }
    refs
}

fn has_references_section(answer: &str) -> bool {
    answer
        .lines()
        .any(|l| l.trim_start().to_ascii_lowercase().starts_with("references:"))
}

/// Text that completes `answer` with a `References:` section, or `None` when
/// it cites nothing or already has one. `answer` itself is never altered, so a
/// streamed answer can be completed by sending the suffix after its fragments.
#[must_use]
pub fn references_suffix(answer: &str, refs: &[String]) -> Option<String> {
    if refs.is_empty() || has_references_section(answer) {
        return None;
    }
    let separator = if answer.ends_with("\n\n") {
        ""
    } else if answer.ends_with('\n') {
        "\n"
    } else {
        "\n\n"
    };
    let list = refs
        .iter()
        .map(|r| format!("- {r}"))
        .collect::<Vec<_>>()
        .join("\n");
    Some(format!("{separator}References:\n{list}"))
}

/// Append a `References:` section when the answer cites inline without one.
///
/// Returns the formatted answer and its references.
#[must_use]
pub fn format_answer(answer: &str) -> (String, Vec<String>) {
    let refs = extract_references(answer);
    let formatted = match references_suffix(answer, &refs) {
        Some(suffix) => format!("{answer}{suffix}"),
        None => answer.to_owned(),
    };
    (formatted, refs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_unique_tokens_in_order() {
        let refs = extract_references(
            "Uses [chunk:a.py:1-5] and [node:function:f], see [chunk:a.py:1-5] [other:x]",
        );
        assert_eq!(refs, vec!["[chunk:a.py:1-5]", "[node:function:f]"]);
    }

    #[test]
    fn appends_missing_references_section() {
        let (formatted, refs) = format_answer("f parses dates [node:function:f].\n");
        assert_eq!(refs, vec!["[node:function:f]"]);
        assert_eq!(
            formatted,
            "f parses dates [node:function:f].\n\nReferences:\n- [node:function:f]"
        );
    }

    #[test]
    fn keeps_existing_section() {
        let answer = "f parses dates.\n\nReferences:\n- [node:function:f]";
        let (formatted, refs) = format_answer(answer);
        assert_eq!(formatted, answer);
        assert_eq!(refs, vec!["[node:function:f]"]);
    }

    #[test]
    fn no_citations_leaves_answer_alone() {
        let (formatted, refs) = format_answer("I cannot tell.");
        assert_eq!(formatted, "I cannot tell.");
        assert!(refs.is_empty());
    }

    #[test]
    fn formatted_answer_extends_the_raw_text() {
        for raw in [
            "uses [node:function:f]",
            "uses [node:function:f]\n",
            "uses [node:function:f]\n\n",
        ] {
            let (formatted, refs) = format_answer(raw);
            let suffix = references_suffix(raw, &refs).unwrap();
            assert_eq!(formatted, format!("{raw}{suffix}"));
            assert!(formatted.contains("]\n\nReferences:\n- [node:function:f]"));
        }
    }
}
