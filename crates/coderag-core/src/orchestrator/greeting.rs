//! Small-talk detection so greetings skip retrieval and the cache.

const GREETINGS: &[&str] = &[
    "hi",
    "hello",
    "hey",
    "greetings",
    "good morning",
    "good afternoon",
    "good evening",
    "howdy",
    "what's up",
    "sup",
    "yo",
];

/// Words that may accompany a greeting without turning it into a question.
const FILLER: &[&str] = &[
    "there", "team", "everyone", "all", "folks", "friend", "friends", "again", "bot", "you",
];

const MAX_GREETING_WORDS: usize = 6;

/// `true` when a short message consists only of greetings and filler words.
#[must_use]
pub fn is_greeting(question: &str) -> bool {
    let words: Vec<String> = question
        .split_whitespace()
        .map(|w| {
            w.trim_matches(|c: char| !c.is_alphanumeric() && c != '\'')
                .to_lowercase()
        })
        .filter(|w| !w.is_empty())
        .collect();
    if words.is_empty() || words.len() > MAX_GREETING_WORDS {
        return false;
    }

    let mut rest = words.as_slice();
    let mut greeted = false;
    while !rest.is_empty() {
        if let Some(len) = greeting_at(rest) {
            greeted = true;
            rest = &rest[len..];
        } else if FILLER.contains(&rest[0].as_str()) {
            rest = &rest[1..];
        } else {
            return false;
        }
    }
    greeted
}

/// Length in words of the greeting phrase opening `words`, if any.
fn greeting_at(words: &[String]) -> Option<usize> {
    GREETINGS.iter().find_map(|greeting| {
        let parts: Vec<&str> = greeting.split(' ').collect();
        (words.len() >= parts.len() && words.iter().zip(&parts).all(|(w, p)| w == p))
            .then_some(parts.len())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_greetings() {
        assert!(is_greeting("hi"));
        assert!(is_greeting("Hello!"));
        assert!(is_greeting("good morning, team"));
        assert!(is_greeting("Hey there"));
        assert!(is_greeting("what's up?"));
    }

    #[test]
    fn ignores_substrings_and_questions() {
        assert!(!is_greeting("this function"));
        assert!(!is_greeting("what does parse_date do"));
        assert!(!is_greeting("which module handles yoga poses"));
        assert!(!is_greeting(""));
        assert!(!is_greeting("team"));
        assert!(!is_greeting(
            "hello, can you explain how the graph store merges nodes across runs"
        ));
    }

    #[test]
    fn greeting_followed_by_question_is_not_small_talk() {
        assert!(!is_greeting("Hey, what does parse_date do?"));
        assert!(!is_greeting("hi, where is render defined"));
        assert!(!is_greeting("hello parse_date"));
        assert!(is_greeting("hi hi, hello again"));
    }
}
