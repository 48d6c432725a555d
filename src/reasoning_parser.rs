//! Reasoning Parser Module
//!
//! Splits a message's text into reasoning ("thought") and visible content.
//!
//! ## Supported Formats
//! - `<think>...</think>`
//! - `<thought>...</thought>`
//! Both case-insensitive.
//!
//! ## Streaming
//! The splitter is re-run on the whole accumulated string after every update,
//! so it carries no state between calls and the result only depends on the
//! input. Tags can arrive one character at a time; a trailing fragment that
//! could still grow into an open tag (`<th`, `<think`) is held back instead of
//! flickering into the visible content for one render frame.

/// Supported reasoning tag formats
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReasoningTag {
    Think,
    Thought,
}

impl ReasoningTag {
    const ALL: [ReasoningTag; 2] = [ReasoningTag::Think, ReasoningTag::Thought];

    /// Returns the opening tag for this format
    pub fn open_tag(&self) -> &'static str {
        match self {
            ReasoningTag::Think => "<think>",
            ReasoningTag::Thought => "<thought>",
        }
    }

    /// Returns the closing tag for this format
    pub fn close_tag(&self) -> &'static str {
        match self {
            ReasoningTag::Think => "</think>",
            ReasoningTag::Thought => "</thought>",
        }
    }
}

/// Result of splitting a message's text.
#[derive(Debug, Clone, PartialEq)]
pub struct ReasoningSplit {
    /// `None` when no reasoning marker was ever seen; `Some("")` when a
    /// marker was seen but no reasoning text has arrived yet. Callers use
    /// the distinction to decide whether to render a reasoning panel at all.
    pub thought: Option<String>,
    pub content: String,
    pub is_thinking: bool,
}

/// Split `text` into reasoning and visible content in one left-to-right scan.
pub fn split_reasoning(text: &str) -> ReasoningSplit {
    let mut content = String::new();
    let mut thought = String::new();
    let mut saw_marker = false;
    let mut is_thinking = false;
    let mut rest = text;

    while !rest.is_empty() {
        let Some(lt) = rest.find('<') else {
            content.push_str(rest);
            break;
        };
        content.push_str(&rest[..lt]);
        rest = &rest[lt..];

        if let Some(tag) = ReasoningTag::ALL
            .iter()
            .copied()
            .find(|t| starts_with_ci(rest, t.open_tag()))
        {
            saw_marker = true;
            let body = &rest[tag.open_tag().len()..];
            if !thought.is_empty() {
                thought.push('\n');
            }
            match find_ci(body, tag.close_tag()) {
                Some(close) => {
                    thought.push_str(&body[..close]);
                    rest = &body[close + tag.close_tag().len()..];
                }
                None => {
                    // The close tag has not arrived yet: everything after the
                    // open tag is in-progress thought, nothing after it may
                    // leak into content.
                    thought.push_str(body);
                    is_thinking = true;
                    break;
                }
            }
            continue;
        }

        if ReasoningTag::ALL
            .iter()
            .any(|t| anticipates_tag(rest, t.open_tag()))
        {
            // The string ends in the middle of what could become an open tag.
            // Hold the fragment back rather than showing it.
            saw_marker = true;
            is_thinking = true;
            break;
        }

        // A literal '<'.
        content.push('<');
        rest = &rest[1..];
    }

    ReasoningSplit {
        thought: saw_marker.then(|| thought.trim().to_string()),
        content: content.trim().to_string(),
        is_thinking,
    }
}

fn starts_with_ci(haystack: &str, tag: &str) -> bool {
    haystack.len() >= tag.len()
        && haystack.as_bytes()[..tag.len()].eq_ignore_ascii_case(tag.as_bytes())
}

/// True when the whole remaining text is a proper prefix of `tag`, i.e. the
/// stream may still be in the middle of delivering it.
fn anticipates_tag(rest: &str, tag: &str) -> bool {
    rest.len() < tag.len() && tag.as_bytes()[..rest.len()].eq_ignore_ascii_case(rest.as_bytes())
}

/// Case-insensitive `find` for an ASCII needle.
fn find_ci(haystack: &str, needle: &str) -> Option<usize> {
    let h = haystack.as_bytes();
    let n = needle.as_bytes();
    if n.is_empty() || h.len() < n.len() {
        return None;
    }
    h.windows(n.len()).position(|w| w.eq_ignore_ascii_case(n))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_has_no_thought() {
        let split = split_reasoning("just an answer");
        assert_eq!(split.thought, None);
        assert_eq!(split.content, "just an answer");
        assert!(!split.is_thinking);
    }

    #[test]
    fn test_complete_block_extraction() {
        let split = split_reasoning("a<think>b</think>c");
        assert_eq!(split.thought.as_deref(), Some("b"));
        assert_eq!(split.content, "ac");
        assert!(!split.is_thinking);
    }

    #[test]
    fn test_unterminated_block() {
        let split = split_reasoning("a<think>b");
        assert_eq!(split.thought.as_deref(), Some("b"));
        assert_eq!(split.content, "a");
        assert!(split.is_thinking);
    }

    #[test]
    fn test_tag_prefix_suppression() {
        // The most important streaming edge-case: "<th" must not flicker into
        // the visible answer while the tag is still arriving.
        let split = split_reasoning("hello <th");
        assert_eq!(split.content, "hello");
        assert_eq!(split.thought.as_deref(), Some(""));
        assert!(split.is_thinking);
    }

    #[test]
    fn test_bare_angle_bracket_at_end_anticipates() {
        let split = split_reasoning("x <");
        assert_eq!(split.content, "x");
        assert!(split.is_thinking);
    }

    #[test]
    fn test_angle_bracket_mid_string_is_literal() {
        let split = split_reasoning("1 < 2 and 3 > 2");
        assert_eq!(split.thought, None);
        assert_eq!(split.content, "1 < 2 and 3 > 2");
        assert!(!split.is_thinking);
    }

    #[test]
    fn test_non_tag_after_bracket_is_literal() {
        let split = split_reasoning("use Vec<thing> here");
        assert_eq!(split.thought, None);
        assert_eq!(split.content, "use Vec<thing> here");
    }

    #[test]
    fn test_multiple_blocks_concatenate_with_newline() {
        let split = split_reasoning("x<think>first</think>y<thought>second</thought>z");
        assert_eq!(split.thought.as_deref(), Some("first\nsecond"));
        assert_eq!(split.content, "xyz");
        assert!(!split.is_thinking);
    }

    #[test]
    fn test_thought_format() {
        let split = split_reasoning("<thought>deep</thought>answer");
        assert_eq!(split.thought.as_deref(), Some("deep"));
        assert_eq!(split.content, "answer");
    }

    #[test]
    fn test_tags_are_case_insensitive() {
        let split = split_reasoning("<THINK>loud</Think>quiet");
        assert_eq!(split.thought.as_deref(), Some("loud"));
        assert_eq!(split.content, "quiet");
    }

    #[test]
    fn test_open_tag_alone_is_seen_but_empty() {
        let split = split_reasoning("<think>");
        assert_eq!(split.thought.as_deref(), Some(""));
        assert_eq!(split.content, "");
        assert!(split.is_thinking);
    }

    #[test]
    fn test_rerun_is_idempotent() {
        let input = "a<think>b</think>c<think>d";
        assert_eq!(split_reasoning(input), split_reasoning(input));
    }

    #[test]
    fn test_every_prefix_of_a_stream_is_well_formed() {
        // Simulates character-at-a-time arrival: no prefix may ever leak tag
        // fragments into content.
        let full = "Hi <think>pondering</think> done";
        for (idx, _) in full.char_indices() {
            let split = split_reasoning(&full[..idx]);
            assert!(
                !split.content.contains('<') || full[..idx].trim_end().ends_with("done"),
                "prefix {:?} leaked tag text into content: {:?}",
                &full[..idx],
                split.content
            );
        }
        let final_split = split_reasoning(full);
        assert_eq!(final_split.content, "Hi  done".trim());
        assert_eq!(final_split.thought.as_deref(), Some("pondering"));
    }
}
