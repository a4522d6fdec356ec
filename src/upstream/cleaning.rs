//! Removal of reasoning traces from backend output.
//!
//! Some models wrap their deliberation in `<think>...</think>`. Unless the
//! operator asked to keep it, that span is removed and the blank lines it
//! leaves behind are collapsed.

use once_cell::sync::Lazy;
use regex::Regex;

const OPEN_TAG: &str = "<think>";
const CLOSE_TAG: &str = "</think>";

static REASONING_SPAN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<think>.*?</think>").expect("valid reasoning pattern"));

static BLANK_RUN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n[^\S\n]*\n(?:[^\S\n]*\n)+").expect("valid blank-line pattern"));

/// Strips reasoning spans from a complete text. Identity when
/// `include_reasoning` is set.
pub fn clean_response(text: &str, include_reasoning: bool) -> String {
    if include_reasoning {
        return text.to_string();
    }

    let mut cleaned = text.to_string();
    // Removing one span can join the halves of another.
    while REASONING_SPAN.is_match(&cleaned) {
        cleaned = REASONING_SPAN.replace_all(&cleaned, "").into_owned();
    }
    collapse_blank_lines(&cleaned)
}

fn collapse_blank_lines(text: &str) -> String {
    BLANK_RUN.replace_all(text, "\n\n").into_owned()
}

/// Incremental variant of [`clean_response`] for token streams, where a
/// reasoning span (or one of its tags) is usually split across many tokens.
#[derive(Debug)]
pub struct ReasoningFilter {
    include_reasoning: bool,
    inside: bool,
    pending: String,
}

impl ReasoningFilter {
    pub fn new(include_reasoning: bool) -> Self {
        Self {
            include_reasoning,
            inside: false,
            pending: String::new(),
        }
    }

    /// Feeds one token, returning the visible text it releases, if any.
    pub fn push(&mut self, token: &str) -> Option<String> {
        if self.include_reasoning {
            return non_empty(token.to_string());
        }

        self.pending.push_str(token);
        let mut visible = String::new();

        loop {
            // ASCII lowercasing keeps byte offsets aligned with `pending`.
            let lower = self.pending.to_ascii_lowercase();
            if self.inside {
                match lower.find(CLOSE_TAG) {
                    Some(pos) => {
                        self.pending.drain(..pos + CLOSE_TAG.len());
                        self.inside = false;
                    }
                    None => {
                        let cut = self.pending.len() - partial_tag_suffix(&lower, CLOSE_TAG);
                        self.pending.drain(..cut);
                        break;
                    }
                }
            } else {
                match lower.find(OPEN_TAG) {
                    Some(pos) => {
                        visible.push_str(&self.pending[..pos]);
                        self.pending.drain(..pos + OPEN_TAG.len());
                        self.inside = true;
                    }
                    None => {
                        let cut = self.pending.len() - partial_tag_suffix(&lower, OPEN_TAG);
                        visible.push_str(&self.pending[..cut]);
                        self.pending.drain(..cut);
                        break;
                    }
                }
            }
        }

        non_empty(collapse_blank_lines(&visible))
    }

    /// Flushes text held back at the end of the stream. An unterminated
    /// span is released verbatim, as [`clean_response`] would leave it.
    pub fn finish(&mut self) -> Option<String> {
        let mut rest = std::mem::take(&mut self.pending);
        if self.inside {
            self.inside = false;
            rest.insert_str(0, OPEN_TAG);
        }
        non_empty(collapse_blank_lines(&rest))
    }
}

/// Length of the longest proper prefix of `tag` that ends `haystack`.
fn partial_tag_suffix(haystack: &str, tag: &str) -> usize {
    (1..tag.len())
        .rev()
        .find(|&n| haystack.ends_with(&tag[..n]))
        .unwrap_or(0)
}

fn non_empty(text: String) -> Option<String> {
    (!text.is_empty()).then_some(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter_all(tokens: &[&str]) -> Vec<String> {
        let mut filter = ReasoningFilter::new(false);
        let mut out: Vec<String> = tokens.iter().filter_map(|t| filter.push(t)).collect();
        out.extend(filter.finish());
        out
    }

    #[test]
    fn strips_reasoning_across_lines_and_case() {
        let raw = "<THINK>\nplan the answer\n</Think>\n\n\n\nThe answer is 4.";
        assert_eq!(clean_response(raw, false), "\n\nThe answer is 4.");
    }

    #[test]
    fn strips_every_span() {
        let raw = "a<think>x</think>b<think>y\nz</think>c";
        assert_eq!(clean_response(raw, false), "abc");
    }

    #[test]
    fn cleaning_is_idempotent() {
        let samples = [
            "<think>one</think>\n\n\n\nbody\n \n\t\nend",
            "<thi<think>x</think>nk>hidden</think>shown",
            "no tags at all\n\n\nhere",
            "dangling <think> never closed",
        ];
        for raw in samples {
            let once = clean_response(raw, false);
            assert_eq!(clean_response(&once, false), once, "input: {raw:?}");
        }
    }

    #[test]
    fn nested_fragments_are_removed() {
        assert_eq!(
            clean_response("<thi<think>x</think>nk>hidden</think>shown", false),
            "shown"
        );
    }

    #[test]
    fn inclusion_keeps_text_verbatim() {
        let raw = "<think>keep me</think>\n\n\n\nanswer";
        assert_eq!(clean_response(raw, true), raw);
    }

    #[test]
    fn filter_handles_tags_split_across_tokens() {
        let out = filter_all(&["Hel", "lo <th", "ink>sec", "ret</thi", "nk> world"]);
        assert_eq!(out.concat(), "Hello  world");
    }

    #[test]
    fn filter_suppresses_tokens_inside_reasoning() {
        let out = filter_all(&["<think>", "\n", "hmm", "</think>", "Hi", " there"]);
        assert_eq!(out, vec!["Hi".to_string(), " there".to_string()]);
    }

    #[test]
    fn filter_releases_held_prefix_that_was_not_a_tag() {
        let out = filter_all(&["a <", "b"]);
        assert_eq!(out.concat(), "a <b");
    }

    #[test]
    fn filter_passes_through_when_reasoning_included() {
        let mut filter = ReasoningFilter::new(true);
        assert_eq!(filter.push("<think>").as_deref(), Some("<think>"));
        assert_eq!(filter.push(""), None);
        assert_eq!(filter.finish(), None);
    }
}
