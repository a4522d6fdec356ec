//! Approximate token accounting.
//!
//! Counts are whitespace-delimited words, not model tokens.

use crate::types::Usage;

pub fn count_tokens(text: &str) -> u32 {
    text.split_whitespace().count() as u32
}

impl Usage {
    pub fn from_texts(prompt: &str, response: &str) -> Self {
        let prompt_tokens = count_tokens(prompt);
        let completion_tokens = count_tokens(response);
        Usage {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}
