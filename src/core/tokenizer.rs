//! Token estimation used for context budgeting.
//!
//! Counts are only used to decide how much history fits in a request, so an
//! estimate is enough. The estimator approximates `cl100k_base`: plain ASCII
//! averages roughly four characters per token while CJK and other non-ASCII
//! characters usually encode to one token each.

use crate::api::ChatMessage;

/// Counts tokens in a piece of text.
///
/// Implementations must be deterministic and must never report fewer tokens
/// for a string than for any of its prefixes.
pub trait TokenCounter: Send + Sync {
    fn count_tokens(&self, text: &str) -> usize;

    /// Sum of the content costs of `messages`.
    fn count_message_tokens(&self, messages: &[ChatMessage]) -> usize {
        messages
            .iter()
            .map(|message| self.count_tokens(&message.content))
            .sum()
    }
}

/// Character-class estimate of the `cl100k_base` encoding.
#[derive(Debug, Clone, Copy, Default)]
pub struct Cl100kEstimate;

impl TokenCounter for Cl100kEstimate {
    fn count_tokens(&self, text: &str) -> usize {
        let (ascii, wide) = text.chars().fold((0usize, 0usize), |(ascii, wide), ch| {
            if ch.is_ascii() {
                (ascii + 1, wide)
            } else {
                (ascii, wide + 1)
            }
        });
        ascii.div_ceil(4) + wide
    }
}
