//! Token counting used for chunk budgeting.
//!
//! Counts only decide where chunks are cut; no correctness property depends on them.

use anyhow::Context;
use tiktoken_rs::CoreBPE;

pub trait Tokenizer {
    fn count(&self, text: &str) -> usize;
}

impl<F> Tokenizer for F
where
    F: Fn(&str) -> usize,
{
    fn count(&self, text: &str) -> usize {
        self(text)
    }
}

/// `cl100k_base` BPE, the encoding used by the GPT-4o family.
pub struct BpeTokenizer {
    bpe: CoreBPE,
}

impl BpeTokenizer {
    pub fn cl100k() -> anyhow::Result<Self> {
        let bpe = tiktoken_rs::cl100k_base().context("load cl100k_base encoding")?;
        Ok(Self { bpe })
    }
}

impl Tokenizer for BpeTokenizer {
    fn count(&self, text: &str) -> usize {
        self.bpe.encode_with_special_tokens(text).len()
    }
}

/// Rough fallback: one token per four bytes, at least one for non-empty text.
pub struct ByteEstimateTokenizer;

impl Tokenizer for ByteEstimateTokenizer {
    fn count(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        text.len().div_ceil(4).max(1)
    }
}
