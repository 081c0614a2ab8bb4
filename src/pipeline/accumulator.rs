use crate::records::{render_record, Record};
use crate::tokenizer::Tokenizer;

pub const DEFAULT_MAX_INPUT_TOKENS: usize = 3000;

/// Outcome of sizing a record against the current chunk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Admission {
    pub tokens: usize,
    /// The current chunk must be processed before this record is pushed.
    pub flush_first: bool,
}

/// Token-bounded buffer of pending records. Records are never split or dropped.
#[derive(Debug)]
pub struct ChunkAccumulator {
    max_tokens: usize,
    chunk: Vec<Record>,
    tokens: usize,
}

impl ChunkAccumulator {
    pub fn new(max_tokens: usize) -> Self {
        Self {
            max_tokens: max_tokens.max(1),
            chunk: Vec::new(),
            tokens: 0,
        }
    }

    pub fn admit(&self, record: &Record, tokenizer: &dyn Tokenizer) -> Admission {
        let tokens = tokenizer.count(&render_record(record));
        let flush_first = !self.chunk.is_empty() && self.tokens + tokens > self.max_tokens;
        Admission {
            tokens,
            flush_first,
        }
    }

    pub fn push(&mut self, record: Record, tokens: usize) {
        self.chunk.push(record);
        self.tokens += tokens;
    }

    pub fn chunk(&self) -> &[Record] {
        &self.chunk
    }

    pub fn tokens(&self) -> usize {
        self.tokens
    }

    pub fn is_empty(&self) -> bool {
        self.chunk.is_empty()
    }

    pub fn reset(&mut self) {
        self.chunk.clear();
        self.tokens = 0;
    }
}
