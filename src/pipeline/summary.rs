use crate::error::Result;
use crate::models::{ChatModel, ChatRequest};
use crate::records::{render_records, Record};

use super::memory::NarrativeContext;
use super::prompts::{render_system, render_template};

pub const DEFAULT_SUMMARY_MAX_CHARS: usize = 300;
pub const DEFAULT_SUMMARY_MAX_TOKENS: u32 = 500;

/// Produces the rolling summary that replaces the previous one after a chunk is accepted.
pub struct ChunkSummarizer {
    system_tmpl: String,
    user_tmpl: String,
    max_chars: usize,
    max_tokens: u32,
}

impl ChunkSummarizer {
    pub fn new(system_tmpl: String, user_tmpl: String, max_chars: usize, max_tokens: u32) -> Self {
        Self {
            system_tmpl,
            user_tmpl,
            max_chars: max_chars.max(1),
            max_tokens: max_tokens.max(1),
        }
    }

    pub fn build_request(&self, chunk: &[Record], ctx: &NarrativeContext<'_>) -> ChatRequest {
        let max_chars = self.max_chars.to_string();
        let vars = [("max_chars", max_chars.as_str())];
        let system = render_system(&self.system_tmpl, &vars, ctx);
        let records = render_records(chunk);
        let user = render_template(
            &self.user_tmpl,
            &[("max_chars", max_chars.as_str()), ("records", records.as_str())],
        );
        ChatRequest {
            system,
            user,
            temperature: 0.0,
            max_tokens: self.max_tokens,
        }
    }

    pub fn summarize(
        &self,
        model: &dyn ChatModel,
        chunk: &[Record],
        ctx: &NarrativeContext<'_>,
    ) -> Result<String> {
        let reply = model.chat(&self.build_request(chunk, ctx))?;
        Ok(reply.trim().to_string())
    }
}
