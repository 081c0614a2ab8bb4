pub mod hosted;

use crate::error::Result;

/// One role-tagged exchange with a chat model.
#[derive(Clone, Debug, PartialEq)]
pub struct ChatRequest {
    pub system: String,
    pub user: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// A language model that answers a system + user instruction with free text.
///
/// Implementations report every failure as [`crate::PipelineError::Transport`] and never retry.
pub trait ChatModel {
    /// Model identifier, also used as the alignment label.
    fn name(&self) -> &str;

    fn chat(&self, request: &ChatRequest) -> Result<String>;
}
