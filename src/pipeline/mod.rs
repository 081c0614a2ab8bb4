mod accumulator;
mod align;
mod config;
mod invoke;
mod memory;
mod parser;
mod prompts;
mod retry;
mod summary;
mod trace;
mod translator;

pub use accumulator::{Admission, ChunkAccumulator, DEFAULT_MAX_INPUT_TOKENS};
pub use align::{Aligner, AlignmentClient, AlignmentConfig, AlignmentOutcome};
pub use config::{init_default_config, ConfigOverrides, PipelineConfig, RetryMode};
pub use invoke::ChunkTranslator;
pub use memory::{NarrativeContext, PipelineState};
pub use parser::parse_translation;
pub use prompts::{render_template, PromptSet};
pub use retry::{FixedRetry, InteractiveRetry, RetryDecision, RetryPolicy};
pub use summary::ChunkSummarizer;
pub use trace::RequestLog;
pub use translator::TranslatorPipeline;
