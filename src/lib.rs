pub mod config;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod progress;
pub mod records;
pub mod tokenizer;

pub use error::PipelineError;
