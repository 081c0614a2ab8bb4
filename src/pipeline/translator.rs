use std::time::Duration;

use anyhow::Context;

use crate::error::{PipelineError, Result};
use crate::models::ChatModel;
use crate::progress::ConsoleProgress;
use crate::records::Record;
use crate::tokenizer::Tokenizer;

use super::align::{Aligner, AlignmentClient, AlignmentOutcome};
use super::config::{PipelineConfig, RetryMode};
use super::invoke::ChunkTranslator;
use super::memory::{NarrativeContext, PipelineState};
use super::parser::parse_translation;
use super::retry::{FixedRetry, InteractiveRetry, RetryDecision, RetryPolicy};
use super::summary::ChunkSummarizer;
use super::trace::RequestLog;

/// Streams records through accumulate -> translate -> parse -> align -> summarize -> commit.
///
/// A chunk is committed only when every step succeeded, so a retried chunk never leaves a
/// partial translation or a stale summary behind.
pub struct TranslatorPipeline {
    model: Box<dyn ChatModel>,
    tokenizer: Box<dyn Tokenizer>,
    aligner: Option<Box<dyn Aligner>>,
    retry: Box<dyn RetryPolicy>,
    translator: ChunkTranslator,
    summarizer: ChunkSummarizer,
    game_intro: Option<String>,
    state: PipelineState,
    progress: ConsoleProgress,
    total: Option<usize>,
}

impl TranslatorPipeline {
    pub fn new(
        cfg: &PipelineConfig,
        model: Box<dyn ChatModel>,
        tokenizer: Box<dyn Tokenizer>,
        game_intro: Option<String>,
        progress: ConsoleProgress,
    ) -> anyhow::Result<Self> {
        let log = RequestLog::new(cfg.log_dir.clone(), cfg.log_requests)
            .context("init request log")?;

        if cfg.log_requests {
            progress.info(format!("Request log: {}", log.dir().display()));
        }

        let aligner = cfg.alignment.clone().map(|a| {
            Box::new(AlignmentClient::new(a, model.name(), progress)) as Box<dyn Aligner>
        });
        let retry: Box<dyn RetryPolicy> = match cfg.retry_mode {
            RetryMode::Interactive => Box::new(InteractiveRetry::stdio()),
            RetryMode::Auto => Box::new(FixedRetry::new(cfg.max_attempts, cfg.retry_backoff)),
        };

        let translator = ChunkTranslator::new(
            cfg.prompts.translate_system.clone(),
            cfg.prompts.translate_user.clone(),
            cfg.target_lang.clone(),
            cfg.tokens_per_item,
            log,
            progress,
        );
        let summarizer = ChunkSummarizer::new(
            cfg.prompts.summarize_system.clone(),
            cfg.prompts.summarize_user.clone(),
            cfg.summary_max_chars,
            cfg.summary_max_tokens,
        );

        Ok(Self {
            model,
            tokenizer,
            aligner,
            retry,
            translator,
            summarizer,
            game_intro: game_intro.filter(|s| !s.trim().is_empty()),
            state: PipelineState::new(cfg.max_input_tokens),
            progress,
            total: None,
        })
    }

    #[must_use]
    pub fn with_aligner(mut self, aligner: Box<dyn Aligner>) -> Self {
        self.aligner = Some(aligner);
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: Box<dyn RetryPolicy>) -> Self {
        self.retry = retry;
        self
    }

    /// Translates the whole input. On error the records committed so far stay in [`Self::output`].
    pub fn run(&mut self, records: Vec<Record>) -> Result<()> {
        self.total = Some(records.len());
        self.progress.info(format!(
            "Translating {} record(s) with {}",
            records.len(),
            self.model.name()
        ));
        for record in records {
            self.push(record)?;
        }
        self.finish()
    }

    /// Adds one record, processing the pending chunk first when the record would overflow it.
    pub fn push(&mut self, record: Record) -> Result<()> {
        let admission = self.state.accumulator.admit(&record, self.tokenizer.as_ref());
        if admission.flush_first {
            self.flush()?;
        }
        self.state.accumulator.push(record, admission.tokens);
        Ok(())
    }

    /// Processes whatever is still buffered.
    pub fn finish(&mut self) -> Result<()> {
        self.flush()
    }

    pub fn output(&self) -> &[Record] {
        self.state.output()
    }

    pub fn summary(&self) -> Option<&str> {
        self.state.summary()
    }

    pub fn chunks_done(&self) -> usize {
        self.state.chunks_done()
    }

    pub fn into_output(self) -> Vec<Record> {
        self.state.into_output()
    }

    fn flush(&mut self) -> Result<()> {
        if self.state.accumulator.is_empty() {
            return Ok(());
        }
        let chunk_no = self.state.chunks_done() + 1;
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let err = match self.process_chunk() {
                Ok(()) => return Ok(()),
                Err(err) if err.is_retryable() => err,
                Err(err) => return Err(err),
            };
            self.progress.warn(format!(
                "chunk {chunk_no} ({} record(s)) failed on attempt {attempt}: {err}",
                self.state.accumulator.chunk().len()
            ));
            match self.retry.decide(attempt, &err) {
                RetryDecision::Retry { delay } => sleep_backoff(delay),
                RetryDecision::Abort => return Err(err),
            }
        }
    }

    fn process_chunk(&mut self) -> Result<()> {
        let chunk = self.state.accumulator.chunk();
        let ctx = NarrativeContext {
            game_intro: self.game_intro.as_deref(),
            summary: self.state.summary(),
        };

        let raw = self.translator.translate(self.model.as_ref(), chunk, &ctx)?;
        let translated = parse_translation(&raw)?;
        let records = match self.aligner.as_deref() {
            None => translated,
            Some(aligner) => match aligner.align(chunk, translated)? {
                AlignmentOutcome::Aligned(items) => items,
                AlignmentOutcome::Unaligned { translated, reason } => {
                    self.progress.warn(format!(
                        "chunk {}: {reason}; using unaligned translation",
                        self.state.chunks_done() + 1
                    ));
                    translated
                }
            },
        };
        if records.len() != chunk.len() {
            return Err(PipelineError::AlignmentMismatch {
                expected: chunk.len(),
                actual: records.len(),
            });
        }

        let summary = self.summarizer.summarize(self.model.as_ref(), chunk, &ctx)?;
        self.state.commit(records, summary);

        let done = self.state.output().len();
        match self.total {
            Some(total) => self.progress.progress("Records", done, total),
            None => self
                .progress
                .info(format!("Chunk {} done ({done} record(s))", self.state.chunks_done())),
        }
        Ok(())
    }
}

fn sleep_backoff(delay: Duration) {
    if !delay.is_zero() {
        std::thread::sleep(delay);
    }
}
