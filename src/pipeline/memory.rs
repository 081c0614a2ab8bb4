use crate::records::Record;

use super::accumulator::ChunkAccumulator;

/// Context carried into every model call: the static introduction plus the latest summary.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NarrativeContext<'a> {
    pub game_intro: Option<&'a str>,
    pub summary: Option<&'a str>,
}

impl NarrativeContext<'_> {
    #[must_use]
    pub fn render_block(&self) -> String {
        let mut sections: Vec<String> = Vec::with_capacity(2);
        if let Some(intro) = self.game_intro.filter(|s| !s.trim().is_empty()) {
            sections.push(format!("Game Introduction:\n{intro}"));
        }
        if let Some(summary) = self.summary.filter(|s| !s.trim().is_empty()) {
            sections.push(format!("Previous Local Summary:\n{summary}"));
        }
        sections.join("\n\n")
    }
}

/// Rolling state of one pipeline run. Only [`super::TranslatorPipeline`] mutates it.
#[derive(Debug)]
pub struct PipelineState {
    pub accumulator: ChunkAccumulator,
    summary: Option<String>,
    output: Vec<Record>,
    chunks_done: usize,
}

impl PipelineState {
    pub fn new(max_input_tokens: usize) -> Self {
        Self {
            accumulator: ChunkAccumulator::new(max_input_tokens),
            summary: None,
            output: Vec::new(),
            chunks_done: 0,
        }
    }

    pub fn summary(&self) -> Option<&str> {
        self.summary.as_deref()
    }

    pub fn output(&self) -> &[Record] {
        &self.output
    }

    pub fn chunks_done(&self) -> usize {
        self.chunks_done
    }

    /// Accepts the in-flight chunk: appends its translation, replaces the summary and empties
    /// the chunk buffer.
    pub fn commit(&mut self, translated: Vec<Record>, summary: String) {
        self.output.extend(translated);
        self.summary = Some(summary);
        self.accumulator.reset();
        self.chunks_done += 1;
    }

    pub fn into_output(self) -> Vec<Record> {
        self.output
    }
}
