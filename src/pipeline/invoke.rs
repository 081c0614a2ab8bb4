use crate::error::Result;
use crate::models::{ChatModel, ChatRequest};
use crate::progress::ConsoleProgress;
use crate::records::{render_records, Record};

use super::memory::NarrativeContext;
use super::prompts::{render_system, render_template};
use super::trace::RequestLog;

pub const DEFAULT_TOKENS_PER_ITEM: u32 = 50;

/// Sends one chunk to the model for translation. No retries here; the pipeline owns them.
pub struct ChunkTranslator {
    system_tmpl: String,
    user_tmpl: String,
    target_lang: String,
    tokens_per_item: u32,
    log: RequestLog,
    progress: ConsoleProgress,
}

impl ChunkTranslator {
    pub fn new(
        system_tmpl: String,
        user_tmpl: String,
        target_lang: String,
        tokens_per_item: u32,
        log: RequestLog,
        progress: ConsoleProgress,
    ) -> Self {
        Self {
            system_tmpl,
            user_tmpl,
            target_lang,
            tokens_per_item: tokens_per_item.max(1),
            log,
            progress,
        }
    }

    pub fn build_request(&self, chunk: &[Record], ctx: &NarrativeContext<'_>) -> ChatRequest {
        let vars = [("target_lang", self.target_lang.as_str())];
        let system = render_system(&self.system_tmpl, &vars, ctx);
        let records = render_records(chunk);
        let user = render_template(
            &self.user_tmpl,
            &[
                ("target_lang", self.target_lang.as_str()),
                ("records", records.as_str()),
            ],
        );
        let items = u32::try_from(chunk.len()).unwrap_or(u32::MAX);
        ChatRequest {
            system,
            user,
            temperature: 0.0,
            max_tokens: items.saturating_mul(self.tokens_per_item),
        }
    }

    /// Returns the raw reply and records the exchange in the request log.
    pub fn translate(
        &self,
        model: &dyn ChatModel,
        chunk: &[Record],
        ctx: &NarrativeContext<'_>,
    ) -> Result<String> {
        let request = self.build_request(chunk, ctx);
        let reply = model.chat(&request)?;
        let reply = reply.trim().to_string();
        if let Err(err) = self.log.write_exchange(&request.system, &request.user, &reply) {
            self.progress.warn(format!("request log failed: {err:#}"));
        }
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use crate::pipeline::prompts::PromptSet;
    use serde_json::json;
    use std::cell::RefCell;

    struct EchoModel {
        seen: RefCell<Vec<ChatRequest>>,
        reply: std::result::Result<String, String>,
    }

    impl ChatModel for EchoModel {
        fn name(&self) -> &str {
            "echo"
        }

        fn chat(&self, request: &ChatRequest) -> Result<String> {
            self.seen.borrow_mut().push(request.clone());
            self.reply.clone().map_err(PipelineError::Transport)
        }
    }

    fn translator(log: RequestLog) -> ChunkTranslator {
        let p = PromptSet::default();
        ChunkTranslator::new(
            p.translate_system,
            p.translate_user,
            "Chinese".to_string(),
            DEFAULT_TOKENS_PER_ITEM,
            log,
            ConsoleProgress::quiet(),
        )
    }

    #[test]
    fn request_embeds_context_records_and_ceiling() {
        let t = translator(RequestLog::disabled());
        let chunk = vec![json!({"text":"Hello"}), json!({"text":"Goodbye"}), json!({"text":"Run!"})];
        let ctx = NarrativeContext {
            game_intro: Some("A space opera."),
            summary: Some("The captain wakes up."),
        };
        let req = t.build_request(&chunk, &ctx);

        assert_eq!(req.temperature, 0.0);
        assert_eq!(req.max_tokens, 150);
        assert!(req.system.contains("Game Introduction:\nA space opera."));
        assert!(req.system.contains("Previous Local Summary:\nThe captain wakes up."));
        assert!(req.user.contains("one-to-one"));
        assert!(req.user.contains("```json\n[\n  {\n    \"text\": \"Hello\""));
    }

    #[test]
    fn translate_logs_exchange() {
        let dir = tempfile::tempdir().expect("tempdir");
        let t = translator(RequestLog::new(dir.path().to_path_buf(), true).expect("log"));
        let model = EchoModel {
            seen: RefCell::new(Vec::new()),
            reply: Ok("  [\"你好\"]  ".to_string()),
        };
        let reply = t
            .translate(&model, &[json!("Hello")], &NarrativeContext::default())
            .expect("translate");
        assert_eq!(reply, "[\"你好\"]");
        assert_eq!(model.seen.borrow().len(), 1);
        assert_eq!(std::fs::read_dir(dir.path()).expect("ls").count(), 1);
    }

    #[test]
    fn transport_errors_pass_through_without_retry() {
        let t = translator(RequestLog::disabled());
        let model = EchoModel {
            seen: RefCell::new(Vec::new()),
            reply: Err("quota exceeded".to_string()),
        };
        let err = t
            .translate(&model, &[json!("Hello")], &NarrativeContext::default())
            .expect_err("fails");
        assert!(matches!(err, PipelineError::Transport(ref m) if m == "quota exceeded"));
        assert_eq!(model.seen.borrow().len(), 1);
    }
}
