use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};

use crate::config::PromptsSection;

use super::memory::NarrativeContext;

pub const DEFAULT_PROMPTS_DIR: &str = "prompts";

pub const DEFAULT_TRANSLATE_SYSTEM: &str = "translate_system.txt";
pub const DEFAULT_TRANSLATE_USER: &str = "translate_user.txt";
pub const DEFAULT_SUMMARIZE_SYSTEM: &str = "summarize_system.txt";
pub const DEFAULT_SUMMARIZE_USER: &str = "summarize_user.txt";

const CONTEXT_VAR: &str = "{{context}}";

#[derive(Clone, Debug, PartialEq)]
pub struct PromptSet {
    pub translate_system: String,
    pub translate_user: String,
    pub summarize_system: String,
    pub summarize_user: String,
}

impl Default for PromptSet {
    fn default() -> Self {
        Self {
            translate_system: DEFAULT_TRANSLATE_SYSTEM_TEXT.to_string(),
            translate_user: DEFAULT_TRANSLATE_USER_TEXT.to_string(),
            summarize_system: DEFAULT_SUMMARIZE_SYSTEM_TEXT.to_string(),
            summarize_user: DEFAULT_SUMMARIZE_USER_TEXT.to_string(),
        }
    }
}

impl PromptSet {
    /// Built-in templates, replaced by any file configured under `[prompts]`.
    pub fn load(config_dir: &Path, p: &PromptsSection) -> anyhow::Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            translate_system: read_prompt(
                config_dir,
                "translate_system",
                p.translate_system.as_deref(),
                defaults.translate_system,
            )?,
            translate_user: read_prompt(
                config_dir,
                "translate_user",
                p.translate_user.as_deref(),
                defaults.translate_user,
            )?,
            summarize_system: read_prompt(
                config_dir,
                "summarize_system",
                p.summarize_system.as_deref(),
                defaults.summarize_system,
            )?,
            summarize_user: read_prompt(
                config_dir,
                "summarize_user",
                p.summarize_user.as_deref(),
                defaults.summarize_user,
            )?,
        })
    }
}

fn read_prompt(
    config_dir: &Path,
    key: &str,
    configured: Option<&str>,
    fallback: String,
) -> anyhow::Result<String> {
    let Some(rel) = configured.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(fallback);
    };
    let mut p = PathBuf::from(rel);
    if p.is_relative() {
        p = config_dir.join(&p);
    }
    if !p.exists() {
        return Err(anyhow!(
            "prompt file not found for {key}: {} (run: gametext-translator --init-config)",
            p.display()
        ));
    }
    let text = std::fs::read_to_string(&p).with_context(|| format!("read prompt: {}", p.display()))?;
    Ok(text)
}

pub fn render_template(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (k, v) in vars {
        let pat = format!("{{{{{k}}}}}");
        out = out.replace(&pat, v);
    }
    out
}

/// Renders a system template and places the narrative context at `{{context}}`, or after the
/// template when the placeholder is absent.
pub fn render_system(template: &str, vars: &[(&str, &str)], ctx: &NarrativeContext<'_>) -> String {
    let block = ctx.render_block();
    let rendered = render_template(template, vars);
    if rendered.contains(CONTEXT_VAR) {
        return rendered.replace(CONTEXT_VAR, &block).trim_end().to_string();
    }
    let mut out = rendered;
    if !block.is_empty() {
        if !out.ends_with('\n') {
            out.push_str("\n\n");
        }
        out.push_str(&block);
    }
    out
}

pub fn default_prompt_files() -> Vec<(&'static str, &'static str)> {
    vec![
        (DEFAULT_TRANSLATE_SYSTEM, DEFAULT_TRANSLATE_SYSTEM_TEXT),
        (DEFAULT_TRANSLATE_USER, DEFAULT_TRANSLATE_USER_TEXT),
        (DEFAULT_SUMMARIZE_SYSTEM, DEFAULT_SUMMARIZE_SYSTEM_TEXT),
        (DEFAULT_SUMMARIZE_USER, DEFAULT_SUMMARIZE_USER_TEXT),
    ]
}

pub const DEFAULT_TRANSLATE_SYSTEM_TEXT: &str = "You are a professional game translator. \
Translate game text into natural and accurate {{target_lang}}, \
preserving the original meaning, tone, and context. \
Avoid literal translations and ensure the result reads fluently to native players.

{{context}}";

pub const DEFAULT_TRANSLATE_USER_TEXT: &str = "Translate the following JSON array of game text into {{target_lang}}. \
Return a JSON array with the same structure, \
ensuring a strict one-to-one correspondence with the original. \
Do not include any additional comments or formatting.
```json
{{records}}
```";

pub const DEFAULT_SUMMARIZE_SYSTEM_TEXT: &str = "You are a professional game localization assistant. \
Your task is to analyze game text and generate a concise summary that captures its theme, tone, and context. \
This summary will be used to guide accurate and context-aware translation.

{{context}}";

pub const DEFAULT_SUMMARIZE_USER_TEXT: &str = "Summarize the following JSON array of game text into a concise and informative description. \
Limit the summary to no more than {{max_chars}} characters.
```json
{{records}}
```";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_replaces_every_occurrence() {
        let out = render_template("{{a}}-{{b}}-{{a}}", &[("a", "x"), ("b", "y")]);
        assert_eq!(out, "x-y-x");
    }

    #[test]
    fn context_lands_at_placeholder_or_tail() {
        let ctx = NarrativeContext {
            game_intro: Some("A pirate adventure."),
            summary: Some("The crew reached port."),
        };
        let at_placeholder = render_system("Role.\n\n{{context}}", &[], &ctx);
        assert!(at_placeholder.starts_with("Role.\n\nGame Introduction:\nA pirate adventure."));
        assert!(!at_placeholder.contains("{{context}}"));

        let appended = render_system("Role.", &[], &ctx);
        assert!(appended.starts_with("Role.\n\nGame Introduction:"));
        assert!(appended.contains("Previous Local Summary:\nThe crew reached port."));
    }

    #[test]
    fn empty_context_leaves_role_only() {
        let ctx = NarrativeContext::default();
        let out = render_system(DEFAULT_TRANSLATE_SYSTEM_TEXT, &[("target_lang", "Chinese")], &ctx);
        assert!(out.contains("accurate Chinese"));
        assert!(!out.contains("Game Introduction"));
        assert!(!out.contains("{{"));
    }

    #[test]
    fn configured_prompt_files_override_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(dir.path().join("prompts")).expect("mkdir");
        std::fs::write(dir.path().join("prompts/t.txt"), "custom {{records}}").expect("write");

        let section = PromptsSection {
            translate_user: Some("prompts/t.txt".to_string()),
            ..PromptsSection::default()
        };
        let set = PromptSet::load(dir.path(), &section).expect("load");
        assert_eq!(set.translate_user, "custom {{records}}");
        assert_eq!(set.translate_system, DEFAULT_TRANSLATE_SYSTEM_TEXT);

        let missing = PromptsSection {
            summarize_user: Some("prompts/nope.txt".to_string()),
            ..PromptsSection::default()
        };
        assert!(PromptSet::load(dir.path(), &missing).is_err());
    }
}
