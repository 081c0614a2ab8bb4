use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

pub const CONFIG_FILENAME: &str = "gametext-translator.toml";

#[derive(Clone, Debug, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub pipeline: PipelineSection,
    #[serde(default)]
    pub model: ModelSection,
    #[serde(default)]
    pub alignment: AlignmentSection,
    #[serde(default)]
    pub prompts: PromptsSection,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct PipelineSection {
    /// Language the records are translated into (rendered into the prompts).
    #[serde(default)]
    pub target_lang: Option<String>,

    /// Token budget of one chunk's serialized records.
    #[serde(default)]
    pub max_input_tokens: Option<usize>,
    /// Output ceiling per record for the translation call.
    #[serde(default)]
    pub tokens_per_item: Option<u32>,
    #[serde(default)]
    pub summary_max_chars: Option<usize>,
    #[serde(default)]
    pub summary_max_tokens: Option<u32>,

    /// "interactive" (ask on stderr/stdin) or "auto" (fixed attempts with backoff).
    #[serde(default)]
    pub retry_mode: Option<String>,
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default)]
    pub retry_backoff_ms: Option<u64>,

    #[serde(default)]
    pub log_dir: Option<String>,
    #[serde(default)]
    pub log_requests: Option<bool>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct ModelSection {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    /// Key file; relative paths resolve against the config file directory.
    #[serde(default)]
    pub api_key_file: Option<PathBuf>,
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct AlignmentSection {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub addr: Option<String>,
    #[serde(default)]
    pub connect_timeout_ms: Option<u64>,
    #[serde(default)]
    pub idle_timeout_ms: Option<u64>,
    #[serde(default)]
    pub reply_timeout_secs: Option<u64>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct PromptsSection {
    #[serde(default)]
    pub translate_system: Option<String>,
    #[serde(default)]
    pub translate_user: Option<String>,
    #[serde(default)]
    pub summarize_system: Option<String>,
    #[serde(default)]
    pub summarize_user: Option<String>,
}

pub fn find_file_upwards(start_dir: &Path, filename: &str, max_levels: usize) -> Option<PathBuf> {
    let mut dir = start_dir;
    for _ in 0..=max_levels {
        let candidate = dir.join(filename);
        if candidate.exists() {
            return Some(candidate);
        }
        dir = dir.parent()?;
    }
    None
}

pub fn find_default_config(workdir: &Path, filename: &str) -> Option<PathBuf> {
    if let Ok(cwd) = std::env::current_dir() {
        if let Some(p) = find_file_upwards(&cwd, filename, 8) {
            return Some(p);
        }
    }
    if let Some(p) = find_file_upwards(workdir, filename, 8) {
        return Some(p);
    }
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            if let Some(p) = find_file_upwards(dir, filename, 10) {
                return Some(p);
            }
        }
    }
    None
}

pub fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read config: {}", path.display()))?;
    let cfg: AppConfig = toml::from_str(&text).context("parse config toml")?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_leaves_other_sections_default() {
        let cfg: AppConfig = toml::from_str(
            r#"
[pipeline]
max_input_tokens = 1200
retry_mode = "auto"

[alignment]
addr = "127.0.0.1:9000"
"#,
        )
        .expect("parse");
        assert_eq!(cfg.pipeline.max_input_tokens, Some(1200));
        assert_eq!(cfg.pipeline.retry_mode.as_deref(), Some("auto"));
        assert_eq!(cfg.alignment.addr.as_deref(), Some("127.0.0.1:9000"));
        assert!(cfg.alignment.enabled.is_none());
        assert!(cfg.model.name.is_none());
        assert!(cfg.prompts.translate_user.is_none());
    }

    #[test]
    fn finds_config_in_parent_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let nested = dir.path().join("a").join("b");
        std::fs::create_dir_all(&nested).expect("mkdir");
        let cfg = dir.path().join(CONFIG_FILENAME);
        std::fs::write(&cfg, "").expect("write");

        assert_eq!(find_file_upwards(&nested, CONFIG_FILENAME, 4), Some(cfg));
        assert_eq!(find_file_upwards(&nested, CONFIG_FILENAME, 1), None);
    }
}
