use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;

use crate::config::{find_default_config, load_config, AppConfig, CONFIG_FILENAME};
use crate::models::hosted::{DEFAULT_BASE_URL, DEFAULT_MODEL};
use crate::pipeline::accumulator::DEFAULT_MAX_INPUT_TOKENS;
use crate::pipeline::align::{
    AlignmentConfig, DEFAULT_ALIGN_ADDR, DEFAULT_CONNECT_TIMEOUT, DEFAULT_IDLE_TIMEOUT,
    DEFAULT_REPLY_TIMEOUT,
};
use crate::pipeline::invoke::DEFAULT_TOKENS_PER_ITEM;
use crate::pipeline::prompts::{default_prompt_files, PromptSet, DEFAULT_PROMPTS_DIR};
use crate::pipeline::summary::{DEFAULT_SUMMARY_MAX_CHARS, DEFAULT_SUMMARY_MAX_TOKENS};
use crate::pipeline::trace::DEFAULT_LOG_DIR;

pub const DEFAULT_TARGET_LANG: &str = "Chinese";
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(2);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryMode {
    /// Ask the operator after each failure.
    Interactive,
    /// Fixed number of attempts with backoff.
    Auto,
}

impl RetryMode {
    pub fn parse(s: Option<&str>) -> Self {
        match s.unwrap_or("interactive").trim().to_ascii_lowercase().as_str() {
            "auto" => Self::Auto,
            _ => Self::Interactive,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ModelSettings {
    pub name: String,
    pub base_url: String,
    pub api_key_file: Option<PathBuf>,
    pub request_timeout: Duration,
}

/// Values given on the command line; each one wins over the config file.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub config: Option<PathBuf>,
    pub api_key: Option<PathBuf>,
    pub model: Option<String>,
    pub target_lang: Option<String>,
    pub max_input_tokens: Option<usize>,
    pub align_addr: Option<String>,
    pub no_align: bool,
    pub max_attempts: Option<u32>,
    pub interactive: Option<bool>,
}

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// The config file that was loaded; `None` when running on built-in defaults.
    pub config_path: Option<PathBuf>,

    pub target_lang: String,
    pub max_input_tokens: usize,
    pub tokens_per_item: u32,
    pub summary_max_chars: usize,
    pub summary_max_tokens: u32,

    pub retry_mode: RetryMode,
    pub max_attempts: u32,
    pub retry_backoff: Duration,

    pub log_dir: PathBuf,
    pub log_requests: bool,

    pub model: ModelSettings,
    pub alignment: Option<AlignmentConfig>,
    pub prompts: PromptSet,
}

impl PipelineConfig {
    pub fn from_paths_and_args(
        input: &Path,
        output: &Path,
        args: ConfigOverrides,
    ) -> anyhow::Result<Self> {
        let workdir = input
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));
        let workdir = workdir.canonicalize().unwrap_or(workdir);

        let cfg_file = args
            .config
            .clone()
            .or_else(|| {
                std::env::var("GAMETEXT_TRANSLATOR_CONFIG")
                    .ok()
                    .map(PathBuf::from)
            })
            .or_else(|| find_default_config(&workdir, CONFIG_FILENAME));

        let mut file_cfg = AppConfig::default();
        let mut loaded = None;
        if let Some(p) = cfg_file.as_ref() {
            if p.exists() {
                file_cfg = load_config(p)?;
                loaded = Some(p.clone());
            }
        }
        let cfg_dir = match cfg_file.as_deref() {
            Some(p) => p
                .parent()
                .filter(|d| !d.as_os_str().is_empty())
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from(".")),
            None => workdir,
        };

        Self::resolve(&file_cfg, loaded, &cfg_dir, output, args)
    }

    pub(crate) fn resolve(
        file_cfg: &AppConfig,
        config_path: Option<PathBuf>,
        cfg_dir: &Path,
        output: &Path,
        args: ConfigOverrides,
    ) -> anyhow::Result<Self> {
        let p = &file_cfg.pipeline;

        let target_lang = args
            .target_lang
            .or_else(|| p.target_lang.clone())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_TARGET_LANG.to_string());
        let max_input_tokens = args
            .max_input_tokens
            .or(p.max_input_tokens)
            .unwrap_or(DEFAULT_MAX_INPUT_TOKENS)
            .max(1);
        let tokens_per_item = p.tokens_per_item.unwrap_or(DEFAULT_TOKENS_PER_ITEM).max(1);
        let summary_max_chars = p.summary_max_chars.unwrap_or(DEFAULT_SUMMARY_MAX_CHARS).max(1);
        let summary_max_tokens = p
            .summary_max_tokens
            .unwrap_or(DEFAULT_SUMMARY_MAX_TOKENS)
            .max(1);

        let retry_mode = match args.interactive {
            Some(true) => RetryMode::Interactive,
            Some(false) => RetryMode::Auto,
            None => RetryMode::parse(p.retry_mode.as_deref()),
        };
        let max_attempts = args
            .max_attempts
            .or(p.max_attempts)
            .unwrap_or(DEFAULT_MAX_ATTEMPTS)
            .max(1);
        let retry_backoff = p
            .retry_backoff_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_RETRY_BACKOFF);

        let output_dir = output
            .parent()
            .filter(|d| !d.as_os_str().is_empty())
            .map(|d| d.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));
        let log_dir = p
            .log_dir
            .clone()
            .unwrap_or_else(|| DEFAULT_LOG_DIR.to_string());
        let log_dir = if Path::new(&log_dir).is_absolute() {
            PathBuf::from(log_dir)
        } else {
            output_dir.join(log_dir)
        };
        let log_requests = p.log_requests.unwrap_or(true);

        let m = &file_cfg.model;
        let api_key_file = args.api_key.or_else(|| {
            m.api_key_file.clone().map(|k| {
                if k.is_relative() {
                    cfg_dir.join(k)
                } else {
                    k
                }
            })
        });
        let model = ModelSettings {
            name: args
                .model
                .or_else(|| m.name.clone())
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            base_url: m
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_key_file,
            request_timeout: m
                .request_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT),
        };

        let a = &file_cfg.alignment;
        let alignment = if args.no_align || a.enabled == Some(false) {
            None
        } else {
            Some(AlignmentConfig {
                addr: args
                    .align_addr
                    .or_else(|| a.addr.clone())
                    .unwrap_or_else(|| DEFAULT_ALIGN_ADDR.to_string()),
                connect_timeout: a
                    .connect_timeout_ms
                    .map(Duration::from_millis)
                    .unwrap_or(DEFAULT_CONNECT_TIMEOUT),
                idle_timeout: a
                    .idle_timeout_ms
                    .map(Duration::from_millis)
                    .unwrap_or(DEFAULT_IDLE_TIMEOUT),
                reply_timeout: a
                    .reply_timeout_secs
                    .map(Duration::from_secs)
                    .unwrap_or(DEFAULT_REPLY_TIMEOUT),
            })
        };

        let prompts = PromptSet::load(cfg_dir, &file_cfg.prompts).context("load prompts")?;

        Ok(Self {
            config_path,
            target_lang,
            max_input_tokens,
            tokens_per_item,
            summary_max_chars,
            summary_max_tokens,
            retry_mode,
            max_attempts,
            retry_backoff,
            log_dir,
            log_requests,
            model,
            alignment,
            prompts,
        })
    }
}

pub fn init_default_config(dir: &Path, force: bool) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("create config dir: {}", dir.display()))?;
    let cfg_path = dir.join(CONFIG_FILENAME);

    let prompts_dir = dir.join(DEFAULT_PROMPTS_DIR);
    std::fs::create_dir_all(&prompts_dir)
        .with_context(|| format!("create prompts dir: {}", prompts_dir.display()))?;

    for (fname, body) in default_prompt_files() {
        let p = prompts_dir.join(fname);
        if p.exists() && !force {
            continue;
        }
        std::fs::write(&p, body).with_context(|| format!("write prompt: {}", p.display()))?;
    }

    if cfg_path.exists() && !force {
        return Ok(cfg_path);
    }
    std::fs::write(&cfg_path, DEFAULT_CONFIG_TOML)
        .with_context(|| format!("write config: {}", cfg_path.display()))?;
    Ok(cfg_path)
}

const DEFAULT_CONFIG_TOML: &str = r#"[pipeline]
target_lang = "Chinese"

# Token budget of one chunk (cl100k_base tokens of the pretty-printed records).
max_input_tokens = 3000
# Output ceiling per record for the translation call.
tokens_per_item = 50
summary_max_chars = 300
summary_max_tokens = 500

# "interactive": ask before retrying a failed chunk. "auto": retry up to max_attempts.
retry_mode = "interactive"
max_attempts = 3
retry_backoff_ms = 2000

# Relative to the output file directory.
log_dir = "api_logs"
log_requests = true

[model]
name = "gpt-4o-mini"
base_url = "https://api.openai.com/v1"
# Falls back to OPENAI_API_KEY when unset.
# api_key_file = "openai_key"
request_timeout_secs = 120

[alignment]
enabled = true
addr = "localhost:12345"
connect_timeout_ms = 5000
# Silence longer than this is reported; waiting continues until reply_timeout_secs.
idle_timeout_ms = 10000
reply_timeout_secs = 600

[prompts]
translate_system = "prompts/translate_system.txt"
translate_user = "prompts/translate_user.txt"
summarize_system = "prompts/summarize_system.txt"
summarize_user = "prompts/summarize_user.txt"
"#;
