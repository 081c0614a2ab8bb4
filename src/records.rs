use std::path::Path;

use anyhow::{anyhow, Context};
use encoding_rs::UTF_8;
use serde_json::Value;

use crate::error::PipelineError;

/// One opaque unit of source or translated text. The pipeline only serializes it whole.
pub type Record = Value;

/// Serialization used for token budgeting and for embedding records in prompts.
pub fn render_records(records: &[Record]) -> String {
    serde_json::to_string_pretty(records).unwrap_or_else(|_| "[]".to_string())
}

pub fn render_record(record: &Record) -> String {
    serde_json::to_string_pretty(record).unwrap_or_default()
}

pub fn load_records(path: &Path) -> anyhow::Result<Vec<Record>> {
    let text = read_text(path)?;
    let value: Value = serde_json::from_str(&text)
        .with_context(|| format!("parse input json: {}", path.display()))?;
    match value {
        Value::Array(items) => Ok(items),
        _ => Err(anyhow!("input data must be a JSON array: {}", path.display())),
    }
}

pub fn save_records(path: &Path, records: &[Record]) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(records).context("serialize translated records")?;
    let mut buf = String::with_capacity(json.len() + 3);
    buf.push('\u{FEFF}');
    buf.push_str(&json);
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("create output dir: {}", dir.display()))?;
    }
    std::fs::write(path, buf).with_context(|| format!("write output: {}", path.display()))?;
    Ok(())
}

pub fn load_game_intro(path: &Path) -> anyhow::Result<Option<String>> {
    let text = read_text(path)?;
    let text = text.trim();
    Ok((!text.is_empty()).then(|| text.to_string()))
}

/// Key file first, then `OPENAI_API_KEY`.
pub fn read_api_key(path: Option<&Path>) -> Result<String, PipelineError> {
    if let Some(p) = path {
        if !p.exists() {
            return Err(PipelineError::Configuration(format!(
                "API key file not found: {}",
                p.display()
            )));
        }
        let key = read_text(p).map_err(|err| PipelineError::Configuration(format!("{err:#}")))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(PipelineError::Configuration(format!(
                "API key file is empty: {}",
                p.display()
            )));
        }
        return Ok(key.to_string());
    }
    std::env::var("OPENAI_API_KEY")
        .ok()
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
        .ok_or_else(|| {
            PipelineError::Configuration(
                "no API key: pass --api-key <FILE> or set OPENAI_API_KEY".to_string(),
            )
        })
}

fn read_text(path: &Path) -> anyhow::Result<String> {
    let bytes = std::fs::read(path).with_context(|| format!("read: {}", path.display()))?;
    let (text, had_errors) = UTF_8.decode_with_bom_removal(&bytes);
    if had_errors {
        return Err(anyhow!("not valid UTF-8: {}", path.display()));
    }
    Ok(text.into_owned())
}
