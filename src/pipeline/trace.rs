use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Serialize;

pub const DEFAULT_LOG_DIR: &str = "api_logs";

/// Persists every translation request/response pair as its own JSON file.
pub struct RequestLog {
    dir: PathBuf,
    enabled: bool,
}

#[derive(Serialize)]
struct LogEntry<'a> {
    timestamp: &'a str,
    request: LogRequest<'a>,
    response: &'a str,
}

#[derive(Serialize)]
struct LogRequest<'a> {
    system: &'a str,
    user: &'a str,
}

impl RequestLog {
    pub fn new(dir: PathBuf, enabled: bool) -> anyhow::Result<Self> {
        if enabled {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("create log dir: {}", dir.display()))?;
        }
        Ok(Self { dir, enabled })
    }

    pub fn disabled() -> Self {
        Self {
            dir: PathBuf::new(),
            enabled: false,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Writes `chat_<timestamp>.json`; returns the path, or `None` when logging is off.
    pub fn write_exchange(
        &self,
        system: &str,
        user: &str,
        response: &str,
    ) -> anyhow::Result<Option<PathBuf>> {
        if !self.enabled {
            return Ok(None);
        }
        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S_%6f").to_string();
        let entry = LogEntry {
            timestamp: &timestamp,
            request: LogRequest { system, user },
            response,
        };
        let json = serde_json::to_string_pretty(&entry).context("serialize request log")?;

        let mut n = 0u32;
        loop {
            let name = if n == 0 {
                format!("chat_{timestamp}.json")
            } else {
                format!("chat_{timestamp}_{n}.json")
            };
            let path = self.dir.join(name);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut f) => {
                    f.write_all(json.as_bytes())
                        .with_context(|| format!("write request log: {}", path.display()))?;
                    return Ok(Some(path));
                }
                Err(err) if err.kind() == ErrorKind::AlreadyExists => n += 1,
                Err(err) => {
                    return Err(err)
                        .with_context(|| format!("create request log: {}", path.display()))
                }
            }
        }
    }
}
