//! Per-request access log, written as daily-rotating JSON Lines files
//! (§6 "Log format").
//!
//! Grounded on the teacher's `AccessLogger`: a `BufWriter<File>` guarded by a
//! mutex, reopened when the calendar date changes. Unlike the teacher this
//! runs inside a standalone server rather than a desktop app, so there is no
//! OS-specific log directory resolution or Tauri event emission; the
//! directory is an explicit, caller-supplied path.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use lg_types::AppResult;

/// One line of the access log (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessLogEntry {
    pub timestamp: DateTime<Utc>,
    pub request_id: String,
    pub method: String,
    pub path: String,
    pub status_code: u16,
    pub model: Option<String>,
    pub cache_hit: bool,
    pub tool_rounds: u32,
    pub latency_ms: u64,
    pub client_ip: Option<String>,
}

impl AccessLogEntry {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        request_id: impl Into<String>,
        method: impl Into<String>,
        path: impl Into<String>,
        status_code: u16,
        model: Option<String>,
        cache_hit: bool,
        tool_rounds: u32,
        latency_ms: u64,
        client_ip: Option<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            request_id: request_id.into(),
            method: method.into(),
            path: path.into(),
            status_code,
            model,
            cache_hit,
            tool_rounds,
            latency_ms,
            client_ip,
        }
    }
}

/// Writes [`AccessLogEntry`] records to `<log_dir>/access-YYYY-MM-DD.jsonl`,
/// rotating when the date changes, and prunes files older than
/// `retention_days`.
pub struct AccessLogger {
    log_dir: PathBuf,
    writer: Arc<Mutex<Option<BufWriter<File>>>>,
    current_date: Arc<Mutex<String>>,
    retention_days: u32,
}

impl AccessLogger {
    pub fn new(log_dir: PathBuf, retention_days: u32) -> AppResult<Self> {
        fs::create_dir_all(&log_dir)?;
        Ok(Self {
            log_dir,
            writer: Arc::new(Mutex::new(None)),
            current_date: Arc::new(Mutex::new(String::new())),
            retention_days,
        })
    }

    fn log_file_path(&self, date: &str) -> PathBuf {
        self.log_dir.join(format!("access-{date}.jsonl"))
    }

    fn ensure_log_file(&self) -> AppResult<()> {
        let today = Utc::now().format("%Y-%m-%d").to_string();
        let mut current_date = self.current_date.lock();
        if *current_date != today {
            let path = self.log_file_path(&today);
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            *self.writer.lock() = Some(BufWriter::new(file));
            *current_date = today;
            if let Err(e) = self.cleanup_old_logs() {
                tracing::warn!(error = %e, "failed to clean up old access logs");
            }
        }
        Ok(())
    }

    pub fn log(&self, entry: &AccessLogEntry) -> AppResult<()> {
        self.ensure_log_file()?;
        let json = serde_json::to_string(entry)?;
        let mut guard = self.writer.lock();
        if let Some(writer) = guard.as_mut() {
            writeln!(writer, "{json}")?;
            writer.flush()?;
        }
        Ok(())
    }

    fn cleanup_old_logs(&self) -> AppResult<()> {
        let cutoff = Utc::now() - chrono::Duration::days(self.retention_days as i64);
        for entry in fs::read_dir(&self.log_dir)? {
            let entry = entry?;
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            let Some(date_str) = name
                .strip_prefix("access-")
                .and_then(|s| s.strip_suffix(".jsonl"))
            else {
                continue;
            };
            let Ok(date) = chrono::NaiveDate::parse_from_str(date_str, "%Y-%m-%d") else {
                continue;
            };
            if date.and_hms_opt(0, 0, 0).unwrap().and_utc() < cutoff {
                let _ = fs::remove_file(entry.path());
            }
        }
        Ok(())
    }
}
