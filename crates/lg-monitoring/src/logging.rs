//! Structured logging setup (§3.1 "Logging").
//!
//! Follows the teacher's `tracing_subscriber::registry()...init()` pattern,
//! generalized with a JSON line format, optional file output, and a
//! redacting field visitor that rewrites secret values before a line ever
//! reaches a sink.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::sync::Mutex;

use chrono::Utc;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use lg_config::Config;

/// Field names that are always redacted regardless of content, mirroring the
/// headers that carry the API key (§7).
const ALWAYS_REDACT_FIELDS: &[&str] = &["x-api-key", "authorization"];

enum Sink {
    Stdout,
    File(Mutex<File>),
}

/// A minimal JSON-lines tracing layer with redaction built into field
/// recording, rather than bolted on after formatting.
struct RedactingJsonLayer {
    secrets: Vec<String>,
    sink: Sink,
}

impl RedactingJsonLayer {
    fn redact(&self, field_name: &str, value: &str) -> bool {
        let lower = field_name.to_ascii_lowercase();
        if ALWAYS_REDACT_FIELDS.contains(&lower.as_str()) {
            return true;
        }
        self.secrets.iter().any(|s| !s.is_empty() && value.contains(s.as_str()))
    }

    fn write_line(&self, line: &str) {
        match &self.sink {
            Sink::Stdout => {
                let mut out = std::io::stdout();
                let _ = writeln!(out, "{line}");
            }
            Sink::File(file) => {
                if let Ok(mut f) = file.lock() {
                    let _ = writeln!(f, "{line}");
                }
            }
        }
    }
}

struct FieldCollector<'a> {
    layer: &'a RedactingJsonLayer,
    map: serde_json::Map<String, serde_json::Value>,
}

impl<'a> Visit for FieldCollector<'a> {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        let rendered = format!("{value:?}");
        self.insert(field.name(), rendered);
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.insert(field.name(), value.to_string());
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field.name(), value.to_string());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.insert(field.name(), value.to_string());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.insert(field.name(), value.to_string());
    }
}

impl<'a> FieldCollector<'a> {
    fn insert(&mut self, name: &str, rendered: String) {
        let stored = if self.layer.redact(name, &rendered) {
            "<redacted>".to_string()
        } else {
            rendered
        };
        self.map.insert(name.to_string(), serde_json::Value::String(stored));
    }
}

impl<S> Layer<S> for RedactingJsonLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut collector = FieldCollector {
            layer: self,
            map: serde_json::Map::new(),
        };
        event.record(&mut collector);

        let metadata = event.metadata();
        let mut record = serde_json::Map::new();
        record.insert(
            "timestamp".to_string(),
            serde_json::Value::String(Utc::now().to_rfc3339()),
        );
        record.insert(
            "level".to_string(),
            serde_json::Value::String(metadata.level().to_string()),
        );
        record.insert(
            "target".to_string(),
            serde_json::Value::String(metadata.target().to_string()),
        );
        for (key, value) in collector.map {
            record.insert(key, value);
        }

        if let Ok(line) = serde_json::to_string(&serde_json::Value::Object(record)) {
            self.write_line(&line);
        }
    }
}

/// Initializes the global `tracing` subscriber for the process.
///
/// `secrets` lists substrings (typically the configured API key) that must
/// never appear verbatim in a log line. Safe to call once; a second call
/// from the same process is a programmer error in the binary, not handled
/// here.
pub fn init_logging(config: &Config, secrets: Vec<String>) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if config.debug {
            "llamagate=debug,tower_http=debug".into()
        } else {
            "llamagate=info".into()
        }
    });

    let sink = match &config.log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .unwrap_or_else(|e| panic!("failed to open LOG_FILE {}: {e}", path.display()));
            Sink::File(Mutex::new(file))
        }
        None => Sink::Stdout,
    };

    let redacting_layer = RedactingJsonLayer { secrets, sink };

    tracing_subscriber::registry()
        .with(filter)
        .with(redacting_layer)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layer(secrets: Vec<&str>) -> RedactingJsonLayer {
        RedactingJsonLayer {
            secrets: secrets.into_iter().map(String::from).collect(),
            sink: Sink::Stdout,
        }
    }

    #[test]
    fn redacts_known_header_fields_regardless_of_value() {
        let l = layer(vec![]);
        assert!(l.redact("x-api-key", "sk-anything"));
        assert!(l.redact("Authorization", "Bearer abc"));
    }

    #[test]
    fn redacts_values_containing_configured_secret() {
        let l = layer(vec!["s3cr3t"]);
        assert!(l.redact("message", "key was s3cr3t here"));
        assert!(!l.redact("message", "nothing sensitive"));
    }

    #[test]
    fn empty_secret_strings_are_ignored() {
        let l = layer(vec![""]);
        assert!(!l.redact("message", "anything at all"));
    }
}
