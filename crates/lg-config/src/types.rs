//! Typed configuration options, parsed from environment variables (§6).

use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set to a valid value, got {1:?}")]
    InvalidValue(&'static str, String),
    #[error("{0} exceeds its maximum allowed value")]
    OutOfRange(&'static str),
    #[error("TLS is enabled but {0} was not set")]
    MissingTlsMaterial(&'static str),
}

/// Tool-call guardrail parameters (§3 "Configuration"). Lives alongside the
/// rest of `Config` since every field is fixed at process start.
#[derive(Debug, Clone, Serialize)]
pub struct McpGuardrailConfig {
    pub max_tool_rounds: u32,
    pub max_tool_calls_per_round: u32,
    pub default_tool_timeout: Duration,
    pub max_tool_result_bytes: usize,
    pub allow_tools: Vec<String>,
    pub deny_tools: Vec<String>,
}

impl Default for McpGuardrailConfig {
    fn default() -> Self {
        Self {
            max_tool_rounds: 10,
            max_tool_calls_per_round: 10,
            default_tool_timeout: Duration::from_secs(30),
            max_tool_result_bytes: 1_048_576,
            allow_tools: Vec::new(),
            deny_tools: Vec::new(),
        }
    }
}

/// The process-wide immutable configuration record (§3).
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    pub ollama_host: String,
    pub port: u16,
    pub api_key: Option<String>,
    pub rate_limit_rps: u32,
    pub debug: bool,
    pub log_file: Option<PathBuf>,
    pub tls_enabled: bool,
    pub tls_cert_file: Option<PathBuf>,
    pub tls_key_file: Option<PathBuf>,
    pub upstream_timeout: Duration,
    pub shutdown_timeout: Duration,
    pub mcp_enabled: bool,
    pub mcp_guardrails: McpGuardrailConfig,
    pub mcp_servers_file: Option<PathBuf>,
    pub mcp_health_check_interval: Duration,
    pub extensions_upsert_enabled: bool,
    pub extensions_dir: PathBuf,
    pub cache_capacity: usize,
    pub cache_ttl: Duration,
    pub access_log_dir: PathBuf,
    pub access_log_retention_days: u32,
}

const MAX_UPSTREAM_TIMEOUT: Duration = Duration::from_secs(30 * 60);

impl Config {
    /// Parse configuration from the process environment, applying the
    /// defaults named in §6 and rejecting out-of-bounds values.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// Testable variant that reads variables through a caller-supplied
    /// lookup function instead of the real process environment.
    pub fn from_env_with(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let ollama_host = get("OLLAMA_HOST").unwrap_or_else(|| "http://localhost:11434".into());

        let port = match get("PORT") {
            Some(v) => v
                .parse::<u16>()
                .map_err(|_| ConfigError::InvalidValue("PORT", v))?,
            None => 11435,
        };

        let api_key = get("API_KEY").filter(|s| !s.is_empty());

        let rate_limit_rps = match get("RATE_LIMIT_RPS") {
            Some(v) => v
                .parse::<u32>()
                .map_err(|_| ConfigError::InvalidValue("RATE_LIMIT_RPS", v))?,
            None => 50,
        };
        if rate_limit_rps == 0 {
            return Err(ConfigError::InvalidValue(
                "RATE_LIMIT_RPS",
                "0".to_string(),
            ));
        }

        let debug = parse_bool(get("DEBUG").as_deref());
        let log_file = get("LOG_FILE").filter(|s| !s.is_empty()).map(PathBuf::from);

        let tls_enabled = parse_bool(get("TLS_ENABLED").as_deref());
        let tls_cert_file = get("TLS_CERT_FILE").filter(|s| !s.is_empty()).map(PathBuf::from);
        let tls_key_file = get("TLS_KEY_FILE").filter(|s| !s.is_empty()).map(PathBuf::from);
        if tls_enabled {
            if tls_cert_file.is_none() {
                return Err(ConfigError::MissingTlsMaterial("TLS_CERT_FILE"));
            }
            if tls_key_file.is_none() {
                return Err(ConfigError::MissingTlsMaterial("TLS_KEY_FILE"));
            }
        }

        let upstream_timeout = match get("TIMEOUT") {
            Some(v) => parse_duration_secs(&v).map_err(|_| ConfigError::InvalidValue("TIMEOUT", v))?,
            None => Duration::from_secs(5 * 60),
        };
        if upstream_timeout > MAX_UPSTREAM_TIMEOUT {
            return Err(ConfigError::OutOfRange("TIMEOUT"));
        }

        let shutdown_timeout = match get("SHUTDOWN_TIMEOUT") {
            Some(v) => {
                parse_duration_secs(&v).map_err(|_| ConfigError::InvalidValue("SHUTDOWN_TIMEOUT", v))?
            }
            None => Duration::from_secs(30),
        };

        let mcp_enabled = parse_bool(get("MCP_ENABLED").as_deref());

        let max_tool_rounds = match get("MCP_MAX_TOOL_ROUNDS") {
            Some(v) => v
                .parse::<u32>()
                .map_err(|_| ConfigError::InvalidValue("MCP_MAX_TOOL_ROUNDS", v))?,
            None => 10,
        };
        let max_tool_calls_per_round = match get("MCP_MAX_TOOL_CALLS_PER_ROUND") {
            Some(v) => v
                .parse::<u32>()
                .map_err(|_| ConfigError::InvalidValue("MCP_MAX_TOOL_CALLS_PER_ROUND", v))?,
            None => 10,
        };
        let default_tool_timeout = match get("MCP_DEFAULT_TOOL_TIMEOUT") {
            Some(v) => parse_duration_secs(&v)
                .map_err(|_| ConfigError::InvalidValue("MCP_DEFAULT_TOOL_TIMEOUT", v))?,
            None => Duration::from_secs(30),
        };
        let max_tool_result_bytes = match get("MCP_MAX_TOOL_RESULT_SIZE") {
            Some(v) => v
                .parse::<usize>()
                .map_err(|_| ConfigError::InvalidValue("MCP_MAX_TOOL_RESULT_SIZE", v))?,
            None => 1_048_576,
        };
        let allow_tools = parse_csv(get("MCP_ALLOW_TOOLS").as_deref());
        let deny_tools = parse_csv(get("MCP_DENY_TOOLS").as_deref());

        let extensions_upsert_enabled =
            get("EXTENSIONS_UPSERT_ENABLED").map_or(true, |v| parse_bool(Some(&v)));

        let extensions_dir = get("EXTENSIONS_DIR")
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("extensions"));

        let mcp_servers_file = get("MCP_SERVERS_FILE").filter(|s| !s.is_empty()).map(PathBuf::from);

        let mcp_health_check_interval = match get("MCP_HEALTH_CHECK_INTERVAL") {
            Some(v) => parse_duration_secs(&v)
                .map_err(|_| ConfigError::InvalidValue("MCP_HEALTH_CHECK_INTERVAL", v))?,
            None => Duration::from_secs(30),
        };

        let cache_capacity = match get("CACHE_CAPACITY") {
            Some(v) => v
                .parse::<usize>()
                .map_err(|_| ConfigError::InvalidValue("CACHE_CAPACITY", v))?,
            None => 1000,
        };

        let cache_ttl = match get("CACHE_TTL") {
            Some(v) => parse_duration_secs(&v).map_err(|_| ConfigError::InvalidValue("CACHE_TTL", v))?,
            None => Duration::from_secs(60),
        };

        let access_log_dir = get("ACCESS_LOG_DIR")
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("var/access-log"));

        let access_log_retention_days = match get("ACCESS_LOG_RETENTION_DAYS") {
            Some(v) => v
                .parse::<u32>()
                .map_err(|_| ConfigError::InvalidValue("ACCESS_LOG_RETENTION_DAYS", v))?,
            None => 30,
        };

        Ok(Config {
            ollama_host,
            port,
            api_key,
            rate_limit_rps,
            debug,
            log_file,
            tls_enabled,
            tls_cert_file,
            tls_key_file,
            upstream_timeout,
            shutdown_timeout,
            mcp_enabled,
            mcp_guardrails: McpGuardrailConfig {
                max_tool_rounds,
                max_tool_calls_per_round,
                default_tool_timeout,
                max_tool_result_bytes,
                allow_tools,
                deny_tools,
            },
            mcp_servers_file,
            mcp_health_check_interval,
            extensions_upsert_enabled,
            extensions_dir,
            cache_capacity,
            cache_ttl,
            access_log_dir,
            access_log_retention_days,
        })
    }
}

fn parse_bool(value: Option<&str>) -> bool {
    matches!(
        value.map(|v| v.to_ascii_lowercase()),
        Some(ref v) if v == "1" || v == "true" || v == "yes" || v == "on"
    )
}

fn parse_csv(value: Option<&str>) -> Vec<String> {
    value
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn parse_duration_secs(value: &str) -> Result<Duration, ()> {
    let value = value.trim();
    if let Some(mins) = value.strip_suffix('m') {
        return mins.parse::<u64>().map(|m| Duration::from_secs(m * 60)).map_err(|_| ());
    }
    if let Some(secs) = value.strip_suffix('s') {
        return secs.parse::<u64>().map(Duration::from_secs).map_err(|_| ());
    }
    value.parse::<u64>().map(Duration::from_secs).map_err(|_| ())
}
