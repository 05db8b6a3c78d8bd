//! Configuration module for the ordering backend.
//!
//! All configuration is loaded from environment variables with sensible defaults.

use std::env;
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Output format of the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "pretty" => Some(LogFormat::Text),
            "json" => Some(LogFormat::Json),
            _ => None,
        }
    }
}

/// Error raised when an environment variable holds an unusable value.
#[derive(Debug)]
pub struct ConfigError {
    pub variable: &'static str,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {}: {}", self.variable, self.message)
    }
}

impl std::error::Error for ConfigError {}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Pre-shared key for API authentication (required in production)
    pub api_psk: Option<String>,
    /// Path to SQLite database file
    pub db_path: PathBuf,
    /// Path to Tantivy product index directory
    pub index_path: PathBuf,
    /// Address to bind the server to
    pub bind_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    pub log_format: LogFormat,
    /// Company DNS prefix used when the request host carries no subdomain
    pub default_company: Option<String>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let api_psk = env::var("ORDERING_API_PSK").ok().filter(|s| !s.is_empty());

        let db_path = env::var("ORDERING_DB_PATH")
            .unwrap_or_else(|_| "./data/ordering.sqlite".to_string())
            .into();

        let index_path = env::var("ORDERING_INDEX_PATH")
            .unwrap_or_else(|_| "./data/index".to_string())
            .into();

        let bind_addr_raw =
            env::var("ORDERING_BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string());
        let bind_addr = bind_addr_raw.parse().map_err(|e| ConfigError {
            variable: "ORDERING_BIND_ADDR",
            message: format!("{:?}: {}", bind_addr_raw, e),
        })?;

        let log_level = env::var("ORDERING_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let log_format = match env::var("ORDERING_LOG_FORMAT") {
            Ok(raw) => LogFormat::parse(&raw).ok_or_else(|| ConfigError {
                variable: "ORDERING_LOG_FORMAT",
                message: format!("expected text or json, got {:?}", raw),
            })?,
            Err(_) => LogFormat::Text,
        };

        let default_company = env::var("ORDERING_DEFAULT_COMPANY")
            .ok()
            .map(|s| s.trim().to_ascii_lowercase())
            .filter(|s| !s.is_empty());

        Ok(Self {
            api_psk,
            db_path,
            index_path,
            bind_addr,
            log_level,
            log_format,
            default_company,
        })
    }
}
