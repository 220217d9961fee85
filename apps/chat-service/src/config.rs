use std::env;
use std::net::SocketAddr;
use std::num::ParseIntError;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8788";
const DEFAULT_LOG_FILTER: &str = "info";
const DEFAULT_LOG_JSON: bool = false;
const DEFAULT_FLUSH_DEBOUNCE_MS: u64 = 200;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub log_filter: String,
    pub log_json: bool,
    /// Unset keeps the dataset in process memory only.
    pub store_path: Option<PathBuf>,
    pub flush_debounce: Duration,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid CHAT_STORE_BIND_ADDR value '{value}': {source}")]
    InvalidBindAddr {
        value: String,
        source: std::net::AddrParseError,
    },
    #[error("invalid CHAT_STORE_FLUSH_DEBOUNCE_MS value '{value}': {source}")]
    InvalidFlushDebounce { value: String, source: ParseIntError },
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from an arbitrary variable source; blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let read = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let bind_addr_raw =
            read("CHAT_STORE_BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        let bind_addr = parse_bind_addr(&bind_addr_raw)?;

        let log_filter =
            read("CHAT_STORE_LOG_FILTER").unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());

        let log_json = read("CHAT_STORE_LOG_JSON")
            .map(|value| matches!(value.trim().to_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(DEFAULT_LOG_JSON);

        let store_path = read("CHAT_STORE_PATH").map(|value| PathBuf::from(value.trim()));

        let flush_debounce = match read("CHAT_STORE_FLUSH_DEBOUNCE_MS") {
            Some(value) => Duration::from_millis(value.trim().parse::<u64>().map_err(
                |source| ConfigError::InvalidFlushDebounce {
                    value: value.clone(),
                    source,
                },
            )?),
            None => Duration::from_millis(DEFAULT_FLUSH_DEBOUNCE_MS),
        };

        Ok(Self {
            bind_addr,
            log_filter,
            log_json,
            store_path,
            flush_debounce,
        })
    }
}

pub fn parse_bind_addr(raw: &str) -> Result<SocketAddr, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|source| ConfigError::InvalidBindAddr {
            value: raw.to_string(),
            source,
        })
}

#[cfg(test)]
impl Config {
    #[must_use]
    pub fn for_tests() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            log_filter: "debug".to_string(),
            log_json: false,
            store_path: None,
            flush_debounce: Duration::from_millis(10),
        }
    }
}
