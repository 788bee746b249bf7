//! Bridge configuration.
//!
//! Configuration is loaded from environment variables with sensible
//! defaults. Durations accept Go-style strings such as `1h`, `10s` or
//! `1h30m` so deployments carried over from earlier bridge versions keep
//! working unchanged.

use std::collections::HashMap;
use std::env;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Default port for the main HTTP server.
pub const DEFAULT_PORT: u16 = 8080;

/// Default base URL of the authorising API.
pub const DEFAULT_API_URL: &str = "https://api.basemachina.com";

/// Default interval between successful public-key refreshes.
pub const DEFAULT_FETCH_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Default per-attempt timeout for a public-key fetch.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Accepted log levels, in the order they are documented.
pub const LOG_LEVELS: [&str; 4] = ["DEBUG", "INFO", "WARN", "ERROR"];

/// Bridge configuration, immutable after startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port the main HTTP server listens on (`PORT`, default 8080).
    pub port: u16,

    /// Log level, one of DEBUG/INFO/WARN/ERROR (`LOG_LEVEL`, default INFO).
    pub log_level: String,

    /// Base URL of the authorising API from which the public-key endpoint
    /// is derived (`BASEMACHINA_API_URL`).
    pub api_url: Url,

    /// Interval between successful public-key refreshes (`FETCH_INTERVAL`,
    /// default 1h).
    pub fetch_interval: Duration,

    /// Per-attempt timeout for a public-key fetch (`FETCH_TIMEOUT`,
    /// default 10s).
    pub fetch_timeout: Duration,

    /// Expected tenant ID (`TENANT_ID`). When non-empty, tokens whose
    /// tenant claim differs are rejected.
    pub tenant_id: String,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid PORT {value:?}: {message}")]
    InvalidPort { value: String, message: String },

    #[error("invalid LOG_LEVEL {0:?}: must be one of DEBUG, INFO, WARN, ERROR")]
    InvalidLogLevel(String),

    #[error("invalid BASEMACHINA_API_URL {value:?}: {message}")]
    InvalidApiUrl { value: String, message: String },

    #[error("invalid {name} {value:?}: {message}")]
    InvalidDuration {
        name: &'static str,
        value: String,
        message: String,
    },
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a map (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let port = match vars.get("PORT") {
            Some(value) => value.parse().map_err(|e| ConfigError::InvalidPort {
                value: value.clone(),
                message: format!("{}", e),
            })?,
            None => DEFAULT_PORT,
        };

        let log_level = vars
            .get("LOG_LEVEL")
            .cloned()
            .unwrap_or_else(|| "INFO".to_string())
            .to_uppercase();
        if !LOG_LEVELS.contains(&log_level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(log_level));
        }

        let api_url_raw = vars
            .get("BASEMACHINA_API_URL")
            .cloned()
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let api_url = Url::parse(&api_url_raw).map_err(|e| ConfigError::InvalidApiUrl {
            value: api_url_raw.clone(),
            message: format!("{}", e),
        })?;

        let fetch_interval = parse_duration_var(vars, "FETCH_INTERVAL", DEFAULT_FETCH_INTERVAL)?;
        let fetch_timeout = parse_duration_var(vars, "FETCH_TIMEOUT", DEFAULT_FETCH_TIMEOUT)?;

        let tenant_id = vars.get("TENANT_ID").cloned().unwrap_or_default();

        Ok(Config {
            port,
            log_level,
            api_url,
            fetch_interval,
            fetch_timeout,
            tenant_id,
        })
    }
}

fn parse_duration_var(
    vars: &HashMap<String, String>,
    name: &'static str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    match vars.get(name) {
        Some(value) => parse_duration(value).map_err(|message| ConfigError::InvalidDuration {
            name,
            value: value.clone(),
            message,
        }),
        None => Ok(default),
    }
}

/// Parses a Go-style duration string: one or more `<number><unit>` segments
/// where unit is one of `ms`, `s`, `m`, `h`. Numbers may carry a decimal
/// fraction (`1.5h`).
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let s = input.trim();
    if s.is_empty() {
        return Err("empty duration".to_string());
    }

    let mut total = Duration::ZERO;
    let mut rest = s;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .ok_or_else(|| format!("missing unit in duration {:?}", input))?;
        if number_len == 0 {
            return Err(format!("missing number in duration {:?}", input));
        }
        let (number, after_number) = rest.split_at(number_len);
        let value: f64 = number
            .parse()
            .map_err(|e| format!("bad number {:?}: {}", number, e))?;

        let unit_len = after_number
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(after_number.len());
        let (unit, after_unit) = after_number.split_at(unit_len);
        let unit_secs = match unit {
            "ms" => 0.001,
            "s" => 1.0,
            "m" => 60.0,
            "h" => 3600.0,
            _ => return Err(format!("unknown unit {:?} in duration {:?}", unit, input)),
        };

        total += Duration::from_secs_f64(value * unit_secs);
        rest = after_unit;
    }
    Ok(total)
}
