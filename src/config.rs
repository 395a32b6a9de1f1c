use thiserror::Error;

use crate::foundry::{validate_base_url, FoundryError, GenerationOptions};

/// Application-level constants
pub const APP_NAME: &str = "finaid-desk";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const DEFAULT_SERVICE_URL: &str = "http://localhost:5273";
/// The local service accepts any key; this is the value its SDKs send.
pub const DEFAULT_API_KEY: &str = "OPENAI_API_KEY";
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Log filter used when `RUST_LOG` is unset.
pub fn default_log_filter() -> &'static str {
    "finaid_desk=info,finaid_desk_lib=info,warn"
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("{var} must be {expected}, got '{value}'")]
    InvalidValue {
        var: &'static str,
        value: String,
        expected: &'static str,
    },

    #[error("{var}: {source}")]
    InvalidServiceUrl {
        var: &'static str,
        #[source]
        source: FoundryError,
    },
}

/// Runtime settings read from `FINAID_*` environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub service_url: String,
    pub api_key: String,
    /// Model id or alias used when none is given on the command line.
    pub default_model: Option<String>,
    pub connect_timeout_secs: u64,
    pub temperature: Option<f32>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            service_url: DEFAULT_SERVICE_URL.to_string(),
            api_key: DEFAULT_API_KEY.to_string(),
            default_model: None,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            temperature: None,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from an arbitrary variable lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();

        let service_url = get("FINAID_SERVICE_URL").unwrap_or(defaults.service_url);
        validate_base_url(&service_url).map_err(|source| ConfigError::InvalidServiceUrl {
            var: "FINAID_SERVICE_URL",
            source,
        })?;

        let connect_timeout_secs = match get("FINAID_CONNECT_TIMEOUT_SECS") {
            Some(raw) => raw
                .parse::<u64>()
                .ok()
                .filter(|secs| *secs > 0)
                .ok_or(ConfigError::InvalidValue {
                    var: "FINAID_CONNECT_TIMEOUT_SECS",
                    value: raw,
                    expected: "a positive number of seconds",
                })?,
            None => defaults.connect_timeout_secs,
        };

        let temperature = match get("FINAID_TEMPERATURE") {
            Some(raw) => Some(parse_temperature(&raw).ok_or(ConfigError::InvalidValue {
                var: "FINAID_TEMPERATURE",
                value: raw,
                expected: "a number between 0 and 2",
            })?),
            None => None,
        };

        Ok(Self {
            service_url,
            api_key: get("FINAID_API_KEY").unwrap_or(defaults.api_key),
            default_model: get("FINAID_MODEL"),
            connect_timeout_secs,
            temperature,
        })
    }

    pub fn generation_options(&self) -> GenerationOptions {
        GenerationOptions {
            temperature: self.temperature,
            max_tokens: None,
        }
    }
}

fn parse_temperature(raw: &str) -> Option<f32> {
    raw.parse::<f32>()
        .ok()
        .filter(|t| (0.0..=2.0).contains(t))
}
