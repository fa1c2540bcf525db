use std::time::Duration;

use labelcheck_client::api::build_api_base;

/// Runtime configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    /// API root of the analysis service.
    pub api_base: String,
    /// Optional stall watchdog; disabled when unset.
    pub stall_timeout: Option<Duration>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} must be a whole number of seconds, got '{value}'")]
    InvalidSeconds { name: &'static str, value: String },
}

impl AppConfig {
    /// Load configuration from the process environment.
    ///
    /// | Env Var                         | Default                          |
    /// |---------------------------------|----------------------------------|
    /// | `LABELCHECK_API_BASE`           | build-time value, else `http://localhost:8000/api` |
    /// | `LABELCHECK_STALL_TIMEOUT_SECS` | unset (watchdog disabled)        |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an explicit variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let api_base = lookup("LABELCHECK_API_BASE")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| build_api_base().to_string());

        let stall_timeout = match lookup("LABELCHECK_STALL_TIMEOUT_SECS").filter(|v| !v.trim().is_empty()) {
            None => None,
            Some(value) => {
                let secs: u64 = value.trim().parse().map_err(|_| ConfigError::InvalidSeconds {
                    name: "LABELCHECK_STALL_TIMEOUT_SECS",
                    value: value.clone(),
                })?;
                (secs > 0).then(|| Duration::from_secs(secs))
            }
        };

        Ok(Self {
            api_base,
            stall_timeout,
        })
    }
}
