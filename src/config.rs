use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    pub api: ApiConfig,
    pub refresh: RefreshConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Base URL every request path is appended to, e.g. `http://localhost:8000/api`
    pub base_url: String,
    pub request_timeout_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct RefreshConfig {
    /// Proactive refresh period. Kept below the access-token lifetime.
    pub interval_seconds: u64,
    /// Wait before retry N is `backoff_seconds[min(N - 1, last)]`
    pub backoff_seconds: Vec<u64>,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Directory holding the durable token file
    pub data_dir: PathBuf,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/api".to_string(),
            request_timeout_seconds: 15,
        }
    }
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 13 * 60,
            backoff_seconds: vec![30, 60, 120, 300],
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
        }
    }
}

impl ApiConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

impl RefreshConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    pub fn backoff(&self) -> Vec<Duration> {
        self.backoff_seconds
            .iter()
            .copied()
            .map(Duration::from_secs)
            .collect()
    }
}

impl SessionConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let defaults = SessionConfig::default();

        let base_url = std::env::var("API_URL")
            .map(|url| url.trim().trim_end_matches('/').to_string())
            .unwrap_or(defaults.api.base_url);

        let request_timeout_seconds = parse_env("REQUEST_TIMEOUT_SECONDS")?
            .unwrap_or(defaults.api.request_timeout_seconds);

        let interval_seconds =
            parse_env("REFRESH_INTERVAL_SECONDS")?.unwrap_or(defaults.refresh.interval_seconds);

        let backoff_seconds = match std::env::var("REFRESH_BACKOFF_SECONDS") {
            Ok(raw) => parse_backoff(&raw)?,
            Err(_) => defaults.refresh.backoff_seconds,
        };

        let data_dir = std::env::var("DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.storage.data_dir);

        let config = SessionConfig {
            api: ApiConfig {
                base_url,
                request_timeout_seconds,
            },
            refresh: RefreshConfig {
                interval_seconds,
                backoff_seconds,
            },
            storage: StorageConfig { data_dir },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = &self.api.base_url;
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::ValidationError(format!(
                "API_URL must be an http(s) URL, got '{url}'"
            )));
        }

        if self.api.request_timeout_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "REQUEST_TIMEOUT_SECONDS must be greater than zero".to_string(),
            ));
        }

        if self.refresh.interval_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "REFRESH_INTERVAL_SECONDS must be greater than zero".to_string(),
            ));
        }

        let backoff = &self.refresh.backoff_seconds;
        if backoff.is_empty() || backoff.contains(&0) {
            return Err(ConfigError::ValidationError(
                "REFRESH_BACKOFF_SECONDS must list at least one non-zero delay".to_string(),
            ));
        }
        if backoff.windows(2).any(|pair| pair[0] > pair[1]) {
            return Err(ConfigError::ValidationError(
                "REFRESH_BACKOFF_SECONDS must be non-decreasing".to_string(),
            ));
        }

        if self.refresh.interval_seconds >= 15 * 60 {
            tracing::warn!(
                interval_seconds = self.refresh.interval_seconds,
                "Refresh interval is not shorter than the usual 15 minute access-token lifetime; \
                 requests may hit the 401 refresh path"
            );
        }

        Ok(())
    }
}

fn parse_env(name: &str) -> Result<Option<u64>, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse().map(Some).map_err(|_| {
            ConfigError::ValidationError(format!("{name} must be a whole number of seconds"))
        }),
        Err(_) => Ok(None),
    }
}

fn parse_backoff(raw: &str) -> Result<Vec<u64>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse().map_err(|_| {
                ConfigError::ValidationError(format!(
                    "REFRESH_BACKOFF_SECONDS entry '{s}' is not a whole number"
                ))
            })
        })
        .collect()
}
