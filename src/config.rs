//! Application configuration loaded from environment variables.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};

use crate::services::{BasicAuth, TriggerableOptions};

/// Development default values - NEVER use in production.
pub mod defaults {
    pub const DEV_HOST: &str = "127.0.0.1";
    pub const DEV_PORT: u16 = 8080;
    pub const DEV_SERVER_URL: &str = "http://localhost:8180";
    pub const DEV_BUILDBOT_URL: &str = "http://localhost:8010";
    pub const DEV_WORKER_NAME: &str = "sync-worker";
    pub const DEV_WORKER_PASSWORD: &str = "dev-worker-password-do-not-use-in-production";
    pub const DEV_SYNC_CONFIG: &str = "sync-config.json";
    pub const DEV_SECONDS_TO_SLEEP: u64 = 120;
    pub const DEV_REQUEST_TIMEOUT_SECS: u64 = 60;
}

/// Runtime environment, selected by `RUST_ENV`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
        }
    }

    pub fn is_development(self) -> bool {
        self == Self::Development
    }
}

impl std::str::FromStr for Environment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            _ => Err(ConfigError::InvalidValue(
                "RUST_ENV must be 'development' or 'production'",
            )),
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Runtime environment
    pub environment: Environment,
    /// Status API host address
    pub host: String,
    /// Status API port
    pub port: u16,
    /// Base URL of the performance dashboard
    pub server_url: String,
    /// Basic auth user for the dashboard (optional)
    pub server_user: Option<String>,
    /// Basic auth password for the dashboard
    pub server_password: Option<SecretString>,
    /// Base URL of the buildbot master
    pub buildbot_url: String,
    /// Worker name reported to the dashboard
    pub worker_name: String,
    /// Worker password reported to the dashboard
    pub worker_password: SecretString,
    /// Path to the sync configuration JSON
    pub sync_config: PathBuf,
    /// Seconds to wait between sync cycles (default: 120)
    pub seconds_to_sleep: u64,
    /// HTTP request timeout in seconds (default: 60)
    pub request_timeout_secs: u64,
    /// Roots older than this many days are rebuilt instead of reused (optional)
    pub max_root_reuse_age_days: Option<u64>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In development mode (RUST_ENV=development):
    /// - All variables have local defaults
    /// - Only RUST_ENV is required
    ///
    /// In production mode (RUST_ENV=production):
    /// - Server, buildbot and worker credentials are required
    /// - The syncer will NOT start if using development defaults
    ///
    /// Environment variables:
    /// - `RUST_ENV`: Environment (development/production) - REQUIRED
    /// - `PSYNC_HOST`: Status API host (default: 127.0.0.1)
    /// - `PSYNC_PORT`: Status API port (default: 8080)
    /// - `PSYNC_SERVER_URL`: Dashboard base URL
    /// - `PSYNC_SERVER_USER` / `PSYNC_SERVER_PASSWORD`: Dashboard basic auth (optional)
    /// - `PSYNC_BUILDBOT_URL`: Buildbot base URL
    /// - `PSYNC_WORKER_NAME` / `PSYNC_WORKER_PASSWORD`: Credentials for dashboard writes
    /// - `PSYNC_SYNC_CONFIG`: Path to the sync configuration JSON
    /// - `PSYNC_SECONDS_TO_SLEEP`: Seconds between cycles (default: 120)
    /// - `PSYNC_REQUEST_TIMEOUT_SECS`: HTTP request timeout (default: 60)
    /// - `PSYNC_MAX_ROOT_REUSE_AGE_DAYS`: Max age of reusable roots (default: unlimited)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|name| env::var(name).ok())
    }

    /// Load configuration through `var`, which returns the value of a variable if set.
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let environment: Environment = var("RUST_ENV")
            .ok_or(ConfigError::MissingEnvVar("RUST_ENV"))?
            .parse()?;

        let host = var("PSYNC_HOST").unwrap_or_else(|| defaults::DEV_HOST.to_string());

        let port = var("PSYNC_PORT")
            .unwrap_or_else(|| defaults::DEV_PORT.to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidValue("PSYNC_PORT must be a valid port number"))?;

        let server_url =
            var("PSYNC_SERVER_URL").unwrap_or_else(|| defaults::DEV_SERVER_URL.to_string());

        let server_user = var("PSYNC_SERVER_USER");
        let server_password = var("PSYNC_SERVER_PASSWORD").map(SecretString::from);
        if server_user.is_some() && server_password.is_none() {
            return Err(ConfigError::InvalidValue(
                "PSYNC_SERVER_PASSWORD must be set when PSYNC_SERVER_USER is set",
            ));
        }

        let buildbot_url =
            var("PSYNC_BUILDBOT_URL").unwrap_or_else(|| defaults::DEV_BUILDBOT_URL.to_string());

        let worker_name =
            var("PSYNC_WORKER_NAME").unwrap_or_else(|| defaults::DEV_WORKER_NAME.to_string());

        let worker_password = SecretString::from(
            var("PSYNC_WORKER_PASSWORD")
                .unwrap_or_else(|| defaults::DEV_WORKER_PASSWORD.to_string()),
        );

        let sync_config = PathBuf::from(
            var("PSYNC_SYNC_CONFIG").unwrap_or_else(|| defaults::DEV_SYNC_CONFIG.to_string()),
        );

        let seconds_to_sleep = var("PSYNC_SECONDS_TO_SLEEP")
            .unwrap_or_else(|| defaults::DEV_SECONDS_TO_SLEEP.to_string())
            .parse::<u64>()
            .ok()
            .filter(|secs| *secs > 0)
            .ok_or(ConfigError::InvalidValue(
                "PSYNC_SECONDS_TO_SLEEP must be a positive number",
            ))?;

        let request_timeout_secs = var("PSYNC_REQUEST_TIMEOUT_SECS")
            .unwrap_or_else(|| defaults::DEV_REQUEST_TIMEOUT_SECS.to_string())
            .parse::<u64>()
            .map_err(|_| {
                ConfigError::InvalidValue("PSYNC_REQUEST_TIMEOUT_SECS must be a valid number")
            })?;

        let max_root_reuse_age_days = var("PSYNC_MAX_ROOT_REUSE_AGE_DAYS")
            .map(|days| {
                days.parse::<u64>()
                    .ok()
                    .filter(|days| root_reuse_age(*days).is_some())
                    .ok_or(ConfigError::InvalidValue(
                        "PSYNC_MAX_ROOT_REUSE_AGE_DAYS must be a number of days within chrono's range",
                    ))
            })
            .transpose()?;

        let config = Config {
            environment,
            host,
            port,
            server_url,
            server_user,
            server_password,
            buildbot_url,
            worker_name,
            worker_password,
            sync_config,
            seconds_to_sleep,
            request_timeout_secs,
            max_root_reuse_age_days,
        };

        if !environment.is_development() {
            config.validate_production()?;
        }
        Ok(config)
    }

    /// Production must not run with any development default.
    fn validate_production(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if self.server_url == defaults::DEV_SERVER_URL {
            errors.push(format!(
                "PSYNC_SERVER_URL is using development default '{}'. Set the dashboard URL.",
                defaults::DEV_SERVER_URL
            ));
        }

        if self.buildbot_url == defaults::DEV_BUILDBOT_URL {
            errors.push(format!(
                "PSYNC_BUILDBOT_URL is using development default '{}'. Set the buildbot URL.",
                defaults::DEV_BUILDBOT_URL
            ));
        }

        if self.worker_password.expose_secret() == defaults::DEV_WORKER_PASSWORD {
            errors.push(
                "PSYNC_WORKER_PASSWORD is using development default. Set the worker's password."
                    .to_string(),
            );
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::ProductionValidation(errors))
        }
    }

    /// `host:port` of the status API.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn is_development(&self) -> bool {
        self.environment.is_development()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Basic auth credentials for the dashboard, if configured.
    pub fn server_auth(&self) -> Option<BasicAuth> {
        match (&self.server_user, &self.server_password) {
            (Some(username), Some(password)) => Some(BasicAuth {
                username: username.clone(),
                password: password.clone(),
            }),
            _ => None,
        }
    }

    pub fn triggerable_options(&self) -> TriggerableOptions {
        TriggerableOptions {
            worker_name: self.worker_name.clone(),
            worker_password: self.worker_password.clone(),
            max_root_reuse_age: self.max_root_reuse_age_days.and_then(root_reuse_age),
        }
    }
}

fn root_reuse_age(days: u64) -> Option<chrono::Duration> {
    i64::try_from(days).ok().and_then(chrono::Duration::try_days)
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(&'static str),

    #[error("Production configuration validation failed:\n{}", .0.iter().map(|e| format!("  - {}", e)).collect::<Vec<_>>().join("\n"))]
    ProductionValidation(Vec<String>),
}
