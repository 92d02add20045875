//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::Level;

pub const DEFAULT_CAPTCHA_VERIFY_URL: &str = "https://www.google.com/recaptcha/api/siteverify";

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    /// Without a database the service keeps everything in memory.
    pub database_url: Option<String>,
    /// JSON array of form definitions loaded into the in-memory repository.
    pub forms_file: Option<PathBuf>,
    pub log_level: Level,
    pub cors_origin: String,
    pub captcha_secret: Option<String>,
    pub captcha_verify_url: String,
    pub captcha_timeout: Duration,
    pub completion_webhook_url: Option<String>,
    pub submission_ttl: Option<chrono::Duration>,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // --- Server and Database Settings ---
        let bind_address_str =
            lookup("BIND_ADDRESS").unwrap_or_else(|| "0.0.0.0:3000".to_string());
        let bind_address = bind_address_str.parse::<SocketAddr>().map_err(|e| {
            ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string())
        })?;

        let database_url = lookup("DATABASE_URL").filter(|url| !url.trim().is_empty());
        let forms_file = lookup("FORMS_FILE")
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from);

        let log_level_str = lookup("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let cors_origin =
            lookup("CORS_ORIGIN").unwrap_or_else(|| "http://localhost:3000".to_string());

        // --- Spam Protection ---
        let captcha_secret = lookup("CAPTCHA_SECRET").filter(|s| !s.is_empty());
        let captcha_verify_url = lookup("CAPTCHA_VERIFY_URL")
            .unwrap_or_else(|| DEFAULT_CAPTCHA_VERIFY_URL.to_string());
        let captcha_timeout_ms = parse_number::<u64>(&lookup, "CAPTCHA_TIMEOUT_MS")?.unwrap_or(5000);

        // --- Completion and Housekeeping ---
        let completion_webhook_url = lookup("COMPLETION_WEBHOOK_URL").filter(|s| !s.is_empty());
        let submission_ttl = parse_number::<i64>(&lookup, "SUBMISSION_TTL_HOURS")?
            .map(|hours| {
                if hours > 0 {
                    Ok(chrono::Duration::hours(hours))
                } else {
                    Err(ConfigError::InvalidValue(
                        "SUBMISSION_TTL_HOURS".to_string(),
                        "must be a positive number of hours".to_string(),
                    ))
                }
            })
            .transpose()?;

        Ok(Self {
            bind_address,
            database_url,
            forms_file,
            log_level,
            cors_origin,
            captcha_secret,
            captcha_verify_url,
            captcha_timeout: Duration::from_millis(captcha_timeout_ms),
            completion_webhook_url,
            submission_ttl,
        })
    }
}

fn parse_number<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|e| ConfigError::InvalidValue(key.to_string(), e.to_string()))
        })
        .transpose()
}
