use anyhow::{Context, Result};
use std::env;
use std::time::Duration;

const DEFAULT_MODEL: &str = "meta-llama/llama-4-scout:free";
const DEFAULT_MONTHLY_LIMIT: i64 = 30;
const DEFAULT_ATTEMPT_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone)]
pub struct Config {
    pub openrouter_api_key: String,
    pub openrouter_model: String,
    pub database_url: String,
    pub image_dir: String,
    pub monthly_limit: i64,
    pub attempt_timeout: Duration,
    pub server_addr: String,
}

impl Config {
    /// Read configuration from the environment (after `.env` is loaded).
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .with_context(|| format!("{} must be set in .env file", key))
        };

        let monthly_limit = match lookup("MONTHLY_ESTIMATE_LIMIT") {
            Some(v) => v
                .trim()
                .parse::<i64>()
                .with_context(|| format!("MONTHLY_ESTIMATE_LIMIT is not a number: {}", v))?,
            None => DEFAULT_MONTHLY_LIMIT,
        };

        let timeout_secs = match lookup("ESTIMATE_ATTEMPT_TIMEOUT_SECS") {
            Some(v) => v
                .trim()
                .parse::<u64>()
                .with_context(|| format!("ESTIMATE_ATTEMPT_TIMEOUT_SECS is not a number: {}", v))?,
            None => DEFAULT_ATTEMPT_TIMEOUT_SECS,
        };

        Ok(Config {
            openrouter_api_key: required("OPENROUTER_API_KEY")?,
            openrouter_model: lookup("OPENROUTER_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            database_url: required("DATABASE_URL")?,
            image_dir: lookup("IMAGE_DIR").unwrap_or_else(|| "data/images".to_string()),
            monthly_limit,
            attempt_timeout: Duration::from_secs(timeout_secs),
            server_addr: lookup("SERVER_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
        })
    }
}
