use std::time::Duration;

use anyhow::{Context, Result};

/// Application configuration loaded from environment variables.
/// Startup fails if required variables are missing.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub anthropic_api_key: String,
    pub port: u16,
    pub rust_log: String,
    pub match_batch_size: usize,
    pub match_batch_delay: Duration,
    pub match_score_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Ok(Config {
            database_url: require_env("DATABASE_URL")?,
            anthropic_api_key: require_env("ANTHROPIC_API_KEY")?,
            port: env_or("PORT", "8080")
                .parse::<u16>()
                .context("PORT must be a valid port number")?,
            rust_log: env_or("RUST_LOG", "info"),
            match_batch_size: env_or("MATCH_BATCH_SIZE", "10")
                .parse::<usize>()
                .context("MATCH_BATCH_SIZE must be a positive integer")?,
            match_batch_delay: Duration::from_millis(
                env_or("MATCH_BATCH_DELAY_MS", "1000")
                    .parse::<u64>()
                    .context("MATCH_BATCH_DELAY_MS must be an integer number of milliseconds")?,
            ),
            match_score_timeout: Duration::from_millis(
                env_or("MATCH_SCORE_TIMEOUT_MS", "30000")
                    .parse::<u64>()
                    .context("MATCH_SCORE_TIMEOUT_MS must be an integer number of milliseconds")?,
            ),
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}
