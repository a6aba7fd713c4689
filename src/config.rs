//! Configuration management for ensemble.
//!
//! Configuration can be set via environment variables:
//! - `HOST` - Optional. Server host. Defaults to `127.0.0.1`.
//! - `PORT` - Optional. Server port. Defaults to `3000`.
//! - `ENSEMBLE_DB_PATH` - Optional. SQLite database path. Defaults to
//!   `./data/ensemble.db`.
//! - `WORKSPACE_ROOT` - Optional. Root directory for project workspaces.
//!   Defaults to `./workspaces`.
//! - `DEFAULT_MAX_ITERATIONS` - Optional. Iteration cap for sessions that
//!   do not pick one. Defaults to `5`.
//! - `RATE_REQUESTS_PER_MINUTE` / `RATE_REQUESTS_PER_HOUR` /
//!   `RATE_HOURLY_COST_CENTS` - Optional guard cap overrides.
//! - `<PROVIDER>_API_KEY` (e.g. `OPENAI_API_KEY`) - Read by the env-backed
//!   credential resolver, not by this struct.

use std::path::PathBuf;

use thiserror::Error;

use crate::guard::GuardLimits;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Server and orchestration configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// SQLite database path
    pub db_path: PathBuf,

    /// Root directory for project workspaces
    pub workspace_root: PathBuf,

    /// Iteration cap applied when a session request does not set one
    pub default_max_iterations: u32,

    /// Rate/budget guard caps
    pub guard_limits: GuardLimits,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = GuardLimits::default();
        Ok(Self {
            host: std::env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: parse_env("PORT", 3000)?,
            db_path: std::env::var("ENSEMBLE_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./data/ensemble.db")),
            workspace_root: std::env::var("WORKSPACE_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./workspaces")),
            default_max_iterations: parse_env("DEFAULT_MAX_ITERATIONS", 5)?,
            guard_limits: GuardLimits {
                requests_per_minute: parse_env(
                    "RATE_REQUESTS_PER_MINUTE",
                    defaults.requests_per_minute,
                )?,
                requests_per_hour: parse_env("RATE_REQUESTS_PER_HOUR", defaults.requests_per_hour)?,
                hourly_cost_cents: parse_env("RATE_HOURLY_COST_CENTS", defaults.hourly_cost_cents)?,
            },
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            db_path: PathBuf::from("./data/ensemble.db"),
            workspace_root: PathBuf::from("./workspaces"),
            default_max_iterations: 5,
            guard_limits: GuardLimits::default(),
        }
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> Result<T, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidValue(name.to_string(), raw)),
        Err(_) => Ok(default),
    }
}
