use std::env;

use thiserror::Error;

use crate::cefr::CefrFallback;
use crate::scoring::{AveragingPolicy, ScoringPolicy};

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: Option<String>,
    pub max_connections: u32,
    pub log_level: String,
    pub scoring: ScoringPolicy,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("EPGF_AVERAGING must be 'zero-exclusive' or 'fixed-denominator', got '{0}'")]
    InvalidAveraging(String),
    #[error("EPGF_CEFR_FALLBACK must be 'beginner' or 'unknown', got '{0}'")]
    InvalidCefrFallback(String),
    #[error("EPGF_DB_MAX_CONNECTIONS must be a positive integer, got '{0}'")]
    InvalidMaxConnections(String),
    #[error("DATABASE_URL must be set to a production Postgres instance")]
    MissingDatabaseUrl,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let averaging = match lookup("EPGF_AVERAGING") {
            Some(value) => parse_averaging(&value)?,
            None => AveragingPolicy::default(),
        };
        let cefr_fallback = match lookup("EPGF_CEFR_FALLBACK") {
            Some(value) => parse_cefr_fallback(&value)?,
            None => CefrFallback::default(),
        };
        let max_connections = match lookup("EPGF_DB_MAX_CONNECTIONS") {
            Some(value) => value
                .trim()
                .parse::<u32>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or(ConfigError::InvalidMaxConnections(value))?,
            None => 5,
        };

        Ok(Self {
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            max_connections,
            log_level: lookup("APP_LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            scoring: ScoringPolicy {
                averaging,
                cefr_fallback,
            },
        })
    }

    pub fn require_database_url(&self) -> Result<&str, ConfigError> {
        self.database_url
            .as_deref()
            .ok_or(ConfigError::MissingDatabaseUrl)
    }
}

fn parse_averaging(value: &str) -> Result<AveragingPolicy, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "zero-exclusive" | "zero_exclusive" => Ok(AveragingPolicy::ZeroExclusive),
        "fixed-denominator" | "fixed_denominator" => Ok(AveragingPolicy::FixedDenominator),
        _ => Err(ConfigError::InvalidAveraging(value.to_string())),
    }
}

fn parse_cefr_fallback(value: &str) -> Result<CefrFallback, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "beginner" | "a1" => Ok(CefrFallback::Beginner),
        "unknown" => Ok(CefrFallback::Unknown),
        _ => Err(ConfigError::InvalidCefrFallback(value.to_string())),
    }
}
