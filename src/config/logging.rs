use anyhow::Result;
use std::env;

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
}

impl LoggingConfig {
    pub fn from_env() -> Result<Self> {
        Ok(LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }

    /// Default tracing filter when RUST_LOG is unset.
    pub fn env_filter(&self) -> String {
        format!("herald={}", self.level)
    }
}
