use anyhow::Result;
use std::env;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub name: String,
    pub env: String,
    pub debug: bool,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Ok(AppConfig {
            name: env::var("APP_NAME").unwrap_or_else(|_| "Herald".to_string()),
            env: env::var("APP_ENV").unwrap_or_else(|_| "local".to_string()),
            debug: env::var("APP_DEBUG")
                .unwrap_or_else(|_| "true".to_string())
                .parse()
                .unwrap_or(true),
        })
    }

    pub fn is_production(&self) -> bool {
        self.env == "production"
    }

    pub fn is_testing(&self) -> bool {
        self.env == "testing"
    }
}
