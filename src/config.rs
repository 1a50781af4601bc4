use serde::{Deserialize, Serialize};
use std::env;

use crate::error::CoreError;

/// Deployment environment. Prod rejects caller-supplied audit timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Test,
    Prod,
}

impl Environment {
    pub fn parse(value: &str) -> Result<Self, CoreError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "dev" | "development" => Ok(Self::Dev),
            "test" => Ok(Self::Test),
            "prod" | "production" => Ok(Self::Prod),
            other => Err(CoreError::ConfigError(format!(
                "Unknown environment: {}",
                other
            ))),
        }
    }

    pub fn is_prod(self) -> bool {
        self == Self::Prod
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub environment: Environment,
}

impl AppConfig {
    pub fn load() -> Result<Self, CoreError> {
        let database_url =
            env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://governance.db".to_string());

        let environment = Environment::parse(
            &env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string()),
        )?;

        Ok(AppConfig {
            database_url,
            environment,
        })
    }
}
