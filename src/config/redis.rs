//! Redis backplane configuration

use serde::Deserialize;

use super::error::ValidationError;

/// Redis configuration
///
/// Without a URL the server runs as a single instance on the in-memory
/// backplane.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL
    pub url: Option<String>,
}

impl RedisConfig {
    /// Whether a shared backplane is configured.
    pub fn is_enabled(&self) -> bool {
        self.url.as_deref().is_some_and(|url| !url.trim().is_empty())
    }

    /// Validate Redis configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        let Some(url) = self.url.as_deref().filter(|url| !url.trim().is_empty()) else {
            return Ok(());
        };
        if !url.starts_with("redis://") && !url.starts_with("rediss://") {
            return Err(ValidationError::InvalidRedisUrl);
        }
        Ok(())
    }
}
