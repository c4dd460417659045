//! Authentication configuration

use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use std::time::Duration;

use super::error::ValidationError;
use super::server::Environment;

/// Minimum HMAC secret length accepted in production.
const MIN_PRODUCTION_SECRET_LEN: usize = 32;

/// Authentication configuration (shared-secret JWT)
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// HMAC secret shared with the token issuer
    pub jwt_secret: Secret<String>,

    /// Expected `iss` claim
    pub issuer: Option<String>,

    /// Expected `aud` claim
    pub audience: Option<String>,

    /// Upper bound on token verification in seconds
    #[serde(default = "default_auth_timeout")]
    pub auth_timeout_secs: u64,

    /// Clock skew tolerance for token expiry in seconds
    #[serde(default = "default_leeway")]
    pub leeway_secs: u64,
}

impl AuthConfig {
    pub fn new(jwt_secret: impl Into<String>) -> Self {
        Self {
            jwt_secret: Secret::new(jwt_secret.into()),
            issuer: None,
            audience: None,
            auth_timeout_secs: default_auth_timeout(),
            leeway_secs: default_leeway(),
        }
    }

    /// Get auth timeout as Duration
    pub fn auth_timeout(&self) -> Duration {
        Duration::from_secs(self.auth_timeout_secs)
    }

    /// Validate authentication configuration
    ///
    /// In production, requires a secret of at least 32 bytes.
    pub fn validate(&self, environment: &Environment) -> Result<(), ValidationError> {
        let secret = self.jwt_secret.expose_secret();
        if secret.trim().is_empty() {
            return Err(ValidationError::MissingRequired("AUTH__JWT_SECRET"));
        }
        if *environment == Environment::Production && secret.len() < MIN_PRODUCTION_SECRET_LEN {
            return Err(ValidationError::WeakJwtSecret);
        }
        if self.auth_timeout_secs == 0 || self.auth_timeout_secs > 60 {
            return Err(ValidationError::InvalidTimeout("auth_timeout_secs"));
        }
        Ok(())
    }
}

fn default_auth_timeout() -> u64 {
    10
}

fn default_leeway() -> u64 {
    30
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_config_defaults() {
        let config = AuthConfig::new("secret");
        assert_eq!(config.auth_timeout(), Duration::from_secs(10));
        assert_eq!(config.leeway_secs, 30);
        assert!(config.issuer.is_none());
    }

    #[test]
    fn test_validation_missing_secret() {
        let config = AuthConfig::new("");
        assert!(config.validate(&Environment::Development).is_err());
    }

    #[test]
    fn test_validation_production_requires_long_secret() {
        let config = AuthConfig::new("short-dev-secret");
        assert!(config.validate(&Environment::Development).is_ok());
        assert!(matches!(
            config.validate(&Environment::Production),
            Err(ValidationError::WeakJwtSecret)
        ));

        let config = AuthConfig::new("x".repeat(MIN_PRODUCTION_SECRET_LEN));
        assert!(config.validate(&Environment::Production).is_ok());
    }

    #[test]
    fn test_validation_timeout_bounds() {
        let config = AuthConfig {
            auth_timeout_secs: 0,
            ..AuthConfig::new("secret")
        };
        assert!(config.validate(&Environment::Development).is_err());
    }

    #[test]
    fn test_secret_is_redacted_in_debug() {
        let config = AuthConfig::new("super-secret-value");
        assert!(!format!("{:?}", config).contains("super-secret-value"));
    }
}
