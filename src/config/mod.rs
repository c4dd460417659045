//! Application configuration module
//!
//! This module provides type-safe configuration loading from environment variables
//! using the `config` and `dotenvy` crates. Configuration is loaded with the
//! `POS_REALTIME` prefix and nested values use double underscores as separators.
//!
//! # Example
//!
//! ```no_run
//! use pos_realtime::config::AppConfig;
//!
//! let config = AppConfig::load().expect("Failed to load configuration");
//! config.validate().expect("Invalid configuration");
//!
//! println!("Server running on {:?}", config.server.socket_addr());
//! ```

mod auth;
mod error;
mod realtime;
mod redis;
mod server;

pub use auth::AuthConfig;
pub use error::{ConfigError, ValidationError};
pub use realtime::RealtimeConfig;
pub use redis::RedisConfig;
pub use server::{Environment, LogFormat, ServerConfig};

use serde::Deserialize;

use crate::application::LifecycleConfig;

/// Root application configuration
///
/// Load using [`AppConfig::load()`] which reads from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server configuration (host, port, environment, logging)
    #[serde(default)]
    pub server: ServerConfig,

    /// Redis backplane; absent for single-instance deployments
    #[serde(default)]
    pub redis: RedisConfig,

    /// Token verification
    pub auth: AuthConfig,

    /// Cluster namespace, liveness and reconnect settings
    #[serde(default)]
    pub realtime: RealtimeConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    ///
    /// This function:
    /// 1. Loads `.env` file if present (for development)
    /// 2. Reads environment variables with `POS_REALTIME` prefix
    /// 3. Uses `__` (double underscore) to separate nested values
    /// 4. Deserializes into typed configuration structs
    ///
    /// # Environment Variable Format
    ///
    /// - `POS_REALTIME__SERVER__PORT=8080` -> `server.port = 8080`
    /// - `POS_REALTIME__REDIS__URL=...` -> `redis.url = ...`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Required environment variables are missing
    /// - Values cannot be parsed into expected types
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if present (development)
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(
                config::Environment::default()
                    .prefix("POS_REALTIME")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        Ok(config)
    }

    /// Validate all configuration values
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` if any configuration value is invalid.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.server.validate()?;
        self.redis.validate()?;
        self.auth.validate(&self.server.environment)?;
        self.realtime.validate()?;
        Ok(())
    }

    /// Check if running in production environment
    pub fn is_production(&self) -> bool {
        self.server.is_production()
    }

    /// Timing and buffering settings for the connection lifecycle.
    pub fn lifecycle(&self) -> LifecycleConfig {
        LifecycleConfig {
            auth_timeout: self.auth.auth_timeout(),
            liveness_timeout: self.realtime.liveness_timeout(),
            probe_grace: self.realtime.probe_grace(),
            sweep_interval: self.realtime.sweep_interval(),
            outbox_capacity: self.realtime.outbox_capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::env;
    use std::sync::Mutex;
    use std::time::Duration;

    // Mutex to ensure tests don't run in parallel (env vars are global)
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// Helper to set environment variables for testing
    /// Uses double underscores to separate nested config values
    fn set_minimal_env() {
        env::set_var("POS_REALTIME__AUTH__JWT_SECRET", "test-secret");
    }

    /// Helper to clear environment variables after testing
    fn clear_env() {
        env::remove_var("POS_REALTIME__AUTH__JWT_SECRET");
        env::remove_var("POS_REALTIME__REDIS__URL");
        env::remove_var("POS_REALTIME__SERVER__PORT");
        env::remove_var("POS_REALTIME__SERVER__ENVIRONMENT");
        env::remove_var("POS_REALTIME__REALTIME__CLUSTER_NAMESPACE");
        env::remove_var("POS_REALTIME__REALTIME__LIVENESS_TIMEOUT_SECS");
        env::remove_var("POS_REALTIME__REALTIME__OUTBOX_CAPACITY");
    }

    #[test]
    fn test_load_from_environment() {
        let _guard = ENV_MUTEX.lock().unwrap();
        set_minimal_env();
        let result = AppConfig::load();
        clear_env();

        assert!(result.is_ok(), "Failed to load config: {:?}", result.err());
        let config = result.unwrap();
        assert_eq!(config.auth.jwt_secret.expose_secret(), "test-secret");
        assert!(!config.redis.is_enabled());
    }

    #[test]
    fn test_validate_minimal_config() {
        let _guard = ENV_MUTEX.lock().unwrap();
        set_minimal_env();
        let result = AppConfig::load();
        clear_env();

        let config = result.unwrap();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_secret_fails_to_load() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env();
        assert!(AppConfig::load().is_err());
    }

    #[test]
    fn test_nested_sections_are_read() {
        let _guard = ENV_MUTEX.lock().unwrap();
        set_minimal_env();
        env::set_var("POS_REALTIME__SERVER__PORT", "3000");
        env::set_var("POS_REALTIME__REDIS__URL", "redis://localhost:6379");
        env::set_var("POS_REALTIME__REALTIME__CLUSTER_NAMESPACE", "staging");
        env::set_var("POS_REALTIME__REALTIME__LIVENESS_TIMEOUT_SECS", "120");
        env::set_var("POS_REALTIME__REALTIME__OUTBOX_CAPACITY", "32");
        let result = AppConfig::load();
        clear_env();

        let config = result.unwrap();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.redis.url.as_deref(), Some("redis://localhost:6379"));
        assert_eq!(config.realtime.cluster_namespace, "staging");
        assert_eq!(config.lifecycle().liveness_timeout, Duration::from_secs(120));
        assert_eq!(config.lifecycle().outbox_capacity, 32);
    }

    #[test]
    fn test_production_rejects_short_secret() {
        let _guard = ENV_MUTEX.lock().unwrap();
        set_minimal_env();
        env::set_var("POS_REALTIME__SERVER__ENVIRONMENT", "production");
        let result = AppConfig::load();
        clear_env();

        let config = result.unwrap();
        assert!(config.is_production());
        assert!(matches!(config.validate(), Err(ValidationError::WeakJwtSecret)));
    }
}
