//! Real-time distribution configuration

use serde::Deserialize;
use std::time::Duration;

use super::error::ValidationError;

/// Cluster namespace, liveness, buffering and reconnect settings
#[derive(Debug, Clone, Deserialize)]
pub struct RealtimeConfig {
    /// Prefix for backplane topics; deployments sharing a Redis must differ
    #[serde(default = "default_cluster_namespace")]
    pub cluster_namespace: String,

    /// Inactivity in seconds before a connection is probed
    #[serde(default = "default_liveness_timeout")]
    pub liveness_timeout_secs: u64,

    /// Seconds a probed connection has to answer
    #[serde(default = "default_probe_grace")]
    pub probe_grace_secs: u64,

    /// Seconds between liveness sweeps
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Events a connection may have queued before it is closed as a slow
    /// consumer
    #[serde(default = "default_outbox_capacity")]
    pub outbox_capacity: usize,

    /// First backplane reconnect delay in milliseconds
    #[serde(default = "default_backoff_initial")]
    pub backoff_initial_ms: u64,

    /// Backplane reconnect delay cap in milliseconds
    #[serde(default = "default_backoff_max")]
    pub backoff_max_ms: u64,
}

impl RealtimeConfig {
    pub fn liveness_timeout(&self) -> Duration {
        Duration::from_secs(self.liveness_timeout_secs)
    }

    pub fn probe_grace(&self) -> Duration {
        Duration::from_secs(self.probe_grace_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn backoff_initial(&self) -> Duration {
        Duration::from_millis(self.backoff_initial_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }

    /// Validate real-time configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        let namespace = self.cluster_namespace.trim();
        if namespace.is_empty() {
            return Err(ValidationError::MissingRequired("REALTIME__CLUSTER_NAMESPACE"));
        }
        if namespace.contains(|c: char| c == '*' || c == '?' || c == '[' || c.is_whitespace()) {
            return Err(ValidationError::InvalidClusterNamespace);
        }
        if self.liveness_timeout_secs == 0 {
            return Err(ValidationError::InvalidTimeout("liveness_timeout_secs"));
        }
        if self.sweep_interval_secs == 0 {
            return Err(ValidationError::InvalidTimeout("sweep_interval_secs"));
        }
        if self.outbox_capacity == 0 {
            return Err(ValidationError::InvalidOutboxCapacity);
        }
        if self.backoff_initial_ms == 0 || self.backoff_initial_ms > self.backoff_max_ms {
            return Err(ValidationError::InvalidBackoff);
        }
        Ok(())
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            cluster_namespace: default_cluster_namespace(),
            liveness_timeout_secs: default_liveness_timeout(),
            probe_grace_secs: default_probe_grace(),
            sweep_interval_secs: default_sweep_interval(),
            outbox_capacity: default_outbox_capacity(),
            backoff_initial_ms: default_backoff_initial(),
            backoff_max_ms: default_backoff_max(),
        }
    }
}

fn default_cluster_namespace() -> String {
    "pos-realtime".to_string()
}

fn default_liveness_timeout() -> u64 {
    60
}

fn default_probe_grace() -> u64 {
    10
}

fn default_sweep_interval() -> u64 {
    15
}

fn default_outbox_capacity() -> usize {
    256
}

fn default_backoff_initial() -> u64 {
    100
}

fn default_backoff_max() -> u64 {
    30_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_realtime_config_defaults() {
        let config = RealtimeConfig::default();
        assert_eq!(config.cluster_namespace, "pos-realtime");
        assert_eq!(config.liveness_timeout(), Duration::from_secs(60));
        assert_eq!(config.backoff_max(), Duration::from_secs(30));
        assert_eq!(config.outbox_capacity, 256);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_outbox_capacity_is_rejected() {
        let config = RealtimeConfig {
            outbox_capacity: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ValidationError::InvalidOutboxCapacity)
        ));
    }

    #[test]
    fn test_namespace_rejects_glob_characters() {
        let config = RealtimeConfig {
            cluster_namespace: "prod*".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ValidationError::InvalidClusterNamespace)
        ));
    }

    #[test]
    fn test_empty_namespace_is_missing() {
        let config = RealtimeConfig {
            cluster_namespace: " ".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_backoff_initial_must_not_exceed_max() {
        let config = RealtimeConfig {
            backoff_initial_ms: 5_000,
            backoff_max_ms: 1_000,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ValidationError::InvalidBackoff)));
    }

    #[test]
    fn test_zero_liveness_timeout_is_rejected() {
        let config = RealtimeConfig {
            liveness_timeout_secs: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
