//! Controller configuration.

use std::time::Duration;

use thiserror::Error;

/// `EnvFilter` directives used when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "taskdefine_controller=info,tower_http=info";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {value:?} ({reason})")]
    InvalidValue {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Requeue intervals the reconciler hands back to the control loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequeuePolicy {
    /// After the finalizer was just added.
    pub finalizer_added: Duration,

    /// After a write lost an optimistic-concurrency race.
    pub conflict: Duration,

    /// After a store or cleanup failure.
    pub error: Duration,

    /// Periodic re-validation on the steady-state success path.
    pub resync: Duration,
}

impl Default for RequeuePolicy {
    fn default() -> Self {
        Self {
            finalizer_added: Duration::from_secs(1),
            conflict: Duration::from_secs(2),
            error: Duration::from_secs(5),
            resync: Duration::from_secs(60),
        }
    }
}

/// Controller configuration.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Number of concurrent reconcile workers.
    pub workers: usize,

    /// Upper bound on any single store call.
    pub store_timeout: Duration,

    /// Requeue intervals.
    pub requeue: RequeuePolicy,

    /// Bind address for the health/metrics HTTP server.
    pub http_bind_addr: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            store_timeout: Duration::from_secs(10),
            requeue: RequeuePolicy::default(),
            http_bind_addr: "127.0.0.1:8081".to_string(),
        }
    }
}

impl ControllerConfig {
    /// Defaults overridden by `TASKDEFINE_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = lookup("TASKDEFINE_WORKERS") {
            let workers = parse_u64("TASKDEFINE_WORKERS", &value)?;
            if workers == 0 {
                return Err(ConfigError::InvalidValue {
                    var: "TASKDEFINE_WORKERS",
                    value,
                    reason: "must be at least 1".to_string(),
                });
            }
            config.workers = workers as usize;
        }
        if let Some(value) = lookup("TASKDEFINE_RESYNC_SECS") {
            config.requeue.resync = Duration::from_secs(parse_u64("TASKDEFINE_RESYNC_SECS", &value)?);
        }
        if let Some(value) = lookup("TASKDEFINE_STORE_TIMEOUT_SECS") {
            config.store_timeout =
                Duration::from_secs(parse_u64("TASKDEFINE_STORE_TIMEOUT_SECS", &value)?);
        }
        if let Some(value) = lookup("TASKDEFINE_HTTP_ADDR") {
            config.http_bind_addr = value;
        }

        Ok(config)
    }
}

fn parse_u64(var: &'static str, value: &str) -> Result<u64, ConfigError> {
    value.trim().parse().map_err(|e: std::num::ParseIntError| ConfigError::InvalidValue {
        var,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tracing_subscriber::EnvFilter;

    #[test]
    fn test_default_requeue_intervals() {
        let policy = RequeuePolicy::default();
        assert_eq!(policy.finalizer_added, Duration::from_secs(1));
        assert_eq!(policy.conflict, Duration::from_secs(2));
        assert_eq!(policy.error, Duration::from_secs(5));
        assert_eq!(policy.resync, Duration::from_secs(60));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("TASKDEFINE_WORKERS", "8"),
            ("TASKDEFINE_RESYNC_SECS", "30"),
            ("TASKDEFINE_HTTP_ADDR", "0.0.0.0:9000"),
        ]
        .into_iter()
        .collect();

        let config = ControllerConfig::from_lookup(|k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.workers, 8);
        assert_eq!(config.requeue.resync, Duration::from_secs(30));
        assert_eq!(config.http_bind_addr, "0.0.0.0:9000");
        assert_eq!(config.store_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_invalid_env_value() {
        let err = ControllerConfig::from_lookup(|k| {
            (k == "TASKDEFINE_STORE_TIMEOUT_SECS").then(|| "soon".to_string())
        })
        .unwrap_err();
        assert!(err.to_string().contains("TASKDEFINE_STORE_TIMEOUT_SECS"));

        assert!(ControllerConfig::from_lookup(|k| {
            (k == "TASKDEFINE_WORKERS").then(|| "0".to_string())
        })
        .is_err());
    }

    #[test]
    fn test_default_log_filter_parses() {
        let filter = EnvFilter::try_new(DEFAULT_LOG_FILTER).unwrap();
        let rendered = filter.to_string();
        assert!(rendered.contains("taskdefine_controller=info"));
        assert!(rendered.contains("tower_http=info"));
    }
}
