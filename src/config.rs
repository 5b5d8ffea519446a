//! Process configuration read from the environment

use std::time::Duration;

use crate::controller::error::{DEFAULT_REQUEUE_DELAY, Error, Result, RetryPolicy};

/// Lease name used for leader election
pub const LEASE_NAME: &str = "kok-operator-leader";

/// Operator settings; everything has a default so an empty environment works
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperatorConfig {
    /// Leader election identity
    pub pod_name: Option<String>,
    /// Namespace holding the leader election lease
    pub pod_namespace: String,
    /// Restrict every controller to one namespace; cluster-wide when unset
    pub watch_namespace: Option<String>,
    /// Fixed delay before a failed pass is retried
    pub requeue_delay: Duration,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            pod_name: None,
            pod_namespace: "default".to_string(),
            watch_namespace: None,
            requeue_delay: DEFAULT_REQUEUE_DELAY,
        }
    }
}

impl OperatorConfig {
    /// Read `POD_NAME`, `POD_NAMESPACE`, `WATCH_NAMESPACE` and `REQUEUE_DELAY_SECS`
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`OperatorConfig::from_env`] over an arbitrary lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let requeue_delay = match non_empty("REQUEUE_DELAY_SECS") {
            Some(raw) => {
                let secs: u64 = raw.trim().parse().map_err(|_| {
                    Error::InvalidConfig(format!("REQUEUE_DELAY_SECS must be an integer, got {:?}", raw))
                })?;
                if secs == 0 {
                    return Err(Error::InvalidConfig(
                        "REQUEUE_DELAY_SECS must be greater than zero".to_string(),
                    ));
                }
                Duration::from_secs(secs)
            }
            None => defaults.requeue_delay,
        };

        Ok(Self {
            pod_name: non_empty("POD_NAME"),
            pod_namespace: non_empty("POD_NAMESPACE").unwrap_or(defaults.pod_namespace),
            watch_namespace: non_empty("WATCH_NAMESPACE"),
            requeue_delay,
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.requeue_delay)
    }
}
