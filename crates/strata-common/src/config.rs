//! Reconciler configuration
//!
//! Defaults cover normal operation; each knob can be overridden through an
//! environment variable. Reading goes through [`EnvSource`] so tests can
//! inject values without touching process state.

use std::time::Duration;

use crate::store::ApplyOptions;
use crate::Error;

/// Default field manager for server-side apply
pub const DEFAULT_FIELD_MANAGER: &str = "strata-controller";

/// Default upper bound on concurrently running condition checkers
pub const DEFAULT_MAX_CONDITION_WORKERS: usize = 5;

/// Trait for reading configuration from the environment
#[cfg_attr(test, mockall::automock)]
pub trait EnvSource: Send + Sync {
    /// Value of `key`, if set
    fn var(&self, key: &str) -> Option<String>;
}

/// Default implementation that reads process environment variables
#[derive(Clone, Copy, Debug, Default)]
pub struct OsEnv;

impl EnvSource for OsEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

/// Tunables shared by every reconciler
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconcilerConfig {
    /// Field manager name for server-side apply (`STRATA_FIELD_MANAGER`)
    pub field_manager: String,
    /// Take over fields owned by other managers on apply (`STRATA_FORCE_OWNERSHIP`)
    pub force_ownership: bool,
    /// Bound on concurrent condition checkers (`STRATA_MAX_CONDITION_WORKERS`)
    pub max_condition_workers: usize,
    /// Requeue delay while the CAPI cluster does not exist yet (`STRATA_WORKER_REQUEUE_SECS`)
    pub worker_requeue: Duration,
    /// Requeue delay while the control plane is not ready (`STRATA_CONTROL_PLANE_REQUEUE_SECS`)
    pub control_plane_requeue: Duration,
    /// Requeue delay while CNI rollout is waiting (`STRATA_CNI_REQUEUE_SECS`)
    pub cni_requeue: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            field_manager: DEFAULT_FIELD_MANAGER.to_string(),
            force_ownership: true,
            max_condition_workers: DEFAULT_MAX_CONDITION_WORKERS,
            worker_requeue: Duration::from_secs(5),
            control_plane_requeue: Duration::from_secs(30),
            cni_requeue: Duration::from_secs(10),
        }
    }
}

impl ReconcilerConfig {
    /// Server-side apply options for generated objects
    pub fn apply_options(&self) -> ApplyOptions {
        ApplyOptions {
            field_manager: self.field_manager.clone(),
            force_ownership: self.force_ownership,
        }
    }

    /// Defaults overridden by any variables `env` provides
    pub fn from_env(env: &dyn EnvSource) -> Result<Self, Error> {
        let mut config = Self::default();

        if let Some(manager) = env.var("STRATA_FIELD_MANAGER") {
            if manager.trim().is_empty() {
                return Err(Error::validation_for_field(
                    "config",
                    "STRATA_FIELD_MANAGER",
                    "field manager cannot be empty",
                ));
            }
            config.field_manager = manager;
        }
        if let Some(force) = env.var("STRATA_FORCE_OWNERSHIP") {
            config.force_ownership = parse_var("STRATA_FORCE_OWNERSHIP", &force)?;
        }
        if let Some(workers) = env.var("STRATA_MAX_CONDITION_WORKERS") {
            config.max_condition_workers = parse_var("STRATA_MAX_CONDITION_WORKERS", &workers)?;
            if config.max_condition_workers == 0 {
                return Err(Error::validation_for_field(
                    "config",
                    "STRATA_MAX_CONDITION_WORKERS",
                    "must be at least 1",
                ));
            }
        }
        if let Some(secs) = env.var("STRATA_WORKER_REQUEUE_SECS") {
            config.worker_requeue = parse_secs("STRATA_WORKER_REQUEUE_SECS", &secs)?;
        }
        if let Some(secs) = env.var("STRATA_CONTROL_PLANE_REQUEUE_SECS") {
            config.control_plane_requeue = parse_secs("STRATA_CONTROL_PLANE_REQUEUE_SECS", &secs)?;
        }
        if let Some(secs) = env.var("STRATA_CNI_REQUEUE_SECS") {
            config.cni_requeue = parse_secs("STRATA_CNI_REQUEUE_SECS", &secs)?;
        }

        Ok(config)
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, Error>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse::<T>().map_err(|e| {
        Error::validation_for_field("config", key, format!("invalid value '{}': {}", value, e))
    })
}

fn parse_secs(key: &str, value: &str) -> Result<Duration, Error> {
    parse_var::<u64>(key, value).map(Duration::from_secs)
}
