//! Configuration for the orchestrator

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::errors::ConfigError;
use crate::domain::{Plan, PlanTable, Tenant};

/// Main orchestrator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Root of snapshots, working directories and the registry file
    #[serde(default = "default_data_root")]
    pub data_root: PathBuf,

    /// Reconciler loop configuration
    #[serde(default)]
    pub reconciler: ReconcilerConfig,

    /// Deploy pipeline configuration
    #[serde(default)]
    pub deploy: DeployConfig,

    /// Plan table, keyed by plan id
    #[serde(default)]
    pub plans: HashMap<String, Plan>,

    /// Static tenant table
    #[serde(default)]
    pub tenants: Vec<Tenant>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            data_root: default_data_root(),
            reconciler: ReconcilerConfig::default(),
            deploy: DeployConfig::default(),
            plans: HashMap::new(),
            tenants: Vec::new(),
        }
    }
}

impl OrchestratorConfig {
    pub fn registry_path(&self) -> PathBuf {
        self.data_root.join("registry.json")
    }

    pub fn apps_root(&self) -> PathBuf {
        self.data_root.join("apps")
    }

    pub fn snapshots_root(&self) -> PathBuf {
        self.data_root.join("snapshots")
    }

    /// Manifests live outside `apps/`, which is mounted into containers.
    pub fn manifests_root(&self) -> PathBuf {
        self.data_root.join("manifests")
    }

    /// Validate the config and build the plan table. Fatal on failure.
    pub fn plan_table(&self) -> Result<PlanTable, ConfigError> {
        self.reconciler.validate()?;
        if self.deploy.upload_multiplier == 0 {
            return Err(ConfigError::Invalid("deploy.upload_multiplier must be > 0".into()));
        }
        if self.deploy.max_expansion == 0 {
            return Err(ConfigError::Invalid("deploy.max_expansion must be > 0".into()));
        }
        let table = PlanTable::new(self.plans.clone())?;
        for tenant in &self.tenants {
            if !table.contains(&tenant.plan) {
                return Err(ConfigError::UnknownPlan {
                    username: tenant.username.clone(),
                    plan: tenant.plan.clone(),
                });
            }
        }
        Ok(table)
    }
}

/// Reconciler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcilerConfig {
    /// Fast sync interval in milliseconds
    #[serde(default = "default_sync_interval")]
    pub sync_interval_ms: u64,

    /// Slow prune interval in seconds
    #[serde(default = "default_prune_interval")]
    pub prune_interval_secs: u64,

    /// Directory-scan watchdog interval in seconds
    #[serde(default = "default_watchdog_interval")]
    pub watchdog_interval_secs: u64,

    /// Per-container monitor poll interval in seconds
    #[serde(default = "default_monitor_interval")]
    pub monitor_interval_secs: u64,

    /// Consecutive missing cycles tolerated before an App may be pruned
    #[serde(default = "default_missing_threshold")]
    pub missing_threshold: u32,

    /// Apps younger than this are never pruned
    #[serde(default = "default_min_prune_age")]
    pub min_prune_age_secs: u64,

    /// Upper bound for every runtime call
    #[serde(default = "default_runtime_call_timeout")]
    pub runtime_call_timeout_ms: u64,

    /// Availability guard retry interval
    #[serde(default = "default_availability_retry")]
    pub availability_retry_ms: u64,

    /// Availability guard total wait
    #[serde(default = "default_availability_max_wait")]
    pub availability_max_wait_ms: u64,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            sync_interval_ms: default_sync_interval(),
            prune_interval_secs: default_prune_interval(),
            watchdog_interval_secs: default_watchdog_interval(),
            monitor_interval_secs: default_monitor_interval(),
            missing_threshold: default_missing_threshold(),
            min_prune_age_secs: default_min_prune_age(),
            runtime_call_timeout_ms: default_runtime_call_timeout(),
            availability_retry_ms: default_availability_retry(),
            availability_max_wait_ms: default_availability_max_wait(),
        }
    }
}

impl ReconcilerConfig {
    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms)
    }

    pub fn prune_interval(&self) -> Duration {
        Duration::from_secs(self.prune_interval_secs)
    }

    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_secs(self.watchdog_interval_secs)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_secs)
    }

    pub fn runtime_call_timeout(&self) -> Duration {
        Duration::from_millis(self.runtime_call_timeout_ms)
    }

    pub fn availability_retry(&self) -> Duration {
        Duration::from_millis(self.availability_retry_ms)
    }

    pub fn availability_max_wait(&self) -> Duration {
        Duration::from_millis(self.availability_max_wait_ms)
    }

    /// Loop periods and timeouts must be non-zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fields = [
            ("sync_interval_ms", self.sync_interval_ms),
            ("prune_interval_secs", self.prune_interval_secs),
            ("watchdog_interval_secs", self.watchdog_interval_secs),
            ("monitor_interval_secs", self.monitor_interval_secs),
            ("runtime_call_timeout_ms", self.runtime_call_timeout_ms),
            ("availability_retry_ms", self.availability_retry_ms),
        ];
        match fields.iter().find(|(_, value)| *value == 0) {
            Some((name, _)) => Err(ConfigError::Invalid(format!("reconciler.{name} must be > 0"))),
            None => Ok(()),
        }
    }
}

/// Deploy pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployConfig {
    /// Upload ceiling = headroom (MiB) x 1 MiB x this multiplier
    #[serde(default = "default_upload_multiplier")]
    pub upload_multiplier: u64,

    /// Extracted size may be at most upload ceiling x this factor
    #[serde(default = "default_max_expansion")]
    pub max_expansion: u64,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            upload_multiplier: default_upload_multiplier(),
            max_expansion: default_max_expansion(),
        }
    }
}

// Default value helpers
fn default_data_root() -> PathBuf {
    PathBuf::from("./data")
}

fn default_sync_interval() -> u64 {
    2_000
}

fn default_prune_interval() -> u64 {
    60
}

fn default_watchdog_interval() -> u64 {
    30
}

fn default_monitor_interval() -> u64 {
    10
}

fn default_missing_threshold() -> u32 {
    3
}

fn default_min_prune_age() -> u64 {
    120
}

fn default_runtime_call_timeout() -> u64 {
    5_000
}

fn default_availability_retry() -> u64 {
    2_000
}

fn default_availability_max_wait() -> u64 {
    30_000
}

fn default_upload_multiplier() -> u64 {
    1
}

fn default_max_expansion() -> u64 {
    4
}
