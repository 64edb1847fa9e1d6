//! OrchestratorBuilder - 構築とワイヤリング
//!
//! # Fail-fast 設計
//! - Plan table が空、または tenant が未知の plan を参照していたら `build()` が失敗する
//! - それ以外のエラーは起動後に best-effort で扱う

use std::sync::Arc;

use tracing::info;

use super::availability::{AvailabilityGuard, AvailabilityPolicy};
use super::prune_loop::{PruneLoop, PrunePolicy};
use super::status::StatusCounts;
use super::supervisor::LoopGroup;
use super::sync_loop::SyncLoop;
use super::watchdog::Watchdog;
use crate::admission::AdmissionLocks;
use crate::config::OrchestratorConfig;
use crate::deploy::{DeployPipeline, Provisioner, StorageLayout};
use crate::domain::errors::ConfigError;
use crate::impls::StaticTenantDirectory;
use crate::ports::{Clock, ContainerRuntime, IdGenerator, SystemClock, TenantDirectory, UlidGenerator};
use crate::registry::AppRegistry;

/// BuildError はオーケストレータ構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("no container runtime configured")]
    MissingRuntime,
}

/// # 使用例
/// ```ignore
/// let orchestrator = OrchestratorBuilder::new(config)
///     .runtime(Arc::new(DockerCli::new()))
///     .build()?;
/// let handle = orchestrator.start();
/// ```
pub struct OrchestratorBuilder {
    config: OrchestratorConfig,
    runtime: Option<Arc<dyn ContainerRuntime>>,
    tenants: Option<Arc<dyn TenantDirectory>>,
    clock: Option<Arc<dyn Clock>>,
    registry: Option<Arc<AppRegistry>>,
}

impl OrchestratorBuilder {
    pub fn new(config: OrchestratorConfig) -> Self {
        Self {
            config,
            runtime: None,
            tenants: None,
            clock: None,
            registry: None,
        }
    }

    pub fn runtime(mut self, runtime: Arc<dyn ContainerRuntime>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Defaults to the config's static tenant table.
    pub fn tenants(mut self, tenants: Arc<dyn TenantDirectory>) -> Self {
        self.tenants = Some(tenants);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Defaults to a registry mirrored to `<data_root>/registry.json`.
    pub fn registry(mut self, registry: Arc<AppRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn build(self) -> Result<Orchestrator, BuildError> {
        let plans = Arc::new(self.config.plan_table()?);
        let runtime = self.runtime.ok_or(BuildError::MissingRuntime)?;
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let tenants = self.tenants.unwrap_or_else(|| {
            Arc::new(StaticTenantDirectory::new(self.config.tenants.iter().cloned()))
        });
        let registry = self
            .registry
            .unwrap_or_else(|| Arc::new(AppRegistry::open(self.config.registry_path())));

        let rc = &self.config.reconciler;
        let guard = AvailabilityGuard::new(
            runtime,
            AvailabilityPolicy {
                retry_interval: rc.availability_retry(),
                max_wait: rc.availability_max_wait(),
                call_timeout: rc.runtime_call_timeout(),
            },
        );
        let layout = StorageLayout::new(
            self.config.apps_root(),
            self.config.snapshots_root(),
            self.config.manifests_root(),
        );
        let admission = Arc::new(AdmissionLocks::new());
        let provisioner = Arc::new(Provisioner::new(
            guard.clone(),
            registry.clone(),
            plans.clone(),
            clock.clone(),
        ));
        let ids: Arc<dyn IdGenerator> = Arc::new(UlidGenerator::new(clock.clone()));

        let pipeline = Arc::new(DeployPipeline::new(
            tenants.clone(),
            plans.clone(),
            registry.clone(),
            provisioner.clone(),
            layout.clone(),
            ids,
            clock.clone(),
            self.config.deploy.clone(),
            admission.clone(),
        ));
        let sync = Arc::new(SyncLoop::new(
            guard,
            registry.clone(),
            clock.clone(),
            std::time::Duration::from_secs(rc.min_prune_age_secs),
        ));
        let prune = Arc::new(PruneLoop::new(
            registry.clone(),
            clock,
            PrunePolicy {
                missing_threshold: rc.missing_threshold,
                min_age: std::time::Duration::from_secs(rc.min_prune_age_secs),
            },
        ));
        let watchdog = Watchdog::new(
            layout,
            registry.clone(),
            provisioner,
            tenants,
            plans.clone(),
            admission,
            rc.monitor_interval(),
        );

        info!(
            plans = plans.len(),
            data_root = %self.config.data_root.display(),
            "orchestrator built"
        );
        Ok(Orchestrator {
            config: self.config,
            registry,
            pipeline,
            sync,
            prune,
            watchdog,
        })
    }
}

/// Wired orchestrator. `start()` launches the background loops.
pub struct Orchestrator {
    config: OrchestratorConfig,
    pub registry: Arc<AppRegistry>,
    pub pipeline: Arc<DeployPipeline>,
    pub sync: Arc<SyncLoop>,
    pub prune: Arc<PruneLoop>,
    pub watchdog: Watchdog,
}

impl Orchestrator {
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub async fn status(&self) -> StatusCounts {
        StatusCounts::of(&self.registry.list().await)
    }

    /// Spawn fast sync, slow prune and the watchdog scan.
    pub fn start(&self) -> OrchestratorHandle {
        let rc = &self.config.reconciler;
        let mut group = LoopGroup::new();

        let sync = self.sync.clone();
        group.spawn_periodic("fast_sync", rc.sync_interval(), move || {
            let sync = sync.clone();
            async move {
                sync.run_once().await;
            }
        });

        let prune = self.prune.clone();
        group.spawn_periodic("slow_prune", rc.prune_interval(), move || {
            let prune = prune.clone();
            async move {
                prune.run_once().await;
            }
        });

        let watchdog = self.watchdog.clone();
        group.spawn_periodic("watchdog", rc.watchdog_interval(), move || {
            let watchdog = watchdog.clone();
            async move {
                watchdog.scan_once().await;
            }
        });

        info!("reconciler loops started");
        OrchestratorHandle {
            group,
            watchdog: self.watchdog.clone(),
        }
    }
}

/// Running loops. Dropping it stops the loops; `shutdown` also stops monitors and waits.
pub struct OrchestratorHandle {
    group: LoopGroup,
    watchdog: Watchdog,
}

impl OrchestratorHandle {
    pub async fn shutdown(self) {
        self.group.shutdown_and_join().await;
        self.watchdog.stop_monitors();
        info!("reconciler loops stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Plan, Tenant};
    use crate::impls::InMemoryRuntime;

    fn config() -> OrchestratorConfig {
        let mut config = OrchestratorConfig::default();
        config.plans.insert("test".into(), Plan::zero("test"));
        config.tenants.push(Tenant::new("alice", "test"));
        config
    }

    #[test]
    fn test_build_success() {
        let built = OrchestratorBuilder::new(config())
            .runtime(Arc::new(InMemoryRuntime::new()))
            .registry(Arc::new(AppRegistry::in_memory()))
            .build();
        assert!(built.is_ok());
    }

    #[test]
    fn test_build_empty_plan_table() {
        let built = OrchestratorBuilder::new(OrchestratorConfig::default())
            .runtime(Arc::new(InMemoryRuntime::new()))
            .build();
        assert!(matches!(
            built,
            Err(BuildError::Config(ConfigError::EmptyPlanTable))
        ));
    }

    #[test]
    fn test_build_missing_runtime() {
        let built = OrchestratorBuilder::new(config())
            .registry(Arc::new(AppRegistry::in_memory()))
            .build();
        assert!(matches!(built, Err(BuildError::MissingRuntime)));
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config();
        config.data_root = dir.path().to_path_buf();
        let orchestrator = OrchestratorBuilder::new(config)
            .runtime(Arc::new(InMemoryRuntime::new()))
            .build()
            .unwrap();

        let handle = orchestrator.start();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        handle.shutdown().await;
        assert_eq!(orchestrator.status().await.total(), 0);
    }
}
