//! SyncLoop - fast reconciliation of App status against the runtime.
//!
//! Pass ごとに registry のスナップショットを取り、コンテナの存在・稼働・
//! 使用量を観測して `update` で 1 件ずつ反映する。
//! runtime への書き込み系呼び出し（create/restart/remove）は一切しない。

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use super::availability::{timed, AvailabilityGuard};
use crate::domain::errors::RuntimeError;
use crate::domain::{App, AppStatus};
use crate::ports::{Clock, ContainerStats};
use crate::registry::AppRegistry;

/// Counters for one pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub observed: usize,
    pub missing: usize,
    /// Timed out or failed; left untouched until the next pass.
    pub unknown: usize,
    pub skipped: usize,
    /// Runtime was unreachable; nothing was observed.
    pub runtime_down: bool,
}

enum Observation {
    Present { running: bool, stats: ContainerStats },
    Absent,
}

pub struct SyncLoop {
    guard: AvailabilityGuard,
    registry: Arc<AppRegistry>,
    clock: Arc<dyn Clock>,
    min_age: Duration,
}

impl SyncLoop {
    pub fn new(
        guard: AvailabilityGuard,
        registry: Arc<AppRegistry>,
        clock: Arc<dyn Clock>,
        min_age: Duration,
    ) -> Self {
        Self {
            guard,
            registry,
            clock,
            min_age,
        }
    }

    /// Deleting, awaiting an entrypoint, or provisioning within the grace period.
    fn is_settling(&self, app: &App) -> bool {
        match app.status {
            AppStatus::Deleting => true,
            AppStatus::Provisioning => {
                app.entrypoint.is_none()
                    || app.age_secs(self.clock.now()) < self.min_age.as_secs() as i64
            }
            _ => false,
        }
    }

    async fn observe(&self, name: &str) -> Result<Observation, RuntimeError> {
        let runtime = self.guard.runtime();
        let limit = self.guard.call_timeout();
        if !timed("exists", limit, runtime.exists(name)).await? {
            return Ok(Observation::Absent);
        }
        let running = timed("inspect", limit, runtime.inspect(name)).await?;
        let stats = if running {
            timed("stats", limit, runtime.stats(name)).await?
        } else {
            ContainerStats::default()
        };
        Ok(Observation::Present { running, stats })
    }

    pub async fn run_once(&self) -> SyncReport {
        let mut report = SyncReport::default();
        if let Err(e) = self.guard.wait_available().await {
            warn!(error = %e, "fast sync skipped: runtime unavailable");
            report.runtime_down = true;
            return report;
        }

        for app in self.registry.list().await {
            if self.is_settling(&app) {
                report.skipped += 1;
                continue;
            }
            let name = app.container_name();
            let observation = match self.observe(&name).await {
                Ok(o) => o,
                Err(e) => {
                    debug!(app_id = %app.id, container = %name, error = %e, "observation inconclusive");
                    report.unknown += 1;
                    continue;
                }
            };

            let now = self.clock.now();
            match observation {
                Observation::Absent => {
                    report.missing += 1;
                    self.registry
                        .update(&app.id, |app| {
                            if app.status.is_terminal() {
                                return;
                            }
                            app.mark_missing();
                            if app.transition(AppStatus::Unreachable).unwrap_or(false) {
                                app.log(now, "container not found");
                            }
                        })
                        .await;
                }
                Observation::Present { running, stats } => {
                    report.observed += 1;
                    self.registry
                        .update(&app.id, |app| {
                            if app.status.is_terminal() {
                                return;
                            }
                            app.mark_present();
                            app.ram_used_mb = stats.ram_mb;
                            app.cpu_used_pct = stats.cpu_pct;
                            let next = if running {
                                AppStatus::Running
                            } else {
                                AppStatus::Stopped
                            };
                            if app.transition(next).unwrap_or(false) {
                                app.log(now, format!("container observed {next}"));
                            }
                            if running {
                                app.start_time.get_or_insert(now);
                            }
                        })
                        .await;
                }
            }
        }
        debug!(?report, "fast sync pass");
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::availability::AvailabilityPolicy;
    use crate::domain::AppId;
    use crate::impls::InMemoryRuntime;
    use crate::ports::{ContainerRuntime, ContainerSpec, FixedClock};
    use chrono::Utc;
    use std::path::PathBuf;

    struct Fixture {
        runtime: Arc<InMemoryRuntime>,
        registry: Arc<AppRegistry>,
        clock: Arc<FixedClock>,
        sync: SyncLoop,
    }

    fn fixture() -> Fixture {
        let runtime = Arc::new(InMemoryRuntime::new());
        let registry = Arc::new(AppRegistry::in_memory());
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let guard = AvailabilityGuard::new(
            runtime.clone(),
            AvailabilityPolicy {
                retry_interval: Duration::from_millis(5),
                max_wait: Duration::from_millis(10),
                call_timeout: Duration::from_millis(50),
            },
        );
        let sync = SyncLoop::new(guard, registry.clone(), clock.clone(), Duration::from_secs(120));
        Fixture {
            runtime,
            registry,
            clock,
            sync,
        }
    }

    async fn running_app(f: &Fixture, id: &str) -> App {
        let mut app = App::new(
            AppId::parse(id).unwrap(),
            "alice",
            "test",
            PathBuf::from("/tmp"),
            f.clock.now(),
        );
        app.transition(AppStatus::Running).unwrap();
        f.registry.put(app.clone()).await;
        let spec = ContainerSpec {
            name: app.container_name(),
            image: "node:20-alpine".into(),
            workdir: PathBuf::from("/tmp"),
            command: vec![],
            memory_mb: 256,
            cpu_cores: 1.0,
            hardened: false,
            restart: crate::ports::RestartPolicy::Never,
            labels: Default::default(),
        };
        f.runtime.create(&spec).await.unwrap();
        app
    }

    #[tokio::test]
    async fn refreshes_stats_of_running_app() {
        let f = fixture();
        let app = running_app(&f, "app-a").await;
        f.runtime.set_stats(
            &app.container_name(),
            ContainerStats {
                ram_mb: 96,
                cpu_pct: 3.5,
            },
        );

        let report = f.sync.run_once().await;

        assert_eq!(report.observed, 1);
        let stored = f.registry.get(&app.id).await.unwrap();
        assert_eq!(stored.ram_used_mb, 96);
        assert_eq!(stored.status, AppStatus::Running);
    }

    #[tokio::test]
    async fn crashed_container_becomes_stopped() {
        let f = fixture();
        let app = running_app(&f, "app-a").await;
        f.runtime.stop(&app.container_name());

        f.sync.run_once().await;

        let stored = f.registry.get(&app.id).await.unwrap();
        assert_eq!(stored.status, AppStatus::Stopped);
        assert_eq!(stored.ram_used_mb, 0);
        assert_eq!(f.runtime.calls().restart, 0);
    }

    #[tokio::test]
    async fn vanished_container_counts_missing_cycles() {
        let f = fixture();
        let app = running_app(&f, "app-a").await;
        f.runtime.vanish(&app.container_name());

        f.sync.run_once().await;
        f.sync.run_once().await;

        let stored = f.registry.get(&app.id).await.unwrap();
        assert_eq!(stored.status, AppStatus::Unreachable);
        assert_eq!(stored.missing_cycles, 2);
    }

    #[tokio::test]
    async fn young_provisioning_app_is_left_alone() {
        let f = fixture();
        let mut app = App::new(
            AppId::parse("app-new").unwrap(),
            "alice",
            "test",
            PathBuf::from("/tmp"),
            f.clock.now(),
        );
        app.entrypoint = Some("index.js".into());
        f.registry.put(app.clone()).await;

        let report = f.sync.run_once().await;

        assert_eq!(report.skipped, 1);
        let stored = f.registry.get(&app.id).await.unwrap();
        assert_eq!(stored.status, AppStatus::Provisioning);
        assert_eq!(stored.missing_cycles, 0);
    }

    #[tokio::test]
    async fn slow_runtime_leaves_state_untouched() {
        let f = fixture();
        let app = running_app(&f, "app-a").await;
        f.runtime.vanish(&app.container_name());
        f.runtime.set_latency(Some(Duration::from_millis(200)));

        let report = f.sync.run_once().await;

        assert!(report.runtime_down);
        let stored = f.registry.get(&app.id).await.unwrap();
        assert_eq!(stored.status, AppStatus::Running);
        assert_eq!(stored.missing_cycles, 0);
    }

    #[tokio::test]
    async fn unavailable_runtime_skips_pass() {
        let f = fixture();
        let app = running_app(&f, "app-a").await;
        f.runtime.set_available(false);

        let report = f.sync.run_once().await;

        assert!(report.runtime_down);
        assert_eq!(f.registry.get(&app.id).await.unwrap().missing_cycles, 0);
    }
}
