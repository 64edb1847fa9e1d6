//! PruneLoop - slow removal of App records whose container stayed missing.
//!
//! Only the registry record is dropped. The working directory stays, so the
//! watchdog may still bring the App back if its container can be recreated.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::domain::{App, AppId, AppStatus};
use crate::ports::Clock;
use crate::registry::AppRegistry;

#[derive(Debug, Clone, Copy)]
pub struct PrunePolicy {
    /// Prune once `missing_cycles` exceeds this.
    pub missing_threshold: u32,
    /// Never prune Apps younger than this.
    pub min_age: Duration,
}

impl PrunePolicy {
    pub fn is_prunable(&self, app: &App, now: DateTime<Utc>) -> bool {
        app.missing_cycles > self.missing_threshold
            && !matches!(app.status, AppStatus::Provisioning | AppStatus::Deleting)
            && app.age_secs(now) >= self.min_age.as_secs() as i64
    }
}

pub struct PruneLoop {
    registry: Arc<AppRegistry>,
    clock: Arc<dyn Clock>,
    policy: PrunePolicy,
}

impl PruneLoop {
    pub fn new(registry: Arc<AppRegistry>, clock: Arc<dyn Clock>, policy: PrunePolicy) -> Self {
        Self {
            registry,
            clock,
            policy,
        }
    }

    /// One pass. Returns the ids removed by this pass.
    pub async fn run_once(&self) -> Vec<AppId> {
        let now = self.clock.now();
        let mut pruned = Vec::new();
        for app in self.registry.list().await {
            if !self.policy.is_prunable(&app, now) {
                continue;
            }
            // re-checked under the lock: fast sync may have seen it again
            let removed = self
                .registry
                .remove_if(&app.id, |current| self.policy.is_prunable(current, now))
                .await;
            if let Some(app) = removed {
                info!(
                    app_id = %app.id,
                    owner = %app.owner,
                    missing_cycles = app.missing_cycles,
                    "pruned app with missing container"
                );
                pruned.push(app.id);
            }
        }
        pruned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::FixedClock;
    use rstest::rstest;
    use std::path::PathBuf;

    const POLICY: PrunePolicy = PrunePolicy {
        missing_threshold: 3,
        min_age: Duration::from_secs(120),
    };

    fn app(status: AppStatus, missing: u32, age_secs: i64, now: DateTime<Utc>) -> App {
        let mut app = App::new(
            AppId::parse("app-a").unwrap(),
            "alice",
            "test",
            PathBuf::from("/tmp"),
            now - chrono::Duration::seconds(age_secs),
        );
        app.status = status;
        app.missing_cycles = missing;
        app
    }

    #[rstest]
    #[case::over_threshold(AppStatus::Unreachable, 4, 300, true)]
    #[case::at_threshold(AppStatus::Unreachable, 3, 300, false)]
    #[case::too_young(AppStatus::Unreachable, 10, 60, false)]
    #[case::provisioning(AppStatus::Provisioning, 10, 300, false)]
    #[case::deleting(AppStatus::Deleting, 10, 300, false)]
    fn prunable(
        #[case] status: AppStatus,
        #[case] missing: u32,
        #[case] age: i64,
        #[case] expected: bool,
    ) {
        let now = Utc::now();
        assert_eq!(POLICY.is_prunable(&app(status, missing, age, now), now), expected);
    }

    #[tokio::test]
    async fn prunes_exactly_once() {
        let now = Utc::now();
        let registry = Arc::new(AppRegistry::in_memory());
        registry.put(app(AppStatus::Unreachable, 5, 600, now)).await;
        let prune = PruneLoop::new(registry.clone(), Arc::new(FixedClock::new(now)), POLICY);

        assert_eq!(prune.run_once().await.len(), 1);
        assert!(prune.run_once().await.is_empty());
        assert!(registry.is_empty().await);
    }
}
