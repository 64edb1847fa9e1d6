//! Watchdog - directory-scan self-healing.
//!
//! Each scan walks `apps/<tenant>/<plan>/<id>/` and makes sure exactly one
//! monitor task exists per container name. A monitor re-provisions its App
//! every `monitor_interval` and exits when the folder disappears or the App
//! is being deleted.
//!
//! Cold start: an App folder with a manifest but no registry record is
//! re-registered before its container is started. Identity (id, owner, plan)
//! comes from the folder path. The manifest only contributes the runtime and
//! entrypoint, and must agree with the folder. The owner must be a known
//! tenant on that plan, and the App must pass admission like a new deploy.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::supervisor::run_guarded;
use crate::admission::{check_eligibility, AdmissionLocks, TenantUsage};
use crate::deploy::layout::AppFolder;
use crate::deploy::{ContainerRecipe, Provisioner, StorageLayout};
use crate::domain::{App, PlanTable};
use crate::ports::TenantDirectory;
use crate::registry::AppRegistry;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub folders: usize,
    pub spawned: usize,
}

/// Outcome of one monitor tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TendResult {
    Provisioned,
    NoManifest,
    AwaitingEntrypoint,
    Failed,
    /// Folder or manifest not accepted for re-registration; the monitor stops
    /// and the next scan tries again.
    Rejected,
    /// Folder gone or App deleting; the monitor should stop.
    Retired,
}

struct Inner {
    layout: StorageLayout,
    registry: Arc<AppRegistry>,
    provisioner: Arc<Provisioner>,
    tenants: Arc<dyn TenantDirectory>,
    plans: Arc<PlanTable>,
    admission: Arc<AdmissionLocks>,
    monitor_interval: Duration,
    monitors: Mutex<HashSet<String>>,
    stop_tx: watch::Sender<bool>,
}

#[derive(Clone)]
pub struct Watchdog {
    inner: Arc<Inner>,
}

impl Watchdog {
    pub fn new(
        layout: StorageLayout,
        registry: Arc<AppRegistry>,
        provisioner: Arc<Provisioner>,
        tenants: Arc<dyn TenantDirectory>,
        plans: Arc<PlanTable>,
        admission: Arc<AdmissionLocks>,
        monitor_interval: Duration,
    ) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                layout,
                registry,
                provisioner,
                tenants,
                plans,
                admission,
                monitor_interval,
                monitors: Mutex::new(HashSet::new()),
                stop_tx,
            }),
        }
    }

    fn monitors(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.inner.monitors.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Names of containers with a live monitor.
    pub fn active_monitors(&self) -> Vec<String> {
        let mut names: Vec<String> = self.monitors().iter().cloned().collect();
        names.sort();
        names
    }

    /// Signal every monitor to exit after its current tick.
    pub fn stop_monitors(&self) {
        let _ = self.inner.stop_tx.send(true);
    }

    pub async fn scan_once(&self) -> ScanReport {
        let layout = self.inner.layout.clone();
        let folders = match tokio::task::spawn_blocking(move || layout.scan()).await {
            Ok(Ok(folders)) => folders,
            Ok(Err(e)) => {
                warn!(error = %e, "watchdog scan failed");
                return ScanReport::default();
            }
            Err(e) => {
                warn!(error = %e, "watchdog scan task failed");
                return ScanReport::default();
            }
        };

        let mut report = ScanReport {
            folders: folders.len(),
            spawned: 0,
        };
        for folder in folders {
            let name = folder.id.container_name();
            if !self.monitors().insert(name.clone()) {
                continue;
            }
            report.spawned += 1;
            debug!(container = %name, "monitor spawned");
            let this = self.clone();
            tokio::spawn(async move { this.monitor(folder, name).await });
        }
        report
    }

    async fn monitor(self, folder: AppFolder, name: String) {
        let mut stop_rx = self.inner.stop_tx.subscribe();
        loop {
            if *stop_rx.borrow() {
                break;
            }
            let mut result = TendResult::Failed;
            run_guarded("monitor", async { result = self.tend(&folder).await }).await;
            if matches!(result, TendResult::Retired | TendResult::Rejected) {
                break;
            }
            tokio::select! {
                changed = stop_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tokio::time::sleep(self.inner.monitor_interval) => {}
            }
        }
        self.monitors().remove(&name);
        debug!(container = %name, "monitor exited");
    }

    /// One monitor tick for `folder`.
    pub async fn tend(&self, folder: &AppFolder) -> TendResult {
        if !folder_exists(&folder.path).await {
            return TendResult::Retired;
        }
        let app = match self.inner.registry.get(&folder.id).await {
            Some(app) if app.status.is_terminal() => return TendResult::Retired,
            Some(app) if app.workdir != folder.path => {
                warn!(
                    app_id = %folder.id,
                    path = %folder.path.display(),
                    "folder does not belong to the registered app"
                );
                return TendResult::Rejected;
            }
            Some(app) => app,
            None => match self.restore(folder).await {
                Ok(app) => app,
                Err(result) => return result,
            },
        };
        // the registry holds the freshest entrypoint selection
        let Some(recipe) = ContainerRecipe::from_app(&app) else {
            return TendResult::AwaitingEntrypoint;
        };

        let provisioner = &self.inner.provisioner;
        let result = provisioner.ensure_running(&recipe).await;
        match provisioner.record(&folder.id, &recipe, result).await {
            Some(_) => TendResult::Provisioned,
            None => TendResult::Failed,
        }
    }

    /// Re-register an App that has a folder and a manifest but no record.
    async fn restore(&self, folder: &AppFolder) -> Result<App, TendResult> {
        let layout = self.inner.layout.clone();
        let (owner, id) = (folder.owner.clone(), folder.id.clone());
        let manifest =
            match tokio::task::spawn_blocking(move || layout.read_manifest(&owner, &id)).await {
                Ok(Ok(manifest)) => manifest,
                _ => return Err(TendResult::NoManifest),
            };
        if let Err(e) = manifest.check_matches(folder) {
            warn!(app_id = %folder.id, error = %e, "manifest rejected");
            return Err(TendResult::Rejected);
        }
        let Some(tenant) = self.inner.tenants.lookup(&folder.owner) else {
            warn!(app_id = %folder.id, owner = %folder.owner, "folder owner is not a known tenant");
            return Err(TendResult::Rejected);
        };
        if tenant.plan != folder.plan {
            warn!(
                app_id = %folder.id,
                owner = %tenant.username,
                plan = %folder.plan,
                tenant_plan = %tenant.plan,
                "folder plan does not match the tenant's plan"
            );
            return Err(TendResult::Rejected);
        }
        if manifest.entrypoint.is_none() {
            return Err(TendResult::AwaitingEntrypoint);
        }

        let _admitted = self.inner.admission.acquire(&tenant.username).await;
        // a deploy holding the lock may have just inserted this App
        if let Some(app) = self.inner.registry.get(&folder.id).await {
            return Ok(app);
        }
        let plan = self.inner.plans.get(&tenant.plan);
        let usage = TenantUsage::of(
            &tenant.username,
            &self.inner.registry.list_by_owner(&tenant.username).await,
        );
        if let Err(reason) = check_eligibility(&plan, &usage) {
            warn!(app_id = %folder.id, owner = %tenant.username, %reason, "app folder not restored");
            return Err(TendResult::Rejected);
        }

        let app = manifest.to_app(folder);
        if !self.inner.registry.put_if_absent(app.clone()).await {
            return Err(TendResult::Failed);
        }
        info!(app_id = %folder.id, owner = %folder.owner, "re-registered app from manifest");
        Ok(app)
    }
}

async fn folder_exists(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false)
}
