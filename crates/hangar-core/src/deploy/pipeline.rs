//! DeployPipeline - the synchronous deploy surface.
//!
//! admission → artifact validation → snapshot → extraction → detection →
//! registry insert, then provisioning on a spawned task.
//!
//! Everything up to the registry insert runs while holding the tenant's
//! admission lock, so two concurrent deploys of one tenant are admitted
//! one after the other.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::archive::{self, ArchiveFormat};
use super::detect::{self, Detection, RuntimeKind};
use super::layout::{self, AppManifest, StorageLayout};
use super::provisioner::Provisioner;
use crate::admission::{check_eligibility, AdmissionLocks, Eligibility, TenantUsage};
use crate::config::DeployConfig;
use crate::domain::errors::DeployError;
use crate::domain::ids::validate_label;
use crate::domain::{App, AppId, AppStatus, PlanTable, Tenant};
use crate::ports::{Clock, IdGenerator, TenantDirectory};
use crate::registry::AppRegistry;

/// One upload.
#[derive(Debug, Clone)]
pub struct DeployRequest {
    pub username: String,
    pub filename: String,
    pub bytes: Vec<u8>,
    /// Must equal the tenant's plan when present.
    pub plan: Option<String>,
    pub custom_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DeployResponse {
    pub app: App,
    pub entry_points: Vec<String>,
}

pub struct DeployPipeline {
    tenants: Arc<dyn TenantDirectory>,
    plans: Arc<PlanTable>,
    registry: Arc<AppRegistry>,
    provisioner: Arc<Provisioner>,
    layout: StorageLayout,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
    limits: DeployConfig,
    admission: Arc<AdmissionLocks>,
}

impl DeployPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tenants: Arc<dyn TenantDirectory>,
        plans: Arc<PlanTable>,
        registry: Arc<AppRegistry>,
        provisioner: Arc<Provisioner>,
        layout: StorageLayout,
        ids: Arc<dyn IdGenerator>,
        clock: Arc<dyn Clock>,
        limits: DeployConfig,
        admission: Arc<AdmissionLocks>,
    ) -> Self {
        Self {
            tenants,
            plans,
            registry,
            provisioner,
            layout,
            ids,
            clock,
            limits,
            admission,
        }
    }

    fn tenant(&self, username: &str) -> Result<Tenant, DeployError> {
        self.tenants
            .lookup(username)
            .ok_or_else(|| DeployError::TenantNotFound(username.to_string()))
    }

    /// `GET /deploy/validate`.
    pub async fn eligibility(&self, username: &str) -> Result<Eligibility, DeployError> {
        let tenant = self.tenant(username)?;
        let plan = self.plans.get(&tenant.plan);
        let usage = TenantUsage::of(username, &self.registry.list_by_owner(username).await);
        Ok(Eligibility::from_result(&check_eligibility(&plan, &usage)))
    }

    pub async fn deploy(&self, req: DeployRequest) -> Result<DeployResponse, DeployError> {
        let tenant = self.tenant(&req.username)?;
        layout::check_path_component("tenant", &tenant.username)?;
        layout::check_path_component("plan", &tenant.plan)?;
        if let Some(requested) = &req.plan
            && requested != &tenant.plan
        {
            return Err(DeployError::validation(
                "plan_mismatch",
                format!("tenant is on plan {:?}, not {requested:?}", tenant.plan),
            ));
        }
        if let Some(label) = &req.custom_id {
            validate_label(label)?;
        }

        let admitted = self.admission.acquire(&tenant.username).await;

        let plan = self.plans.get(&tenant.plan);
        let usage = TenantUsage::of(
            &tenant.username,
            &self.registry.list_by_owner(&tenant.username).await,
        );
        check_eligibility(&plan, &usage)?;

        let format = ArchiveFormat::detect(&req.filename, &req.bytes)?;
        let ceiling =
            layout::upload_ceiling_bytes(usage.headroom_mb(&plan), self.limits.upload_multiplier);
        if req.bytes.len() as u64 > ceiling {
            return Err(DeployError::validation(
                "artifact_too_large",
                format!("artifact is {} bytes, ceiling is {ceiling} bytes", req.bytes.len()),
            ));
        }

        let id = self.ids.generate_app_id(req.custom_id.as_deref())?;
        let snapshot = self.layout.snapshot_path(&tenant.username, &id, format);
        let workdir = self.layout.app_dir(&tenant.username, &tenant.plan, &id);

        let unpacked_ceiling = ceiling.saturating_mul(self.limits.max_expansion);
        let staged = stage_artifact(
            req.bytes,
            format,
            unpacked_ceiling,
            snapshot.clone(),
            workdir.clone(),
        )
        .await;
        let manifest_path = self.layout.manifest_path(&tenant.username, &id);
        let detection = match staged {
            Ok(Some(d)) if !d.candidates.is_empty() => d,
            other => {
                discard(vec![workdir], vec![snapshot, manifest_path]).await;
                return Err(match other {
                    Err(e) => e,
                    _ => DeployError::validation(
                        "no_entrypoint",
                        "no runnable entrypoint found in the artifact",
                    ),
                });
            }
        };

        let now = self.clock.now();
        let mut app = App::new(id.clone(), &tenant.username, &tenant.plan, workdir.clone(), now);
        app.display_name = req
            .custom_id
            .clone()
            .unwrap_or_else(|| archive::file_stem(&req.filename).to_string());
        app.runtime = detection.runtime.as_str().to_string();
        app.entrypoint_candidates = detection.candidates.clone();
        if let [only] = detection.candidates.as_slice() {
            app.entrypoint = Some(only.clone());
        }
        app.log(now, format!("deployed from {}", req.filename));

        let manifest = AppManifest::from_app(&app, detection.runtime);
        if let Err(e) = self.persist_manifest(manifest).await {
            discard(vec![workdir], vec![snapshot, manifest_path]).await;
            return Err(e.into());
        }

        self.registry.put(app.clone()).await;
        drop(admitted);

        info!(
            app_id = %id,
            owner = %tenant.username,
            runtime = %detection.runtime,
            candidates = detection.candidates.len(),
            "app deployed"
        );

        if app.entrypoint.is_some() {
            self.spawn_provisioning(id);
        } else {
            debug!(app_id = %app.id, "awaiting entrypoint selection");
        }

        Ok(DeployResponse {
            entry_points: detection.candidates,
            app,
        })
    }

    fn spawn_provisioning(&self, id: AppId) {
        let provisioner = Arc::clone(&self.provisioner);
        tokio::spawn(async move {
            provisioner.provision_app(&id).await;
        });
    }

    async fn owned_app(&self, username: &str, id: &AppId) -> Result<App, DeployError> {
        self.tenant(username)?;
        match self.registry.get(id).await {
            Some(app) if app.owner == username => Ok(app),
            _ => Err(DeployError::AppNotFound(id.clone())),
        }
    }

    pub async fn entrypoints(&self, username: &str, id: &AppId) -> Result<Vec<String>, DeployError> {
        Ok(self.owned_app(username, id).await?.entrypoint_candidates)
    }

    /// Pick one of the detected candidates, persist it, and start provisioning.
    pub async fn select_entrypoint(
        &self,
        username: &str,
        id: &AppId,
        entrypoint: &str,
    ) -> Result<App, DeployError> {
        let app = self.owned_app(username, id).await?;
        if app.status.is_terminal() {
            return Err(DeployError::AppNotFound(id.clone()));
        }
        if !app.entrypoint_candidates.iter().any(|c| c == entrypoint) {
            return Err(DeployError::validation(
                "unknown_entrypoint",
                format!("{entrypoint:?} is not one of the detected entry points"),
            ));
        }
        let runtime = RuntimeKind::parse(&app.runtime).ok_or_else(|| {
            DeployError::validation("unknown_runtime", format!("runtime {:?}", app.runtime))
        })?;

        let now = self.clock.now();
        let updated = self
            .registry
            .update(id, |app| {
                app.entrypoint = Some(entrypoint.to_string());
                app.log(now, format!("entrypoint set to {entrypoint}"));
                app.clone()
            })
            .await
            .ok_or_else(|| DeployError::AppNotFound(id.clone()))?;

        self.persist_manifest(AppManifest::from_app(&updated, runtime)).await?;

        if matches!(
            updated.status,
            AppStatus::Provisioning | AppStatus::Stopped | AppStatus::Unreachable
        ) {
            self.spawn_provisioning(id.clone());
        }
        Ok(updated)
    }

    async fn persist_manifest(&self, manifest: AppManifest) -> Result<(), std::io::Error> {
        let layout = self.layout.clone();
        tokio::task::spawn_blocking(move || layout.write_manifest(&manifest))
            .await
            .map_err(std::io::Error::other)?
    }

    /// Mark `Deleting`, drop files and the record, then remove the container in the background.
    ///
    /// When file removal fails the App stays `Deleting` and keeps counting
    /// against the quota until the caller retries.
    pub async fn delete_app(&self, username: &str, id: &AppId) -> Result<(), DeployError> {
        let app = self.owned_app(username, id).await?;
        let now = self.clock.now();
        self.registry
            .update(id, |app| {
                if app.transition(AppStatus::Deleting).unwrap_or(false) {
                    app.log(now, "deletion requested");
                }
            })
            .await;

        let workdir = app.workdir.clone();
        let mut files = self.layout.snapshot_paths(&app.owner, id).to_vec();
        files.push(self.layout.manifest_path(&app.owner, id));
        if let Err(e) = remove_all(vec![workdir], files).await {
            warn!(app_id = %id, error = %e, "app file removal failed, delete must be retried");
            let now = self.clock.now();
            self.registry
                .update(id, |app| {
                    app.log(now, format!("file removal failed: {e}; retry the delete"));
                })
                .await;
            return Err(e.into());
        }

        self.registry.delete(id).await;
        info!(app_id = %id, owner = %username, "app deleted");

        let provisioner = Arc::clone(&self.provisioner);
        let name = app.container_name();
        tokio::spawn(async move {
            if let Err(e) = provisioner.remove(&name).await {
                warn!(container = %name, error = %e, "container removal failed");
            }
        });
        Ok(())
    }

    pub async fn list_apps(&self, username: &str) -> Result<Vec<App>, DeployError> {
        self.tenant(username)?;
        Ok(self.registry.list_by_owner(username).await)
    }
}

/// Write the raw snapshot, extract, detect. Runs on the blocking pool.
async fn stage_artifact(
    bytes: Vec<u8>,
    format: ArchiveFormat,
    max_unpacked_bytes: u64,
    snapshot: PathBuf,
    workdir: PathBuf,
) -> Result<Option<Detection>, DeployError> {
    tokio::task::spawn_blocking(move || -> Result<Option<Detection>, DeployError> {
        if let Some(parent) = snapshot.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&snapshot, &bytes)?;
        archive::extract(&bytes, format, &workdir, max_unpacked_bytes)?;
        Ok(detect::detect(&workdir)?)
    })
    .await
    .map_err(|e| DeployError::Io(std::io::Error::other(e)))?
}

/// Remove directory trees, then files. Missing paths count as removed.
async fn remove_all(dirs: Vec<PathBuf>, files: Vec<PathBuf>) -> std::io::Result<()> {
    tokio::task::spawn_blocking(move || -> std::io::Result<()> {
        for dir in &dirs {
            layout::remove_dir_if_present(dir)?;
        }
        for file in &files {
            layout::remove_file_if_present(file)?;
        }
        Ok(())
    })
    .await
    .map_err(std::io::Error::other)?
}

async fn discard(dirs: Vec<PathBuf>, files: Vec<PathBuf>) {
    if let Err(e) = remove_all(dirs, files).await {
        warn!(error = %e, "cleanup of rejected artifact failed");
    }
}
