//! On-disk layout: tenant-scoped snapshots, working directories and manifests.
//!
//! ```text
//! <data_root>/snapshots/<tenant>/<app id>.<ext>
//! <data_root>/apps/<tenant>/<plan>/<app id>/
//! <data_root>/manifests/<tenant>/<app id>.json
//! ```
//!
//! Working directories are mounted into App containers, so nothing the
//! orchestrator trusts is stored inside them.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::archive::{is_confined, ArchiveFormat};
use super::detect::RuntimeKind;
use crate::domain::errors::ValidationError;
use crate::domain::{App, AppId, AppStatus};
use crate::registry::snapshot::write_atomic;

const MIB: u64 = 1024 * 1024;

/// Largest accepted upload: headroom in MiB converted to bytes, times `multiplier`.
pub fn upload_ceiling_bytes(headroom_mb: i64, multiplier: u64) -> u64 {
    u64::try_from(headroom_mb)
        .unwrap_or(0)
        .saturating_mul(MIB)
        .saturating_mul(multiplier)
}

/// Reject names that cannot be used as a single path component.
pub fn check_path_component(kind: &'static str, name: &str) -> Result<(), ValidationError> {
    let ok = !name.is_empty()
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if ok {
        Ok(())
    } else {
        Err(ValidationError::new(
            "invalid_path_component",
            format!("{kind} {name:?} cannot be used on disk"),
        ))
    }
}

/// What the watchdog needs to rebuild an App from its folder alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppManifest {
    pub id: AppId,
    pub owner: String,
    pub plan: String,
    pub display_name: String,
    pub runtime: RuntimeKind,
    #[serde(default)]
    pub entrypoint: Option<String>,
    #[serde(default)]
    pub candidates: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl AppManifest {
    pub fn from_app(app: &App, runtime: RuntimeKind) -> Self {
        Self {
            id: app.id.clone(),
            owner: app.owner.clone(),
            plan: app.plan.clone(),
            display_name: app.display_name.clone(),
            runtime,
            entrypoint: app.entrypoint.clone(),
            candidates: app.entrypoint_candidates.clone(),
            created_at: app.created_at,
        }
    }

    /// Reject a manifest that does not describe the App stored in `folder`.
    pub fn check_matches(&self, folder: &AppFolder) -> Result<(), ValidationError> {
        if self.id != folder.id || self.owner != folder.owner || self.plan != folder.plan {
            return Err(ValidationError::new(
                "manifest_mismatch",
                format!(
                    "manifest names {}/{}/{}, folder is {}/{}/{}",
                    self.owner, self.plan, self.id, folder.owner, folder.plan, folder.id
                ),
            ));
        }
        if let Some(entrypoint) = &self.entrypoint
            && (!is_confined(Path::new(entrypoint)) || !self.candidates.contains(entrypoint))
        {
            return Err(ValidationError::new(
                "manifest_mismatch",
                format!("entrypoint {entrypoint:?} is not a detected candidate"),
            ));
        }
        Ok(())
    }

    /// Registry record for an App found on disk but missing from the registry.
    /// Identity comes from the folder, never from the manifest.
    pub fn to_app(&self, folder: &AppFolder) -> App {
        let mut app = App::new(
            folder.id.clone(),
            folder.owner.clone(),
            folder.plan.clone(),
            folder.path.clone(),
            self.created_at,
        );
        app.display_name = self.display_name.clone();
        app.runtime = self.runtime.as_str().to_string();
        app.entrypoint = self.entrypoint.clone();
        app.entrypoint_candidates = self.candidates.clone();
        app.status = AppStatus::Provisioning;
        app
    }
}

/// One `apps/<tenant>/<plan>/<id>` folder found by a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppFolder {
    pub owner: String,
    pub plan: String,
    pub id: AppId,
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct StorageLayout {
    apps_root: PathBuf,
    snapshots_root: PathBuf,
    manifests_root: PathBuf,
}

impl StorageLayout {
    pub fn new(
        apps_root: impl Into<PathBuf>,
        snapshots_root: impl Into<PathBuf>,
        manifests_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            apps_root: apps_root.into(),
            snapshots_root: snapshots_root.into(),
            manifests_root: manifests_root.into(),
        }
    }

    /// `apps/`, `snapshots/` and `manifests/` under one data root.
    pub fn under(data_root: &Path) -> Self {
        Self::new(
            data_root.join("apps"),
            data_root.join("snapshots"),
            data_root.join("manifests"),
        )
    }

    pub fn apps_root(&self) -> &Path {
        &self.apps_root
    }

    pub fn app_dir(&self, owner: &str, plan: &str, id: &AppId) -> PathBuf {
        self.apps_root.join(owner).join(plan).join(id.as_str())
    }

    pub fn snapshot_path(&self, owner: &str, id: &AppId, format: ArchiveFormat) -> PathBuf {
        self.snapshots_root
            .join(owner)
            .join(format!("{}.{}", id.as_str(), format.extension()))
    }

    /// Every snapshot ever stored for the App, whatever its format.
    pub fn snapshot_paths(&self, owner: &str, id: &AppId) -> [PathBuf; 2] {
        [
            self.snapshot_path(owner, id, ArchiveFormat::Tar),
            self.snapshot_path(owner, id, ArchiveFormat::TarGz),
        ]
    }

    pub fn manifest_path(&self, owner: &str, id: &AppId) -> PathBuf {
        self.manifests_root
            .join(owner)
            .join(format!("{}.json", id.as_str()))
    }

    pub fn write_manifest(&self, manifest: &AppManifest) -> io::Result<()> {
        let bytes = serde_json::to_vec_pretty(manifest).map_err(io::Error::other)?;
        write_atomic(&self.manifest_path(&manifest.owner, &manifest.id), &bytes)
            .map_err(|e| io::Error::other(e.to_string()))
    }

    pub fn read_manifest(&self, owner: &str, id: &AppId) -> io::Result<AppManifest> {
        let bytes = fs::read(self.manifest_path(owner, id))?;
        serde_json::from_slice(&bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    /// Walk `apps/<tenant>/<plan>/<id>`. Entries that do not fit the layout are skipped.
    pub fn scan(&self) -> io::Result<Vec<AppFolder>> {
        let mut found = Vec::new();
        if !self.apps_root.is_dir() {
            return Ok(found);
        }
        for owner in subdirs(&self.apps_root)? {
            for plan in subdirs(&owner.1)? {
                for app in subdirs(&plan.1)? {
                    let Ok(id) = AppId::parse(&app.0) else {
                        warn!(path = %app.1.display(), "skipping folder with invalid app id");
                        continue;
                    };
                    found.push(AppFolder {
                        owner: owner.0.clone(),
                        plan: plan.0.clone(),
                        id,
                        path: app.1,
                    });
                }
            }
        }
        found.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(found)
    }
}

fn subdirs(dir: &Path) -> io::Result<Vec<(String, PathBuf)>> {
    let mut out = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }
        out.push((name, entry.path()));
    }
    Ok(out)
}

/// Remove a directory tree; already gone counts as success.
pub fn remove_dir_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_dir_all(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

pub fn remove_file_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::zero(0, 1, 0)]
    #[case::negative(-50, 1, 0)]
    #[case::one_mib(1, 1, 1_048_576)]
    #[case::multiplied(256, 4, 1_073_741_824)]
    fn ceiling(#[case] headroom: i64, #[case] mult: u64, #[case] bytes: u64) {
        assert_eq!(upload_ceiling_bytes(headroom, mult), bytes);
    }

    #[rstest]
    #[case("alice", true)]
    #[case("team_a.dev", true)]
    #[case("..", false)]
    #[case("a/b", false)]
    #[case("", false)]
    fn path_components(#[case] name: &str, #[case] ok: bool) {
        assert_eq!(check_path_component("tenant", name).is_ok(), ok);
    }

    #[test]
    fn paths_are_tenant_scoped() {
        let layout = StorageLayout::under(Path::new("/d"));
        let id = AppId::parse("app-1").unwrap();
        assert_eq!(
            layout.app_dir("alice", "test", &id),
            PathBuf::from("/d/apps/alice/test/app-1")
        );
        assert_eq!(
            layout.snapshot_path("alice", &id, ArchiveFormat::TarGz),
            PathBuf::from("/d/snapshots/alice/app-1.tar.gz")
        );
        assert_eq!(
            layout.manifest_path("alice", &id),
            PathBuf::from("/d/manifests/alice/app-1.json")
        );
    }

    #[test]
    fn scan_and_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StorageLayout::under(dir.path());
        let id = AppId::parse("app-1").unwrap();
        let app_dir = layout.app_dir("alice", "test", &id);
        fs::create_dir_all(&app_dir).unwrap();
        fs::create_dir_all(layout.apps_root().join("alice/test/Not Valid")).unwrap();

        let mut app = App::new(id.clone(), "alice", "test", app_dir.clone(), Utc::now());
        app.entrypoint_candidates = vec!["index.js".into()];
        app.entrypoint = Some("index.js".into());
        let manifest = AppManifest::from_app(&app, RuntimeKind::Node);
        layout.write_manifest(&manifest).unwrap();

        let folders = layout.scan().unwrap();
        assert_eq!(folders.len(), 1);
        assert_eq!(folders[0].owner, "alice");
        assert_eq!(folders[0].plan, "test");
        assert_eq!(folders[0].id, id);
        assert!(!app_dir.join("app-1.json").exists());

        let loaded = layout.read_manifest("alice", &id).unwrap();
        assert_eq!(loaded, manifest);
        loaded.check_matches(&folders[0]).unwrap();
        let rebuilt = loaded.to_app(&folders[0]);
        assert_eq!(rebuilt.workdir, app_dir);
        assert_eq!(rebuilt.runtime, "node");
        assert_eq!(rebuilt.entrypoint.as_deref(), Some("index.js"));
    }

    #[rstest]
    #[case::other_id("app-2", "alice", "test", None)]
    #[case::other_owner("app-1", "bob", "test", None)]
    #[case::other_plan("app-1", "alice", "enterprise", None)]
    #[case::escaping_entrypoint("app-1", "alice", "test", Some("../../bin/sh"))]
    #[case::unlisted_entrypoint("app-1", "alice", "test", Some("other.js"))]
    fn manifest_must_describe_its_folder(
        #[case] id: &str,
        #[case] owner: &str,
        #[case] plan: &str,
        #[case] entrypoint: Option<&str>,
    ) {
        let folder = AppFolder {
            owner: "alice".into(),
            plan: "test".into(),
            id: AppId::parse("app-1").unwrap(),
            path: PathBuf::from("/d/apps/alice/test/app-1"),
        };
        let mut app = App::new(AppId::parse(id).unwrap(), owner, plan, folder.path.clone(), Utc::now());
        app.entrypoint_candidates = vec!["index.js".into()];
        app.entrypoint = Some(entrypoint.unwrap_or("index.js").to_string());
        let manifest = AppManifest::from_app(&app, RuntimeKind::Node);

        assert_eq!(manifest.check_matches(&folder).unwrap_err().code, "manifest_mismatch");
    }

    #[test]
    fn scan_of_missing_root_is_empty() {
        let layout = StorageLayout::under(Path::new("/nonexistent/hangar"));
        assert!(layout.scan().unwrap().is_empty());
    }
}
