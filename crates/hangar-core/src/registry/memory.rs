//! In-memory App registry mirrored to a JSON snapshot.

use std::collections::HashMap;
use std::path::PathBuf;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::snapshot;
use crate::domain::errors::PersistenceError;
use crate::domain::{App, AppId};

/// Registry state behind the lock.
struct RegistryState {
    /// All App records (single source of truth).
    apps: HashMap<AppId, App>,

    /// Bumped on every mutation; orders snapshot writes.
    generation: u64,
}

/// Write-through snapshot target.
struct SnapshotWriter {
    path: PathBuf,
    /// Generation of the newest snapshot handed to the filesystem.
    last_written: Mutex<u64>,
}

/// Canonical store of App records.
///
/// Design:
/// - The map is private; every read returns clones and every write goes
///   through `put` / `update` / `delete` / `remove_if`.
/// - `update` applies a closure under the lock, so a read-modify-write on one
///   App never interleaves with another writer.
/// - Persistence is best-effort: failures are logged and the next mutation
///   retries with a fresh snapshot.
pub struct AppRegistry {
    state: Mutex<RegistryState>,
    snapshot: Option<SnapshotWriter>,
}

impl AppRegistry {
    /// Registry without persistence.
    pub fn in_memory() -> Self {
        Self::with_apps(HashMap::new(), None)
    }

    /// Load from `path` (tolerant) and mirror every mutation back to it.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let apps = snapshot::load_from_disk(&path);
        debug!(path = %path.display(), count = apps.len(), "registry loaded");
        Self::with_apps(apps, Some(path))
    }

    fn with_apps(apps: HashMap<AppId, App>, path: Option<PathBuf>) -> Self {
        Self {
            state: Mutex::new(RegistryState {
                apps,
                generation: 0,
            }),
            snapshot: path.map(|path| SnapshotWriter {
                path,
                last_written: Mutex::new(0),
            }),
        }
    }

    /// Insert or replace.
    pub async fn put(&self, app: App) {
        let pending = {
            let mut state = self.state.lock().await;
            state.apps.insert(app.id.clone(), app);
            self.stage(&mut state)
        };
        self.flush(pending).await;
    }

    /// Insert only if no record with the same id exists. Returns whether it was inserted.
    pub async fn put_if_absent(&self, app: App) -> bool {
        let pending = {
            let mut state = self.state.lock().await;
            if state.apps.contains_key(&app.id) {
                return false;
            }
            state.apps.insert(app.id.clone(), app);
            self.stage(&mut state)
        };
        self.flush(pending).await;
        true
    }

    pub async fn get(&self, id: &AppId) -> Option<App> {
        self.state.lock().await.apps.get(id).cloned()
    }

    pub async fn delete(&self, id: &AppId) -> Option<App> {
        self.remove_if(id, |_| true).await
    }

    /// Remove the App only if `pred` holds at removal time.
    pub async fn remove_if<F>(&self, id: &AppId, pred: F) -> Option<App>
    where
        F: FnOnce(&App) -> bool,
    {
        let (removed, pending) = {
            let mut state = self.state.lock().await;
            let matches = state.apps.get(id).is_some_and(pred);
            if !matches {
                return None;
            }
            let removed = state.apps.remove(id);
            (removed, self.stage(&mut state))
        };
        self.flush(pending).await;
        removed
    }

    /// Atomic read-modify-write of one App. Returns `None` if the App is gone.
    pub async fn update<F, R>(&self, id: &AppId, f: F) -> Option<R>
    where
        F: FnOnce(&mut App) -> R,
    {
        let (result, pending) = {
            let mut state = self.state.lock().await;
            let app = state.apps.get_mut(id)?;
            let result = f(app);
            (result, self.stage(&mut state))
        };
        self.flush(pending).await;
        Some(result)
    }

    pub async fn list(&self) -> Vec<App> {
        let state = self.state.lock().await;
        let mut apps: Vec<App> = state.apps.values().cloned().collect();
        apps.sort_by(|a, b| a.id.cmp(&b.id));
        apps
    }

    pub async fn list_by_owner(&self, owner: &str) -> Vec<App> {
        let state = self.state.lock().await;
        let mut apps: Vec<App> = state
            .apps
            .values()
            .filter(|app| app.owner == owner)
            .cloned()
            .collect();
        apps.sort_by(|a, b| a.id.cmp(&b.id));
        apps
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.apps.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Bump the generation and encode under the lock.
    fn stage(&self, state: &mut RegistryState) -> Option<(u64, Vec<u8>)> {
        self.snapshot.as_ref()?;
        state.generation += 1;
        match snapshot::encode(state.apps.values()) {
            Ok(bytes) => Some((state.generation, bytes)),
            Err(e) => {
                warn!(error = %e, "registry snapshot encode failed");
                None
            }
        }
    }

    /// Write a staged snapshot unless a newer one already went out.
    async fn flush(&self, pending: Option<(u64, Vec<u8>)>) {
        let (Some(writer), Some((generation, bytes))) = (&self.snapshot, pending) else {
            return;
        };
        let mut last_written = writer.last_written.lock().await;
        if generation <= *last_written {
            return;
        }
        *last_written = generation;

        let path = writer.path.clone();
        let result = tokio::task::spawn_blocking(move || snapshot::write_atomic(&path, &bytes))
            .await
            .map_err(|e| PersistenceError::Join(e.to_string()))
            .and_then(|r| r);
        if let Err(e) = result {
            warn!(path = %writer.path.display(), error = %e, "registry snapshot write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::AppStatus;
    use chrono::Utc;
    use std::sync::Arc;

    fn app(id: &str, owner: &str) -> App {
        App::new(
            AppId::parse(id).unwrap(),
            owner,
            "test",
            PathBuf::from("/tmp").join(id),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn put_get_delete() {
        let reg = AppRegistry::in_memory();
        let a = app("app-a", "alice");
        reg.put(a.clone()).await;

        assert_eq!(reg.get(&a.id).await, Some(a.clone()));
        assert_eq!(reg.delete(&a.id).await.map(|x| x.id), Some(a.id.clone()));
        assert!(reg.get(&a.id).await.is_none());
        assert!(reg.delete(&a.id).await.is_none());
    }

    #[tokio::test]
    async fn list_by_owner_filters() {
        let reg = AppRegistry::in_memory();
        reg.put(app("app-a", "alice")).await;
        reg.put(app("app-b", "bob")).await;
        reg.put(app("app-c", "alice")).await;

        let ids: Vec<String> = reg
            .list_by_owner("alice")
            .await
            .into_iter()
            .map(|a| a.id.to_string())
            .collect();
        assert_eq!(ids, vec!["app-a", "app-c"]);
    }

    #[tokio::test]
    async fn update_missing_returns_none() {
        let reg = AppRegistry::in_memory();
        let id = AppId::parse("app-x").unwrap();
        assert!(reg.update(&id, |a| a.missing_cycles += 1).await.is_none());
    }

    #[tokio::test]
    async fn concurrent_updates_do_not_lose_writes() {
        let reg = Arc::new(AppRegistry::in_memory());
        let a = app("app-a", "alice");
        reg.put(a.clone()).await;

        let mut joins = Vec::new();
        for _ in 0..50 {
            let reg = Arc::clone(&reg);
            let id = a.id.clone();
            joins.push(tokio::spawn(async move {
                reg.update(&id, |app| app.missing_cycles += 1).await;
            }));
        }
        for j in joins {
            j.await.unwrap();
        }
        assert_eq!(reg.get(&a.id).await.unwrap().missing_cycles, 50);
    }

    #[tokio::test]
    async fn remove_if_checks_predicate_atomically() {
        let reg = AppRegistry::in_memory();
        let a = app("app-a", "alice");
        reg.put(a.clone()).await;

        assert!(reg
            .remove_if(&a.id, |app| app.status == AppStatus::Running)
            .await
            .is_none());
        assert!(reg
            .remove_if(&a.id, |app| app.status == AppStatus::Provisioning)
            .await
            .is_some());
        assert!(reg.remove_if(&a.id, |_| true).await.is_none());
    }

    #[tokio::test]
    async fn mutations_are_mirrored_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("apps.json");

        let reg = AppRegistry::open(&path);
        let a = app("app-a", "alice");
        reg.put(a.clone()).await;
        reg.update(&a.id, |app| {
            app.transition(AppStatus::Running).unwrap();
        })
        .await;
        reg.put(app("app-b", "bob")).await;
        reg.delete(&AppId::parse("app-b").unwrap()).await;

        let reopened = AppRegistry::open(&path);
        let apps = reopened.list().await;
        assert_eq!(apps.len(), 1);
        assert_eq!(apps[0].status, AppStatus::Running);
    }

    #[tokio::test]
    async fn put_if_absent_keeps_existing() {
        let reg = AppRegistry::in_memory();
        let mut a = app("app-a", "alice");
        assert!(reg.put_if_absent(a.clone()).await);
        a.display_name = "changed".into();
        assert!(!reg.put_if_absent(a.clone()).await);
        assert_eq!(reg.get(&a.id).await.unwrap().display_name, "app-a");
    }
}
