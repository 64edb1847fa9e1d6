//! Registry snapshot: JSON object keyed by App id.
//!
//! - Load is tolerant: a missing or unreadable file yields an empty map and a
//!   malformed entry is skipped with a warning.
//! - Save writes a sibling temp file, fsyncs it and renames over the target.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::domain::errors::PersistenceError;
use crate::domain::{App, AppId};

/// Load a snapshot. Never fails.
pub fn load_from_disk(path: &Path) -> HashMap<AppId, App> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return HashMap::new(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "registry snapshot unreadable, starting empty");
            return HashMap::new();
        }
    };

    let entries: serde_json::Map<String, serde_json::Value> = match serde_json::from_slice(&bytes)
    {
        Ok(entries) => entries,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "registry snapshot corrupt, starting empty");
            return HashMap::new();
        }
    };

    let mut apps = HashMap::with_capacity(entries.len());
    for (key, value) in entries {
        match serde_json::from_value::<App>(value) {
            Ok(app) => {
                if app.id.as_str() != key {
                    warn!(key = %key, app_id = %app.id, "snapshot key does not match app id, using app id");
                }
                apps.insert(app.id.clone(), app);
            }
            Err(e) => warn!(key = %key, error = %e, "skipping malformed registry entry"),
        }
    }
    apps
}

/// Serialize apps into the snapshot format (stable key order).
pub fn encode<'a>(apps: impl Iterator<Item = &'a App>) -> Result<Vec<u8>, PersistenceError> {
    let ordered: BTreeMap<&str, &App> = apps.map(|app| (app.id.as_str(), app)).collect();
    Ok(serde_json::to_vec_pretty(&ordered)?)
}

/// Write `bytes` to `path` via temp file + rename.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), PersistenceError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    let tmp_path = temp_path(path);
    {
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp_path, path)?;
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn app(id: &str) -> App {
        App::new(
            AppId::parse(id).unwrap(),
            "alice",
            "test",
            PathBuf::from("/tmp").join(id),
            Utc::now(),
        )
    }

    #[test]
    fn missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_from_disk(&dir.path().join("nope.json")).is_empty());
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("apps.json");
        let apps = [app("app-a"), app("app-b")];

        write_atomic(&path, &encode(apps.iter()).unwrap()).unwrap();
        let loaded = load_from_disk(&path);

        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[&AppId::parse("app-a").unwrap()], apps[0]);
        assert!(!temp_path(&path).exists());
    }

    #[test]
    fn malformed_entry_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("apps.json");
        let good = serde_json::to_value(app("app-good")).unwrap();
        let doc = serde_json::json!({
            "app-good": good,
            "app-bad": { "id": "app-bad", "status": "exploded" },
        });
        fs::write(&path, serde_json::to_vec(&doc).unwrap()).unwrap();

        let loaded = load_from_disk(&path);
        assert_eq!(loaded.len(), 1);
        assert!(loaded.contains_key(&AppId::parse("app-good").unwrap()));
    }

    #[test]
    fn corrupt_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("apps.json");
        fs::write(&path, b"{ not json").unwrap();
        assert!(load_from_disk(&path).is_empty());
    }
}
