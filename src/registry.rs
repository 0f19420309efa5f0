//! Persistent registry of uploaded blob identities, one JSON document for
//! all projects, keyed by canonical project root path.
//!
//! The registry is additive: merges only ever union identities into an
//! entry. Writers serialize on a process-wide lock and persist through a
//! temp-file rename so a reader never observes a torn document.

use crate::error::BridgeError;
use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::{
    collections::{HashMap, HashSet},
    fs,
    path::Path,
};

static MERGE_LOCK: Mutex<()> = Mutex::new(());

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProjectsIndex(pub HashMap<String, Vec<String>>);

impl ProjectsIndex {
    pub fn load(path: &Path) -> Result<Self, BridgeError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path).map_err(|e| BridgeError::RegistryCorrupt {
            path: path.display().to_string(),
            detail: e.to_string(),
        })?;
        let map = serde_json::from_str::<HashMap<String, Vec<String>>>(&text).map_err(|e| {
            BridgeError::RegistryCorrupt {
                path: path.display().to_string(),
                detail: e.to_string(),
            }
        })?;
        Ok(Self(map))
    }

    /// Identity set currently recorded for a project; empty when absent.
    pub fn get(&self, project_key: &str) -> HashSet<String> {
        self.0
            .get(project_key)
            .map(|v| v.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn save_atomic(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let text = serde_json::to_string_pretty(&self.0)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, text).with_context(|| format!("write registry temp: {}", tmp.display()))?;
        fs::rename(&tmp, path)
            .with_context(|| format!("replace registry: {}", path.display()))?;
        Ok(())
    }

    /// Union `new_names` into the project's entry and persist the whole
    /// registry atomically. Returns the merged identity list. Concurrent
    /// callers are serialized, so no in-process merge can drop identities.
    pub fn merge_and_save(
        path: &Path,
        project_key: &str,
        new_names: &[String],
    ) -> Result<Vec<String>> {
        let _guard = MERGE_LOCK.lock();
        let mut index = Self::load(path)?;
        let entry = index.0.entry(project_key.to_string()).or_default();
        let seen: HashSet<String> = entry.iter().cloned().collect();
        for name in new_names {
            if !seen.contains(name) {
                entry.push(name.clone());
            }
        }
        let merged = entry.clone();
        index.save_atomic(path)?;
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_absent_is_empty() {
        let td = tempfile::tempdir().unwrap();
        let idx = ProjectsIndex::load(&td.path().join("projects.json")).unwrap();
        assert!(idx.0.is_empty());
    }

    #[test]
    fn load_corrupt_is_an_error() {
        let td = tempfile::tempdir().unwrap();
        let path = td.path().join("projects.json");
        fs::write(&path, "{not json").unwrap();
        let err = ProjectsIndex::load(&path).unwrap_err();
        assert!(matches!(err, BridgeError::RegistryCorrupt { .. }));
    }

    #[test]
    fn merge_is_a_union_and_keeps_order() {
        let td = tempfile::tempdir().unwrap();
        let path = td.path().join("projects.json");
        let a = vec!["x".to_string(), "y".to_string()];
        let merged = ProjectsIndex::merge_and_save(&path, "p", &a).unwrap();
        assert_eq!(merged, vec!["x", "y"]);

        let b = vec!["y".to_string(), "z".to_string()];
        let merged = ProjectsIndex::merge_and_save(&path, "p", &b).unwrap();
        assert_eq!(merged, vec!["x", "y", "z"]);

        let reloaded = ProjectsIndex::load(&path).unwrap();
        assert_eq!(reloaded.get("p").len(), 3);
    }

    #[test]
    fn merge_does_not_leave_temp_files() {
        let td = tempfile::tempdir().unwrap();
        let path = td.path().join("projects.json");
        ProjectsIndex::merge_and_save(&path, "p", &["a".to_string()]).unwrap();
        assert!(path.exists());
        assert!(!path.with_extension("json.tmp").exists());
    }
}
