//! Environment snapshot store: immutable captures of the
//! shell environment, one file per snapshot under `snapshots/<name>.json`.

use crate::config::config_dir;
use crate::template::write_atomic;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentSnapshot {
    pub name: String,
    pub variables: HashMap<String, String>,
    pub directory: String,
    pub captured_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EnvironmentDiff {
    pub added: Vec<(String, String)>,
    pub removed: Vec<(String, String)>,
    pub changed: Vec<(String, String, String)>,
}

fn snapshots_dir() -> std::path::PathBuf {
    config_dir().join("snapshots")
}

fn snapshot_path(name: &str) -> std::path::PathBuf {
    snapshots_dir().join(format!("{name}.json"))
}

/// In-memory cache over the one-file-per-snapshot layout. Reads fall back to
/// disk on a cache miss so a snapshot captured by a prior process instance
/// is still visible.
#[derive(Clone)]
pub struct SnapshotStore {
    cache: Arc<Mutex<HashMap<String, EnvironmentSnapshot>>>,
}

impl SnapshotStore {
    pub async fn load() -> Self {
        let mut map = HashMap::new();
        if let Ok(mut entries) = tokio::fs::read_dir(snapshots_dir()).await {
            while let Ok(Some(entry)) = entries.next_entry().await {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                if let Ok(text) = tokio::fs::read_to_string(&path).await {
                    match serde_json::from_str::<EnvironmentSnapshot>(&text) {
                        Ok(snap) => {
                            map.insert(snap.name.clone(), snap);
                        }
                        Err(e) => tracing::warn!(path = %path.display(), error = %e, "malformed snapshot file, skipping"),
                    }
                }
            }
        }
        Self { cache: Arc::new(Mutex::new(map)) }
    }

    pub async fn capture(&self, name: &str, variables: HashMap<String, String>, directory: String) -> Result<EnvironmentSnapshot, String> {
        let snapshot = EnvironmentSnapshot {
            name: name.to_string(),
            variables,
            directory,
            captured_at: Utc::now(),
        };
        let json = serde_json::to_string_pretty(&snapshot).map_err(|e| format!("failed to serialize snapshot: {e}"))?;
        write_atomic(&snapshot_path(name), &json).await?;
        self.cache.lock().await.insert(name.to_string(), snapshot.clone());
        Ok(snapshot)
    }

    pub async fn get(&self, name: &str) -> Result<EnvironmentSnapshot, String> {
        if let Some(snap) = self.cache.lock().await.get(name) {
            return Ok(snap.clone());
        }
        let text = tokio::fs::read_to_string(snapshot_path(name))
            .await
            .map_err(|_| format!("no snapshot named '{name}'"))?;
        let snapshot: EnvironmentSnapshot =
            serde_json::from_str(&text).map_err(|e| format!("snapshot '{name}' is malformed: {e}"))?;
        self.cache.lock().await.insert(name.to_string(), snapshot.clone());
        Ok(snapshot)
    }

    pub async fn diff(&self, from: &str, to: &str) -> Result<EnvironmentDiff, String> {
        let before = self.get(from).await?;
        let after = self.get(to).await?;

        let mut added = Vec::new();
        let mut changed = Vec::new();
        for (key, after_value) in &after.variables {
            match before.variables.get(key) {
                None => added.push((key.clone(), after_value.clone())),
                Some(before_value) if before_value != after_value => {
                    changed.push((key.clone(), before_value.clone(), after_value.clone()))
                }
                Some(_) => {}
            }
        }
        let removed = before
            .variables
            .iter()
            .filter(|(key, _)| !after.variables.contains_key(*key))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        Ok(EnvironmentDiff { added, removed, changed })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[tokio::test]
    async fn diff_reports_added_removed_changed() {
        let store = SnapshotStore { cache: Arc::new(Mutex::new(HashMap::new())) };
        store
            .cache
            .lock()
            .await
            .insert(
                "before".to_string(),
                EnvironmentSnapshot {
                    name: "before".to_string(),
                    variables: vars(&[("PATH", "/usr/bin"), ("OLD", "x")]),
                    directory: "/tmp".to_string(),
                    captured_at: Utc::now(),
                },
            );
        store
            .cache
            .lock()
            .await
            .insert(
                "after".to_string(),
                EnvironmentSnapshot {
                    name: "after".to_string(),
                    variables: vars(&[("PATH", "/opt/bin"), ("NEW", "y")]),
                    directory: "/tmp".to_string(),
                    captured_at: Utc::now(),
                },
            );

        let diff = store.diff("before", "after").await.unwrap();
        assert_eq!(diff.added, vec![("NEW".to_string(), "y".to_string())]);
        assert_eq!(diff.removed, vec![("OLD".to_string(), "x".to_string())]);
        assert_eq!(diff.changed, vec![("PATH".to_string(), "/usr/bin".to_string(), "/opt/bin".to_string())]);
    }

    #[tokio::test]
    async fn diff_on_missing_snapshot_errors() {
        let store = SnapshotStore { cache: Arc::new(Mutex::new(HashMap::new())) };
        assert!(store.diff("nope", "also-nope").await.is_err());
    }
}
