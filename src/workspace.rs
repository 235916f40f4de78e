//! Workspace profile store: named bundles of a working
//! directory, default commands, and an environment overlay.

use crate::config::config_dir;
use crate::template::write_atomic;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceProfile {
    pub name: String,
    pub directory: String,
    pub default_commands: Vec<String>,
    pub environment: HashMap<String, String>,
    pub preferred_terminal: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

fn store_path() -> std::path::PathBuf {
    config_dir().join("profiles.json")
}

#[derive(Clone)]
pub struct WorkspaceStore {
    inner: Arc<Mutex<HashMap<String, WorkspaceProfile>>>,
}

impl WorkspaceStore {
    pub async fn load() -> Self {
        let map = match tokio::fs::read_to_string(store_path()).await {
            Ok(text) => serde_json::from_str(&text).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "malformed profiles.json, starting empty");
                HashMap::new()
            }),
            Err(_) => HashMap::new(),
        };
        Self { inner: Arc::new(Mutex::new(map)) }
    }

    pub async fn save(
        &self,
        name: &str,
        directory: &str,
        default_commands: Vec<String>,
        environment: HashMap<String, String>,
        preferred_terminal: Option<String>,
    ) -> WorkspaceProfile {
        let existing_created_at = {
            let guard = self.inner.lock().await;
            guard.get(name).map(|p| p.created_at)
        };
        let profile = WorkspaceProfile {
            name: name.to_string(),
            directory: directory.to_string(),
            default_commands,
            environment,
            preferred_terminal,
            created_at: existing_created_at.unwrap_or_else(Utc::now),
            last_used_at: None,
        };
        {
            let mut guard = self.inner.lock().await;
            guard.insert(name.to_string(), profile.clone());
        }
        self.persist().await;
        profile
    }

    /// Load a profile and mark it used; every successful load updates
    /// `last_used_at`.
    pub async fn load_profile(&self, name: &str) -> Result<WorkspaceProfile, String> {
        let mut guard = self.inner.lock().await;
        let profile = guard.get_mut(name).ok_or_else(|| format!("no workspace profile named '{name}'"))?;
        profile.last_used_at = Some(Utc::now());
        let result = profile.clone();
        drop(guard);
        self.persist().await;
        Ok(result)
    }

    pub async fn list(&self) -> Vec<WorkspaceProfile> {
        self.inner.lock().await.values().cloned().collect()
    }

    pub async fn delete(&self, name: &str) -> Result<(), String> {
        let removed = {
            let mut guard = self.inner.lock().await;
            guard.remove(name).is_some()
        };
        if removed {
            self.persist().await;
            Ok(())
        } else {
            Err(format!("no workspace profile named '{name}'"))
        }
    }

    async fn persist(&self) {
        let guard = self.inner.lock().await;
        match serde_json::to_string_pretty(&*guard) {
            Ok(json) => {
                if let Err(e) = write_atomic(&store_path(), &json).await {
                    tracing::warn!(error = %e, "failed to persist profiles.json");
                }
            }
            Err(e) => tracing::warn!(error = %e, "failed to serialize workspace profiles"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn load_profile_updates_last_used() {
        let store = WorkspaceStore { inner: Arc::new(Mutex::new(HashMap::new())) };
        store.save("api", "/code/api", vec!["cargo test".to_string()], HashMap::new(), None).await;
        let loaded = store.load_profile("api").await.unwrap();
        assert!(loaded.last_used_at.is_some());
    }

    #[tokio::test]
    async fn delete_missing_profile_errors() {
        let store = WorkspaceStore { inner: Arc::new(Mutex::new(HashMap::new())) };
        assert!(store.delete("nope").await.is_err());
    }
}
