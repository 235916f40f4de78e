//! SSH profile store: named remote targets. Unlike every
//! other named store, names collide case-insensitively here -- that
//! asymmetry is part of the contract, not an oversight.

use crate::config::config_dir;
use crate::template::write_atomic;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshProfile {
    pub name: String,
    pub host: String,
    pub username: String,
    pub port: u16,
    pub identity_file: Option<String>,
    pub default_directory: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

const DEFAULT_PORT: u16 = 22;

fn store_path() -> std::path::PathBuf {
    config_dir().join("ssh_profiles.json")
}

#[derive(Clone)]
pub struct SshProfileStore {
    inner: Arc<Mutex<HashMap<String, SshProfile>>>,
}

impl SshProfileStore {
    pub async fn load() -> Self {
        let map = match tokio::fs::read_to_string(store_path()).await {
            Ok(text) => serde_json::from_str(&text).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "malformed ssh_profiles.json, starting empty");
                HashMap::new()
            }),
            Err(_) => HashMap::new(),
        };
        Self { inner: Arc::new(Mutex::new(map)) }
    }

    async fn find_key_ci(&self, name: &str) -> Option<String> {
        let guard = self.inner.lock().await;
        guard.keys().find(|k| k.eq_ignore_ascii_case(name)).cloned()
    }

    pub async fn save(
        &self,
        name: &str,
        host: &str,
        username: &str,
        port: Option<u16>,
        identity_file: Option<String>,
        default_directory: Option<String>,
    ) -> Result<SshProfile, String> {
        let existing_key = self.find_key_ci(name).await;
        let key = existing_key.unwrap_or_else(|| name.to_string());

        let existing_created_at = {
            let guard = self.inner.lock().await;
            guard.get(&key).map(|p| p.created_at)
        };

        let profile = SshProfile {
            name: name.to_string(),
            host: host.to_string(),
            username: username.to_string(),
            port: port.unwrap_or(DEFAULT_PORT),
            identity_file,
            default_directory,
            created_at: existing_created_at.unwrap_or_else(Utc::now),
            last_used_at: None,
        };

        {
            let mut guard = self.inner.lock().await;
            guard.insert(key, profile.clone());
        }
        self.persist().await;
        Ok(profile)
    }

    pub async fn get(&self, name: &str) -> Result<SshProfile, String> {
        let key = self.find_key_ci(name).await.ok_or_else(|| format!("no SSH profile named '{name}'"))?;
        let guard = self.inner.lock().await;
        Ok(guard.get(&key).unwrap().clone())
    }

    pub async fn list(&self) -> Vec<SshProfile> {
        self.inner.lock().await.values().cloned().collect()
    }

    pub async fn delete(&self, name_or_id: &str) -> Result<(), String> {
        let key = self
            .find_key_ci(name_or_id)
            .await
            .ok_or_else(|| format!("no SSH profile named '{name_or_id}'"))?;
        self.inner.lock().await.remove(&key);
        self.persist().await;
        Ok(())
    }

    async fn persist(&self) {
        let guard = self.inner.lock().await;
        match serde_json::to_string_pretty(&*guard) {
            Ok(json) => {
                if let Err(e) = write_atomic(&store_path(), &json).await {
                    tracing::warn!(error = %e, "failed to persist ssh_profiles.json");
                }
            }
            Err(e) => tracing::warn!(error = %e, "failed to serialize SSH profiles"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn names_collide_case_insensitively() {
        let store = SshProfileStore { inner: Arc::new(Mutex::new(HashMap::new())) };
        store.save("Prod", "prod.example.com", "deploy", None, None, None).await.unwrap();
        let result = store.save("PROD", "prod2.example.com", "deploy", None, None, None).await.unwrap();
        assert_eq!(store.list().await.len(), 1);
        assert_eq!(result.host, "prod2.example.com");
    }

    #[tokio::test]
    async fn get_is_case_insensitive() {
        let store = SshProfileStore { inner: Arc::new(Mutex::new(HashMap::new())) };
        store.save("Prod", "prod.example.com", "deploy", None, None, None).await.unwrap();
        assert!(store.get("prod").await.is_ok());
    }

    #[tokio::test]
    async fn default_port_is_22() {
        let store = SshProfileStore { inner: Arc::new(Mutex::new(HashMap::new())) };
        let p = store.save("x", "h", "u", None, None, None).await.unwrap();
        assert_eq!(p.port, 22);
    }
}
