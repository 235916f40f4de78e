//! Command template store.
//!
//! Named, reusable command skeletons with `{{identifier}}` placeholders.
//! Mirrors every write to `templates.json` under the user's configuration
//! directory; a malformed file on startup yields an empty store rather than
//! a crash.

use crate::config::config_dir;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, LazyLock};
use tokio::sync::Mutex;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{\{([A-Za-z_][A-Za-z0-9_]*)\}\}").unwrap());

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandTemplate {
    pub name: String,
    pub template: String,
    pub variables: Vec<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Distinct identifiers syntactically appearing as `{{identifier}}`
/// placeholders, in first-appearance order.
#[must_use]
pub fn extract_variables(template: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut variables = Vec::new();
    for cap in PLACEHOLDER.captures_iter(template) {
        let name = cap[1].to_string();
        if seen.insert(name.clone()) {
            variables.push(name);
        }
    }
    variables
}

/// Substitute every `{{identifier}}` in `template` with the matching entry
/// from `values`. Fails if any placeholder's identifier has no value.
pub fn render(template: &str, values: &HashMap<String, String>) -> Result<String, String> {
    let mut missing = Vec::new();
    let rendered = PLACEHOLDER.replace_all(template, |caps: &regex::Captures| {
        let key = &caps[1];
        match values.get(key) {
            Some(v) => v.clone(),
            None => {
                missing.push(key.to_string());
                String::new()
            }
        }
    });
    if !missing.is_empty() {
        return Err(format!("missing required variable(s): {}", missing.join(", ")));
    }
    Ok(rendered.into_owned())
}

fn store_path() -> std::path::PathBuf {
    config_dir().join("templates.json")
}

#[derive(Clone)]
pub struct TemplateStore {
    inner: Arc<Mutex<HashMap<String, CommandTemplate>>>,
}

impl TemplateStore {
    /// Populate from disk on startup. Malformed or missing files start empty.
    pub async fn load() -> Self {
        let map = match tokio::fs::read_to_string(store_path()).await {
            Ok(text) => serde_json::from_str(&text).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "malformed templates.json, starting empty");
                HashMap::new()
            }),
            Err(_) => HashMap::new(),
        };
        Self { inner: Arc::new(Mutex::new(map)) }
    }

    pub async fn save(&self, name: &str, template: &str, description: Option<String>, category: Option<String>) -> Result<CommandTemplate, String> {
        let entry = CommandTemplate {
            name: name.to_string(),
            template: template.to_string(),
            variables: extract_variables(template),
            description,
            category,
            created_at: Utc::now(),
        };
        {
            let mut guard = self.inner.lock().await;
            guard.insert(name.to_string(), entry.clone());
        }
        self.persist().await;
        Ok(entry)
    }

    pub async fn run(&self, name: &str, values: &HashMap<String, String>) -> Result<String, String> {
        let template = {
            let guard = self.inner.lock().await;
            guard.get(name).ok_or_else(|| format!("no template named '{name}'"))?.template.clone()
        };
        render(&template, values)
    }

    pub async fn list(&self) -> Vec<CommandTemplate> {
        self.inner.lock().await.values().cloned().collect()
    }

    async fn persist(&self) {
        let guard = self.inner.lock().await;
        match serde_json::to_string_pretty(&*guard) {
            Ok(json) => {
                if let Err(e) = write_atomic(&store_path(), &json).await {
                    tracing::warn!(error = %e, "failed to persist templates.json");
                }
            }
            Err(e) => tracing::warn!(error = %e, "failed to serialize templates"),
        }
    }
}

pub(crate) async fn write_atomic(path: &std::path::Path, content: &str) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(|e| format!("failed to create {}: {e}", parent.display()))?;
    }
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, content).await.map_err(|e| format!("failed to write {}: {e}", tmp.display()))?;
    tokio::fs::rename(&tmp, path).await.map_err(|e| format!("failed to rename into {}: {e}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_variables_is_distinct_and_ordered() {
        let vars = extract_variables("deploy {{env}} to {{region}} as {{env}}");
        assert_eq!(vars, vec!["env", "region"]);
    }

    #[test]
    fn render_substitutes_every_placeholder() {
        let mut values = HashMap::new();
        values.insert("env".to_string(), "staging".to_string());
        let out = render("deploy to {{env}}", &values).unwrap();
        assert_eq!(out, "deploy to staging");
    }

    #[test]
    fn render_rejects_missing_variable() {
        let values = HashMap::new();
        assert!(render("deploy to {{env}}", &values).is_err());
    }

    #[tokio::test]
    async fn save_then_run_round_trips() {
        let store = TemplateStore { inner: Arc::new(Mutex::new(HashMap::new())) };
        store.save("deploy", "deploy {{env}}", None, None).await.unwrap();
        let mut values = HashMap::new();
        values.insert("env".to_string(), "prod".to_string());
        let rendered = store.run("deploy", &values).await.unwrap();
        assert_eq!(rendered, "deploy prod");
    }
}
