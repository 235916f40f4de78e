//! File-watch engine.
//!
//! A central actor holds a map of rule id to (rule, OS subscription,
//! last-trigger instant). `notify`'s watcher callback runs on its own
//! thread and cannot await; it bridges into async land over an mpsc channel,
//! exactly the pattern used for watching a growing session log.

use crate::host::HostNotifier;
use crate::process;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use serde::Serialize;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::{mpsc, Mutex};

#[derive(Debug, Clone)]
pub struct WatchRule {
    pub path: PathBuf,
    pub extensions: Option<HashSet<String>>,
    pub command: String,
    pub working_directory: Option<String>,
    pub debounce: Duration,
    pub label: Option<String>,
    pub active: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct WatchInfo {
    pub id: String,
    pub path: String,
    pub command: String,
    pub label: Option<String>,
    pub active: bool,
}

struct ActiveWatch {
    rule: WatchRule,
    last_trigger: Option<Instant>,
    _watcher: RecommendedWatcher,
}

#[derive(Clone)]
pub struct WatchEngine {
    watches: Arc<Mutex<std::collections::HashMap<String, ActiveWatch>>>,
    notifier: Arc<dyn HostNotifier>,
}

impl WatchEngine {
    #[must_use]
    pub fn new(notifier: Arc<dyn HostNotifier>) -> Self {
        Self {
            watches: Arc::new(Mutex::new(std::collections::HashMap::new())),
            notifier,
        }
    }

    /// Validate the path, subscribe to directory write/rename/delete events
    /// (on the parent directory if the target is a file), and start the
    /// dispatch loop.
    pub async fn add_rule(&self, mut rule: WatchRule) -> Result<String, String> {
        if !rule.path.exists() {
            return Err(format!("watch path does not exist: {}", rule.path.display()));
        }
        let target = if rule.path.is_file() {
            rule.path.parent().map(PathBuf::from).ok_or_else(|| "file has no parent directory".to_string())?
        } else {
            rule.path.clone()
        };

        let (tx, rx) = mpsc::channel::<()>(64);
        let mut watcher = notify::recommended_watcher(move |res: Result<notify::Event, notify::Error>| {
            if res.is_ok() {
                let _ = tx.blocking_send(());
            }
        })
        .map_err(|e| format!("failed to create file watcher: {e}"))?;
        watcher
            .watch(&target, RecursiveMode::NonRecursive)
            .map_err(|e| format!("failed to subscribe to {}: {e}", target.display()))?;

        rule.active = true;
        let id = uuid::Uuid::new_v4().to_string();

        {
            let mut guard = self.watches.lock().await;
            guard.insert(
                id.clone(),
                ActiveWatch {
                    rule,
                    last_trigger: None,
                    _watcher: watcher,
                },
            );
        }

        self.spawn_dispatch_loop(id.clone(), target, rx);
        Ok(id)
    }

    fn spawn_dispatch_loop(&self, id: String, watched_dir: PathBuf, mut rx: mpsc::Receiver<()>) {
        let watches = self.watches.clone();
        let notifier = self.notifier.clone();
        tokio::spawn(async move {
            while rx.recv().await.is_some() {
                let (command, working_directory, label, should_run) = {
                    let mut guard = watches.lock().await;
                    let Some(entry) = guard.get_mut(&id) else {
                        return;
                    };
                    if !entry.rule.active {
                        continue;
                    }
                    let now = Instant::now();
                    if let Some(last) = entry.last_trigger {
                        if now.duration_since(last) < entry.rule.debounce {
                            continue;
                        }
                    }

                    if let Some(extensions) = &entry.rule.extensions {
                        let since = SystemTime::now()
                            .checked_sub(entry.rule.debounce + Duration::from_secs(1))
                            .unwrap_or(SystemTime::UNIX_EPOCH);
                        if !any_matching_file_modified_since(&watched_dir, extensions, since) {
                            continue;
                        }
                    }

                    entry.last_trigger = Some(now);
                    (
                        entry.rule.command.clone(),
                        entry.rule.working_directory.clone(),
                        entry.rule.label.clone(),
                        true,
                    )
                };

                if !should_run {
                    continue;
                }

                let notifier = notifier.clone();
                let title = label.clone().unwrap_or_else(|| "file watch".to_string());
                tokio::spawn(async move {
                    let result = process::run(&command, working_directory.as_deref(), None).await;
                    let summary = if result.exit_code == 0 {
                        format!("{title}: command succeeded ({})", truncate_line(&result.stdout))
                    } else {
                        format!("{title}: command failed with exit code {}", result.exit_code)
                    };
                    notifier.notify(&title, &summary).await;
                });
            }
        });
    }

    pub async fn pause(&self, id: &str) -> Result<(), String> {
        let mut guard = self.watches.lock().await;
        let entry = guard.get_mut(id).ok_or_else(|| format!("no watch with id {id}"))?;
        entry.rule.active = false;
        Ok(())
    }

    pub async fn resume(&self, id: &str) -> Result<(), String> {
        let mut guard = self.watches.lock().await;
        let entry = guard.get_mut(id).ok_or_else(|| format!("no watch with id {id}"))?;
        entry.rule.active = true;
        Ok(())
    }

    /// Drop the subscription (its `Drop` impl closes the OS descriptor) and
    /// delete the entry.
    pub async fn remove(&self, id: &str) -> Result<(), String> {
        let mut guard = self.watches.lock().await;
        guard.remove(id).map(|_| ()).ok_or_else(|| format!("no watch with id {id}"))
    }

    /// Release every subscription. Guaranteed to drop all descriptors even
    /// if the map is non-empty on entry.
    pub async fn remove_all(&self) -> usize {
        let mut guard = self.watches.lock().await;
        let n = guard.len();
        guard.clear();
        n
    }

    pub async fn list(&self) -> Vec<WatchInfo> {
        let guard = self.watches.lock().await;
        guard
            .iter()
            .map(|(id, w)| WatchInfo {
                id: id.clone(),
                path: w.rule.path.display().to_string(),
                command: w.rule.command.clone(),
                label: w.rule.label.clone(),
                active: w.rule.active,
            })
            .collect()
    }
}

fn any_matching_file_modified_since(dir: &PathBuf, extensions: &HashSet<String>, since: SystemTime) -> bool {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return false;
    };
    for entry in entries.flatten() {
        let Ok(meta) = entry.metadata() else { continue };
        let Ok(modified) = meta.modified() else { continue };
        if modified < since {
            continue;
        }
        let ext = entry.path().extension().map(|e| e.to_string_lossy().to_lowercase());
        if let Some(ext) = ext {
            if extensions.contains(&ext) {
                return true;
            }
        }
    }
    false
}

fn truncate_line(s: &str) -> String {
    let first = s.lines().next().unwrap_or("");
    if first.len() > 120 {
        format!("{}...", &first[..120])
    } else {
        first.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoOpNotifier;
    #[async_trait::async_trait]
    impl HostNotifier for NoOpNotifier {
        async fn notify(&self, _title: &str, _message: &str) {}
    }

    #[tokio::test]
    async fn add_rule_rejects_missing_path() {
        let engine = WatchEngine::new(Arc::new(NoOpNotifier));
        let rule = WatchRule {
            path: PathBuf::from("/definitely/does/not/exist"),
            extensions: None,
            command: "echo hi".to_string(),
            working_directory: None,
            debounce: Duration::from_secs(1),
            label: None,
            active: true,
        };
        assert!(engine.add_rule(rule).await.is_err());
    }

    #[tokio::test]
    async fn remove_all_releases_every_entry() {
        let dir = tempfile::tempdir().unwrap();
        let engine = WatchEngine::new(Arc::new(NoOpNotifier));
        for _ in 0..3 {
            let rule = WatchRule {
                path: dir.path().to_path_buf(),
                extensions: None,
                command: "echo hi".to_string(),
                working_directory: None,
                debounce: Duration::from_secs(1),
                label: None,
                active: true,
            };
            engine.add_rule(rule).await.unwrap();
        }
        assert_eq!(engine.list().await.len(), 3);
        let removed = engine.remove_all().await;
        assert_eq!(removed, 3);
        assert!(engine.list().await.is_empty());
    }

    #[tokio::test]
    async fn pause_then_resume_roundtrips_active_flag() {
        let dir = tempfile::tempdir().unwrap();
        let engine = WatchEngine::new(Arc::new(NoOpNotifier));
        let rule = WatchRule {
            path: dir.path().to_path_buf(),
            extensions: None,
            command: "echo hi".to_string(),
            working_directory: None,
            debounce: Duration::from_secs(1),
            label: None,
            active: true,
        };
        let id = engine.add_rule(rule).await.unwrap();
        engine.pause(&id).await.unwrap();
        assert!(!engine.list().await[0].active);
        engine.resume(&id).await.unwrap();
        assert!(engine.list().await[0].active);
    }
}
