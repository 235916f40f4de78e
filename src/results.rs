//! Result store & asynchronous retrieval.
//!
//! Concurrent-safe map from command id to [`CommandResult`], with a reserved
//! `"last"` alias always pointing at the most recent insertion. Retrieval by
//! id first checks memory; on miss it falls back to the on-disk result file
//! written by the terminal-mediated channel.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// The canonical execution record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResult {
    pub id: String,
    pub command: String,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub completed_at: DateTime<Utc>,
}

const ALIAS_LAST: &str = "last";

/// Prefix shared with the terminal-mediated channel's output files.
pub const RESULT_FILE_PREFIX: &str = "claude_output_";

/// Cap on the ordered history kept for `list_recent_commands` and the
/// self-check error-rate window. Not part of the CommandResult index proper.
const MAX_HISTORY: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusFilter {
    All,
    Success,
    Failed,
}

#[derive(Clone)]
pub struct ResultStore {
    inner: Arc<Mutex<HashMap<String, CommandResult>>>,
    history: Arc<Mutex<Vec<CommandResult>>>,
}

impl ResultStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
            history: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Insert a completed result, update the `"last"` alias, and append to
    /// the bounded history list used for recency queries.
    pub async fn store(&self, result: CommandResult) {
        let mut guard = self.inner.lock().await;
        guard.insert(ALIAS_LAST.to_string(), result.clone());
        guard.insert(result.id.clone(), result.clone());
        drop(guard);

        let mut history = self.history.lock().await;
        history.push(result);
        if history.len() > MAX_HISTORY {
            let overflow = history.len() - MAX_HISTORY;
            history.drain(0..overflow);
        }
    }

    /// Most recent commands, newest first, optionally filtered by status
    /// and/or a substring search over the command text.
    pub async fn recent(&self, limit: usize, status: StatusFilter, search: Option<&str>) -> Vec<CommandResult> {
        let history = self.history.lock().await;
        history
            .iter()
            .rev()
            .filter(|r| match status {
                StatusFilter::All => true,
                StatusFilter::Success => r.exit_code == 0,
                StatusFilter::Failed => r.exit_code != 0,
            })
            .filter(|r| search.is_none_or(|q| r.command.contains(q)))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Fraction of the last `n` completed commands that failed (non-zero
    /// exit code). `0.0` if there is no history yet.
    pub async fn recent_error_rate(&self, n: usize) -> f64 {
        let history = self.history.lock().await;
        let window: Vec<&CommandResult> = history.iter().rev().take(n).collect();
        if window.is_empty() {
            return 0.0;
        }
        let failed = window.iter().filter(|r| r.exit_code != 0).count();
        failed as f64 / window.len() as f64
    }

    /// Retrieve by id (or `"last"`). On a memory miss for a concrete id, fall
    /// back to the on-disk result file; a hit there warms the cache.
    ///
    /// On a miss in both places, the returned error lists the most recent
    /// five on-disk result filenames -- a debugging contract preserved from
    /// the original tool.
    pub async fn get(&self, id: &str) -> Result<CommandResult, String> {
        {
            let guard = self.inner.lock().await;
            if let Some(r) = guard.get(id) {
                return Ok(r.clone());
            }
        }

        if id != ALIAS_LAST {
            if let Some(result) = self.read_from_disk(id).await {
                self.store(result.clone()).await;
                return Ok(result);
            }
        }

        let recent = self.recent_disk_filenames(5).await;
        if recent.is_empty() {
            Err(format!("not found: no command result for id '{id}'"))
        } else {
            Err(format!(
                "not found: no command result for id '{id}'. Most recent on-disk results: {}",
                recent.join(", ")
            ))
        }
    }

    async fn read_from_disk(&self, id: &str) -> Option<CommandResult> {
        let path = std::env::temp_dir().join(format!("{RESULT_FILE_PREFIX}{id}.json"));
        let text = tokio::fs::read_to_string(&path).await.ok()?;
        match serde_json::from_str::<CommandResult>(&text) {
            Ok(r) => Some(r),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "result file unparseable, leaving for diagnosis");
                None
            }
        }
    }

    async fn recent_disk_filenames(&self, limit: usize) -> Vec<String> {
        let dir = std::env::temp_dir();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(e) => e,
            Err(_) => return Vec::new(),
        };
        let mut found: Vec<(std::time::SystemTime, String)> = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name().to_string_lossy().to_string();
            if !name.starts_with(RESULT_FILE_PREFIX) {
                continue;
            }
            if let Ok(meta) = entry.metadata().await {
                if let Ok(modified) = meta.modified() {
                    found.push((modified, name));
                }
            }
        }
        found.sort_by(|a, b| b.0.cmp(&a.0));
        found.into_iter().take(limit).map(|(_, n)| n).collect()
    }
}

impl Default for ResultStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Poll the result store on a fixed 2s cadence for up to 60 iterations
/// (two minutes) after dispatching a terminal-mediated execution. Returns a
/// composed message on first non-empty result, or the dispatch message
/// annotated with the command id on timeout so retrieval can resume later.
///
/// This loop is bounded and does not spawn background work of its own: it
/// runs cooperatively on the caller's request lifetime rather than as a
/// detached monitor, so a stuck or abandoned command never leaves an
/// orphaned background task behind.
pub async fn auto_retrieve(
    store: &ResultStore,
    id: &str,
    dispatch_message: &str,
) -> String {
    const INTERVAL: Duration = Duration::from_secs(2);
    const MAX_ITERATIONS: u32 = 60;

    let start = std::time::Instant::now();
    for _ in 0..MAX_ITERATIONS {
        if let Ok(result) = store.get(id).await {
            let elapsed = start.elapsed().as_secs_f64();
            return format!(
                "command '{id}' completed in {elapsed:.1}s (elapsed while waiting: {elapsed:.1}s): exit_code={} stdout={:?} stderr={:?}",
                result.exit_code, result.stdout, result.stderr
            );
        }
        tokio::time::sleep(INTERVAL).await;
    }

    format!("{dispatch_message} (still running after 2 minutes; retrieve later with id '{id}')")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(id: &str) -> CommandResult {
        CommandResult {
            id: id.to_string(),
            command: "echo hi".to_string(),
            stdout: "hi\n".to_string(),
            stderr: String::new(),
            exit_code: 0,
            completed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn last_alias_points_at_newest_insertion() {
        let store = ResultStore::new();
        store.store(sample("a")).await;
        store.store(sample("b")).await;
        let last = store.get("last").await.unwrap();
        assert_eq!(last.id, "b");
    }

    fn sample_with_exit(id: &str, exit_code: i32) -> CommandResult {
        CommandResult { exit_code, ..sample(id) }
    }

    #[tokio::test]
    async fn recent_filters_by_status_and_search() {
        let store = ResultStore::new();
        store.store(sample_with_exit("a", 0)).await;
        store.store(sample_with_exit("b", 1)).await;
        store.store(sample("c")).await;

        let failed = store.recent(10, StatusFilter::Failed, None).await;
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].id, "b");

        let searched = store.recent(10, StatusFilter::All, Some("echo")).await;
        assert_eq!(searched.len(), 3);
    }

    #[tokio::test]
    async fn recent_error_rate_over_window() {
        let store = ResultStore::new();
        for i in 0..10 {
            let exit = if i < 3 { 1 } else { 0 };
            store.store(sample_with_exit(&format!("id{i}"), exit)).await;
        }
        let rate = store.recent_error_rate(10).await;
        assert!((rate - 0.3).abs() < 1e-9);
    }

    #[tokio::test]
    async fn miss_reports_not_found() {
        let store = ResultStore::new();
        let err = store.get("nope").await.unwrap_err();
        assert!(err.contains("not found"));
    }
}
