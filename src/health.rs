//! Health & startup housekeeping.

use crate::config::Config;
use crate::results::ResultStore;
use serde::Serialize;
use std::time::{Duration, SystemTime};

const ORPHAN_FILE_PREFIXES: &[&str] = &["claude_script_", "claude_output_", "claude_stream_"];
const ORPHAN_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);
const ORPHAN_WARN_THRESHOLD: usize = 50;
const ERROR_RATE_WARN_THRESHOLD: f64 = 0.3;
const ERROR_RATE_WINDOW: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthLevel {
    Healthy,
    Warning,
}

#[derive(Debug, Clone, Serialize)]
pub struct SelfCheckReport {
    pub level: HealthLevel,
    pub config_valid: bool,
    pub history_store_reachable: bool,
    pub preferred_terminal_running: Option<bool>,
    pub temp_dir_writable: bool,
    pub orphan_file_count: usize,
    pub recent_error_rate: f64,
    pub notes: Vec<String>,
}

/// Remove orphaned execution-substrate files older than 24h from the system
/// temp directory. Runs once at startup.
pub async fn cleanup_orphans_on_startup() {
    let dir = std::env::temp_dir();
    let Ok(mut entries) = tokio::fs::read_dir(&dir).await else {
        return;
    };
    let cutoff = SystemTime::now().checked_sub(ORPHAN_MAX_AGE).unwrap_or(SystemTime::UNIX_EPOCH);
    let mut removed = 0usize;

    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name().to_string_lossy().to_string();
        if !ORPHAN_FILE_PREFIXES.iter().any(|p| name.starts_with(p)) {
            continue;
        }
        let Ok(meta) = entry.metadata().await else { continue };
        let Ok(modified) = meta.modified() else { continue };
        if modified < cutoff {
            if tokio::fs::remove_file(entry.path()).await.is_ok() {
                removed += 1;
            }
        }
    }

    if removed > 0 {
        tracing::info!(removed, "startup housekeeping removed orphaned execution files");
    }
}

async fn count_orphans() -> usize {
    let dir = std::env::temp_dir();
    let Ok(mut entries) = tokio::fs::read_dir(&dir).await else {
        return 0;
    };
    let mut count = 0usize;
    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name().to_string_lossy().to_string();
        if ORPHAN_FILE_PREFIXES.iter().any(|p| name.starts_with(p)) {
            count += 1;
        }
    }
    count
}

async fn temp_dir_writable() -> bool {
    let probe = std::env::temp_dir().join(format!("devbridge_writecheck_{}", uuid::Uuid::new_v4()));
    let ok = tokio::fs::write(&probe, b"ok").await.is_ok();
    let _ = tokio::fs::remove_file(&probe).await;
    ok
}

/// `history_store_reachable` is a stub over the on-disk history sink, a
/// black-box collaborator this crate doesn't own the schema for, so
/// reachability here just means its directory exists and is writable.
async fn history_store_reachable(config: &Config) -> bool {
    let _ = config;
    let dir = crate::config::config_dir();
    tokio::fs::create_dir_all(&dir).await.is_ok()
}

/// Whether the configured preferred terminal application is currently
/// running. `None` if the probe itself couldn't be carried out (the
/// automation tooling isn't present), not to be confused with `Some(false)`.
async fn preferred_terminal_running(config: &Config) -> Option<bool> {
    let terminal = config.preferred_terminal.clone().unwrap_or_else(|| "Terminal".to_string());

    if cfg!(target_os = "macos") {
        let script = format!(r#"application "{}" is running"#, terminal.replace('\\', "\\\\").replace('"', "\\\""));
        let output = tokio::process::Command::new("osascript").arg("-e").arg(&script).output().await.ok()?;
        if !output.status.success() {
            return None;
        }
        Some(String::from_utf8_lossy(&output.stdout).trim() == "true")
    } else {
        let output = tokio::process::Command::new("pgrep").arg("-if").arg(&terminal).output().await.ok()?;
        Some(output.status.success())
    }
}

pub async fn self_check(config: &Config, results: &ResultStore) -> SelfCheckReport {
    let config_valid = config.max_command_length > 0;
    let history_store_reachable = history_store_reachable(config).await;
    let temp_dir_writable = temp_dir_writable().await;
    let orphan_file_count = count_orphans().await;
    let recent_error_rate = results.recent_error_rate(ERROR_RATE_WINDOW).await;
    let preferred_terminal_running = preferred_terminal_running(config).await;

    let mut notes = Vec::new();
    let mut level = HealthLevel::Healthy;

    if !config_valid {
        notes.push("configuration has an invalid max_command_length".to_string());
        level = HealthLevel::Warning;
    }
    if !history_store_reachable {
        notes.push("history store directory is not reachable/writable".to_string());
        level = HealthLevel::Warning;
    }
    if !temp_dir_writable {
        notes.push("system temp directory is not writable".to_string());
        level = HealthLevel::Warning;
    }
    if orphan_file_count > ORPHAN_WARN_THRESHOLD {
        notes.push(format!("{orphan_file_count} orphaned execution files in temp (> {ORPHAN_WARN_THRESHOLD})"));
        level = HealthLevel::Warning;
    }
    if recent_error_rate >= ERROR_RATE_WARN_THRESHOLD {
        notes.push(format!("recent error rate {:.0}% over last {ERROR_RATE_WINDOW} commands", recent_error_rate * 100.0));
        level = HealthLevel::Warning;
    }

    SelfCheckReport {
        level,
        config_valid,
        history_store_reachable,
        preferred_terminal_running,
        temp_dir_writable,
        orphan_file_count,
        recent_error_rate,
        notes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn temp_dir_is_writable_in_test_environment() {
        assert!(temp_dir_writable().await);
    }

    #[tokio::test]
    async fn preferred_terminal_running_probe_does_not_panic() {
        let config = Config::default();
        // Result depends on the host (no preferred-terminal app running in CI,
        // or the probe tooling itself being unavailable); both are legitimate.
        let _ = preferred_terminal_running(&config).await;
    }

    #[tokio::test]
    async fn self_check_is_healthy_with_no_history() {
        let config = Config::default();
        let results = ResultStore::new();
        let report = self_check(&config, &results).await;
        assert_eq!(report.level, HealthLevel::Healthy);
    }

    #[tokio::test]
    async fn self_check_warns_on_high_error_rate() {
        use crate::results::CommandResult;
        let config = Config::default();
        let results = ResultStore::new();
        for i in 0..10 {
            results
                .store(CommandResult {
                    id: format!("id{i}"),
                    command: "false".to_string(),
                    stdout: String::new(),
                    stderr: String::new(),
                    exit_code: 1,
                    completed_at: chrono::Utc::now(),
                })
                .await;
        }
        let report = self_check(&config, &results).await;
        assert_eq!(report.level, HealthLevel::Warning);
    }
}
