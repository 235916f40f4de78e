//! Streaming executor: progressive visibility for long-running
//! commands.
//!
//! The wrapped command appends every stdout/stderr line to a live log file as
//! it's produced and writes its true exit code to a distinguished file once
//! done. A polling loop reads new bytes off the log on a fixed cadence and
//! accumulates labelled updates until the exit-code file appears or the
//! maximum duration elapses. Both files are removed on every exit path.

use serde::Serialize;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::time::Instant;

pub const DEFAULT_UPDATE_INTERVAL_SECS: u64 = 2;
pub const DEFAULT_MAX_DURATION_SECS: u64 = 120;

#[derive(Debug, Clone, Serialize)]
pub struct StreamingResult {
    pub accumulated: String,
    pub exit_code: Option<i32>,
    pub is_error: bool,
    pub duration_seconds: f64,
}

fn log_path(id: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("claude_stream_{id}.log"))
}

fn exit_path(id: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("claude_stream_{id}.exit"))
}

fn render_script(id: &str, command: &str, working_directory: Option<&str>) -> String {
    let cd = working_directory
        .map(|dir| format!("cd {} || exit 97\n", shell_quote(dir)))
        .unwrap_or_default();
    let log = log_path(id).display().to_string();
    let exit = exit_path(id).display().to_string();

    format!(
        r#"#!/bin/sh
{cd}if command -v stdbuf >/dev/null 2>&1; then
    stdbuf -oL -eL sh -c {command_quoted} >> {log:?} 2>&1
else
    sh -c {command_quoted} >> {log:?} 2>&1
fi
EXIT_CODE=$?
echo "$EXIT_CODE" > {exit:?}
"#,
        cd = cd,
        command_quoted = shell_quote(command),
        log = log,
        exit = exit,
    )
}

fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Run `command` under direct execution (via `/bin/sh -c`) while a sibling
/// task tails its output. Returns once the command finishes or `max_duration`
/// elapses, whichever comes first. Cleans up the log/exit files on every
/// exit path.
pub async fn run(
    command: &str,
    working_directory: Option<&str>,
    update_interval: Duration,
    max_duration: Duration,
) -> StreamingResult {
    let id = uuid::Uuid::new_v4().to_string();
    let log = log_path(&id);
    let exit = exit_path(&id);
    let script_text = render_script(&id, command, working_directory);

    let cleanup = |log: std::path::PathBuf, exit: std::path::PathBuf| async move {
        let _ = tokio::fs::remove_file(&log).await;
        let _ = tokio::fs::remove_file(&exit).await;
    };

    let mut child = match tokio::process::Command::new("/bin/sh")
        .arg("-c")
        .arg(&script_text)
        .kill_on_drop(true)
        .spawn()
    {
        Ok(c) => c,
        Err(e) => {
            cleanup(log, exit).await;
            return StreamingResult {
                accumulated: format!("failed to spawn streaming command: {e}"),
                exit_code: None,
                is_error: true,
                duration_seconds: 0.0,
            };
        }
    };

    let start = Instant::now();
    let deadline = start + max_duration;
    let mut accumulated = String::new();
    let mut offset: u64 = 0;

    loop {
        tokio::time::sleep(update_interval).await;
        let elapsed = start.elapsed().as_secs_f64();

        let new_bytes = read_new_bytes(&log, &mut offset).await;
        if new_bytes.is_empty() {
            accumulated.push_str(&format!("[{elapsed:.1}s] still running, no new output\n"));
        } else {
            accumulated.push_str(&format!("[{elapsed:.1}s] {new_bytes}"));
        }

        if let Some(code) = read_exit_code(&exit).await {
            let _ = child.wait().await;
            let tail = read_new_bytes(&log, &mut offset).await;
            if !tail.is_empty() {
                accumulated.push_str(&format!("[{:.1}s] {tail}", start.elapsed().as_secs_f64()));
            }
            let duration = start.elapsed().as_secs_f64();
            let total_bytes = offset;
            accumulated.push_str(&format!(
                "--- completed: exit_code={code} duration={duration:.1}s total_bytes={total_bytes} ---\n"
            ));
            cleanup(log, exit).await;
            return StreamingResult {
                accumulated,
                exit_code: Some(code),
                is_error: code != 0,
                duration_seconds: duration,
            };
        }

        if Instant::now() >= deadline {
            let _ = child.start_kill();
            let _ = child.wait().await;
            let duration = start.elapsed().as_secs_f64();
            accumulated.push_str(&format!("--- max duration {:.0}s reached, polling stopped ---\n", max_duration.as_secs_f64()));
            cleanup(log, exit).await;
            return StreamingResult {
                accumulated,
                exit_code: None,
                is_error: true,
                duration_seconds: duration,
            };
        }
    }
}

async fn read_new_bytes(path: &std::path::Path, offset: &mut u64) -> String {
    let Ok(mut file) = tokio::fs::File::open(path).await else {
        return String::new();
    };
    if tokio::io::AsyncSeekExt::seek(&mut file, std::io::SeekFrom::Start(*offset)).await.is_err() {
        return String::new();
    }
    let mut buf = Vec::new();
    if file.read_to_end(&mut buf).await.is_err() {
        return String::new();
    }
    *offset += buf.len() as u64;
    String::from_utf8_lossy(&buf).into_owned()
}

async fn read_exit_code(path: &std::path::Path) -> Option<i32> {
    let text = tokio::fs::read_to_string(path).await.ok()?;
    text.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn short_command_completes_before_max_duration() {
        let result = run("echo one; sleep 0.1; echo two", None, Duration::from_millis(200), Duration::from_secs(10)).await;
        assert_eq!(result.exit_code, Some(0));
        assert!(!result.is_error);
        assert!(result.accumulated.contains("completed"));
    }

    #[tokio::test]
    async fn nonzero_exit_marks_is_error() {
        let result = run("exit 3", None, Duration::from_millis(100), Duration::from_secs(10)).await;
        assert_eq!(result.exit_code, Some(3));
        assert!(result.is_error);
    }

    #[tokio::test]
    async fn max_duration_terminates_polling_loop() {
        let result = run("sleep 10", None, Duration::from_millis(100), Duration::from_millis(300)).await;
        assert!(result.exit_code.is_none());
        assert!(result.is_error);
        assert!(result.accumulated.contains("max duration"));
    }
}
