//! SSH execution channel.
//!
//! Invokes the host's `ssh` binary as a subprocess, forcing non-interactive
//! key-only auth, a configurable connection timeout, and automatic
//! acceptance of new host keys on first sight. The remote command is the
//! terminal argument, run under the default remote shell.

use serde::Serialize;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

#[derive(Debug, Clone, Serialize)]
pub struct SshResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub duration_seconds: f64,
}

/// Distinguished error kinds surfaced to callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SshErrorKind {
    MissingIdentityFile,
    SpawnFailed,
}

#[derive(Debug, Clone)]
pub struct SshError {
    pub kind: SshErrorKind,
    pub message: String,
}

impl std::fmt::Display for SshError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

pub struct SshTarget<'a> {
    pub host: &'a str,
    pub user: &'a str,
    pub port: u16,
    pub identity_file: Option<&'a str>,
    pub connect_timeout: Duration,
}

/// Run `command` on `target` over SSH. Fails fast with
/// [`SshErrorKind::MissingIdentityFile`] if an identity file was given but
/// does not exist, before any subprocess is spawned.
pub async fn execute(target: &SshTarget<'_>, command: &str) -> Result<SshResult, SshError> {
    if let Some(identity) = target.identity_file {
        if !tokio::fs::try_exists(identity).await.unwrap_or(false) {
            return Err(SshError {
                kind: SshErrorKind::MissingIdentityFile,
                message: format!("identity file not found: {identity}"),
            });
        }
    }

    let start = Instant::now();

    let mut cmd = Command::new("ssh");
    cmd.arg("-o").arg("BatchMode=yes");
    cmd.arg("-o").arg("StrictHostKeyChecking=accept-new");
    cmd.arg("-o").arg(format!("ConnectTimeout={}", target.connect_timeout.as_secs().max(1)));
    cmd.arg("-p").arg(target.port.to_string());
    if let Some(identity) = target.identity_file {
        cmd.arg("-i").arg(identity);
    }
    cmd.arg(format!("{}@{}", target.user, target.host));
    cmd.arg(command);
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd.kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|e| SshError {
        kind: SshErrorKind::SpawnFailed,
        message: format!("failed to spawn ssh: {e}"),
    })?;

    let stdout_pipe = child.stdout.take().expect("stdout was piped");
    let stderr_pipe = child.stderr.take().expect("stderr was piped");

    let stdout_task = tokio::spawn(async move {
        let mut out = String::new();
        let mut lines = BufReader::new(stdout_pipe).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            out.push_str(&line);
            out.push('\n');
        }
        out
    });
    let stderr_task = tokio::spawn(async move {
        let mut out = String::new();
        let mut lines = BufReader::new(stderr_pipe).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            out.push_str(&line);
            out.push('\n');
        }
        out
    });

    let status = child.wait().await.map_err(|e| SshError {
        kind: SshErrorKind::SpawnFailed,
        message: format!("ssh process failed: {e}"),
    })?;

    let stdout = stdout_task.await.unwrap_or_default();
    let stderr = stderr_task.await.unwrap_or_default();

    Ok(SshResult {
        stdout,
        stderr,
        exit_code: status.code().unwrap_or(-1),
        duration_seconds: start.elapsed().as_secs_f64(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_identity_file_is_distinguished() {
        let target = SshTarget {
            host: "example.invalid",
            user: "dev",
            port: 22,
            identity_file: Some("/nonexistent/path/to/key"),
            connect_timeout: Duration::from_secs(5),
        };
        let err = execute(&target, "echo hi").await.unwrap_err();
        assert_eq!(err.kind, SshErrorKind::MissingIdentityFile);
    }
}
