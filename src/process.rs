//! Direct execution channel: spawn a shell interpreter, capture
//! stdout/stderr, wait, and report the native exit status.

use crate::config::Config;
use regex::Regex;
use std::os::unix::process::CommandExt;
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

/// Result of a completed direct execution.
#[derive(Debug, Clone)]
pub struct ExecResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub duration_seconds: f64,
    pub timed_out: bool,
}

/// System-critical paths that must never be the target of a recursive
/// delete, chmod, or chown -- independent of whatever the configured
/// blocked-command lists say.
const PROTECTED_PATHS: &[&str] = &[
    "/", "/*", "/bin", "/sbin", "/usr", "/etc", "/var", "/home", "/root", "/lib", "/lib64",
    "/opt", "/boot", "/dev", "/sys", "/proc", "/System", "/Library", "/Applications", "/Users",
    "/private", "/private/var", "/private/etc",
];

struct DangerousPattern {
    regex: Regex,
    description: &'static str,
}

/// Built-in patterns caught regardless of configuration: fork bombs, raw
/// writes to block devices, and whole-system shutdown/reboot. These are a
/// sensible-defaults floor; `Config::blocked_patterns` sits on top of them.
static DANGEROUS_PATTERNS: LazyLock<Vec<DangerousPattern>> = LazyLock::new(|| {
    vec![
        DangerousPattern {
            regex: Regex::new(r":\(\)\s*\{.*\|.*&\s*\}\s*;").unwrap(),
            description: "fork bomb",
        },
        DangerousPattern {
            regex: Regex::new(r"\bmkfs\b").unwrap(),
            description: "filesystem format (mkfs)",
        },
        DangerousPattern {
            regex: Regex::new(r"\bdd\b.*\bof=/dev/").unwrap(),
            description: "raw write to block device (dd of=/dev/...)",
        },
        DangerousPattern {
            regex: Regex::new(r">\s*/dev/(sd|nvme|hd|vd|xvd|disk|mapper/)").unwrap(),
            description: "redirect to block device",
        },
        DangerousPattern {
            regex: Regex::new(r"\b(shutdown|reboot|halt|poweroff)\b").unwrap(),
            description: "system shutdown/reboot",
        },
        DangerousPattern {
            regex: Regex::new(r"\binit\s+[06]\b").unwrap(),
            description: "system halt/reboot via init",
        },
    ]
});

/// Split on `;`, `&&`, `||` to get individual subcommands. Not a full shell
/// parser, but enough to catch protected-path operations chained after a
/// harmless prefix.
fn split_subcommands(cmd: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut remaining = cmd;
    while !remaining.is_empty() {
        if let Some(pos) = remaining
            .find("&&")
            .into_iter()
            .chain(remaining.find("||"))
            .chain(remaining.find(';'))
            .min()
        {
            parts.push(&remaining[..pos]);
            let sep_len = if remaining[pos..].starts_with("&&") || remaining[pos..].starts_with("||") {
                2
            } else {
                1
            };
            remaining = &remaining[pos + sep_len..];
        } else {
            parts.push(remaining);
            break;
        }
    }
    parts
}

fn targets_protected_path(args: &[&str]) -> bool {
    for arg in args {
        if arg.starts_with('-') {
            continue;
        }
        let path = arg.trim_end_matches('/');
        let path = if path.is_empty() { "/" } else { path };
        for protected in PROTECTED_PATHS {
            let protected = protected.trim_end_matches('/');
            let protected = if protected.is_empty() { "/" } else { protected };
            if path == protected || *arg == "/*" {
                return true;
            }
        }
    }
    false
}

fn is_dangerous_rm(subcmd: &str) -> bool {
    let words: Vec<&str> = subcmd.split_whitespace().collect();
    let Some(rm_pos) = words.iter().position(|w| *w == "rm") else {
        return false;
    };
    let args = &words[rm_pos + 1..];
    let recursive = args.iter().any(|a| {
        *a == "-r" || *a == "-R" || *a == "--recursive" || (a.starts_with('-') && !a.starts_with("--") && a.contains('r'))
    });
    recursive && targets_protected_path(args)
}

fn is_dangerous_chmod_chown(subcmd: &str, cmd_name: &str) -> bool {
    let words: Vec<&str> = subcmd.split_whitespace().collect();
    let Some(pos) = words.iter().position(|w| *w == cmd_name) else {
        return false;
    };
    let args = &words[pos + 1..];
    let recursive = args.iter().any(|a| {
        *a == "-R" || *a == "--recursive" || (a.starts_with('-') && !a.starts_with("--") && a.contains('R'))
    });
    recursive && targets_protected_path(args)
}

fn check_destructive_on_protected_paths(command: &str) -> Result<(), String> {
    for subcmd in split_subcommands(command.trim()) {
        let subcmd = subcmd.trim();
        if subcmd.is_empty() {
            continue;
        }
        if is_dangerous_rm(subcmd) {
            return Err(format!("blocked: recursive delete targeting a protected system path: {subcmd}"));
        }
        if is_dangerous_chmod_chown(subcmd, "chmod") {
            return Err(format!("blocked: recursive chmod on a protected system path: {subcmd}"));
        }
        if is_dangerous_chmod_chown(subcmd, "chown") {
            return Err(format!("blocked: recursive chown on a protected system path: {subcmd}"));
        }
    }
    Ok(())
}

/// Built-in dangerous-pattern and protected-path defaults, layered with the
/// configured blocked-command / blocked-pattern lists and length ceiling.
/// Matches short-circuit with an error before any subprocess is created.
pub fn security_gate(command: &str, config: &Config) -> Result<(), String> {
    if command.len() > config.max_command_length {
        return Err(format!(
            "blocked: command length {} exceeds the configured maximum of {}",
            command.len(),
            config.max_command_length
        ));
    }
    for pattern in DANGEROUS_PATTERNS.iter() {
        if pattern.regex.is_match(command) {
            return Err(format!("blocked: command matches dangerous pattern ({}): {command}", pattern.description));
        }
    }
    check_destructive_on_protected_paths(command)?;

    if config.blocked_commands.iter().any(|b| b == command) {
        return Err(format!("blocked: command is on the blocked_commands list: {command}"));
    }
    for re in config.compiled_blocked_patterns() {
        if re.is_match(command) {
            return Err(format!("blocked: command matches blocked pattern `{}`", re.as_str()));
        }
    }
    Ok(())
}

/// Spawn `command` under `/bin/sh -c`, optionally in `working_directory`,
/// optionally bounded by `timeout`. Captures stdout and stderr into separate
/// buffers (unlike the terminal-mediated channel, which interleaves via the
/// script wrapper). The child is placed in its own process group so a
/// timeout kill takes any descendants with it.
pub async fn run(
    command: &str,
    working_directory: Option<&str>,
    timeout: Option<Duration>,
) -> ExecResult {
    let start = Instant::now();

    let mut cmd = Command::new("/bin/sh");
    cmd.arg("-c").arg(command);
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd.kill_on_drop(true);

    // SAFETY: setsid() is async-signal-safe and runs after fork, before exec.
    unsafe {
        cmd.pre_exec(|| {
            nix::unistd::setsid().map_err(std::io::Error::other)?;
            Ok(())
        });
    }

    if let Some(dir) = working_directory {
        cmd.current_dir(dir);
    }

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            return ExecResult {
                stdout: String::new(),
                stderr: format!("failed to spawn process: {e}"),
                exit_code: -1,
                duration_seconds: start.elapsed().as_secs_f64(),
                timed_out: false,
            };
        }
    };

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

    let (timed_out, exit_code) = if let Some(t) = timeout {
        match tokio::time::timeout(t, child.wait()).await {
            Ok(Ok(status)) => (false, status.code().unwrap_or(-1)),
            Ok(Err(_)) => (false, -1),
            Err(_) => {
                let _ = kill_process_group(&child);
                let _ = child.wait().await;
                (true, -1)
            }
        }
    } else {
        match child.wait().await {
            Ok(status) => (false, status.code().unwrap_or(-1)),
            Err(_) => (false, -1),
        }
    };

    let stdout = stdout_task.await.unwrap_or_default();
    let stderr = stderr_task.await.unwrap_or_default();

    ExecResult {
        stdout,
        stderr,
        exit_code,
        duration_seconds: start.elapsed().as_secs_f64(),
        timed_out,
    }
}

/// Send SIGKILL to the child's whole process group (it called `setsid`, so
/// its PID doubles as the group id).
fn kill_process_group(child: &tokio::process::Child) -> Result<(), String> {
    let pid = child.id().ok_or_else(|| "process has no PID (already exited?)".to_string())?;
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(-(pid as i32)), nix::sys::signal::Signal::SIGKILL)
        .map_err(|e| format!("failed to kill process group: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn echo_captures_stdout_and_exit_code() {
        let r = run("echo hello", None, None).await;
        assert_eq!(r.exit_code, 0);
        assert!(r.stdout.contains("hello"));
        assert!(!r.timed_out);
    }

    #[tokio::test]
    async fn nonzero_exit_is_preserved() {
        let r = run("exit 7", None, None).await;
        assert_eq!(r.exit_code, 7);
    }

    #[tokio::test]
    async fn timeout_kills_and_marks_timed_out() {
        let r = run("sleep 5", None, Some(Duration::from_millis(100))).await;
        assert!(r.timed_out);
        assert_eq!(r.exit_code, -1);
    }

    #[test]
    fn security_gate_rejects_over_length() {
        let mut cfg = Config::default();
        cfg.max_command_length = 5;
        assert!(security_gate("echo hello world", &cfg).is_err());
        assert!(security_gate("hi", &cfg).is_ok());
    }

    #[test]
    fn security_gate_rejects_blocked_pattern() {
        let mut cfg = Config::default();
        cfg.blocked_patterns = vec![r"rm\s+-rf\s+/tmp".to_string()];
        assert!(security_gate("rm -rf /tmp", &cfg).is_err());
        assert!(security_gate("rm -rf ./build", &cfg).is_ok());
    }

    #[test]
    fn security_gate_rejects_fork_bomb() {
        let cfg = Config::default();
        assert!(security_gate(":(){ :|:& };:", &cfg).is_err());
    }

    #[test]
    fn security_gate_rejects_rm_rf_root() {
        let cfg = Config::default();
        assert!(security_gate("rm -rf /", &cfg).is_err());
        assert!(security_gate("rm -rf /tmp/scratch", &cfg).is_ok());
    }
}
