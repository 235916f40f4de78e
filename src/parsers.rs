//! Output parsers, applied after `execute_and_parse`. Routed by
//! command prefix matching.

use serde::Serialize;
use serde_json::Value;
use std::sync::LazyLock;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind")]
pub enum ParsedOutput {
    GitStatus { staged: Vec<String>, unstaged: Vec<String>, untracked: Vec<String> },
    GitLog { commits: Vec<String> },
    DockerPs { containers: Vec<String> },
    TestResults { passed: u32, failed: u32, skipped: u32 },
    Ls { total_line: Option<String>, entries: Vec<String> },
    Json { pretty: String },
    Raw { stdout: String, stderr: String, exit_code: i32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parser {
    Auto,
    GitStatus,
    GitLog,
    DockerPs,
    TestResults,
    Ls,
    Json,
}

impl Parser {
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name {
            "git_status" => Parser::GitStatus,
            "git_log" => Parser::GitLog,
            "docker_ps" => Parser::DockerPs,
            "test_results" => Parser::TestResults,
            "ls" => Parser::Ls,
            "json" => Parser::Json,
            _ => Parser::Auto,
        }
    }
}

fn detect_from_command(command: &str) -> Parser {
    let trimmed = command.trim_start();
    if trimmed.starts_with("git status") {
        Parser::GitStatus
    } else if trimmed.starts_with("git log") {
        Parser::GitLog
    } else if trimmed.starts_with("docker ps") {
        Parser::DockerPs
    } else if trimmed.starts_with("pytest") || trimmed.starts_with("jest") || trimmed.starts_with("swift test") {
        Parser::TestResults
    } else if trimmed.starts_with("ls -l") || trimmed.starts_with("ls -la") || trimmed.starts_with("ls -al") {
        Parser::Ls
    } else {
        Parser::Auto
    }
}

static PYTEST_SUMMARY: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"(\d+) passed|(\d+) failed|(\d+) skipped").unwrap());
static JEST_SUMMARY: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"Tests:\s+(?:(\d+) failed, )?(?:(\d+) skipped, )?(\d+) passed").unwrap()
});
static SWIFT_SUMMARY: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"Executed \d+ tests?, with (\d+) failures?").unwrap());

fn parse_git_status(stdout: &str) -> ParsedOutput {
    let mut staged = Vec::new();
    let mut unstaged = Vec::new();
    let mut untracked = Vec::new();
    for line in stdout.lines() {
        if line.len() < 3 {
            continue;
        }
        let (x, y) = (line.as_bytes()[0] as char, line.as_bytes()[1] as char);
        let path = line[3..].to_string();
        if x == '?' && y == '?' {
            untracked.push(path);
        } else {
            if x != ' ' && x != '?' {
                staged.push(path.clone());
            }
            if y != ' ' && y != '?' {
                unstaged.push(path);
            }
        }
    }
    ParsedOutput::GitStatus { staged, unstaged, untracked }
}

fn parse_git_log(stdout: &str) -> ParsedOutput {
    ParsedOutput::GitLog { commits: stdout.lines().map(str::to_string).collect() }
}

fn parse_docker_ps(stdout: &str) -> ParsedOutput {
    let containers = stdout.lines().skip(1).map(str::to_string).collect();
    ParsedOutput::DockerPs { containers }
}

fn parse_test_results(stdout: &str) -> ParsedOutput {
    let mut passed = 0u32;
    let mut failed = 0u32;
    let mut skipped = 0u32;

    if let Some(caps) = JEST_SUMMARY.captures(stdout) {
        failed = caps.get(1).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
        skipped = caps.get(2).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
        passed = caps.get(3).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
    } else if let Some(caps) = SWIFT_SUMMARY.captures(stdout) {
        failed = caps.get(1).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
    } else {
        for caps in PYTEST_SUMMARY.captures_iter(stdout) {
            if let Some(m) = caps.get(1) {
                passed = m.as_str().parse().unwrap_or(0);
            }
            if let Some(m) = caps.get(2) {
                failed = m.as_str().parse().unwrap_or(0);
            }
            if let Some(m) = caps.get(3) {
                skipped = m.as_str().parse().unwrap_or(0);
            }
        }
    }

    ParsedOutput::TestResults { passed, failed, skipped }
}

fn parse_ls(stdout: &str) -> ParsedOutput {
    let mut lines = stdout.lines();
    let first = lines.next();
    let total_line = first.filter(|l| l.starts_with("total")).map(str::to_string);
    let entries = if total_line.is_some() {
        lines.map(str::to_string).collect()
    } else {
        first.into_iter().chain(lines).map(str::to_string).collect()
    };
    ParsedOutput::Ls { total_line, entries }
}

/// Parse `stdout`/`stderr` per `parser`. `Auto` tries command-prefix
/// detection first, then falls back to JSON sniffing, then raw.
#[must_use]
pub fn parse(parser: Parser, command: &str, stdout: &str, stderr: &str, exit_code: i32) -> ParsedOutput {
    let resolved = if parser == Parser::Auto { detect_from_command(command) } else { parser };

    match resolved {
        Parser::GitStatus => parse_git_status(stdout),
        Parser::GitLog => parse_git_log(stdout),
        Parser::DockerPs => parse_docker_ps(stdout),
        Parser::TestResults => parse_test_results(stdout),
        Parser::Ls => parse_ls(stdout),
        Parser::Json => match serde_json::from_str::<Value>(stdout) {
            Ok(value) => ParsedOutput::Json { pretty: serde_json::to_string_pretty(&value).unwrap_or_default() },
            Err(_) => ParsedOutput::Raw { stdout: stdout.to_string(), stderr: stderr.to_string(), exit_code },
        },
        Parser::Auto => {
            if let Ok(value) = serde_json::from_str::<Value>(stdout.trim()) {
                ParsedOutput::Json { pretty: serde_json::to_string_pretty(&value).unwrap_or_default() }
            } else {
                ParsedOutput::Raw { stdout: stdout.to_string(), stderr: stderr.to_string(), exit_code }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn git_status_classifies_staged_unstaged_untracked() {
        let stdout = "M  staged.rs\n M unstaged.rs\n?? new.rs\n";
        let ParsedOutput::GitStatus { staged, unstaged, untracked } = parse_git_status(stdout) else {
            panic!("expected git status");
        };
        assert_eq!(staged, vec!["staged.rs"]);
        assert_eq!(unstaged, vec!["unstaged.rs"]);
        assert_eq!(untracked, vec!["new.rs"]);
    }

    #[test]
    fn pytest_summary_is_parsed() {
        let ParsedOutput::TestResults { passed, failed, skipped } =
            parse_test_results("===== 3 passed, 1 failed, 2 skipped in 0.5s =====")
        else {
            panic!("expected test results");
        };
        assert_eq!((passed, failed, skipped), (3, 1, 2));
    }

    #[test]
    fn auto_detects_json_stdout() {
        let out = parse(Parser::Auto, "some_tool", "{\"a\":1}", "", 0);
        assert!(matches!(out, ParsedOutput::Json { .. }));
    }

    #[test]
    fn auto_falls_back_to_raw() {
        let out = parse(Parser::Auto, "echo hi", "hi\n", "", 0);
        assert!(matches!(out, ParsedOutput::Raw { .. }));
    }

    #[test]
    fn command_prefix_detection_picks_git_log() {
        assert_eq!(detect_from_command("git log --oneline"), Parser::GitLog);
    }
}
