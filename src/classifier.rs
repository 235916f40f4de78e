//! Interactive-command classifier.
//!
//! A pure function over a command string: split on top-level `|`, classify
//! each segment against an ordered pair of regex tables, and report the most
//! severe level found across all segments.

use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    Safe,
    Cautious,
    Interactive,
    Blocked,
}

#[derive(Debug, Clone, Serialize)]
pub struct Classification {
    pub level: Level,
    pub matched_pattern: Option<String>,
    pub explanation: Option<String>,
    pub suggestion: Option<String>,
}

struct Rule {
    pattern: &'static str,
    regex: Regex,
    explanation: &'static str,
    suggestion: &'static str,
}

fn rule(pattern: &'static str, explanation: &'static str, suggestion: &'static str) -> Rule {
    Rule {
        pattern,
        regex: Regex::new(pattern).expect("invalid classifier pattern"),
        explanation,
        suggestion,
    }
}

static INTERACTIVE_RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    vec![
        rule(
            r"(?i)\b(vi|vim|nvim|nano|emacs|pico|joe|ed)\b",
            "opens a full-screen text editor that blocks waiting for keyboard input",
            "use sed, awk, or a non-interactive editor invocation instead",
        ),
        rule(
            r"\bssh\b(?!.*\s(-f|-N|-T)\b).*",
            "interactive SSH session without -f/-N/-T will wait for a TTY",
            "pass -f/-N/-T, or use ssh_execute/ssh profiles for a single remote command",
        ),
        rule(
            r"\bdocker\s+(run|exec)\b.*-it\b",
            "docker run/exec -it allocates an interactive TTY",
            "drop -it, or use -d for detached/background execution",
        ),
        rule(
            r"(?i)\b(top|htop|btop|gtop|glances|nmon)\b",
            "full-screen process monitor that refreshes indefinitely",
            "use `ps aux` or a single-shot snapshot command instead",
        ),
        rule(
            r"(?i)^\s*(python3?|ruby|irb|node|swift|ghci|lua|perl)\s*$",
            "bare REPL with no script argument waits on stdin",
            "pass a script file or -c/-e with an inline expression",
        ),
        rule(
            r"(?i)\b(less|more|most)\b",
            "pager blocks waiting for keyboard navigation",
            "pipe through cat, or pass --no-pager / | cat",
        ),
        rule(
            r"(?i)\b(psql|mysql|sqlite3|redis-cli|mongo)\b(?!.*(-e\s|-c\s|<))",
            "database CLI without -e/-c or input redirection enters an interactive prompt",
            "pass -e/-c with the statement, or redirect a script with <",
        ),
        rule(
            r"(?i)\b(screen|tmux)\b(?!.*\b(kill|ls|list)\b)",
            "attaches to a terminal multiplexer session interactively",
            "use the kill/ls/list subcommands for non-interactive control",
        ),
        rule(
            r"(?i)\b(ftp|sftp|telnet)\b",
            "opens an interactive remote session",
            "use ssh_execute, scp, or curl/sftp batch mode instead",
        ),
        rule(
            r"\bgit\s+rebase\s+(-i|--interactive)\b",
            "interactive rebase opens an editor for the todo list",
            "use git rebase --onto or a non-interactive rebase strategy",
        ),
        rule(
            r"\bgit\s+add\s+(-i|--interactive|-p|--patch)\b",
            "interactive/patch add waits on terminal input",
            "use git add <path> with explicit paths",
        ),
        rule(
            r"\bgit\s+stash\s+(-p|--patch)\b",
            "patch-mode stash waits on terminal input",
            "use git stash without --patch",
        ),
    ]
});

static CAUTIOUS_RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    vec![
        rule(
            r"(?i)\b(apt|apt-get)\s+install\b(?!.*-y\b)",
            "package install without -y may prompt for confirmation",
            "add -y to make the install non-interactive",
        ),
        rule(
            r"(?i)\bbrew\s+(install\s+)?--cask\b",
            "cask installs may prompt for credentials or confirmation",
            "review the cask first; consider --no-quarantine for CI",
        ),
        rule(r"(?i)\bsudo\b", "elevates privileges", "confirm this is intended before running"),
        rule(
            r"\brm\s+.*-[a-zA-Z]*r[a-zA-Z]*\b",
            "recursive delete",
            "double check the target path before running",
        ),
        rule(
            r"\b(cp|mv)\b(?!.*\s(-n|-f)\b)",
            "copy/move without -n (no-clobber) or -f (force) may prompt on overwrite",
            "pass -n or -f to make the outcome deterministic",
        ),
        rule(r"\bssh\s+.*-i\b", "uses an explicit identity file", "verify the identity file path is correct"),
        rule(
            r"(?i)\b(curl|wget)\b.*\|\s*(sh|bash|zsh)\b",
            "pipes a remote script directly into a shell",
            "download and review the script before executing it",
        ),
    ]
});

/// Split `command` on top-level `|`, respecting single quotes, double
/// quotes, and backslash escapes.
fn split_pipeline(command: &str) -> Vec<&str> {
    let mut segments = Vec::new();
    let mut start = 0usize;
    let mut in_single = false;
    let mut in_double = false;
    let mut escaped = false;

    let bytes = command.as_bytes();
    for (i, &b) in bytes.iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' if !in_single => escaped = true,
            b'\'' if !in_double => in_single = !in_single,
            b'"' if !in_single => in_double = !in_double,
            b'|' if !in_single && !in_double => {
                segments.push(&command[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    segments.push(&command[start..]);
    segments
}

/// Classify a full command string, returning the most severe level found
/// across all top-level pipeline segments.
#[must_use]
pub fn classify(command: &str) -> Classification {
    let mut best = Classification {
        level: Level::Safe,
        matched_pattern: None,
        explanation: None,
        suggestion: None,
    };

    for segment in split_pipeline(command) {
        for r in INTERACTIVE_RULES.iter() {
            if r.regex.is_match(segment) && best.level < Level::Interactive {
                best = Classification {
                    level: Level::Interactive,
                    matched_pattern: Some(r.pattern.to_string()),
                    explanation: Some(r.explanation.to_string()),
                    suggestion: Some(r.suggestion.to_string()),
                };
            }
        }
        if best.level == Level::Interactive {
            continue;
        }
        for r in CAUTIOUS_RULES.iter() {
            if r.regex.is_match(segment) && best.level < Level::Cautious {
                best = Classification {
                    level: Level::Cautious,
                    matched_pattern: Some(r.pattern.to_string()),
                    explanation: Some(r.explanation.to_string()),
                    suggestion: Some(r.suggestion.to_string()),
                };
            }
        }
    }

    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_command_is_safe() {
        let c = classify("git status && ls -la");
        assert_eq!(c.level, Level::Safe);
        assert!(c.matched_pattern.is_none());
    }

    #[test]
    fn vim_is_interactive() {
        let c = classify("vim file.txt");
        assert_eq!(c.level, Level::Interactive);
        assert!(c.suggestion.unwrap().contains("sed"));
    }

    #[test]
    fn sudo_is_cautious() {
        let c = classify("sudo apt-get update");
        assert_eq!(c.level, Level::Cautious);
    }

    #[test]
    fn docker_detached_is_safe() {
        let c = classify("docker run -d nginx");
        assert_eq!(c.level, Level::Safe);
    }

    #[test]
    fn pipeline_segment_is_classified() {
        let c = classify("echo hi | vim -");
        assert_eq!(c.level, Level::Interactive);
    }

    #[test]
    fn quoted_pipe_is_not_a_separator() {
        let c = classify("echo 'a|b'");
        assert_eq!(c.level, Level::Safe);
    }

    #[test]
    fn safe_iff_no_pattern_matches_any_segment() {
        for cmd in ["ls", "cargo build", "echo hi | grep hi", "sudo ls | vim -"] {
            let c = classify(cmd);
            let any_match = c.matched_pattern.is_some();
            assert_eq!(c.level == Level::Safe, !any_match);
        }
    }
}
