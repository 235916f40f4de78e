//! Output windowing and truncation helpers for LLM-friendly command output.
//!
//! Pure functions shared by the pipeline report renderer and `self_check`'s
//! recent-error-rate computation.

use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;

const HEAD_LINES: usize = 10;

static ERROR_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    let patterns = [
        r"(?i)\berror\b",
        r"(?i)\bfailed\b",
        r"(?i)\bfailure\b",
        r"(?i)\bfatal\b",
        r"(?i)\bpanic\b",
        r"(?i)\bexception\b",
        r"(?i)\btraceback\b",
        r"(?i)\bFAIL\b",
        r"(?i)\bdenied\b",
        r"(?i)\baborted\b",
    ];
    patterns.iter().map(|p| Regex::new(p).expect("invalid error pattern regex")).collect()
});

#[derive(Debug, Clone, Serialize)]
pub struct OutputWindow {
    pub head: Vec<String>,
    pub tail: Vec<String>,
    pub error_lines: Vec<String>,
    pub total_lines: usize,
    pub truncated: bool,
}

/// Window `lines` into head + tail sections. If the output fits within
/// `max_lines`, returns it whole with an empty tail.
#[must_use]
pub fn window(lines: &[String], max_lines: usize) -> OutputWindow {
    let total_lines = lines.len();

    if total_lines <= max_lines {
        return OutputWindow {
            head: lines.to_vec(),
            tail: Vec::new(),
            error_lines: extract_errors(lines),
            total_lines,
            truncated: false,
        };
    }

    let head_count = HEAD_LINES.min(max_lines);
    let tail_count = max_lines.saturating_sub(head_count);

    let head = lines[..head_count].to_vec();
    let tail = if tail_count > 0 {
        let start = total_lines.saturating_sub(tail_count);
        lines[start..].to_vec()
    } else {
        Vec::new()
    };

    OutputWindow {
        head,
        tail,
        error_lines: extract_errors(lines),
        total_lines,
        truncated: true,
    }
}

/// Lines matching common error/failure/panic indicators.
#[must_use]
pub fn extract_errors(lines: &[String]) -> Vec<String> {
    lines.iter().filter(|line| ERROR_PATTERNS.iter().any(|re| re.is_match(line))).cloned().collect()
}

/// Truncate `s` to at most `max_chars` characters (not bytes), appending a
/// marker if anything was cut. Safe on multi-byte UTF-8 boundaries.
#[must_use]
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let truncated: String = s.chars().take(max_chars).collect();
    format!("{truncated}... (truncated)")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("line {i}")).collect()
    }

    #[test]
    fn short_output_is_not_truncated() {
        let w = window(&lines(5), 20);
        assert!(!w.truncated);
        assert_eq!(w.head.len(), 5);
        assert!(w.tail.is_empty());
    }

    #[test]
    fn long_output_windows_head_and_tail() {
        let w = window(&lines(100), 20);
        assert!(w.truncated);
        assert_eq!(w.head.len(), 10);
        assert_eq!(w.tail.len(), 10);
        assert_eq!(w.head[0], "line 0");
        assert_eq!(w.tail.last().unwrap(), "line 99");
    }

    #[test]
    fn extract_errors_matches_known_patterns() {
        let input = vec!["build ok".to_string(), "Error: missing file".to_string(), "done".to_string()];
        let errors = extract_errors(&input);
        assert_eq!(errors, vec!["Error: missing file".to_string()]);
    }

    #[test]
    fn truncate_chars_is_utf8_safe() {
        let s = "é".repeat(10);
        let truncated = truncate_chars(&s, 3);
        assert_eq!(truncated.chars().count(), 3 + "... (truncated)".chars().count());
    }
}
