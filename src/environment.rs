//! Environment probe: a single stateless shell snippet that
//! emits `key=value` lines describing the workstation's current context.

use crate::process;
use serde::Serialize;
use std::collections::HashMap;

const MARKER_FILES: &[&str] = &["Makefile", "package.json", "Package.swift", "Cargo.toml", "requirements.txt", "Dockerfile"];

/// Parsed result of running the probe snippet.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EnvironmentContext {
    pub fields: HashMap<String, String>,
}

impl EnvironmentContext {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }
}

fn probe_script(working_directory: Option<&str>) -> String {
    let cd = working_directory.map(|d| format!("cd {} 2>/dev/null\n", shell_quote(d))).unwrap_or_default();
    let marker_checks: String = MARKER_FILES
        .iter()
        .map(|f| format!("[ -e '{f}' ] && echo \"marker_{}=1\"\n", sanitize_key(f)))
        .collect();

    format!(
        r#"{cd}echo "cwd=$(pwd)"
echo "user=$(whoami)"
echo "host=$(hostname)"
echo "shell=$SHELL"
if git rev-parse --is-inside-work-tree >/dev/null 2>&1; then
    echo "git_branch=$(git branch --show-current 2>/dev/null)"
    echo "git_remote=$(git remote get-url origin 2>/dev/null)"
    if [ -n "$(git status --porcelain 2>/dev/null)" ]; then echo "git_dirty=true"; else echo "git_dirty=false"; fi
    echo "git_status=$(git status --porcelain 2>/dev/null | wc -l | tr -d ' ')"
fi
[ -n "$VIRTUAL_ENV" ] && echo "python_venv=$VIRTUAL_ENV"
[ -n "$CONDA_DEFAULT_ENV" ] && echo "conda_env=$CONDA_DEFAULT_ENV"
command -v node >/dev/null 2>&1 && echo "node_version=$(node --version 2>/dev/null)"
command -v npm >/dev/null 2>&1 && echo "npm_version=$(npm --version 2>/dev/null)"
command -v python3 >/dev/null 2>&1 && echo "python_version=$(python3 --version 2>&1)"
command -v ruby >/dev/null 2>&1 && echo "ruby_version=$(ruby --version 2>/dev/null)"
command -v go >/dev/null 2>&1 && echo "go_version=$(go version 2>/dev/null)"
command -v rustc >/dev/null 2>&1 && echo "rust_version=$(rustc --version 2>/dev/null)"
command -v swift >/dev/null 2>&1 && echo "swift_version=$(swift --version 2>&1 | head -1)"
command -v xcodebuild >/dev/null 2>&1 && echo "xcode_version=$(xcodebuild -version 2>/dev/null | head -1)"
if command -v docker >/dev/null 2>&1; then echo "docker_running_count=$(docker ps -q 2>/dev/null | wc -l | tr -d ' ')"; fi
{marker_checks}df -h . 2>/dev/null | awk 'NR==2 {{print "free_disk="$4}}'
"#
    )
}

fn sanitize_key(name: &str) -> String {
    name.chars().map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' }).collect()
}

fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

fn parse_key_value_lines(text: &str) -> HashMap<String, String> {
    text.lines()
        .filter_map(|line| line.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect()
}

/// Run the probe in `working_directory` (or the process cwd) and parse its
/// output. Side-effect free apart from the process launch itself.
pub async fn probe(working_directory: Option<&str>) -> EnvironmentContext {
    let script = probe_script(working_directory);
    let result = process::run(&script, None, None).await;
    EnvironmentContext { fields: parse_key_value_lines(&result.stdout) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_key_value_lines_ignores_lines_without_equals() {
        let parsed = parse_key_value_lines("cwd=/tmp\nnot a kv line\nuser=dev\n");
        assert_eq!(parsed.get("cwd").unwrap(), "/tmp");
        assert_eq!(parsed.get("user").unwrap(), "dev");
        assert_eq!(parsed.len(), 2);
    }

    #[tokio::test]
    async fn probe_reports_cwd_and_user() {
        let ctx = probe(None).await;
        assert!(ctx.get("cwd").is_some());
        assert!(ctx.get("user").is_some());
    }
}
