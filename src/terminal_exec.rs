//! Terminal-mediated execution channel.
//!
//! Writes a self-contained shell script that runs the command, captures its
//! stdout/stderr/exit code to temp files, records the result to a JSON file,
//! and touches a completion marker. The script is handed to the
//! host-automation collaborator for execution in a user-visible terminal
//! tab; this module does not wait inline -- it returns the command id
//! immediately, and a separate completion watcher polls for the marker.

use crate::host::TerminalAutomation;
use crate::results::{CommandResult, ResultStore, RESULT_FILE_PREFIX};
use chrono::Utc;
use std::time::Duration;
use tokio::time::Instant;

const SCRIPT_FILE_PREFIX: &str = "claude_script_";
const COMPLETE_SUFFIX: &str = ".complete";

fn script_path(id: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("{SCRIPT_FILE_PREFIX}{id}.sh"))
}

fn output_path(id: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("{RESULT_FILE_PREFIX}{id}.json"))
}

fn complete_path(id: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("{RESULT_FILE_PREFIX}{id}.json{COMPLETE_SUFFIX}"))
}

/// Build the script text. The command runs inside a `{ ... ; }` group
/// redirected straight to two temp files, so `$?` right after the group is
/// the original command's own exit code -- nothing downstream of it in a
/// pipe to muddy the status. The captured stdout/stderr are then handed to
/// an embedded Python snippet that writes the JSON result file and touches
/// the completion marker.
fn render_script(id: &str, command: &str, working_directory: Option<&str>) -> String {
    let cd = working_directory
        .map(|dir| format!("cd {} || exit 97\n", shell_quote(dir)))
        .unwrap_or_default();

    format!(
        r#"#!/bin/sh
{cd}STDOUT_FILE=$(mktemp)
STDERR_FILE=$(mktemp)
{{ {command} ; }} > "$STDOUT_FILE" 2> "$STDERR_FILE"
EXIT_CODE=$?
STDOUT_CONTENT=$(cat "$STDOUT_FILE")
STDERR_CONTENT=$(cat "$STDERR_FILE")
export STDOUT_CONTENT STDERR_CONTENT
rm -f "$STDOUT_FILE" "$STDERR_FILE"
python3 - "$EXIT_CODE" <<'PYEOF' 2>/dev/null || true
import json, os, sys, datetime
exit_code = int(sys.argv[1])
payload = {{
    "id": "{id}",
    "command": {command_json},
    "stdout": os.environ.get("STDOUT_CONTENT", ""),
    "stderr": os.environ.get("STDERR_CONTENT", ""),
    "exit_code": exit_code,
    "completed_at": datetime.datetime.now(datetime.timezone.utc).isoformat(),
}}
out = {output_path:?}
with open(out + ".tmp", "w") as f:
    json.dump(payload, f)
os.replace(out + ".tmp", out)
open({complete_path:?}, "w").close()
PYEOF
exit $EXIT_CODE
"#,
        cd = cd,
        command = command,
        id = id,
        command_json = serde_json::to_string(command).unwrap_or_default(),
        output_path = output_path(id).display().to_string(),
        complete_path = complete_path(id).display().to_string(),
    )
}

fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Dispatch a terminal-mediated execution: write the script, hand it to the
/// automation layer on the preferred terminal's tab 1, and return
/// immediately with the command id and a human-readable dispatch message.
pub async fn dispatch(
    automation: &dyn TerminalAutomation,
    preferred_terminal: &str,
    command: &str,
    working_directory: Option<&str>,
) -> Result<(String, String), String> {
    let id = uuid::Uuid::new_v4().to_string();
    let script = render_script(&id, command, working_directory);
    let path = script_path(&id);

    tokio::fs::write(&path, script).await.map_err(|e| format!("failed to write script: {e}"))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o755);
        tokio::fs::set_permissions(&path, perms).await.map_err(|e| format!("failed to chmod script: {e}"))?;
    }

    automation.open_tab(preferred_terminal, working_directory).await?;
    let run_line = format!("sh {}\n", path.display());
    automation.write_to_tab(preferred_terminal, 1, run_line.trim_end()).await?;

    Ok((
        id.clone(),
        format!("dispatched command '{command}' to terminal tab (id={id}); awaiting completion"),
    ))
}

/// Poll for the completion marker every 500ms up to `timeout`. On
/// appearance: read, parse, store, and delete both files. A partial/corrupt
/// result file is left on disk for diagnosis rather than deleted.
pub async fn await_completion(store: &ResultStore, id: &str, timeout: Duration) -> Result<CommandResult, String> {
    const POLL_INTERVAL: Duration = Duration::from_millis(500);
    let marker = complete_path(id);
    let output = output_path(id);
    let deadline = Instant::now() + timeout;

    loop {
        if tokio::fs::metadata(&marker).await.is_ok() {
            let text = tokio::fs::read_to_string(&output)
                .await
                .map_err(|e| format!("completion marker present but output file unreadable: {e}"))?;
            let result: CommandResult = match serde_json::from_str(&text) {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!(id, error = %e, "output file failed to parse, leaving on disk for diagnosis");
                    return Err(format!("result file for '{id}' is malformed: {e}"));
                }
            };
            let _ = tokio::fs::remove_file(&output).await;
            let _ = tokio::fs::remove_file(&marker).await;
            let _ = tokio::fs::remove_file(script_path(id)).await;
            store.store(result.clone()).await;
            return Ok(result);
        }

        if Instant::now() >= deadline {
            return Err(format!("still running: no completion marker for '{id}' within {:?}", timeout));
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_captures_the_original_commands_own_exit_code() {
        let script = render_script("abc123", "false", None);
        assert!(script.contains("EXIT_CODE=$?"));
        assert!(!script.contains("PIPESTATUS"));
        assert!(script.contains("exit $EXIT_CODE"));
    }

    #[test]
    fn script_includes_working_directory_change() {
        let script = render_script("abc", "ls", Some("/tmp/project"));
        assert!(script.contains("cd '/tmp/project'"));
    }

    #[tokio::test]
    async fn completion_watcher_times_out_without_marker() {
        let store = ResultStore::new();
        let result = await_completion(&store, "never-appears", Duration::from_millis(50)).await;
        assert!(result.is_err());
    }
}
