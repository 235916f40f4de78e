//! Integration tests for the MCP tool surface via duplex transport.
//!
//! Uses `tokio::io::duplex` to create an in-process transport, connects a
//! test client to the gateway server, and exercises tools through the MCP
//! protocol end to end.

use devbridged::server::GatewayServer;
use rmcp::model::*;
use rmcp::{ClientHandler, ServiceExt};
use serde_json::Value;

#[derive(Default, Clone)]
struct TestClient;

impl ClientHandler for TestClient {}

async fn setup() -> rmcp::service::RunningService<rmcp::service::RoleClient, impl rmcp::service::Service<rmcp::service::RoleClient>> {
    let (server_transport, client_transport) = tokio::io::duplex(65536);

    let server = GatewayServer::new().await;
    tokio::spawn(async move {
        let service = server.serve(server_transport).await.unwrap();
        let _ = service.waiting().await;
    });

    let client = TestClient::default();
    client.serve(client_transport).await.unwrap()
}

async fn call_tool(
    client: &rmcp::service::RunningService<rmcp::service::RoleClient, impl rmcp::service::Service<rmcp::service::RoleClient>>,
    name: &str,
    args: Value,
) -> Value {
    let params = CallToolRequestParams {
        meta: None,
        name: name.to_string().into(),
        arguments: Some(serde_json::from_value(args).unwrap()),
        task: None,
    };
    let request = ClientRequest::CallToolRequest(Request::new(params));
    let response = client.send_request(request).await.unwrap();

    let ServerResult::CallToolResult(result) = response else {
        panic!("expected CallToolResult, got {response:?}");
    };

    let text = result
        .content
        .iter()
        .filter_map(|c| match &c.raw {
            RawContent::Text(t) => Some(t.text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("");

    serde_json::from_str(&text).unwrap_or_else(|_| Value::String(text))
}

// ---------------------------------------------------------------------------
// execute_command
// ---------------------------------------------------------------------------

#[tokio::test]
async fn execute_command_echo_succeeds() {
    let client = setup().await;
    let result = call_tool(&client, "execute_command", serde_json::json!({"command": "echo hello_world"})).await;

    assert_eq!(result["exit_code"], 0);
    assert!(!result["timed_out"].as_bool().unwrap());
    let head = result["stdout_head"].as_array().unwrap();
    assert!(head.iter().any(|l| l.as_str().unwrap().contains("hello_world")));

    client.cancel().await.unwrap();
}

#[tokio::test]
async fn execute_command_nonzero_exit_is_reported_not_errored() {
    let client = setup().await;
    let result = call_tool(&client, "execute_command", serde_json::json!({"command": "exit 3"})).await;
    assert_eq!(result["exit_code"], 3);
    client.cancel().await.unwrap();
}

#[tokio::test]
async fn execute_command_blocked_pattern_is_rejected_before_spawn() {
    let client = setup().await;
    let result = call_tool(&client, "execute_command", serde_json::json!({"command": "rm -rf /"})).await;
    let text = result.as_str().unwrap_or("");
    assert!(!text.is_empty(), "expected a rejection message, got: {result}");
    client.cancel().await.unwrap();
}

#[tokio::test]
async fn execute_command_accepts_stringified_integer_params() {
    let client = setup().await;
    let result = call_tool(
        &client,
        "execute_command",
        serde_json::json!({"command": "echo hi", "timeout_seconds": "5", "max_output_lines": "10"}),
    )
    .await;
    assert_eq!(result["exit_code"], 0);
    client.cancel().await.unwrap();
}

// ---------------------------------------------------------------------------
// get_command_output / "last" alias round-trip
// ---------------------------------------------------------------------------

#[tokio::test]
async fn get_command_output_last_alias_returns_most_recent() {
    let client = setup().await;
    call_tool(&client, "execute_command", serde_json::json!({"command": "echo first"})).await;
    call_tool(&client, "execute_command", serde_json::json!({"command": "echo second_one"})).await;

    let output = call_tool(&client, "get_command_output", serde_json::json!({})).await;
    assert!(output["stdout"].as_str().unwrap_or_default().contains("second_one"));

    client.cancel().await.unwrap();
}

#[tokio::test]
async fn get_command_output_unknown_id_errors() {
    let client = setup().await;
    let result = call_tool(&client, "get_command_output", serde_json::json!({"command_id": "does-not-exist"})).await;
    assert!(result.as_str().is_some(), "expected a string error, got: {result}");
    client.cancel().await.unwrap();
}

// ---------------------------------------------------------------------------
// execute_pipeline: stop vs. continue cascade
// ---------------------------------------------------------------------------

#[tokio::test]
async fn pipeline_stop_policy_skips_remaining_steps() {
    let client = setup().await;
    let result = call_tool(
        &client,
        "execute_pipeline",
        serde_json::json!({
            "steps": [
                {"command": "echo one", "name": "one"},
                {"command": "exit 1", "name": "two", "on_fail": "stop"},
                {"command": "echo three", "name": "three"},
            ]
        }),
    )
    .await;

    assert_eq!(result["success"], false);
    let steps = result["steps"].as_array().unwrap();
    assert_eq!(steps.len(), 3);
    assert_eq!(steps[0]["status"], "success");
    assert_eq!(steps[1]["status"], "failed");
    assert_eq!(steps[2]["status"], "skipped");

    client.cancel().await.unwrap();
}

#[tokio::test]
async fn pipeline_continue_policy_runs_every_step() {
    let client = setup().await;
    let result = call_tool(
        &client,
        "execute_pipeline",
        serde_json::json!({
            "steps": [
                {"command": "exit 1", "name": "one", "on_fail": "continue"},
                {"command": "echo two", "name": "two"},
            ]
        }),
    )
    .await;

    let steps = result["steps"].as_array().unwrap();
    assert_eq!(steps[0]["status"], "failed");
    assert_eq!(steps[1]["status"], "success");

    client.cancel().await.unwrap();
}

#[tokio::test]
async fn pipeline_rejects_a_blocked_step_before_running_any_of_it() {
    let client = setup().await;
    let result = call_tool(
        &client,
        "execute_pipeline",
        serde_json::json!({"steps": [{"command": "echo one"}, {"command": "rm -rf /"}]}),
    )
    .await;
    let text = result.as_str().unwrap_or("");
    assert!(!text.is_empty(), "expected a rejection message, got: {result}");
    client.cancel().await.unwrap();
}

// ---------------------------------------------------------------------------
// templates: save -> list -> run, and missing-variable error
// ---------------------------------------------------------------------------

#[tokio::test]
async fn template_save_then_list_round_trips() {
    let client = setup().await;
    call_tool(
        &client,
        "save_template",
        serde_json::json!({"name": "greet", "template": "echo hello {{name}}"}),
    )
    .await;

    let templates = call_tool(&client, "list_templates", serde_json::json!({})).await;
    let list = templates.as_array().unwrap();
    assert!(list.iter().any(|t| t["name"] == "greet"));

    client.cancel().await.unwrap();
}

#[tokio::test]
async fn template_run_with_missing_variable_errors() {
    let client = setup().await;
    call_tool(&client, "save_template", serde_json::json!({"name": "needs_var", "template": "echo {{thing}}"})).await;

    let result = call_tool(&client, "run_template", serde_json::json!({"name": "needs_var"})).await;
    assert!(result.as_str().is_some(), "expected an error for the missing variable, got: {result}");

    client.cancel().await.unwrap();
}

#[tokio::test]
async fn template_run_with_variable_renders() {
    let client = setup().await;
    call_tool(&client, "save_template", serde_json::json!({"name": "greet2", "template": "echo hello {{name}}"})).await;

    let result = call_tool(&client, "run_template", serde_json::json!({"name": "greet2", "variables": {"name": "world"}})).await;
    assert_eq!(result["rendered"], "echo hello world");

    client.cancel().await.unwrap();
}

// ---------------------------------------------------------------------------
// check_interactive: classifier-gating scenario
// ---------------------------------------------------------------------------

#[tokio::test]
async fn check_interactive_flags_vim_with_suggestion() {
    let client = setup().await;
    let result = call_tool(&client, "check_interactive", serde_json::json!({"command": "vim file.txt"})).await;
    assert_eq!(result["level"], "interactive");
    assert!(result["suggestion"].as_str().is_some());
    client.cancel().await.unwrap();
}

#[tokio::test]
async fn check_interactive_passes_plain_ls() {
    let client = setup().await;
    let result = call_tool(&client, "check_interactive", serde_json::json!({"command": "ls -la"})).await;
    assert_eq!(result["level"], "safe");
    client.cancel().await.unwrap();
}

#[tokio::test]
async fn execute_with_auto_retrieve_refuses_interactive_command() {
    let client = setup().await;
    let result = call_tool(&client, "execute_with_auto_retrieve", serde_json::json!({"command": "vim file.txt"})).await;
    assert!(result.as_str().is_some(), "expected refusal string, got: {result}");
    client.cancel().await.unwrap();
}

// ---------------------------------------------------------------------------
// list_recent_commands: limit clamp boundary
// ---------------------------------------------------------------------------

#[tokio::test]
async fn list_recent_commands_clamps_limit_above_max() {
    let client = setup().await;
    for i in 0..3 {
        call_tool(&client, "execute_command", serde_json::json!({"command": format!("echo n{i}")})).await;
    }

    let result = call_tool(&client, "list_recent_commands", serde_json::json!({"limit": 9999})).await;
    let list = result.as_array().unwrap();
    assert!(list.len() <= 50);

    client.cancel().await.unwrap();
}

#[tokio::test]
async fn list_recent_commands_clamps_limit_below_min() {
    let client = setup().await;
    call_tool(&client, "execute_command", serde_json::json!({"command": "echo one"})).await;
    call_tool(&client, "execute_command", serde_json::json!({"command": "echo two"})).await;

    let result = call_tool(&client, "list_recent_commands", serde_json::json!({"limit": 0})).await;
    let list = result.as_array().unwrap();
    assert_eq!(list.len(), 1);

    client.cancel().await.unwrap();
}

// ---------------------------------------------------------------------------
// environment snapshots: no-op diff round trip
// ---------------------------------------------------------------------------

#[tokio::test]
async fn diff_environment_is_empty_across_a_subprocess_mutation() {
    let client = setup().await;
    call_tool(&client, "capture_environment", serde_json::json!({"name": "before"})).await;
    // Runs in its own subprocess; cannot mutate the gateway process's env.
    call_tool(&client, "execute_command", serde_json::json!({"command": "export FOO=bar"})).await;
    call_tool(&client, "capture_environment", serde_json::json!({"name": "after"})).await;

    let diff = call_tool(&client, "diff_environment", serde_json::json!({"from": "before", "to": "after"})).await;
    assert!(diff["added"].as_array().unwrap().is_empty());
    assert!(diff["removed"].as_array().unwrap().is_empty());
    assert!(diff["changed"].as_array().unwrap().is_empty());

    client.cancel().await.unwrap();
}

// ---------------------------------------------------------------------------
// SSH profile round trip (profile-name resolution vs. explicit host/user)
// ---------------------------------------------------------------------------

#[tokio::test]
async fn ssh_profile_save_list_delete_round_trips() {
    let client = setup().await;
    call_tool(
        &client,
        "save_ssh_profile",
        serde_json::json!({"name": "build-box", "host": "example.invalid", "username": "dev"}),
    )
    .await;

    let list = call_tool(&client, "list_ssh_profiles", serde_json::json!({})).await;
    assert!(list.as_array().unwrap().iter().any(|p| p["name"] == "build-box"));

    let deleted = call_tool(&client, "delete_ssh_profile", serde_json::json!({"name": "Build-Box"})).await;
    assert_eq!(deleted["deleted"], true);

    let list_after = call_tool(&client, "list_ssh_profiles", serde_json::json!({})).await;
    assert!(list_after.as_array().unwrap().is_empty());

    client.cancel().await.unwrap();
}

// ---------------------------------------------------------------------------
// file watches: add/list/remove, and idempotent double-remove
// ---------------------------------------------------------------------------

#[tokio::test]
async fn add_list_remove_file_watch_round_trips() {
    let client = setup().await;
    let dir = tempfile::tempdir().unwrap();

    let added = call_tool(
        &client,
        "add_file_watch",
        serde_json::json!({"path": dir.path().to_str().unwrap(), "command": "echo changed"}),
    )
    .await;
    let id = added["watcher_id"].as_str().unwrap().to_string();

    let list = call_tool(&client, "list_file_watches", serde_json::json!({})).await;
    assert!(list.as_array().unwrap().iter().any(|w| w["id"] == id));

    let removed = call_tool(&client, "remove_file_watch", serde_json::json!({"watcher_id": id})).await;
    assert_eq!(removed["removed"], true);

    let list_after = call_tool(&client, "list_file_watches", serde_json::json!({})).await;
    assert!(list_after.as_array().unwrap().is_empty());

    client.cancel().await.unwrap();
}

#[tokio::test]
async fn remove_file_watch_on_already_removed_id_errors_not_panics() {
    let client = setup().await;
    let result = call_tool(&client, "remove_file_watch", serde_json::json!({"watcher_id": "never-existed"})).await;
    assert!(result.as_str().is_some(), "expected error string, got: {result}");
    client.cancel().await.unwrap();
}

#[tokio::test]
async fn add_file_watch_rejects_a_blocked_trigger_command() {
    let client = setup().await;
    let dir = tempfile::tempdir().unwrap();
    let result = call_tool(
        &client,
        "add_file_watch",
        serde_json::json!({"path": dir.path().to_str().unwrap(), "command": "rm -rf /"}),
    )
    .await;
    let text = result.as_str().unwrap_or("");
    assert!(!text.is_empty(), "expected a rejection message, got: {result}");

    let list = call_tool(&client, "list_file_watches", serde_json::json!({})).await;
    assert!(list.as_array().unwrap().is_empty(), "a blocked command must never be registered");

    client.cancel().await.unwrap();
}

// ---------------------------------------------------------------------------
// workspace profiles: save/load/list/delete
// ---------------------------------------------------------------------------

#[tokio::test]
async fn workspace_profile_save_load_delete_round_trips() {
    let client = setup().await;
    call_tool(
        &client,
        "save_workspace_profile",
        serde_json::json!({"name": "api", "directory": "/tmp", "default_commands": ["cargo test"]}),
    )
    .await;

    let loaded = call_tool(&client, "load_workspace_profile", serde_json::json!({"name": "api"})).await;
    assert_eq!(loaded["directory"], "/tmp");
    assert!(loaded["last_used_at"].is_string());

    let deleted = call_tool(&client, "delete_workspace_profile", serde_json::json!({"name": "api"})).await;
    assert_eq!(deleted["deleted"], true);

    client.cancel().await.unwrap();
}

// ---------------------------------------------------------------------------
// self_check
// ---------------------------------------------------------------------------

#[tokio::test]
async fn self_check_reports_a_health_level() {
    let client = setup().await;
    let result = call_tool(&client, "self_check", serde_json::json!({})).await;
    assert!(result["level"] == "healthy" || result["level"] == "warning");
    client.cancel().await.unwrap();
}

// ---------------------------------------------------------------------------
// sessions: open/send/list/close, and idempotent double-close
// ---------------------------------------------------------------------------

#[tokio::test]
async fn close_session_on_unknown_name_errors_not_panics() {
    let client = setup().await;
    let result = call_tool(&client, "close_session", serde_json::json!({"session_name": "never-opened"})).await;
    assert!(result.as_str().is_some(), "expected error string, got: {result}");
    client.cancel().await.unwrap();
}

#[tokio::test]
async fn list_sessions_empty_by_default() {
    let client = setup().await;
    let result = call_tool(&client, "list_sessions", serde_json::json!({})).await;
    assert!(result.as_array().unwrap().is_empty());
    client.cancel().await.unwrap();
}

#[tokio::test]
async fn send_to_session_rejects_a_blocked_command_before_touching_the_session() {
    let client = setup().await;
    // No session named "anything" was opened; if the gate didn't run first
    // the error message would instead report the unknown session.
    let result = call_tool(&client, "send_to_session", serde_json::json!({"session_name": "anything", "command": "rm -rf /"})).await;
    let text = result.as_str().unwrap_or("");
    assert!(text.contains("blocked"), "expected the security gate's message, got: {result}");
    client.cancel().await.unwrap();
}

// ---------------------------------------------------------------------------
// suggest_command and preview_command
// ---------------------------------------------------------------------------

#[tokio::test]
async fn suggest_command_matches_a_known_task() {
    let client = setup().await;
    let result = call_tool(&client, "suggest_command", serde_json::json!({"query": "find large files"})).await;
    let list = result.as_array().unwrap();
    assert!(!list.is_empty());
    client.cancel().await.unwrap();
}

#[tokio::test]
async fn preview_command_reports_would_run_for_safe_command() {
    let client = setup().await;
    let result = call_tool(&client, "preview_command", serde_json::json!({"command": "ls -la"})).await;
    assert_eq!(result["would_run"], true);
    client.cancel().await.unwrap();
}

#[tokio::test]
async fn preview_command_reports_would_not_run_for_interactive_command() {
    let client = setup().await;
    let result = call_tool(&client, "preview_command", serde_json::json!({"command": "top"})).await;
    assert_eq!(result["would_run"], false);
    client.cancel().await.unwrap();
}

// ---------------------------------------------------------------------------
// execute_and_parse
// ---------------------------------------------------------------------------

#[tokio::test]
async fn execute_and_parse_json_command_parses_pretty_json() {
    let client = setup().await;
    let result = call_tool(
        &client,
        "execute_and_parse",
        serde_json::json!({"command": "echo '{\"a\":1}'", "parser": "json"}),
    )
    .await;
    assert_eq!(result["parsed"]["kind"], "Json");
    client.cancel().await.unwrap();
}

// ---------------------------------------------------------------------------
// clipboard (best-effort; the CI sandbox may have no clipboard utility)
// ---------------------------------------------------------------------------

#[tokio::test]
async fn copy_to_clipboard_reports_length_or_error_string() {
    let client = setup().await;
    let result = call_tool(&client, "copy_to_clipboard", serde_json::json!({"text": "hello"})).await;
    assert!(result["copied"] == true || result.as_str().is_some());
    client.cancel().await.unwrap();
}

// ---------------------------------------------------------------------------
// notification preference
// ---------------------------------------------------------------------------

#[tokio::test]
async fn set_notification_preference_updates_only_given_fields() {
    let client = setup().await;
    let first = call_tool(&client, "set_notification_preference", serde_json::json!({"enabled": false})).await;
    assert_eq!(first["enabled"], false);
    assert_eq!(first["notify_on_failure"], true); // untouched default

    let second = call_tool(&client, "set_notification_preference", serde_json::json!({"sound": false})).await;
    assert_eq!(second["enabled"], false); // earlier change persisted
    assert_eq!(second["sound"], false);

    client.cancel().await.unwrap();
}
