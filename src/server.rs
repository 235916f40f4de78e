//! MCP server: tool catalogue and dispatcher.
//!
//! Defines `GatewayServer`, which owns every collaborator built up by the
//! rest of this crate and exposes them as MCP tools. Argument validation is
//! handled by `rmcp`'s schema layer; this module's job is to route a call to
//! the right component, shape its result into an envelope, and never panic.

use crate::classifier::{self, Level};
use crate::config::Config;
use crate::environment;
use crate::health;
use crate::host::{Clipboard, DesktopNotifier, HostNotifier, OsascriptAutomation, SystemClipboard, TerminalAutomation};
use crate::output::truncate_chars;
use crate::parsers::{self, Parser};
use crate::pipeline::{self, PipelineStep};
use crate::process;
use crate::results::{self, ResultStore, StatusFilter};
use crate::session::SessionManager;
use crate::snapshot::SnapshotStore;
use crate::ssh::{self, SshTarget};
use crate::ssh_profile::SshProfileStore;
use crate::streaming;
use crate::template::TemplateStore;
use crate::terminal_exec;
use crate::watch::{WatchEngine, WatchRule};
use crate::workspace::WorkspaceStore;
use chrono::Utc;
use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::*;
use rmcp::schemars;
use rmcp::tool;
use rmcp::tool_handler;
use rmcp::tool_router;
use rmcp::{ErrorData as McpError, ServerHandler};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const DEFAULT_TIMEOUT_SECONDS: u64 = 300;
const DEFAULT_MAX_OUTPUT_LINES: usize = 200;
const DEFAULT_RECENT_LIMIT: usize = 10;
const MIN_RECENT_LIMIT: usize = 1;
const MAX_RECENT_LIMIT: usize = 50;
const DEFAULT_SSH_PORT: u16 = 22;
const DEFAULT_SSH_TIMEOUT_SECS: u64 = 30;
const DEFAULT_DEBOUNCE_SECS: f64 = 2.0;
const AUTO_RETRIEVE_CLEANUP_TIMEOUT_SECS: u64 = 600;

// ---------------------------------------------------------------------------
// Parameter structs
// ---------------------------------------------------------------------------

/// Accepts an integer-typed argument as either a JSON number or a numeric
/// string, since some MCP clients quote numbers. Rejects anything that
/// doesn't parse as `T`; absent fields are left as `None` by `#[serde(default)]`.
fn deserialize_int_or_string<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: std::str::FromStr + serde::Deserialize<'de>,
    T::Err: std::fmt::Display,
{
    #[derive(serde::Deserialize)]
    #[serde(untagged)]
    enum IntOrString<T> {
        Int(T),
        String(String),
    }

    match Option::<IntOrString<T>>::deserialize(deserializer)? {
        None => Ok(None),
        Some(IntOrString::Int(v)) => Ok(Some(v)),
        Some(IntOrString::String(s)) => s.trim().parse::<T>().map(Some).map_err(serde::de::Error::custom),
    }
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct SuggestCommandParams {
    /// Free-text description of the task (e.g. "find large files").
    pub query: String,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct ExecuteCommandParams {
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,
    #[serde(default, deserialize_with = "deserialize_int_or_string", skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
    #[serde(default, deserialize_with = "deserialize_int_or_string", skip_serializing_if = "Option::is_none")]
    pub max_output_lines: Option<usize>,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct ExecuteWithAutoRetrieveParams {
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct PreviewCommandParams {
    pub command: String,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct GetCommandOutputParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_id: Option<String>,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct ExecutePipelineParams {
    pub steps: Vec<PipelineStep>,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct ExecuteWithStreamingParams {
    pub command: String,
    #[serde(default, deserialize_with = "deserialize_int_or_string", skip_serializing_if = "Option::is_none")]
    pub update_interval: Option<u64>,
    #[serde(default, deserialize_with = "deserialize_int_or_string", skip_serializing_if = "Option::is_none")]
    pub max_duration: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct SaveTemplateParams {
    pub name: String,
    pub template: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct RunTemplateParams {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variables: Option<HashMap<String, String>>,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct ListRecentCommandsParams {
    #[serde(default, deserialize_with = "deserialize_int_or_string", skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct CopyToClipboardParams {
    pub text: String,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct SetNotificationPreferenceParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sound: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notify_on_success: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notify_on_failure: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minimum_duration: Option<f64>,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct GetEnvironmentContextParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct ExecuteAndParseParams {
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parser: Option<String>,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct CaptureEnvironmentParams {
    pub name: String,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct DiffEnvironmentParams {
    pub from: String,
    pub to: String,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct SaveWorkspaceProfileParams {
    pub name: String,
    pub directory: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_commands: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<HashMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred_terminal: Option<String>,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct WorkspaceProfileNameParams {
    pub name: String,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct OpenTerminalTabParams {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terminal: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct SendToSessionParams {
    pub session_name: String,
    pub command: String,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct CloseSessionParams {
    pub session_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub close_tab: Option<bool>,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct AddFileWatchParams {
    pub path: String,
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_extensions: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debounce_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct RemoveFileWatchParams {
    pub watcher_id: String,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct SshExecuteParams {
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    #[serde(default, deserialize_with = "deserialize_int_or_string", skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity_file: Option<String>,
    #[serde(default, deserialize_with = "deserialize_int_or_string", skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct SaveSshProfileParams {
    pub name: String,
    pub host: String,
    pub username: String,
    #[serde(default, deserialize_with = "deserialize_int_or_string", skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_directory: Option<String>,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct SshProfileNameParams {
    pub name: String,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct CheckInteractiveParams {
    pub command: String,
}

// ---------------------------------------------------------------------------
// Result structs
// ---------------------------------------------------------------------------

/// Structured result of a directly-executed command.
#[derive(Debug, Clone, Serialize)]
pub struct CommandResult {
    pub id: String,
    pub exit_code: i32,
    pub duration_seconds: f64,
    pub stdout_head: Vec<String>,
    pub stdout_tail: Vec<String>,
    pub error_lines: Vec<String>,
    pub total_lines: usize,
    pub truncated: bool,
    pub stderr: String,
    pub timed_out: bool,
}

fn build_command_result(id: &str, exec: &process::ExecResult, max_lines: usize) -> CommandResult {
    let lines: Vec<String> = exec.stdout.lines().map(str::to_string).collect();
    let windowed = crate::output::window(&lines, max_lines);
    CommandResult {
        id: id.to_string(),
        exit_code: exec.exit_code,
        duration_seconds: exec.duration_seconds,
        stdout_head: windowed.head,
        stdout_tail: windowed.tail,
        error_lines: windowed.error_lines,
        total_lines: windowed.total_lines,
        truncated: windowed.truncated,
        stderr: truncate_chars(&exec.stderr, 2000),
        timed_out: exec.timed_out,
    }
}

#[derive(Debug, Clone, Serialize)]
struct PreviewResult {
    command: String,
    classification: classifier::Classification,
    blocked_reason: Option<String>,
    would_run: bool,
}

#[derive(Debug, Clone, Serialize, serde::Deserialize)]
struct NotificationPreference {
    enabled: bool,
    sound: bool,
    notify_on_success: bool,
    notify_on_failure: bool,
    minimum_duration_seconds: f64,
}

impl Default for NotificationPreference {
    fn default() -> Self {
        Self {
            enabled: true,
            sound: true,
            notify_on_success: false,
            notify_on_failure: true,
            minimum_duration_seconds: 10.0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct PipelineToolResult {
    #[serde(flatten)]
    result: pipeline::PipelineResult,
    report: String,
}

fn json_content<T: Serialize>(value: &T) -> Result<CallToolResult, McpError> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| McpError::internal_error(format!("JSON serialization error: {e}"), None))?;
    Ok(CallToolResult::success(vec![Content::text(json)]))
}

fn err_result(msg: impl Into<String>) -> Result<CallToolResult, McpError> {
    Ok(CallToolResult::error(vec![Content::text(msg.into())]))
}

// ---------------------------------------------------------------------------
// suggest_command lookup table
// ---------------------------------------------------------------------------

struct Suggestion {
    keywords: &'static [&'static str],
    command: &'static str,
    note: &'static str,
}

static SUGGESTIONS: LazyLock<Vec<Suggestion>> = LazyLock::new(|| {
    vec![
        Suggestion { keywords: &["list", "files"], command: "ls -la", note: "list directory contents including hidden files" },
        Suggestion { keywords: &["disk", "usage", "space"], command: "df -h .", note: "free space on the current filesystem" },
        Suggestion { keywords: &["large", "files"], command: "du -sh * | sort -rh | head -20", note: "largest entries in the current directory" },
        Suggestion { keywords: &["running", "processes"], command: "ps aux", note: "snapshot of running processes" },
        Suggestion { keywords: &["port", "listening"], command: "lsof -i -P -n | grep LISTEN", note: "processes listening on a network port" },
        Suggestion { keywords: &["git", "status"], command: "git status", note: "working tree status" },
        Suggestion { keywords: &["git", "branch"], command: "git branch --show-current", note: "current branch name" },
        Suggestion { keywords: &["docker", "containers"], command: "docker ps", note: "running containers" },
        Suggestion { keywords: &["network", "connections"], command: "ss -tunap", note: "active network connections" },
        Suggestion { keywords: &["find", "file"], command: "find . -iname '<pattern>'", note: "locate a file by name" },
        Suggestion { keywords: &["kill", "process"], command: "kill -9 <pid>", note: "terminate a process by id" },
        Suggestion { keywords: &["environment", "variables"], command: "env", note: "list environment variables" },
    ]
});

/// Score each table entry by keyword hits against the lowercased query and
/// return the best three, most-relevant first. Not a model call -- a small
/// curated lookup over common workstation tasks.
fn suggest(query: &str) -> Vec<(String, String)> {
    let lowered = query.to_lowercase();
    let mut scored: Vec<(usize, &Suggestion)> = SUGGESTIONS
        .iter()
        .map(|s| (s.keywords.iter().filter(|k| lowered.contains(*k)).count(), s))
        .filter(|(score, _)| *score > 0)
        .collect();
    scored.sort_by(|a, b| b.0.cmp(&a.0));
    scored.into_iter().take(3).map(|(_, s)| (s.command.to_string(), s.note.to_string())).collect()
}

// ---------------------------------------------------------------------------
// GatewayServer
// ---------------------------------------------------------------------------

/// The devbridge-gateway MCP server. Holds every collaborator the tool
/// handlers route to; none of them share a lock with each other.
#[derive(Clone)]
pub struct GatewayServer {
    config: Config,
    results: ResultStore,
    templates: TemplateStore,
    workspaces: WorkspaceStore,
    ssh_profiles: SshProfileStore,
    snapshots: SnapshotStore,
    watches: WatchEngine,
    sessions: SessionManager,
    notifier: Arc<dyn HostNotifier>,
    clipboard: Arc<dyn Clipboard>,
    automation: Arc<dyn TerminalAutomation>,
    notification_pref: Arc<tokio::sync::Mutex<NotificationPreference>>,
    aux_shutdown: CancellationToken,
    tool_router: ToolRouter<GatewayServer>,
}

impl GatewayServer {
    /// Build every collaborator, loading persisted state from the
    /// configuration directory. Does not start background work -- call
    /// [`housekeeping`](Self::housekeeping) for that.
    pub async fn new() -> Self {
        let config = Config::load().await;
        let notifier: Arc<dyn HostNotifier> = Arc::new(DesktopNotifier::new());
        let clipboard: Arc<dyn Clipboard> = Arc::new(SystemClipboard);
        let automation: Arc<dyn TerminalAutomation> = Arc::new(OsascriptAutomation);

        Self {
            results: ResultStore::new(),
            templates: TemplateStore::load().await,
            workspaces: WorkspaceStore::load().await,
            ssh_profiles: SshProfileStore::load().await,
            snapshots: SnapshotStore::load().await,
            watches: WatchEngine::new(notifier.clone()),
            sessions: SessionManager::new(automation.clone()),
            notifier,
            clipboard,
            automation,
            notification_pref: Arc::new(tokio::sync::Mutex::new(NotificationPreference::default())),
            aux_shutdown: CancellationToken::new(),
            config,
            tool_router: Self::tool_router(),
        }
    }

    /// Startup housekeeping: clean up orphaned execution files and, if
    /// configured, bind and start the auxiliary TCP request sink.
    ///
    /// Binding the configured port happens synchronously here, not inside
    /// the background task, so a port already in use (or otherwise
    /// unbindable) fails startup immediately with a clear error rather than
    /// leaving the gateway running without the sink it was configured to have.
    pub async fn housekeeping(&self) -> Result<(), String> {
        health::cleanup_orphans_on_startup().await;

        if self.config.aux_port != 0 {
            let listener = crate::aux_server::bind(self.config.aux_port).await?;
            let shutdown = self.aux_shutdown.clone();
            tokio::spawn(async move {
                if let Err(e) = crate::aux_server::serve(listener, shutdown).await {
                    tracing::error!(error = %e, "auxiliary request sink exited with an error");
                }
            });
        }
        Ok(())
    }

    /// Signal the auxiliary request sink (if running) to stop accepting new
    /// connections and return. Called once the main MCP transport has
    /// finished serving, so the aux sink's lifetime follows the process's.
    pub fn request_shutdown(&self) {
        self.aux_shutdown.cancel();
    }

    fn preferred_terminal(&self) -> String {
        self.config.preferred_terminal.clone().unwrap_or_else(|| "Terminal".to_string())
    }
}

#[tool_router]
impl GatewayServer {
    #[tool(description = "Suggest a shell command for a free-text task description (e.g. \"find large files\", \"list running processes\"). Looks up a small curated table of common workstation tasks; not a substitute for reading documentation on unfamiliar tools.")]
    async fn suggest_command(&self, Parameters(params): Parameters<SuggestCommandParams>) -> Result<CallToolResult, McpError> {
        let matches = suggest(&params.query);
        if matches.is_empty() {
            return err_result(format!("no suggestion found for '{}'; try rephrasing with a concrete verb (list, find, kill, ...)", params.query));
        }
        json_content(&matches)
    }

    #[tool(description = "Execute a command directly in a fresh /bin/sh subprocess (no terminal tab, no state between calls). Runs the security gate first, then blocks until the command exits or the timeout elapses (default 300s). Returns windowed stdout (head/tail/error lines), full stderr, and the exit code; the returned id can be used with get_command_output to retrieve the complete record later.")]
    async fn execute_command(&self, Parameters(params): Parameters<ExecuteCommandParams>) -> Result<CallToolResult, McpError> {
        if let Err(e) = process::security_gate(&params.command, &self.config) {
            return err_result(e);
        }

        let timeout = Duration::from_secs(params.timeout_seconds.unwrap_or(DEFAULT_TIMEOUT_SECONDS));
        let exec = process::run(&params.command, params.working_directory.as_deref(), Some(timeout)).await;

        let id = Uuid::new_v4().to_string();
        self.results
            .store(results::CommandResult {
                id: id.clone(),
                command: params.command.clone(),
                stdout: exec.stdout.clone(),
                stderr: exec.stderr.clone(),
                exit_code: exec.exit_code,
                completed_at: Utc::now(),
            })
            .await;

        let max_lines = params.max_output_lines.unwrap_or(DEFAULT_MAX_OUTPUT_LINES);
        json_content(&build_command_result(&id, &exec, max_lines))
    }

    #[tool(description = "Dispatch a command to a visible terminal tab rather than a hidden pipe, then wait (polling every 2s, up to 2 minutes) for it to complete. Use for commands that benefit from a real terminal -- interactive CLIs the classifier doesn't flag, colored output, long builds a human might want to glance at. Refuses commands the interactive classifier marks `interactive`; commands marked `cautious` proceed with a note attached to the response.")]
    async fn execute_with_auto_retrieve(&self, Parameters(params): Parameters<ExecuteWithAutoRetrieveParams>) -> Result<CallToolResult, McpError> {
        if let Err(e) = process::security_gate(&params.command, &self.config) {
            return err_result(e);
        }

        let classification = classifier::classify(&params.command);
        if classification.level == Level::Interactive {
            return err_result(format!(
                "refused: command is interactive ({}); suggestion: {}",
                classification.explanation.unwrap_or_default(),
                classification.suggestion.unwrap_or_default()
            ));
        }

        let preferred = self.preferred_terminal();
        let (id, dispatch_message) = match terminal_exec::dispatch(self.automation.as_ref(), &preferred, &params.command, params.working_directory.as_deref()).await {
            Ok(v) => v,
            Err(e) => return err_result(e),
        };

        // The completion watcher owns cleanup of the script/result/marker
        // files; it runs independently of the caller-facing retrieval poll
        // below so the tool call itself never blocks on file cleanup.
        let results_for_watcher = self.results.clone();
        let id_for_watcher = id.clone();
        tokio::spawn(async move {
            let _ = terminal_exec::await_completion(&results_for_watcher, &id_for_watcher, Duration::from_secs(AUTO_RETRIEVE_CLEANUP_TIMEOUT_SECS)).await;
        });

        let mut message = results::auto_retrieve(&self.results, &id, &dispatch_message).await;
        if classification.level == Level::Cautious {
            message.push_str(&format!("\n\nnote: {}", classification.explanation.unwrap_or_default()));
        }
        Ok(CallToolResult::success(vec![Content::text(message)]))
    }

    #[tool(description = "Check what would happen to a command without running it: its interactive-classifier level (safe/cautious/interactive/blocked semantics), matched pattern and suggestion if any, and whether the security gate would reject it outright.")]
    async fn preview_command(&self, Parameters(params): Parameters<PreviewCommandParams>) -> Result<CallToolResult, McpError> {
        let classification = classifier::classify(&params.command);
        let blocked_reason = process::security_gate(&params.command, &self.config).err();
        let would_run = blocked_reason.is_none() && classification.level != Level::Interactive;
        json_content(&PreviewResult { command: params.command, classification, blocked_reason, would_run })
    }

    #[tool(description = "Retrieve the full record for a completed command by id. Omit command_id (or pass \"last\") to get the most recently completed command. Checks memory first, then falls back to the on-disk result file for terminal-mediated executions.")]
    async fn get_command_output(&self, Parameters(params): Parameters<GetCommandOutputParams>) -> Result<CallToolResult, McpError> {
        let id = params.command_id.unwrap_or_else(|| "last".to_string());
        match self.results.get(&id).await {
            Ok(result) => json_content(&result),
            Err(e) => err_result(e),
        }
    }

    #[tool(description = "Run an ordered list of steps under direct execution. Each step's on_fail policy (default stop) governs what happens after a failure: stop skips every remaining step (recorded with duration 0), continue/warn proceed. Returns per-step results, total duration, an overall-success flag, and a rendered human-readable report.")]
    async fn execute_pipeline(&self, Parameters(params): Parameters<ExecutePipelineParams>) -> Result<CallToolResult, McpError> {
        for step in &params.steps {
            if let Err(e) = process::security_gate(&step.command, &self.config) {
                return err_result(format!("step '{}': {e}", step.name.as_deref().unwrap_or(&step.command)));
            }
        }
        let result = pipeline::run(&params.steps).await;
        let report = pipeline::render_report(&result);
        json_content(&PipelineToolResult { result, report })
    }

    #[tool(description = "Run a command under direct execution while tailing its output on a fixed cadence (default every 2s) for progressive visibility, up to a maximum duration (default 120s). Returns the accumulated, timestamped log plus the final exit code (absent if max_duration was hit first) and an is_error flag.")]
    async fn execute_with_streaming(&self, Parameters(params): Parameters<ExecuteWithStreamingParams>) -> Result<CallToolResult, McpError> {
        if let Err(e) = process::security_gate(&params.command, &self.config) {
            return err_result(e);
        }
        let update_interval = Duration::from_secs(params.update_interval.unwrap_or(streaming::DEFAULT_UPDATE_INTERVAL_SECS));
        let max_duration = Duration::from_secs(params.max_duration.unwrap_or(streaming::DEFAULT_MAX_DURATION_SECS));
        let result = streaming::run(&params.command, params.working_directory.as_deref(), update_interval, max_duration).await;
        json_content(&result)
    }

    #[tool(description = "Save a named, reusable command template containing {{variable}} placeholders. Returns the stored template with its extracted variable list.")]
    async fn save_template(&self, Parameters(params): Parameters<SaveTemplateParams>) -> Result<CallToolResult, McpError> {
        match self.templates.save(&params.name, &params.template, params.description, params.category).await {
            Ok(t) => json_content(&t),
            Err(e) => err_result(e),
        }
    }

    #[tool(description = "Render and return a saved template's command text with the given variable bindings substituted. Fails if any placeholder's variable is missing from the bindings.")]
    async fn run_template(&self, Parameters(params): Parameters<RunTemplateParams>) -> Result<CallToolResult, McpError> {
        let values = params.variables.unwrap_or_default();
        match self.templates.run(&params.name, &values).await {
            Ok(rendered) => json_content(&serde_json::json!({"name": params.name, "rendered": rendered})),
            Err(e) => err_result(e),
        }
    }

    #[tool(description = "List every saved command template.")]
    async fn list_templates(&self) -> Result<CallToolResult, McpError> {
        json_content(&self.templates.list().await)
    }

    #[tool(description = "List recently completed commands, newest first. limit is clamped to [1, 50] (default 10); status filters to all/success/failed (default all); search filters to commands containing the given substring.")]
    async fn list_recent_commands(&self, Parameters(params): Parameters<ListRecentCommandsParams>) -> Result<CallToolResult, McpError> {
        let limit = params.limit.unwrap_or(DEFAULT_RECENT_LIMIT).clamp(MIN_RECENT_LIMIT, MAX_RECENT_LIMIT);
        let status = match params.status.as_deref() {
            Some("success") => StatusFilter::Success,
            Some("failed") => StatusFilter::Failed,
            _ => StatusFilter::All,
        };
        let recent = self.results.recent(limit, status, params.search.as_deref()).await;
        json_content(&recent)
    }

    #[tool(description = "Report gateway health: configuration validity, history-store reachability, temp-directory writability and orphaned execution-file count (warn above 50), and the error rate over the last 10 completed commands (warn at 30% or above).")]
    async fn self_check(&self) -> Result<CallToolResult, McpError> {
        json_content(&health::self_check(&self.config, &self.results).await)
    }

    #[tool(description = "Copy text to the system clipboard.")]
    async fn copy_to_clipboard(&self, Parameters(params): Parameters<CopyToClipboardParams>) -> Result<CallToolResult, McpError> {
        match self.clipboard.copy(&params.text).await {
            Ok(()) => json_content(&serde_json::json!({"copied": true, "length": params.text.len()})),
            Err(e) => err_result(e),
        }
    }

    #[tool(description = "Read the current contents of the system clipboard.")]
    async fn read_from_clipboard(&self) -> Result<CallToolResult, McpError> {
        match self.clipboard.read().await {
            Ok(text) => json_content(&serde_json::json!({"text": text})),
            Err(e) => err_result(e),
        }
    }

    #[tool(description = "Update desktop-notification preferences for this process: whether notifications are enabled at all, whether they play a sound, whether to notify on success and/or failure, and the minimum command duration (seconds, default 10) below which no notification fires. Omitted fields keep their current value; returns the resulting preference.")]
    async fn set_notification_preference(&self, Parameters(params): Parameters<SetNotificationPreferenceParams>) -> Result<CallToolResult, McpError> {
        let mut pref = self.notification_pref.lock().await;
        if let Some(v) = params.enabled {
            pref.enabled = v;
        }
        if let Some(v) = params.sound {
            pref.sound = v;
        }
        if let Some(v) = params.notify_on_success {
            pref.notify_on_success = v;
        }
        if let Some(v) = params.notify_on_failure {
            pref.notify_on_failure = v;
        }
        if let Some(v) = params.minimum_duration {
            pref.minimum_duration_seconds = v;
        }
        json_content(&*pref)
    }

    #[tool(description = "Probe the workstation's current context: cwd, user, host, shell, git branch/remote/dirty-state, active Python venv/Conda env, installed language/tool versions, docker container count, presence of common project marker files, and free disk space.")]
    async fn get_environment_context(&self, Parameters(params): Parameters<GetEnvironmentContextParams>) -> Result<CallToolResult, McpError> {
        let context = environment::probe(params.working_directory.as_deref()).await;
        json_content(&context)
    }

    #[tool(description = "Execute a command under direct execution and parse its output with a format-specific parser (git_status, git_log, docker_ps, test_results, ls, or json). Defaults to auto, which detects the format from the command prefix and falls back to JSON-sniffing, then raw streams.")]
    async fn execute_and_parse(&self, Parameters(params): Parameters<ExecuteAndParseParams>) -> Result<CallToolResult, McpError> {
        if let Err(e) = process::security_gate(&params.command, &self.config) {
            return err_result(e);
        }
        let timeout = Duration::from_secs(DEFAULT_TIMEOUT_SECONDS);
        let exec = process::run(&params.command, params.working_directory.as_deref(), Some(timeout)).await;

        let id = Uuid::new_v4().to_string();
        self.results
            .store(results::CommandResult {
                id: id.clone(),
                command: params.command.clone(),
                stdout: exec.stdout.clone(),
                stderr: exec.stderr.clone(),
                exit_code: exec.exit_code,
                completed_at: Utc::now(),
            })
            .await;

        let parser = Parser::from_name(params.parser.as_deref().unwrap_or("auto"));
        let parsed = parsers::parse(parser, &params.command, &exec.stdout, &exec.stderr, exec.exit_code);
        json_content(&serde_json::json!({"id": id, "exit_code": exec.exit_code, "parsed": parsed}))
    }

    #[tool(description = "Capture the gateway process's current environment variables and working directory under a named snapshot, for later comparison with diff_environment.")]
    async fn capture_environment(&self, Parameters(params): Parameters<CaptureEnvironmentParams>) -> Result<CallToolResult, McpError> {
        let variables: HashMap<String, String> = std::env::vars().collect();
        let directory = std::env::current_dir().map(|p| p.display().to_string()).unwrap_or_default();
        match self.snapshots.capture(&params.name, variables, directory).await {
            Ok(s) => json_content(&s),
            Err(e) => err_result(e),
        }
    }

    #[tool(description = "Diff two previously captured environment snapshots, reporting variables added, removed, and changed between them. Captures taken within the same gateway process typically diff to zero, since directly-executed commands run in their own subprocess and cannot mutate this process's environment.")]
    async fn diff_environment(&self, Parameters(params): Parameters<DiffEnvironmentParams>) -> Result<CallToolResult, McpError> {
        match self.snapshots.diff(&params.from, &params.to).await {
            Ok(d) => json_content(&d),
            Err(e) => err_result(e),
        }
    }

    #[tool(description = "Save a named workspace profile bundling a working directory, default commands, an environment-variable overlay, and a preferred terminal.")]
    async fn save_workspace_profile(&self, Parameters(params): Parameters<SaveWorkspaceProfileParams>) -> Result<CallToolResult, McpError> {
        let profile = self
            .workspaces
            .save(
                &params.name,
                &params.directory,
                params.default_commands.unwrap_or_default(),
                params.environment.unwrap_or_default(),
                params.preferred_terminal,
            )
            .await;
        json_content(&profile)
    }

    #[tool(description = "Load a saved workspace profile by name; marks it as just-used.")]
    async fn load_workspace_profile(&self, Parameters(params): Parameters<WorkspaceProfileNameParams>) -> Result<CallToolResult, McpError> {
        match self.workspaces.load_profile(&params.name).await {
            Ok(p) => json_content(&p),
            Err(e) => err_result(e),
        }
    }

    #[tool(description = "List every saved workspace profile.")]
    async fn list_workspace_profiles(&self) -> Result<CallToolResult, McpError> {
        json_content(&self.workspaces.list().await)
    }

    #[tool(description = "Delete a saved workspace profile by name.")]
    async fn delete_workspace_profile(&self, Parameters(params): Parameters<WorkspaceProfileNameParams>) -> Result<CallToolResult, McpError> {
        match self.workspaces.delete(&params.name).await {
            Ok(()) => json_content(&serde_json::json!({"name": params.name, "deleted": true})),
            Err(e) => err_result(e),
        }
    }

    #[tool(description = "Open a new tab in a host terminal application (default iTerm2/Terminal per configuration) and register it under a session name, optionally changing into working_directory. Use send_to_session to run commands in it afterward.")]
    async fn open_terminal_tab(&self, Parameters(params): Parameters<OpenTerminalTabParams>) -> Result<CallToolResult, McpError> {
        let terminal = params.terminal.unwrap_or_else(|| self.preferred_terminal());
        match self.sessions.open(&params.name, &terminal, params.working_directory.as_deref()).await {
            Ok(session) => json_content(&session),
            Err(e) => err_result(e),
        }
    }

    #[tool(description = "Write a command into a previously opened terminal session's tab. For terminals without scripted tab addressing, the command is delivered by activating the app and synthesising keystrokes; the response carries a notice when that path was used.")]
    async fn send_to_session(&self, Parameters(params): Parameters<SendToSessionParams>) -> Result<CallToolResult, McpError> {
        if let Err(e) = process::security_gate(&params.command, &self.config) {
            return err_result(e);
        }
        match self.sessions.send(&params.session_name, &params.command).await {
            Ok(notice) => json_content(&serde_json::json!({"session_name": params.session_name, "notice": notice})),
            Err(e) => err_result(e),
        }
    }

    #[tool(description = "List every open terminal session, sorted by creation order.")]
    async fn list_sessions(&self) -> Result<CallToolResult, McpError> {
        json_content(&self.sessions.list().await)
    }

    #[tool(description = "Close a terminal session. Set close_tab=true to also dispatch a close-tab script to the host terminal (default false, which only forgets the session).")]
    async fn close_session(&self, Parameters(params): Parameters<CloseSessionParams>) -> Result<CallToolResult, McpError> {
        match self.sessions.close(&params.session_name, params.close_tab.unwrap_or(false)).await {
            Ok(()) => json_content(&serde_json::json!({"session_name": params.session_name, "closed": true})),
            Err(e) => err_result(e),
        }
    }

    #[tool(description = "Watch a file or directory for changes and run a command (under direct execution) when they occur, debounced (default 2s) so rapid bursts of events collapse into one dispatch. If file_extensions is given, only changes to files with a matching extension (case-insensitive) trigger a run. Emits a host notification summarising each run's success or failure.")]
    async fn add_file_watch(&self, Parameters(params): Parameters<AddFileWatchParams>) -> Result<CallToolResult, McpError> {
        if let Err(e) = process::security_gate(&params.command, &self.config) {
            return err_result(e);
        }
        let extensions: Option<HashSet<String>> = params.file_extensions.map(|exts| exts.into_iter().map(|e| e.trim_start_matches('.').to_lowercase()).collect());
        let rule = WatchRule {
            path: PathBuf::from(&params.path),
            extensions,
            command: params.command,
            working_directory: params.working_directory,
            debounce: Duration::from_secs_f64(params.debounce_seconds.unwrap_or(DEFAULT_DEBOUNCE_SECS)),
            label: params.label,
            active: true,
        };
        match self.watches.add_rule(rule).await {
            Ok(id) => json_content(&serde_json::json!({"watcher_id": id})),
            Err(e) => err_result(e),
        }
    }

    #[tool(description = "Remove a file watch by id, releasing its OS subscription.")]
    async fn remove_file_watch(&self, Parameters(params): Parameters<RemoveFileWatchParams>) -> Result<CallToolResult, McpError> {
        match self.watches.remove(&params.watcher_id).await {
            Ok(()) => json_content(&serde_json::json!({"watcher_id": params.watcher_id, "removed": true})),
            Err(e) => err_result(e),
        }
    }

    #[tool(description = "List every active file watch.")]
    async fn list_file_watches(&self) -> Result<CallToolResult, McpError> {
        json_content(&self.watches.list().await)
    }

    #[tool(description = "Execute a command on a remote host over SSH, non-interactively with key-only auth. Provide either a saved profile name, or host and username directly. Defaults: port 22, connect timeout 30s. Missing identity files fail fast with a distinguished error before any connection is attempted.")]
    async fn ssh_execute(&self, Parameters(params): Parameters<SshExecuteParams>) -> Result<CallToolResult, McpError> {
        if let Err(e) = process::security_gate(&params.command, &self.config) {
            return err_result(e);
        }

        let (host, username, port, identity_file) = if let Some(profile_name) = &params.profile {
            match self.ssh_profiles.get(profile_name).await {
                Ok(p) => (p.host, p.username, params.port.unwrap_or(p.port), params.identity_file.clone().or(p.identity_file)),
                Err(e) => return err_result(e),
            }
        } else {
            let Some(host) = params.host.clone() else {
                return err_result("missing required argument: host (or profile)");
            };
            let Some(username) = params.username.clone() else {
                return err_result("missing required argument: username (or profile)");
            };
            (host, username, params.port.unwrap_or(DEFAULT_SSH_PORT), params.identity_file.clone())
        };

        let target = SshTarget {
            host: &host,
            user: &username,
            port,
            identity_file: identity_file.as_deref(),
            connect_timeout: Duration::from_secs(params.timeout_seconds.unwrap_or(DEFAULT_SSH_TIMEOUT_SECS)),
        };

        match ssh::execute(&target, &params.command).await {
            Ok(result) => json_content(&result),
            Err(e) => err_result(e.message),
        }
    }

    #[tool(description = "Save a named SSH profile (host, username, port, identity file, default remote directory). Profile names collide case-insensitively, so 'Prod' and 'prod' refer to the same profile.")]
    async fn save_ssh_profile(&self, Parameters(params): Parameters<SaveSshProfileParams>) -> Result<CallToolResult, McpError> {
        match self
            .ssh_profiles
            .save(&params.name, &params.host, &params.username, params.port, params.identity_file, params.default_directory)
            .await
        {
            Ok(p) => json_content(&p),
            Err(e) => err_result(e),
        }
    }

    #[tool(description = "List every saved SSH profile.")]
    async fn list_ssh_profiles(&self) -> Result<CallToolResult, McpError> {
        json_content(&self.ssh_profiles.list().await)
    }

    #[tool(description = "Delete a saved SSH profile by name (case-insensitive).")]
    async fn delete_ssh_profile(&self, Parameters(params): Parameters<SshProfileNameParams>) -> Result<CallToolResult, McpError> {
        match self.ssh_profiles.delete(&params.name).await {
            Ok(()) => json_content(&serde_json::json!({"name": params.name, "deleted": true})),
            Err(e) => err_result(e),
        }
    }

    #[tool(description = "Classify a command as safe, cautious, or interactive without running it. Interactive commands (editors, pagers, bare REPLs, unflagged interactive SSH, and similar) would block waiting on a terminal the gateway doesn't have; cautious commands (sudo, recursive rm, unflagged installs, and similar) are runnable but worth a second look.")]
    async fn check_interactive(&self, Parameters(params): Parameters<CheckInteractiveParams>) -> Result<CallToolResult, McpError> {
        json_content(&classifier::classify(&params.command))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_param_accepts_quoted_number() {
        let params: ExecuteCommandParams = serde_json::from_value(serde_json::json!({
            "command": "echo hi",
            "timeout_seconds": "120",
            "max_output_lines": "50",
        }))
        .unwrap();
        assert_eq!(params.timeout_seconds, Some(120));
        assert_eq!(params.max_output_lines, Some(50));
    }

    #[test]
    fn integer_param_accepts_bare_number() {
        let params: ExecuteCommandParams = serde_json::from_value(serde_json::json!({
            "command": "echo hi",
            "timeout_seconds": 120,
        }))
        .unwrap();
        assert_eq!(params.timeout_seconds, Some(120));
    }

    #[test]
    fn integer_param_rejects_non_numeric_string() {
        let result: Result<ExecuteCommandParams, _> = serde_json::from_value(serde_json::json!({
            "command": "echo hi",
            "timeout_seconds": "soon",
        }));
        assert!(result.is_err());
    }

    #[test]
    fn integer_param_absent_stays_none() {
        let params: ExecuteCommandParams = serde_json::from_value(serde_json::json!({"command": "echo hi"})).unwrap();
        assert_eq!(params.timeout_seconds, None);
    }

    #[tokio::test]
    async fn housekeeping_fails_startup_when_aux_port_is_taken() {
        let held = tokio::net::TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let port = held.local_addr().unwrap().port();

        let mut server = GatewayServer::new().await;
        server.config.aux_port = port;

        let result = server.housekeeping().await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn housekeeping_succeeds_with_aux_disabled() {
        let mut server = GatewayServer::new().await;
        server.config.aux_port = 0;
        assert!(server.housekeeping().await.is_ok());
    }
}

#[tool_handler]
impl ServerHandler for GatewayServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "devbridge-gateway".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                ..Default::default()
            },
            instructions: Some(
                "devbridge-gateway dispatches developer-workstation operations for an LLM agent: \
                 direct command execution, terminal-mediated execution for commands worth watching \
                 in a real terminal, pipelines, streaming output for long builds, file watches, \
                 persistent terminal sessions, SSH, and named templates/profiles/snapshots.\n\n\
                 EXECUTION CHANNELS: execute_command runs in a hidden subprocess and blocks until \
                 done (default 300s timeout). execute_with_auto_retrieve dispatches to a visible \
                 terminal tab and polls for completion -- use check_interactive or preview_command \
                 first if the command might be interactive, since execute_with_auto_retrieve refuses \
                 anything the classifier marks interactive. execute_with_streaming gives progressive \
                 output for long-running commands without a terminal tab. execute_pipeline runs a \
                 sequence of steps with configurable failure handling.\n\n\
                 OUTPUT: execute_command and execute_and_parse return windowed output (head/tail/error \
                 lines) plus an id; use get_command_output with that id (or \"last\") to retrieve the \
                 full on-disk record later."
                    .to_string(),
            ),
        }
    }
}
