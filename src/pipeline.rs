//! Pipeline executor.
//!
//! Runs an ordered list of [`PipelineStep`]s under direct execution. Once a
//! step fails under policy `stop`, every later step is recorded as `skipped`
//! with duration 0 -- that cascade is the one invariant this module exists
//! to guarantee.

use crate::output::truncate_chars;
use crate::process;
use serde::{Deserialize, Serialize};
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    Stop,
    Continue,
    Warn,
}

impl Default for FailurePolicy {
    fn default() -> Self {
        FailurePolicy::Stop
    }
}

#[derive(Debug, Clone, Deserialize, schemars::JsonSchema)]
pub struct PipelineStep {
    pub command: String,
    #[serde(default, rename = "on_fail")]
    pub on_fail: FailurePolicy,
    pub name: Option<String>,
    pub working_directory: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Success,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineStepResult {
    pub name: Option<String>,
    pub command: String,
    pub status: StepStatus,
    pub duration_seconds: f64,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineResult {
    pub steps: Vec<PipelineStepResult>,
    pub total_duration_seconds: f64,
    pub success: bool,
}

/// Run `steps` in order. Honors each step's failure policy; a `stop` failure
/// short-circuits every remaining step as `skipped` rather than executing
/// them.
pub async fn run(steps: &[PipelineStep]) -> PipelineResult {
    let start = Instant::now();
    let mut results = Vec::with_capacity(steps.len());
    let mut stopped = false;

    for step in steps {
        if stopped {
            results.push(PipelineStepResult {
                name: step.name.clone(),
                command: step.command.clone(),
                status: StepStatus::Skipped,
                duration_seconds: 0.0,
                stdout: String::new(),
                stderr: String::new(),
                exit_code: -1,
            });
            continue;
        }

        let exec = process::run(&step.command, step.working_directory.as_deref(), None).await;
        let status = if exec.exit_code == 0 { StepStatus::Success } else { StepStatus::Failed };

        if status == StepStatus::Failed {
            match step.on_fail {
                FailurePolicy::Stop => {
                    tracing::error!(command = %step.command, "pipeline step failed, stopping");
                    stopped = true;
                }
                FailurePolicy::Continue => {
                    tracing::info!(command = %step.command, "pipeline step failed, continuing per policy");
                }
                FailurePolicy::Warn => {
                    tracing::warn!(command = %step.command, "pipeline step failed, continuing with warning");
                }
            }
        }

        results.push(PipelineStepResult {
            name: step.name.clone(),
            command: step.command.clone(),
            status,
            duration_seconds: exec.duration_seconds,
            stdout: exec.stdout,
            stderr: exec.stderr,
            exit_code: exec.exit_code,
        });
    }

    let success = !results.iter().any(|r| r.status == StepStatus::Failed);

    PipelineResult {
        steps: results,
        total_duration_seconds: start.elapsed().as_secs_f64(),
        success,
    }
}

/// Render a human-readable, sectioned report: one block per step, stdout
/// truncated to 500 chars, step index annotated on skipped entries.
#[must_use]
pub fn render_report(result: &PipelineResult) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "Pipeline {} ({} steps, {:.2}s total)\n",
        if result.success { "succeeded" } else { "failed" },
        result.steps.len(),
        result.total_duration_seconds
    ));

    for (i, step) in result.steps.iter().enumerate() {
        let label = step.name.as_deref().unwrap_or(&step.command);
        match step.status {
            StepStatus::Skipped => {
                out.push_str(&format!("  [{i}] {label}: skipped (earlier step stopped the pipeline)\n"));
            }
            StepStatus::Success | StepStatus::Failed => {
                let truncated_stdout = truncate_chars(&step.stdout, 500);
                out.push_str(&format!(
                    "  [{i}] {label}: {:?} exit={} duration={:.2}s\n      stdout: {}\n",
                    step.status, step.exit_code, step.duration_seconds, truncated_stdout
                ));
                if step.status == StepStatus::Failed && !step.stderr.is_empty() {
                    out.push_str(&format!("      stderr: {}\n", truncate_chars(&step.stderr, 500)));
                }
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(command: &str, on_fail: FailurePolicy) -> PipelineStep {
        PipelineStep {
            command: command.to_string(),
            on_fail,
            name: None,
            working_directory: None,
        }
    }

    #[tokio::test]
    async fn stop_policy_skips_remaining_steps_with_zero_duration() {
        let steps = vec![
            step("exit 1", FailurePolicy::Stop),
            step("echo never runs", FailurePolicy::Stop),
        ];
        let result = run(&steps).await;
        assert_eq!(result.steps[0].status, StepStatus::Failed);
        assert_eq!(result.steps[1].status, StepStatus::Skipped);
        assert_eq!(result.steps[1].duration_seconds, 0.0);
        assert!(!result.success);
    }

    #[tokio::test]
    async fn continue_policy_runs_every_step() {
        let steps = vec![
            step("exit 1", FailurePolicy::Continue),
            step("echo still runs", FailurePolicy::Stop),
        ];
        let result = run(&steps).await;
        assert_eq!(result.steps[1].status, StepStatus::Success);
    }

    #[tokio::test]
    async fn all_success_is_overall_success() {
        let steps = vec![step("true", FailurePolicy::Stop), step("true", FailurePolicy::Stop)];
        let result = run(&steps).await;
        assert!(result.success);
    }
}
