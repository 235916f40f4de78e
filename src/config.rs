//! Configuration collaborator.
//!
//! Loads `config.json` from the user's configuration directory. This is a
//! thin, best-effort loader: deep schema validation and migration are out of
//! scope here; this module only extracts the fields the security gate and
//! startup housekeeping need.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default ceiling on command length, in bytes.
const DEFAULT_MAX_COMMAND_LENGTH: usize = 16 * 1024;

/// Default auxiliary TCP port; 0 means the request sink is disabled.
const DEFAULT_AUX_PORT: u16 = 0;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Exact command strings that are always rejected.
    pub blocked_commands: Vec<String>,
    /// Regex patterns; a match on the raw command text rejects it.
    pub blocked_patterns: Vec<String>,
    /// Commands longer than this (bytes) are rejected before any subprocess
    /// is created.
    pub max_command_length: usize,
    /// Terminal application identifier preferred for terminal-mediated
    /// execution and session tabs (e.g. "iTerm2", "Terminal").
    pub preferred_terminal: Option<String>,
    /// Port for the auxiliary TCP request sink. 0 disables it.
    pub aux_port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            blocked_commands: Vec::new(),
            blocked_patterns: Vec::new(),
            max_command_length: DEFAULT_MAX_COMMAND_LENGTH,
            preferred_terminal: None,
            aux_port: DEFAULT_AUX_PORT,
        }
    }
}

/// Directory under the user's config root that holds all persisted state.
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("devbridge")
}

impl Config {
    /// Load configuration from `config.json` under [`config_dir`]. A missing
    /// or malformed file yields defaults rather than an error -- the in-memory
    /// copy is authoritative for the process lifetime regardless.
    pub async fn load() -> Self {
        let path = config_dir().join("config.json");
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => match serde_json::from_str(&text) {
                Ok(cfg) => cfg,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "malformed config.json, using defaults");
                    Config::default()
                }
            },
            Err(_) => Config::default(),
        }
    }

    /// Compile the configured blocked patterns into regexes, dropping any
    /// that fail to compile (logged, not fatal). Recompiles on every call;
    /// `blocked_patterns` lists are short and this runs once per command, so
    /// it hasn't been worth caching.
    pub fn compiled_blocked_patterns(&self) -> Vec<regex::Regex> {
        self.blocked_patterns
            .iter()
            .filter_map(|p| match regex::Regex::new(p) {
                Ok(re) => Some(re),
                Err(e) => {
                    tracing::warn!(pattern = %p, error = %e, "invalid blocked_pattern, skipping");
                    None
                }
            })
            .collect()
    }
}
