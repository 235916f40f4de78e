//! Session manager: named handles onto
//! tabs/panes in a host terminal application. This is a bookkeeping actor --
//! the actual tab creation/writing/closing is delegated to a
//! [`TerminalAutomation`] collaborator.

use crate::host::{TabAddressing, TerminalAutomation};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Serialize)]
pub struct TerminalSession {
    pub name: String,
    pub terminal: String,
    pub tab_index: usize,
    pub created_at: DateTime<Utc>,
    pub last_command_at: Option<DateTime<Utc>>,
    pub command_count: u64,
}

struct TerminalCounters {
    next_index: HashMap<String, usize>,
}

pub struct SessionManager {
    sessions: Arc<Mutex<HashMap<String, TerminalSession>>>,
    counters: Arc<Mutex<TerminalCounters>>,
    automation: Arc<dyn TerminalAutomation>,
}

impl SessionManager {
    #[must_use]
    pub fn new(automation: Arc<dyn TerminalAutomation>) -> Self {
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            counters: Arc::new(Mutex::new(TerminalCounters { next_index: HashMap::new() })),
            automation,
        }
    }

    /// Open a new tab in `terminal`, optionally `cd`-ing into
    /// `working_directory`, and register it under `name`. `name` must be
    /// unique among live sessions.
    pub async fn open(
        &self,
        name: &str,
        terminal: &str,
        working_directory: Option<&str>,
    ) -> Result<TerminalSession, String> {
        {
            let guard = self.sessions.lock().await;
            if guard.contains_key(name) {
                return Err(format!("session name '{name}' is already in use"));
            }
        }

        let tab_index = {
            let mut counters = self.counters.lock().await;
            let next = counters.next_index.entry(terminal.to_string()).or_insert(0);
            let assigned = *next;
            *next += 1;
            assigned
        };

        self.automation.open_tab(terminal, working_directory).await?;

        let session = TerminalSession {
            name: name.to_string(),
            terminal: terminal.to_string(),
            tab_index,
            created_at: Utc::now(),
            last_command_at: None,
            command_count: 0,
        };

        self.sessions.lock().await.insert(name.to_string(), session.clone());
        Ok(session)
    }

    /// Write `command` into the session's tab. For terminals that expose
    /// scripted tab addressing, targets tab `index + 1` (one-based). For
    /// terminals that don't, falls back to activating the app and
    /// synthesising keystrokes -- the returned notice flags that path so
    /// callers can annotate their response.
    pub async fn send(&self, name: &str, command: &str) -> Result<Option<String>, String> {
        let tab_number = {
            let guard = self.sessions.lock().await;
            let session = guard.get(name).ok_or_else(|| format!("no session named '{name}'"))?;
            session.tab_index + 1
        };

        let terminal = {
            let guard = self.sessions.lock().await;
            guard.get(name).unwrap().terminal.clone()
        };

        let addressing = self.automation.write_to_tab(&terminal, tab_number, command).await?;

        let mut guard = self.sessions.lock().await;
        if let Some(session) = guard.get_mut(name) {
            session.last_command_at = Some(Utc::now());
            session.command_count += 1;
        }

        Ok(match addressing {
            TabAddressing::Scripted => None,
            TabAddressing::Keystrokes => Some(format!(
                "'{terminal}' does not support scripted tab addressing; the command was sent by activating the app and synthesising keystrokes"
            )),
        })
    }

    /// Remove the session and, unless suppressed, dispatch a "close tab"
    /// script.
    pub async fn close(&self, name: &str, close_tab: bool) -> Result<(), String> {
        let session = {
            let mut guard = self.sessions.lock().await;
            guard.remove(name).ok_or_else(|| format!("no session named '{name}'"))?
        };

        if close_tab {
            self.automation.close_tab(&session.terminal, session.tab_index + 1).await?;
        }
        Ok(())
    }

    /// Sessions sorted by creation instant ascending.
    pub async fn list(&self) -> Vec<TerminalSession> {
        let guard = self.sessions.lock().await;
        let mut sessions: Vec<_> = guard.values().cloned().collect();
        sessions.sort_by_key(|s| s.created_at);
        sessions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeAutomation {
        scriptable: bool,
        opens: AtomicUsize,
    }

    #[async_trait]
    impl TerminalAutomation for FakeAutomation {
        async fn open_tab(&self, _terminal: &str, _working_directory: Option<&str>) -> Result<(), String> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn write_to_tab(&self, _terminal: &str, _tab_number: usize, _command: &str) -> Result<TabAddressing, String> {
            Ok(if self.scriptable { TabAddressing::Scripted } else { TabAddressing::Keystrokes })
        }
        async fn close_tab(&self, _terminal: &str, _tab_number: usize) -> Result<(), String> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn tab_indices_are_per_terminal_monotonic() {
        let manager = SessionManager::new(Arc::new(FakeAutomation { scriptable: true, opens: AtomicUsize::new(0) }));
        let a = manager.open("a", "iTerm2", None).await.unwrap();
        let b = manager.open("b", "iTerm2", None).await.unwrap();
        let c = manager.open("c", "Terminal", None).await.unwrap();
        assert_eq!(a.tab_index, 0);
        assert_eq!(b.tab_index, 1);
        assert_eq!(c.tab_index, 0);
    }

    #[tokio::test]
    async fn duplicate_name_is_rejected() {
        let manager = SessionManager::new(Arc::new(FakeAutomation { scriptable: true, opens: AtomicUsize::new(0) }));
        manager.open("dup", "iTerm2", None).await.unwrap();
        assert!(manager.open("dup", "iTerm2", None).await.is_err());
    }

    #[tokio::test]
    async fn keystroke_fallback_is_annotated() {
        let manager = SessionManager::new(Arc::new(FakeAutomation { scriptable: false, opens: AtomicUsize::new(0) }));
        manager.open("s", "Warp", None).await.unwrap();
        let notice = manager.send("s", "echo hi").await.unwrap();
        assert!(notice.is_some());
    }

    #[tokio::test]
    async fn list_is_sorted_by_creation_order() {
        let manager = SessionManager::new(Arc::new(FakeAutomation { scriptable: true, opens: AtomicUsize::new(0) }));
        manager.open("first", "iTerm2", None).await.unwrap();
        manager.open("second", "iTerm2", None).await.unwrap();
        let names: Vec<_> = manager.list().await.into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["first", "second"]);
    }
}
