//! Host automation collaborators: clipboard access, desktop
//! notifications, and terminal-tab scripting. The core treats the GUI
//! automation layer, the clipboard, and notifications as external systems
//! it talks to over a subprocess or a small library call -- it never
//! reimplements them.

use async_trait::async_trait;

/// Desktop notification sink.
#[async_trait]
pub trait HostNotifier: Send + Sync + 'static {
    async fn notify(&self, title: &str, message: &str);
}

/// System clipboard access.
#[async_trait]
pub trait Clipboard: Send + Sync + 'static {
    async fn copy(&self, text: &str) -> Result<(), String>;
    async fn read(&self) -> Result<String, String>;
}

/// Whether writing to a tab can be addressed by index, or only by
/// synthesizing keystrokes into the frontmost window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TabAddressing {
    Scripted,
    Keystrokes,
}

/// Terminal-tab automation. One call opens a new tab and
/// returns whatever the OS automation layer reports back; the caller
/// (the session manager) owns the tab-index bookkeeping.
#[async_trait]
pub trait TerminalAutomation: Send + Sync + 'static {
    /// Open a new tab in `terminal`, optionally `cd`-ing into `working_directory`.
    async fn open_tab(&self, terminal: &str, working_directory: Option<&str>) -> Result<(), String>;

    /// Write `command` (plus a trailing newline) into the tab at one-based
    /// `tab_number` of `terminal`.
    async fn write_to_tab(&self, terminal: &str, tab_number: usize, command: &str) -> Result<TabAddressing, String>;

    /// Close the tab at one-based `tab_number` of `terminal`.
    async fn close_tab(&self, terminal: &str, tab_number: usize) -> Result<(), String>;
}

/// `notify-rust`-backed notifier, matching the asynchronous wrapping and
/// macOS bundle-id workaround used for background daemons that lack
/// Automation permissions for the AppleScript bundle-id lookup.
#[derive(Clone, Copy, Debug, Default)]
pub struct DesktopNotifier;

impl DesktopNotifier {
    #[must_use]
    pub fn new() -> Self {
        #[cfg(target_os = "macos")]
        {
            let _ = mac_notification_sys::set_application("com.apple.Terminal");
        }
        Self
    }
}

#[async_trait]
impl HostNotifier for DesktopNotifier {
    async fn notify(&self, title: &str, message: &str) {
        let title = title.to_string();
        let message = message.to_string();
        let result = tokio::task::spawn_blocking(move || {
            notify_rust::Notification::new().summary(&title).body(&message).show()
        })
        .await;
        match result {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "desktop notification failed"),
            Err(e) => tracing::warn!(error = %e, "desktop notification task panicked"),
        }
    }
}

/// Clipboard access via platform CLI tools (`pbcopy`/`pbpaste` on macOS,
/// `xclip`/`wl-copy` on Linux), run as plain subprocesses so no clipboard
/// library needs X11/Wayland linkage at build time.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClipboard;

#[async_trait]
impl Clipboard for SystemClipboard {
    async fn copy(&self, text: &str) -> Result<(), String> {
        use tokio::io::AsyncWriteExt;
        use tokio::process::Command;

        let (program, args): (&str, &[&str]) = if cfg!(target_os = "macos") {
            ("pbcopy", &[])
        } else {
            ("xclip", &["-selection", "clipboard"])
        };

        let mut child = Command::new(program)
            .args(args)
            .stdin(std::process::Stdio::piped())
            .spawn()
            .map_err(|e| format!("failed to launch clipboard writer '{program}': {e}"))?;

        let mut stdin = child.stdin.take().expect("stdin was piped");
        stdin.write_all(text.as_bytes()).await.map_err(|e| format!("failed to write to clipboard: {e}"))?;
        drop(stdin);

        let status = child.wait().await.map_err(|e| format!("clipboard writer failed: {e}"))?;
        if status.success() {
            Ok(())
        } else {
            Err(format!("clipboard writer '{program}' exited with {status}"))
        }
    }

    async fn read(&self) -> Result<String, String> {
        use tokio::process::Command;

        let (program, args): (&str, &[&str]) = if cfg!(target_os = "macos") {
            ("pbpaste", &[])
        } else {
            ("xclip", &["-selection", "clipboard", "-o"])
        };

        let output = Command::new(program)
            .args(args)
            .output()
            .await
            .map_err(|e| format!("failed to launch clipboard reader '{program}': {e}"))?;
        if !output.status.success() {
            return Err(format!("clipboard reader '{program}' exited with {}", output.status));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Terminals addressable by AppleScript tab index (`tab N of window 1`).
const SCRIPTABLE_TERMINALS: &[&str] = &["iTerm2", "Terminal"];

/// AppleScript-backed terminal automation. Non-macOS or non-scriptable
/// terminals fall back to activating the application and synthesising
/// keystrokes via System Events, which the response annotates as a notice
/// rather than a guaranteed delivery.
#[derive(Clone, Copy, Debug, Default)]
pub struct OsascriptAutomation;

#[async_trait]
impl TerminalAutomation for OsascriptAutomation {
    async fn open_tab(&self, terminal: &str, working_directory: Option<&str>) -> Result<(), String> {
        let cd_suffix = working_directory
            .map(|dir| format!(" with command \"cd {} && clear\"", shell_escape(dir)))
            .unwrap_or_default();

        let script = if terminal.eq_ignore_ascii_case("iTerm2") {
            format!(
                r#"tell application "iTerm2" to tell current window to create tab{cd_suffix}"#
            )
        } else {
            format!(r#"tell application "Terminal" to do script "" {}"#, cd_suffix)
        };

        run_osascript(&script).await
    }

    async fn write_to_tab(&self, terminal: &str, tab_number: usize, command: &str) -> Result<TabAddressing, String> {
        if SCRIPTABLE_TERMINALS.iter().any(|t| t.eq_ignore_ascii_case(terminal)) {
            let script = format!(
                r#"tell application "{terminal}" to tell tab {tab_number} of window 1 to write text "{}""#,
                escape_applescript(command)
            );
            run_osascript(&script).await?;
            Ok(TabAddressing::Scripted)
        } else {
            let script = format!(
                r#"tell application "{terminal}" to activate
                tell application "System Events" to keystroke "{}"
                tell application "System Events" to key code 36"#,
                escape_applescript(command)
            );
            run_osascript(&script).await?;
            Ok(TabAddressing::Keystrokes)
        }
    }

    async fn close_tab(&self, terminal: &str, tab_number: usize) -> Result<(), String> {
        let script = format!(
            r#"tell application "{terminal}" to close tab {tab_number} of window 1"#
        );
        run_osascript(&script).await
    }
}

async fn run_osascript(script: &str) -> Result<(), String> {
    let output = tokio::process::Command::new("osascript")
        .arg("-e")
        .arg(script)
        .output()
        .await
        .map_err(|e| format!("failed to launch osascript: {e}"))?;
    if output.status.success() {
        Ok(())
    } else {
        Err(format!(
            "osascript exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr)
        ))
    }
}

fn escape_applescript(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

fn shell_escape(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}
