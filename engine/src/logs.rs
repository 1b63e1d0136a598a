//! Engine log channel.
//!
//! ```text
//!   stages ──log_*()──▶ LOG_BROADCASTER ──▶ stderr (unless echo is off)
//!                                     └──▶ subscribers (LogRecorder, ...)
//! ```
//!
//! Recovered row problems travel as entries tagged with their
//! [`DiagnosticKind`] and row, so a subscriber can tell a missed join from
//! a failed rule without parsing messages. Stdout stays free for command
//! output.

use std::sync::atomic::{AtomicBool, Ordering};

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::resolve::{Diagnostic, DiagnosticKind};

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
}

impl LogLevel {
    fn marker(self) -> &'static str {
        match self {
            LogLevel::Info => "   ",
            LogLevel::Success => "   ✓",
            LogLevel::Warning => "   ⚠️",
            LogLevel::Error => "   ❌",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
    /// Nesting level for sub-steps
    #[serde(default)]
    pub indent: u8,
    /// Set when the entry reports a recovered diagnostic.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<DiagnosticKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row: Option<usize>,
}

impl LogEntry {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            indent: 0,
            kind: None,
            row: None,
        }
    }

    pub fn from_diagnostic(diagnostic: &Diagnostic) -> Self {
        Self {
            kind: Some(diagnostic.kind),
            row: diagnostic.row,
            ..Self::new(LogLevel::Warning, diagnostic.message.clone())
        }
    }

    pub fn with_indent(mut self, indent: u8) -> Self {
        self.indent = indent;
        self
    }

    /// The stderr line for this entry.
    pub fn render(&self) -> String {
        format!(
            "{}{} {}",
            "   ".repeat(self.indent as usize),
            self.level.marker(),
            self.message
        )
    }
}

/// Global log broadcaster
pub static LOG_BROADCASTER: Lazy<LogBroadcaster> = Lazy::new(LogBroadcaster::new);

pub struct LogBroadcaster {
    sender: broadcast::Sender<LogEntry>,
    echo: AtomicBool,
}

impl LogBroadcaster {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            sender,
            echo: AtomicBool::new(true),
        }
    }

    pub fn log(&self, entry: LogEntry) {
        if self.echo.load(Ordering::Relaxed) {
            eprintln!("{}", entry.render());
        }
        // No receivers is fine
        let _ = self.sender.send(entry);
    }

    /// Turn the stderr echo on or off; subscribers still get every entry.
    pub fn set_echo(&self, echo: bool) {
        self.echo.store(echo, Ordering::Relaxed);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LogEntry> {
        self.sender.subscribe()
    }
}

impl Default for LogBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

pub fn log_info(msg: impl Into<String>) {
    LOG_BROADCASTER.log(LogEntry::new(LogLevel::Info, msg));
}

pub fn log_success(msg: impl Into<String>) {
    LOG_BROADCASTER.log(LogEntry::new(LogLevel::Success, msg));
}

pub fn log_warning(msg: impl Into<String>) {
    LOG_BROADCASTER.log(LogEntry::new(LogLevel::Warning, msg));
}

pub fn log_error(msg: impl Into<String>) {
    LOG_BROADCASTER.log(LogEntry::new(LogLevel::Error, msg));
}

pub fn log_info_indent(msg: impl Into<String>, indent: u8) {
    LOG_BROADCASTER.log(LogEntry::new(LogLevel::Info, msg).with_indent(indent));
}

pub fn log_warning_indent(msg: impl Into<String>, indent: u8) {
    LOG_BROADCASTER.log(LogEntry::new(LogLevel::Warning, msg).with_indent(indent));
}

pub fn log_diagnostic(diagnostic: &Diagnostic, indent: u8) {
    LOG_BROADCASTER.log(LogEntry::from_diagnostic(diagnostic).with_indent(indent));
}

// =============================================================================
// Recording subscriber
// =============================================================================

/// Entries captured by a [`LogRecorder`].
#[derive(Debug, Clone, Default)]
pub struct LogSummary {
    pub entries: Vec<LogEntry>,
    /// Entries lost because the recorder fell behind the channel.
    pub skipped: u64,
}

impl LogSummary {
    pub fn count(&self, level: LogLevel) -> usize {
        self.entries.iter().filter(|e| e.level == level).count()
    }

    pub fn count_kind(&self, kind: DiagnosticKind) -> usize {
        self.entries.iter().filter(|e| e.kind == Some(kind)).count()
    }

    /// One JSON object per line.
    pub fn to_json_lines(&self) -> serde_json::Result<String> {
        let mut out = String::new();
        for entry in &self.entries {
            out.push_str(&serde_json::to_string(entry)?);
            out.push('\n');
        }
        Ok(out)
    }
}

/// Subscribes in a background task and collects entries until finished.
pub struct LogRecorder {
    stop: oneshot::Sender<()>,
    task: JoinHandle<LogSummary>,
}

impl LogRecorder {
    /// Record from [`LOG_BROADCASTER`]. Must be called inside a tokio runtime.
    pub fn start() -> Self {
        Self::start_on(&LOG_BROADCASTER)
    }

    pub fn start_on(broadcaster: &LogBroadcaster) -> Self {
        let mut receiver = broadcaster.subscribe();
        let (stop, mut stopped) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let mut summary = LogSummary::default();
            loop {
                tokio::select! {
                    biased;
                    received = receiver.recv() => match received {
                        Ok(entry) => summary.entries.push(entry),
                        Err(RecvError::Lagged(missed)) => summary.skipped += missed,
                        Err(RecvError::Closed) => break,
                    },
                    _ = &mut stopped => {
                        loop {
                            match receiver.try_recv() {
                                Ok(entry) => summary.entries.push(entry),
                                Err(TryRecvError::Lagged(missed)) => summary.skipped += missed,
                                Err(_) => break,
                            }
                        }
                        break;
                    }
                }
            }
            summary
        });

        Self { stop, task }
    }

    /// Stop recording and return everything logged since [`start`](Self::start).
    pub async fn finish(self) -> LogSummary {
        let _ = self.stop.send(());
        self.task.await.unwrap_or_default()
    }
}
