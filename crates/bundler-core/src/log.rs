//! User facing run log
//!
//! Entries are kept in memory for the host, mirrored to tracing, broadcast
//! as [`PipelineEvent::Log`] and, while a run is active, appended to
//! `packager_main-log.txt` in the working directory.

use crate::host::PipelineEvent;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::broadcast;

/// Main log file name inside the working directory
pub const MAIN_LOG_FILE: &str = "packager_main-log.txt";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    /// Section headers and success lines
    Highlight,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub severity: Severity,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl LogEntry {
    /// Plain text form, as written to the log file
    #[must_use]
    pub fn to_line(&self) -> String {
        match self.severity {
            Severity::Warning => format!("[WARNING]: {}", self.message),
            Severity::Error => format!("[ERROR]: {}", self.message),
            Severity::Info | Severity::Highlight => self.message.clone(),
        }
    }

    #[must_use]
    pub fn to_html(&self) -> String {
        let message = escape_html(&self.message);
        match self.severity {
            Severity::Warning => {
                format!("<span style='color: blue;'>[WARNING]: {message}</span>")
            }
            Severity::Error => format!("<span style='color: red;'>[ERROR]: {message}</span>"),
            Severity::Highlight => {
                format!("<span style='color: green;'><pre>{message}</pre></span>")
            }
            Severity::Info => format!("<span style='color: black;'><pre>{message}</pre></span>"),
        }
    }
}

/// Append-only run log
#[derive(Debug, Default)]
pub struct RunLog {
    entries: Mutex<Vec<LogEntry>>,
    file: Mutex<Option<(PathBuf, File)>>,
    events: Option<broadcast::Sender<PipelineEvent>>,
}

impl RunLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Log that also broadcasts every entry
    #[must_use]
    pub fn with_events(events: broadcast::Sender<PipelineEvent>) -> Self {
        Self {
            events: Some(events),
            ..Self::default()
        }
    }

    pub fn info(&self, message: impl Into<String>) {
        self.append(Severity::Info, message.into());
    }

    pub fn highlight(&self, message: impl Into<String>) {
        self.append(Severity::Highlight, message.into());
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.append(Severity::Warning, message.into());
    }

    pub fn error(&self, message: impl Into<String>) {
        self.append(Severity::Error, message.into());
    }

    pub fn append(&self, severity: Severity, message: String) {
        match severity {
            Severity::Info | Severity::Highlight => tracing::info!("{message}"),
            Severity::Warning => tracing::warn!("{message}"),
            Severity::Error => tracing::error!("{message}"),
        }
        let entry = LogEntry {
            severity,
            message,
            timestamp: Utc::now(),
        };
        if let Some((path, file)) = self.file.lock().as_mut() {
            if let Err(err) = writeln!(file, "{}", entry.to_line()) {
                tracing::warn!(path = %path.display(), error = %err, "failed to write log file");
            }
        }
        if let Some(events) = &self.events {
            let _ = events.send(PipelineEvent::Log(entry.clone()));
        }
        self.entries.lock().push(entry);
    }

    /// Start mirroring to `<dir>/packager_main-log.txt`, truncating it
    pub fn open_file(&self, dir: &Path) -> std::io::Result<PathBuf> {
        let path = dir.join(MAIN_LOG_FILE);
        let file = File::create(&path)?;
        *self.file.lock() = Some((path.clone(), file));
        Ok(path)
    }

    pub fn close_file(&self) {
        if let Some((_, mut file)) = self.file.lock().take() {
            let _ = file.flush();
        }
    }

    #[must_use]
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().clone()
    }

    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.severity == severity)
            .count()
    }

    /// Entries rendered for an HTML log view, one line each
    #[must_use]
    pub fn render_html(&self) -> String {
        self.entries
            .lock()
            .iter()
            .map(LogEntry::to_html)
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severities_are_tagged() {
        let log = RunLog::new();
        log.info("copying assets");
        log.warn("texture skipped");
        log.error("zip failed");
        let lines: Vec<String> = log.entries().iter().map(LogEntry::to_line).collect();
        assert_eq!(
            lines,
            vec!["copying assets", "[WARNING]: texture skipped", "[ERROR]: zip failed"]
        );
        assert_eq!(log.count(Severity::Warning), 1);
    }

    #[test]
    fn html_is_escaped_and_colored() {
        let log = RunLog::new();
        log.error("bad <ref>");
        log.highlight("PATHS");
        let html = log.render_html();
        assert!(html.contains("<span style='color: red;'>[ERROR]: bad &lt;ref&gt;</span>"));
        assert!(html.contains("color: green;'><pre>PATHS</pre>"));
    }

    #[test]
    fn mirrors_to_file_while_open() {
        let dir = tempfile::tempdir().unwrap();
        let log = RunLog::new();
        log.info("before");
        let path = log.open_file(dir.path()).unwrap();
        log.warn("during");
        log.close_file();
        log.info("after");
        let text = std::fs::read_to_string(path).unwrap();
        assert_eq!(text, "[WARNING]: during\n");
    }

    #[tokio::test]
    async fn entries_are_broadcast() {
        let (tx, mut rx) = broadcast::channel(8);
        let log = RunLog::with_events(tx);
        log.info("hello");
        match rx.recv().await.unwrap() {
            PipelineEvent::Log(entry) => assert_eq!(entry.message, "hello"),
            other => panic!("unexpected event {other:?}"),
        }
    }
}
