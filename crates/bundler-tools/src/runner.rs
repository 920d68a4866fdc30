//! External process runner
//!
//! Tools are run with a deadline. The wait polls the child every 40 ms so
//! the runtime stays free for other work, and a child that outlives its
//! deadline is killed. Failures are reported as [`ToolOutcome`] values.

use crate::error::ToolError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::time::{interval, timeout};
use tracing::{debug, warn};

/// Child status polling granularity
pub const POLL_INTERVAL: Duration = Duration::from_millis(40);

/// Result of one tool run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolOutcome {
    Success { stdout: String },
    TimedOut,
    NonZeroExit(i32),
    FailedToStart(String),
}

impl ToolOutcome {
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, ToolOutcome::Success { .. })
    }

    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            ToolOutcome::Success { .. } => "success".to_string(),
            ToolOutcome::TimedOut => "timed out".to_string(),
            ToolOutcome::NonZeroExit(code) => format!("exited with code {code}"),
            ToolOutcome::FailedToStart(reason) => format!("failed to start: {reason}"),
        }
    }
}

/// Program, arguments and deadline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub timeout: Duration,
}

impl ToolInvocation {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            timeout,
        }
    }

    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

/// Find a tool by explicit path or on `PATH`
pub fn locate_tool(tool: &Path) -> Result<PathBuf, ToolError> {
    if tool.is_file() {
        return Ok(tool.to_path_buf());
    }
    if tool.components().count() == 1 {
        if let Some(paths) = std::env::var_os("PATH") {
            for dir in std::env::split_paths(&paths) {
                let candidate = dir.join(tool);
                if candidate.is_file() {
                    return Ok(candidate);
                }
                let exe = candidate.with_extension(std::env::consts::EXE_EXTENSION);
                if exe.is_file() {
                    return Ok(exe);
                }
            }
        }
    }
    Err(ToolError::NotFound(tool.to_path_buf()))
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(&self, invocation: &ToolInvocation) -> ToolOutcome;
}

/// Runs tools as child processes
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

#[async_trait]
impl ProcessRunner for SystemRunner {
    async fn run(&self, invocation: &ToolInvocation) -> ToolOutcome {
        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        if let Some(dir) = &invocation.working_dir {
            command.current_dir(dir);
        }

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(err) => {
                warn!(program = %invocation.program.display(), error = %err, "tool failed to start");
                return ToolOutcome::FailedToStart(err.to_string());
            }
        };

        // drain stdout while waiting so a chatty tool cannot block on a full pipe
        let stdout = child.stdout.take();
        let reader = tokio::spawn(async move {
            let mut buf = String::new();
            if let Some(mut out) = stdout {
                let _ = out.read_to_string(&mut buf).await;
            }
            buf
        });

        let status = timeout(invocation.timeout, async {
            let mut ticker = interval(POLL_INTERVAL);
            loop {
                ticker.tick().await;
                match child.try_wait() {
                    Ok(Some(status)) => break Ok(status),
                    Ok(None) => {}
                    Err(err) => break Err(err),
                }
            }
        })
        .await;

        match status {
            Err(_) => {
                warn!(
                    program = %invocation.program.display(),
                    timeout_secs = invocation.timeout.as_secs(),
                    "tool did not finish in time, killing it"
                );
                let _ = child.kill().await;
                reader.abort();
                ToolOutcome::TimedOut
            }
            Ok(Err(err)) => {
                reader.abort();
                ToolOutcome::FailedToStart(err.to_string())
            }
            Ok(Ok(status)) => {
                let stdout = reader.await.unwrap_or_default();
                if status.success() {
                    debug!(program = %invocation.program.display(), "tool finished");
                    ToolOutcome::Success { stdout }
                } else {
                    ToolOutcome::NonZeroExit(status.code().unwrap_or(-1))
                }
            }
        }
    }
}
