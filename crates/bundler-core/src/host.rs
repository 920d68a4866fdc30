//! Host integration
//!
//! The pipeline never talks to a UI directly. It yields through
//! [`Host::pump`] between units of work, asks [`Host::confirm`] before
//! destructive or irreversible steps and publishes [`PipelineEvent`]s.

use crate::log::LogEntry;
use crate::state::{PhaseCell, PipelineState};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

/// Question the host must answer before the run continues
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmPrompt {
    /// The working directory has content that will be deleted
    ClearWorkingDirectory { path: PathBuf },
    /// The texture tool is missing; continue without texture processing?
    DisableTextureProcessing { tool: PathBuf },
    /// Archives are ready. Uploading overwrites `existing` remote files.
    UploadBundles {
        archives: Vec<String>,
        existing: Vec<String>,
    },
}

#[async_trait]
pub trait Host: Send + Sync {
    /// Let the host process its own events
    async fn pump(&self) {
        tokio::task::yield_now().await;
    }

    async fn confirm(&self, prompt: &ConfirmPrompt) -> bool;
}

/// Host that says yes to everything, for unattended runs
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoConfirm;

#[async_trait]
impl Host for AutoConfirm {
    async fn confirm(&self, prompt: &ConfirmPrompt) -> bool {
        tracing::debug!(?prompt, "confirming automatically");
        true
    }
}

/// Lifecycle and progress notifications
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    Started,
    Stopped { success: bool },
    Progress { action: String, percent: Option<u8> },
    Log(LogEntry),
}

/// Requests a running pipeline to stop
#[derive(Debug, Clone)]
pub struct StopHandle {
    phase: Arc<PhaseCell>,
}

impl StopHandle {
    pub(crate) fn new(phase: Arc<PhaseCell>) -> Self {
        Self { phase }
    }

    /// Ask the run to stop and roll back. Returns `false` when there is
    /// nothing to stop, a stop is already pending, or uploads have started.
    pub fn request_stop(&self) -> bool {
        let accepted = self.phase.request_stop();
        if accepted {
            tracing::info!("stop requested");
        } else {
            tracing::debug!(state = ?self.phase.state(), "stop request refused");
        }
        accepted
    }

    #[must_use]
    pub fn state(&self) -> PipelineState {
        self.phase.state()
    }

    #[must_use]
    pub fn is_stopping(&self) -> bool {
        self.phase.is_stopping()
    }
}
