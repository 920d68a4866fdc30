//! Pipeline phases and per-run state
//!
//! Phase changes go through an explicit transition table. The current
//! phase and the stop request flag live together behind one lock so that
//! a stop request can never slip in after uploads have begun.

use crate::config::RunSettings;
use crate::error::PipelineError;
use bundler_asset::{AssetIdentityCache, BundleAllocator};
use bundler_scene::RewriteJournal;
use bundler_tools::{ArchiveReport, ProcessRunner, TextureTranscoder};
use indexmap::IndexSet;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

/// Pipeline phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PipelineState {
    Idle,
    /// Authentication, validation, working directory and tool checks
    Starting,
    BackingUp,
    WaitingForAssets,
    Processing,
    WaitingForBundles,
    WaitingForConfirmation,
    Uploading,
    Replicating,
}

impl PipelineState {
    /// A stop request can still roll the run back
    #[inline]
    #[must_use]
    pub fn accepts_stop(self) -> bool {
        !matches!(
            self,
            PipelineState::Idle | PipelineState::Uploading | PipelineState::Replicating
        )
    }

    /// Scene edits are still local and must be restored on failure
    #[inline]
    #[must_use]
    pub fn needs_rollback(self) -> bool {
        !matches!(self, PipelineState::Idle | PipelineState::Replicating)
    }
}

/// Validate a phase change against the transition table
pub fn validate_transition(from: PipelineState, to: PipelineState) -> Result<(), PipelineError> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(PipelineError::IllegalTransition { from, to })
    }
}

#[must_use]
pub fn allowed_transitions(from: PipelineState) -> Vec<PipelineState> {
    use PipelineState::*;
    match from {
        Idle => vec![Starting],
        Starting => vec![BackingUp, Idle],
        BackingUp => vec![WaitingForAssets, Idle],
        WaitingForAssets => vec![Processing, Idle],
        Processing => vec![WaitingForBundles, Idle],
        WaitingForBundles => vec![WaitingForConfirmation, Idle],
        WaitingForConfirmation => vec![Uploading, Idle],
        Uploading => vec![Replicating, Idle],
        Replicating => vec![Idle],
    }
}

#[derive(Debug)]
struct PhaseInner {
    state: PipelineState,
    stopping: bool,
}

/// Current phase plus the stop request flag
#[derive(Debug)]
pub struct PhaseCell {
    inner: Mutex<PhaseInner>,
}

impl Default for PhaseCell {
    fn default() -> Self {
        Self {
            inner: Mutex::new(PhaseInner {
                state: PipelineState::Idle,
                stopping: false,
            }),
        }
    }
}

impl PhaseCell {
    #[must_use]
    pub fn state(&self) -> PipelineState {
        self.inner.lock().state
    }

    #[must_use]
    pub fn is_stopping(&self) -> bool {
        self.inner.lock().stopping
    }

    /// Move to `to`. Entering any phase but `Idle` fails with `Cancelled`
    /// once a stop was requested.
    pub fn enter(&self, to: PipelineState) -> Result<(), PipelineError> {
        let mut inner = self.inner.lock();
        validate_transition(inner.state, to)?;
        if inner.stopping && to != PipelineState::Idle {
            return Err(PipelineError::Cancelled);
        }
        inner.state = to;
        Ok(())
    }

    /// Fail with `Cancelled` if a stop was requested
    pub fn checkpoint(&self) -> Result<(), PipelineError> {
        if self.is_stopping() {
            Err(PipelineError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Flag a stop. Refused when idle, already stopping, uploading or
    /// replicating.
    pub fn request_stop(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.stopping || !inner.state.accepts_stop() {
            return false;
        }
        inner.stopping = true;
        true
    }

    /// Back to `Idle` with the stop flag cleared
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = PipelineState::Idle;
        inner.stopping = false;
    }
}

/// Outcome counters of a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounters {
    pub entities_processed: usize,
    pub empty_entities_removed: usize,
    /// Attribute elements pointed at a bundle
    pub converted_refs: usize,
}

/// Everything one run owns
#[derive(Debug)]
pub struct RunState {
    pub settings: RunSettings,
    pub cache: AssetIdentityCache,
    pub allocator: BundleAllocator,
    pub journal: RewriteJournal,
    /// Original references replaced by bundle refs, unloaded on success
    pub superseded: IndexSet<String>,
    /// Generated material `outputMat` renames, old name to new name
    pub generated_names: HashMap<String, String>,
    pub transcoder: TextureTranscoder,
    pub counters: RunCounters,
    pub archives: Vec<ArchiveReport>,
    /// Keys of archives that reached storage
    pub uploaded: Vec<String>,
    pub snapshot: Option<PathBuf>,
    pub forgotten: usize,
    pub replicated: usize,
    pub started: Instant,
}

impl RunState {
    pub fn new(settings: RunSettings, runner: Arc<dyn ProcessRunner>) -> Self {
        Self {
            cache: AssetIdentityCache::new(settings.identity.clone()),
            allocator: BundleAllocator::new(settings.split_size),
            journal: RewriteJournal::new(),
            superseded: IndexSet::new(),
            generated_names: HashMap::new(),
            transcoder: TextureTranscoder::new(settings.texture.clone(), runner),
            counters: RunCounters::default(),
            archives: Vec::new(),
            uploaded: Vec::new(),
            snapshot: None,
            forgotten: 0,
            replicated: 0,
            started: Instant::now(),
            settings,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use PipelineState::*;

    const ALL: [PipelineState; 9] = [
        Idle,
        Starting,
        BackingUp,
        WaitingForAssets,
        Processing,
        WaitingForBundles,
        WaitingForConfirmation,
        Uploading,
        Replicating,
    ];

    #[test]
    fn happy_path_is_allowed() {
        for pair in ALL.windows(2) {
            assert!(validate_transition(pair[0], pair[1]).is_ok(), "{pair:?}");
        }
        assert!(validate_transition(Replicating, Idle).is_ok());
    }

    #[test]
    fn phases_cannot_be_skipped() {
        assert!(matches!(
            validate_transition(Processing, Uploading),
            Err(PipelineError::IllegalTransition { from: Processing, to: Uploading })
        ));
        assert!(validate_transition(Idle, Processing).is_err());
        assert!(validate_transition(Idle, BackingUp).is_err());
        assert!(validate_transition(Replicating, Uploading).is_err());
    }

    #[test]
    fn every_active_phase_can_abort_to_idle() {
        for state in ALL.iter().copied().filter(|s| *s != Idle) {
            assert!(allowed_transitions(state).contains(&Idle), "{state:?}");
        }
    }

    #[test]
    fn stop_is_refused_when_idle_or_uploading() {
        let phase = PhaseCell::default();
        assert!(!phase.request_stop());

        phase.enter(Starting).unwrap();
        assert!(phase.request_stop());
        assert!(!phase.request_stop(), "second request is refused");
        assert!(matches!(phase.enter(BackingUp), Err(PipelineError::Cancelled)));
        assert!(phase.enter(Idle).is_ok());

        phase.reset();
        for state in [Starting, BackingUp, WaitingForAssets, Processing, WaitingForBundles, WaitingForConfirmation, Uploading] {
            phase.enter(state).unwrap();
        }
        assert!(!phase.request_stop());
        phase.enter(Replicating).unwrap();
        assert!(!phase.request_stop());
    }

    #[test]
    fn checkpoint_reports_cancellation() {
        let phase = PhaseCell::default();
        phase.enter(Starting).unwrap();
        phase.enter(BackingUp).unwrap();
        assert!(phase.checkpoint().is_ok());
        phase.request_stop();
        assert!(phase.checkpoint().unwrap_err().is_cancelled());
        phase.reset();
        assert!(!phase.is_stopping());
        assert_eq!(phase.state(), Idle);
    }
}
