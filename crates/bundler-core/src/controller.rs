//! Pipeline controller
//!
//! Drives one bundling run through its phases:
//!
//! ```text
//! Idle -> Starting -> BackingUp -> WaitingForAssets -> Processing
//!      -> WaitingForBundles -> WaitingForConfirmation -> Uploading
//!      -> Replicating -> Idle
//! ```
//!
//! Every run ends in [`PipelineController::start`]'s stop path, which rolls
//! local scene edits back when the run failed before replication, stores
//! the [`RunSummary`] and returns the controller to `Idle`.

use crate::config::{PackagerConfig, RunSettings};
use crate::error::{ConfigError, PipelineError, Result};
use crate::host::{ConfirmPrompt, Host, PipelineEvent, StopHandle};
use crate::log::RunLog;
use crate::progress::ProgressAggregator;
use crate::rewriter::{targets, ReferenceRewriter};
use crate::state::{PhaseCell, PipelineState, RunState};
use crate::storage::StorageClient;
use crate::summary::{ArchiveSummary, ClassSummary, RunSummary};
use bundler_asset::{shard_folder, AssetClass, AssetSource, ParsedRef};
use bundler_scene::{ChangeScope, ComponentKind, SceneStore};
use bundler_tools::{
    locate_tool, ArchiveJob, ArchiveWorkerPool, Archiver, Compression, ProcessRunner,
    SystemRunner, ToolArchiver,
};
use futures::future::join_all;
use indexmap::IndexSet;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

/// Capacity of the event channel
const EVENT_CAPACITY: usize = 256;

/// Wait between polls of pending asset transfers
#[must_use]
pub fn poll_interval(pending: usize) -> Duration {
    match pending {
        0..=99 => Duration::from_secs(1),
        100..=299 => Duration::from_secs(3),
        _ => Duration::from_secs(5),
    }
}

/// Owns the collaborators and at most one active run
pub struct PipelineController {
    scene: Arc<dyn SceneStore>,
    assets: Arc<dyn AssetSource>,
    storage: Arc<dyn StorageClient>,
    host: Arc<dyn Host>,
    runner: Arc<dyn ProcessRunner>,
    archiver: Option<Arc<dyn Archiver>>,
    config: parking_lot::Mutex<PackagerConfig>,
    run: Mutex<Option<RunState>>,
    phase: Arc<PhaseCell>,
    log: Arc<RunLog>,
    events: broadcast::Sender<PipelineEvent>,
    last_summary: parking_lot::Mutex<Option<RunSummary>>,
}

impl PipelineController {
    pub fn new(
        scene: Arc<dyn SceneStore>,
        assets: Arc<dyn AssetSource>,
        storage: Arc<dyn StorageClient>,
        host: Arc<dyn Host>,
        config: PackagerConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            scene,
            assets,
            storage,
            host,
            runner: Arc::new(SystemRunner),
            archiver: None,
            config: parking_lot::Mutex::new(config),
            run: Mutex::new(None),
            phase: Arc::new(PhaseCell::default()),
            log: Arc::new(RunLog::with_events(events.clone())),
            events,
            last_summary: parking_lot::Mutex::new(None),
        }
    }

    /// Run external tools through `runner`
    #[must_use]
    pub fn with_runner(mut self, runner: Arc<dyn ProcessRunner>) -> Self {
        self.runner = runner;
        self
    }

    /// Build archives with `archiver` instead of the configured tool
    #[must_use]
    pub fn with_archiver(mut self, archiver: Arc<dyn Archiver>) -> Self {
        self.archiver = Some(archiver);
        self
    }

    #[must_use]
    pub fn config(&self) -> PackagerConfig {
        self.config.lock().clone()
    }

    /// Replace the configuration used by the next run
    pub fn set_config(&self, config: PackagerConfig) {
        *self.config.lock() = config;
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.events.subscribe()
    }

    #[must_use]
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle::new(Arc::clone(&self.phase))
    }

    pub fn request_stop(&self) -> bool {
        self.stop_handle().request_stop()
    }

    #[inline]
    #[must_use]
    pub fn state(&self) -> PipelineState {
        self.phase.state()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.run.try_lock().is_err() || self.phase.state() != PipelineState::Idle
    }

    #[must_use]
    pub fn log(&self) -> Arc<RunLog> {
        Arc::clone(&self.log)
    }

    #[must_use]
    pub fn last_summary(&self) -> Option<RunSummary> {
        self.last_summary.lock().clone()
    }

    /// Run the whole pipeline. The summary is also kept in
    /// [`last_summary`](Self::last_summary) when the run fails.
    pub async fn start(&self) -> Result<RunSummary> {
        let Ok(mut slot) = self.run.try_lock() else {
            return Err(PipelineError::AlreadyRunning);
        };
        if self.phase.state() != PipelineState::Idle {
            return Err(PipelineError::AlreadyRunning);
        }

        self.log.clear();
        let result = self.run_pipeline(&mut slot).await;
        let summary = self.stop(&mut slot, &result);
        result.map(|()| summary)
    }

    async fn run_pipeline(&self, slot: &mut Option<RunState>) -> Result<()> {
        self.phase.enter(PipelineState::Starting)?;
        if let Err(err) = self.storage.authenticate().await {
            self.log.error(format!("Storage access is required: {err}"));
            return Err(PipelineError::NotAuthenticated(err));
        }
        let mut settings = self
            .config()
            .validate(&self.storage.scene_object(), &self.assets.default_base_url())?;
        self.prepare_working_dir(settings.working_dir()).await?;
        self.check_tools(&mut settings).await?;
        match self.log.open_file(settings.working_dir()) {
            Ok(path) => debug!(path = %path.display(), "run log opened"),
            Err(err) => warn!(error = %err, "run log file could not be created"),
        }

        let run = slot.insert(RunState::new(settings, Arc::clone(&self.runner)));
        self.phase.enter(PipelineState::BackingUp)?;
        let _ = self.events.send(PipelineEvent::Started);
        self.log_settings(run);

        self.backup(run).await?;
        self.remove_empty_entities(run);

        self.phase.enter(PipelineState::WaitingForAssets)?;
        self.wait_for_assets(run).await?;

        self.phase.enter(PipelineState::Processing)?;
        self.process_scene(run).await?;
        if run.counters.converted_refs == 0 {
            self.log
                .highlight("No asset references were converted, nothing to bundle");
            return Ok(());
        }
        self.save_snapshot(run).await;

        self.phase.enter(PipelineState::WaitingForBundles)?;
        self.create_archives(run).await?;

        self.phase.enter(PipelineState::WaitingForConfirmation)?;
        self.confirm_upload(run).await?;

        self.phase.enter(PipelineState::Uploading)?;
        self.upload_archives(run).await?;

        self.phase.enter(PipelineState::Replicating)?;
        self.replicate(run);
        Ok(())
    }

    /// Single exit of every run
    fn stop(&self, slot: &mut Option<RunState>, result: &Result<()>) -> RunSummary {
        let state = self.phase.state();
        let mut summary = RunSummary {
            success: result.is_ok(),
            cancelled: matches!(result, Err(err) if err.is_cancelled()),
            error: result.as_ref().err().map(ToString::to_string),
            orphaned: result
                .as_ref()
                .err()
                .map(|err| err.orphaned().to_vec())
                .unwrap_or_default(),
            ..RunSummary::default()
        };

        if let Some(run) = slot.as_mut() {
            if result.is_err() && state.needs_rollback() {
                summary.rolled_back = self.rollback(run);
            }
            fill_summary(&mut summary, run);
        }

        match result {
            Ok(()) => self.log.highlight("Bundling completed"),
            Err(err) if err.is_cancelled() => self.log.warn("Bundling was cancelled"),
            Err(err) => self.log.error(format!("Bundling failed: {err}")),
        }
        if !summary.orphaned.is_empty() {
            self.log.warn(format!(
                "{} archives were uploaded before the failure and are not referenced by the scene",
                summary.orphaned.len()
            ));
        }
        for (header, line) in summary.report_lines() {
            if header {
                self.log.highlight(line);
            } else {
                self.log.info(line);
            }
        }

        *self.last_summary.lock() = Some(summary.clone());
        *slot = None;
        self.phase.reset();
        self.log.close_file();
        let _ = self.events.send(PipelineEvent::Stopped {
            success: summary.success,
        });
        info!(success = summary.success, ?state, "run stopped");
        summary
    }

    /// Restore every touched attribute, newest first
    fn rollback(&self, run: &mut RunState) -> usize {
        let entries = run.journal.drain();
        let mut restored = 0;
        for entry in entries.iter().rev() {
            match self
                .scene
                .write(&entry.handle, entry.original.clone(), ChangeScope::Disconnected)
            {
                Ok(()) => restored += 1,
                Err(err) => self
                    .log
                    .warn(format!("Failed to restore {}: {err}", entry.handle)),
            }
        }
        if restored > 0 {
            self.log
                .info(format!("Restored {restored} changed attributes to their original values"));
        }
        restored
    }

    async fn prepare_working_dir(&self, dir: &Path) -> Result<()> {
        if let Err(source) = tokio::fs::create_dir_all(dir).await {
            return Err(ConfigError::WorkingDir {
                path: dir.to_path_buf(),
                source,
            }
            .into());
        }
        let leftovers = working_dir_leftovers(dir).await?;
        if leftovers.is_empty() {
            return Ok(());
        }

        let prompt = ConfirmPrompt::ClearWorkingDirectory {
            path: dir.to_path_buf(),
        };
        if !self.host.confirm(&prompt).await {
            return Err(PipelineError::Aborted(
                "working directory was not cleared".to_string(),
            ));
        }
        self.phase.checkpoint()?;
        for path in leftovers {
            if path.is_dir() {
                tokio::fs::remove_dir_all(&path).await?;
            } else {
                tokio::fs::remove_file(&path).await?;
            }
        }
        info!(dir = %dir.display(), "working directory cleared");
        Ok(())
    }

    async fn check_tools(&self, settings: &mut RunSettings) -> Result<()> {
        if self.archiver.is_none() {
            settings.archive_tool = locate_tool(&settings.archive_tool)
                .map_err(|_| ConfigError::ArchiveToolMissing(settings.archive_tool.clone()))?;
        }
        if !settings.texture.is_enabled() {
            return Ok(());
        }
        match locate_tool(&settings.texture.tool) {
            Ok(path) => settings.texture.tool = path,
            Err(err) => {
                self.log.warn(format!("Texture processing is enabled but {err}"));
                let prompt = ConfirmPrompt::DisableTextureProcessing {
                    tool: settings.texture.tool.clone(),
                };
                if !self.host.confirm(&prompt).await {
                    return Err(PipelineError::Aborted(
                        "texture processing tool is missing".to_string(),
                    ));
                }
                settings.texture.disable();
                self.log.warn("Texture processing disabled for this run");
            }
        }
        self.phase.checkpoint()
    }

    fn log_settings(&self, run: &RunState) {
        let settings = &run.settings;
        self.log.highlight("STARTING BUNDLING");
        self.log.info(format!("-- Scene       : {}", settings.scene_ref));
        self.log
            .info(format!("-- Working dir : {}", settings.working_dir().display()));
        self.log
            .info(format!("-- Base URL    : {}", settings.identity.base_url));
        if settings.texture.is_enabled() {
            self.log.info(format!(
                "-- Textures    : {} (max size {}, quality {})",
                settings.texture.format.as_deref().unwrap_or("keep format"),
                settings.texture.max_size,
                settings.texture.quality
            ));
        }
    }

    async fn backup(&self, run: &RunState) -> Result<()> {
        let scene_ref = &run.settings.scene_ref;
        self.log.info(format!("Backing up {scene_ref}"));
        let key = self
            .storage
            .backup(scene_ref, "Automatic backup before bundling")
            .await
            .map_err(PipelineError::Backup)?;
        self.log.info(format!("Backup stored as {key}"));
        self.host.pump().await;
        self.phase.checkpoint()
    }

    fn remove_empty_entities(&self, run: &mut RunState) {
        if !run.settings.remove_empty_entities {
            return;
        }
        for entity in self.scene.entities() {
            let removable = self.scene.component_count(entity) == 0
                && self
                    .scene
                    .entity_flags(entity)
                    .is_some_and(|flags| !flags.is_excluded());
            if !removable {
                continue;
            }
            match self.scene.remove_entity(entity, ChangeScope::Replicate) {
                Ok(()) => run.counters.empty_entities_removed += 1,
                Err(err) => self
                    .log
                    .warn(format!("Failed to remove empty entity {entity}: {err}")),
            }
        }
        if run.counters.empty_entities_removed > 0 {
            self.log.info(format!(
                "Removed {} entities without components",
                run.counters.empty_entities_removed
            ));
        }
    }

    async fn wait_for_assets(&self, run: &RunState) -> Result<()> {
        loop {
            let pending = self
                .assets
                .pending_transfers()
                .into_iter()
                .filter(|t| run.settings.waits_for(t.asset_type))
                .count();
            if pending == 0 {
                return Ok(());
            }
            debug!(pending, "waiting for asset transfers");
            self.progress(format!("Waiting for {pending} asset transfers"), None);
            tokio::time::sleep(poll_interval(pending)).await;
            self.host.pump().await;
            self.phase.checkpoint()?;
        }
    }

    async fn process_scene(&self, run: &mut RunState) -> Result<()> {
        let include = run.settings.include;
        let generated = if include.generated_materials {
            targets(&*self.scene, ComponentKind::Material, &include)
        } else {
            Vec::new()
        };
        let meshes = if include.meshes || include.materials {
            targets(&*self.scene, ComponentKind::Mesh, &include)
        } else {
            Vec::new()
        };
        let mesh_steps = if include.meshes { meshes.len() } else { 0 };
        let material_steps = if include.materials { meshes.len() } else { 0 };
        let total = generated.len() + mesh_steps + material_steps;
        self.log.highlight("PROCESSING");
        self.log.info(format!(
            "-- {} generated materials, {} mesh components",
            generated.len(),
            meshes.len()
        ));

        let mut entities = HashSet::new();
        let mut done = 0;
        {
            let mut rewriter =
                ReferenceRewriter::new(run, &*self.scene, &*self.assets, &self.log);

            for component in &generated {
                rewriter.rewrite_generated_material(component).await;
                entities.insert(component.entity);
                done += 1;
                self.step("Processing generated materials", done, total).await?;
            }
            if include.meshes {
                for component in &meshes {
                    rewriter.rewrite_mesh_ref(component).await;
                    entities.insert(component.entity);
                    done += 1;
                    self.step("Processing meshes", done, total).await?;
                }
            }
            if include.materials {
                for component in &meshes {
                    rewriter.rewrite_material_refs(component).await;
                    entities.insert(component.entity);
                    done += 1;
                    self.step("Processing materials", done, total).await?;
                }
            }
        }

        run.counters.entities_processed = entities.len();
        self.log.info(format!(
            "-- Converted {} references on {} entities",
            run.counters.converted_refs, run.counters.entities_processed
        ));
        Ok(())
    }

    async fn step(&self, action: &str, done: usize, total: usize) -> Result<()> {
        self.progress(action, Some(percent(done, total)));
        self.host.pump().await;
        self.phase.checkpoint()
    }

    async fn save_snapshot(&self, run: &mut RunState) {
        let path = run.settings.snapshot_file();
        let text = match self.scene.snapshot() {
            Ok(text) => text,
            Err(err) => {
                self.log.warn(format!("Could not serialize the bundled scene: {err}"));
                return;
            }
        };
        match tokio::fs::write(&path, text).await {
            Ok(()) => {
                self.log
                    .info(format!("Bundled scene saved to {}", path.display()));
                run.snapshot = Some(path);
            }
            Err(err) => self
                .log
                .warn(format!("Could not save {}: {err}", path.display())),
        }
    }

    async fn create_archives(&self, run: &mut RunState) -> Result<()> {
        let jobs = archive_jobs(run);
        let total = jobs.len();
        let archiver = match &self.archiver {
            Some(archiver) => Arc::clone(archiver),
            None => Arc::new(ToolArchiver::new(
                run.settings.archive_tool.clone(),
                Arc::clone(&self.runner),
            )),
        };
        let pool = ArchiveWorkerPool::new(archiver, run.settings.archive_workers);
        self.log.highlight("CREATING ARCHIVES");
        self.log.info(format!(
            "-- {total} archives, {} concurrent workers",
            pool.workers()
        ));

        let reports = pool
            .run_all(jobs, |report, done| {
                if report.succeeded() {
                    self.log.info(format!("-- Created {}", report.job.file_name()));
                } else {
                    self.log.error(format!(
                        "Failed to create {}: {}",
                        report.job.file_name(),
                        report.outcome.describe()
                    ));
                }
                self.progress("Creating archives", Some(percent(done, total)));
            })
            .await;

        let failed: Vec<String> = reports
            .iter()
            .filter(|r| !r.succeeded())
            .map(|r| r.job.file_name())
            .collect();
        run.archives = reports;
        if !failed.is_empty() {
            return Err(PipelineError::Archive { failed });
        }
        self.host.pump().await;
        self.phase.checkpoint()
    }

    async fn confirm_upload(&self, run: &RunState) -> Result<()> {
        let archives: Vec<String> = run.archives.iter().map(|r| r.job.file_name()).collect();
        if archives.is_empty() {
            self.log.info("No archives to upload");
            return Ok(());
        }
        let remote = self.storage.list(&self.storage.root_prefix()).await?;
        let existing: Vec<String> = archives
            .iter()
            .filter(|name| remote.contains(name))
            .cloned()
            .collect();
        for name in &existing {
            self.log.warn(format!("{name} already exists in storage and will be overwritten"));
        }

        let prompt = ConfirmPrompt::UploadBundles { archives, existing };
        if !self.host.confirm(&prompt).await {
            self.log.warn("Upload was declined");
            return Err(PipelineError::Cancelled);
        }
        self.phase.checkpoint()
    }

    async fn upload_archives(&self, run: &mut RunState) -> Result<()> {
        if run.archives.is_empty() {
            return Ok(());
        }
        let prefix = self.storage.root_prefix();
        let progress = ProgressAggregator::new();
        let events = self.events.clone();
        progress.subscribe(move |percent| {
            let _ = events.send(PipelineEvent::Progress {
                action: "Uploading archives".to_string(),
                percent: Some(percent),
            });
        });
        self.log.highlight("UPLOADING");

        let uploads = run.archives.iter().map(|report| {
            let path = report.job.destination.clone();
            let handle = progress.register(report.size.unwrap_or(0));
            let progress = &progress;
            let prefix = prefix.as_str();
            let storage = &self.storage;
            async move {
                let on_chunk = move |sent: u64, total: u64| progress.update(handle, sent, total);
                let result = storage.upload(&path, prefix, &on_chunk).await;
                if result.is_ok() {
                    progress.finish(handle);
                }
                (path, result)
            }
        });
        let results = join_all(uploads).await;

        let mut failed = Vec::new();
        for (path, result) in results {
            match result {
                Ok(receipt) => {
                    self.log
                        .info(format!("-- Uploaded {} ({} bytes)", receipt.key, receipt.size));
                    run.uploaded.push(receipt.key);
                }
                Err(err) => {
                    let name = file_name(&path);
                    self.log.error(format!("Upload of {name} failed: {err}"));
                    failed.push(name);
                }
            }
        }
        if failed.is_empty() {
            Ok(())
        } else {
            Err(PipelineError::Upload {
                failed,
                orphaned: run.uploaded.clone(),
            })
        }
    }

    fn replicate(&self, run: &mut RunState) {
        self.log.highlight("REPLICATING");
        let mut bundles = IndexSet::new();
        for reference in &run.superseded {
            self.assets.forget(reference);
            let parsed = ParsedRef::parse(reference);
            if parsed.sub_asset.is_some() {
                bundles.insert(parsed.main_asset);
            }
        }
        for bundle in &bundles {
            self.assets.forget_bundle(bundle);
        }
        run.forgotten = run.superseded.len();

        for entry in run.journal.drain() {
            if let Err(err) = self.scene.read(&entry.handle) {
                self.log.warn(format!(
                    "{} disappeared before replication: {err}",
                    entry.handle
                ));
                continue;
            }
            match self
                .scene
                .write(&entry.handle, entry.new, ChangeScope::Replicate)
            {
                Ok(()) => run.replicated += 1,
                Err(err) => self
                    .log
                    .warn(format!("Failed to replicate {}: {err}", entry.handle)),
            }
        }
        self.log.info(format!(
            "-- Replicated {} attributes, unloaded {} assets",
            run.replicated, run.forgotten
        ));
    }

    fn progress(&self, action: impl Into<String>, percent: Option<u8>) {
        let _ = self.events.send(PipelineEvent::Progress {
            action: action.into(),
            percent,
        });
    }
}

/// One job per shard that received files
fn archive_jobs(run: &RunState) -> Vec<ArchiveJob> {
    let working_dir = run.settings.working_dir();
    let mut jobs = Vec::new();
    for class in AssetClass::ALL {
        let compression = if class.is_texture() {
            run.settings.texture_compression()
        } else {
            Compression::Normal
        };
        for shard in run.allocator.shards_with_files(class) {
            jobs.push(ArchiveJob {
                source_dir: working_dir.join(shard_folder(class, shard)),
                destination: working_dir.join(run.settings.identity.archive_name(class, shard)),
                compression,
            });
        }
    }
    jobs
}

fn fill_summary(summary: &mut RunSummary, run: &RunState) {
    let settings = &run.settings;
    summary.working_dir = settings.working_dir().to_path_buf();
    summary.snapshot.clone_from(&run.snapshot);
    summary.base_url.clone_from(&settings.identity.base_url);
    summary.bundle_prefix.clone_from(&settings.identity.bundle_prefix);
    summary.split_size = settings.split_size;
    summary.counters = run.counters;
    summary.classes = AssetClass::ALL
        .iter()
        .map(|&class| {
            let totals = run.allocator.totals(class);
            ClassSummary {
                class,
                files: totals.files,
                bytes: totals.bytes,
            }
        })
        .collect();
    summary.texture_processing = run.transcoder.settings().is_enabled();
    summary.textures = run.transcoder.stats();
    summary.archives = run
        .archives
        .iter()
        .map(|report| ArchiveSummary {
            name: report.job.file_name(),
            path: report.job.destination.clone(),
            created: report.succeeded(),
            size: report.size,
        })
        .collect();
    summary.uploaded.clone_from(&run.uploaded);
    summary.forgotten = run.forgotten;
    summary.replicated = run.replicated;
    summary.elapsed_secs = run.started.elapsed().as_secs();
}

/// Root `.txml`, `.zip` and `.txt` files plus every sub-directory
async fn working_dir_leftovers(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut leftovers = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if entry.file_type().await?.is_dir() {
            leftovers.push(path);
            continue;
        }
        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        if matches!(extension.as_str(), "txml" | "zip" | "txt") {
            leftovers.push(path);
        }
    }
    leftovers.sort();
    Ok(leftovers)
}

fn percent(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    u8::try_from((done * 100 / total).min(100)).unwrap_or(100)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
