//! Testing utilities for the scene bundler workspace
//!
//! Fake tools, a scripted host, an in-memory storage client and builders
//! for worlds backed by real files in a temporary directory.

#![allow(missing_docs)]
#![allow(clippy::missing_panics_doc)]

use async_trait::async_trait;
use bundler_asset::AssetType;
use bundler_core::{
    ConfirmPrompt, Host, PackagerConfig, StorageClient, StorageError, UploadReceipt,
    UPLOAD_CHUNK_SIZE,
};
use bundler_scene::{
    AssetDescription, AttributeName, AttributeValue, ComponentDescription, ComponentKind,
    EntityFlags, EntityId, MemoryWorld,
};
use bundler_tools::{ArchiveJob, ArchiveReport, Archiver, ProcessRunner, ToolInvocation, ToolOutcome};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

pub const MIB: u64 = 1024 * 1024;
pub const BASE_URL: &str = "https://storage.example.com/town/";
pub const SCENE_OBJECT: &str = "scenes/town.txml";

type Hook = Box<dyn Fn() + Send + Sync>;
type PromptHook = Box<dyn Fn(&ConfirmPrompt) + Send + Sync>;

// ---------------------------------------------------------------------------
// Tools
// ---------------------------------------------------------------------------

/// Process runner that never spawns anything. Successful runs write the
/// `-out` file so conversions can be observed.
#[derive(Default)]
pub struct FakeRunner {
    invocations: Mutex<Vec<ToolInvocation>>,
    time_out_on: Mutex<Vec<String>>,
}

impl FakeRunner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Time out every invocation whose arguments mention `needle`
    pub fn time_out_on(&self, needle: &str) {
        self.time_out_on.lock().push(needle.to_string());
    }

    pub fn invocations(&self) -> Vec<ToolInvocation> {
        self.invocations.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.invocations.lock().len()
    }
}

#[async_trait]
impl ProcessRunner for FakeRunner {
    async fn run(&self, invocation: &ToolInvocation) -> ToolOutcome {
        self.invocations.lock().push(invocation.clone());
        let times_out = self
            .time_out_on
            .lock()
            .iter()
            .any(|needle| invocation.args.iter().any(|arg| arg.contains(needle.as_str())));
        if times_out {
            return ToolOutcome::TimedOut;
        }

        let arg_after = |flag: &str| {
            invocation
                .args
                .iter()
                .position(|a| a == flag)
                .and_then(|i| invocation.args.get(i + 1))
                .map(PathBuf::from)
        };
        if let (Some(input), Some(output)) = (arg_after("-file"), arg_after("-out")) {
            let bytes = std::fs::read(&input).unwrap_or_default();
            let half = bytes.len() / 2;
            std::fs::write(&output, &bytes[..half]).unwrap();
        }
        ToolOutcome::Success {
            stdout: "crunch: done".to_string(),
        }
    }
}

/// Archiver writing a manifest of the shard instead of a zip
#[derive(Default)]
pub struct FakeArchiver {
    jobs: Mutex<Vec<ArchiveJob>>,
    fail_on: Mutex<Vec<String>>,
}

impl FakeArchiver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fail jobs whose archive name contains `needle`
    pub fn fail_on(&self, needle: &str) {
        self.fail_on.lock().push(needle.to_string());
    }

    pub fn jobs(&self) -> Vec<ArchiveJob> {
        self.jobs.lock().clone()
    }
}

#[async_trait]
impl Archiver for FakeArchiver {
    async fn archive(&self, job: &ArchiveJob) -> ArchiveReport {
        self.jobs.lock().push(job.clone());
        let name = job.file_name();
        if self.fail_on.lock().iter().any(|n| name.contains(n.as_str())) {
            return ArchiveReport {
                job: job.clone(),
                outcome: ToolOutcome::NonZeroExit(2),
                size: None,
            };
        }
        let manifest = files_under(&job.source_dir)
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join("\n");
        std::fs::write(&job.destination, &manifest).unwrap();
        ArchiveReport {
            job: job.clone(),
            outcome: ToolOutcome::Success {
                stdout: String::new(),
            },
            size: Some(manifest.len() as u64),
        }
    }
}

// ---------------------------------------------------------------------------
// Host
// ---------------------------------------------------------------------------

/// Host answering prompts from a script and recording them
#[derive(Default)]
pub struct ScriptedHost {
    decline_clear: AtomicBool,
    decline_texture: AtomicBool,
    decline_upload: AtomicBool,
    prompts: Mutex<Vec<ConfirmPrompt>>,
    pumps: AtomicUsize,
    on_pump: Mutex<Option<Hook>>,
    on_prompt: Mutex<Option<PromptHook>>,
}

impl ScriptedHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn decline_upload(&self) {
        self.decline_upload.store(true, Ordering::SeqCst);
    }

    pub fn decline_clear(&self) {
        self.decline_clear.store(true, Ordering::SeqCst);
    }

    pub fn decline_texture_fallback(&self) {
        self.decline_texture.store(true, Ordering::SeqCst);
    }

    /// Run `hook` on every pump
    pub fn on_pump(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self.on_pump.lock() = Some(Box::new(hook));
    }

    /// Run `hook` before answering any prompt
    pub fn on_prompt(&self, hook: impl Fn(&ConfirmPrompt) + Send + Sync + 'static) {
        *self.on_prompt.lock() = Some(Box::new(hook));
    }

    pub fn prompts(&self) -> Vec<ConfirmPrompt> {
        self.prompts.lock().clone()
    }

    pub fn pumps(&self) -> usize {
        self.pumps.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Host for ScriptedHost {
    async fn pump(&self) {
        self.pumps.fetch_add(1, Ordering::SeqCst);
        if let Some(hook) = self.on_pump.lock().as_ref() {
            hook();
        }
        tokio::task::yield_now().await;
    }

    async fn confirm(&self, prompt: &ConfirmPrompt) -> bool {
        self.prompts.lock().push(prompt.clone());
        if let Some(hook) = self.on_prompt.lock().as_ref() {
            hook(prompt);
        }
        match prompt {
            ConfirmPrompt::ClearWorkingDirectory { .. } => !self.decline_clear.load(Ordering::SeqCst),
            ConfirmPrompt::DisableTextureProcessing { .. } => {
                !self.decline_texture.load(Ordering::SeqCst)
            }
            ConfirmPrompt::UploadBundles { .. } => !self.decline_upload.load(Ordering::SeqCst),
        }
    }
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

/// In-memory storage client
pub struct RecordingStorage {
    scene_object: String,
    authenticated: AtomicBool,
    refuse_auth: AtomicBool,
    fail_backup: AtomicBool,
    fail_upload_of: Mutex<Vec<String>>,
    objects: Mutex<BTreeMap<String, u64>>,
    backups: Mutex<Vec<String>>,
    on_upload: Mutex<Option<Hook>>,
}

impl RecordingStorage {
    pub fn new() -> Arc<Self> {
        let storage = Self {
            scene_object: SCENE_OBJECT.to_string(),
            authenticated: AtomicBool::new(false),
            refuse_auth: AtomicBool::new(false),
            fail_backup: AtomicBool::new(false),
            fail_upload_of: Mutex::new(Vec::new()),
            objects: Mutex::new(BTreeMap::new()),
            backups: Mutex::new(Vec::new()),
            on_upload: Mutex::new(None),
        };
        storage.objects.lock().insert(SCENE_OBJECT.to_string(), 128);
        Arc::new(storage)
    }

    pub fn refuse_auth(&self) {
        self.refuse_auth.store(true, Ordering::SeqCst);
    }

    pub fn fail_backup(&self) {
        self.fail_backup.store(true, Ordering::SeqCst);
    }

    /// Fail uploads of files whose name contains `needle`
    pub fn fail_upload_of(&self, needle: &str) {
        self.fail_upload_of.lock().push(needle.to_string());
    }

    /// Pretend an object already exists
    pub fn put(&self, key: &str, size: u64) {
        self.objects.lock().insert(key.to_string(), size);
    }

    /// Run `hook` at the start of every upload
    pub fn on_upload(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self.on_upload.lock() = Some(Box::new(hook));
    }

    pub fn objects(&self) -> Vec<String> {
        self.objects.lock().keys().cloned().collect()
    }

    pub fn backups(&self) -> Vec<String> {
        self.backups.lock().clone()
    }
}

#[async_trait]
impl StorageClient for RecordingStorage {
    async fn authenticate(&self) -> Result<(), StorageError> {
        if self.refuse_auth.load(Ordering::SeqCst) {
            return Err(StorageError::NotAuthenticated);
        }
        self.authenticated.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    async fn backup(&self, key: &str, _note: &str) -> Result<String, StorageError> {
        if self.fail_backup.load(Ordering::SeqCst) {
            return Err(StorageError::NotFound(key.to_string()));
        }
        let backup = format!("backups/{}", key.replace('/', "_"));
        self.backups.lock().push(backup.clone());
        Ok(backup)
    }

    async fn upload(
        &self,
        file: &Path,
        prefix: &str,
        progress: &(dyn Fn(u64, u64) + Send + Sync),
    ) -> Result<UploadReceipt, StorageError> {
        if let Some(hook) = self.on_upload.lock().as_ref() {
            hook();
        }
        let name = file.file_name().unwrap().to_string_lossy().into_owned();
        let key = format!("{prefix}{name}");
        if self.fail_upload_of.lock().iter().any(|n| name.contains(n.as_str())) {
            return Err(StorageError::Upload {
                key,
                reason: "connection reset".to_string(),
            });
        }
        let size = tokio::fs::metadata(file).await?.len();
        let mut sent = 0;
        progress(0, size);
        while sent < size {
            sent = (sent + UPLOAD_CHUNK_SIZE as u64).min(size);
            progress(sent, size);
        }
        self.objects.lock().insert(key.clone(), size);
        Ok(UploadReceipt { key, size })
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        Ok(self
            .objects
            .lock()
            .keys()
            .filter_map(|k| k.strip_prefix(prefix))
            .filter(|k| !k.contains('/'))
            .map(str::to_string)
            .collect())
    }

    fn scene_object(&self) -> String {
        self.scene_object.clone()
    }

    fn root_prefix(&self) -> String {
        String::new()
    }
}

// ---------------------------------------------------------------------------
// Worlds and files
// ---------------------------------------------------------------------------

/// A temporary directory holding asset sources and the working directory,
/// plus a world whose assets live there
pub struct Fixture {
    pub dir: TempDir,
    pub world: Arc<MemoryWorld>,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("assets")).unwrap();
        let world = Arc::new(MemoryWorld::new("town", dir.path().join("assets")));
        world.set_base_url(BASE_URL);
        Self { dir, world }
    }

    pub fn assets_dir(&self) -> PathBuf {
        self.dir.path().join("assets")
    }

    pub fn working_dir(&self) -> PathBuf {
        self.dir.path().join("work")
    }

    /// Config writing into this fixture's working directory
    pub fn config(&self) -> PackagerConfig {
        PackagerConfig {
            working_dir: self.working_dir(),
            bundle_prefix: "town".to_string(),
            ..PackagerConfig::default()
        }
    }

    /// An asset file of `size` bytes registered under `reference`
    pub fn file_asset(&self, reference: &str, asset_type: AssetType, size: u64) -> PathBuf {
        let path = write_file(&self.assets_dir(), reference, size);
        self.world
            .add_asset(AssetDescription::file(reference, asset_type, reference));
        path
    }

    pub fn texture(&self, reference: &str, size: u64, width: u32, height: u32) -> PathBuf {
        let path = write_file(&self.assets_dir(), reference, size);
        self.world.add_asset(
            AssetDescription::file(reference, AssetType::Texture, reference)
                .with_dimensions(width, height),
        );
        path
    }

    /// A material script with one texture unit per entry of `textures`
    pub fn material(&self, reference: &str, textures: &[&str]) -> PathBuf {
        let path = self.assets_dir().join(reference);
        std::fs::write(&path, material_script(reference, textures)).unwrap();
        self.world
            .add_asset(AssetDescription::file(reference, AssetType::Material, reference));
        path
    }

    /// An entity with a mesh component
    pub fn mesh_entity(&self, id: u64, mesh_ref: &str, materials: &[&str]) -> EntityId {
        let entity = self.world.add_entity(id, EntityFlags::default());
        let component = ComponentDescription::new(id * 10, ComponentKind::Mesh)
            .with_attribute(AttributeName::MeshRef, AttributeValue::AssetRef(mesh_ref.to_string()))
            .with_attribute(
                AttributeName::MaterialRefs,
                AttributeValue::AssetRefList(materials.iter().map(ToString::to_string).collect()),
            );
        self.world.add_component(entity, component).unwrap();
        entity
    }

    /// An entity with a generated material component
    pub fn generated_material_entity(
        &self,
        id: u64,
        output_mat: &str,
        input_mat: &str,
        parameters: &[&str],
    ) -> EntityId {
        let entity = self.world.add_entity(id, EntityFlags::default());
        let component = ComponentDescription::new(id * 10, ComponentKind::Material)
            .with_attribute(AttributeName::OutputMat, AttributeValue::String(output_mat.to_string()))
            .with_attribute(AttributeName::InputMat, AttributeValue::AssetRef(input_mat.to_string()))
            .with_attribute(
                AttributeName::Parameters,
                AttributeValue::StringList(parameters.iter().map(ToString::to_string).collect()),
            );
        self.world.add_component(entity, component).unwrap();
        entity
    }
}

impl Default for Fixture {
    fn default() -> Self {
        Self::new()
    }
}

pub fn material_script(name: &str, textures: &[&str]) -> String {
    let mut text = format!("material {name}\n{{\n    technique\n    {{\n        pass\n        {{\n");
    for texture in textures {
        text.push_str(&format!(
            "            texture_unit\n            {{\n                texture {texture}\n            }}\n"
        ));
    }
    text.push_str("        }\n    }\n}\n");
    text
}

/// Write `size` bytes to `dir/relative`
pub fn write_file(dir: &Path, relative: &str, size: u64) -> PathBuf {
    let path = dir.join(relative);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, vec![0x5a; usize::try_from(size).unwrap()]).unwrap();
    path
}

/// Every file below `dir`, sorted
pub fn files_under(dir: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&current) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else {
                files.push(path);
            }
        }
    }
    files.sort();
    files
}

/// An executable stand-in for a tool that must exist on disk
pub fn fake_tool(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, "#!/bin/sh\nexit 0\n").unwrap();
    path
}
