//! Texture transcoding
//!
//! Textures copied into a shard are handed to an external crunch-compatible
//! tool that can convert formats, clamp sizes, rescale to powers of two and
//! regenerate mipmaps. The tool works on the shard copy in place; when the
//! format changes the original is moved aside into `converted-to-<fmt>/`.

use crate::runner::{ProcessRunner, ToolInvocation, ToolOutcome};
use bundler_asset::{AssetRecord, BundleAllocator};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Input formats the tool understands
pub const SUPPORTED_INPUT_FORMATS: &[&str] = &["dds", "png", "jpg", "jpeg", "crn", "bmp", "tga"];

/// Deadline for one texture
pub const TEXTURE_TOOL_TIMEOUT: Duration = Duration::from_secs(120);

/// Tool log file name inside the working directory
pub const TEXTURE_LOG_FILE: &str = "packager_texture-processing-log.txt";

/// Tool stdout lines that carry no information
const NOISE_PREFIXES: &[&str] = &[
    "crunch:",
    "copyright",
    "crnlib version",
    "appending output",
    "texture successfully loaded",
    "compressing using quality level",
    "texture successfully written",
    "texture successfully processed",
    "source texture:",
    "1 total file(s)",
    "exit status:",
    "apparent type:",
];

/// How non power of two textures are rescaled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RescaleMode {
    #[default]
    Off,
    Nearest,
    Lo,
    Hi,
}

impl RescaleMode {
    #[must_use]
    pub const fn tool_arg(self) -> Option<&'static str> {
        match self {
            RescaleMode::Off => None,
            RescaleMode::Nearest => Some("nearest"),
            RescaleMode::Lo => Some("lo"),
            RescaleMode::Hi => Some("hi"),
        }
    }
}

/// Mipmap handling
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MipmapMode {
    Generate,
    #[default]
    UseSource,
    None,
}

impl MipmapMode {
    #[must_use]
    pub const fn tool_arg(self) -> &'static str {
        match self {
            MipmapMode::Generate => "Generate",
            MipmapMode::UseSource => "UseSource",
            MipmapMode::None => "None",
        }
    }
}

/// Resolved texture processing options for a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureSettings {
    pub process: bool,
    /// Lowercase destination format, `None` keeps the source format
    pub format: Option<String>,
    /// Clamp size in pixels, 0 disables clamping
    pub max_size: u32,
    pub rescale: RescaleMode,
    pub quality: u32,
    pub mipmaps: MipmapMode,
    pub max_mipmaps: u32,
    pub tool: PathBuf,
    /// Working directory: receives the tool log and `converted-to-*` folders
    pub working_dir: PathBuf,
    pub debug_output: bool,
    pub timeout: Duration,
}

impl Default for TextureSettings {
    fn default() -> Self {
        Self {
            process: false,
            format: None,
            max_size: 0,
            rescale: RescaleMode::Off,
            quality: 255,
            mipmaps: MipmapMode::UseSource,
            max_mipmaps: 16,
            tool: PathBuf::from("crunch"),
            working_dir: PathBuf::new(),
            debug_output: false,
            timeout: TEXTURE_TOOL_TIMEOUT,
        }
    }
}

impl TextureSettings {
    /// Processing is on and at least one option would change a texture
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.process
            && (self.format.is_some()
                || self.mipmaps != MipmapMode::UseSource
                || self.rescale != RescaleMode::Off
                || self.max_size != 0)
    }

    pub fn disable(&mut self) {
        self.process = false;
    }

    #[must_use]
    pub fn log_file(&self) -> PathBuf {
        self.working_dir.join(TEXTURE_LOG_FILE)
    }
}

/// Counters for the run report
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextureStats {
    pub processed: usize,
    pub converted: usize,
    pub resized: usize,
    pub rescaled: usize,
    pub max_width: u32,
    pub max_height: u32,
}

/// Why a texture was left alone
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    AlreadyProcessed,
    NotBundled,
    Disabled,
    UnsupportedFormat(String),
    NothingToDo,
}

/// Result of processing one texture
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscodeOutcome {
    Skipped(SkipReason),
    /// The tool failed; the shard copy is left as it was
    Failed(ToolOutcome),
    Transcoded {
        converted: bool,
        bytes_before: u64,
        bytes_after: u64,
        /// Tool output worth showing, only collected in debug mode
        tool_output: Vec<String>,
    },
}

/// Arguments for one tool run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeParams {
    pub args: Vec<String>,
    pub destination: PathBuf,
    pub clamped: bool,
    pub rescaled: bool,
}

impl TranscodeParams {
    /// Point the `-out` argument at `destination`
    pub fn retarget(&mut self, destination: PathBuf) {
        if let Some(pos) = self.args.iter().position(|arg| arg == "-out") {
            if let Some(out) = self.args.get_mut(pos + 1) {
                *out = destination.display().to_string();
            }
        }
        self.destination = destination;
    }
}

/// Runs the texture tool over shard copies
pub struct TextureTranscoder {
    settings: TextureSettings,
    runner: Arc<dyn ProcessRunner>,
    stats: TextureStats,
}

impl std::fmt::Debug for TextureTranscoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextureTranscoder")
            .field("settings", &self.settings)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl TextureTranscoder {
    pub fn new(settings: TextureSettings, runner: Arc<dyn ProcessRunner>) -> Self {
        Self {
            settings,
            runner,
            stats: TextureStats::default(),
        }
    }

    #[inline]
    #[must_use]
    pub fn settings(&self) -> &TextureSettings {
        &self.settings
    }

    #[inline]
    #[must_use]
    pub fn stats(&self) -> TextureStats {
        self.stats
    }

    /// Build the tool arguments for `source`.
    ///
    /// `dimensions` may be unknown, in which case clamping and rescaling are
    /// not considered.
    #[must_use]
    pub fn params(&self, source: &Path, dimensions: Option<(u32, u32)>) -> TranscodeParams {
        let s = &self.settings;
        let src_ext = extension_of(source);
        let dest_ext = s.format.clone().unwrap_or_else(|| src_ext.clone());
        let stem = source
            .file_stem()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut destination = source.with_file_name(format!("{stem}.{dest_ext}"));
        if destination == source {
            destination = source.with_file_name(format!("{stem}.processed.{dest_ext}"));
        }

        let mut args = vec![
            "-noprogress".to_string(),
            "-logfile".to_string(),
            s.log_file().display().to_string(),
            "-file".to_string(),
            source.display().to_string(),
            "-quality".to_string(),
            s.quality.to_string(),
        ];
        if let Some(format) = &s.format {
            args.push("-fileformat".to_string());
            args.push(format.clone());
        }
        args.push("-out".to_string());
        args.push(destination.display().to_string());

        let mut clamped = false;
        let mut rescaled = false;
        if let Some((width, height)) = dimensions {
            if s.max_size > 0 && (width > s.max_size || height > s.max_size) {
                let size = s.max_size.to_string();
                args.extend(["-clampscale".to_string(), size.clone(), size]);
                clamped = true;
            }
            if let Some(mode) = s.rescale.tool_arg() {
                if !is_pow2(width) || !is_pow2(height) {
                    args.extend(["-rescalemode".to_string(), mode.to_string()]);
                    rescaled = true;
                }
            }
        }

        args.push("-mipMode".to_string());
        args.push(s.mipmaps.tool_arg().to_string());
        if s.mipmaps == MipmapMode::Generate {
            args.push("-maxmips".to_string());
            args.push(s.max_mipmaps.to_string());
        }

        TranscodeParams {
            args,
            destination,
            clamped,
            rescaled,
        }
    }

    /// Process the shard copy of a texture record. Runs at most once per
    /// record; size changes are reported to `allocator`.
    ///
    /// `reserve` is handed the planned output path before the tool runs and
    /// returns the path to write instead, so outputs never land on a file
    /// that belongs to another asset. On failure any partial output is
    /// removed and the shard copy is left as it was.
    pub async fn process<R>(
        &mut self,
        record: &mut AssetRecord,
        dimensions: Option<(u32, u32)>,
        allocator: &mut BundleAllocator,
        reserve: R,
    ) -> TranscodeOutcome
    where
        R: FnOnce(&Path) -> PathBuf + Send,
    {
        if record.texture_post_processed() {
            return TranscodeOutcome::Skipped(SkipReason::AlreadyProcessed);
        }
        record.mark_texture_post_processed();
        if !record.is_bundled() {
            return TranscodeOutcome::Skipped(SkipReason::NotBundled);
        }

        if let Some((width, height)) = dimensions {
            self.stats.max_width = self.stats.max_width.max(width);
            self.stats.max_height = self.stats.max_height.max(height);
        }
        if !self.settings.is_enabled() {
            return TranscodeOutcome::Skipped(SkipReason::Disabled);
        }

        let source = record.disk_path().to_path_buf();
        let src_ext = extension_of(&source);
        if !SUPPORTED_INPUT_FORMATS.contains(&src_ext.as_str()) {
            warn!(texture = %source.display(), format = %src_ext, "unsupported texture input format");
            return TranscodeOutcome::Skipped(SkipReason::UnsupportedFormat(src_ext));
        }

        let mut params = self.params(&source, dimensions);
        let converts = self
            .settings
            .format
            .as_deref()
            .is_some_and(|fmt| fmt != src_ext);
        if !converts
            && !params.clamped
            && !params.rescaled
            && self.settings.mipmaps == MipmapMode::UseSource
        {
            return TranscodeOutcome::Skipped(SkipReason::NothingToDo);
        }
        let destination = reserve(&params.destination);
        if destination != params.destination {
            debug!(planned = %params.destination.display(), out = %destination.display(), "texture output renamed to avoid a collision");
            params.retarget(destination);
        }

        let bytes_before = file_size(&source).await;
        let invocation = ToolInvocation::new(&self.settings.tool, self.settings.timeout)
            .with_args(params.args.iter().cloned());
        let stdout = match self.runner.run(&invocation).await {
            ToolOutcome::Success { stdout } => stdout,
            failure => {
                match &failure {
                    ToolOutcome::FailedToStart(_) => error!(
                        texture = %source.display(),
                        log = %self.settings.log_file().display(),
                        "texture tool execution failed"
                    ),
                    other => error!(
                        texture = %source.display(),
                        outcome = %other.describe(),
                        "texture processing abandoned"
                    ),
                }
                remove_partial_output(&params.destination).await;
                return TranscodeOutcome::Failed(failure);
            }
        };

        self.stats.processed += 1;
        if params.clamped {
            self.stats.resized += 1;
        }
        if params.rescaled {
            self.stats.rescaled += 1;
        }
        let tool_output = if self.settings.debug_output {
            filter_tool_output(&stdout)
        } else {
            Vec::new()
        };

        let mut converted = false;
        let destination = params.destination;
        if converts {
            if tokio::fs::try_exists(&destination).await.unwrap_or(false) {
                self.move_original_aside(&source).await;
                record.apply_conversion(&destination);
                self.stats.converted += 1;
                converted = true;
                info!(from = %source.display(), to = %destination.display(), "texture converted");
            } else {
                warn!(dest = %destination.display(), "destination file does not exist after conversion");
            }
        } else if destination != source {
            if let Err(err) = tokio::fs::rename(&destination, &source).await {
                warn!(dest = %destination.display(), error = %err, "failed to replace texture with processed copy");
            }
        }

        let bytes_after = file_size(record.disk_path()).await;
        if bytes_after != bytes_before {
            let rolled = allocator.adjust(record.class(), record.shard(), bytes_before, bytes_after);
            debug!(
                texture = %record.source_ref(),
                bytes_before,
                bytes_after,
                rolled,
                "texture size changed"
            );
        }

        TranscodeOutcome::Transcoded {
            converted,
            bytes_before,
            bytes_after,
            tool_output,
        }
    }

    /// Copy the original to `converted-to-<fmt>/` and drop it from the shard
    async fn move_original_aside(&self, source: &Path) {
        let format = self.settings.format.as_deref().unwrap_or_default();
        let dir = self.settings.working_dir.join(format!("converted-to-{format}"));
        let Some(name) = source.file_name() else {
            return;
        };
        if let Err(err) = tokio::fs::create_dir_all(&dir).await {
            warn!(dir = %dir.display(), error = %err, "failed to create converted originals folder");
        } else if let Err(err) = tokio::fs::copy(source, dir.join(name)).await {
            warn!(texture = %source.display(), error = %err, "failed to keep converted original");
        }
        if let Err(err) = tokio::fs::remove_file(source).await {
            warn!(
                texture = %source.display(),
                error = %err,
                "failed to remove conversion source, remove it from the archive by hand"
            );
        }
    }
}

/// Tool stdout with banner noise removed
#[must_use]
pub fn filter_tool_output(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| {
            let lower = line.to_ascii_lowercase();
            !NOISE_PREFIXES.iter().any(|prefix| lower.starts_with(prefix))
        })
        .map(str::to_string)
        .collect()
}

async fn remove_partial_output(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "removed partial tool output"),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => warn!(path = %path.display(), error = %err, "failed to remove partial tool output"),
    }
}

#[inline]
fn is_pow2(n: u32) -> bool {
    n != 0 && n & (n - 1) == 0
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default()
}

async fn file_size(path: &Path) -> u64 {
    tokio::fs::metadata(path).await.map(|m| m.len()).unwrap_or(0)
}
