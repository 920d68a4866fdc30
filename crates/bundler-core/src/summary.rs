//! Final run report

use crate::state::RunCounters;
use bundler_asset::AssetClass;
use bundler_tools::TextureStats;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Copied files and bytes of one asset class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassSummary {
    pub class: AssetClass,
    pub files: usize,
    pub bytes: u64,
}

/// One archive the run tried to build
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveSummary {
    pub name: String,
    pub path: PathBuf,
    pub created: bool,
    pub size: Option<u64>,
}

/// Outcome of a run, produced whether it succeeded or not
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub success: bool,
    pub cancelled: bool,
    pub error: Option<String>,
    pub working_dir: PathBuf,
    pub snapshot: Option<PathBuf>,
    pub base_url: String,
    pub bundle_prefix: String,
    pub split_size: u64,
    pub counters: RunCounters,
    pub classes: Vec<ClassSummary>,
    pub texture_processing: bool,
    pub textures: TextureStats,
    pub archives: Vec<ArchiveSummary>,
    pub uploaded: Vec<String>,
    pub orphaned: Vec<String>,
    pub forgotten: usize,
    pub replicated: usize,
    pub rolled_back: usize,
    pub elapsed_secs: u64,
}

impl RunSummary {
    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.classes.iter().map(|c| c.bytes).sum()
    }

    #[must_use]
    pub fn failed_archives(&self) -> Vec<&str> {
        self.archives
            .iter()
            .filter(|a| !a.created)
            .map(|a| a.name.as_str())
            .collect()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Human readable report: `(is section header, line)` pairs
    #[must_use]
    pub fn report_lines(&self) -> Vec<(bool, String)> {
        let mut lines = Vec::new();
        let header = |lines: &mut Vec<(bool, String)>, title: &str| {
            lines.push((false, String::new()));
            lines.push((true, title.to_string()));
        };

        header(&mut lines, "PATHS");
        lines.push((false, format!("-- Working dir  : {}", self.working_dir.display())));
        if let Some(snapshot) = &self.snapshot {
            lines.push((false, format!("-- Output scene : {}", snapshot.display())));
        }
        lines.push((false, format!("-- Base URL     : {}", self.base_url)));

        header(&mut lines, "SCENE");
        lines.push((
            false,
            format!("-- Processed entities          : {}", self.counters.entities_processed),
        ));
        if self.counters.empty_entities_removed > 0 {
            lines.push((
                false,
                format!(
                    "-- Removed empty entities      : {} (no components)",
                    self.counters.empty_entities_removed
                ),
            ));
        }

        header(&mut lines, "BUNDLING");
        lines.push((
            false,
            format!("-- Bundle output format        : {}<type>.zip#<subasset>", self.bundle_prefix),
        ));
        lines.push((false, format!("-- Bundle split size           : {}", megabytes(self.split_size))));
        lines.push((
            false,
            format!("-- Total refs converted        : {}", self.counters.converted_refs),
        ));

        header(&mut lines, "TEXTURES");
        lines.push((
            false,
            format!("-- Largest encountered width   : {:>4} pixels", self.textures.max_width),
        ));
        lines.push((
            false,
            format!("-- Largest encountered height  : {:>4} pixels", self.textures.max_height),
        ));
        if self.texture_processing {
            lines.push((false, format!("-- Textures processed          : {}", self.textures.processed)));
            lines.push((false, format!("-- Textures converted          : {}", self.textures.converted)));
            lines.push((false, format!("-- Textures resized            : {}", self.textures.resized)));
            lines.push((false, format!("-- Textures rescaled           : {}", self.textures.rescaled)));
        } else {
            lines.push((false, "-- Texture processing disabled".to_string()));
        }

        header(&mut lines, "OPERATIONS");
        for class in &self.classes {
            lines.push((
                false,
                format!(
                    "-- {:<28}: {:>4} {:>13}",
                    format!("{} copied", class.class.label()),
                    class.files,
                    megabytes(class.bytes)
                ),
            ));
        }
        lines.push((
            false,
            format!("-- Total copied file size      : {:>18}", megabytes(self.total_bytes())),
        ));
        lines.push((
            false,
            format!(
                "-- Total time spent            : {} minutes {} seconds",
                self.elapsed_secs / 60,
                self.elapsed_secs % 60
            ),
        ));

        if !self.archives.is_empty() {
            header(&mut lines, "CREATED ZIP BUNDLES");
            let mut compressed = 0;
            for archive in &self.archives {
                if archive.created {
                    compressed += archive.size.unwrap_or(0);
                    lines.push((false, format!("-- {}", archive.path.display())));
                } else {
                    lines.push((false, format!("-- FAILED {}", archive.path.display())));
                }
            }
            lines.push((false, format!("-- Total compressed file size {}", megabytes(compressed))));
        }

        if !self.orphaned.is_empty() {
            header(&mut lines, "ORPHANED UPLOADS");
            for name in &self.orphaned {
                lines.push((false, format!("-- {name}")));
            }
        }
        lines
    }
}

#[allow(clippy::cast_precision_loss)]
fn megabytes(bytes: u64) -> String {
    format!("{:.2} mb", bytes as f64 / 1024.0 / 1024.0)
}
