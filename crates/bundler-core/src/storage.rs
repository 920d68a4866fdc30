//! Remote storage client
//!
//! The pipeline needs very little from storage: an authenticated session,
//! a backup of the scene object before anything is changed, uploads with
//! progress, and a listing to warn about overwrites. [`LocalStorage`]
//! implements it over a local directory.

use crate::error::StorageError;
use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info};

/// Upload chunk size
pub const UPLOAD_CHUNK_SIZE: usize = 256 * 1024;

/// Folder receiving scene backups
pub const BACKUP_PREFIX: &str = "backups/";

/// Called with `(bytes sent, total bytes)` after every chunk
pub type UploadProgress<'a> = &'a (dyn Fn(u64, u64) + Send + Sync);

/// A completed upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    pub key: String,
    pub size: u64,
}

#[async_trait]
pub trait StorageClient: Send + Sync {
    async fn authenticate(&self) -> Result<(), StorageError>;

    fn is_authenticated(&self) -> bool;

    /// Copy `key` aside and return the backup's key
    async fn backup(&self, key: &str, note: &str) -> Result<String, StorageError>;

    /// Upload `file` under `prefix`, keeping its file name
    async fn upload(
        &self,
        file: &Path,
        prefix: &str,
        progress: UploadProgress<'_>,
    ) -> Result<UploadReceipt, StorageError>;

    /// Object names directly under `prefix`
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

    /// Key of the scene object being bundled
    fn scene_object(&self) -> String;

    /// Prefix archives are uploaded to
    fn root_prefix(&self) -> String;
}

/// Storage backed by a local directory
#[derive(Debug)]
pub struct LocalStorage {
    root: PathBuf,
    scene_object: String,
    authenticated: AtomicBool,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>, scene_object: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            scene_object: scene_object.into(),
            authenticated: AtomicBool::new(false),
        }
    }

    #[inline]
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn ensure_authenticated(&self) -> Result<(), StorageError> {
        if self.is_authenticated() {
            Ok(())
        } else {
            Err(StorageError::NotAuthenticated)
        }
    }

    fn object_path(&self, key: &str) -> PathBuf {
        key.split('/')
            .filter(|seg| !seg.is_empty() && *seg != "." && *seg != "..")
            .fold(self.root.clone(), |path, seg| path.join(seg))
    }
}

#[async_trait]
impl StorageClient for LocalStorage {
    async fn authenticate(&self) -> Result<(), StorageError> {
        tokio::fs::create_dir_all(&self.root).await?;
        self.authenticated.store(true, Ordering::SeqCst);
        debug!(root = %self.root.display(), "local storage ready");
        Ok(())
    }

    fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    async fn backup(&self, key: &str, note: &str) -> Result<String, StorageError> {
        self.ensure_authenticated()?;
        let source = self.object_path(key);
        if !tokio::fs::try_exists(&source).await.unwrap_or(false) {
            return Err(StorageError::NotFound(key.to_string()));
        }
        let name = key.rsplit('/').next().unwrap_or(key);
        let (stem, ext) = name.rsplit_once('.').unwrap_or((name, "txml"));
        let backup_key = format!(
            "{BACKUP_PREFIX}{stem}-{}.{ext}",
            Utc::now().format("%Y%m%dT%H%M%S%.3f")
        );
        let dest = self.object_path(&backup_key);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(&source, &dest).await?;
        info!(key, backup = %backup_key, note, "scene backed up");
        Ok(backup_key)
    }

    async fn upload(
        &self,
        file: &Path,
        prefix: &str,
        progress: UploadProgress<'_>,
    ) -> Result<UploadReceipt, StorageError> {
        self.ensure_authenticated()?;
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| StorageError::Upload {
                key: file.display().to_string(),
                reason: "path has no file name".to_string(),
            })?;
        let key = format!("{prefix}{name}");
        let dest = self.object_path(&key);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut input = tokio::fs::File::open(file).await?;
        let total = input.metadata().await?.len();
        let mut output = tokio::fs::File::create(&dest).await?;
        let mut buf = vec![0u8; UPLOAD_CHUNK_SIZE];
        let mut sent = 0u64;
        progress(0, total);
        loop {
            let read = input.read(&mut buf).await?;
            if read == 0 {
                break;
            }
            output.write_all(&buf[..read]).await?;
            sent += read as u64;
            progress(sent, total);
        }
        output.flush().await?;
        debug!(key = %key, bytes = sent, "upload complete");
        Ok(UploadReceipt { key, size: sent })
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        self.ensure_authenticated()?;
        let dir = self.object_path(prefix);
        let mut names = Vec::new();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(names),
            Err(err) => return Err(err.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    fn scene_object(&self) -> String {
        self.scene_object.clone()
    }

    fn root_prefix(&self) -> String {
        String::new()
    }
}
