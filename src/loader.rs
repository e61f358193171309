//! Knowledge sources and the loaders that stage them on local disk.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::error::{RagsyncError, Result};

/// Supported knowledge source kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    /// A directory on the local filesystem
    LocalDir,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::LocalDir => "localdir",
        }
    }

    /// Loader implementation for this source kind
    pub fn loader(&self) -> Arc<dyn Loader> {
        match self {
            SourceType::LocalDir => Arc::new(LocalDirLoader),
        }
    }
}

/// Where documents come from. Immutable for the duration of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeSource {
    pub source_type: SourceType,
    pub uri: String,
}

impl KnowledgeSource {
    /// Fully-qualified source name used to scope vectors in the store
    pub fn fqn(&self) -> String {
        crate::fingerprint::source_fqn(self.source_type.as_str(), &self.uri)
    }
}

/// Materializes a knowledge source into a staging directory
#[async_trait]
pub trait Loader: Send + Sync {
    async fn load(&self, source: &KnowledgeSource, dest_dir: &Path) -> Result<()>;
}

/// Copies a local directory tree into the staging directory
pub struct LocalDirLoader;

impl LocalDirLoader {
    /// Resolve a `localdir` URI (plain path or `file://` URL) to a directory
    pub fn resolve(uri: &str) -> PathBuf {
        PathBuf::from(uri.strip_prefix("file://").unwrap_or(uri))
    }
}

#[async_trait]
impl Loader for LocalDirLoader {
    async fn load(&self, source: &KnowledgeSource, dest_dir: &Path) -> Result<()> {
        let src_dir = Self::resolve(&source.uri);
        let dest_dir = dest_dir.to_path_buf();

        let copied = tokio::task::spawn_blocking(move || copy_tree(&src_dir, &dest_dir))
            .await
            .map_err(|e| RagsyncError::Load(format!("Loader task failed: {}", e)))??;

        log::info!("Loaded {} files from {}", copied, source.uri);
        Ok(())
    }
}

fn copy_tree(src_dir: &Path, dest_dir: &Path) -> Result<usize> {
    if !src_dir.is_dir() {
        return Err(RagsyncError::Load(format!(
            "Source directory does not exist or is not a directory: {}",
            src_dir.display()
        )));
    }

    let mut copied = 0;
    for entry in WalkDir::new(src_dir).follow_links(true) {
        let entry = entry.map_err(|e| RagsyncError::Load(format!("Failed to walk {}: {}", src_dir.display(), e)))?;
        let relative = entry
            .path()
            .strip_prefix(src_dir)
            .map_err(|_| RagsyncError::Load(format!("Path outside source: {}", entry.path().display())))?;
        let target = dest_dir.join(relative);

        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)
                .map_err(|e| RagsyncError::Load(format!("Failed to create {}: {}", target.display(), e)))?;
        } else if entry.file_type().is_file() {
            std::fs::copy(entry.path(), &target)
                .map_err(|e| RagsyncError::Load(format!("Failed to copy {}: {}", entry.path().display(), e)))?;
            copied += 1;
        }
    }

    Ok(copied)
}
