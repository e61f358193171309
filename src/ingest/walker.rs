use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures_util::stream::{self, StreamExt, TryStreamExt};
use walkdir::WalkDir;

use super::chunker::Chunk;
use super::metadata::{
    is_hidden_name, normalize_relative_path, CHUNK_INDEX_KEY, FILEPATH_KEY, SOURCE_TYPE_KEY, SOURCE_URI_KEY,
};
use super::parsers::{ParserKind, ParserRegistry, ParserTable};
use crate::error::{RagsyncError, Result};
use crate::loader::KnowledgeSource;

/// A staged file selected for chunking
#[derive(Debug, Clone)]
pub struct SourceFile {
    /// Path relative to the staging root, `/`-separated
    pub relative_path: String,
    pub absolute_path: PathBuf,
    pub parser: ParserKind,
}

/// Discover every non-hidden file under `root` whose extension has a parser.
///
/// Hidden files and directories (dot-prefixed) are pruned. Files with
/// unmapped extensions are skipped with a debug log. Results are sorted by
/// relative path.
pub fn discover_files(root: &Path, table: &ParserTable) -> Result<Vec<SourceFile>> {
    let mut files = Vec::new();
    let mut skipped = 0usize;

    // depth 0 is the staging root itself, which may be a dot-prefixed temp dir
    let walker = WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden_name(&e.file_name().to_string_lossy()));

    for entry in walker {
        let entry = entry.map_err(|e| RagsyncError::Io(e.into()))?;
        let path = entry.path();

        if !entry.file_type().is_file() {
            continue;
        }

        let Some(parser) = table.parser_for(path) else {
            log::debug!("Skipping {}: no parser for this extension", path.display());
            skipped += 1;
            continue;
        };

        let relative_path = path
            .strip_prefix(root)
            .map_err(|_| RagsyncError::Config(format!("Failed to compute relative path for: {}", path.display())))?
            .to_string_lossy()
            .to_string();

        files.push(SourceFile {
            relative_path: normalize_relative_path(&relative_path),
            absolute_path: path.to_path_buf(),
            parser,
        });
    }

    files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));

    log::info!(
        "Discovered {} files to index in {} ({} unsupported skipped)",
        files.len(),
        root.display(),
        skipped
    );
    Ok(files)
}

/// Number of files under `root` that a run would chunk
pub fn count_files_to_index(root: &Path, table: &ParserTable) -> Result<usize> {
    Ok(discover_files(root, table)?.len())
}

/// Parse every eligible file under `root` into tagged chunks.
///
/// Up to `concurrency` files are parsed at once on the blocking pool. Output
/// is ordered by file path, then by position within the file, regardless of
/// completion order. The first parser failure aborts the walk.
pub async fn collect_chunks(
    root: &Path,
    source: &KnowledgeSource,
    max_chunk_size: usize,
    registry: Arc<ParserRegistry>,
    concurrency: usize,
) -> Result<Vec<Chunk>> {
    let files = discover_files(root, registry.table())?;

    let mut parsed: Vec<(usize, String, Vec<Chunk>)> = stream::iter(files.into_iter().enumerate())
        .map(|(idx, file)| {
            let registry = Arc::clone(&registry);
            async move {
                let relative_path = file.relative_path.clone();
                let chunks = tokio::task::spawn_blocking(move || {
                    registry.get_chunks(file.parser, &file.absolute_path, max_chunk_size)
                })
                .await
                .map_err(|e| RagsyncError::Parse(format!("Parser task for {} failed: {}", relative_path, e)))??;
                Ok::<_, RagsyncError>((idx, relative_path, chunks))
            }
        })
        .buffer_unordered(concurrency.max(1))
        .try_collect()
        .await?;

    parsed.sort_by_key(|(idx, _, _)| *idx);

    let mut all_chunks = Vec::new();
    for (_, relative_path, chunks) in parsed {
        log::debug!("{} -> {} chunks", relative_path, chunks.len());
        all_chunks.extend(tag_chunks(chunks, &relative_path, source));
    }

    Ok(all_chunks)
}

/// Attach identity metadata to a file's chunks, in order
fn tag_chunks(chunks: Vec<Chunk>, relative_path: &str, source: &KnowledgeSource) -> Vec<Chunk> {
    chunks
        .into_iter()
        .enumerate()
        .map(|(index, chunk)| {
            chunk
                .with_metadata(FILEPATH_KEY, relative_path)
                .with_metadata(SOURCE_URI_KEY, source.uri.clone())
                .with_metadata(SOURCE_TYPE_KEY, source.source_type.as_str())
                .with_metadata(CHUNK_INDEX_KEY, index as u64)
        })
        .collect()
}
