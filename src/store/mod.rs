//! Vector store gateway.
//!
//! Backends implement a handful of single-call primitives. Pagination,
//! batching and the embed-then-write upsert path are provided on top of them
//! so every backend shares the same bounds and edge-case handling.

pub mod client;
pub mod memory;
pub mod sqlite;

use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::embeddings::Embedder;
use crate::error::{RagsyncError, Result};
use crate::ingest::metadata::{DATA_POINT_FQN_KEY, DATA_POINT_HASH_KEY, DATA_SOURCE_FQN_KEY};
use crate::ingest::{Chunk, Metadata};

pub use client::GatewayClient;
pub use memory::InMemoryVectorStore;
pub use sqlite::SqliteVectorStore;

/// Fingerprint of a vector already held by the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredVector {
    /// Store-assigned, opaque
    pub vector_id: String,
    pub identity: String,
    pub content_hash: String,
}

/// Bounded fingerprint listing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FingerprintListing {
    pub vectors: Vec<StoredVector>,
    /// The store holds more entries than were listed
    pub truncated: bool,
}

/// One row to write: a stamped chunk and its embedding
#[derive(Debug, Clone, PartialEq)]
pub struct VectorRow {
    pub identity: String,
    pub content_hash: String,
    pub source_fqn: String,
    pub text: String,
    pub metadata: Metadata,
    pub embedding: Vec<f32>,
}

impl VectorRow {
    /// Build a row from a chunk carrying the reserved fingerprint keys
    pub fn from_chunk(chunk: &Chunk, embedding: Vec<f32>) -> Result<Self> {
        let reserved = |key: &str| {
            chunk.metadata_str(key).map(str::to_string).ok_or_else(|| {
                RagsyncError::InvalidInput(format!("Chunk is not stamped: missing '{}'", key))
            })
        };

        Ok(Self {
            identity: reserved(DATA_POINT_FQN_KEY)?,
            content_hash: reserved(DATA_POINT_HASH_KEY)?,
            source_fqn: reserved(DATA_SOURCE_FQN_KEY)?,
            text: chunk.text.clone(),
            metadata: chunk.metadata.clone(),
            embedding,
        })
    }
}

/// Distance metric a collection is created with
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    #[default]
    Cosine,
    L2,
    InnerProduct,
}

impl Metric {
    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Cosine => "cosine",
            Metric::L2 => "l2",
            Metric::InnerProduct => "inner_product",
        }
    }
}

impl FromStr for Metric {
    type Err = RagsyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "cosine" => Ok(Metric::Cosine),
            "l2" => Ok(Metric::L2),
            "inner_product" => Ok(Metric::InnerProduct),
            other => Err(RagsyncError::PermanentGateway(format!("Unknown metric: {}", other))),
        }
    }
}

/// Configured vector store backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VectorStoreProvider {
    Sqlite,
    Memory,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Fails with `CollectionConflict` if `name` already exists
    async fn create_collection(&self, name: &str, dimension: usize, metric: Metric) -> Result<()>;

    async fn has_collection(&self, name: &str) -> Result<bool>;

    async fn list_collections(&self) -> Result<Vec<String>>;

    async fn delete_collection(&self, name: &str) -> Result<()>;

    /// Total number of vectors in a collection, across all sources
    async fn count_vectors(&self, collection: &str) -> Result<usize>;

    /// One page of a source's fingerprints, ordered by `vector_id`
    async fn query_page(
        &self,
        collection: &str,
        source_fqn: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<StoredVector>>;

    /// One delete call. Unknown ids are ignored.
    async fn delete_vectors(&self, collection: &str, ids: &[String]) -> Result<()>;

    /// One write call. Fails with `CollectionNotFound` if the collection is
    /// absent and `PermanentGateway` if a vector has the wrong dimension.
    ///
    /// A row whose `(identity, content_hash)` is already stored is skipped,
    /// so replaying a batch never adds a second copy.
    async fn insert_rows(&self, collection: &str, rows: &[VectorRow]) -> Result<()>;

    /// All fingerprints stored for a source, bounded by `max_results`.
    ///
    /// Stops at the first short page. When the store holds more than
    /// `max_results` entries the listing is truncated with a warning rather
    /// than growing without bound.
    async fn list_fingerprints(
        &self,
        collection: &str,
        source_fqn: &str,
        page_size: usize,
        max_results: usize,
    ) -> Result<Vec<StoredVector>> {
        let listing = self.scan_fingerprints(collection, source_fqn, page_size, max_results).await?;
        if listing.truncated {
            log::warn!(
                "Fingerprint listing for {} in {} reached the limit of {} entries; truncating",
                source_fqn,
                collection,
                max_results
            );
        }
        Ok(listing.vectors)
    }

    /// Paginated listing that reports whether entries remain past `max_results`
    async fn scan_fingerprints(
        &self,
        collection: &str,
        source_fqn: &str,
        page_size: usize,
        max_results: usize,
    ) -> Result<FingerprintListing> {
        if page_size == 0 {
            return Err(RagsyncError::InvalidInput("page_size must be greater than 0".to_string()));
        }

        let mut vectors = Vec::new();
        let mut offset = 0;

        loop {
            let page = self.query_page(collection, source_fqn, page_size, offset).await?;
            let page_len = page.len();
            vectors.extend(page);
            offset += page_len;
            log::debug!("Listed page of {} fingerprints for {} (total {})", page_len, source_fqn, vectors.len());

            if vectors.len() >= max_results {
                let truncated = if vectors.len() > max_results {
                    true
                } else if page_len < page_size {
                    false
                } else {
                    // Landed exactly on the limit with a full page; look one row further
                    !self.query_page(collection, source_fqn, 1, offset).await?.is_empty()
                };
                vectors.truncate(max_results);
                return Ok(FingerprintListing { vectors, truncated });
            }
            if page_len < page_size {
                return Ok(FingerprintListing {
                    vectors,
                    truncated: false,
                });
            }
        }
    }

    /// Delete vectors in batches of at most `batch_size`; returns the number of ids submitted
    async fn delete_by_vector_ids(&self, collection: &str, ids: &[String], batch_size: usize) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        if batch_size == 0 {
            return Err(RagsyncError::InvalidInput("delete batch_size must be greater than 0".to_string()));
        }

        for batch in ids.chunks(batch_size) {
            self.delete_vectors(collection, batch).await?;
            log::debug!("Deleted batch of {} vectors from {}", batch.len(), collection);
        }
        Ok(ids.len())
    }

    /// Embed and write stamped chunks in batches of at most `batch_size`.
    ///
    /// Each batch is one `embed_documents` call followed by one
    /// `insert_rows` call. Returns the number of rows written.
    async fn upsert_chunks(
        &self,
        collection: &str,
        chunks: &[Chunk],
        embedder: &dyn Embedder,
        batch_size: usize,
    ) -> Result<usize> {
        if chunks.is_empty() {
            return Ok(0);
        }
        if batch_size == 0 {
            return Err(RagsyncError::InvalidInput("upsert batch_size must be greater than 0".to_string()));
        }
        if !self.has_collection(collection).await? {
            return Err(RagsyncError::CollectionNotFound(collection.to_string()));
        }

        for batch in chunks.chunks(batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let embeddings = embedder.embed_documents(&texts).await?;
            if embeddings.len() != batch.len() {
                return Err(RagsyncError::Embedding(format!(
                    "Embedder returned {} vectors for {} texts",
                    embeddings.len(),
                    batch.len()
                )));
            }

            let rows = batch
                .iter()
                .zip(embeddings)
                .map(|(chunk, embedding)| VectorRow::from_chunk(chunk, embedding))
                .collect::<Result<Vec<_>>>()?;
            self.insert_rows(collection, &rows).await?;
            log::debug!("Upserted batch of {} chunks into {}", rows.len(), collection);
        }
        Ok(chunks.len())
    }
}
