//! Fingerprint reconciliation: converge a source's vectors to a fresh chunk set.
//!
//! Vectors are matched by identity. A changed chunk keeps its identity and
//! gets a new content hash, so it is replaced; an unchanged chunk is never
//! re-embedded. Stale vectors are always deleted before replacements are
//! inserted, so a reader never sees two versions of one identity.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::embeddings::Embedder;
use crate::error::{RagsyncError, Result};
use crate::fingerprint::{self, Fingerprint};
use crate::ingest::Chunk;
use crate::loader::KnowledgeSource;
use crate::store::{StoredVector, VectorStore};

/// How vectors whose identity disappeared from the source are treated
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// Replace changed chunks and add new ones; leave vanished identities alone
    #[default]
    Incremental,
    /// Also delete every stored identity the source no longer produces
    Full,
}

/// Shared flag checked between batches
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once the flag is set
    pub fn check(&self, stage: &str) -> Result<()> {
        if self.is_cancelled() {
            return Err(RagsyncError::Cancelled(format!("cancelled before {}", stage)));
        }
        Ok(())
    }
}

/// A fingerprinted chunk, stamped with its reserved metadata
#[derive(Debug, Clone, PartialEq)]
pub struct DesiredChunk {
    pub fingerprint: Fingerprint,
    pub chunk: Chunk,
}

/// Fingerprint and stamp every chunk
pub fn fingerprint_chunks(chunks: Vec<Chunk>) -> Result<Vec<DesiredChunk>> {
    chunks
        .into_iter()
        .map(|chunk| {
            let fingerprint = fingerprint::derive(&chunk)?;
            let chunk = fingerprint::stamp(chunk, &fingerprint)?;
            Ok(DesiredChunk { fingerprint, chunk })
        })
        .collect()
}

/// The delta between desired and existing fingerprints
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcilePlan {
    /// New identities and changed versions, in desired order
    pub to_insert: Vec<DesiredChunk>,
    /// Stale versions, vanished identities (full mode) and duplicates
    pub to_delete: Vec<StoredVector>,
    /// Identities already stored with the same hash
    pub unchanged: Vec<String>,
}

impl ReconcilePlan {
    pub fn is_noop(&self) -> bool {
        self.to_insert.is_empty() && self.to_delete.is_empty()
    }

    pub fn delete_ids(&self) -> Vec<String> {
        self.to_delete.iter().map(|v| v.vector_id.clone()).collect()
    }
}

/// Compute the minimal delta that turns `existing` into `desired`.
///
/// Fails with `InvalidInput` if two desired chunks share an identity.
pub fn plan(desired: Vec<DesiredChunk>, existing: &[StoredVector], mode: SyncMode) -> Result<ReconcilePlan> {
    let mut desired_hashes: HashMap<&str, &str> = HashMap::with_capacity(desired.len());
    for d in &desired {
        if desired_hashes
            .insert(&d.fingerprint.identity, &d.fingerprint.content_hash)
            .is_some()
        {
            return Err(RagsyncError::InvalidInput(format!(
                "Duplicate chunk identity produced by parser: {}",
                d.fingerprint.identity
            )));
        }
    }

    // Group in listing order so duplicate handling is deterministic
    let mut existing_by_identity: BTreeMap<&str, Vec<&StoredVector>> = BTreeMap::new();
    for stored in existing {
        existing_by_identity.entry(&stored.identity).or_default().push(stored);
    }

    let mut to_delete = Vec::new();
    let mut matched: HashSet<String> = HashSet::new();

    for (identity, entries) in existing_by_identity {
        let keep = match desired_hashes.get(identity) {
            Some(hash) => entries.iter().position(|e| e.content_hash == *hash),
            None if mode == SyncMode::Full => None,
            // Untouched in incremental mode, but at most one copy survives
            None => Some(0),
        };

        if entries.len() > 1 {
            log::warn!("Found {} stored vectors for identity {}; removing extras", entries.len(), identity);
        }

        for (i, entry) in entries.into_iter().enumerate() {
            if Some(i) != keep {
                to_delete.push(entry.clone());
            }
        }
        if keep.is_some() && desired_hashes.contains_key(identity) {
            matched.insert(identity.to_string());
        }
    }

    let mut to_insert = Vec::new();
    let mut unchanged = Vec::new();
    for d in desired {
        if matched.contains(&d.fingerprint.identity) {
            unchanged.push(d.fingerprint.identity);
        } else {
            to_insert.push(d);
        }
    }

    Ok(ReconcilePlan {
        to_insert,
        to_delete,
        unchanged,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileOptions {
    pub mode: SyncMode,
    pub page_size: usize,
    pub max_results: usize,
    pub delete_batch_size: usize,
    pub upsert_batch_size: usize,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            mode: SyncMode::Incremental,
            page_size: 1_000,
            max_results: 1_000_000,
            delete_batch_size: 500,
            upsert_batch_size: 100,
        }
    }
}

/// Outcome counts of one reconciliation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub existing: usize,
    pub inserted: usize,
    pub deleted: usize,
    pub unchanged: usize,
}

pub struct Reconciler {
    store: Arc<dyn VectorStore>,
    options: ReconcileOptions,
    cancel: CancelFlag,
}

impl Reconciler {
    pub fn new(store: Arc<dyn VectorStore>, options: ReconcileOptions) -> Self {
        Self {
            store,
            options,
            cancel: CancelFlag::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Compute the plan without touching the store's contents
    pub async fn plan(&self, collection: &str, source: &KnowledgeSource, chunks: Vec<Chunk>) -> Result<ReconcilePlan> {
        let desired = fingerprint_chunks(chunks)?;
        let existing = self.existing_fingerprints(collection, source).await?;
        plan(desired, &existing, self.options.mode)
    }

    /// Converge the store to `chunks` for this source.
    ///
    /// Any gateway failure aborts; batches already applied stay applied and
    /// a rerun converges from there.
    pub async fn reconcile(
        &self,
        collection: &str,
        source: &KnowledgeSource,
        chunks: Vec<Chunk>,
        embedder: &dyn Embedder,
    ) -> Result<ReconcileReport> {
        if chunks.is_empty() && self.options.mode == SyncMode::Incremental {
            log::warn!(
                "Source {} produced no chunks; leaving stored vectors untouched (use full sync to remove them)",
                source.fqn()
            );
        }

        let desired = fingerprint_chunks(chunks)?;
        let existing = self.existing_fingerprints(collection, source).await?;
        let existing_count = existing.len();
        let plan = plan(desired, &existing, self.options.mode)?;

        log::info!(
            "Reconcile plan for {}: {} to insert, {} to delete, {} unchanged ({} stored)",
            source.fqn(),
            plan.to_insert.len(),
            plan.to_delete.len(),
            plan.unchanged.len(),
            existing_count
        );

        let deleted = self.apply_deletes(collection, &plan.delete_ids()).await?;
        let inserted = self.apply_inserts(collection, plan.to_insert, embedder).await?;

        Ok(ReconcileReport {
            existing: existing_count,
            inserted,
            deleted,
            unchanged: plan.unchanged.len(),
        })
    }

    /// Stored fingerprints for the source; an empty collection skips pagination.
    ///
    /// A listing cut off at `max_results` is an error: planning against it
    /// would re-insert every identity past the limit.
    async fn existing_fingerprints(&self, collection: &str, source: &KnowledgeSource) -> Result<Vec<StoredVector>> {
        self.cancel.check("listing")?;
        if self.store.count_vectors(collection).await? == 0 {
            log::info!("Collection {} is empty; indexing all chunks", collection);
            return Ok(Vec::new());
        }
        let listing = self
            .store
            .scan_fingerprints(
                collection,
                &source.fqn(),
                self.options.page_size,
                self.options.max_results,
            )
            .await?;
        if listing.truncated {
            return Err(RagsyncError::PermanentGateway(format!(
                "{} holds more than {} vectors for {}; raise vector_db.max_scroll_limit",
                collection,
                self.options.max_results,
                source.fqn()
            )));
        }
        Ok(listing.vectors)
    }

    async fn apply_deletes(&self, collection: &str, ids: &[String]) -> Result<usize> {
        let batch_size = self.options.delete_batch_size.max(1);
        let mut deleted = 0;
        for batch in ids.chunks(batch_size) {
            self.cancel.check("delete batch")?;
            deleted += self.store.delete_by_vector_ids(collection, batch, batch_size).await?;
        }
        Ok(deleted)
    }

    async fn apply_inserts(&self, collection: &str, to_insert: Vec<DesiredChunk>, embedder: &dyn Embedder) -> Result<usize> {
        let batch_size = self.options.upsert_batch_size.max(1);
        let chunks: Vec<Chunk> = to_insert.into_iter().map(|d| d.chunk).collect();
        let mut inserted = 0;
        for batch in chunks.chunks(batch_size) {
            self.cancel.check("upsert batch")?;
            inserted += self.store.upsert_chunks(collection, batch, embedder, batch_size).await?;
        }
        Ok(inserted)
    }
}
