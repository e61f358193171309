//! In-process vector store for tests and dry runs.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use super::{Metric, StoredVector, VectorRow, VectorStore};
use crate::error::{RagsyncError, Result};

/// Number of primitive calls served, for asserting write minimality
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub query_calls: usize,
    pub delete_calls: usize,
    pub insert_calls: usize,
}

struct MemoryCollection {
    dimension: usize,
    metric: Metric,
    /// Keyed by vector_id so iteration matches `query_page` ordering
    rows: BTreeMap<String, VectorRow>,
}

#[derive(Default)]
struct Inner {
    collections: HashMap<String, MemoryCollection>,
    next_id: u64,
    stats: StoreStats,
}

/// `RwLock`-backed reference implementation of [`VectorStore`]
#[derive(Default)]
pub struct InMemoryVectorStore {
    inner: RwLock<Inner>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> StoreStats {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).stats
    }

    pub fn reset_stats(&self) {
        self.inner.write().unwrap_or_else(PoisonError::into_inner).stats = StoreStats::default();
    }

    /// Metric a collection was created with
    pub fn metric(&self, collection: &str) -> Option<Metric> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.collections.get(collection).map(|c| c.metric)
    }

    /// Stored row for a vector id
    pub fn row(&self, collection: &str, vector_id: &str) -> Option<VectorRow> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.collections.get(collection)?.rows.get(vector_id).cloned()
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn create_collection(&self, name: &str, dimension: usize, metric: Metric) -> Result<()> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if inner.collections.contains_key(name) {
            return Err(RagsyncError::CollectionConflict(name.to_string()));
        }
        inner.collections.insert(
            name.to_string(),
            MemoryCollection {
                dimension,
                metric,
                rows: BTreeMap::new(),
            },
        );
        Ok(())
    }

    async fn has_collection(&self, name: &str) -> Result<bool> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        Ok(inner.collections.contains_key(name))
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = inner.collections.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn delete_collection(&self, name: &str) -> Result<()> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner
            .collections
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| RagsyncError::CollectionNotFound(name.to_string()))
    }

    async fn count_vectors(&self, collection: &str) -> Result<usize> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner
            .collections
            .get(collection)
            .map(|c| c.rows.len())
            .ok_or_else(|| RagsyncError::CollectionNotFound(collection.to_string()))
    }

    async fn query_page(
        &self,
        collection: &str,
        source_fqn: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<StoredVector>> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.stats.query_calls += 1;
        let coll = inner
            .collections
            .get(collection)
            .ok_or_else(|| RagsyncError::CollectionNotFound(collection.to_string()))?;

        Ok(coll
            .rows
            .iter()
            .filter(|(_, row)| row.source_fqn == source_fqn)
            .skip(offset)
            .take(limit)
            .map(|(vector_id, row)| StoredVector {
                vector_id: vector_id.clone(),
                identity: row.identity.clone(),
                content_hash: row.content_hash.clone(),
            })
            .collect())
    }

    async fn delete_vectors(&self, collection: &str, ids: &[String]) -> Result<()> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.stats.delete_calls += 1;
        let coll = inner
            .collections
            .get_mut(collection)
            .ok_or_else(|| RagsyncError::CollectionNotFound(collection.to_string()))?;
        for id in ids {
            coll.rows.remove(id);
        }
        Ok(())
    }

    async fn insert_rows(&self, collection: &str, rows: &[VectorRow]) -> Result<()> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.stats.insert_calls += 1;
        let Inner {
            collections, next_id, ..
        } = &mut *inner;
        let coll = collections
            .get_mut(collection)
            .ok_or_else(|| RagsyncError::CollectionNotFound(collection.to_string()))?;

        // Validate the whole batch first so a bad row leaves nothing behind
        if let Some(row) = rows.iter().find(|r| r.embedding.len() != coll.dimension) {
            return Err(RagsyncError::PermanentGateway(format!(
                "Vector for {} has dimension {}, collection {} expects {}",
                row.identity,
                row.embedding.len(),
                collection,
                coll.dimension
            )));
        }

        let mut stored: HashSet<(String, String)> = coll
            .rows
            .values()
            .map(|r| (r.identity.clone(), r.content_hash.clone()))
            .collect();
        for row in rows {
            if !stored.insert((row.identity.clone(), row.content_hash.clone())) {
                continue;
            }
            *next_id += 1;
            coll.rows.insert(format!("{:020}", next_id), row.clone());
        }
        Ok(())
    }
}
