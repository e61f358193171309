use std::sync::Arc;

use async_trait::async_trait;

use super::{Metric, StoredVector, VectorRow, VectorStore};
use crate::error::Result;
use crate::retry::RetryPolicy;

/// Wraps a backend so every primitive call gets a timeout and bounded retry.
///
/// The provided operations (`list_fingerprints`, `delete_by_vector_ids`,
/// `upsert_chunks`) run on top of the retried primitives, so a transient
/// failure only repeats the page or batch that failed.
///
/// A timed-out attempt is abandoned, not stopped: on SQLite it keeps running
/// on the blocking pool and may still commit. Retried writes rely on
/// `insert_rows` ignoring rows whose fingerprint is already stored.
pub struct GatewayClient {
    inner: Arc<dyn VectorStore>,
    policy: RetryPolicy,
}

impl GatewayClient {
    pub fn new(inner: Arc<dyn VectorStore>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl VectorStore for GatewayClient {
    async fn create_collection(&self, name: &str, dimension: usize, metric: Metric) -> Result<()> {
        let inner = &self.inner;
        self.policy
            .run("create_collection", move || inner.create_collection(name, dimension, metric))
            .await
    }

    async fn has_collection(&self, name: &str) -> Result<bool> {
        let inner = &self.inner;
        self.policy.run("has_collection", move || inner.has_collection(name)).await
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        let inner = &self.inner;
        self.policy.run("list_collections", move || inner.list_collections()).await
    }

    async fn delete_collection(&self, name: &str) -> Result<()> {
        let inner = &self.inner;
        self.policy.run("delete_collection", move || inner.delete_collection(name)).await
    }

    async fn count_vectors(&self, collection: &str) -> Result<usize> {
        let inner = &self.inner;
        self.policy.run("count_vectors", move || inner.count_vectors(collection)).await
    }

    async fn query_page(
        &self,
        collection: &str,
        source_fqn: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<StoredVector>> {
        let inner = &self.inner;
        self.policy
            .run("query_page", move || inner.query_page(collection, source_fqn, limit, offset))
            .await
    }

    async fn delete_vectors(&self, collection: &str, ids: &[String]) -> Result<()> {
        let inner = &self.inner;
        self.policy.run("delete_vectors", move || inner.delete_vectors(collection, ids)).await
    }

    async fn insert_rows(&self, collection: &str, rows: &[VectorRow]) -> Result<()> {
        let inner = &self.inner;
        self.policy.run("insert_rows", move || inner.insert_rows(collection, rows)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RagsyncError;
    use crate::ingest::Metadata;
    use crate::db::Db;
    use crate::store::{InMemoryVectorStore, SqliteVectorStore};
    use tempfile::TempDir;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Fails the first `failures` inserts with a transient error
    struct FlakyStore {
        inner: InMemoryVectorStore,
        failures: AtomicUsize,
        permanent: bool,
    }

    #[async_trait]
    impl VectorStore for FlakyStore {
        async fn create_collection(&self, name: &str, dimension: usize, metric: Metric) -> Result<()> {
            self.inner.create_collection(name, dimension, metric).await
        }
        async fn has_collection(&self, name: &str) -> Result<bool> {
            self.inner.has_collection(name).await
        }
        async fn list_collections(&self) -> Result<Vec<String>> {
            self.inner.list_collections().await
        }
        async fn delete_collection(&self, name: &str) -> Result<()> {
            self.inner.delete_collection(name).await
        }
        async fn count_vectors(&self, collection: &str) -> Result<usize> {
            self.inner.count_vectors(collection).await
        }
        async fn query_page(
            &self,
            collection: &str,
            source_fqn: &str,
            limit: usize,
            offset: usize,
        ) -> Result<Vec<StoredVector>> {
            self.inner.query_page(collection, source_fqn, limit, offset).await
        }
        async fn delete_vectors(&self, collection: &str, ids: &[String]) -> Result<()> {
            self.inner.delete_vectors(collection, ids).await
        }
        async fn insert_rows(&self, collection: &str, rows: &[VectorRow]) -> Result<()> {
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(if self.permanent {
                    RagsyncError::PermanentGateway("schema mismatch".into())
                } else {
                    RagsyncError::TransientGateway("connection reset".into())
                });
            }
            self.inner.insert_rows(collection, rows).await
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
            call_timeout: Duration::from_secs(5),
        }
    }

    fn row() -> VectorRow {
        VectorRow {
            identity: "s::a#0".to_string(),
            content_hash: "h".to_string(),
            source_fqn: "s".to_string(),
            text: "a".to_string(),
            metadata: Metadata::new(),
            embedding: vec![1.0, 0.0],
        }
    }

    async fn client(failures: usize, permanent: bool) -> GatewayClient {
        let store = FlakyStore {
            inner: InMemoryVectorStore::new(),
            failures: AtomicUsize::new(failures),
            permanent,
        };
        store.create_collection("docs", 2, Metric::Cosine).await.unwrap();
        GatewayClient::new(Arc::new(store), policy())
    }

    #[tokio::test]
    async fn test_transient_insert_is_retried() {
        let client = client(2, false).await;
        client.insert_rows("docs", &[row()]).await.unwrap();
        assert_eq!(client.count_vectors("docs").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_retry_budget_exhausted() {
        let client = client(3, false).await;
        let result = client.insert_rows("docs", &[row()]).await;
        assert!(matches!(result, Err(RagsyncError::TransientGateway(_))));
        assert_eq!(client.count_vectors("docs").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_permanent_failure_surfaces_immediately() {
        let client = client(1, true).await;
        let result = client.insert_rows("docs", &[row()]).await;
        assert!(matches!(result, Err(RagsyncError::PermanentGateway(_))));
    }

    #[tokio::test]
    async fn test_conflict_is_not_retried() {
        let client = client(0, false).await;
        let result = client.create_collection("docs", 2, Metric::Cosine).await;
        assert!(matches!(result, Err(RagsyncError::CollectionConflict(_))));
    }

    #[tokio::test]
    async fn test_timed_out_sqlite_insert_is_written_once() {
        let temp_dir = TempDir::new().unwrap();
        let db = Db::open(temp_dir.path().join("vectors.db")).await.unwrap();
        let store = Arc::new(SqliteVectorStore::new(db.clone()));
        store.create_collection("docs", 2, Metric::Cosine).await.unwrap();

        let client = GatewayClient::new(
            store.clone(),
            RetryPolicy {
                max_retries: 40,
                initial_backoff: Duration::from_millis(5),
                max_backoff: Duration::from_millis(20),
                call_timeout: Duration::from_millis(50),
            },
        );
        let rows: Vec<VectorRow> = (0..200)
            .map(|i| VectorRow {
                identity: format!("s::f.txt#{}", i),
                ..row()
            })
            .collect();

        // Every attempt made while another writer holds the lock times out
        // and is left queued on the blocking pool
        let conn = db.open_connection().unwrap();
        conn.execute_batch("BEGIN IMMEDIATE").unwrap();
        let writer = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(300));
            conn.execute_batch("COMMIT").unwrap();
        });

        client.insert_rows("docs", &rows).await.unwrap();
        writer.join().unwrap();

        // Let the abandoned attempts commit too
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(store.count_vectors("docs").await.unwrap(), 200);

        let listed = store.list_fingerprints("docs", "s", 100, 1_000).await.unwrap();
        let identities: std::collections::BTreeSet<_> = listed.iter().map(|v| v.identity.as_str()).collect();
        assert_eq!(identities.len(), 200);
    }
}
