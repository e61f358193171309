//! SQLite-backed vector store.
//!
//! Embeddings are stored as little-endian `f32` blobs. Vector ids are UUIDs
//! generated at insert time.
//!
//! Writes take the write lock up front (`BEGIN IMMEDIATE`) so they queue
//! behind another writer for the busy timeout instead of failing on upgrade.

use std::path::Path;

use async_trait::async_trait;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, TransactionBehavior};

use super::{Metric, StoredVector, VectorRow, VectorStore};
use crate::db::Db;
use crate::error::{RagsyncError, Result};

pub struct SqliteVectorStore {
    db: Db,
}

impl SqliteVectorStore {
    /// Open (and migrate) the store at `path`
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::new(Db::open(path).await?))
    }

    /// Wrap an already-migrated database
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Run a store operation, classifying lock contention as transient
    async fn call<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.db.with_connection(f).await.map_err(classify_error)
    }
}

/// Busy/locked databases clear up on their own; everything else is permanent or passed through
fn classify_error(err: RagsyncError) -> RagsyncError {
    match err {
        RagsyncError::Database(rusqlite::Error::SqliteFailure(e, msg))
            if matches!(e.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) =>
        {
            RagsyncError::TransientGateway(msg.unwrap_or_else(|| e.to_string()))
        }
        other => other,
    }
}

fn collection_dimension(conn: &Connection, name: &str) -> Result<usize> {
    conn.query_row(
        "SELECT dimension FROM collections WHERE name = ?1",
        params![name],
        |row| row.get::<_, i64>(0),
    )
    .optional()?
    .map(|d| d as usize)
    .ok_or_else(|| RagsyncError::CollectionNotFound(name.to_string()))
}

fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

#[cfg(test)]
fn decode_embedding(blob: &[u8]) -> Option<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return None;
    }
    blob.chunks(4)
        .map(|bytes| {
            let arr: [u8; 4] = bytes.try_into().ok()?;
            Some(f32::from_le_bytes(arr))
        })
        .collect()
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn create_collection(&self, name: &str, dimension: usize, metric: Metric) -> Result<()> {
        let name = name.to_string();
        self.call(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let exists: bool = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM collections WHERE name = ?1)",
                params![name],
                |row| row.get(0),
            )?;
            if exists {
                return Err(RagsyncError::CollectionConflict(name));
            }
            tx.execute(
                "INSERT INTO collections (name, dimension, metric) VALUES (?1, ?2, ?3)",
                params![name, dimension as i64, metric.as_str()],
            )?;
            tx.commit()?;
            log::info!("Created collection {} (dimension {}, {})", name, dimension, metric.as_str());
            Ok(())
        })
        .await
    }

    async fn has_collection(&self, name: &str) -> Result<bool> {
        let name = name.to_string();
        self.call(move |conn| {
            Ok(conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM collections WHERE name = ?1)",
                params![name],
                |row| row.get(0),
            )?)
        })
        .await
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        self.call(|conn| {
            let mut stmt = conn.prepare("SELECT name FROM collections ORDER BY name")?;
            let names = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;
            Ok(names)
        })
        .await
    }

    async fn delete_collection(&self, name: &str) -> Result<()> {
        let name = name.to_string();
        self.call(move |conn| {
            // vectors go with it through ON DELETE CASCADE
            let deleted = conn.execute("DELETE FROM collections WHERE name = ?1", params![name])?;
            if deleted == 0 {
                return Err(RagsyncError::CollectionNotFound(name));
            }
            Ok(())
        })
        .await
    }

    async fn count_vectors(&self, collection: &str) -> Result<usize> {
        let collection = collection.to_string();
        self.call(move |conn| {
            collection_dimension(conn, &collection)?;
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM vectors WHERE collection = ?1",
                params![collection],
                |row| row.get(0),
            )?;
            Ok(count as usize)
        })
        .await
    }

    async fn query_page(
        &self,
        collection: &str,
        source_fqn: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<StoredVector>> {
        let collection = collection.to_string();
        let source_fqn = source_fqn.to_string();
        self.call(move |conn| {
            collection_dimension(conn, &collection)?;
            let mut stmt = conn.prepare(
                "SELECT vector_id, data_point_fqn, data_point_hash FROM vectors
                 WHERE collection = ?1 AND data_source_fqn = ?2
                 ORDER BY vector_id
                 LIMIT ?3 OFFSET ?4",
            )?;
            let rows = stmt
                .query_map(params![collection, source_fqn, limit as i64, offset as i64], |row| {
                    Ok(StoredVector {
                        vector_id: row.get(0)?,
                        identity: row.get(1)?,
                        content_hash: row.get(2)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;
            Ok(rows)
        })
        .await
    }

    async fn delete_vectors(&self, collection: &str, ids: &[String]) -> Result<()> {
        let collection = collection.to_string();
        let ids = ids.to_vec();
        self.call(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            {
                let mut stmt = tx.prepare("DELETE FROM vectors WHERE collection = ?1 AND vector_id = ?2")?;
                for id in &ids {
                    stmt.execute(params![collection, id])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn insert_rows(&self, collection: &str, rows: &[VectorRow]) -> Result<()> {
        let collection = collection.to_string();
        let rows = rows.to_vec();
        self.call(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let dimension = collection_dimension(&tx, &collection)?;

            if let Some(row) = rows.iter().find(|r| r.embedding.len() != dimension) {
                return Err(RagsyncError::PermanentGateway(format!(
                    "Vector for {} has dimension {}, collection {} expects {}",
                    row.identity,
                    row.embedding.len(),
                    collection,
                    dimension
                )));
            }

            {
                let mut stmt = tx.prepare(
                    "INSERT INTO vectors
                     (vector_id, collection, data_point_fqn, data_point_hash, data_source_fqn, text, metadata, embedding)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                     ON CONFLICT(collection, data_point_fqn, data_point_hash) DO NOTHING",
                )?;
                for row in &rows {
                    let metadata = serde_json::to_string(&row.metadata).map_err(|e| {
                        RagsyncError::PermanentGateway(format!("Unserializable metadata for {}: {}", row.identity, e))
                    })?;
                    stmt.execute(params![
                        uuid::Uuid::new_v4().to_string(),
                        collection,
                        row.identity,
                        row.content_hash,
                        row.source_fqn,
                        row.text,
                        metadata,
                        encode_embedding(&row.embedding),
                    ])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::Metadata;
    use tempfile::TempDir;

    fn row(identity: &str, hash: &str, source: &str, dim: usize) -> VectorRow {
        let mut metadata = Metadata::new();
        metadata.insert("filepath".to_string(), serde_json::json!("a.txt"));
        VectorRow {
            identity: identity.to_string(),
            content_hash: hash.to_string(),
            source_fqn: source.to_string(),
            text: format!("text of {}", identity),
            metadata,
            embedding: vec![0.25; dim],
        }
    }

    async fn open_store(temp_dir: &TempDir) -> SqliteVectorStore {
        SqliteVectorStore::open(temp_dir.path().join("vectors.db")).await.unwrap()
    }

    #[test]
    fn test_embedding_blob_roundtrip() {
        let blob = encode_embedding(&[1.0, -2.5, 3.25]);
        assert_eq!(blob.len(), 12);
        assert_eq!(decode_embedding(&blob), Some(vec![1.0, -2.5, 3.25]));
        assert_eq!(decode_embedding(&blob[..5]), None);
    }

    #[test]
    fn test_busy_is_transient() {
        let busy = RagsyncError::Database(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            Some("database is locked".to_string()),
        ));
        assert!(classify_error(busy).is_transient());
        assert!(!classify_error(RagsyncError::CollectionNotFound("x".into())).is_transient());
    }

    #[tokio::test]
    async fn test_collection_lifecycle() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir).await;

        store.create_collection("docs", 4, Metric::InnerProduct).await.unwrap();
        assert!(store.has_collection("docs").await.unwrap());
        assert!(matches!(
            store.create_collection("docs", 4, Metric::Cosine).await,
            Err(RagsyncError::CollectionConflict(_))
        ));
        assert_eq!(store.list_collections().await.unwrap(), vec!["docs"]);

        store.insert_rows("docs", &[row("s::a#0", "h", "s", 4)]).await.unwrap();
        store.delete_collection("docs").await.unwrap();
        assert!(!store.has_collection("docs").await.unwrap());

        let orphans: i64 = store
            .db
            .with_connection(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM vectors", [], |r| r.get(0))?))
            .await
            .unwrap();
        assert_eq!(orphans, 0);
    }

    #[tokio::test]
    async fn test_insert_query_delete() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir).await;
        store.create_collection("docs", 3, Metric::Cosine).await.unwrap();

        store
            .insert_rows(
                "docs",
                &[row("s1::a#0", "h1", "s1", 3), row("s1::b#0", "h2", "s1", 3), row("s2::a#0", "h3", "s2", 3)],
            )
            .await
            .unwrap();
        assert_eq!(store.count_vectors("docs").await.unwrap(), 3);

        let s1 = store.list_fingerprints("docs", "s1", 1, 100).await.unwrap();
        assert_eq!(s1.len(), 2);
        let mut identities: Vec<&str> = s1.iter().map(|v| v.identity.as_str()).collect();
        identities.sort();
        assert_eq!(identities, vec!["s1::a#0", "s1::b#0"]);

        let ids: Vec<String> = s1.iter().map(|v| v.vector_id.clone()).collect();
        store.delete_by_vector_ids("docs", &ids, 1).await.unwrap();
        assert_eq!(store.count_vectors("docs").await.unwrap(), 1);
        assert!(store.query_page("docs", "s1", 10, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_insert_rows_is_atomic_on_dimension_mismatch() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir).await;
        store.create_collection("docs", 3, Metric::Cosine).await.unwrap();

        let result = store
            .insert_rows("docs", &[row("s::a#0", "h", "s", 3), row("s::b#0", "h", "s", 2)])
            .await;
        assert!(matches!(result, Err(RagsyncError::PermanentGateway(_))));
        assert_eq!(store.count_vectors("docs").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_missing_collection_errors() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir).await;

        assert!(matches!(
            store.insert_rows("nope", &[row("s::a#0", "h", "s", 3)]).await,
            Err(RagsyncError::CollectionNotFound(_))
        ));
        assert!(matches!(
            store.query_page("nope", "s", 10, 0).await,
            Err(RagsyncError::CollectionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_reopen_keeps_rows() {
        let temp_dir = TempDir::new().unwrap();
        {
            let store = open_store(&temp_dir).await;
            store.create_collection("docs", 2, Metric::L2).await.unwrap();
            store.insert_rows("docs", &[row("s::a#0", "h", "s", 2)]).await.unwrap();
        }
        let store = open_store(&temp_dir).await;
        assert_eq!(store.count_vectors("docs").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_replayed_insert_is_noop() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir).await;
        store.create_collection("docs", 2, Metric::Cosine).await.unwrap();

        let batch = [row("s::a#0", "h1", "s", 2), row("s::b#0", "h1", "s", 2)];
        store.insert_rows("docs", &batch).await.unwrap();
        store.insert_rows("docs", &batch).await.unwrap();
        assert_eq!(store.count_vectors("docs").await.unwrap(), 2);

        store.insert_rows("docs", &[row("s::a#0", "h2", "s", 2)]).await.unwrap();
        assert_eq!(store.count_vectors("docs").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_writes_wait_for_another_writer() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir).await;

        let hold_lock = |db: &Db| {
            let conn = db.open_connection().unwrap();
            conn.execute_batch("BEGIN IMMEDIATE").unwrap();
            std::thread::spawn(move || {
                std::thread::sleep(std::time::Duration::from_millis(300));
                conn.execute_batch("COMMIT").unwrap();
            })
        };

        let writer = hold_lock(&store.db);
        store.create_collection("docs", 2, Metric::Cosine).await.unwrap();
        writer.join().unwrap();

        let writer = hold_lock(&store.db);
        store.insert_rows("docs", &[row("s::a#0", "h", "s", 2)]).await.unwrap();
        writer.join().unwrap();

        let writer = hold_lock(&store.db);
        let ids: Vec<String> = store
            .query_page("docs", "s", 10, 0)
            .await
            .unwrap()
            .into_iter()
            .map(|v| v.vector_id)
            .collect();
        store.delete_vectors("docs", &ids).await.unwrap();
        writer.join().unwrap();

        assert_eq!(store.count_vectors("docs").await.unwrap(), 0);
    }
}
