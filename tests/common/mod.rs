#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use ragsync::embeddings::Embedder;
use ragsync::error::{RagsyncError, Result};
use ragsync::job::{InMemoryJobStatusStore, JobStatusStore};
use ragsync::store::{InMemoryVectorStore, VectorStore};
use ragsync::{Config, Indexer};

pub const DIMENSION: usize = 4;

/// Deterministic embedder that counts every text it embeds
#[derive(Default)]
pub struct CountingEmbedder {
    pub texts: AtomicUsize,
    pub calls: AtomicUsize,
    pub fail: AtomicBool,
}

impl CountingEmbedder {
    pub fn texts_embedded(&self) -> usize {
        self.texts.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl Embedder for CountingEmbedder {
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(RagsyncError::Embedding("OpenAI API error 401: invalid key".into()));
        }
        self.texts.fetch_add(texts.len(), Ordering::SeqCst);
        Ok(texts
            .iter()
            .map(|t| {
                let bytes = t.as_bytes();
                (0..DIMENSION)
                    .map(|i| bytes.get(i).copied().unwrap_or(0) as f32 / 255.0)
                    .collect()
            })
            .collect())
    }

    fn dimension(&self) -> usize {
        DIMENSION
    }
}

pub fn test_config(source_dir: &Path, sync_mode: &str) -> Config {
    let uri = source_dir.to_str().unwrap().replace('\\', "\\\\");
    let toml = format!(
        r#"
[indexer]
collection_name = "docs"
chunk_size = 500
sync_mode = "{}"
parse_concurrency = 2

[knowledge_source]
source_type = "localdir"
uri = "{}"

[embeddings]
provider = "openai"
model = "text-embedding-3-small"
api_key_env = "UNUSED_IN_TESTS"
batch_size = 16
dimensions = {}

[vector_db]
provider = "memory"
page_size = 2
delete_batch_size = 2
upsert_batch_size = 2
"#,
        sync_mode, uri, DIMENSION
    );
    Config::from_toml_str(&toml).unwrap()
}

pub struct Harness {
    pub config: Config,
    pub store: Arc<InMemoryVectorStore>,
    pub embedder: Arc<CountingEmbedder>,
    pub jobs: Arc<InMemoryJobStatusStore>,
}

impl Harness {
    pub fn new(source_dir: &Path, sync_mode: &str) -> Self {
        Self {
            config: test_config(source_dir, sync_mode),
            store: Arc::new(InMemoryVectorStore::new()),
            embedder: Arc::new(CountingEmbedder::default()),
            jobs: Arc::new(InMemoryJobStatusStore::new()),
        }
    }

    pub fn indexer(&self) -> Indexer {
        Indexer::new(
            &self.config,
            self.store.clone(),
            self.embedder.clone(),
            self.jobs.clone() as Arc<dyn JobStatusStore>,
        )
    }

    pub fn identity(&self, filepath: &str, index: usize) -> String {
        format!("{}::{}#{}", self.config.knowledge_source.fqn(), filepath, index)
    }

    /// identity → content hash for the harness source
    pub async fn fingerprints(&self) -> BTreeMap<String, String> {
        stored_fingerprints(self.store.as_ref(), &self.config).await
    }
}

pub async fn stored_fingerprints(store: &dyn VectorStore, config: &Config) -> BTreeMap<String, String> {
    let listed = store
        .list_fingerprints("docs", &config.knowledge_source.fqn(), 100, 10_000)
        .await
        .unwrap();
    let mut map = BTreeMap::new();
    for v in listed {
        assert!(
            map.insert(v.identity.clone(), v.content_hash).is_none(),
            "duplicate identity {}",
            v.identity
        );
    }
    map
}
