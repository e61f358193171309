//! One indexing run: stage the source, chunk it, reconcile the collection.

use std::sync::Arc;

use crate::config::Config;
use crate::db::Db;
use crate::embeddings::{Embedder, EmbedderProvider, OpenAIEmbedder};
use crate::error::{RagsyncError, Result};
use crate::ingest::{collect_chunks, count_files_to_index, ParserRegistry, ParserTable};
use crate::job::{InMemoryJobStatusStore, JobRun, JobStatusStore, JobStoreProvider, SqliteJobStatusStore};
use crate::loader::KnowledgeSource;
use crate::reconcile::{CancelFlag, ReconcileOptions, ReconcilePlan, ReconcileReport, Reconciler, SyncMode};
use crate::store::{GatewayClient, InMemoryVectorStore, Metric, SqliteVectorStore, VectorStore, VectorStoreProvider};

/// Everything a run needs, resolved once at startup
pub struct Indexer {
    collection_name: String,
    source: KnowledgeSource,
    chunk_size: usize,
    parse_concurrency: usize,
    metric: Metric,
    registry: Arc<ParserRegistry>,
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    job_store: Arc<dyn JobStatusStore>,
    options: ReconcileOptions,
    cancel: CancelFlag,
}

impl Indexer {
    pub fn new(
        config: &Config,
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        job_store: Arc<dyn JobStatusStore>,
    ) -> Self {
        let registry = ParserRegistry::new(ParserTable::new(&config.indexer.parser_map))
            .with_plaintext_fallback(config.indexer.plaintext_fallback);

        Self {
            collection_name: config.indexer.collection_name.clone(),
            source: config.knowledge_source.clone(),
            chunk_size: config.indexer.chunk_size,
            parse_concurrency: config.indexer.parse_concurrency,
            metric: config.vector_db.metric,
            registry: Arc::new(registry),
            store,
            embedder,
            job_store,
            options: config.reconcile_options(),
            cancel: CancelFlag::new(),
        }
    }

    /// Build the configured providers. The vector store is wrapped in a
    /// [`GatewayClient`] with the configured retry policy.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let store: Arc<dyn VectorStore> = match config.vector_db.provider {
            VectorStoreProvider::Sqlite => Arc::new(SqliteVectorStore::open(&config.vector_db.path).await?),
            VectorStoreProvider::Memory => Arc::new(InMemoryVectorStore::new()),
        };
        let store: Arc<dyn VectorStore> = Arc::new(GatewayClient::new(store, config.retry.policy()));

        let embedder: Arc<dyn Embedder> = match config.embeddings.provider {
            EmbedderProvider::OpenAI => {
                let api_key = std::env::var(&config.embeddings.api_key_env).map_err(|_| {
                    RagsyncError::Config(format!("Environment variable {} not set", config.embeddings.api_key_env))
                })?;
                let mut embedder = OpenAIEmbedder::new(
                    api_key,
                    config.embeddings.model.clone(),
                    config.embeddings.dimensions,
                    config.embeddings.batch_size,
                )?
                .with_retry(config.retry.max_retries, config.retry.policy().initial_backoff);
                if let Some(api_base) = &config.embeddings.api_base {
                    embedder = embedder.with_api_base(api_base.clone());
                }
                Arc::new(embedder)
            }
        };

        let job_store: Arc<dyn JobStatusStore> = match config.job_store.provider {
            JobStoreProvider::Sqlite => Arc::new(SqliteJobStatusStore::new(Db::open(&config.job_store.path).await?)),
            JobStoreProvider::Memory => Arc::new(InMemoryJobStatusStore::new()),
        };

        Ok(Self::new(config, store, embedder, job_store))
    }

    pub fn with_sync_mode(mut self, mode: SyncMode) -> Self {
        self.options.mode = mode;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Index the source into the collection under one job run.
    ///
    /// The job is RUNNING for the duration, then COMPLETED or FAILED. The
    /// staging directory is removed on every exit path.
    pub async fn index_collection(&self, run_name: &str) -> Result<ReconcileReport> {
        let job = JobRun::start(Arc::clone(&self.job_store), run_name).await;
        let result = self.run().await;
        job.finish(result).await
    }

    async fn run(&self) -> Result<ReconcileReport> {
        let chunks = self.stage_and_chunk().await?;
        self.ensure_collection().await?;

        let report = self
            .reconciler()
            .reconcile(&self.collection_name, &self.source, chunks, self.embedder.as_ref())
            .await?;

        log::info!(
            "Indexed {} into {}: {} inserted, {} deleted, {} unchanged",
            self.source.fqn(),
            self.collection_name,
            report.inserted,
            report.deleted,
            report.unchanged
        );
        Ok(report)
    }

    /// Compute what a run would change, without writing vectors or job status
    pub async fn dry_run(&self) -> Result<ReconcilePlan> {
        let chunks = self.stage_and_chunk().await?;
        if !self.store.has_collection(&self.collection_name).await? {
            log::info!("Collection {} does not exist yet; every chunk would be inserted", self.collection_name);
            return crate::reconcile::plan(
                crate::reconcile::fingerprint_chunks(chunks)?,
                &[],
                self.options.mode,
            );
        }
        self.reconciler().plan(&self.collection_name, &self.source, chunks).await
    }

    fn reconciler(&self) -> Reconciler {
        Reconciler::new(Arc::clone(&self.store), self.options).with_cancel(self.cancel.clone())
    }

    async fn stage_and_chunk(&self) -> Result<Vec<crate::ingest::Chunk>> {
        // Removed on drop, including on error and cancellation
        let staging = tempfile::Builder::new().prefix("ragsync-").tempdir()?;

        self.source.source_type.loader().load(&self.source, staging.path()).await?;
        self.cancel.check("chunking")?;

        let file_count = count_files_to_index(staging.path(), self.registry.table())?;
        log::info!("{} files to index from {}", file_count, self.source.fqn());

        let chunks = collect_chunks(
            staging.path(),
            &self.source,
            self.chunk_size,
            Arc::clone(&self.registry),
            self.parse_concurrency,
        )
        .await?;
        log::info!("Produced {} chunks from {} files", chunks.len(), file_count);
        Ok(chunks)
    }

    async fn ensure_collection(&self) -> Result<()> {
        if self.store.has_collection(&self.collection_name).await? {
            return Ok(());
        }
        log::info!(
            "Creating collection {} (dimension {}, {})",
            self.collection_name,
            self.embedder.dimension(),
            self.metric.as_str()
        );
        match self
            .store
            .create_collection(&self.collection_name, self.embedder.dimension(), self.metric)
            .await
        {
            // Lost a race with another run; the collection is there either way
            Err(RagsyncError::CollectionConflict(_)) => Ok(()),
            other => other,
        }
    }
}
