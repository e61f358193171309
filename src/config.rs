use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::embeddings::EmbedderProvider;
use crate::ingest::{default_parser_map, ParserKind};
use crate::job::JobStoreProvider;
use crate::loader::{KnowledgeSource, LocalDirLoader, SourceType};
use crate::reconcile::{ReconcileOptions, SyncMode};
use crate::retry::RetryPolicy;
use crate::store::{Metric, VectorStoreProvider};

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub indexer: IndexerConfig,
    pub knowledge_source: KnowledgeSource,
    pub embeddings: EmbeddingsConfig,
    pub vector_db: VectorDbConfig,
    #[serde(default)]
    pub job_store: JobStoreConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

/// Indexing run configuration
#[derive(Debug, Clone, Deserialize)]
pub struct IndexerConfig {
    pub collection_name: String,
    /// Maximum chunk size in bytes
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default)]
    pub sync_mode: SyncMode,
    #[serde(default = "default_parse_concurrency")]
    pub parse_concurrency: usize,
    /// Extension → parser. Replaces the built-in table when set.
    #[serde(default = "default_parser_map")]
    pub parser_map: BTreeMap<String, ParserKind>,
    /// Retry files that a structured parser rejects as plain text
    #[serde(default)]
    pub plaintext_fallback: bool,
}

fn default_chunk_size() -> usize {
    1000
}

fn default_parse_concurrency() -> usize {
    4
}

/// Embeddings configuration
#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingsConfig {
    pub provider: EmbedderProvider,
    pub model: String,
    pub api_key_env: String,
    pub batch_size: usize,
    pub dimensions: usize,
    #[serde(default)]
    pub api_base: Option<String>,
}

/// Vector store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct VectorDbConfig {
    pub provider: VectorStoreProvider,
    #[serde(default = "default_vector_db_path")]
    pub path: PathBuf,
    #[serde(default)]
    pub metric: Metric,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Hard cap on fingerprints listed per source
    #[serde(default = "default_max_scroll_limit")]
    pub max_scroll_limit: usize,
    #[serde(default = "default_delete_batch_size")]
    pub delete_batch_size: usize,
    #[serde(default = "default_upsert_batch_size")]
    pub upsert_batch_size: usize,
}

fn default_vector_db_path() -> PathBuf {
    PathBuf::from("./ragsync.db")
}

fn default_page_size() -> usize {
    1000
}

fn default_max_scroll_limit() -> usize {
    1_000_000
}

fn default_delete_batch_size() -> usize {
    500
}

fn default_upsert_batch_size() -> usize {
    100
}

/// Job status store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct JobStoreConfig {
    #[serde(default = "default_job_store_provider")]
    pub provider: JobStoreProvider,
    #[serde(default = "default_vector_db_path")]
    pub path: PathBuf,
}

impl Default for JobStoreConfig {
    fn default() -> Self {
        Self {
            provider: default_job_store_provider(),
            path: default_vector_db_path(),
        }
    }
}

fn default_job_store_provider() -> JobStoreProvider {
    JobStoreProvider::Sqlite
}

/// Retry policy for vector store calls
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            call_timeout_secs: default_call_timeout_secs(),
        }
    }
}

fn default_max_retries() -> usize {
    3
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

fn default_call_timeout_secs() -> u64 {
    30
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            call_timeout: Duration::from_secs(self.call_timeout_secs),
        }
    }
}

impl Config {
    /// Load configuration from file
    ///
    /// Loads environment variables from .env file (if present) before loading config.
    /// Looks for config file in this order:
    /// 1. Path specified in RAGSYNC_CONFIG environment variable
    /// 2. ./config.toml in current directory
    pub fn load() -> Result<Self> {
        // .env is optional
        let _ = dotenv::dotenv();

        let config_path = std::env::var("RAGSYNC_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config.toml"));

        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config = Self::from_toml_str(&config_str)
            .with_context(|| format!("Failed to parse {}", config_path.display()))?;

        config.validate()?;

        Ok(config)
    }

    /// Parse without validating
    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.indexer.collection_name.trim().is_empty() {
            anyhow::bail!("indexer.collection_name must not be empty");
        }

        match self.knowledge_source.source_type {
            SourceType::LocalDir => {
                let dir = LocalDirLoader::resolve(&self.knowledge_source.uri);
                if !dir.is_dir() {
                    anyhow::bail!(
                        "knowledge_source.uri must be an existing directory for localdir sources: {}",
                        dir.display()
                    );
                }
            }
        }

        match self.embeddings.provider {
            EmbedderProvider::OpenAI => {
                std::env::var(&self.embeddings.api_key_env).with_context(|| {
                    format!(
                        "Environment variable {} not set. Set it in your .env file or as an environment variable with your OpenAI API key.",
                        self.embeddings.api_key_env
                    )
                })?;
            }
        }

        let sizes = [
            ("indexer.chunk_size", self.indexer.chunk_size),
            ("indexer.parse_concurrency", self.indexer.parse_concurrency),
            ("embeddings.batch_size", self.embeddings.batch_size),
            ("embeddings.dimensions", self.embeddings.dimensions),
            ("vector_db.page_size", self.vector_db.page_size),
            ("vector_db.max_scroll_limit", self.vector_db.max_scroll_limit),
            ("vector_db.delete_batch_size", self.vector_db.delete_batch_size),
            ("vector_db.upsert_batch_size", self.vector_db.upsert_batch_size),
            ("retry.max_backoff_ms", self.retry.max_backoff_ms as usize),
            ("retry.call_timeout_secs", self.retry.call_timeout_secs as usize),
        ];
        for (name, value) in sizes {
            if value == 0 {
                anyhow::bail!("{} must be greater than 0", name);
            }
        }

        if self.retry.initial_backoff_ms > self.retry.max_backoff_ms {
            anyhow::bail!(
                "retry.initial_backoff_ms ({}) must not exceed retry.max_backoff_ms ({})",
                self.retry.initial_backoff_ms,
                self.retry.max_backoff_ms
            );
        }

        if self.indexer.parser_map.is_empty() {
            anyhow::bail!("indexer.parser_map must map at least one extension");
        }

        Ok(())
    }

    /// Reconciler settings derived from `[indexer]` and `[vector_db]`
    pub fn reconcile_options(&self) -> ReconcileOptions {
        ReconcileOptions {
            mode: self.indexer.sync_mode,
            page_size: self.vector_db.page_size,
            max_results: self.vector_db.max_scroll_limit,
            delete_batch_size: self.vector_db.delete_batch_size,
            upsert_batch_size: self.vector_db.upsert_batch_size,
        }
    }
}
