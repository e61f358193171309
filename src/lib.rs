pub mod config;
pub mod db;
pub mod embeddings;
pub mod error;
pub mod fingerprint;
pub mod indexer;
pub mod ingest;
pub mod job;
pub mod loader;
pub mod reconcile;
pub mod retry;
pub mod store;

pub use config::Config;
pub use error::{RagsyncError, Result};
pub use fingerprint::Fingerprint;
pub use indexer::Indexer;
pub use reconcile::{CancelFlag, ReconcilePlan, ReconcileReport, Reconciler, SyncMode};
