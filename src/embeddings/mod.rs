//! Embedding capability and its providers.

pub mod openai;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use openai::OpenAIEmbedder;

/// Turns chunk text into fixed-length vectors.
///
/// `embed_documents` returns one vector per input, in input order, each of
/// length [`Embedder::dimension`]. Failures surface as
/// [`crate::error::RagsyncError::Embedding`].
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    fn dimension(&self) -> usize;
}

/// Configured embedding provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbedderProvider {
    OpenAI,
}
