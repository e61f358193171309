//! Stable chunk identities and content fingerprints.
//!
//! The identity locates a chunk within its source and never depends on the
//! chunk's text. The content hash changes exactly when the text or the
//! non-reserved metadata changes.

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::{RagsyncError, Result};
use crate::ingest::metadata::{
    CHUNK_INDEX_KEY, CHUNK_KEY_KEY, DATA_POINT_FQN_KEY, DATA_POINT_HASH_KEY, DATA_SOURCE_FQN_KEY, FILEPATH_KEY,
    RESERVED_KEYS, SOURCE_TYPE_KEY, SOURCE_URI_KEY,
};
use crate::ingest::{Chunk, Metadata};

/// Identity plus content hash of one chunk version
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    pub identity: String,
    pub content_hash: String,
}

/// `"{source_type}::{uri}"`, the single definition shared by listing and stamping
pub fn source_fqn(source_type: &str, uri: &str) -> String {
    format!("{}::{}", source_type, uri)
}

/// Fully-qualified source name recorded on a chunk by the walker
pub fn chunk_source_fqn(chunk: &Chunk) -> Result<String> {
    Ok(source_fqn(
        required_str(chunk, SOURCE_TYPE_KEY)?,
        required_str(chunk, SOURCE_URI_KEY)?,
    ))
}

/// Derive the fingerprint of a walker-tagged chunk.
///
/// Fails with [`RagsyncError::Parse`] when the chunk lacks `filepath`,
/// `source_uri`, `source_type`, or both `chunk_key` and `chunk_index`.
pub fn derive(chunk: &Chunk) -> Result<Fingerprint> {
    let source = chunk_source_fqn(chunk)?;
    let filepath = required_str(chunk, FILEPATH_KEY)?;
    let position = chunk_position(chunk)?;

    Ok(Fingerprint {
        identity: format!("{}::{}#{}", source, filepath, position),
        content_hash: content_hash(&chunk.text, &chunk.metadata)?,
    })
}

/// Write the reserved fingerprint keys into a chunk's metadata
pub fn stamp(chunk: Chunk, fingerprint: &Fingerprint) -> Result<Chunk> {
    let source = chunk_source_fqn(&chunk)?;
    Ok(chunk
        .with_metadata(DATA_POINT_FQN_KEY, fingerprint.identity.clone())
        .with_metadata(DATA_POINT_HASH_KEY, fingerprint.content_hash.clone())
        .with_metadata(DATA_SOURCE_FQN_KEY, source))
}

/// SHA-256 over normalized text and the canonical JSON of non-reserved metadata
pub fn content_hash(text: &str, metadata: &Metadata) -> Result<String> {
    let stable: Metadata = metadata
        .iter()
        .filter(|(key, _)| !RESERVED_KEYS.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    let metadata_json = serde_json::to_string(&stable)
        .map_err(|e| RagsyncError::InvalidInput(format!("Unserializable chunk metadata: {}", e)))?;

    let mut hasher = Sha256::new();
    hasher.update(normalize_text(text).as_bytes());
    hasher.update([0u8]);
    hasher.update(metadata_json.as_bytes());
    Ok(format!("{:x}", hasher.finalize()))
}

fn normalize_text(text: &str) -> String {
    text.replace("\r\n", "\n").trim_end().to_string()
}

fn required_str<'a>(chunk: &'a Chunk, key: &str) -> Result<&'a str> {
    chunk
        .metadata_str(key)
        .ok_or_else(|| RagsyncError::Parse(format!("Chunk is missing required metadata key '{}'", key)))
}

/// `chunk_key` when the parser assigned one, otherwise `chunk_index`
fn chunk_position(chunk: &Chunk) -> Result<String> {
    if let Some(key) = chunk.metadata_str(CHUNK_KEY_KEY) {
        return Ok(key.to_string());
    }
    match chunk.metadata.get(CHUNK_INDEX_KEY) {
        Some(Value::Number(n)) => Ok(n.to_string()),
        Some(Value::String(s)) => Ok(s.clone()),
        _ => Err(RagsyncError::Parse(format!(
            "Chunk is missing required metadata key '{}'",
            CHUNK_INDEX_KEY
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tagged(text: &str, filepath: &str, index: u64) -> Chunk {
        Chunk::new(text)
            .with_metadata(FILEPATH_KEY, filepath)
            .with_metadata(SOURCE_URI_KEY, "/data/docs")
            .with_metadata(SOURCE_TYPE_KEY, "localdir")
            .with_metadata(CHUNK_INDEX_KEY, index)
    }

    #[test]
    fn test_identity_format() {
        let fp = derive(&tagged("hello", "a.txt", 0)).unwrap();
        assert_eq!(fp.identity, "localdir::/data/docs::a.txt#0");
        assert_eq!(fp.content_hash.len(), 64);
    }

    #[test]
    fn test_derive_is_deterministic() {
        let chunk = tagged("hello world", "a.txt", 3);
        assert_eq!(derive(&chunk).unwrap(), derive(&chunk.clone()).unwrap());
    }

    #[test]
    fn test_text_change_keeps_identity_changes_hash() {
        let before = derive(&tagged("version one", "a.txt", 0)).unwrap();
        let after = derive(&tagged("version two", "a.txt", 0)).unwrap();
        assert_eq!(before.identity, after.identity);
        assert_ne!(before.content_hash, after.content_hash);
    }

    #[test]
    fn test_text_normalization() {
        let unix = derive(&tagged("line one\nline two", "a.txt", 0)).unwrap();
        let windows = derive(&tagged("line one\r\nline two  \n", "a.txt", 0)).unwrap();
        assert_eq!(unix, windows);
    }

    #[test]
    fn test_metadata_affects_hash() {
        let plain = derive(&tagged("same", "a.txt", 0)).unwrap();
        let with_header = derive(&tagged("same", "a.txt", 0).with_metadata("section_header", "Intro")).unwrap();
        assert_eq!(plain.identity, with_header.identity);
        assert_ne!(plain.content_hash, with_header.content_hash);
    }

    #[test]
    fn test_chunk_key_overrides_index() {
        let fp = derive(&tagged("x", "schema.json", 4).with_metadata(CHUNK_KEY_KEY, "definitions.User")).unwrap();
        assert_eq!(fp.identity, "localdir::/data/docs::schema.json#definitions.User");
    }

    #[test]
    fn test_missing_metadata_is_parse_error() {
        let chunk = Chunk::new("orphan").with_metadata(FILEPATH_KEY, "a.txt");
        assert!(matches!(derive(&chunk), Err(RagsyncError::Parse(_))));

        let no_index = Chunk::new("x")
            .with_metadata(FILEPATH_KEY, "a.txt")
            .with_metadata(SOURCE_URI_KEY, "/d")
            .with_metadata(SOURCE_TYPE_KEY, "localdir");
        assert!(matches!(derive(&no_index), Err(RagsyncError::Parse(_))));
    }

    #[test]
    fn test_stamp_does_not_change_hash() {
        let chunk = tagged("stable", "a.txt", 1);
        let fp = derive(&chunk).unwrap();
        let stamped = stamp(chunk, &fp).unwrap();

        assert_eq!(stamped.metadata_str(DATA_POINT_FQN_KEY), Some(fp.identity.as_str()));
        assert_eq!(stamped.metadata_str(DATA_POINT_HASH_KEY), Some(fp.content_hash.as_str()));
        assert_eq!(stamped.metadata_str(DATA_SOURCE_FQN_KEY), Some("localdir::/data/docs"));
        assert_eq!(derive(&stamped).unwrap(), fp);
    }

    #[test]
    fn test_stamped_source_matches_listing_scope() {
        use crate::loader::{KnowledgeSource, SourceType};
        let source = KnowledgeSource {
            source_type: SourceType::LocalDir,
            uri: "/data/docs".to_string(),
        };
        let chunk = tagged("scoped", "a.txt", 0);
        let stamped = stamp(chunk.clone(), &derive(&chunk).unwrap()).unwrap();
        assert_eq!(stamped.metadata_str(DATA_SOURCE_FQN_KEY), Some(source.fqn().as_str()));
    }
}
