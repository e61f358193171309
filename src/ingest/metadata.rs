//! Metadata keys attached to chunks, and helpers to derive them from paths.

use std::path::Path;

/// Path of the originating file, relative to the staging root (`/`-separated)
pub const FILEPATH_KEY: &str = "filepath";
/// URI of the knowledge source the chunk came from
pub const SOURCE_URI_KEY: &str = "source_uri";
/// Type of the knowledge source (e.g. `localdir`)
pub const SOURCE_TYPE_KEY: &str = "source_type";
/// Zero-based position of the chunk within its file
pub const CHUNK_INDEX_KEY: &str = "chunk_index";
/// Optional parser-assigned stable key; takes precedence over `chunk_index` for identity
pub const CHUNK_KEY_KEY: &str = "chunk_key";
/// Document type reported by the parser (`markdown`, `json_schema`, ...)
pub const DOC_TYPE_KEY: &str = "doc_type";
pub const SECTION_HEADER_KEY: &str = "section_header";
pub const SECTION_TYPE_KEY: &str = "section_type";

/// Reserved keys written by the fingerprint stage and read back by vector stores.
pub const DATA_POINT_FQN_KEY: &str = "_data_point_fqn";
pub const DATA_POINT_HASH_KEY: &str = "_data_point_hash";
pub const DATA_SOURCE_FQN_KEY: &str = "_data_source_fqn";

/// Keys excluded from the content hash.
pub const RESERVED_KEYS: &[&str] = &[DATA_POINT_FQN_KEY, DATA_POINT_HASH_KEY, DATA_SOURCE_FQN_KEY];

/// Normalize a relative path to forward slashes so identities match across platforms.
pub fn normalize_relative_path(relative_path: &str) -> String {
    relative_path
        .replace('\\', "/")
        .trim_start_matches("./")
        .trim_start_matches('/')
        .to_string()
}

/// Lowercased extension without the leading dot, or `""` when absent.
pub fn file_extension(path: &Path) -> String {
    path.extension()
        .and_then(|s| s.to_str())
        .unwrap_or("")
        .to_lowercase()
}

/// Hidden entries are dot-prefixed names (`.git`, `.DS_Store`, ...).
pub fn is_hidden_name(name: &str) -> bool {
    name.starts_with('.')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_relative_path() {
        assert_eq!(normalize_relative_path("docs/a.md"), "docs/a.md");
        assert_eq!(normalize_relative_path("docs\\api\\b.md"), "docs/api/b.md");
        assert_eq!(normalize_relative_path("./a.txt"), "a.txt");
        assert_eq!(normalize_relative_path("/a.txt"), "a.txt");
    }

    #[test]
    fn test_file_extension() {
        assert_eq!(file_extension(Path::new("a/README.MD")), "md");
        assert_eq!(file_extension(Path::new("notes.txt")), "txt");
        assert_eq!(file_extension(Path::new("Makefile")), "");
    }

    #[test]
    fn test_is_hidden_name() {
        assert!(is_hidden_name(".git"));
        assert!(is_hidden_name(".env"));
        assert!(!is_hidden_name("guide.md"));
    }
}
