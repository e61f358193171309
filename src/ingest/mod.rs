//! Staged-tree ingestion: file discovery, parsing and chunking.

pub mod chunker;
pub mod metadata;
pub mod parsers;
pub mod walker;

pub use chunker::{chunk_document, chunk_text, Chunk, Metadata};
pub use parsers::{default_parser_map, ParsedDocument, Parser, ParserKind, ParserRegistry, ParserTable, Section};
pub use walker::{collect_chunks, count_files_to_index, discover_files, SourceFile};
