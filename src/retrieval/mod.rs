//! Retrieval Module - deterministic external context
//!
//! - `pinned`: hash-pinned chunk selection with sorted fill
//! - `citation`: audit export of retrieved chunks

mod citation;
mod pinned;

pub use citation::{export_citations, CitationExport, CitationRecord, UNSECTIONED};
pub use pinned::{pinned_retrieve, Chunk, PinnedChunk, RetrievalResult, Source};
