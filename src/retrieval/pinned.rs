//! Pinned retrieval - deterministic chunk selection
//!
//! 1. Hash every chunk; index hash → chunk (first in sorted order wins).
//! 2. Pin-reuse: required hashes (deduplicated, first occurrence kept) that
//!    resolve are selected in request order; unresolved ones are drift.
//! 3. Fill: remaining slots come from chunks not yet selected, sorted by
//!    `(source_id, text)`. Selection is tracked by corpus position, so the
//!    same text from two sources yields two chunks.
//! 4. Truncate to `top_k`.
//!
//! The query is informational and never used for ranking.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::determinism::hash_artifact;

/// One unit of external context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "ChunkRepr")]
pub struct Chunk {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
}

/// Chunks may be written as bare strings or as `{text, section}` objects
#[derive(Deserialize)]
#[serde(untagged)]
enum ChunkRepr {
    Text(String),
    Labeled {
        text: String,
        #[serde(default)]
        section: Option<String>,
    },
}

impl From<ChunkRepr> for Chunk {
    fn from(repr: ChunkRepr) -> Self {
        match repr {
            ChunkRepr::Text(text) => Chunk { text, section: None },
            ChunkRepr::Labeled { text, section } => Chunk { text, section },
        }
    }
}

impl From<&str> for Chunk {
    fn from(text: &str) -> Self {
        Chunk {
            text: text.to_string(),
            section: None,
        }
    }
}

/// A corpus source: weighted list of chunks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    #[serde(alias = "id")]
    pub source_id: String,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default)]
    pub chunks: Vec<Chunk>,
}

fn default_weight() -> f64 {
    1.0
}

impl Source {
    pub fn new(source_id: impl Into<String>, weight: f64) -> Self {
        Self {
            source_id: source_id.into(),
            weight,
            chunks: Vec::new(),
        }
    }

    pub fn with_chunk(mut self, chunk: impl Into<Chunk>) -> Self {
        self.chunks.push(chunk.into());
        self
    }
}

/// A retrieved chunk, referenced by content hash for replay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PinnedChunk {
    pub hash: String,
    pub source_id: String,
    pub text: String,
    pub weight: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
}

/// Retrieval output plus the pins that no longer resolve
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub chunks: Vec<PinnedChunk>,
    /// Required hashes absent from the corpus (retrieval drift)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing: Vec<String>,
}

impl RetrievalResult {
    /// Content hashes in output order (what a later run should pin)
    pub fn hashes(&self) -> Vec<String> {
        self.chunks.iter().map(|c| c.hash.clone()).collect()
    }

    pub fn has_drift(&self) -> bool {
        !self.missing.is_empty()
    }
}

/// Select up to `top_k` chunks, reusing `required_hashes` first.
pub fn pinned_retrieve(
    query: &str,
    sources: &[Source],
    required_hashes: &[String],
    top_k: usize,
) -> RetrievalResult {
    if sources.is_empty() || top_k == 0 {
        return RetrievalResult::default();
    }

    let corpus = sorted_corpus(sources);
    debug!(query, corpus = corpus.len(), pins = required_hashes.len(), top_k, "pinned retrieval");

    let mut index: HashMap<&str, usize> = HashMap::with_capacity(corpus.len());
    for (pos, chunk) in corpus.iter().enumerate() {
        index.entry(chunk.hash.as_str()).or_insert(pos);
    }

    let mut selected: Vec<usize> = Vec::with_capacity(top_k.min(corpus.len()));
    let mut taken: HashSet<usize> = HashSet::new();
    let mut missing = Vec::new();
    let mut seen: HashSet<&str> = HashSet::new();

    // Pin-reuse phase
    for hash in required_hashes {
        if !seen.insert(hash.as_str()) {
            continue;
        }
        match index.get(hash.as_str()) {
            Some(&pos) => {
                taken.insert(pos);
                selected.push(pos);
            }
            None => missing.push(hash.clone()),
        }
    }

    if !missing.is_empty() {
        warn!(missing = ?missing, "retrieval drift: pinned hashes no longer resolve");
    }

    // Deterministic-fill phase
    for pos in 0..corpus.len() {
        if selected.len() >= top_k {
            break;
        }
        if taken.insert(pos) {
            selected.push(pos);
        }
    }

    selected.truncate(top_k);
    RetrievalResult {
        chunks: selected.into_iter().map(|pos| corpus[pos].clone()).collect(),
        missing,
    }
}

/// Every chunk of every source, hashed and sorted by `(source_id, text)`.
fn sorted_corpus(sources: &[Source]) -> Vec<PinnedChunk> {
    let mut corpus: Vec<PinnedChunk> = sources
        .iter()
        .flat_map(|source| {
            source.chunks.iter().map(move |chunk| PinnedChunk {
                hash: hash_artifact(chunk.text.as_str()),
                source_id: source.source_id.clone(),
                text: chunk.text.clone(),
                weight: source.weight,
                section: chunk.section.clone(),
            })
        })
        .collect();

    corpus.sort_by(|a, b| {
        a.source_id
            .cmp(&b.source_id)
            .then_with(|| a.text.cmp(&b.text))
    });
    corpus
}
