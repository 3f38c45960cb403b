//! Citation export for audit: grouped, flat, counted, and source-indexed.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::pinned::PinnedChunk;

/// A citation is a pinned chunk viewed from the audit side
pub type CitationRecord = PinnedChunk;

/// Section key for chunks without a label
pub const UNSECTIONED: &str = "general";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CitationExport {
    /// Citations grouped by section label (input order kept within a group)
    pub by_section: BTreeMap<String, Vec<CitationRecord>>,
    /// All citations in input order
    pub citations: Vec<CitationRecord>,
    pub total: usize,
    /// Sorted, deduplicated source ids
    pub sources: Vec<String>,
}

pub fn export_citations(records: &[CitationRecord]) -> CitationExport {
    let mut by_section: BTreeMap<String, Vec<CitationRecord>> = BTreeMap::new();
    let mut sources = BTreeSet::new();

    for record in records {
        let section = record.section.as_deref().unwrap_or(UNSECTIONED);
        by_section
            .entry(section.to_string())
            .or_default()
            .push(record.clone());
        sources.insert(record.source_id.clone());
    }

    CitationExport {
        by_section,
        citations: records.to_vec(),
        total: records.len(),
        sources: sources.into_iter().collect(),
    }
}
