//! Merge: attach enrichment metadata to the flattened content.
//!
//! Pure and idempotent — the same flat record and the same enrichment result
//! always produce byte-identical merged records. The merge never rewrites,
//! reorders, or re-indexes content blocks; in-text citation markers the
//! flattener produced stay exactly as they are, and the externally parsed
//! reference list rides alongside as a separate field. Resolving citations
//! against that list is a downstream consumer's job, not ours.

use crate::output::{Enrichment, EnrichmentMetadata, MergedRecord, FlatRecord, Provenance};

/// Combine one document's flat content with its enrichment outcome.
///
/// `Unavailable` and `NotAttempted` propagate verbatim into the header and
/// references fields, so the persisted record states *why* metadata is
/// absent rather than leaving a null to guess about.
pub fn merge(
    document_id: &str,
    content: FlatRecord,
    enrichment: Enrichment<EnrichmentMetadata>,
) -> MergedRecord {
    let enrichment_used = enrichment.is_present();

    let (header, references) = match enrichment {
        Enrichment::Present(meta) => (
            Enrichment::Present(meta.header),
            Enrichment::Present(meta.references),
        ),
        Enrichment::Unavailable => (Enrichment::Unavailable, Enrichment::Unavailable),
        Enrichment::NotAttempted => (Enrichment::NotAttempted, Enrichment::NotAttempted),
    };

    MergedRecord {
        document_id: document_id.to_owned(),
        content,
        header,
        references,
        provenance: Provenance {
            extractor_used: true,
            enrichment_used,
        },
    }
}
