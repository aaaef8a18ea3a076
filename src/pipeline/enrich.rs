//! Enrichment: ask the bibliographic service for header and reference
//! metadata.
//!
//! This is the pipeline's only network stage, and the only stage whose
//! failure is *not* a failure: the service being down, slow, or confused is
//! a normal operating condition. Every transport or parse problem collapses
//! into [`Enrichment::Unavailable`] and the document sails on without
//! metadata. Nothing here can fail a work item.
//!
//! ## Retry Strategy
//!
//! Each endpoint gets the first attempt plus a bounded number of retries
//! with exponential backoff (`retry_backoff_ms * 2^attempt`). With the
//! 500 ms default and 2 retries the wait sequence is 500 ms → 1 s, under
//! 2 s of back-off per endpoint — enough to ride out a restart, never
//! enough to stall a worker behind a dead service.

use crate::error::PipelineError;
use crate::output::{Enrichment, EnrichmentMetadata, Header, Reference};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use std::path::Path;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// The bibliographic-metadata capability.
///
/// Best-effort by contract: implementations return what they found or
/// [`Enrichment::Unavailable`], never an error.
#[async_trait]
pub trait MetadataEnricher: Send + Sync {
    async fn enrich(&self, pdf_path: &Path) -> Enrichment<EnrichmentMetadata>;
}

/// Production enricher for a GROBID-style HTTP service.
///
/// Posts the PDF to `{base}/api/processHeaderDocument` and
/// `{base}/api/processReferences` and parses the TEI XML answers. The two
/// endpoints degrade independently — a reachable header endpoint with a
/// broken reference endpoint still yields `Present` metadata with an empty
/// reference list.
pub struct GrobidEnricher {
    base_url: String,
    client: reqwest::Client,
    retries: u32,
    backoff_ms: u64,
}

impl GrobidEnricher {
    /// Build an enricher with a per-call timeout and bounded retries.
    pub fn new(
        base_url: impl Into<String>,
        timeout_secs: u64,
        retries: u32,
        backoff_ms: u64,
    ) -> Result<Self, PipelineError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| PipelineError::Internal(format!("HTTP client: {e}")))?;

        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }

        Ok(GrobidEnricher {
            base_url,
            client,
            retries,
            backoff_ms,
        })
    }

    /// Post the PDF to one endpoint and return the TEI body, or `None` after
    /// all attempts are spent. Non-2xx statuses, timeouts, and empty bodies
    /// all count as a failed attempt.
    async fn post_pdf(&self, endpoint: &str, consolidate_field: &str, pdf: &[u8]) -> Option<String> {
        let url = format!("{}/api/{}", self.base_url, endpoint);

        for attempt in 0..=self.retries {
            if attempt > 0 {
                let backoff = self.backoff_ms * 2u64.pow(attempt - 1);
                debug!("{endpoint}: retry {attempt}/{} after {backoff}ms", self.retries);
                sleep(Duration::from_millis(backoff)).await;
            }

            // Multipart forms are consumed by send(); rebuild per attempt.
            let part = match Part::bytes(pdf.to_vec())
                .file_name("doc.pdf")
                .mime_str("application/pdf")
            {
                Ok(p) => p,
                Err(e) => {
                    warn!("{endpoint}: cannot build request part: {e}");
                    return None;
                }
            };
            let form = Form::new()
                .part("input", part)
                .text(consolidate_field.to_owned(), "1");

            match self.client.post(&url).multipart(form).send().await {
                Ok(resp) if resp.status().is_success() => match resp.text().await {
                    Ok(body) if !body.trim().is_empty() => return Some(body),
                    Ok(_) => warn!("{endpoint}: empty response body"),
                    Err(e) => warn!("{endpoint}: body read failed: {e}"),
                },
                Ok(resp) => warn!("{endpoint}: HTTP {}", resp.status()),
                Err(e) => warn!("{endpoint}: {e}"),
            }
        }
        None
    }
}

#[async_trait]
impl MetadataEnricher for GrobidEnricher {
    async fn enrich(&self, pdf_path: &Path) -> Enrichment<EnrichmentMetadata> {
        let pdf = match tokio::fs::read(pdf_path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Cannot read {} for enrichment: {e}", pdf_path.display());
                return Enrichment::Unavailable;
            }
        };

        let header_xml = self
            .post_pdf("processHeaderDocument", "consolidateHeader", &pdf)
            .await;
        let refs_xml = self
            .post_pdf("processReferences", "includeRawCitations", &pdf)
            .await;

        // A malformed TEI body is treated the same as no body at all.
        let header = header_xml.as_deref().and_then(|x| tei::parse_header(x).ok());
        let references = refs_xml.as_deref().and_then(|x| tei::parse_references(x).ok());

        if header.is_none() && references.is_none() {
            return Enrichment::Unavailable;
        }

        Enrichment::Present(EnrichmentMetadata {
            header: header.unwrap_or_default(),
            references: references.unwrap_or_default(),
        })
    }
}

/// TEI XML → output types.
///
/// roxmltree's `tag_name().name()` returns local names, so the TEI default
/// namespace needs no special handling. The field mapping (analytic title,
/// persName forename + surname, monogr venue, biblScope volume/issue/pages)
/// follows what GROBID actually emits.
pub(crate) mod tei {
    use super::*;
    use roxmltree::{Document, Node};

    /// All descendant text of a node, whitespace-normalised.
    fn text_content(node: Node<'_, '_>) -> String {
        let raw: String = node
            .descendants()
            .filter(|n| n.is_text())
            .filter_map(|n| n.text())
            .collect();
        raw.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    fn non_empty(s: String) -> Option<String> {
        if s.is_empty() {
            None
        } else {
            Some(s)
        }
    }

    fn find<'a, 'i>(scope: Node<'a, 'i>, name: &str) -> Option<Node<'a, 'i>> {
        scope
            .descendants()
            .find(|n| n.is_element() && n.tag_name().name() == name)
    }

    fn find_all<'a, 'i>(
        scope: Node<'a, 'i>,
        name: &'a str,
    ) -> impl Iterator<Item = Node<'a, 'i>> {
        scope
            .descendants()
            .filter(move |n| n.is_element() && n.tag_name().name() == name)
    }

    /// "forename(s) surname" for one `author` element; empty when the
    /// element holds no usable persName.
    fn person_name(author: Node<'_, '_>) -> String {
        let mut parts: Vec<String> = find_all(author, "forename")
            .map(text_content)
            .filter(|s| !s.is_empty())
            .collect();
        if let Some(surname) = find(author, "surname") {
            let s = text_content(surname);
            if !s.is_empty() {
                parts.push(s);
            }
        }
        parts.join(" ")
    }

    fn authors_of(scope: Node<'_, '_>) -> Vec<String> {
        find_all(scope, "author")
            .map(person_name)
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// A `date` element's value: the machine-readable `when` attribute wins
    /// over the display text.
    fn date_value(node: Node<'_, '_>) -> Option<String> {
        node.attribute("when")
            .map(str::to_owned)
            .or_else(|| non_empty(text_content(node)))
    }

    pub(crate) fn parse_header(xml: &str) -> Result<Header, roxmltree::Error> {
        let doc = Document::parse(xml)?;
        let root = doc.root_element();

        let title = root
            .descendants()
            .filter(|n| n.is_element() && n.tag_name().name() == "title")
            .find(|n| n.attribute("type") == Some("main"))
            .or_else(|| find(root, "titleStmt").and_then(|t| find(t, "title")))
            .map(text_content)
            .and_then(non_empty);

        let authors = find(root, "analytic")
            .map(authors_of)
            .unwrap_or_default();

        let venue = find(root, "monogr")
            .and_then(|m| find(m, "title"))
            .map(text_content)
            .and_then(non_empty);

        let date = root
            .descendants()
            .filter(|n| n.is_element() && n.tag_name().name() == "date")
            .find(|n| {
                n.ancestors().any(|a| {
                    a.is_element()
                        && matches!(a.tag_name().name(), "publicationStmt" | "imprint")
                })
            })
            .and_then(date_value);

        Ok(Header {
            title,
            authors,
            venue,
            date,
        })
    }

    pub(crate) fn parse_references(xml: &str) -> Result<Vec<Reference>, roxmltree::Error> {
        let doc = Document::parse(xml)?;
        let root = doc.root_element();

        let mut out = Vec::new();
        for bib in find_all(root, "biblStruct") {
            let analytic = find(bib, "analytic");

            let title = analytic
                .and_then(|a| find(a, "title"))
                .or_else(|| find(bib, "title"))
                .map(text_content)
                .and_then(non_empty);

            let authors = analytic.map(authors_of).unwrap_or_default();

            let source = find(bib, "monogr")
                .and_then(|m| find(m, "title"))
                .map(text_content)
                .and_then(non_empty);

            let mut volume = None;
            let mut issue = None;
            let mut pages = None;
            for scope in find_all(bib, "biblScope") {
                match scope.attribute("unit") {
                    Some("volume") => volume = non_empty(text_content(scope)),
                    Some("issue") => issue = non_empty(text_content(scope)),
                    Some("page") => {
                        pages = match (scope.attribute("from"), scope.attribute("to")) {
                            (Some(from), Some(to)) => Some(format!("{from}-{to}")),
                            _ => non_empty(text_content(scope)),
                        }
                    }
                    _ => {}
                }
            }

            let year = find(bib, "date")
                .and_then(date_value)
                .map(|d| d.get(..4).unwrap_or(&d).to_owned());

            let raw = find_all(bib, "note")
                .find(|n| n.attribute("type") == Some("raw_reference"))
                .map(text_content)
                .and_then(non_empty);

            out.push(Reference {
                raw,
                title,
                authors,
                source,
                volume,
                issue,
                pages,
                year,
            });
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER_TEI: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<TEI xmlns="http://www.tei-c.org/ns/1.0">
  <teiHeader>
    <fileDesc>
      <titleStmt>
        <title level="a" type="main">6H-SiC JFETs for High-Temperature Sensing</title>
      </titleStmt>
      <publicationStmt>
        <publisher>IEEE</publisher>
        <date type="published" when="2019-04-15">15 April 2019</date>
      </publicationStmt>
      <sourceDesc>
        <biblStruct>
          <analytic>
            <author><persName><forename type="first">Maria</forename><surname>Svensson</surname></persName></author>
            <author><persName><forename type="first">Jan</forename><forename type="middle">K.</forename><surname>Olsen</surname></persName></author>
          </analytic>
          <monogr>
            <title level="j">IEEE Sensors Journal</title>
            <imprint><biblScope unit="volume">19</biblScope></imprint>
          </monogr>
        </biblStruct>
      </sourceDesc>
    </fileDesc>
  </teiHeader>
</TEI>"#;

    const REFS_TEI: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<TEI xmlns="http://www.tei-c.org/ns/1.0">
  <text><back><div>
    <listBibl>
      <biblStruct>
        <analytic>
          <title level="a" type="main">Noise in SiC devices</title>
          <author><persName><forename>A.</forename><surname>Author</surname></persName></author>
        </analytic>
        <monogr>
          <title level="j">J. Appl. Phys.</title>
          <imprint>
            <biblScope unit="volume">88</biblScope>
            <biblScope unit="issue">4</biblScope>
            <biblScope unit="page" from="2213" to="2220"/>
            <date type="published" when="2000"/>
          </imprint>
        </monogr>
        <note type="raw_reference">A. Author, "Noise in SiC devices," J. Appl. Phys., vol. 88, 2000.</note>
      </biblStruct>
      <biblStruct>
        <monogr><title>Some Book</title><imprint><date when="1998-06"/></imprint></monogr>
      </biblStruct>
    </listBibl>
  </div></back></text>
</TEI>"#;

    #[test]
    fn header_tei_parses() {
        let h = tei::parse_header(HEADER_TEI).unwrap();
        assert_eq!(
            h.title.as_deref(),
            Some("6H-SiC JFETs for High-Temperature Sensing")
        );
        assert_eq!(h.authors, vec!["Maria Svensson", "Jan K. Olsen"]);
        assert_eq!(h.venue.as_deref(), Some("IEEE Sensors Journal"));
        assert_eq!(h.date.as_deref(), Some("2019-04-15"));
    }

    #[test]
    fn references_tei_parses() {
        let refs = tei::parse_references(REFS_TEI).unwrap();
        assert_eq!(refs.len(), 2);

        let first = &refs[0];
        assert_eq!(first.title.as_deref(), Some("Noise in SiC devices"));
        assert_eq!(first.authors, vec!["A. Author"]);
        assert_eq!(first.source.as_deref(), Some("J. Appl. Phys."));
        assert_eq!(first.volume.as_deref(), Some("88"));
        assert_eq!(first.issue.as_deref(), Some("4"));
        assert_eq!(first.pages.as_deref(), Some("2213-2220"));
        assert_eq!(first.year.as_deref(), Some("2000"));
        assert!(first.raw.as_deref().unwrap().starts_with("A. Author"));

        let second = &refs[1];
        assert!(second.title.is_none() || second.title.as_deref() == Some("Some Book"));
        assert_eq!(second.source.as_deref(), Some("Some Book"));
        assert_eq!(second.year.as_deref(), Some("1998"));
    }

    #[test]
    fn malformed_tei_is_an_error() {
        assert!(tei::parse_header("<TEI>").is_err());
        assert!(tei::parse_references("not xml at all").is_err());
    }

    #[test]
    fn empty_header_still_parses() {
        let h = tei::parse_header(r#"<TEI xmlns="http://www.tei-c.org/ns/1.0"/>"#).unwrap();
        assert!(h.is_empty());
    }

    #[tokio::test]
    async fn unreachable_service_degrades_to_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let pdf = dir.path().join("doc.pdf");
        std::fs::write(&pdf, b"%PDF-1.7\n").unwrap();

        // Nothing listens on port 1; connection is refused immediately.
        let enricher = GrobidEnricher::new("http://127.0.0.1:1", 2, 0, 1).unwrap();
        let result = enricher.enrich(&pdf).await;
        assert_eq!(result, Enrichment::Unavailable);
    }

    #[tokio::test]
    async fn unreadable_pdf_degrades_to_unavailable() {
        let enricher = GrobidEnricher::new("http://127.0.0.1:1/", 2, 0, 1).unwrap();
        let result = enricher.enrich(Path::new("/no/such/file.pdf")).await;
        assert_eq!(result, Enrichment::Unavailable);
    }
}
