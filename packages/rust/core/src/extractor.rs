//! Link Extractor: builds the run-scoped `url -> occurrences` index.

use std::collections::HashMap;

use tracing::{debug, warn};

use roadmend_shared::{LinkOccurrence, RoadmapDocument, RoadmapRow};

/// Unique URLs and every place each one appears, for one run.
///
/// URLs are kept in first-seen order; occurrences of one URL follow document
/// then stage then step order.
#[derive(Debug, Default)]
pub struct LinkIndex {
    urls: Vec<String>,
    occurrences: HashMap<String, Vec<LinkOccurrence>>,
    /// Documents whose JSON could not be parsed.
    pub documents_skipped: usize,
}

impl LinkIndex {
    fn push(&mut self, occurrence: LinkOccurrence) {
        match self.occurrences.get_mut(&occurrence.url) {
            Some(list) => list.push(occurrence),
            None => {
                self.urls.push(occurrence.url.clone());
                self.occurrences.insert(occurrence.url.clone(), vec![occurrence]);
            }
        }
    }

    /// Unique URLs.
    pub fn urls(&self) -> &[String] {
        &self.urls
    }

    pub fn occurrences(&self, url: &str) -> &[LinkOccurrence] {
        self.occurrences.get(url).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn unique_count(&self) -> usize {
        self.urls.len()
    }

    pub fn occurrence_count(&self) -> usize {
        self.occurrences.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }
}

/// Walk every roadmap and index its external study links.
///
/// A document that fails to parse is logged and skipped; it never aborts the
/// walk.
pub fn extract_links(rows: &[RoadmapRow]) -> LinkIndex {
    let mut index = LinkIndex::default();

    for row in rows {
        let document = match RoadmapDocument::parse(&row.roadmap_json) {
            Ok(doc) => doc,
            Err(e) => {
                warn!(roadmap_id = %row.id, domain = %row.domain, error = %e, "skipping unparseable roadmap");
                index.documents_skipped += 1;
                continue;
            }
        };

        for (stage_index, step_index, step, url) in document.study_links() {
            index.push(LinkOccurrence {
                roadmap_id: row.id.clone(),
                domain: row.domain.clone(),
                stage_index,
                step_index,
                title: step.title_or_placeholder().to_string(),
                description: step.description_or_placeholder().to_string(),
                url: url.to_string(),
            });
        }
    }

    debug!(
        unique = index.unique_count(),
        occurrences = index.occurrence_count(),
        skipped = index.documents_skipped,
        "links extracted"
    );
    index
}
