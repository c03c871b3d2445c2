use tracing::{debug, info, warn};

use crate::{
    model::{CandidateRecord, ContentMetadata, EnrichmentInfo, SearchField},
    repo::nodes::NodeFetch,
    util::url_norm::normalize_url,
};

/// Supplement sparse source metadata from a high-confidence candidate.
///
/// Triggered when the source lacks a title, or lacks both description and
/// keywords. The enrichment source is the first url-field candidate whose
/// normalized URL equals the source's normalized URL or redirect URL, or
/// failing that the first title-field candidate with an exact
/// (case-insensitive, trimmed) title match. Only missing fields are copied;
/// present fields are never overwritten. Any failure is a no-op.
pub async fn enrich_metadata(
    metadata: &ContentMetadata,
    candidates: &[(SearchField, Vec<CandidateRecord>)],
    fetcher: &dyn NodeFetch,
) -> (ContentMetadata, EnrichmentInfo) {
    let info = EnrichmentInfo::default();

    let has_title = metadata.has_usable_title();
    let has_description = metadata.has_usable_description();
    let has_keywords = metadata.has_usable_keywords();

    if has_title && (has_description || has_keywords) {
        debug!("metadata already complete, skipping enrichment");
        return (metadata.clone(), info);
    }

    let source = match find_enrichment_source(metadata, candidates, has_title) {
        Some(source) => source,
        None => {
            debug!("no suitable candidate found for metadata enrichment");
            return (metadata.clone(), info);
        }
    };
    let (source_node_id, source_field) = source;

    let fetched = match fetcher.fetch_metadata(&source_node_id).await {
        Ok(Some(fetched)) => fetched,
        Ok(None) => {
            warn!(node_id = %source_node_id, "enrichment source vanished");
            return (metadata.clone(), info);
        }
        Err(err) => {
            warn!(error = %err, node_id = %source_node_id, "enrichment fetch failed");
            return (metadata.clone(), info);
        }
    };

    let mut enriched = metadata.clone();
    let mut fields_added = Vec::new();

    if !has_title && fetched.title.is_some() {
        enriched.title = fetched.title;
        fields_added.push("title".to_string());
    }
    if !has_description && fetched.description.is_some() {
        enriched.description = fetched.description;
        fields_added.push("description".to_string());
    }
    if !has_keywords && fetched.keywords.is_some() {
        enriched.keywords = fetched.keywords;
        fields_added.push("keywords".to_string());
    }
    if metadata.url.is_none() && fetched.url.is_some() {
        enriched.url = fetched.url;
        fields_added.push("url".to_string());
    }

    if fields_added.is_empty() {
        return (metadata.clone(), info);
    }

    info!(
        node_id = %source_node_id,
        field = source_field.as_str(),
        added = ?fields_added,
        "enriched metadata from candidate"
    );

    let info = EnrichmentInfo {
        enriched: true,
        enrichment_source_node_id: Some(source_node_id),
        enrichment_source_field: Some(source_field.as_str().to_string()),
        fields_added,
    };
    (enriched, info)
}

/// URL-exact match first, exact title match second.
fn find_enrichment_source(
    metadata: &ContentMetadata,
    candidates: &[(SearchField, Vec<CandidateRecord>)],
    has_title: bool,
) -> Option<(String, SearchField)> {
    let source_norm_url = metadata.normalized_url();
    let source_norm_redirect = metadata.normalized_redirect_url();

    for (field, records) in candidates {
        if *field != SearchField::Url {
            continue;
        }
        for record in records {
            let candidate_norm = record.url.as_deref().and_then(normalize_url);
            let Some(candidate_norm) = candidate_norm else {
                continue;
            };
            let matches = source_norm_url.as_deref() == Some(candidate_norm.as_str())
                || source_norm_redirect.as_deref() == Some(candidate_norm.as_str());
            if matches {
                return Some((record.id.clone(), SearchField::Url));
            }
        }
    }

    if !has_title {
        return None;
    }
    let source_title = metadata.title.as_deref()?.trim().to_lowercase();

    for (field, records) in candidates {
        if *field != SearchField::Title {
            continue;
        }
        for record in records {
            if let Some(title) = record.title.as_deref() {
                if title.trim().to_lowercase() == source_title {
                    return Some((record.id.clone(), SearchField::Title));
                }
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;

    use super::*;

    struct MockFetch {
        metadata: Option<ContentMetadata>,
        fail: bool,
    }

    #[async_trait]
    impl NodeFetch for MockFetch {
        async fn fetch_metadata(&self, _node_id: &str) -> Result<Option<ContentMetadata>> {
            if self.fail {
                return Err(anyhow!("fetch failed"));
            }
            Ok(self.metadata.clone())
        }
    }

    fn url_candidate(id: &str, url: &str) -> CandidateRecord {
        CandidateRecord {
            id: id.to_string(),
            title: Some("Photosynthese".to_string()),
            description: None,
            keywords: None,
            url: Some(url.to_string()),
        }
    }

    fn full_metadata() -> ContentMetadata {
        ContentMetadata {
            title: Some("Photosynthese".to_string()),
            description: Some("Wie Pflanzen Licht nutzen".to_string()),
            keywords: Some(vec!["Biologie".to_string()]),
            url: Some("https://example.org/photo".to_string()),
            redirect_url: None,
        }
    }

    #[tokio::test]
    async fn title_only_source_is_enriched_from_url_match() {
        let sparse = ContentMetadata {
            title: Some("Photosynthese".to_string()),
            url: Some("http://www.example.org/photo/".to_string()),
            ..Default::default()
        };
        let candidates = vec![(
            SearchField::Url,
            vec![url_candidate("node-1", "https://example.org/photo")],
        )];
        let fetcher = MockFetch {
            metadata: Some(full_metadata()),
            fail: false,
        };

        let (enriched, info) = enrich_metadata(&sparse, &candidates, &fetcher).await;

        assert!(info.enriched);
        assert_eq!(info.enrichment_source_node_id.as_deref(), Some("node-1"));
        assert_eq!(info.enrichment_source_field.as_deref(), Some("url"));
        assert_eq!(info.fields_added, vec!["description", "keywords"]);
        // Present fields stay untouched.
        assert_eq!(enriched.title.as_deref(), Some("Photosynthese"));
        assert_eq!(enriched.url.as_deref(), Some("http://www.example.org/photo/"));
        assert_eq!(
            enriched.description.as_deref(),
            Some("Wie Pflanzen Licht nutzen")
        );
        assert_eq!(enriched.keywords, Some(vec!["Biologie".to_string()]));
    }

    #[tokio::test]
    async fn falls_back_to_exact_title_match() {
        let sparse = ContentMetadata {
            title: Some("  photosynthese ".to_string()),
            ..Default::default()
        };
        let candidates = vec![(
            SearchField::Title,
            vec![CandidateRecord {
                id: "node-2".to_string(),
                title: Some("Photosynthese".to_string()),
                description: None,
                keywords: None,
                url: None,
            }],
        )];
        let fetcher = MockFetch {
            metadata: Some(full_metadata()),
            fail: false,
        };

        let (_, info) = enrich_metadata(&sparse, &candidates, &fetcher).await;
        assert!(info.enriched);
        assert_eq!(info.enrichment_source_field.as_deref(), Some("title"));
    }

    #[tokio::test]
    async fn complete_metadata_is_not_enriched() {
        let candidates = vec![(
            SearchField::Url,
            vec![url_candidate("node-1", "https://example.org/photo")],
        )];
        let fetcher = MockFetch {
            metadata: Some(full_metadata()),
            fail: false,
        };

        let (metadata, info) = enrich_metadata(&full_metadata(), &candidates, &fetcher).await;
        assert!(!info.enriched);
        assert_eq!(metadata.title.as_deref(), Some("Photosynthese"));
    }

    #[tokio::test]
    async fn fetch_failure_is_a_no_op() {
        let sparse = ContentMetadata {
            url: Some("https://example.org/photo".to_string()),
            ..Default::default()
        };
        let candidates = vec![(
            SearchField::Url,
            vec![url_candidate("node-1", "https://example.org/photo")],
        )];
        let fetcher = MockFetch {
            metadata: None,
            fail: true,
        };

        let (metadata, info) = enrich_metadata(&sparse, &candidates, &fetcher).await;
        assert!(!info.enriched);
        assert_eq!(metadata.url.as_deref(), Some("https://example.org/photo"));
    }
}
