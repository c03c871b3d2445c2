use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{info, warn};

use crate::{
    app::AppState,
    model::{
        usable_keywords, CandidateRecord, ContentMetadata, DetectByMetadataRequest,
        DetectByNodeRequest, DetectionOptions, DetectionResponse, DuplicateCandidate, SearchField,
    },
    repo::nodes::{extract_content_metadata, NodeQuery, RepositoryClient},
    service::{
        enrich,
        search::{self, SearchOutcome},
    },
    util::{
        embedding::EmbeddingManager,
        minhash::{self, MinHashEngine},
        redirect,
        url_norm::normalize_url,
    },
};

pub type Representation = Vec<f64>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionMethod {
    Hash,
    Embedding,
}

impl DetectionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectionMethod::Hash => "hash",
            DetectionMethod::Embedding => "embedding",
        }
    }
}

/// Common contract of the two similarity strategies. Representations are
/// computed in one batch per request; blank texts come back as `None` and
/// score 0.0 against everything.
#[async_trait]
pub trait SimilarityBackend: Send + Sync {
    /// Order-preserving batch computation; `None` for blank texts.
    async fn batch_representations(&self, texts: &[String]) -> Result<Vec<Option<Representation>>>;

    async fn representation(&self, text: &str) -> Result<Option<Representation>> {
        Ok(self
            .batch_representations(&[text.to_string()])
            .await?
            .pop()
            .flatten())
    }

    fn similarity(&self, a: &Representation, b: &Representation) -> f64 {
        minhash::cosine(a, b)
    }
}

/// MinHash signatures over shingled text; always available.
pub struct FingerprintBackend {
    engine: Arc<MinHashEngine>,
}

impl FingerprintBackend {
    pub fn new(engine: Arc<MinHashEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl SimilarityBackend for FingerprintBackend {
    async fn batch_representations(&self, texts: &[String]) -> Result<Vec<Option<Representation>>> {
        Ok(texts
            .iter()
            .map(|text| self.engine.text_signature(text))
            .collect())
    }
}

/// Externally computed embeddings; unavailability surfaces as an error, it
/// is never silently downgraded to the fingerprint backend.
pub struct EmbeddingBackend {
    manager: Arc<EmbeddingManager>,
}

impl EmbeddingBackend {
    pub fn new(manager: Arc<EmbeddingManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl SimilarityBackend for EmbeddingBackend {
    async fn batch_representations(&self, texts: &[String]) -> Result<Vec<Option<Representation>>> {
        let mut valid = Vec::new();
        let mut valid_indices = Vec::new();
        for (idx, text) in texts.iter().enumerate() {
            if !text.trim().is_empty() {
                valid.push(text.clone());
                valid_indices.push(idx);
            }
        }

        let mut result: Vec<Option<Representation>> = vec![None; texts.len()];
        if valid.is_empty() {
            return Ok(result);
        }

        let client = self.manager.get().await?;
        let vectors = client.embed_batch(&valid).await?;
        for (idx, vector) in valid_indices.into_iter().zip(vectors) {
            result[idx] = Some(vector);
        }
        Ok(result)
    }
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

/// Score candidates against the source and keep the ones above the
/// threshold, plus every URL-exact match regardless of threshold.
///
/// Keywords contribute to the comparison text only when the keywords field
/// was actually searched; title and description contribute whenever the
/// source has them. Per-field maximum similarity is recorded for every field
/// that produced at least one candidate, threshold or not.
pub async fn find_duplicates(
    source: &ContentMetadata,
    candidates: &[(SearchField, Vec<CandidateRecord>)],
    backend: &dyn SimilarityBackend,
    threshold: f64,
) -> Result<(Vec<DuplicateCandidate>, HashMap<String, f64>)> {
    let searched: HashSet<SearchField> = candidates.iter().map(|(field, _)| *field).collect();

    let has_title = source.has_usable_title();
    let has_description = source.has_usable_description();
    let has_keywords = source.has_usable_keywords() && searched.contains(&SearchField::Keywords);

    let mut source_parts: Vec<&str> = Vec::new();
    if has_title {
        source_parts.push(source.title.as_deref().unwrap_or_default());
    }
    if has_description {
        source_parts.push(source.description.as_deref().unwrap_or_default());
    }
    if has_keywords {
        if let Some(keywords) = source.keywords.as_deref() {
            source_parts.extend(usable_keywords(keywords).into_iter().map(String::as_str));
        }
    }
    let source_text = source_parts.join(" ");

    let source_repr = match backend.representation(&source_text).await? {
        Some(repr) => repr,
        None => {
            warn!("could not compute representation for source metadata");
            return Ok((Vec::new(), HashMap::new()));
        }
    };

    let candidate_text = |record: &CandidateRecord| -> String {
        let mut parts: Vec<&str> = Vec::new();
        if has_title {
            if let Some(title) = record.title.as_deref().filter(|t| !t.is_empty()) {
                parts.push(title);
            }
        }
        if has_description {
            if let Some(description) = record.description.as_deref().filter(|d| !d.is_empty()) {
                parts.push(description);
            }
        }
        if has_keywords {
            if let Some(keywords) = record.keywords.as_deref() {
                parts.extend(keywords.iter().map(String::as_str));
            }
        }
        parts.join(" ")
    };

    // One representation per distinct comparison text: candidates with the
    // same extracted text share one computation and one score.
    let texts_per_field: Vec<Vec<String>> = candidates
        .iter()
        .map(|(_, records)| records.iter().map(candidate_text).collect())
        .collect();

    let mut text_to_idx: HashMap<&str, usize> = HashMap::new();
    let mut unique_texts: Vec<String> = Vec::new();
    for texts in &texts_per_field {
        for text in texts {
            if !text_to_idx.contains_key(text.as_str()) {
                text_to_idx.insert(text.as_str(), unique_texts.len());
                unique_texts.push(text.clone());
            }
        }
    }

    let representations = if unique_texts.is_empty() {
        Vec::new()
    } else {
        backend.batch_representations(&unique_texts).await?
    };

    let source_norm_url = source.normalized_url();
    let source_norm_redirect = source.normalized_redirect_url();

    let mut seen_ids: HashSet<String> = HashSet::new();
    let mut duplicates: Vec<DuplicateCandidate> = Vec::new();
    let mut field_max: HashMap<String, f64> = HashMap::new();

    for ((field, records), texts) in candidates.iter().zip(&texts_per_field) {
        let mut max_for_field = 0.0f64;

        for (record, text) in records.iter().zip(texts) {
            let candidate_norm = record.url.as_deref().and_then(normalize_url);
            let url_match = candidate_norm.as_deref().is_some_and(|norm| {
                source_norm_url.as_deref() == Some(norm)
                    || source_norm_redirect.as_deref() == Some(norm)
            });

            let (similarity, match_source) = if url_match {
                // URL identity is ground truth; skip the backend entirely.
                (1.0, "url_exact".to_string())
            } else {
                let Some(&idx) = text_to_idx.get(text.as_str()) else {
                    continue;
                };
                let Some(repr) = representations[idx].as_ref() else {
                    continue;
                };
                (
                    backend.similarity(&source_repr, repr),
                    field.as_str().to_string(),
                )
            };

            if similarity > max_for_field {
                max_for_field = similarity;
            }

            if seen_ids.contains(&record.id) {
                continue;
            }
            seen_ids.insert(record.id.clone());

            if url_match || similarity >= threshold {
                duplicates.push(DuplicateCandidate {
                    node_id: record.id.clone(),
                    title: record.title.clone(),
                    description: record.description.clone(),
                    keywords: record.keywords.clone(),
                    url: record.url.clone(),
                    similarity_score: round4(similarity),
                    match_source,
                });
            }
        }

        if !records.is_empty() {
            field_max.insert(field.as_str().to_string(), round4(max_for_field));
        }
    }

    duplicates.sort_by(|a, b| {
        b.similarity_score
            .partial_cmp(&a.similarity_score)
            .unwrap_or(Ordering::Equal)
    });

    let url_matches = duplicates
        .iter()
        .filter(|d| d.match_source == "url_exact")
        .count();
    info!(
        total = duplicates.len(),
        url_exact = url_matches,
        threshold,
        "duplicate matching finished"
    );

    Ok((duplicates, field_max))
}

/// Duplicate detection for an existing repository node.
pub async fn by_node(
    state: &AppState,
    body: DetectByNodeRequest,
    method: DetectionMethod,
) -> DetectionResponse {
    let threshold = resolve_threshold(state, &body.options, method);
    let client = Arc::new(RepositoryClient::new(
        state.http.clone(),
        &state.config.repository,
        body.options.environment,
    ));

    let node = match client.fetch_node(&body.node_id).await {
        Ok(Some(node)) => node,
        Ok(None) => {
            let mut response = DetectionResponse::failure(
                method.as_str(),
                threshold,
                format!(
                    "Node {} not found in {} environment",
                    body.node_id,
                    body.options.environment.as_str()
                ),
            );
            response.source_node_id = Some(body.node_id);
            return response;
        }
        Err(err) => {
            warn!(error = %err, node_id = %body.node_id, "node fetch failed");
            let mut response = DetectionResponse::failure(
                method.as_str(),
                threshold,
                format!("Failed to fetch node {}: {err}", body.node_id),
            );
            response.source_node_id = Some(body.node_id);
            return response;
        }
    };

    let metadata = extract_content_metadata(&node);
    if !metadata.has_content() {
        let mut response = DetectionResponse::failure(
            method.as_str(),
            threshold,
            format!(
                "Node {} has no searchable content (no title, description, keywords, or URL)",
                body.node_id
            ),
        );
        response.source_node_id = Some(body.node_id);
        return response;
    }

    let metadata = resolve_source_redirect(state, metadata).await;
    run_pipeline(
        state,
        client,
        metadata,
        &body.options,
        method,
        threshold,
        Some(body.node_id),
    )
    .await
}

/// Duplicate detection for user-supplied metadata (content not yet in the
/// repository).
pub async fn by_metadata(
    state: &AppState,
    body: DetectByMetadataRequest,
    method: DetectionMethod,
) -> DetectionResponse {
    let threshold = resolve_threshold(state, &body.options, method);

    if !body.metadata.has_content() {
        let mut response = DetectionResponse::failure(
            method.as_str(),
            threshold,
            "No searchable content provided (need at least title, description, keywords, or URL)"
                .to_string(),
        );
        response.source_metadata = Some(body.metadata);
        return response;
    }

    let client = Arc::new(RepositoryClient::new(
        state.http.clone(),
        &state.config.repository,
        body.options.environment,
    ));

    let metadata = resolve_source_redirect(state, body.metadata).await;
    run_pipeline(state, client, metadata, &body.options, method, threshold, None).await
}

fn resolve_threshold(
    state: &AppState,
    options: &DetectionOptions,
    method: DetectionMethod,
) -> f64 {
    options.similarity_threshold.unwrap_or(match method {
        DetectionMethod::Hash => state.config.detection.hash_threshold,
        DetectionMethod::Embedding => state.config.detection.embedding_threshold,
    })
}

/// Resolve the source URL's redirect unless a redirect is already known.
async fn resolve_source_redirect(state: &AppState, metadata: ContentMetadata) -> ContentMetadata {
    if metadata.redirect_url.is_some() {
        return metadata;
    }
    let Some(url) = metadata.url.clone() else {
        return metadata;
    };

    let timeout = Duration::from_secs(state.config.detection.redirect_timeout_secs.max(1));
    let (final_url, was_redirected) = redirect::resolve_redirect(&state.http, &url, timeout).await;

    match final_url {
        Some(final_url) if was_redirected => ContentMetadata {
            redirect_url: Some(final_url),
            ..metadata
        },
        _ => metadata,
    }
}

async fn run_pipeline(
    state: &AppState,
    client: Arc<RepositoryClient>,
    metadata: ContentMetadata,
    options: &DetectionOptions,
    method: DetectionMethod,
    threshold: f64,
    source_node_id: Option<String>,
) -> DetectionResponse {
    let exclude = source_node_id.as_deref();
    let concurrency = state.config.detection.search_concurrency;

    let mut outcome = search::search_candidates(
        Arc::clone(&client) as Arc<dyn NodeQuery>,
        &metadata,
        &options.search_fields,
        options.max_candidates,
        concurrency,
        exclude,
    )
    .await;

    let mut metadata = metadata;
    let mut enrichment_info = None;

    if options.enrich_from_candidates {
        let (enriched, info) =
            enrich::enrich_metadata(&metadata, &outcome.candidates, client.as_ref()).await;

        if info.enriched {
            metadata = enriched;
            info!(added = ?info.fields_added, "re-searching with enriched metadata");
            // The re-search covers all fields unconditionally; parts of the
            // first pass are repeated.
            let second = search::search_candidates(
                Arc::clone(&client) as Arc<dyn NodeQuery>,
                &metadata,
                &SearchField::all(),
                options.max_candidates,
                concurrency,
                exclude,
            )
            .await;
            merge_outcomes(&mut outcome, second);
        }
        enrichment_info = Some(info);
    }

    let total_candidates = outcome.total_candidates();

    let backend: Box<dyn SimilarityBackend> = match method {
        DetectionMethod::Hash => Box::new(FingerprintBackend::new(Arc::clone(&state.minhash))),
        DetectionMethod::Embedding => {
            Box::new(EmbeddingBackend::new(Arc::clone(&state.embeddings)))
        }
    };

    match find_duplicates(&metadata, &outcome.candidates, backend.as_ref(), threshold).await {
        Ok((duplicates, field_max)) => {
            for stats in &mut outcome.stats {
                stats.highest_similarity = field_max.get(&stats.field).copied();
            }

            DetectionResponse {
                success: true,
                source_node_id,
                source_metadata: Some(metadata),
                method: method.as_str(),
                threshold,
                enrichment: enrichment_info,
                candidate_search_results: outcome.stats,
                total_candidates_checked: total_candidates,
                duplicates,
                error: None,
            }
        }
        Err(err) => {
            let mut response =
                DetectionResponse::failure(method.as_str(), threshold, err.to_string());
            response.source_node_id = source_node_id;
            response.source_metadata = Some(metadata);
            response
        }
    }
}

/// Fold a re-search into the first pass: per field, append candidates whose
/// id has not been seen in any field yet; add stats entries only for fields
/// the first pass did not cover.
fn merge_outcomes(existing: &mut SearchOutcome, second: SearchOutcome) {
    let mut seen: HashSet<String> = existing
        .candidates
        .iter()
        .flat_map(|(_, records)| records.iter().map(|r| r.id.clone()))
        .collect();

    for (field, records) in second.candidates {
        let fresh: Vec<CandidateRecord> = records
            .into_iter()
            .filter(|record| seen.insert(record.id.clone()))
            .collect();

        match existing
            .candidates
            .iter_mut()
            .find(|(existing_field, _)| *existing_field == field)
        {
            Some((_, list)) => list.extend(fresh),
            None => existing.candidates.push((field, fresh)),
        }
    }

    for stats in second.stats {
        if !existing.stats.iter().any(|s| s.field == stats.field) {
            existing.stats.push(stats);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    fn fingerprint_backend() -> FingerprintBackend {
        FingerprintBackend::new(Arc::new(MinHashEngine::new(minhash::DEFAULT_NUM_HASHES)))
    }

    fn candidate(id: &str, title: &str, url: Option<&str>) -> CandidateRecord {
        CandidateRecord {
            id: id.to_string(),
            title: Some(title.to_string()),
            description: None,
            keywords: None,
            url: url.map(str::to_string),
        }
    }

    /// Records the size of every batch handed to the inner backend.
    struct CountingBackend {
        inner: FingerprintBackend,
        batch_sizes: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl SimilarityBackend for CountingBackend {
        async fn batch_representations(
            &self,
            texts: &[String],
        ) -> Result<Vec<Option<Representation>>> {
            self.batch_sizes.lock().unwrap().push(texts.len());
            self.inner.batch_representations(texts).await
        }
    }

    #[tokio::test]
    async fn url_exact_match_overrides_any_threshold() {
        let source = ContentMetadata {
            title: Some("Photosynthesis".to_string()),
            url: Some("https://example.org/bio/photo/".to_string()),
            ..Default::default()
        };
        let candidates = vec![(
            SearchField::Url,
            vec![candidate(
                "node-1",
                "Completely unrelated title about medieval castles",
                Some("http://www.example.org/bio/photo"),
            )],
        )];

        let backend = fingerprint_backend();
        let (duplicates, field_max) =
            find_duplicates(&source, &candidates, &backend, 1.0).await.unwrap();

        assert_eq!(duplicates.len(), 1);
        assert_eq!(duplicates[0].node_id, "node-1");
        assert_eq!(duplicates[0].similarity_score, 1.0);
        assert_eq!(duplicates[0].match_source, "url_exact");
        assert_eq!(field_max.get("url"), Some(&1.0));
    }

    #[tokio::test]
    async fn redirect_url_also_counts_as_exact_match() {
        let source = ContentMetadata {
            title: Some("Photosynthesis".to_string()),
            url: Some("https://short.link/abc".to_string()),
            redirect_url: Some("https://example.org/bio/photo".to_string()),
            ..Default::default()
        };
        let candidates = vec![(
            SearchField::Url,
            vec![candidate(
                "node-1",
                "Unrelated",
                Some("http://www.example.org/bio/photo/"),
            )],
        )];

        let backend = fingerprint_backend();
        let (duplicates, _) =
            find_duplicates(&source, &candidates, &backend, 1.0).await.unwrap();
        assert_eq!(duplicates.len(), 1);
        assert_eq!(duplicates[0].match_source, "url_exact");
    }

    #[tokio::test]
    async fn below_threshold_candidates_are_dropped_but_tracked() {
        let source = ContentMetadata {
            title: Some("Photosynthesis in green plants explained step by step".to_string()),
            ..Default::default()
        };
        let candidates = vec![(
            SearchField::Title,
            vec![candidate(
                "node-1",
                "A completely different text about roman history and emperors",
                None,
            )],
        )];

        let backend = fingerprint_backend();
        let (duplicates, field_max) =
            find_duplicates(&source, &candidates, &backend, 0.9).await.unwrap();

        assert!(duplicates.is_empty());
        // Diagnostic max similarity is recorded regardless of the threshold.
        assert!(field_max.contains_key("title"));
    }

    #[tokio::test]
    async fn identical_texts_share_one_representation_and_score() {
        let source = ContentMetadata {
            title: Some("Photosynthesis in green plants explained".to_string()),
            ..Default::default()
        };
        let shared_title = "Photosynthesis in green plants explained";
        let candidates = vec![
            (SearchField::Title, vec![candidate("a", shared_title, None)]),
            (
                SearchField::Description,
                vec![candidate("b", shared_title, None)],
            ),
        ];

        let backend = CountingBackend {
            inner: fingerprint_backend(),
            batch_sizes: Mutex::new(Vec::new()),
        };
        let (duplicates, _) =
            find_duplicates(&source, &candidates, &backend, 0.5).await.unwrap();

        assert_eq!(duplicates.len(), 2);
        assert_eq!(
            duplicates[0].similarity_score,
            duplicates[1].similarity_score
        );
        // One call for the source text, one batch with a single deduplicated
        // candidate text.
        assert_eq!(*backend.batch_sizes.lock().unwrap(), vec![1, 1]);
    }

    #[tokio::test]
    async fn keywords_only_contribute_when_searched() {
        let source = ContentMetadata {
            title: Some("Photosynthesis in green plants explained".to_string()),
            keywords: Some(vec![
                "entirely".to_string(),
                "different".to_string(),
                "keyword".to_string(),
                "vocabulary".to_string(),
            ]),
            ..Default::default()
        };
        let matching = candidate("a", "Photosynthesis in green plants explained", None);

        let without_keywords = vec![(SearchField::Title, vec![matching.clone()])];
        let with_keywords = vec![
            (SearchField::Title, vec![matching]),
            (SearchField::Keywords, Vec::new()),
        ];

        let backend = fingerprint_backend();
        let (hits_without, _) =
            find_duplicates(&source, &without_keywords, &backend, 0.0).await.unwrap();
        let (hits_with, _) =
            find_duplicates(&source, &with_keywords, &backend, 0.0).await.unwrap();

        // Keywords not searched: candidate text equals source text exactly.
        assert_eq!(hits_without.len(), 1);
        assert_eq!(hits_without[0].similarity_score, 1.0);
        // Keywords searched: the source text now carries keyword tokens the
        // candidate lacks, so the score must drop.
        assert_eq!(hits_with.len(), 1);
        assert!(hits_with[0].similarity_score < hits_without[0].similarity_score);
    }

    #[tokio::test]
    async fn output_is_sorted_descending_and_idempotent() {
        let source = ContentMetadata {
            title: Some("The water cycle for schools explained with experiments".to_string()),
            ..Default::default()
        };
        let candidates = vec![(
            SearchField::Title,
            vec![
                candidate(
                    "far",
                    "The water cycle explained with many classroom experiments for schools",
                    None,
                ),
                candidate(
                    "near",
                    "The water cycle for schools explained with experiments",
                    None,
                ),
            ],
        )];

        let backend = fingerprint_backend();
        let (first, first_max) =
            find_duplicates(&source, &candidates, &backend, 0.0).await.unwrap();
        let (second, second_max) =
            find_duplicates(&source, &candidates, &backend, 0.0).await.unwrap();

        assert!(first
            .windows(2)
            .all(|pair| pair[0].similarity_score >= pair[1].similarity_score));
        assert_eq!(first.first().map(|d| d.node_id.as_str()), Some("near"));

        let scores = |list: &[DuplicateCandidate]| -> Vec<(String, f64)> {
            list.iter()
                .map(|d| (d.node_id.clone(), d.similarity_score))
                .collect()
        };
        assert_eq!(scores(&first), scores(&second));
        assert_eq!(first_max, second_max);
    }

    #[tokio::test]
    async fn embedding_backend_skips_blank_texts_without_provider_access() {
        // No provider configured: any real embed call would error, so this
        // only passes because blanks never reach the provider.
        let manager = Arc::new(EmbeddingManager::new(crate::config::EmbeddingConfig {
            base_url: String::new(),
            model: "all-minilm".to_string(),
            timeout_secs: 5,
        }));
        let backend = EmbeddingBackend::new(manager);

        let result = backend
            .batch_representations(&["".to_string(), "   ".to_string()])
            .await
            .unwrap();
        assert_eq!(result, vec![None, None]);
    }

    #[tokio::test]
    async fn unrepresentable_source_yields_empty_result() {
        // Single-character tokens only: no shingles, no signature.
        let source = ContentMetadata {
            title: Some("a b c".to_string()),
            ..Default::default()
        };
        let candidates = vec![(
            SearchField::Title,
            vec![candidate("x", "Some candidate", None)],
        )];

        let backend = fingerprint_backend();
        let (duplicates, field_max) =
            find_duplicates(&source, &candidates, &backend, 0.5).await.unwrap();
        assert!(duplicates.is_empty());
        assert!(field_max.is_empty());
    }
}
