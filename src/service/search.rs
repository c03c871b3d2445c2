use std::collections::HashSet;
use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::{
    model::{
        usable_keywords, CandidateRecord, CandidateStats, ContentMetadata, SearchField, SearchTask,
    },
    repo::nodes::{NodeQuery, PROP_FREE_TEXT, PROP_URL_EXACT},
    util::{title, url_norm},
};

const DISPLAY_TRUNCATE: usize = 80;
const NORMALIZED_DISPLAY_TRUNCATE: usize = 50;
const DESCRIPTION_QUERY_CHARS: usize = 100;
const KEYWORD_QUERY_LIMIT: usize = 5;

/// Candidates per field (caller field order preserved) plus per-field search
/// statistics. `highest_similarity` is filled in by the matcher afterwards.
pub struct SearchOutcome {
    pub candidates: Vec<(SearchField, Vec<CandidateRecord>)>,
    pub stats: Vec<CandidateStats>,
}

impl SearchOutcome {
    /// Unique candidate ids across all fields. After global deduplication
    /// this equals the sum of the per-field counts.
    pub fn total_candidates(&self) -> usize {
        self.candidates.iter().map(|(_, c)| c.len()).sum()
    }
}

struct FieldPlan {
    field: SearchField,
    search_value: Option<String>,
    normalized_search: Option<String>,
    tasks: Vec<SearchTask>,
}

/// Search the repository for duplicate candidates over the requested fields.
///
/// All tasks of all fields run concurrently on a bounded pool; each task
/// paginates independently and failures degrade to partial results. The
/// output is deterministic regardless of completion order: results are keyed
/// by task index and merged in task order, and cross-field deduplication
/// follows the caller's field order (first field wins).
pub async fn search_candidates(
    repository: Arc<dyn NodeQuery>,
    metadata: &ContentMetadata,
    fields: &[SearchField],
    max_per_field: u32,
    concurrency: usize,
    exclude_id: Option<&str>,
) -> SearchOutcome {
    let plans: Vec<FieldPlan> = fields
        .iter()
        .map(|field| build_field_plan(metadata, *field, max_per_field))
        .collect();

    let flat_tasks: Vec<SearchTask> = plans
        .iter()
        .flat_map(|plan| plan.tasks.iter().cloned())
        .collect();

    debug!(
        fields = fields.len(),
        tasks = flat_tasks.len(),
        "starting candidate search fan-out"
    );

    let mut results: Vec<Option<Vec<CandidateRecord>>> = Vec::new();
    results.resize_with(flat_tasks.len(), || None);

    let concurrency = concurrency.max(1);
    let mut set = JoinSet::new();

    for (task_idx, task) in flat_tasks.iter().enumerate() {
        let repository = Arc::clone(&repository);
        let task = task.clone();

        set.spawn(async move {
            let rows = repository
                .query_by_property(&task.property, &task.value, task.max_items)
                .await;
            debug!(
                field = task.field.as_str(),
                property = %task.property,
                rows = rows.len(),
                "search task finished"
            );
            (task_idx, rows)
        });

        if set.len() >= concurrency {
            if let Some(joined) = set.join_next().await {
                store_result(&mut results, joined);
            }
        }
    }

    while let Some(joined) = set.join_next().await {
        store_result(&mut results, joined);
    }

    // Merge per field in task order, then deduplicate across fields in the
    // caller's field order so an id only survives under its first field.
    let mut candidates = Vec::with_capacity(plans.len());
    let mut stats = Vec::with_capacity(plans.len());
    let mut task_cursor = 0usize;
    let mut global_seen: HashSet<String> = HashSet::new();

    for plan in &plans {
        let mut field_seen: HashSet<String> = HashSet::new();
        let mut merged: Vec<CandidateRecord> = Vec::new();
        let mut original_count: Option<usize> = None;
        let mut variant_adds = 0usize;

        for task in &plan.tasks {
            let rows = results[task_cursor].take().unwrap_or_default();
            task_cursor += 1;

            if original_count.is_none() {
                original_count = Some(rows.len());
            }

            for row in rows {
                if Some(row.id.as_str()) == exclude_id {
                    continue;
                }
                if global_seen.contains(&row.id) || !field_seen.insert(row.id.clone()) {
                    continue;
                }
                if task.is_variant {
                    variant_adds += 1;
                }
                merged.push(row);
            }
        }

        for record in &merged {
            global_seen.insert(record.id.clone());
        }

        let searched = !plan.tasks.is_empty();
        stats.push(CandidateStats {
            field: plan.field.as_str().to_string(),
            search_value: plan
                .search_value
                .as_deref()
                .map(|v| truncate_display(v, DISPLAY_TRUNCATE)),
            candidates_found: merged.len(),
            highest_similarity: None,
            original_count: searched.then_some(original_count.unwrap_or(0)),
            normalized_search: plan
                .normalized_search
                .as_deref()
                .map(|v| truncate_display(v, NORMALIZED_DISPLAY_TRUNCATE)),
            normalized_count: (searched && plan.tasks.len() > 1).then_some(variant_adds),
        });

        info!(
            field = plan.field.as_str(),
            tasks = plan.tasks.len(),
            candidates = merged.len(),
            "field search finished"
        );

        candidates.push((plan.field, merged));
    }

    SearchOutcome { candidates, stats }
}

fn store_result(
    results: &mut [Option<Vec<CandidateRecord>>],
    joined: Result<(usize, Vec<CandidateRecord>), tokio::task::JoinError>,
) {
    match joined {
        Ok((task_idx, rows)) => results[task_idx] = Some(rows),
        Err(err) => warn!(error = %err, "search task failed to join"),
    }
}

fn build_field_plan(
    metadata: &ContentMetadata,
    field: SearchField,
    max_per_field: u32,
) -> FieldPlan {
    match field {
        SearchField::Title if metadata.has_usable_title() => {
            title_plan(metadata.title.as_deref().unwrap_or_default(), max_per_field)
        }
        SearchField::Description if metadata.has_usable_description() => {
            let description = metadata.description.as_deref().unwrap_or_default();
            let value: String = description.chars().take(DESCRIPTION_QUERY_CHARS).collect();
            FieldPlan {
                field,
                search_value: Some(value.clone()),
                normalized_search: None,
                tasks: vec![SearchTask {
                    field,
                    property: PROP_FREE_TEXT.to_string(),
                    value,
                    max_items: max_per_field,
                    is_variant: false,
                }],
            }
        }
        SearchField::Keywords if metadata.has_usable_keywords() => {
            let keywords = metadata.keywords.as_deref().unwrap_or_default();
            let value = usable_keywords(keywords)
                .into_iter()
                .take(KEYWORD_QUERY_LIMIT)
                .map(String::as_str)
                .collect::<Vec<_>>()
                .join(" ");
            FieldPlan {
                field,
                search_value: Some(value.clone()),
                normalized_search: None,
                tasks: vec![SearchTask {
                    field,
                    property: PROP_FREE_TEXT.to_string(),
                    value,
                    max_items: max_per_field,
                    is_variant: false,
                }],
            }
        }
        SearchField::Url if metadata.has_usable_url() => url_plan(metadata, max_per_field),
        // Unusable source value: no tasks, empty stats entry.
        _ => FieldPlan {
            field,
            search_value: None,
            normalized_search: None,
            tasks: Vec::new(),
        },
    }
}

fn title_plan(source_title: &str, max_per_field: u32) -> FieldPlan {
    let field = SearchField::Title;
    let normalized = title::normalize_title(source_title);

    let mut tasks = vec![SearchTask {
        field,
        property: PROP_FREE_TEXT.to_string(),
        value: source_title.to_string(),
        max_items: max_per_field,
        is_variant: false,
    }];

    for variant in title::generate_title_search_variants(source_title) {
        if variant == source_title {
            continue;
        }
        tasks.push(SearchTask {
            field,
            property: PROP_FREE_TEXT.to_string(),
            value: variant,
            max_items: max_per_field,
            is_variant: true,
        });
    }

    let search_value = match &normalized {
        Some(normalized) => format!("{source_title} → {normalized}"),
        None => source_title.to_string(),
    };

    FieldPlan {
        field,
        search_value: Some(search_value),
        normalized_search: normalized,
        tasks,
    }
}

fn url_plan(metadata: &ContentMetadata, max_per_field: u32) -> FieldPlan {
    let field = SearchField::Url;
    let source_url = metadata.url.as_deref().unwrap_or_default();
    let redirect_url = metadata.redirect_url.as_deref();

    // The repository may have stored any spelling of the URL; exact-match
    // queries for the known forms, free-text queries for everything else.
    let mut variants: Vec<String> = Vec::new();
    let mut variant_seen: HashSet<String> = HashSet::new();
    for url in metadata.all_urls() {
        for variant in url_norm::generate_url_search_variants(url) {
            if variant_seen.insert(variant.clone()) {
                variants.push(variant);
            }
        }
    }

    let mut tasks = vec![SearchTask {
        field,
        property: PROP_URL_EXACT.to_string(),
        value: source_url.to_string(),
        max_items: max_per_field,
        is_variant: false,
    }];

    if let Some(redirect) = redirect_url {
        tasks.push(SearchTask {
            field,
            property: PROP_URL_EXACT.to_string(),
            value: redirect.to_string(),
            max_items: max_per_field,
            is_variant: false,
        });
    }

    for variant in &variants {
        if variant == source_url || Some(variant.as_str()) == redirect_url {
            continue;
        }
        tasks.push(SearchTask {
            field,
            property: PROP_FREE_TEXT.to_string(),
            value: variant.clone(),
            max_items: max_per_field / 2,
            is_variant: true,
        });
    }

    let search_value = match redirect_url {
        Some(redirect) => format!("{source_url} -> {redirect} ({} variants)", variants.len()),
        None => format!("{source_url} ({} variants)", variants.len()),
    };

    FieldPlan {
        field,
        search_value: Some(search_value),
        normalized_search: url_norm::normalize_url(source_url),
        tasks,
    }
}

fn truncate_display(value: &str, max: usize) -> String {
    if value.chars().count() <= max {
        value.to_string()
    } else {
        let truncated: String = value.chars().take(max).collect();
        format!("{truncated}...")
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use async_trait::async_trait;

    use super::*;

    struct MockRepository {
        responses: HashMap<(String, String), Vec<CandidateRecord>>,
    }

    impl MockRepository {
        fn new() -> Self {
            Self {
                responses: HashMap::new(),
            }
        }

        fn with(mut self, property: &str, value: &str, ids: &[&str]) -> Self {
            let records = ids.iter().map(|id| record(id)).collect();
            self.responses
                .insert((property.to_string(), value.to_string()), records);
            self
        }
    }

    #[async_trait]
    impl NodeQuery for MockRepository {
        async fn query_by_property(
            &self,
            property: &str,
            value: &str,
            max_items: u32,
        ) -> Vec<CandidateRecord> {
            let mut rows = self
                .responses
                .get(&(property.to_string(), value.to_string()))
                .cloned()
                .unwrap_or_default();
            rows.truncate(max_items as usize);
            rows
        }
    }

    fn record(id: &str) -> CandidateRecord {
        CandidateRecord {
            id: id.to_string(),
            title: Some(format!("title-{id}")),
            description: None,
            keywords: None,
            url: None,
        }
    }

    fn metadata(title: &str, description: &str) -> ContentMetadata {
        ContentMetadata {
            title: Some(title.to_string()),
            description: Some(description.to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn no_candidate_id_repeats_across_fields() {
        let repository = Arc::new(
            MockRepository::new()
                .with(PROP_FREE_TEXT, "Photosynthese", &["a", "b"])
                .with(PROP_FREE_TEXT, "Wie Pflanzen Licht in Zucker verwandeln", &["b", "c"]),
        );

        let outcome = search_candidates(
            repository,
            &metadata("Photosynthese", "Wie Pflanzen Licht in Zucker verwandeln"),
            &[SearchField::Title, SearchField::Description],
            100,
            10,
            None,
        )
        .await;

        let title_ids: Vec<&str> = outcome.candidates[0].1.iter().map(|c| c.id.as_str()).collect();
        let description_ids: Vec<&str> =
            outcome.candidates[1].1.iter().map(|c| c.id.as_str()).collect();

        assert_eq!(title_ids, vec!["a", "b"]);
        // "b" already surfaced under title, the earlier field.
        assert_eq!(description_ids, vec!["c"]);
        assert_eq!(outcome.total_candidates(), 3);
    }

    #[tokio::test]
    async fn excluded_source_node_never_appears() {
        let repository = Arc::new(MockRepository::new().with(
            PROP_FREE_TEXT,
            "Photosynthese",
            &["source", "other"],
        ));

        let outcome = search_candidates(
            repository,
            &metadata("Photosynthese", ""),
            &[SearchField::Title],
            100,
            10,
            Some("source"),
        )
        .await;

        let ids: Vec<&str> = outcome.candidates[0].1.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["other"]);
    }

    #[tokio::test]
    async fn title_variants_are_searched_and_counted() {
        let repository = Arc::new(
            MockRepository::new()
                .with(PROP_FREE_TEXT, "Islam - Wikipedia", &["a"])
                .with(PROP_FREE_TEXT, "Islam", &["a", "b"]),
        );

        let outcome = search_candidates(
            repository,
            &ContentMetadata {
                title: Some("Islam - Wikipedia".to_string()),
                ..Default::default()
            },
            &[SearchField::Title],
            100,
            10,
            None,
        )
        .await;

        let stats = &outcome.stats[0];
        assert_eq!(stats.candidates_found, 2);
        assert_eq!(stats.original_count, Some(1));
        assert_eq!(stats.normalized_search.as_deref(), Some("Islam"));
        assert_eq!(stats.normalized_count, Some(1));
        assert_eq!(stats.search_value.as_deref(), Some("Islam - Wikipedia → Islam"));
    }

    #[tokio::test]
    async fn url_field_uses_exact_and_variant_queries() {
        let repository = Arc::new(
            MockRepository::new()
                .with(PROP_URL_EXACT, "https://example.org/page", &["exact"])
                .with(PROP_FREE_TEXT, "example.org/page", &["token"]),
        );

        let outcome = search_candidates(
            repository,
            &ContentMetadata {
                url: Some("https://example.org/page".to_string()),
                ..Default::default()
            },
            &[SearchField::Url],
            100,
            10,
            None,
        )
        .await;

        let ids: Vec<&str> = outcome.candidates[0].1.iter().map(|c| c.id.as_str()).collect();
        assert!(ids.contains(&"exact"));
        assert!(ids.contains(&"token"));

        let stats = &outcome.stats[0];
        assert_eq!(stats.original_count, Some(1));
        assert_eq!(stats.normalized_count, Some(1));
        assert_eq!(stats.normalized_search.as_deref(), Some("example.org/page"));
    }

    #[tokio::test]
    async fn unusable_fields_get_empty_stats_entries() {
        let repository = Arc::new(MockRepository::new());

        let outcome = search_candidates(
            repository,
            &ContentMetadata {
                title: Some("string".to_string()),
                ..Default::default()
            },
            &[SearchField::Title, SearchField::Url],
            100,
            10,
            None,
        )
        .await;

        assert_eq!(outcome.candidates[0].1.len(), 0);
        assert_eq!(outcome.candidates[1].1.len(), 0);
        for stats in &outcome.stats {
            assert_eq!(stats.search_value, None);
            assert_eq!(stats.candidates_found, 0);
            assert_eq!(stats.original_count, None);
        }
    }

    #[tokio::test]
    async fn output_is_deterministic_for_identical_inputs() {
        let build = || {
            Arc::new(
                MockRepository::new()
                    .with(PROP_FREE_TEXT, "Photosynthese", &["a", "b", "c"])
                    .with(PROP_FREE_TEXT, "Wie Pflanzen Licht in Zucker verwandeln", &["c", "d"]),
            )
        };
        let fields = [SearchField::Title, SearchField::Description];
        let source = metadata("Photosynthese", "Wie Pflanzen Licht in Zucker verwandeln");

        let first = search_candidates(build(), &source, &fields, 100, 2, None).await;
        let second = search_candidates(build(), &source, &fields, 100, 2, None).await;

        let ids = |outcome: &SearchOutcome| -> Vec<Vec<String>> {
            outcome
                .candidates
                .iter()
                .map(|(_, c)| c.iter().map(|r| r.id.clone()).collect())
                .collect()
        };
        assert_eq!(ids(&first), ids(&second));
    }

    #[tokio::test]
    async fn pagination_cap_limits_per_field_results() {
        let repository = Arc::new(MockRepository::new().with(
            PROP_FREE_TEXT,
            "Photosynthese",
            &["a", "b", "c", "d", "e"],
        ));

        let outcome = search_candidates(
            repository,
            &ContentMetadata {
                title: Some("Photosynthese".to_string()),
                ..Default::default()
            },
            &[SearchField::Title],
            2,
            10,
            None,
        )
        .await;

        assert_eq!(outcome.candidates[0].1.len(), 2);
    }
}
