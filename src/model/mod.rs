use serde::{Deserialize, Serialize};

use crate::util::url_norm::normalize_url;

/// Swagger UI leaves the literal word "string" in fields users did not fill
/// in; treat it like an absent value everywhere.
const PLACEHOLDER: &str = "string";

/// Remote repository environments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Production,
    Staging,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Production => "production",
            Environment::Staging => "staging",
        }
    }
}

/// Metadata fields a candidate search can be seeded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchField {
    Title,
    Description,
    Keywords,
    Url,
}

impl SearchField {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchField::Title => "title",
            SearchField::Description => "description",
            SearchField::Keywords => "keywords",
            SearchField::Url => "url",
        }
    }

    pub fn all() -> Vec<SearchField> {
        vec![
            SearchField::Title,
            SearchField::Description,
            SearchField::Keywords,
            SearchField::Url,
        ]
    }
}

/// A metadata field value as seen by validity checks.
pub enum FieldValue<'a> {
    Absent,
    Text(&'a str),
    TextList(&'a [String]),
}

impl<'a> From<Option<&'a String>> for FieldValue<'a> {
    fn from(value: Option<&'a String>) -> Self {
        match value {
            Some(text) => FieldValue::Text(text),
            None => FieldValue::Absent,
        }
    }
}

/// Single validity predicate for metadata fields: present, non-blank and not
/// a placeholder. For lists: at least one usable entry.
pub fn is_usable_field(value: FieldValue<'_>) -> bool {
    match value {
        FieldValue::Absent => false,
        FieldValue::Text(text) => {
            let trimmed = text.trim();
            !trimmed.is_empty() && !trimmed.eq_ignore_ascii_case(PLACEHOLDER)
        }
        FieldValue::TextList(items) => items
            .iter()
            .any(|item| is_usable_field(FieldValue::Text(item))),
    }
}

/// Usable entries of a keyword list (placeholders dropped, order kept).
pub fn usable_keywords(keywords: &[String]) -> Vec<&String> {
    keywords
        .iter()
        .filter(|k| is_usable_field(FieldValue::Text(k)))
        .collect()
}

/// Content metadata for duplicate detection. Values are immutable once
/// constructed; enrichment builds a fresh instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContentMetadata {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub keywords: Option<Vec<String>>,
    #[serde(default)]
    pub url: Option<String>,
    /// Resolved redirect target, only set when it normalizes differently
    /// than `url`.
    #[serde(default)]
    pub redirect_url: Option<String>,
}

impl ContentMetadata {
    pub fn has_usable_title(&self) -> bool {
        is_usable_field(self.title.as_ref().into())
    }

    pub fn has_usable_description(&self) -> bool {
        is_usable_field(self.description.as_ref().into())
    }

    pub fn has_usable_keywords(&self) -> bool {
        match &self.keywords {
            Some(keywords) => is_usable_field(FieldValue::TextList(keywords)),
            None => false,
        }
    }

    pub fn has_usable_url(&self) -> bool {
        is_usable_field(self.url.as_ref().into())
    }

    /// Whether there is anything to search with at all.
    pub fn has_content(&self) -> bool {
        self.has_usable_title()
            || self.has_usable_description()
            || self.has_usable_keywords()
            || self.has_usable_url()
    }

    pub fn normalized_url(&self) -> Option<String> {
        self.url.as_deref().and_then(normalize_url)
    }

    pub fn normalized_redirect_url(&self) -> Option<String> {
        self.redirect_url.as_deref().and_then(normalize_url)
    }

    /// Original plus redirect URL (when different), for searching.
    pub fn all_urls(&self) -> Vec<&str> {
        let mut urls = Vec::new();
        if let Some(url) = self.url.as_deref() {
            urls.push(url);
        }
        if let Some(redirect) = self.redirect_url.as_deref() {
            if Some(redirect) != self.url.as_deref() {
                urls.push(redirect);
            }
        }
        urls
    }
}

/// One candidate row from the remote repository, keyed by node id.
#[derive(Debug, Clone)]
pub struct CandidateRecord {
    pub id: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub keywords: Option<Vec<String>>,
    pub url: Option<String>,
}

/// One unit of remote query work.
#[derive(Debug, Clone)]
pub struct SearchTask {
    pub field: SearchField,
    pub property: String,
    pub value: String,
    pub max_items: u32,
    pub is_variant: bool,
}

/// Per-field search observability; not used by the matcher.
#[derive(Debug, Clone, Serialize)]
pub struct CandidateStats {
    pub field: String,
    pub search_value: Option<String>,
    pub candidates_found: usize,
    pub highest_similarity: Option<f64>,
    pub original_count: Option<usize>,
    pub normalized_search: Option<String>,
    pub normalized_count: Option<usize>,
}

/// A candidate that passed matching, one per unique node id.
#[derive(Debug, Clone, Serialize)]
pub struct DuplicateCandidate {
    pub node_id: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub keywords: Option<Vec<String>>,
    pub url: Option<String>,
    pub similarity_score: f64,
    pub match_source: String,
}

/// Outcome of the sparse-metadata enrichment step.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EnrichmentInfo {
    pub enriched: bool,
    pub enrichment_source_node_id: Option<String>,
    pub enrichment_source_field: Option<String>,
    pub fields_added: Vec<String>,
}

fn default_search_fields() -> Vec<SearchField> {
    vec![SearchField::Title, SearchField::Description, SearchField::Url]
}

fn default_max_candidates() -> u32 {
    100
}

fn default_true() -> bool {
    true
}

/// Shared knobs of all detection requests.
#[derive(Debug, Clone, Deserialize)]
pub struct DetectionOptions {
    #[serde(default)]
    pub environment: Environment,
    #[serde(default = "default_search_fields")]
    pub search_fields: Vec<SearchField>,
    #[serde(default = "default_max_candidates")]
    pub max_candidates: u32,
    #[serde(default = "default_true")]
    pub enrich_from_candidates: bool,
    /// Per-method default applied when absent (hash 0.9, embedding 0.95).
    #[serde(default)]
    pub similarity_threshold: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct DetectByNodeRequest {
    pub node_id: String,
    #[serde(flatten)]
    pub options: DetectionOptions,
}

#[derive(Debug, Deserialize)]
pub struct DetectByMetadataRequest {
    pub metadata: ContentMetadata,
    #[serde(flatten)]
    pub options: DetectionOptions,
}

#[derive(Debug, Serialize)]
pub struct DetectionResponse {
    pub success: bool,
    pub source_node_id: Option<String>,
    pub source_metadata: Option<ContentMetadata>,
    pub method: &'static str,
    pub threshold: f64,
    pub enrichment: Option<EnrichmentInfo>,
    pub candidate_search_results: Vec<CandidateStats>,
    pub total_candidates_checked: usize,
    pub duplicates: Vec<DuplicateCandidate>,
    pub error: Option<String>,
}

impl DetectionResponse {
    pub fn failure(method: &'static str, threshold: f64, error: String) -> Self {
        Self {
            success: false,
            source_node_id: None,
            source_metadata: None,
            method,
            threshold,
            enrichment: None,
            candidate_search_results: Vec::new(),
            total_candidates_checked: 0,
            duplicates: Vec::new(),
            error: Some(error),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct EmbedRequest {
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct EmbedResponse {
    pub success: bool,
    pub text: String,
    pub embedding: Vec<f64>,
    pub dimensions: usize,
    pub model: String,
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct HashRequest {
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct HashResponse {
    pub success: bool,
    pub text: String,
    pub signature: Vec<f64>,
    pub num_hashes: usize,
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub hash_detection_available: bool,
    pub embedding_detection_available: bool,
    pub embedding_model_loaded: bool,
    pub embedding_model_name: String,
    pub version: &'static str,
}
