use axum::{extract::State, Json};

use crate::{
    app::AppState,
    error::{AppError, AppResult},
    model::{DetectByMetadataRequest, DetectByNodeRequest, DetectionOptions, DetectionResponse},
    service::detect::{self, DetectionMethod},
};

const MAX_CANDIDATES_LIMIT: u32 = 1000;

pub async fn hash_by_node(
    State(state): State<AppState>,
    Json(body): Json<DetectByNodeRequest>,
) -> AppResult<Json<DetectionResponse>> {
    validate_node_id(&body.node_id)?;
    validate_options(&body.options)?;
    Ok(Json(detect::by_node(&state, body, DetectionMethod::Hash).await))
}

pub async fn hash_by_metadata(
    State(state): State<AppState>,
    Json(body): Json<DetectByMetadataRequest>,
) -> AppResult<Json<DetectionResponse>> {
    validate_options(&body.options)?;
    Ok(Json(detect::by_metadata(&state, body, DetectionMethod::Hash).await))
}

pub async fn embedding_by_node(
    State(state): State<AppState>,
    Json(body): Json<DetectByNodeRequest>,
) -> AppResult<Json<DetectionResponse>> {
    validate_node_id(&body.node_id)?;
    validate_options(&body.options)?;
    Ok(Json(
        detect::by_node(&state, body, DetectionMethod::Embedding).await,
    ))
}

pub async fn embedding_by_metadata(
    State(state): State<AppState>,
    Json(body): Json<DetectByMetadataRequest>,
) -> AppResult<Json<DetectionResponse>> {
    validate_options(&body.options)?;
    Ok(Json(
        detect::by_metadata(&state, body, DetectionMethod::Embedding).await,
    ))
}

fn validate_node_id(node_id: &str) -> AppResult<()> {
    if node_id.trim().is_empty() {
        return Err(AppError::BadRequest("node_id must not be empty".to_string()));
    }
    Ok(())
}

fn validate_options(options: &DetectionOptions) -> AppResult<()> {
    if options.max_candidates == 0 || options.max_candidates > MAX_CANDIDATES_LIMIT {
        return Err(AppError::BadRequest(format!(
            "max_candidates must be between 1 and {MAX_CANDIDATES_LIMIT}"
        )));
    }

    if let Some(threshold) = options.similarity_threshold {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(AppError::BadRequest(
                "similarity_threshold must be between 0.0 and 1.0".to_string(),
            ));
        }
    }

    if options.search_fields.is_empty() {
        return Err(AppError::BadRequest(
            "search_fields must not be empty".to_string(),
        ));
    }

    Ok(())
}
