use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::{app::AppState, model::HealthResponse};

const VERSION: &str = env!("CARGO_PKG_VERSION");

pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        hash_detection_available: true,
        embedding_detection_available: state.embeddings.is_available(),
        embedding_model_loaded: state.embeddings.is_loaded().await,
        embedding_model_name: state.embeddings.model_display_name(),
        version: VERSION,
    })
}

pub async fn service_info() -> Json<Value> {
    Json(json!({
        "name": "Duplicate Detection API",
        "version": VERSION,
        "endpoints": {
            "hash_by_node": "/detect/hash/by-node",
            "hash_by_metadata": "/detect/hash/by-metadata",
            "embedding_by_node": "/detect/embedding/by-node",
            "embedding_by_metadata": "/detect/embedding/by-metadata",
            "embed": "/embed",
            "hash": "/hash",
            "health": "/health"
        }
    }))
}
