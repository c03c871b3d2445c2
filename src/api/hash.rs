use axum::{extract::State, Json};
use tracing::debug;

use crate::{
    app::AppState,
    model::{HashRequest, HashResponse},
};

pub async fn create_hash(
    State(state): State<AppState>,
    Json(body): Json<HashRequest>,
) -> Json<HashResponse> {
    debug!(chars = body.text.len(), "hash signature request");

    let num_hashes = state.minhash.num_hashes();
    match state.minhash.text_signature(&body.text) {
        Some(signature) => Json(HashResponse {
            success: true,
            text: body.text,
            signature,
            num_hashes,
            error: None,
        }),
        None => Json(HashResponse {
            success: false,
            text: body.text,
            signature: Vec::new(),
            num_hashes,
            error: Some("Could not compute hash signature (text too short?)".to_string()),
        }),
    }
}
