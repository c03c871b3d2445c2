use axum::{extract::State, Json};
use tracing::{debug, warn};

use crate::{
    app::AppState,
    model::{EmbedRequest, EmbedResponse},
};

pub async fn create_embedding(
    State(state): State<AppState>,
    Json(body): Json<EmbedRequest>,
) -> Json<EmbedResponse> {
    debug!(chars = body.text.len(), "embedding request");

    if !state.embeddings.is_available() {
        return Json(failure(body.text, String::new(), "Embedding model not available"));
    }

    let model = state.embeddings.model_display_name();

    if body.text.trim().is_empty() {
        return Json(failure(body.text, model, "text must not be empty"));
    }

    let result = match state.embeddings.get().await {
        Ok(client) => client.embed_batch(std::slice::from_ref(&body.text)).await,
        Err(err) => Err(err),
    };

    match result.map(|mut vectors| vectors.pop()) {
        Ok(Some(embedding)) => Json(EmbedResponse {
            success: true,
            text: body.text,
            dimensions: embedding.len(),
            embedding,
            model,
            error: None,
        }),
        Ok(None) => Json(failure(body.text, model, "Could not compute embedding")),
        Err(err) => {
            warn!(error = %err, "embedding failed");
            Json(failure(body.text, model, &err.to_string()))
        }
    }
}

fn failure(text: String, model: String, error: &str) -> EmbedResponse {
    EmbedResponse {
        success: false,
        text,
        embedding: Vec::new(),
        dimensions: 0,
        model,
        error: Some(error.to_string()),
    }
}
