use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{
    api,
    config::AppConfig,
    middleware::assign_trace_id,
    util::{embedding::EmbeddingManager, minhash::MinHashEngine},
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub http: reqwest::Client,
    pub embeddings: Arc<EmbeddingManager>,
    pub minhash: Arc<MinHashEngine>,
}

pub fn build_router(config: &AppConfig) -> anyhow::Result<Router> {
    let http = reqwest::Client::builder()
        .user_agent("DedupBackend/0.1")
        .build()?;

    let state = AppState {
        config: Arc::new(config.clone()),
        http,
        embeddings: Arc::new(EmbeddingManager::new(config.embedding.clone())),
        minhash: Arc::new(MinHashEngine::new(config.detection.num_hashes)),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let layers = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let router = Router::new()
        .route("/", get(api::health::service_info))
        .route("/health", get(api::health::health_check))
        .route("/detect/hash/by-node", post(api::detect::hash_by_node))
        .route(
            "/detect/hash/by-metadata",
            post(api::detect::hash_by_metadata),
        )
        .route(
            "/detect/embedding/by-node",
            post(api::detect::embedding_by_node),
        )
        .route(
            "/detect/embedding/by-metadata",
            post(api::detect::embedding_by_metadata),
        )
        .route("/embed", post(api::embed::create_embedding))
        .route("/hash", post(api::hash::create_hash))
        .layer(middleware::from_fn(assign_trace_id))
        .layer(layers)
        .with_state(state);

    Ok(router)
}
