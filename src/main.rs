mod api;
mod app_state;
mod backup;
mod chunk_source;
mod config;
mod conversation;
mod error;
mod expr;
mod extractor;
mod flow_store;
mod graph_store;
mod hybrid_search;
mod ingestion;
mod llm;
mod models;
mod narrative;
mod neo4j_client;
mod session_store;
mod vector_store;

use crate::app_state::AppState;
use crate::flow_store::FlowStore;
use crate::graph_store::GraphStore;
use crate::vector_store::VectorStore;
use axum::Router;
use tokio::sync::oneshot;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cfg = config::AppConfig::from_env().expect("failed to load configuration");

    let graph = neo4j_client::connect_from_config(&cfg)
        .await
        .expect("failed to connect to Neo4j");
    neo4j_client::ensure_schema(&graph)
        .await
        .expect("failed to ensure Neo4j schema");

    let graph_store = GraphStore::new(graph.clone());
    let vector_store = VectorStore::new(graph.clone(), cfg.embedding_dim);
    vector_store
        .ensure_index()
        .await
        .expect("failed to ensure vector index");
    let flow_store = FlowStore::new(graph.clone());

    let llm_manager = llm::LlmManager::from_config(&cfg).expect("failed to init LLM manager");

    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    let app_state = AppState::new(cfg.clone(), graph_store, vector_store, flow_store, llm_manager, shutdown_tx);

    let app = Router::new()
        .nest("/", api::create_router(app_state.clone()))
        .fallback_service(ServeDir::new("frontend"))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    let server_addr = &app_state.config.server_addr;
    let listener = tokio::net::TcpListener::bind(server_addr).await.unwrap();
    info!("listening on http://{}", server_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_rx.await.ok();
            info!("shutdown signal received, closing server");
        })
        .await
        .unwrap();

    info!("server closed");
}
