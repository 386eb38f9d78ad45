mod conversation;
mod graphrag;

use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};

use crate::app_state::AppState;

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .nest("/api/graphrag", graphrag::router())
        .nest("/conversation", conversation::router())
        .with_state(app_state)
}

async fn health_handler() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}
