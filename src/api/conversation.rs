use axum::extract::{Path, Query, State};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::app_state::AppState;
use crate::conversation::{ChatRequest, ChatResponse};
use crate::error::{AppError, AppResult};
use crate::models::{Action, Condition, FlowEdge, FlowGraph, Intent};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/chat", post(chat_handler))
        .route(
            "/session/:id",
            get(get_session_handler).post(touch_session_handler).delete(delete_session_handler),
        )
        .route("/sessions", get(list_sessions_handler))
        .route("/flow", get(flow_graph_handler))
        .route("/flow/seed", post(flow_seed_handler))
        .route("/flow/intent", post(create_intent_handler))
        .route("/flow/intent/:id", delete(delete_intent_handler))
        .route("/flow/condition", post(create_condition_handler))
        .route("/flow/condition/:id", delete(delete_condition_handler))
        .route("/flow/action", post(create_action_handler))
        .route("/flow/action/:id", delete(delete_action_handler))
        .route("/flow/edge", post(create_edge_handler))
        .route("/flow/edge/:id", delete(delete_edge_handler))
}

async fn chat_handler(State(state): State<AppState>, Json(req): Json<ChatRequest>) -> Json<ChatResponse> {
    Json(state.conversation.handle_turn(req).await)
}

async fn get_session_handler(State(state): State<AppState>, Path(id): Path<String>) -> AppResult<Json<crate::models::Session>> {
    state
        .conversation
        .session_store()
        .get(&id)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("session {id} not found")))
}

#[derive(Debug, Deserialize)]
struct ExtendSessionPayload {
    #[serde(default = "default_extend_secs")]
    additional_secs: i64,
}

fn default_extend_secs() -> i64 {
    3600
}

async fn touch_session_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<ExtendSessionPayload>,
) -> AppResult<Json<crate::models::Session>> {
    let session = state.conversation.session_store().extend(&id, payload.additional_secs)?;
    Ok(Json(session))
}

async fn delete_session_handler(State(state): State<AppState>, Path(id): Path<String>) -> Json<Value> {
    let deleted = state.conversation.session_store().delete(&id);
    Json(json!({ "deleted": deleted }))
}

#[derive(Debug, Deserialize)]
struct ListSessionsQuery {
    #[serde(default = "default_sessions_limit")]
    limit: usize,
}

fn default_sessions_limit() -> usize {
    100
}

async fn list_sessions_handler(State(state): State<AppState>, Query(q): Query<ListSessionsQuery>) -> Json<Value> {
    let sessions = state.conversation.session_store().list_active(q.limit);
    Json(json!({ "sessions": sessions }))
}

async fn flow_graph_handler(State(state): State<AppState>) -> AppResult<Json<FlowGraph>> {
    let graph = state.conversation.flow_store().flow_graph().await?;
    Ok(Json(graph))
}

async fn flow_seed_handler(State(state): State<AppState>) -> AppResult<Json<Value>> {
    state.conversation.flow_store().seed_canonical_flow().await?;
    Ok(Json(json!({ "seeded": true })))
}

async fn create_intent_handler(State(state): State<AppState>, Json(intent): Json<Intent>) -> AppResult<Json<Value>> {
    state.conversation.flow_store().create_intent(&intent).await?;
    Ok(Json(json!({ "created": true, "id": intent.id })))
}

async fn delete_intent_handler(State(state): State<AppState>, Path(id): Path<String>) -> AppResult<Json<Value>> {
    let deleted = state.conversation.flow_store().delete_intent(&id).await?;
    Ok(Json(json!({ "deleted": deleted })))
}

async fn create_condition_handler(State(state): State<AppState>, Json(condition): Json<Condition>) -> AppResult<Json<Value>> {
    state.conversation.flow_store().create_condition(&condition).await?;
    Ok(Json(json!({ "created": true, "id": condition.id })))
}

async fn delete_condition_handler(State(state): State<AppState>, Path(id): Path<String>) -> AppResult<Json<Value>> {
    let deleted = state.conversation.flow_store().delete_condition(&id).await?;
    Ok(Json(json!({ "deleted": deleted })))
}

async fn create_action_handler(State(state): State<AppState>, Json(action): Json<Action>) -> AppResult<Json<Value>> {
    state.conversation.flow_store().create_action(&action).await?;
    Ok(Json(json!({ "created": true, "id": action.id })))
}

async fn delete_action_handler(State(state): State<AppState>, Path(id): Path<String>) -> AppResult<Json<Value>> {
    let deleted = state.conversation.flow_store().delete_action(&id).await?;
    Ok(Json(json!({ "deleted": deleted })))
}

async fn create_edge_handler(State(state): State<AppState>, Json(edge): Json<FlowEdge>) -> AppResult<Json<Value>> {
    state.conversation.flow_store().create_edge(&edge).await?;
    Ok(Json(json!({ "created": true, "id": edge.id })))
}

async fn delete_edge_handler(State(state): State<AppState>, Path(id): Path<String>) -> AppResult<Json<Value>> {
    let deleted = state.conversation.flow_store().delete_edge(&id).await?;
    Ok(Json(json!({ "deleted": deleted })))
}
