use axum::extract::{Multipart, Path, Query, State};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;

use crate::app_state::AppState;
use crate::backup::DatasetExport;
use crate::error::{AppError, AppResult};
use crate::extractor::extract_chunk;
use crate::ingestion::{BuildOptions, BuildProgress, DocumentRef};
use crate::models::{Entity, Relationship, SearchQuery};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/stats", get(stats_handler))
        .route("/extract/entities", post(extract_entities_handler))
        .route("/extract/relationships", post(extract_relationships_handler))
        .route("/extract/all", post(extract_all_handler))
        .route("/ingest/entities", post(ingest_entities_handler))
        .route("/ingest/relationships", post(ingest_relationships_handler))
        .route("/ingest/document", post(ingest_document_handler))
        .route("/ingest/dataset", delete(delete_dataset_handler))
        .route("/ingest/stats/:dataset_id", get(ingest_stats_handler))
        .route("/build/start", post(build_start_handler))
        .route("/build/progress/:dataset_id", get(build_progress_handler).delete(build_clear_progress_handler))
        .route("/build/update-pages", post(build_update_pages_handler))
        .route("/search/", post(search_handler))
        .route("/search/nl-query", post(nl_query_handler))
        .route("/search/entity/:id/story", get(entity_story_handler))
        .route("/search/dataset/:id/summary", get(dataset_summary_handler))
        .route("/visualize/graph/:dataset_id", get(visualize_graph_handler))
        .route("/visualize/entity/:id", get(visualize_entity_handler))
        .route("/visualize/stats/:dataset_id", get(visualize_stats_handler))
        .route("/visualize/clusters/:dataset_id", get(visualize_clusters_handler))
        .route("/visualize/path", post(visualize_path_handler))
        .route("/backup/export/:dataset_id", get(export_handler))
        .route("/backup/import", post(import_handler))
}

#[derive(Debug, Serialize)]
struct StatsResponse {
    graph: crate::graph_store::GraphStats,
    vector: crate::vector_store::VectorStats,
}

async fn stats_handler(State(state): State<AppState>) -> AppResult<Json<StatsResponse>> {
    let graph = state.graph_store.stats(None).await?;
    let vector = state.vector_store.stats(None).await?;
    Ok(Json(StatsResponse { graph, vector }))
}

#[derive(Debug, Deserialize)]
struct ExtractPayload {
    dataset_id: String,
    text: String,
}

async fn extract_entities_handler(State(state): State<AppState>, Json(payload): Json<ExtractPayload>) -> AppResult<Json<Vec<Entity>>> {
    let out = extract_chunk(&state.llm_manager, &payload.dataset_id, &payload.text).await?;
    Ok(Json(out.entities))
}

async fn extract_relationships_handler(State(state): State<AppState>, Json(payload): Json<ExtractPayload>) -> AppResult<Json<Vec<Relationship>>> {
    let out = extract_chunk(&state.llm_manager, &payload.dataset_id, &payload.text).await?;
    Ok(Json(out.relationships))
}

#[derive(Debug, Serialize)]
struct ExtractAllResponse {
    entities: Vec<Entity>,
    relationships: Vec<Relationship>,
}

async fn extract_all_handler(State(state): State<AppState>, Json(payload): Json<ExtractPayload>) -> AppResult<Json<ExtractAllResponse>> {
    let out = extract_chunk(&state.llm_manager, &payload.dataset_id, &payload.text).await?;
    Ok(Json(ExtractAllResponse { entities: out.entities, relationships: out.relationships }))
}

#[derive(Debug, Deserialize)]
struct IngestEntitiesPayload {
    dataset_id: String,
    entities: Vec<Entity>,
}

async fn ingest_entities_handler(State(state): State<AppState>, Json(payload): Json<IngestEntitiesPayload>) -> AppResult<Json<Value>> {
    let report = state.graph_store.upsert_entities(&payload.entities, &payload.dataset_id).await?;
    state.vector_store.insert_batch(&payload.entities, &state.llm_manager).await?;
    Ok(Json(json!({ "written": report.written })))
}

#[derive(Debug, Deserialize)]
struct IngestRelationshipsPayload {
    dataset_id: String,
    relationships: Vec<Relationship>,
}

async fn ingest_relationships_handler(State(state): State<AppState>, Json(payload): Json<IngestRelationshipsPayload>) -> AppResult<Json<Value>> {
    let report = state.graph_store.upsert_relationships_by_id(&payload.relationships, &payload.dataset_id).await?;
    Ok(Json(json!({ "written": report.written, "dropped": report.dropped })))
}

#[derive(Debug, Deserialize)]
struct IngestDocumentPayload {
    dataset_id: String,
    document_id: String,
    text: String,
    #[serde(default = "default_chunk_size")]
    chunk_size: usize,
}

fn default_chunk_size() -> usize {
    1200
}

async fn ingest_document_handler(State(state): State<AppState>, Json(payload): Json<IngestDocumentPayload>) -> AppResult<Json<Value>> {
    let out = extract_chunk(&state.llm_manager, &payload.dataset_id, &payload.text).await?;
    let mut entities = out.entities;
    for e in entities.iter_mut() {
        e.source_document_id = Some(payload.document_id.clone());
    }
    state.graph_store.upsert_entities(&entities, &payload.dataset_id).await?;
    state.vector_store.insert_batch(&entities, &state.llm_manager).await?;

    let name_by_id: HashMap<&str, &str> = entities.iter().map(|e| (e.id.as_str(), e.name.as_str())).collect();
    let named: Vec<(Relationship, String, String)> = out
        .relationships
        .into_iter()
        .filter_map(|r| {
            let s = name_by_id.get(r.source_entity_id.as_str())?.to_string();
            let t = name_by_id.get(r.target_entity_id.as_str())?.to_string();
            Some((r, s, t))
        })
        .collect();
    let rel_report = state.graph_store.upsert_relationships(&named, &payload.dataset_id).await?;

    Ok(Json(json!({
        "entities_written": entities.len(),
        "relationships_written": rel_report.written,
        "relationships_dropped": rel_report.dropped,
    })))
}

#[derive(Debug, Deserialize)]
struct DeleteDatasetPayload {
    dataset_id: String,
}

async fn delete_dataset_handler(State(state): State<AppState>, Json(payload): Json<DeleteDatasetPayload>) -> AppResult<Json<Value>> {
    if payload.dataset_id.is_empty() {
        return Err(AppError::Validation("dataset_id is required".to_string()));
    }
    let deleted = state.graph_store.delete_dataset(&payload.dataset_id).await?;
    state.vector_store.delete_by_dataset(&payload.dataset_id).await?;
    Ok(Json(json!({ "deleted_entities": deleted })))
}

async fn ingest_stats_handler(State(state): State<AppState>, Path(dataset_id): Path<String>) -> AppResult<Json<StatsResponse>> {
    let graph = state.graph_store.stats(Some(&dataset_id)).await?;
    let vector = state.vector_store.stats(Some(&dataset_id)).await?;
    Ok(Json(StatsResponse { graph, vector }))
}

#[derive(Debug, Deserialize)]
struct BuildStartPayload {
    dataset_id: String,
    #[serde(default = "default_chunk_size")]
    chunk_size: usize,
    #[serde(default)]
    resume: bool,
    #[serde(default)]
    use_high_fidelity_parser: bool,
    #[serde(default)]
    documents: Vec<BuildDocumentPayload>,
}

#[derive(Debug, Deserialize)]
struct BuildDocumentPayload {
    document_id: String,
    #[serde(default)]
    is_pdf: bool,
    #[serde(default)]
    segments: Vec<String>,
}

async fn build_start_handler(State(state): State<AppState>, Json(payload): Json<BuildStartPayload>) -> AppResult<Json<Value>> {
    let documents: Vec<DocumentRef> = payload
        .documents
        .into_iter()
        .map(|d| DocumentRef {
            document_id: d.document_id,
            is_pdf: d.is_pdf,
            pdf_bytes: None,
            segments: d
                .segments
                .into_iter()
                .enumerate()
                .map(|(index, text)| crate::chunk_source::Segment { index, text })
                .collect(),
        })
        .collect();

    state
        .ingestion
        .start(
            payload.dataset_id,
            documents,
            BuildOptions { chunk_size: payload.chunk_size, resume: payload.resume, use_high_fidelity_parser: payload.use_high_fidelity_parser },
        )
        .await?;
    Ok(Json(json!({ "status": "started" })))
}

async fn build_progress_handler(State(state): State<AppState>, Path(dataset_id): Path<String>) -> AppResult<Json<BuildProgress>> {
    state
        .ingestion
        .get_progress(&dataset_id)
        .await
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("no build progress for dataset {dataset_id}")))
}

async fn build_clear_progress_handler(State(state): State<AppState>, Path(dataset_id): Path<String>) -> AppResult<Json<Value>> {
    state.ingestion.clear_progress(&dataset_id).await?;
    Ok(Json(json!({ "cleared": true })))
}

#[derive(Debug, Deserialize)]
struct UpdatePagesPayload {
    dataset_id: String,
    document_id: String,
    pages: Vec<String>,
    #[serde(default = "default_chunk_size")]
    chunk_size: usize,
}

async fn build_update_pages_handler(State(state): State<AppState>, Json(payload): Json<UpdatePagesPayload>) -> AppResult<Json<Value>> {
    let updated = state
        .ingestion
        .update_page_mapping(&payload.dataset_id, &payload.document_id, &payload.pages, payload.chunk_size)
        .await?;
    Ok(Json(json!({ "updated": updated })))
}

async fn search_handler(State(state): State<AppState>, Json(query): Json<SearchQuery>) -> AppResult<Json<crate::models::SearchResult>> {
    query.validate().map_err(AppError::Validation)?;
    let result = state.hybrid_search.search(&query).await?;
    Ok(Json(result))
}

#[derive(Debug, Deserialize)]
struct NlQueryPayload {
    question: String,
    dataset_id: Option<String>,
}

async fn nl_query_handler(State(state): State<AppState>, Json(payload): Json<NlQueryPayload>) -> AppResult<Json<Value>> {
    let graph = state.hybrid_search.search_with_nl_fallback(&payload.question, payload.dataset_id.as_deref()).await?;
    let answer = state.narrative.answer_question(&payload.question, &graph, None).await?;
    Ok(Json(json!(answer)))
}

#[derive(Debug, Deserialize)]
struct DepthQuery {
    #[serde(default = "default_story_depth")]
    max_depth: usize,
}

fn default_story_depth() -> usize {
    2
}

async fn entity_story_handler(State(state): State<AppState>, Path(id): Path<String>, Query(q): Query<DepthQuery>) -> AppResult<Json<crate::narrative::NarrativeAnswer>> {
    let entity = state
        .graph_store
        .get_entity(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("entity {id} not found")))?;
    let graph = state.graph_store.neighbors(&id, q.max_depth, 50).await?;
    let answer = state.narrative.answer_question(&format!("Tell me about {}", entity.name), &graph, None).await?;
    Ok(Json(answer))
}

async fn dataset_summary_handler(State(state): State<AppState>, Path(id): Path<String>) -> AppResult<Json<crate::narrative::NarrativeAnswer>> {
    let graph = state.graph_store.dataset_graph(&id, 50).await?;
    let answer = state.narrative.answer_question("Summarize this dataset", &graph, None).await?;
    Ok(Json(answer))
}

#[derive(Debug, Deserialize)]
struct LimitQuery {
    #[serde(default = "default_visualize_limit")]
    limit: usize,
}

fn default_visualize_limit() -> usize {
    100
}

async fn visualize_graph_handler(State(state): State<AppState>, Path(dataset_id): Path<String>, Query(q): Query<LimitQuery>) -> AppResult<Json<crate::models::GraphData>> {
    let graph = state.graph_store.dataset_graph(&dataset_id, q.limit).await?;
    Ok(Json(graph))
}

async fn visualize_entity_handler(State(state): State<AppState>, Path(id): Path<String>, Query(q): Query<DepthQuery>) -> AppResult<Json<crate::models::GraphData>> {
    let graph = state.graph_store.neighbors(&id, q.max_depth, 50).await?;
    Ok(Json(graph))
}

async fn visualize_stats_handler(State(state): State<AppState>, Path(dataset_id): Path<String>) -> AppResult<Json<crate::graph_store::GraphStats>> {
    let stats = state.graph_store.stats(Some(&dataset_id)).await?;
    Ok(Json(stats))
}

/// Clusters are approximated as the per-type grouping already captured in
/// `stats`'s type histogram — no separate community-detection pass is part
/// of this contract.
async fn visualize_clusters_handler(State(state): State<AppState>, Path(dataset_id): Path<String>) -> AppResult<Json<Value>> {
    let stats = state.graph_store.stats(Some(&dataset_id)).await?;
    Ok(Json(json!({ "clusters": stats.entity_types })))
}

#[derive(Debug, Deserialize)]
struct PathPayload {
    source_id: String,
    target_id: String,
    #[serde(default = "default_path_depth")]
    max_depth: usize,
}

fn default_path_depth() -> usize {
    3
}

async fn visualize_path_handler(State(state): State<AppState>, Json(payload): Json<PathPayload>) -> AppResult<Json<crate::models::GraphData>> {
    let subgraph = state.graph_store.neighbors(&payload.source_id, payload.max_depth, 200).await?;
    let reaches_target = subgraph.nodes.iter().any(|n| n.id == payload.target_id);
    if !reaches_target {
        return Err(AppError::NotFound(format!("no path found between {} and {}", payload.source_id, payload.target_id)));
    }
    Ok(Json(subgraph))
}

async fn export_handler(State(state): State<AppState>, Path(dataset_id): Path<String>) -> AppResult<Json<DatasetExport>> {
    let exported_at = chrono::Utc::now().to_rfc3339();
    let export = state.backup.export(&dataset_id, exported_at).await?;
    Ok(Json(export))
}

#[derive(Debug, Deserialize)]
struct ImportPayload {
    export: DatasetExport,
    target_dataset_id: Option<String>,
    #[serde(default)]
    merge: bool,
}

async fn import_handler(State(state): State<AppState>, mut multipart: Multipart) -> AppResult<Json<Value>> {
    let mut payload: Option<ImportPayload> = None;
    while let Some(field) = multipart.next_field().await.map_err(|e| AppError::Validation(e.to_string()))? {
        if field.name() == Some("file") || field.name() == Some("export") {
            let bytes = field.bytes().await.map_err(|e| AppError::Validation(e.to_string()))?;
            payload = Some(serde_json::from_slice(&bytes).map_err(|e| AppError::Validation(format!("invalid export payload: {e}")))?);
        }
    }
    let payload = payload.ok_or_else(|| AppError::Validation("missing import file part".to_string()))?;

    let report = state.backup.import(payload.export, payload.target_dataset_id, payload.merge, &state.llm_manager).await?;
    Ok(Json(json!(report)))
}
