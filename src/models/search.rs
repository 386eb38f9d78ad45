//! Search/visualization request and response payloads (spec §4.5, §6).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    Vector,
    Graph,
    Hybrid,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchQuery {
    pub query: String,
    #[serde(default = "default_mode")]
    pub mode: SearchMode,
    pub dataset_id: Option<String>,
    #[serde(default)]
    pub entity_types: Vec<String>,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default)]
    pub include_graph: bool,
    #[serde(default = "default_depth")]
    pub max_graph_depth: usize,
}

fn default_mode() -> SearchMode {
    SearchMode::Hybrid
}
fn default_top_k() -> usize {
    10
}
fn default_depth() -> usize {
    2
}

impl SearchQuery {
    pub fn validate(&self) -> Result<(), String> {
        if self.query.trim().is_empty() {
            return Err("query must not be empty".into());
        }
        if !(1..=100).contains(&self.top_k) {
            return Err("top_k must be in 1..=100".into());
        }
        if !(1..=5).contains(&self.max_graph_depth) {
            return Err("max_graph_depth must be in 1..=5".into());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResultItem {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    pub description: Option<String>,
    pub score: f64,
    /// "vector" | "graph" | "hybrid"
    pub source: String,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct GraphNode {
    pub id: String,
    pub label: String,
    #[serde(rename = "type")]
    pub node_type: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct GraphEdge {
    pub id: String,
    pub source: String,
    pub target: String,
    pub label: String,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct GraphData {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub query: String,
    pub mode: SearchMode,
    pub results: Vec<SearchResultItem>,
    pub graph: Option<GraphData>,
    pub total_count: usize,
    pub processing_time_ms: f64,
}
