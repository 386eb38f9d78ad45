//! Hybrid Search (C7, spec §4.5): end-to-end search from a query string to a
//! ranked list of entities, a subgraph for visualization, and a timing
//! report. Also hosts the NL→Cypher helper (§4.5 "Natural-language → graph
//! query") and its fallback chain.

use std::collections::HashMap;
use std::time::Instant;

use tracing::warn;

use crate::config::AppConfig;
use crate::error::AppResult;
use crate::graph_store::GraphStore;
use crate::llm::{LlmManager, TIMEOUT_CLASSIFY};
use crate::models::{GraphData, SearchMode, SearchQuery, SearchResult, SearchResultItem};
use crate::vector_store::VectorStore;

const NL_TO_CYPHER_SYSTEM_PROMPT: &str = r#"You are an expert at converting natural language questions into Neo4j Cypher queries.

Schema:
- Node label: Entity. Properties: id, name, type, description, aliases, dataset_id, source_document_id, confidence.
- Entity types: person, organization, location, date, concept, product, event, technology, document, topic, other.
- Relationship type: RELATES_TO. Properties: type, description, weight, confidence.
- Relationship type values (in the `type` property): RELATED_TO, MENTIONS, WORKS_FOR, LOCATED_IN, PART_OF, CREATED_BY, BELONGS_TO, DEPENDS_ON, SIMILAR_TO, CAUSED_BY, LEADS_TO, CONTAINS, USES, IS_A, HAS, ABOUT, OTHER.

Examples:
- "Show me all people" -> MATCH (e:Entity) WHERE e.type = 'person' RETURN e LIMIT 50
- "What is connected to X?" -> MATCH (e:Entity)-[r]-(other:Entity) WHERE e.name CONTAINS 'X' RETURN e, r, other LIMIT 100

Return ONLY the Cypher query, no explanation, no markdown fences."#;

/// Intermediate representation shared by the vector and graph legs before
/// RRF fusion (spec §4.5 step 2).
#[derive(Debug, Clone)]
struct RankedItem {
    id: String,
    name: String,
    entity_type: String,
    description: Option<String>,
    original_rank: usize,
    vector_score: Option<f64>,
    graph_confidence: Option<f64>,
    sources: Vec<&'static str>,
}

pub struct HybridSearch {
    graph_store: GraphStore,
    vector_store: VectorStore,
    llm: LlmManager,
    rrf_k: f64,
}

impl HybridSearch {
    pub fn new(graph_store: GraphStore, vector_store: VectorStore, llm: LlmManager, cfg: &AppConfig) -> Self {
        Self { graph_store, vector_store, llm, rrf_k: cfg.rrf_k }
    }

    pub fn graph_store(&self) -> &GraphStore {
        &self.graph_store
    }

    pub async fn search(&self, q: &SearchQuery) -> AppResult<SearchResult> {
        let start = Instant::now();

        let mut vector_items: Vec<RankedItem> = Vec::new();
        if matches!(q.mode, SearchMode::Vector | SearchMode::Hybrid) {
            let hits = self
                .vector_store
                .search(&q.query, q.dataset_id.as_deref(), Some(&q.entity_types), q.top_k * 2, &self.llm)
                .await?;
            vector_items = hits
                .into_iter()
                .enumerate()
                .map(|(rank, h)| RankedItem {
                    id: h.id,
                    name: h.name,
                    entity_type: h.entity_type,
                    description: h.description,
                    original_rank: rank,
                    vector_score: Some(h.score),
                    graph_confidence: None,
                    sources: vec!["vector"],
                })
                .collect();
        }

        let mut graph_items: Vec<RankedItem> = Vec::new();
        if matches!(q.mode, SearchMode::Graph | SearchMode::Hybrid) {
            let types = (!q.entity_types.is_empty()).then_some(q.entity_types.as_slice());
            let entities = self
                .graph_store
                .search_entities(&q.query, q.dataset_id.as_deref(), types, None, q.top_k * 2)
                .await?;
            graph_items = entities
                .into_iter()
                .enumerate()
                .map(|(rank, e)| RankedItem {
                    id: e.id,
                    name: e.name,
                    entity_type: e.entity_type.as_str().to_string(),
                    description: e.description,
                    original_rank: rank,
                    vector_score: None,
                    graph_confidence: Some(e.confidence),
                    sources: vec!["graph"],
                })
                .collect();
        }

        let mut combined = match q.mode {
            SearchMode::Hybrid => rrf_fuse(vector_items, graph_items, self.rrf_k),
            SearchMode::Vector => vector_items.into_iter().map(|i| (i.original_rank as f64 + 1.0, i)).collect(),
            SearchMode::Graph => graph_items.into_iter().map(|i| (i.original_rank as f64 + 1.0, i)).collect(),
        };
        combined.truncate(q.top_k);

        let result_items: Vec<SearchResultItem> = combined
            .into_iter()
            .map(|(score, item)| SearchResultItem {
                id: item.id,
                name: item.name,
                entity_type: item.entity_type,
                description: item.description,
                score,
                source: if item.sources.len() > 1 {
                    "hybrid".to_string()
                } else {
                    item.sources.first().copied().unwrap_or("unknown").to_string()
                },
            })
            .collect();

        let graph_data = if q.include_graph && !result_items.is_empty() {
            Some(self.graph_store.neighbors(&result_items[0].id, q.max_graph_depth, 50).await?)
        } else {
            None
        };

        Ok(SearchResult {
            query: q.query.clone(),
            mode: q.mode,
            total_count: result_items.len(),
            results: result_items,
            graph: graph_data,
            processing_time_ms: start.elapsed().as_secs_f64() * 1000.0,
        })
    }

    /// Hybrid mode with `include_graph=true` (spec §4.5 "Expansion variant").
    pub async fn search_with_expansion(
        &self,
        query_text: &str,
        dataset_id: Option<&str>,
        top_k: usize,
        expansion_depth: usize,
    ) -> AppResult<SearchResult> {
        self.search(&SearchQuery {
            query: query_text.to_string(),
            mode: SearchMode::Hybrid,
            dataset_id: dataset_id.map(|s| s.to_string()),
            entity_types: Vec::new(),
            top_k,
            include_graph: true,
            max_graph_depth: expansion_depth,
        })
        .await
    }

    /// Converts `question` to Cypher via the LLM, rejects anything carrying
    /// a mutating verb, and executes it through C1's safety gate. Returns
    /// `None` on LLM failure, refusal, or zero rows — the caller is expected
    /// to fall back per spec §4.5.
    pub async fn nl_to_cypher(&self, question: &str, dataset_id: Option<&str>) -> Option<(String, Vec<HashMap<String, serde_json::Value>>)> {
        let mut prompt = format!("Question: {question}\n");
        if let Some(d) = dataset_id {
            prompt.push_str(&format!("Filter by dataset_id: {d}\n"));
        }
        let raw = match self.llm.complete(NL_TO_CYPHER_SYSTEM_PROMPT, &prompt, None, TIMEOUT_CLASSIFY).await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "NL-to-Cypher LLM call failed");
                return None;
            }
        };
        let cypher = clean_cypher(&raw)?;
        match self.graph_store.execute_query(&cypher).await {
            Ok(rows) if !rows.is_empty() => Some((cypher, rows)),
            Ok(_) => None,
            Err(e) => {
                warn!(error = %e, cypher = %cypher, "generated Cypher query was refused or failed");
                None
            }
        }
    }

    /// Full fallback chain (spec §4.5 "Result mode"): NL→Q seeding
    /// neighborhood expansion, else hybrid search, else raw graph text
    /// search on keyword-stemmed tokens, else the dataset sample graph.
    pub async fn search_with_nl_fallback(&self, question: &str, dataset_id: Option<&str>) -> AppResult<GraphData> {
        if let Some((_, rows)) = self.nl_to_cypher(question, dataset_id).await {
            if let Some(first) = rows.first() {
                if let Some(serde_json::Value::String(id)) = first.get("id").or_else(|| first.get("e.id")) {
                    return self.graph_store.neighbors(id, 2, 50).await;
                }
            }
        }

        let hybrid = self
            .search(&SearchQuery {
                query: question.to_string(),
                mode: SearchMode::Hybrid,
                dataset_id: dataset_id.map(|s| s.to_string()),
                entity_types: Vec::new(),
                top_k: 10,
                include_graph: true,
                max_graph_depth: 2,
            })
            .await?;
        if let Some(g) = hybrid.graph {
            if !g.nodes.is_empty() {
                return Ok(g);
            }
        }

        for keyword in stem_keywords(question) {
            let hits = self.graph_store.search_entities(&keyword, dataset_id, None, None, 10).await?;
            if let Some(first) = hits.first() {
                return self.graph_store.neighbors(&first.id, 2, 50).await;
            }
        }

        match dataset_id {
            Some(d) => self.graph_store.dataset_graph(d, 50).await,
            None => Ok(GraphData::default()),
        }
    }
}

/// Strips a leading/trailing code fence, then refuses anything containing a
/// mutating verb (spec §4.5, mirrors C1's `contains_mutating_verb`).
fn clean_cypher(raw: &str) -> Option<String> {
    let mut s = raw.trim();
    if let Some(rest) = s.strip_prefix("```cypher") {
        s = rest;
    } else if let Some(rest) = s.strip_prefix("```") {
        s = rest;
    }
    let s = s.strip_suffix("```").unwrap_or(s).trim();
    if s.is_empty() || crate::graph_store::contains_mutating_verb(s) {
        return None;
    }
    Some(s.to_string())
}

/// Strips common English question words/particles, returning 3-5 content
/// keywords (spec §4.8 `execute` state reuses the same pipeline).
pub fn stem_keywords(question: &str) -> Vec<String> {
    const STOPWORDS: &[&str] = &[
        "what", "is", "the", "are", "a", "an", "of", "to", "for", "in", "on", "do", "does", "i",
        "how", "can", "please", "tell", "me", "about", "my", "and", "or", "it", "this", "that",
    ];
    let words: Vec<String> = question
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .filter(|w| !STOPWORDS.contains(&w.as_str()) && w.len() > 2)
        .collect();
    let mut seen = std::collections::HashSet::new();
    let mut out: Vec<String> = Vec::new();
    for w in words {
        if seen.insert(w.clone()) {
            out.push(w);
        }
        if out.len() >= 5 {
            break;
        }
    }
    out
}

/// Reciprocal Rank Fusion: `score = Σ 1 / (K + rank + 1)` across lists an
/// item appears in (spec §4.5 step 2). Tie-break: original vector rank,
/// then graph confidence (step 5).
fn rrf_fuse(vector_items: Vec<RankedItem>, graph_items: Vec<RankedItem>, k: f64) -> Vec<(f64, RankedItem)> {
    let mut merged: HashMap<String, RankedItem> = HashMap::new();
    let mut scores: HashMap<String, f64> = HashMap::new();

    for item in vector_items {
        let rrf = 1.0 / (k + item.original_rank as f64 + 1.0);
        *scores.entry(item.id.clone()).or_insert(0.0) += rrf;
        merged
            .entry(item.id.clone())
            .and_modify(|existing| existing.sources.push("vector"))
            .or_insert(item);
    }
    for item in graph_items {
        let rrf = 1.0 / (k + item.original_rank as f64 + 1.0);
        *scores.entry(item.id.clone()).or_insert(0.0) += rrf;
        merged
            .entry(item.id.clone())
            .and_modify(|existing| {
                existing.sources.push("graph");
                existing.graph_confidence = existing.graph_confidence.or(item.graph_confidence);
            })
            .or_insert(item);
    }

    let mut out: Vec<(f64, RankedItem)> = merged
        .into_iter()
        .map(|(id, item)| (*scores.get(&id).unwrap_or(&0.0), item))
        .collect();
    out.sort_by(|(score_a, a), (score_b, b)| {
        score_b
            .partial_cmp(score_a)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.original_rank.cmp(&b.original_rank))
            .then_with(|| {
                b.graph_confidence
                    .partial_cmp(&a.graph_confidence)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
    });
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, rank: usize, sources: &[&'static str]) -> RankedItem {
        RankedItem {
            id: id.to_string(),
            name: id.to_string(),
            entity_type: "concept".to_string(),
            description: None,
            original_rank: rank,
            vector_score: None,
            graph_confidence: None,
            sources: sources.to_vec(),
        }
    }

    #[test]
    fn items_in_both_lists_rank_above_single_source_items() {
        let vector = vec![item("a", 0, &["vector"]), item("b", 1, &["vector"])];
        let graph = vec![item("a", 2, &["graph"]), item("c", 0, &["graph"])];
        let fused = rrf_fuse(vector, graph, 60.0);
        assert_eq!(fused[0].1.id, "a");
        assert_eq!(fused[0].1.sources, vec!["vector", "graph"]);
    }

    #[test]
    fn clean_cypher_rejects_mutating_queries() {
        assert!(clean_cypher("MATCH (n) DETACH DELETE n").is_none());
        assert_eq!(clean_cypher("```cypher\nMATCH (e) RETURN e\n```").unwrap(), "MATCH (e) RETURN e");
    }

    #[test]
    fn stem_keywords_drops_stopwords() {
        let kws = stem_keywords("What are the exclusions for my policy?");
        assert!(kws.contains(&"exclusions".to_string()));
        assert!(kws.contains(&"policy".to_string()));
        assert!(!kws.contains(&"what".to_string()));
    }
}
