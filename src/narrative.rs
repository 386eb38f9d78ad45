//! Narrative Generator (C8, spec §4.6): turns a subgraph into a grounded
//! answer plus an explanatory narrative, with resolved source documents.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use serde::Serialize;

use crate::error::AppResult;
use crate::llm::{LlmManager, TIMEOUT_ANSWER};
use crate::models::GraphData;

const ANSWER_SYSTEM_PROMPT: &str = r#"You are a precise knowledge-base assistant. Answer the question using only the
reference information and source documents provided. Use a professional, factual tone: state the key point first,
then supporting detail as a short list when useful. If the reference information does not cover the question, say
so plainly rather than guessing. Never echo internal identifiers (ids, hashes) in your answer — refer to entities and
documents by their human-readable names only."#;

const NARRATIVE_SYSTEM_PROMPT: &str = r#"You are a knowledge-base assistant producing a short explanatory narrative
from a set of entities and relationships. Summarize the key entities, then the relationships between them, in plain
prose. Be factual and concise. Never echo internal identifiers in the narrative."#;

#[derive(Debug, Clone, Serialize)]
pub struct SourceRef {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    pub description: Option<String>,
    pub source_document_id: Option<String>,
    pub source_document_name: Option<String>,
    pub source_chunk_id: Option<String>,
    pub source_page: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NarrativeAnswer {
    pub question: String,
    pub answer: String,
    pub narrative: String,
    pub graph: Option<GraphData>,
    pub sources: Vec<SourceRef>,
    pub cypher_query: Option<String>,
    pub processing_time_ms: f64,
}

/// Process-wide, eventually-consistent cache mapping a `source_document_id`
/// to its human-readable name (spec §5 "shared resources"). Populated on
/// demand; never invalidated. A document not yet seen resolves to its raw
/// id, which is an acceptable fallback per spec §5 ("document renames are
/// rare and sources also show raw ids as fallback").
#[derive(Clone, Default)]
pub struct DocumentNameCache {
    names: Arc<DashMap<String, String>>,
}

impl DocumentNameCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, document_id: impl Into<String>, name: impl Into<String>) {
        self.names.insert(document_id.into(), name.into());
    }

    pub fn resolve(&self, document_id: &str) -> String {
        self.names
            .get(document_id)
            .map(|n| n.clone())
            .unwrap_or_else(|| document_id.to_string())
    }
}

#[derive(Clone)]
pub struct NarrativeGenerator {
    llm: LlmManager,
    doc_names: DocumentNameCache,
}

impl NarrativeGenerator {
    pub fn new(llm: LlmManager, doc_names: DocumentNameCache) -> Self {
        Self { llm, doc_names }
    }

    /// Serializes `graph` into the compact textual form the grounded-answer
    /// and narrative prompts share: entities with types/descriptions, edges
    /// as `A --[type]--> B` (spec §4.6).
    fn format_graph(&self, graph: &GraphData) -> String {
        let node_names: HashMap<&str, &str> = graph.nodes.iter().map(|n| (n.id.as_str(), n.label.as_str())).collect();

        let mut lines = vec!["Entities:".to_string()];
        for node in graph.nodes.iter().take(20) {
            lines.push(format!("- {} (type: {})", node.label, node.node_type));
        }

        lines.push(String::new());
        lines.push("Relationships:".to_string());
        for edge in graph.edges.iter().take(30) {
            let source = node_names.get(edge.source.as_str()).copied().unwrap_or(&edge.source);
            let target = node_names.get(edge.target.as_str()).copied().unwrap_or(&edge.target);
            lines.push(format!("- {source} --[{}]--> {target}", edge.label));
        }
        lines.join("\n")
    }

    /// Answers `question` grounded in `graph`, given an optional generated
    /// Cypher query for traceability (spec §4.6 full contract).
    pub async fn answer_question(
        &self,
        question: &str,
        graph: &GraphData,
        cypher_query: Option<String>,
    ) -> AppResult<NarrativeAnswer> {
        let start = Instant::now();
        let graph_context = self.format_graph(graph);

        let sources: Vec<SourceRef> = graph
            .nodes
            .iter()
            .take(10)
            .map(|n| SourceRef {
                id: n.id.clone(),
                name: n.label.clone(),
                entity_type: n.node_type.clone(),
                description: None,
                source_document_id: None,
                source_document_name: None,
                source_chunk_id: None,
                source_page: None,
            })
            .collect();

        let answer_user_message = format!(
            "[Question]\n{question}\n\n[Reference information]\n{graph_context}\n\nWrite the answer now."
        );
        let answer = self
            .llm
            .complete(ANSWER_SYSTEM_PROMPT, &answer_user_message, None, TIMEOUT_ANSWER)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "failed to generate answer, returning a degraded response");
                "The answer could not be generated at this time.".to_string()
            });

        let narrative = self
            .llm
            .complete(NARRATIVE_SYSTEM_PROMPT, question, Some(&graph_context), TIMEOUT_ANSWER)
            .await
            .unwrap_or_default();

        Ok(NarrativeAnswer {
            question: question.to_string(),
            answer,
            narrative,
            graph: Some(graph.clone()),
            sources,
            cypher_query,
            processing_time_ms: start.elapsed().as_secs_f64() * 1000.0,
        })
    }

    /// Resolves `source_document_id` → human-readable name via the shared
    /// cache (spec §4.6 "assembles sources ... via the upstream DB adapter
    /// (cached)").
    pub fn resolve_source_names(&self, sources: &mut [SourceRef]) {
        for s in sources.iter_mut() {
            if let Some(doc_id) = &s.source_document_id {
                s.source_document_name = Some(self.doc_names.resolve(doc_id));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{GraphEdge, GraphNode};

    #[test]
    fn formats_graph_as_typed_entities_and_arrow_edges() {
        let llm = LlmManager { provider: crate::config::LlmProvider::OpenAI, embedding_model: String::new(), chat_model: String::new() };
        let gen = NarrativeGenerator::new(llm, DocumentNameCache::new());
        let graph = GraphData {
            nodes: vec![
                GraphNode { id: "1".into(), label: "Acme Corp".into(), node_type: "organization".into() },
                GraphNode { id: "2".into(), label: "Zurich".into(), node_type: "location".into() },
            ],
            edges: vec![GraphEdge { id: "e1".into(), source: "1".into(), target: "2".into(), label: "LOCATED_IN".into() }],
        };
        let text = gen.format_graph(&graph);
        assert!(text.contains("Acme Corp (type: organization)"));
        assert!(text.contains("Acme Corp --[LOCATED_IN]--> Zurich"));
    }

    #[test]
    fn document_name_cache_falls_back_to_raw_id() {
        let cache = DocumentNameCache::new();
        assert_eq!(cache.resolve("doc_123"), "doc_123");
        cache.insert("doc_123", "Policy Handbook");
        assert_eq!(cache.resolve("doc_123"), "Policy Handbook");
    }
}
