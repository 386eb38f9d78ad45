//! Vector Store (C2, spec §4.3): a Neo4j-native vector index over entity
//! embeddings, with `dataset_id`/`entity_type` metadata filters.
//!
//! Kept on Neo4j rather than introducing a second database (see
//! DESIGN.md) — the teacher crate already demonstrates the
//! index-creation/insert/ANN-query pattern on `neo4rs`, generalized here
//! from `:Chunk` to `:Entity`.

use neo4rs::{query, Graph};
use serde::{Deserialize, Serialize};

use crate::config::AppConfig;
use crate::error::AppResult;
use crate::llm::LlmManager;
use crate::models::Entity;

const INDEX_NAME: &str = "entityEmbeddingIndex";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorHit {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    pub description: Option<String>,
    pub dataset_id: String,
    pub score: f64,
}

#[derive(Debug, Default, Serialize)]
pub struct VectorStats {
    pub vector_count: i64,
}

#[derive(Clone)]
pub struct VectorStore {
    graph: Graph,
    dim: usize,
}

impl VectorStore {
    pub fn new(graph: Graph, dim: usize) -> Self {
        Self { graph, dim }
    }

    /// Creates `entityEmbeddingIndex` on `:Entity(embedding)` if absent. Safe
    /// to call on every startup.
    pub async fn ensure_index(&self) -> AppResult<()> {
        let mut cursor = self
            .graph
            .execute(
                query("SHOW VECTOR INDEXES YIELD name WHERE name = $name RETURN name").param("name", INDEX_NAME),
            )
            .await?;
        if cursor.next().await?.is_some() {
            return Ok(());
        }

        let cypher = format!(
            "CREATE VECTOR INDEX {INDEX_NAME}
             FOR (e:Entity)
             ON (e.embedding)
             OPTIONS {{
               indexConfig: {{
                 `vector.dimensions`: {dim},
                 `vector.similarity_function`: 'cosine'
               }}
             }}",
            dim = self.dim
        );
        self.graph.run(query(&cypher)).await?;
        tracing::info!(index = INDEX_NAME, dim = self.dim, "vector index ensured");
        Ok(())
    }

    /// Embeds `"{name}: {description}"` per entity via C3 and writes the
    /// vector onto the matching `:Entity` node. Idempotent by `id` — this is
    /// a plain overwrite, not an append.
    pub async fn insert_batch(&self, entities: &[Entity], llm: &LlmManager) -> AppResult<usize> {
        if entities.is_empty() {
            return Ok(0);
        }
        let texts: Vec<(String, String)> = entities
            .iter()
            .map(|e| {
                let desc = e.description.clone().unwrap_or_default();
                (e.id.clone(), format!("{}: {}", e.name, desc))
            })
            .collect();
        let embedded = llm.embed_chunks(&texts).await?;

        for chunk in &embedded {
            self.graph
                .run(
                    query("MATCH (e:Entity {id: $id}) SET e.embedding = $embedding")
                        .param("id", chunk.id.clone())
                        .param("embedding", chunk.vector.clone()),
                )
                .await?;
        }
        Ok(embedded.len())
    }

    pub async fn search(
        &self,
        query_text: &str,
        dataset_id: Option<&str>,
        types: Option<&[String]>,
        top_k: usize,
        llm: &LlmManager,
    ) -> AppResult<Vec<VectorHit>> {
        let query_vec = llm.embed_query(query_text).await?;

        // Over-fetch past top_k since metadata filters are applied after the
        // ANN call, matching how Neo4j's vector procedure works (it has no
        // native pre-filter).
        let fetch_k = (top_k * 4).max(top_k);
        let mut cursor = self
            .graph
            .execute(
                query(
                    "CALL db.index.vector.queryNodes($index_name, $k, $embedding)
                     YIELD node, score
                     RETURN node.id as id, node.name as name, node.type as type,
                            node.description as description, node.dataset_id as dataset_id, score
                     ORDER BY score DESC",
                )
                .param("index_name", INDEX_NAME)
                .param("k", fetch_k as i64)
                .param("embedding", query_vec),
            )
            .await?;

        let mut out = Vec::new();
        while let Some(row) = cursor.next().await? {
            let id: String = row.get("id").unwrap_or_default();
            let name: String = row.get("name").unwrap_or_default();
            let entity_type: String = row.get("type").unwrap_or_default();
            let description: Option<String> = row.get::<String>("description").filter(|s| !s.is_empty());
            let hit_dataset_id: String = row.get("dataset_id").unwrap_or_default();
            let score: f64 = row.get("score").unwrap_or(0.0);

            if let Some(d) = dataset_id {
                if hit_dataset_id != d {
                    continue;
                }
            }
            if let Some(t) = types {
                if !t.iter().any(|want| want.eq_ignore_ascii_case(&entity_type)) {
                    continue;
                }
            }

            out.push(VectorHit {
                id,
                name,
                entity_type,
                description,
                dataset_id: hit_dataset_id,
                score,
            });
            if out.len() >= top_k {
                break;
            }
        }
        Ok(out)
    }

    pub async fn delete_by_dataset(&self, dataset_id: &str) -> AppResult<()> {
        self.graph
            .run(
                query("MATCH (e:Entity {dataset_id: $dataset_id}) REMOVE e.embedding")
                    .param("dataset_id", dataset_id),
            )
            .await?;
        Ok(())
    }

    pub async fn stats(&self, dataset_id: Option<&str>) -> AppResult<VectorStats> {
        let cypher = match dataset_id {
            Some(_) => "MATCH (e:Entity {dataset_id: $dataset_id}) WHERE e.embedding IS NOT NULL RETURN count(e) as c",
            None => "MATCH (e:Entity) WHERE e.embedding IS NOT NULL RETURN count(e) as c",
        };
        let built = match dataset_id {
            Some(d) => query(cypher).param("dataset_id", d),
            None => query(cypher),
        };
        let mut cursor = self.graph.execute(built).await?;
        let vector_count = cursor.next().await?.and_then(|r| r.get("c")).unwrap_or(0);
        Ok(VectorStats { vector_count })
    }
}

pub fn dim_from_config(cfg: &AppConfig) -> usize {
    cfg.embedding_dim
}
