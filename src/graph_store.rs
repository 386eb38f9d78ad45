//! Graph Store (C1, spec §4.2): CRUD over entities and relationships, text
//! search, neighborhood traversal, dataset-wide delete and statistics.

use std::collections::{HashMap, HashSet};

use neo4rs::{query, Graph};
use tracing::warn;

use crate::error::{AppError, AppResult};
use crate::models::{Entity, EntityType, GraphData, GraphEdge, GraphNode, Relationship, RelationshipType};

/// Cypher verbs NL→Q (§4.5) and `execute_query` (§4.2) must never let
/// through. Matched whole-word, case-insensitive (P6).
pub const MUTATING_VERBS: &[&str] = &["DELETE", "REMOVE", "DROP", "CREATE", "SET", "MERGE"];

pub fn contains_mutating_verb(cypher: &str) -> bool {
    let upper = cypher.to_uppercase();
    MUTATING_VERBS.iter().any(|kw| {
        // whole-word match: scan for kw bounded by non-alphanumeric on both sides
        let mut start = 0;
        while let Some(pos) = upper[start..].find(kw) {
            let abs = start + pos;
            let before_ok = abs == 0 || !upper.as_bytes()[abs - 1].is_ascii_alphanumeric();
            let after = abs + kw.len();
            let after_ok = after >= upper.len() || !upper.as_bytes()[after].is_ascii_alphanumeric();
            if before_ok && after_ok {
                return true;
            }
            start = abs + 1;
        }
        false
    })
}

#[derive(Debug, Default)]
pub struct UpsertEntitiesReport {
    pub written: usize,
}

#[derive(Debug, Default)]
pub struct UpsertRelationshipsReport {
    pub written: usize,
    pub dropped: usize,
}

#[derive(Debug, Default, serde::Serialize)]
pub struct GraphStats {
    pub entity_count: i64,
    pub relationship_count: i64,
    pub entity_types: HashMap<String, i64>,
}

#[derive(Clone)]
pub struct GraphStore {
    graph: Graph,
}

impl GraphStore {
    pub fn new(graph: Graph) -> Self {
        Self { graph }
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Idempotent insert-or-update keyed by `id` (I3).
    pub async fn upsert_entities(&self, entities: &[Entity], dataset_id: &str) -> AppResult<UpsertEntitiesReport> {
        if entities.is_empty() {
            return Ok(UpsertEntitiesReport::default());
        }
        for e in entities {
            self.graph
                .run(
                    query(
                        "MERGE (e:Entity {id: $id})
                         SET e.name = $name, e.type = $type, e.description = $description,
                             e.aliases = $aliases, e.dataset_id = $dataset_id,
                             e.source_document_id = $source_document_id,
                             e.source_chunk_id = $source_chunk_id,
                             e.source_page = $source_page, e.confidence = $confidence,
                             e.updated_at = datetime()",
                    )
                    .param("id", e.id.clone())
                    .param("name", e.name.clone())
                    .param("type", e.entity_type.as_str())
                    .param("description", e.description.clone().unwrap_or_default())
                    .param("aliases", e.aliases.clone())
                    .param("dataset_id", dataset_id)
                    .param("source_document_id", e.source_document_id.clone().unwrap_or_default())
                    .param("source_chunk_id", e.source_chunk_id.clone().unwrap_or_default())
                    .param("source_page", e.source_page.map(|p| p as i64).unwrap_or(-1))
                    .param("confidence", e.confidence),
                )
                .await?;
        }

        Ok(UpsertEntitiesReport { written: entities.len() })
    }

    /// Matches endpoints by case-insensitive name within the dataset (I1,
    /// spec §9 Open Question — behavior preserved from the source system).
    /// Edges whose endpoints cannot be matched are silently dropped and
    /// counted.
    pub async fn upsert_relationships(
        &self,
        relationships: &[(Relationship, String, String)], // (rel, source_name, target_name)
        dataset_id: &str,
    ) -> AppResult<UpsertRelationshipsReport> {
        let mut report = UpsertRelationshipsReport::default();
        for (rel, source_name, target_name) in relationships {
            let result = self
                .graph
                .execute(
                    query(
                        "MATCH (s:Entity {dataset_id: $dataset_id}) WHERE toLower(s.name) = toLower($source_name)
                         MATCH (t:Entity {dataset_id: $dataset_id}) WHERE toLower(t.name) = toLower($target_name)
                         MERGE (s)-[r:RELATES_TO {id: $id}]->(t)
                         SET r.type = $type, r.description = $description, r.weight = $weight,
                             r.confidence = $confidence, r.source_document_id = $source_document_id,
                             r.dataset_id = $dataset_id, r.updated_at = datetime()
                         RETURN r.id as id",
                    )
                    .param("dataset_id", dataset_id)
                    .param("source_name", source_name.as_str())
                    .param("target_name", target_name.as_str())
                    .param("id", rel.id.clone())
                    .param("type", rel.rel_type.as_str())
                    .param("description", rel.description.clone().unwrap_or_default())
                    .param("weight", rel.weight)
                    .param("confidence", rel.confidence)
                    .param("source_document_id", rel.source_document_id.clone().unwrap_or_default()),
                )
                .await?;
            let mut result = result;
            if result.next().await?.is_some() {
                report.written += 1;
            } else {
                warn!(source = %source_name, target = %target_name, "dropping relationship with unmatched endpoint(s)");
                report.dropped += 1;
            }
        }
        Ok(report)
    }

    pub async fn search_entities(
        &self,
        q: &str,
        dataset_id: Option<&str>,
        types: Option<&[String]>,
        source_document_id: Option<&str>,
        limit: usize,
    ) -> AppResult<Vec<Entity>> {
        let mut cypher = String::from(
            "MATCH (e:Entity) WHERE (toLower(e.name) CONTAINS toLower($q) OR toLower(e.description) CONTAINS toLower($q))",
        );
        if dataset_id.is_some() {
            cypher.push_str(" AND e.dataset_id = $dataset_id");
        }
        if types.is_some() {
            cypher.push_str(" AND e.type IN $types");
        }
        if source_document_id.is_some() {
            cypher.push_str(" AND e.source_document_id = $source_document_id");
        }
        cypher.push_str(" RETURN e ORDER BY e.confidence DESC LIMIT $limit");

        let mut built = query(&cypher).param("q", q).param("limit", limit as i64);
        if let Some(d) = dataset_id {
            built = built.param("dataset_id", d);
        }
        if let Some(t) = types {
            built = built.param("types", t.to_vec());
        }
        if let Some(s) = source_document_id {
            built = built.param("source_document_id", s);
        }

        let mut result = self.graph.execute(built).await?;
        let mut out = Vec::new();
        while let Some(row) = result.next().await? {
            if let Some(e) = row_to_entity(&row) {
                out.push(e);
            }
        }
        Ok(out)
    }

    /// Same match as `search_entities`, with short descriptions of incident
    /// edges concatenated as grounding context.
    pub async fn search_with_context(
        &self,
        q: &str,
        dataset_id: Option<&str>,
        types: Option<&[String]>,
        source_document_id: Option<&str>,
        limit: usize,
    ) -> AppResult<Vec<(Entity, String)>> {
        let entities = self.search_entities(q, dataset_id, types, source_document_id, limit).await?;
        let mut out = Vec::with_capacity(entities.len());
        for e in entities {
            let mut result = self
                .graph
                .execute(
                    query(
                        "MATCH (e:Entity {id: $id})-[r:RELATES_TO]-(other:Entity)
                         RETURN other.name as other_name, r.type as rel_type, r.description as rel_desc
                         LIMIT 5",
                    )
                    .param("id", e.id.clone()),
                )
                .await?;
            let mut snippets = Vec::new();
            while let Some(row) = result.next().await? {
                let other: String = row.get("other_name").unwrap_or_default();
                let rel_type: String = row.get("rel_type").unwrap_or_default();
                snippets.push(format!("{rel_type} {other}"));
            }
            let context = snippets.join("; ");
            out.push((e, context));
        }
        Ok(out)
    }

    /// BFS up to `max_depth`, returning a deduped subgraph (§4.2, §9 cyclic
    /// graphs — explicit visited set indexed by node id).
    pub async fn neighbors(&self, entity_id: &str, max_depth: usize, limit: usize) -> AppResult<GraphData> {
        let max_depth = max_depth.clamp(1, 5);
        let cypher = format!(
            "MATCH path = (start:Entity {{id: $entity_id}})-[r:RELATES_TO*1..{max_depth}]-(neighbor:Entity)
             WITH neighbor, relationships(path) as rels, length(path) as depth
             ORDER BY depth
             LIMIT $limit
             RETURN DISTINCT neighbor, rels"
        );
        let mut result = self
            .graph
            .execute(query(&cypher).param("entity_id", entity_id).param("limit", limit as i64))
            .await?;

        let mut nodes: HashMap<String, GraphNode> = HashMap::new();
        let mut seen_edges: HashSet<String> = HashSet::new();
        let mut edges = Vec::new();

        // The seed is always part of the visualized neighborhood.
        if let Some(seed) = self.get_entity(entity_id).await? {
            nodes.insert(
                seed.id.clone(),
                GraphNode {
                    id: seed.id.clone(),
                    label: seed.name.clone(),
                    node_type: seed.entity_type.as_str().to_string(),
                },
            );
        }

        while let Some(row) = result.next().await? {
            if let Some(neighbor_node) = row.get::<neo4rs::Node>("neighbor") {
                let id: String = neighbor_node.get("id").unwrap_or_default();
                let name: String = neighbor_node.get("name").unwrap_or_default();
                let ty: String = neighbor_node.get("type").unwrap_or_default();
                nodes.entry(id.clone()).or_insert(GraphNode {
                    id,
                    label: name,
                    node_type: ty,
                });
            }
            if let Some(rels) = row.get::<Vec<neo4rs::Relation>>("rels") {
                for rel in rels {
                    let rel_type: String = rel.get("type").unwrap_or_else(|| "RELATES_TO".to_string());
                    let edge_id = format!("{}_{}", rel.start_node_id(), rel.end_node_id());
                    if seen_edges.insert(edge_id.clone()) {
                        edges.push(GraphEdge {
                            id: edge_id,
                            source: rel.start_node_id().to_string(),
                            target: rel.end_node_id().to_string(),
                            label: rel_type,
                        });
                    }
                }
            }
        }

        Ok(GraphData {
            nodes: nodes.into_values().collect(),
            edges,
        })
    }

    /// All entities for a dataset, full objects (spec §6 export format),
    /// unlike `dataset_graph`'s sampled visualization subgraph.
    pub async fn export_entities(&self, dataset_id: &str) -> AppResult<Vec<Entity>> {
        let mut result = self
            .graph
            .execute(query("MATCH (e:Entity {dataset_id: $dataset_id}) RETURN e").param("dataset_id", dataset_id))
            .await?;
        let mut out = Vec::new();
        while let Some(row) = result.next().await? {
            if let Some(e) = row_to_entity(&row) {
                out.push(e);
            }
        }
        Ok(out)
    }

    /// All relationships for a dataset, full objects (spec §6 export
    /// format).
    pub async fn export_relationships(&self, dataset_id: &str) -> AppResult<Vec<Relationship>> {
        let mut result = self
            .graph
            .execute(
                query(
                    "MATCH (s:Entity {dataset_id: $dataset_id})-[r:RELATES_TO]->(t:Entity {dataset_id: $dataset_id})
                     RETURN r, s.id as source_id, t.id as target_id",
                )
                .param("dataset_id", dataset_id),
            )
            .await?;
        let mut out = Vec::new();
        while let Some(row) = result.next().await? {
            if let Some(rel) = row_to_relationship(&row) {
                out.push(rel);
            }
        }
        Ok(out)
    }

    /// Re-inserts relationships whose endpoints are already known by `id`
    /// (spec §6 import: export format carries `source_id`/`target_id`
    /// directly, unlike extraction output which only has names).
    pub async fn upsert_relationships_by_id(&self, relationships: &[Relationship], dataset_id: &str) -> AppResult<UpsertRelationshipsReport> {
        let mut report = UpsertRelationshipsReport::default();
        for rel in relationships {
            let mut result = self
                .graph
                .execute(
                    query(
                        "MATCH (s:Entity {id: $source_id}), (t:Entity {id: $target_id})
                         MERGE (s)-[r:RELATES_TO {id: $id}]->(t)
                         SET r.type = $type, r.description = $description, r.weight = $weight,
                             r.confidence = $confidence, r.source_document_id = $source_document_id,
                             r.dataset_id = $dataset_id, r.updated_at = datetime()
                         RETURN r.id as id",
                    )
                    .param("source_id", rel.source_entity_id.clone())
                    .param("target_id", rel.target_entity_id.clone())
                    .param("id", rel.id.clone())
                    .param("type", rel.rel_type.as_str())
                    .param("description", rel.description.clone().unwrap_or_default())
                    .param("weight", rel.weight)
                    .param("confidence", rel.confidence)
                    .param("source_document_id", rel.source_document_id.clone().unwrap_or_default())
                    .param("dataset_id", dataset_id),
                )
                .await?;
            if result.next().await?.is_some() {
                report.written += 1;
            } else {
                warn!(id = %rel.id, "dropping imported relationship with unmatched endpoint(s)");
                report.dropped += 1;
            }
        }
        Ok(report)
    }

    pub async fn get_entity(&self, entity_id: &str) -> AppResult<Option<Entity>> {
        let mut result = self
            .graph
            .execute(query("MATCH (e:Entity {id: $id}) RETURN e").param("id", entity_id))
            .await?;
        if let Some(row) = result.next().await? {
            Ok(row_to_entity(&row))
        } else {
            Ok(None)
        }
    }

    pub async fn dataset_graph(&self, dataset_id: &str, limit: usize) -> AppResult<GraphData> {
        let mut nodes_result = self
            .graph
            .execute(
                query("MATCH (e:Entity {dataset_id: $dataset_id}) RETURN e LIMIT $limit")
                    .param("dataset_id", dataset_id)
                    .param("limit", limit as i64),
            )
            .await?;
        let mut nodes = Vec::new();
        while let Some(row) = nodes_result.next().await? {
            if let Some(e) = row_to_entity(&row) {
                nodes.push(GraphNode {
                    id: e.id,
                    label: e.name,
                    node_type: e.entity_type.as_str().to_string(),
                });
            }
        }

        let mut edges_result = self
            .graph
            .execute(
                query(
                    "MATCH (s:Entity {dataset_id: $dataset_id})-[r:RELATES_TO]->(t:Entity {dataset_id: $dataset_id})
                     RETURN s.id as source, t.id as target, r.type as rel_type
                     LIMIT $limit",
                )
                .param("dataset_id", dataset_id)
                .param("limit", limit as i64),
            )
            .await?;
        let mut edges = Vec::new();
        while let Some(row) = edges_result.next().await? {
            let source: String = row.get("source").unwrap_or_default();
            let target: String = row.get("target").unwrap_or_default();
            let rel_type: String = row.get("rel_type").unwrap_or_default();
            edges.push(GraphEdge {
                id: format!("{source}_{target}"),
                source,
                target,
                label: rel_type,
            });
        }

        Ok(GraphData { nodes, edges })
    }

    pub async fn stats(&self, dataset_id: Option<&str>) -> AppResult<GraphStats> {
        let (entity_q, rel_q, type_q) = match dataset_id {
            Some(_) => (
                "MATCH (e:Entity {dataset_id: $dataset_id}) RETURN count(e) as c",
                "MATCH (:Entity {dataset_id: $dataset_id})-[r:RELATES_TO]->(:Entity {dataset_id: $dataset_id}) RETURN count(r) as c",
                "MATCH (e:Entity {dataset_id: $dataset_id}) RETURN e.type as t, count(e) as c",
            ),
            None => (
                "MATCH (e:Entity) RETURN count(e) as c",
                "MATCH (:Entity)-[r:RELATES_TO]->(:Entity) RETURN count(r) as c",
                "MATCH (e:Entity) RETURN e.type as t, count(e) as c",
            ),
        };

        let mk = |q: &str| match dataset_id {
            Some(d) => query(q).param("dataset_id", d),
            None => query(q),
        };

        let mut er = self.graph.execute(mk(entity_q)).await?;
        let entity_count: i64 = er.next().await?.and_then(|r| r.get("c")).unwrap_or(0);

        let mut rr = self.graph.execute(mk(rel_q)).await?;
        let relationship_count: i64 = rr.next().await?.and_then(|r| r.get("c")).unwrap_or(0);

        let mut tr = self.graph.execute(mk(type_q)).await?;
        let mut entity_types = HashMap::new();
        while let Some(row) = tr.next().await? {
            let t: String = row.get("t").unwrap_or_default();
            let c: i64 = row.get("c").unwrap_or(0);
            entity_types.insert(t, c);
        }

        Ok(GraphStats {
            entity_count,
            relationship_count,
            entity_types,
        })
    }

    /// Distinct `source_chunk_id` values already written for a dataset — the
    /// coarse basis for resume described in spec §4.1/§9. Superseded in
    /// practice by `is_chunk_processed`, kept for compatibility with direct
    /// inspection tooling.
    pub async fn processed_chunk_ids(&self, dataset_id: &str) -> AppResult<HashSet<String>> {
        let mut result = self
            .graph
            .execute(
                query(
                    "MATCH (e:Entity {dataset_id: $dataset_id}) WHERE e.source_chunk_id IS NOT NULL AND e.source_chunk_id <> ''
                     RETURN DISTINCT e.source_chunk_id as id",
                )
                .param("dataset_id", dataset_id),
            )
            .await?;
        let mut out = HashSet::new();
        while let Some(row) = result.next().await? {
            if let Some(id) = row.get::<String>("id") {
                out.insert(id);
            }
        }
        Ok(out)
    }

    /// Explicit completion marker (SPEC_FULL.md §3): written unconditionally
    /// after a chunk is processed, independent of whether it yielded any
    /// entities. Closes the resume-granularity gap flagged in spec §9.
    pub async fn mark_chunk_processed(&self, dataset_id: &str, chunk_id: &str) -> AppResult<()> {
        self.graph
            .run(
                query("MERGE (p:ProcessedChunk {id: $id}) SET p.dataset_id = $dataset_id")
                    .param("id", format!("{dataset_id}:{chunk_id}"))
                    .param("dataset_id", dataset_id),
            )
            .await?;
        Ok(())
    }

    pub async fn processed_chunk_markers(&self, dataset_id: &str) -> AppResult<HashSet<String>> {
        let mut result = self
            .graph
            .execute(
                query("MATCH (p:ProcessedChunk {dataset_id: $dataset_id}) RETURN p.id as id")
                    .param("dataset_id", dataset_id),
            )
            .await?;
        let prefix = format!("{dataset_id}:");
        let mut out = HashSet::new();
        while let Some(row) = result.next().await? {
            if let Some(id) = row.get::<String>("id") {
                out.insert(id.trim_start_matches(&prefix).to_string());
            }
        }
        Ok(out)
    }

    pub async fn delete_dataset(&self, dataset_id: &str) -> AppResult<i64> {
        let mut result = self
            .graph
            .execute(
                query(
                    "MATCH (e:Entity {dataset_id: $dataset_id}) WITH e, count(e) as total DETACH DELETE e RETURN total",
                )
                .param("dataset_id", dataset_id),
            )
            .await?;
        let deleted = result.next().await?.and_then(|r| r.get("total")).unwrap_or(0);
        self.graph
            .run(
                query("MATCH (p:ProcessedChunk {dataset_id: $dataset_id}) DETACH DELETE p")
                    .param("dataset_id", dataset_id),
            )
            .await?;
        Ok(deleted)
    }

    /// Re-derives `source_page` for every entity stamped with `chunk_id`
    /// without touching any other field (spec §4.1 `update_page_mapping`).
    /// Returns whether any entity was updated.
    pub async fn update_entity_source_page(&self, dataset_id: &str, chunk_id: &str, page: u32) -> AppResult<bool> {
        let mut result = self
            .graph
            .execute(
                query(
                    "MATCH (e:Entity {dataset_id: $dataset_id, source_chunk_id: $chunk_id})
                     SET e.source_page = $page
                     RETURN count(e) as c",
                )
                .param("dataset_id", dataset_id)
                .param("chunk_id", chunk_id)
                .param("page", page as i64),
            )
            .await?;
        let updated: i64 = result.next().await?.and_then(|r| r.get("c")).unwrap_or(0);
        Ok(updated > 0)
    }

    /// Opaque pass-through for NL→Q (§4.5, §4.2). Rejects any mutating verb
    /// (P6) before ever reaching the driver.
    pub async fn execute_query(&self, cypher: &str) -> AppResult<Vec<HashMap<String, serde_json::Value>>> {
        if contains_mutating_verb(cypher) {
            return Err(AppError::SafetyReject(format!(
                "query contains a mutating verb and was refused: {cypher}"
            )));
        }
        let mut result = self.graph.execute(query(cypher)).await?;
        let mut rows = Vec::new();
        while let Some(row) = result.next().await? {
            let mut map = HashMap::new();
            for key in row.keys() {
                if let Some(v) = row.get::<String>(key) {
                    map.insert(key.to_string(), serde_json::Value::String(v));
                } else if let Some(v) = row.get::<f64>(key) {
                    map.insert(key.to_string(), serde_json::json!(v));
                }
            }
            rows.push(map);
        }
        Ok(rows)
    }
}

fn row_to_entity(row: &neo4rs::Row) -> Option<Entity> {
    let node: neo4rs::Node = row.get("e")?;
    let id: String = node.get("id")?;
    let name: String = node.get("name").unwrap_or_default();
    let entity_type = EntityType::from_loose_str(&node.get::<String>("type").unwrap_or_default());
    let description = node.get::<String>("description").filter(|s| !s.is_empty());
    let aliases: Vec<String> = node.get("aliases").unwrap_or_default();
    let dataset_id: String = node.get("dataset_id").unwrap_or_default();
    let source_document_id = node.get::<String>("source_document_id").filter(|s| !s.is_empty());
    let source_chunk_id = node.get::<String>("source_chunk_id").filter(|s| !s.is_empty());
    let source_page = node.get::<i64>("source_page").filter(|p| *p >= 1).map(|p| p as u32);
    let confidence = node.get::<f64>("confidence").unwrap_or(1.0);

    Some(Entity {
        id,
        name,
        entity_type,
        description,
        aliases,
        dataset_id,
        source_document_id,
        source_chunk_id,
        source_page,
        confidence,
    })
}

fn row_to_relationship(row: &neo4rs::Row) -> Option<Relationship> {
    let rel: neo4rs::Relation = row.get("r")?;
    let id: String = rel.get("id")?;
    let source_entity_id: String = row.get("source_id")?;
    let target_entity_id: String = row.get("target_id")?;
    let rel_type = RelationshipType::from_loose_str(&rel.get::<String>("type").unwrap_or_default());
    let description = rel.get::<String>("description").filter(|s| !s.is_empty());
    let weight = rel.get::<f64>("weight").unwrap_or(1.0);
    let confidence = rel.get::<f64>("confidence").unwrap_or(1.0);
    let source_document_id = rel.get::<String>("source_document_id").filter(|s| !s.is_empty());
    let dataset_id: String = rel.get("dataset_id").unwrap_or_default();

    Some(Relationship {
        id,
        source_entity_id,
        target_entity_id,
        rel_type,
        description,
        weight,
        confidence,
        source_document_id,
        dataset_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_mutating_verbs_case_insensitively_as_whole_words() {
        assert!(contains_mutating_verb("MATCH (n) DETACH DELETE n"));
        assert!(contains_mutating_verb("match (n) set n.x = 1"));
        assert!(contains_mutating_verb("CREATE (n:Foo)"));
        assert!(!contains_mutating_verb("MATCH (n) WHERE n.name = 'created' RETURN n"));
    }

    #[test]
    fn allows_pure_read_queries() {
        assert!(!contains_mutating_verb("MATCH (e:Entity) RETURN e LIMIT 10"));
    }
}
