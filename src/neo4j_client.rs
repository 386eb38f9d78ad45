//! Low-level Neo4j connection and schema bootstrap, shared by the graph
//! store (C1), the flow store (C9), and the vector index (C2).

use crate::config::AppConfig;
use anyhow::Result;
use neo4rs::{query, Graph};
use tracing::info;
use url::Url;

pub async fn connect_from_config(cfg: &AppConfig) -> Result<Graph> {
    let url = Url::parse(&cfg.neo4j_uri)?;
    let host = url.host_str().unwrap_or("localhost");
    let port = url.port().unwrap_or(7687);
    let addr = format!("{host}:{port}");

    info!("connecting to Neo4j at {addr}...");
    let graph = Graph::new(&addr, &cfg.neo4j_user, &cfg.neo4j_password).await?;
    info!("Neo4j connection OK");
    Ok(graph)
}

/// Creates the constraints and indexes backing the knowledge graph (C1) and
/// the conversation flow graph (C9). Safe to run on every startup.
pub async fn ensure_schema(graph: &Graph) -> Result<()> {
    let statements = [
        // Entity.id unique, plus the composite-lookup indexes spec §4.2
        // requires: (dataset_id, name), (dataset_id, type),
        // (dataset_id, source_chunk_id).
        "CREATE CONSTRAINT entity_id IF NOT EXISTS FOR (e:Entity) REQUIRE e.id IS UNIQUE",
        "CREATE INDEX entity_name IF NOT EXISTS FOR (e:Entity) ON (e.name)",
        "CREATE INDEX entity_dataset IF NOT EXISTS FOR (e:Entity) ON (e.dataset_id)",
        "CREATE INDEX entity_dataset_type IF NOT EXISTS FOR (e:Entity) ON (e.dataset_id, e.type)",
        "CREATE INDEX entity_dataset_chunk IF NOT EXISTS FOR (e:Entity) ON (e.dataset_id, e.source_chunk_id)",
        "CREATE CONSTRAINT relationship_id IF NOT EXISTS FOR ()-[r:RELATES_TO]-() REQUIRE r.id IS UNIQUE",
        // Explicit per-chunk completion marker (SPEC_FULL.md §3, closes the
        // Open Question in spec.md §9 about resume granularity).
        "CREATE CONSTRAINT processed_chunk_id IF NOT EXISTS FOR (p:ProcessedChunk) REQUIRE p.id IS UNIQUE",
        // Flow-graph node labels (spec §3 "Flow Graph").
        "CREATE CONSTRAINT flow_intent_id IF NOT EXISTS FOR (n:FlowIntent) REQUIRE n.id IS UNIQUE",
        "CREATE CONSTRAINT flow_condition_id IF NOT EXISTS FOR (n:FlowCondition) REQUIRE n.id IS UNIQUE",
        "CREATE CONSTRAINT flow_action_id IF NOT EXISTS FOR (n:FlowAction) REQUIRE n.id IS UNIQUE",
        "CREATE INDEX flow_intent_active IF NOT EXISTS FOR (n:FlowIntent) ON (n.is_active)",
    ];

    for stmt in statements {
        graph.run(query(stmt)).await?;
    }

    info!("Neo4j schema ensured (constraints and indexes created).");
    Ok(())
}
