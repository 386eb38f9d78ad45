//! Dataset export/import (spec §6 "Export format v1.0"): a self-contained
//! JSON snapshot of one dataset's entities and relationships, round-
//! trippable through both stores (spec §8 P10).

use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::graph_store::GraphStore;
use crate::llm::LlmManager;
use crate::models::{Relationship, RelationshipType};
use crate::vector_store::VectorStore;

const EXPORT_FORMAT_VERSION: &str = "1.0";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportMetadata {
    pub version: String,
    pub exported_at: String,
    pub dataset_id: String,
    pub entity_count: usize,
    pub relationship_count: usize,
    pub platform: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationshipRecord {
    pub source_id: String,
    pub target_id: String,
    #[serde(rename = "type")]
    pub rel_type: String,
    pub properties: RelationshipProperties,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationshipProperties {
    pub id: String,
    pub description: Option<String>,
    pub weight: f64,
    pub confidence: f64,
    pub source_document_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetExport {
    pub metadata: ExportMetadata,
    pub entities: Vec<crate::models::Entity>,
    pub relationships: Vec<RelationshipRecord>,
}

#[derive(Debug, Default, Serialize)]
pub struct ImportReport {
    pub entities_imported: usize,
    pub relationships_imported: usize,
    pub relationships_dropped: usize,
}

fn relationship_to_record(rel: Relationship) -> RelationshipRecord {
    RelationshipRecord {
        source_id: rel.source_entity_id,
        target_id: rel.target_entity_id,
        rel_type: rel.rel_type.as_str().to_string(),
        properties: RelationshipProperties {
            id: rel.id,
            description: rel.description,
            weight: rel.weight,
            confidence: rel.confidence,
            source_document_id: rel.source_document_id,
        },
    }
}

fn record_to_relationship(record: RelationshipRecord, dataset_id: &str) -> Relationship {
    Relationship {
        id: record.properties.id,
        source_entity_id: record.source_id,
        target_entity_id: record.target_id,
        rel_type: RelationshipType::from_loose_str(&record.rel_type),
        description: record.properties.description,
        weight: record.properties.weight,
        confidence: record.properties.confidence,
        source_document_id: record.properties.source_document_id,
        dataset_id: dataset_id.to_string(),
    }
}

pub struct BackupManager {
    graph_store: GraphStore,
    vector_store: VectorStore,
}

impl BackupManager {
    pub fn new(graph_store: GraphStore, vector_store: VectorStore) -> Self {
        Self { graph_store, vector_store }
    }

    /// Builds the v1.0 export document for `dataset_id` (spec §6).
    /// `exported_at` is supplied by the caller since the engine never calls
    /// the system clock internally.
    pub async fn export(&self, dataset_id: &str, exported_at: String) -> AppResult<DatasetExport> {
        let entities = self.graph_store.export_entities(dataset_id).await?;
        let relationships = self.graph_store.export_relationships(dataset_id).await?;

        let metadata = ExportMetadata {
            version: EXPORT_FORMAT_VERSION.to_string(),
            exported_at,
            dataset_id: dataset_id.to_string(),
            entity_count: entities.len(),
            relationship_count: relationships.len(),
            platform: "graphrag".to_string(),
        };

        Ok(DatasetExport {
            metadata,
            entities,
            relationships: relationships.into_iter().map(relationship_to_record).collect(),
        })
    }

    /// Imports `export`, optionally onto a different dataset id. Idempotent:
    /// if `merge` is false, the target dataset is deleted from both stores
    /// first (spec §6 "Import is idempotent").
    pub async fn import(&self, export: DatasetExport, target_dataset_id: Option<String>, merge: bool, llm: &LlmManager) -> AppResult<ImportReport> {
        let dataset_id = target_dataset_id.unwrap_or(export.metadata.dataset_id.clone());
        if dataset_id.is_empty() {
            return Err(AppError::Validation("import requires a non-empty dataset_id".to_string()));
        }

        if !merge {
            self.graph_store.delete_dataset(&dataset_id).await?;
            self.vector_store.delete_by_dataset(&dataset_id).await?;
        }

        let mut entities = export.entities;
        for e in entities.iter_mut() {
            e.dataset_id = dataset_id.clone();
        }

        self.graph_store.upsert_entities(&entities, &dataset_id).await?;
        self.vector_store.insert_batch(&entities, llm).await?;

        let relationships: Vec<Relationship> = export
            .relationships
            .into_iter()
            .map(|r| record_to_relationship(r, &dataset_id))
            .collect();
        let rel_report = self.graph_store.upsert_relationships_by_id(&relationships, &dataset_id).await?;

        Ok(ImportReport {
            entities_imported: entities.len(),
            relationships_imported: rel_report.written,
            relationships_dropped: rel_report.dropped,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Entity, EntityType};

    #[test]
    fn relationship_round_trips_through_record() {
        let rel = Relationship {
            id: "rel_1".into(),
            source_entity_id: "e1".into(),
            target_entity_id: "e2".into(),
            rel_type: RelationshipType::WorksFor,
            description: Some("employment".into()),
            weight: 0.9,
            confidence: 0.8,
            source_document_id: Some("doc1".into()),
            dataset_id: "ds1".into(),
        };
        let record = relationship_to_record(rel.clone());
        let back = record_to_relationship(record, "ds1");
        assert_eq!(back.id, rel.id);
        assert_eq!(back.source_entity_id, rel.source_entity_id);
        assert_eq!(back.rel_type, rel.rel_type);
    }

    #[test]
    fn export_metadata_counts_match_payload_lengths() {
        let entities = vec![Entity::new("ds1", "Acme", EntityType::Organization)];
        let metadata = ExportMetadata {
            version: "1.0".into(),
            exported_at: "2026-01-01T00:00:00Z".into(),
            dataset_id: "ds1".into(),
            entity_count: entities.len(),
            relationship_count: 0,
            platform: "graphrag".into(),
        };
        assert_eq!(metadata.entity_count, 1);
    }
}
