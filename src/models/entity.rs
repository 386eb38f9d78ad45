//! Entity and relationship domain types (spec §3).

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Closed set of entity categories. The extractor coerces anything the LLM
/// invents outside of this list to `Other` rather than failing the chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Person,
    Organization,
    Location,
    Date,
    Concept,
    Product,
    Event,
    Technology,
    Document,
    Topic,
    Other,
}

impl EntityType {
    pub fn from_loose_str(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "person" => Self::Person,
            "organization" | "org" => Self::Organization,
            "location" | "place" => Self::Location,
            "date" => Self::Date,
            "concept" => Self::Concept,
            "product" => Self::Product,
            "event" => Self::Event,
            "technology" | "tech" => Self::Technology,
            "document" => Self::Document,
            "topic" => Self::Topic,
            _ => Self::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Person => "person",
            Self::Organization => "organization",
            Self::Location => "location",
            Self::Date => "date",
            Self::Concept => "concept",
            Self::Product => "product",
            Self::Event => "event",
            Self::Technology => "technology",
            Self::Document => "document",
            Self::Topic => "topic",
            Self::Other => "other",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationshipType {
    RelatedTo,
    Mentions,
    WorksFor,
    LocatedIn,
    PartOf,
    CreatedBy,
    BelongsTo,
    DependsOn,
    SimilarTo,
    CausedBy,
    LeadsTo,
    Contains,
    Uses,
    IsA,
    Has,
    About,
    Other,
}

impl RelationshipType {
    pub fn from_loose_str(s: &str) -> Self {
        match s.trim().to_uppercase().as_str() {
            "RELATED_TO" => Self::RelatedTo,
            "MENTIONS" => Self::Mentions,
            "WORKS_FOR" => Self::WorksFor,
            "LOCATED_IN" => Self::LocatedIn,
            "PART_OF" => Self::PartOf,
            "CREATED_BY" => Self::CreatedBy,
            "BELONGS_TO" => Self::BelongsTo,
            "DEPENDS_ON" => Self::DependsOn,
            "SIMILAR_TO" => Self::SimilarTo,
            "CAUSED_BY" => Self::CausedBy,
            "LEADS_TO" => Self::LeadsTo,
            "CONTAINS" => Self::Contains,
            "USES" => Self::Uses,
            "IS_A" => Self::IsA,
            "HAS" => Self::Has,
            "ABOUT" => Self::About,
            _ => Self::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RelatedTo => "RELATED_TO",
            Self::Mentions => "MENTIONS",
            Self::WorksFor => "WORKS_FOR",
            Self::LocatedIn => "LOCATED_IN",
            Self::PartOf => "PART_OF",
            Self::CreatedBy => "CREATED_BY",
            Self::BelongsTo => "BELONGS_TO",
            Self::DependsOn => "DEPENDS_ON",
            Self::SimilarTo => "SIMILAR_TO",
            Self::CausedBy => "CAUSED_BY",
            Self::LeadsTo => "LEADS_TO",
            Self::Contains => "CONTAINS",
            Self::Uses => "USES",
            Self::IsA => "IS_A",
            Self::Has => "HAS",
            Self::About => "ABOUT",
            Self::Other => "OTHER",
        }
    }
}

/// Derives a stable id per spec I3: `hash(dataset_id ∥ normalized_name)`.
pub fn derive_entity_id(dataset_id: &str, name: &str) -> String {
    let normalized = name.trim().to_lowercase();
    let mut hasher = Sha256::new();
    hasher.update(dataset_id.as_bytes());
    hasher.update(b"\0");
    hasher.update(normalized.as_bytes());
    let digest = hasher.finalize();
    format!("ent_{:x}", digest)
}

pub fn derive_relationship_id(source_id: &str, target_id: &str, rel_type: RelationshipType) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_id.as_bytes());
    hasher.update(b"\0");
    hasher.update(target_id.as_bytes());
    hasher.update(b"\0");
    hasher.update(rel_type.as_str().as_bytes());
    let digest = hasher.finalize();
    format!("rel_{:x}", digest)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    pub description: Option<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
    pub dataset_id: String,
    pub source_document_id: Option<String>,
    pub source_chunk_id: Option<String>,
    pub source_page: Option<u32>,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

fn default_confidence() -> f64 {
    1.0
}

impl Entity {
    pub fn new(dataset_id: impl Into<String>, name: impl Into<String>, entity_type: EntityType) -> Self {
        let dataset_id = dataset_id.into();
        let name = name.into();
        let id = derive_entity_id(&dataset_id, &name);
        Self {
            id,
            name,
            entity_type,
            description: None,
            aliases: Vec::new(),
            dataset_id,
            source_document_id: None,
            source_chunk_id: None,
            source_page: None,
            confidence: 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    pub id: String,
    pub source_entity_id: String,
    pub target_entity_id: String,
    #[serde(rename = "type")]
    pub rel_type: RelationshipType,
    pub description: Option<String>,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    pub source_document_id: Option<String>,
    pub dataset_id: String,
}

fn default_weight() -> f64 {
    1.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_id_is_stable_and_case_insensitive() {
        let a = derive_entity_id("ds1", "Acme Corp");
        let b = derive_entity_id("ds1", "acme corp");
        let c = derive_entity_id("ds1", "  Acme Corp  ");
        assert_eq!(a, b);
        assert_eq!(a, c);
    }

    #[test]
    fn entity_id_differs_across_datasets() {
        let a = derive_entity_id("ds1", "Acme Corp");
        let b = derive_entity_id("ds2", "Acme Corp");
        assert_ne!(a, b);
    }

    #[test]
    fn unknown_entity_type_coerces_to_other() {
        assert_eq!(EntityType::from_loose_str("spaceship"), EntityType::Other);
    }

    #[test]
    fn unknown_relationship_type_coerces_to_related_to_other() {
        assert_eq!(RelationshipType::from_loose_str("FLIBBERTIGIBBET"), RelationshipType::Other);
    }
}
