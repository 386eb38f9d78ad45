//! Entity Extractor (C4, spec §4.4): turns a text chunk into a typed list of
//! entities and a typed list of relationships via two LLM prompts.

use serde::Deserialize;
use tracing::warn;

use crate::error::AppResult;
use crate::llm::{LlmManager, TIMEOUT_EXTRACT};
use crate::models::{derive_entity_id, derive_relationship_id, Entity, EntityType, Relationship, RelationshipType};

const ENTITY_SYSTEM_PROMPT: &str = r#"You extract named entities from a text chunk for a knowledge graph.
Classify each entity into exactly one of: person, organization, location, date, concept, product, event, technology, document, topic, other.
Respond with a JSON array only, no prose, no markdown fences. Each element:
{"name": "...", "type": "...", "description": "...", "aliases": ["..."]}
If you find nothing, respond with []."#;

const RELATIONSHIP_SYSTEM_PROMPT: &str = r#"You extract directed relationships between named entities already identified in a text chunk, for a knowledge graph.
Classify the relationship type into exactly one of: RELATED_TO, MENTIONS, WORKS_FOR, LOCATED_IN, PART_OF, CREATED_BY, BELONGS_TO, DEPENDS_ON, SIMILAR_TO, CAUSED_BY, LEADS_TO, CONTAINS, USES, IS_A, HAS, ABOUT, OTHER.
Respond with a JSON array only, no prose, no markdown fences. Each element:
{"source": "<entity name>", "target": "<entity name>", "type": "...", "description": "...", "weight": 1.0}
If you find nothing, respond with []."#;

#[derive(Debug, Deserialize)]
struct RawEntity {
    name: String,
    #[serde(default, rename = "type")]
    entity_type: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    aliases: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawRelationship {
    source: String,
    target: String,
    #[serde(default, rename = "type")]
    rel_type: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    weight: Option<f64>,
}

pub struct ExtractionOutput {
    pub entities: Vec<Entity>,
    pub relationships: Vec<Relationship>,
}

/// Extracts entities then relationships from `text`, stamping every entity
/// with `dataset_id` so ids derived via `derive_entity_id` are tenant-scoped
/// (I3). Every relationship's endpoints are resolved against the returned
/// entity set (§4.4 output contract); unresolved edges are dropped.
pub async fn extract_chunk(llm: &LlmManager, dataset_id: &str, text: &str) -> AppResult<ExtractionOutput> {
    let entities = extract_entities(llm, dataset_id, text).await?;
    let relationships = extract_relationships(llm, dataset_id, text, &entities).await?;
    Ok(ExtractionOutput { entities, relationships })
}

async fn extract_entities(llm: &LlmManager, dataset_id: &str, text: &str) -> AppResult<Vec<Entity>> {
    let response = llm
        .complete(ENTITY_SYSTEM_PROMPT, text, None, TIMEOUT_EXTRACT)
        .await?;

    let json = extract_first_json_array(&response).unwrap_or(response.as_str());
    let raw: Vec<RawEntity> = match serde_json::from_str(json) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, response = %response, "could not parse entity extraction JSON, skipping chunk");
            return Ok(Vec::new());
        }
    };

    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for r in raw {
        let name = r.name.trim().to_string();
        if name.is_empty() || !seen.insert(name.to_lowercase()) {
            continue;
        }
        let entity_type = EntityType::from_loose_str(&r.entity_type);
        let id = derive_entity_id(dataset_id, &name);
        out.push(Entity {
            id,
            name,
            entity_type,
            description: r.description.filter(|d| !d.trim().is_empty()),
            aliases: r.aliases,
            dataset_id: dataset_id.to_string(),
            source_document_id: None,
            source_chunk_id: None,
            source_page: None,
            confidence: 1.0,
        });
    }
    Ok(out)
}

async fn extract_relationships(
    llm: &LlmManager,
    dataset_id: &str,
    text: &str,
    entities: &[Entity],
) -> AppResult<Vec<Relationship>> {
    if entities.len() < 2 {
        return Ok(Vec::new());
    }
    let response = llm
        .complete(RELATIONSHIP_SYSTEM_PROMPT, text, None, TIMEOUT_EXTRACT)
        .await?;

    let json = extract_first_json_array(&response).unwrap_or(response.as_str());
    let raw: Vec<RawRelationship> = match serde_json::from_str(json) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, response = %response, "could not parse relationship extraction JSON, skipping chunk");
            return Ok(Vec::new());
        }
    };

    let mut out = Vec::new();
    for r in raw {
        let (Some(source), Some(target)) = (
            resolve_entity_name(entities, &r.source),
            resolve_entity_name(entities, &r.target),
        ) else {
            warn!(source = %r.source, target = %r.target, "dropping relationship with unresolved endpoint(s)");
            continue;
        };
        if source.id == target.id {
            continue;
        }
        let rel_type = RelationshipType::from_loose_str(&r.rel_type);
        let id = derive_relationship_id(&source.id, &target.id, rel_type);
        out.push(Relationship {
            id,
            source_entity_id: source.id.clone(),
            target_entity_id: target.id.clone(),
            rel_type,
            description: r.description.filter(|d| !d.trim().is_empty()),
            weight: r.weight.unwrap_or(1.0).max(0.0),
            confidence: 1.0,
            source_document_id: None,
            dataset_id: dataset_id.to_string(),
        });
    }
    Ok(out)
}

/// Case-insensitive exact match first, then case-insensitive substring
/// containment in either direction (spec §4.4 "Entity matching").
fn resolve_entity_name<'a>(entities: &'a [Entity], name: &str) -> Option<&'a Entity> {
    let want = name.trim().to_lowercase();
    if want.is_empty() {
        return None;
    }
    if let Some(e) = entities.iter().find(|e| e.name.to_lowercase() == want) {
        return Some(e);
    }
    entities.iter().find(|e| {
        let have = e.name.to_lowercase();
        have.contains(&want) || want.contains(&have)
    })
}

/// Locates the first balanced top-level `[...]` JSON array in `s`, tolerant
/// of fenced code blocks and trailing prose around it.
fn extract_first_json_array(s: &str) -> Option<&str> {
    let mut start: Option<usize> = None;
    let mut depth: i32 = 0;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in s.char_indices() {
        if start.is_none() {
            if ch == '[' {
                start = Some(i);
                depth = 1;
            }
            continue;
        }

        if in_string {
            if escaped {
                escaped = false;
            } else {
                match ch {
                    '\\' => escaped = true,
                    '"' => in_string = false,
                    _ => {}
                }
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            '[' => depth += 1,
            ']' => {
                depth -= 1;
                if depth == 0 {
                    let start = start.unwrap();
                    return Some(&s[start..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_array_from_fenced_response() {
        let s = "```json\n[{\"name\": \"Acme\"}]\n```";
        assert_eq!(extract_first_json_array(s).unwrap(), "[{\"name\": \"Acme\"}]");
    }

    #[test]
    fn extracts_array_despite_trailing_prose() {
        let s = "Sure, here you go: [1, 2, 3] hope that helps!";
        assert_eq!(extract_first_json_array(s).unwrap(), "[1, 2, 3]");
    }

    #[test]
    fn tolerates_brackets_inside_strings() {
        let s = r#"[{"name": "A [B] C"}]"#;
        assert_eq!(extract_first_json_array(s).unwrap(), s);
    }

    #[test]
    fn resolves_entity_name_case_insensitively_then_by_substring() {
        let entities = vec![
            Entity::new("ds1", "Acme Corp", EntityType::Organization),
            Entity::new("ds1", "Zurich", EntityType::Location),
        ];
        assert_eq!(resolve_entity_name(&entities, "acme corp").unwrap().name, "Acme Corp");
        assert_eq!(resolve_entity_name(&entities, "Acme").unwrap().name, "Acme Corp");
        assert!(resolve_entity_name(&entities, "Nonexistent").is_none());
    }
}
