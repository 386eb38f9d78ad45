//! Conversation flow-graph domain types (spec §3 "Flow Graph", §4.7).
//!
//! Mirrors the entity/relationship schema's shape but for the
//! Intent/Condition/Action/FlowEdge nodes that the conversation engine (C11)
//! walks. Authored once per deployment via the flow-store CRUD endpoints;
//! never written by the query path.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionType {
    SelectOne,
    SelectMulti,
    TextInput,
    DateInput,
    NumberInput,
    YesNo,
    AutoExtract,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    GraphSearch,
    VectorSearch,
    HybridSearch,
    LlmGenerate,
    ApiCall,
    Clarify,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EdgeType {
    #[serde(rename = "REQUIRES")]
    Requires,
    #[serde(rename = "NEXT")]
    Next,
    #[serde(rename = "BRANCH")]
    Branch,
    #[serde(rename = "SATISFIED")]
    Satisfied,
    #[serde(rename = "LEADS_TO")]
    LeadsTo,
}

impl EdgeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Requires => "REQUIRES",
            Self::Next => "NEXT",
            Self::Branch => "BRANCH",
            Self::Satisfied => "SATISFIED",
            Self::LeadsTo => "LEADS_TO",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "REQUIRES" => Some(Self::Requires),
            "NEXT" => Some(Self::Next),
            "BRANCH" => Some(Self::Branch),
            "SATISFIED" => Some(Self::Satisfied),
            "LEADS_TO" => Some(Self::LeadsTo),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Intent {
    pub id: String,
    pub name: String,
    pub display_name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub examples: Vec<String>,
    #[serde(default)]
    pub priority: i64,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Option_ {
    pub value: String,
    pub label: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    pub id: String,
    pub name: String,
    pub display_name: String,
    pub condition_type: ConditionType,
    pub question_template: String,
    pub options: Option<Vec<Option_>>,
    /// Either an opaque Cypher query string, or a `DYNAMIC:<source>` marker
    /// (recognized sources: `dify_documents`, `neo4j_entity_types`).
    pub options_source: Option<String>,
    #[serde(default = "default_true")]
    pub is_required: bool,
    #[serde(default)]
    pub order: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub id: String,
    pub name: String,
    pub action_type: ActionType,
    #[serde(default)]
    pub config: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowEdge {
    pub id: String,
    pub source_node_id: String,
    pub target_node_id: String,
    pub edge_type: EdgeType,
    /// Pure boolean expression over `collected_values ∪ {intent}`, present
    /// only on BRANCH edges (I5).
    pub condition_expr: Option<String>,
    #[serde(default)]
    pub order: i64,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct FlowGraph {
    pub intents: Vec<Intent>,
    pub conditions: Vec<Condition>,
    pub actions: Vec<Action>,
    pub edges: Vec<FlowEdge>,
}
