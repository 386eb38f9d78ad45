pub mod entity;
pub mod flow;
pub mod search;
pub mod session;

pub use entity::{derive_entity_id, derive_relationship_id, Entity, EntityType, Relationship, RelationshipType};
pub use flow::{Action, ActionType, Condition, ConditionType, EdgeType, FlowEdge, FlowGraph, Intent, Option_};
pub use search::{GraphData, GraphEdge, GraphNode, SearchMode, SearchQuery, SearchResult, SearchResultItem};
pub use session::{ConversationMessage, Session};
