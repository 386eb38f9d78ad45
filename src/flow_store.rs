//! Flow Store (C9, spec §4.7): CRUD over the conversation flow graph
//! (Intent/Condition/Action/FlowEdge), intent matching, and BRANCH-aware
//! condition traversal.
//!
//! Node labels: `FlowIntent`, `FlowCondition`, `FlowAction`. Edge types:
//! `REQUIRES`, `NEXT`, `BRANCH`, `SATISFIED`, `LEADS_TO` (spec §3).

use std::collections::HashMap;

use neo4rs::{query, Graph};
use serde_json::Value;

use crate::error::{AppError, AppResult};
use crate::expr::{self, Ctx};
use crate::models::{Action, ActionType, Condition, ConditionType, EdgeType, FlowEdge, FlowGraph, Intent, Option_};

#[derive(Clone)]
pub struct FlowStore {
    graph: Graph,
}

impl FlowStore {
    pub fn new(graph: Graph) -> Self {
        Self { graph }
    }

    // -----------------------------------------------------------------
    // Intent
    // -----------------------------------------------------------------

    pub async fn create_intent(&self, intent: &Intent) -> AppResult<()> {
        self.graph
            .run(
                query(
                    "MERGE (n:FlowIntent {id: $id})
                     SET n.name = $name, n.display_name = $display_name, n.description = $description,
                         n.keywords = $keywords, n.examples = $examples, n.priority = $priority,
                         n.is_active = $is_active, n.updated_at = datetime()",
                )
                .param("id", intent.id.clone())
                .param("name", intent.name.clone())
                .param("display_name", intent.display_name.clone())
                .param("description", intent.description.clone().unwrap_or_default())
                .param("keywords", intent.keywords.clone())
                .param("examples", intent.examples.clone())
                .param("priority", intent.priority)
                .param("is_active", intent.is_active),
            )
            .await?;
        Ok(())
    }

    pub async fn get_intent(&self, id: &str) -> AppResult<Option<Intent>> {
        let mut result = self
            .graph
            .execute(query("MATCH (n:FlowIntent {id: $id}) RETURN n").param("id", id))
            .await?;
        Ok(result.next().await?.and_then(|row| row_to_intent(&row)))
    }

    pub async fn list_intents(&self, active_only: bool) -> AppResult<Vec<Intent>> {
        let cypher = if active_only {
            "MATCH (n:FlowIntent) WHERE n.is_active = true RETURN n ORDER BY n.priority DESC, n.name"
        } else {
            "MATCH (n:FlowIntent) RETURN n ORDER BY n.priority DESC, n.name"
        };
        let mut result = self.graph.execute(query(cypher)).await?;
        let mut out = Vec::new();
        while let Some(row) = result.next().await? {
            if let Some(i) = row_to_intent(&row) {
                out.push(i);
            }
        }
        Ok(out)
    }

    /// Case-insensitive keyword containment, highest priority first (spec
    /// §4.7).
    pub async fn match_intent(&self, message: &str) -> AppResult<Option<Intent>> {
        let lowered = message.to_lowercase();
        let mut result = self
            .graph
            .execute(query("MATCH (n:FlowIntent) WHERE n.is_active = true RETURN n ORDER BY n.priority DESC"))
            .await?;
        while let Some(row) = result.next().await? {
            if let Some(intent) = row_to_intent(&row) {
                if intent.keywords.iter().any(|k| lowered.contains(&k.to_lowercase())) {
                    return Ok(Some(intent));
                }
            }
        }
        Ok(None)
    }

    pub async fn delete_intent(&self, id: &str) -> AppResult<bool> {
        let mut result = self
            .graph
            .execute(
                query("MATCH (n:FlowIntent {id: $id}) DETACH DELETE n RETURN count(n) as deleted").param("id", id),
            )
            .await?;
        let deleted: i64 = result.next().await?.and_then(|r| r.get("deleted")).unwrap_or(0);
        Ok(deleted > 0)
    }

    // -----------------------------------------------------------------
    // Condition
    // -----------------------------------------------------------------

    pub async fn create_condition(&self, condition: &Condition) -> AppResult<()> {
        let options_json = condition
            .options
            .as_ref()
            .map(|o| serde_json::to_string(o).unwrap_or_default());
        self.graph
            .run(
                query(
                    "MERGE (n:FlowCondition {id: $id})
                     SET n.name = $name, n.display_name = $display_name, n.condition_type = $condition_type,
                         n.question_template = $question_template, n.options = $options,
                         n.options_source = $options_source, n.is_required = $is_required, n.order = $order,
                         n.updated_at = datetime()",
                )
                .param("id", condition.id.clone())
                .param("name", condition.name.clone())
                .param("display_name", condition.display_name.clone())
                .param("condition_type", condition_type_str(condition.condition_type))
                .param("question_template", condition.question_template.clone())
                .param("options", options_json.unwrap_or_default())
                .param("options_source", condition.options_source.clone().unwrap_or_default())
                .param("is_required", condition.is_required)
                .param("order", condition.order),
            )
            .await?;
        Ok(())
    }

    pub async fn get_condition(&self, id: &str) -> AppResult<Option<Condition>> {
        let mut result = self
            .graph
            .execute(query("MATCH (n:FlowCondition {id: $id}) RETURN n").param("id", id))
            .await?;
        Ok(result.next().await?.and_then(|row| row_to_condition(&row)))
    }

    pub async fn conditions_for_intent(&self, intent_id: &str) -> AppResult<Vec<Condition>> {
        let mut result = self
            .graph
            .execute(
                query(
                    "MATCH (i:FlowIntent {id: $intent_id})-[:REQUIRES]->(c:FlowCondition)
                     RETURN c ORDER BY c.order",
                )
                .param("intent_id", intent_id),
            )
            .await?;
        let mut out = Vec::new();
        while let Some(row) = result.next().await? {
            if let Some(c) = row_to_condition(&row) {
                out.push(c);
            }
        }
        Ok(out)
    }

    /// Looks up a condition by its stable `name` (distinct from `id`),
    /// regardless of which intent it belongs to — used by `check_conditions`
    /// to find the canonical product-selection condition (spec §4.8).
    pub async fn condition_by_name(&self, name: &str) -> AppResult<Option<Condition>> {
        let mut result = self
            .graph
            .execute(query("MATCH (n:FlowCondition {name: $name}) RETURN n LIMIT 1").param("name", name))
            .await?;
        Ok(result.next().await?.and_then(|row| row_to_condition(&row)))
    }

    pub async fn delete_condition(&self, id: &str) -> AppResult<bool> {
        let mut result = self
            .graph
            .execute(
                query("MATCH (n:FlowCondition {id: $id}) DETACH DELETE n RETURN count(n) as deleted").param("id", id),
            )
            .await?;
        let deleted: i64 = result.next().await?.and_then(|r| r.get("deleted")).unwrap_or(0);
        Ok(deleted > 0)
    }

    /// Targets of NEXT/BRANCH edges from `current_condition_id`, with BRANCH
    /// edges pruned by evaluating `condition_expr` against `collected_values
    /// ∪ {intent}` (spec §4.7, I5).
    pub async fn next_conditions(
        &self,
        current_condition_id: &str,
        collected_values: &HashMap<String, Value>,
        current_intent: Option<&str>,
    ) -> AppResult<Vec<Condition>> {
        let mut result = self
            .graph
            .execute(
                query(
                    "MATCH (c:FlowCondition {id: $condition_id})-[r:NEXT|BRANCH]->(next:FlowCondition)
                     RETURN next, r.condition_expr as branch_expr, type(r) as rel_type
                     ORDER BY r.order",
                )
                .param("condition_id", current_condition_id),
            )
            .await?;

        let ctx = Ctx {
            collected_values,
            intent: current_intent,
        };

        let mut out = Vec::new();
        while let Some(row) = result.next().await? {
            let rel_type: String = row.get("rel_type").unwrap_or_default();
            if rel_type == "BRANCH" {
                let expr: Option<String> = row.get::<String>("branch_expr").filter(|s| !s.is_empty());
                if let Some(expr) = expr {
                    match expr::evaluate(&expr, &ctx) {
                        Ok(true) => {}
                        Ok(false) => continue,
                        Err(e) => {
                            tracing::warn!(expr = %expr, error = %e, "BRANCH condition failed to evaluate, pruning edge");
                            continue;
                        }
                    }
                }
            }
            if let Some(node) = row.get::<neo4rs::Node>("next") {
                if let Some(c) = node_to_condition(&node) {
                    out.push(c);
                }
            }
        }
        Ok(out)
    }

    // -----------------------------------------------------------------
    // Action
    // -----------------------------------------------------------------

    pub async fn create_action(&self, action: &Action) -> AppResult<()> {
        self.graph
            .run(
                query(
                    "MERGE (n:FlowAction {id: $id})
                     SET n.name = $name, n.action_type = $action_type, n.config = $config,
                         n.updated_at = datetime()",
                )
                .param("id", action.id.clone())
                .param("name", action.name.clone())
                .param("action_type", action_type_str(action.action_type))
                .param("config", action.config.to_string()),
            )
            .await?;
        Ok(())
    }

    pub async fn get_action(&self, id: &str) -> AppResult<Option<Action>> {
        let mut result = self
            .graph
            .execute(query("MATCH (n:FlowAction {id: $id}) RETURN n").param("id", id))
            .await?;
        Ok(result.next().await?.and_then(|row| row_to_action(&row)))
    }

    pub async fn action_for_condition(&self, condition_id: &str) -> AppResult<Option<Action>> {
        let mut result = self
            .graph
            .execute(
                query("MATCH (c:FlowCondition {id: $condition_id})-[:SATISFIED]->(a:FlowAction) RETURN a")
                    .param("condition_id", condition_id),
            )
            .await?;
        Ok(result.next().await?.and_then(|row| row_to_action(&row)))
    }

    pub async fn delete_action(&self, id: &str) -> AppResult<bool> {
        let mut result = self
            .graph
            .execute(
                query("MATCH (n:FlowAction {id: $id}) DETACH DELETE n RETURN count(n) as deleted").param("id", id),
            )
            .await?;
        let deleted: i64 = result.next().await?.and_then(|r| r.get("deleted")).unwrap_or(0);
        Ok(deleted > 0)
    }

    // -----------------------------------------------------------------
    // Edge
    // -----------------------------------------------------------------

    pub async fn create_edge(&self, edge: &FlowEdge) -> AppResult<()> {
        let edge_type = edge.edge_type.as_str();
        let cypher = format!(
            "MATCH (source) WHERE source.id = $source_id
             MATCH (target) WHERE target.id = $target_id
             MERGE (source)-[r:{edge_type} {{id: $id}}]->(target)
             SET r.condition_expr = $condition_expr, r.order = $order, r.updated_at = datetime()
             RETURN r.id as id"
        );
        let mut result = self
            .graph
            .execute(
                query(&cypher)
                    .param("id", edge.id.clone())
                    .param("source_id", edge.source_node_id.clone())
                    .param("target_id", edge.target_node_id.clone())
                    .param("condition_expr", edge.condition_expr.clone().unwrap_or_default())
                    .param("order", edge.order),
            )
            .await?;
        if result.next().await?.is_none() {
            return Err(AppError::InternalInvariant(format!(
                "edge {} could not be created: endpoint(s) not found",
                edge.id
            )));
        }
        Ok(())
    }

    pub async fn delete_edge(&self, id: &str) -> AppResult<bool> {
        let mut result = self
            .graph
            .execute(query("MATCH ()-[r {id: $id}]->() DELETE r RETURN count(r) as deleted").param("id", id))
            .await?;
        let deleted: i64 = result.next().await?.and_then(|r| r.get("deleted")).unwrap_or(0);
        Ok(deleted > 0)
    }

    // -----------------------------------------------------------------
    // Whole-graph read and seed data
    // -----------------------------------------------------------------

    pub async fn flow_graph(&self) -> AppResult<FlowGraph> {
        let intents = self.list_intents(false).await?;

        let mut conditions_cursor = self.graph.execute(query("MATCH (n:FlowCondition) RETURN n")).await?;
        let mut conditions = Vec::new();
        while let Some(row) = conditions_cursor.next().await? {
            if let Some(c) = row_to_condition(&row) {
                conditions.push(c);
            }
        }

        let mut actions_cursor = self.graph.execute(query("MATCH (n:FlowAction) RETURN n")).await?;
        let mut actions = Vec::new();
        while let Some(row) = actions_cursor.next().await? {
            if let Some(a) = row_to_action(&row) {
                actions.push(a);
            }
        }

        let mut edges_cursor = self
            .graph
            .execute(query(
                "MATCH (s)-[r]->(t)
                 WHERE (s:FlowIntent OR s:FlowCondition OR s:FlowAction)
                   AND (t:FlowIntent OR t:FlowCondition OR t:FlowAction)
                 RETURN r.id as id, s.id as source, t.id as target, type(r) as rel_type,
                        r.condition_expr as condition_expr, r.order as order",
            ))
            .await?;
        let mut edges = Vec::new();
        while let Some(row) = edges_cursor.next().await? {
            let Some(edge_type) = EdgeType::from_str(&row.get::<String>("rel_type").unwrap_or_default()) else {
                continue;
            };
            edges.push(FlowEdge {
                id: row.get("id").unwrap_or_default(),
                source_node_id: row.get("source").unwrap_or_default(),
                target_node_id: row.get("target").unwrap_or_default(),
                edge_type,
                condition_expr: row.get::<String>("condition_expr").filter(|s| !s.is_empty()),
                order: row.get("order").unwrap_or(0),
            });
        }

        Ok(FlowGraph { intents, conditions, actions, edges })
    }

    /// Loads a canonical worked example: an insurance-claim intent with a
    /// product-selection condition, a claim-reason condition, and a
    /// BRANCH-only cancellation path that asks for the subscription period
    /// (grounded on the source system's seed data, reauthored here in
    /// English and decoupled from any specific domain vocabulary).
    pub async fn seed_canonical_flow(&self) -> AppResult<()> {
        let intent_claim = Intent {
            id: "intent_claim".into(),
            name: "file_claim".into(),
            display_name: "File an insurance claim".into(),
            description: Some("Questions about filing and receiving a claim payout".into()),
            keywords: vec!["claim".into(), "payout".into(), "file".into(), "reimbursement".into()],
            examples: vec!["How do I file a claim?".into(), "What do I need to get my payout?".into()],
            priority: 10,
            is_active: true,
        };
        let intent_cancel = Intent {
            id: "intent_cancel".into(),
            name: "surrender_value".into(),
            display_name: "Surrender value".into(),
            description: Some("Questions about cancelling a policy and its surrender value".into()),
            keywords: vec!["cancel".into(), "surrender".into(), "refund".into()],
            examples: vec!["How much would I get back if I cancel?".into()],
            priority: 8,
            is_active: true,
        };
        self.create_intent(&intent_claim).await?;
        self.create_intent(&intent_cancel).await?;

        let cond_product = Condition {
            id: "cond_product".into(),
            name: "product_type".into(),
            display_name: "Product".into(),
            condition_type: ConditionType::SelectOne,
            question_template: "Which policy is this about?".into(),
            options: None,
            options_source: Some("DYNAMIC:dify_documents".into()),
            is_required: true,
            order: 1,
        };
        let cond_reason = Condition {
            id: "cond_reason".into(),
            name: "claim_reason".into(),
            display_name: "Reason".into(),
            condition_type: ConditionType::SelectOne,
            question_template: "What is the reason for the claim?".into(),
            options: Some(vec![
                Option_ { value: "death".into(), label: "Death".into() },
                Option_ { value: "disability".into(), label: "Disability".into() },
                Option_ { value: "hospitalization".into(), label: "Hospitalization".into() },
                Option_ { value: "surgery".into(), label: "Surgery".into() },
                Option_ { value: "diagnosis".into(), label: "Diagnosis".into() },
            ]),
            options_source: None,
            is_required: true,
            order: 2,
        };
        let cond_period = Condition {
            id: "cond_period".into(),
            name: "subscription_period".into(),
            display_name: "Subscription period".into(),
            condition_type: ConditionType::SelectOne,
            question_template: "How long have you held this policy?".into(),
            options: Some(vec![
                Option_ { value: "under_1y".into(), label: "Under 1 year".into() },
                Option_ { value: "1y_3y".into(), label: "1 to 3 years".into() },
                Option_ { value: "3y_5y".into(), label: "3 to 5 years".into() },
                Option_ { value: "over_5y".into(), label: "Over 5 years".into() },
            ]),
            options_source: None,
            is_required: true,
            order: 1,
        };
        self.create_condition(&cond_product).await?;
        self.create_condition(&cond_reason).await?;
        self.create_condition(&cond_period).await?;

        let action_search = Action {
            id: "action_search_answer".into(),
            name: "search_and_answer".into(),
            action_type: ActionType::HybridSearch,
            config: serde_json::json!({
                "search_template": "{product_type} {claim_reason} claim payout",
                "include_graph": true,
            }),
        };
        self.create_action(&action_search).await?;

        self.create_edge(&FlowEdge {
            id: "edge_claim_product".into(),
            source_node_id: "intent_claim".into(),
            target_node_id: "cond_product".into(),
            edge_type: EdgeType::Requires,
            condition_expr: None,
            order: 1,
        })
        .await?;
        self.create_edge(&FlowEdge {
            id: "edge_product_reason".into(),
            source_node_id: "cond_product".into(),
            target_node_id: "cond_reason".into(),
            edge_type: EdgeType::Next,
            condition_expr: None,
            order: 1,
        })
        .await?;
        self.create_edge(&FlowEdge {
            id: "edge_reason_action".into(),
            source_node_id: "cond_reason".into(),
            target_node_id: "action_search_answer".into(),
            edge_type: EdgeType::Satisfied,
            condition_expr: None,
            order: 1,
        })
        .await?;
        self.create_edge(&FlowEdge {
            id: "edge_cancel_product".into(),
            source_node_id: "intent_cancel".into(),
            target_node_id: "cond_product".into(),
            edge_type: EdgeType::Requires,
            condition_expr: None,
            order: 1,
        })
        .await?;
        self.create_edge(&FlowEdge {
            id: "edge_product_period".into(),
            source_node_id: "cond_product".into(),
            target_node_id: "cond_period".into(),
            edge_type: EdgeType::Branch,
            condition_expr: Some("intent == 'surrender_value'".into()),
            order: 2,
        })
        .await?;

        tracing::info!("seeded canonical conversation flow");
        Ok(())
    }
}

fn condition_type_str(t: ConditionType) -> &'static str {
    match t {
        ConditionType::SelectOne => "select_one",
        ConditionType::SelectMulti => "select_multi",
        ConditionType::TextInput => "text_input",
        ConditionType::DateInput => "date_input",
        ConditionType::NumberInput => "number_input",
        ConditionType::YesNo => "yes_no",
        ConditionType::AutoExtract => "auto_extract",
    }
}

fn condition_type_from_str(s: &str) -> ConditionType {
    match s {
        "select_multi" => ConditionType::SelectMulti,
        "text_input" => ConditionType::TextInput,
        "date_input" => ConditionType::DateInput,
        "number_input" => ConditionType::NumberInput,
        "yes_no" => ConditionType::YesNo,
        "auto_extract" => ConditionType::AutoExtract,
        _ => ConditionType::SelectOne,
    }
}

fn action_type_str(t: ActionType) -> &'static str {
    match t {
        ActionType::GraphSearch => "graph_search",
        ActionType::VectorSearch => "vector_search",
        ActionType::HybridSearch => "hybrid_search",
        ActionType::LlmGenerate => "llm_generate",
        ActionType::ApiCall => "api_call",
        ActionType::Clarify => "clarify",
    }
}

fn action_type_from_str(s: &str) -> ActionType {
    match s {
        "graph_search" => ActionType::GraphSearch,
        "vector_search" => ActionType::VectorSearch,
        "llm_generate" => ActionType::LlmGenerate,
        "api_call" => ActionType::ApiCall,
        "clarify" => ActionType::Clarify,
        _ => ActionType::HybridSearch,
    }
}

fn row_to_intent(row: &neo4rs::Row) -> Option<Intent> {
    let node: neo4rs::Node = row.get("n")?;
    node_to_intent(&node)
}

fn node_to_intent(node: &neo4rs::Node) -> Option<Intent> {
    Some(Intent {
        id: node.get("id")?,
        name: node.get("name").unwrap_or_default(),
        display_name: node.get("display_name").unwrap_or_default(),
        description: node.get::<String>("description").filter(|s| !s.is_empty()),
        keywords: node.get("keywords").unwrap_or_default(),
        examples: node.get("examples").unwrap_or_default(),
        priority: node.get("priority").unwrap_or(0),
        is_active: node.get("is_active").unwrap_or(true),
    })
}

fn row_to_condition(row: &neo4rs::Row) -> Option<Condition> {
    let node: neo4rs::Node = row.get("n")?;
    node_to_condition(&node)
}

fn node_to_condition(node: &neo4rs::Node) -> Option<Condition> {
    let options_json: Option<String> = node.get::<String>("options").filter(|s| !s.is_empty());
    let options = options_json.and_then(|s| serde_json::from_str(&s).ok());
    Some(Condition {
        id: node.get("id")?,
        name: node.get("name").unwrap_or_default(),
        display_name: node.get("display_name").unwrap_or_default(),
        condition_type: condition_type_from_str(&node.get::<String>("condition_type").unwrap_or_default()),
        question_template: node.get("question_template").unwrap_or_default(),
        options,
        options_source: node.get::<String>("options_source").filter(|s| !s.is_empty()),
        is_required: node.get("is_required").unwrap_or(true),
        order: node.get("order").unwrap_or(0),
    })
}

fn row_to_action(row: &neo4rs::Row) -> Option<Action> {
    let node: neo4rs::Node = row.get("n")?;
    let config_str: String = node.get("config").unwrap_or_else(|| "{}".to_string());
    Some(Action {
        id: node.get("id")?,
        name: node.get("name").unwrap_or_default(),
        action_type: action_type_from_str(&node.get::<String>("action_type").unwrap_or_default()),
        config: serde_json::from_str(&config_str).unwrap_or(Value::Null),
    })
}
