//! Conversation Engine (C11, spec §4.8): one call handles one conversational
//! turn, walking `analyze -> check_conditions -> (clarify|execute->generate)
//! -> END`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::error;

use crate::error::AppResult;
use crate::flow_store::FlowStore;
use crate::hybrid_search::stem_keywords;
use crate::llm::{LlmManager, TIMEOUT_CLASSIFY};
use crate::models::session::ORIGINAL_QUERY_KEY;
use crate::models::{Condition, GraphData, Option_};
use crate::narrative::{NarrativeGenerator, SourceRef};
use crate::graph_store::GraphStore;
use crate::session_store::SessionStore;

const INTENT_CLASSIFY_SYSTEM_PROMPT: &str = r#"You classify a user's message into exactly one of a fixed set of
intent names, or "none" if nothing fits. Respond with the intent name only, no punctuation, no explanation."#;

/// Small lexicon mapping product keywords to a document id (spec §4.8
/// `analyze`: "Extract document context via a small lexicon of product
/// keywords"). Kept intentionally tiny and domain-neutral; a real deployment
/// would source this from the upstream document catalog.
const PRODUCT_LEXICON: &[(&str, &str)] = &[
    ("auto", "doc_auto_policy"),
    ("car", "doc_auto_policy"),
    ("home", "doc_home_policy"),
    ("house", "doc_home_policy"),
    ("life", "doc_life_policy"),
    ("health", "doc_health_policy"),
];

#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub session_id: Option<String>,
    #[serde(default)]
    pub message: String,
    pub selected_option: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatResponse {
    pub session_id: String,
    pub needs_input: bool,
    pub input_type: Option<String>,
    pub question: Option<String>,
    pub options: Option<Vec<Option_>>,
    pub final_answer: Option<String>,
    pub graph_data: Option<GraphData>,
    pub sources: Option<Vec<SourceRef>>,
    pub is_complete: bool,
    pub error: Option<String>,
}

impl ChatResponse {
    fn clarification(session_id: String, condition: &Condition, question: String, options: Option<Vec<Option_>>) -> Self {
        Self {
            session_id,
            needs_input: true,
            input_type: Some(condition_type_str(condition.condition_type)),
            question: Some(question),
            options,
            final_answer: None,
            graph_data: None,
            sources: None,
            is_complete: false,
            error: None,
        }
    }

    fn failure(session_id: String, message: impl Into<String>) -> Self {
        Self {
            session_id,
            needs_input: false,
            input_type: None,
            question: None,
            options: None,
            final_answer: Some("I'm sorry, something went wrong while handling your request.".to_string()),
            graph_data: None,
            sources: None,
            is_complete: true,
            error: Some(message.into()),
        }
    }
}

fn condition_type_str(t: crate::models::ConditionType) -> String {
    use crate::models::ConditionType::*;
    match t {
        SelectOne => "select_one",
        SelectMulti => "select_multi",
        TextInput => "text_input",
        DateInput => "date_input",
        NumberInput => "number_input",
        YesNo => "yes_no",
        AutoExtract => "auto_extract",
    }
    .to_string()
}

/// Interpolates `{slot}` placeholders in a question template from collected
/// values (spec §4.8 `clarify`).
fn render_template(template: &str, values: &HashMap<String, Value>) -> String {
    let mut out = template.to_string();
    for (k, v) in values {
        let placeholder = format!("{{{k}}}");
        if out.contains(&placeholder) {
            let rendered = match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            out = out.replace(&placeholder, &rendered);
        }
    }
    out
}

/// Turns `entity_type`-style or `doc_auto_policy`-style identifiers into a
/// readable label for dynamically-resolved options.
fn humanize(raw: &str) -> String {
    raw.trim_start_matches("doc_")
        .split('_')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Resolves `DYNAMIC:dify_documents` (spec §4.8 clarify) from the same
/// product-keyword lexicon `analyze` uses to set `document_context` — the
/// closest stand-in this crate has to the upstream document catalog.
fn dynamic_document_options() -> Vec<Option_> {
    let mut seen = HashSet::new();
    let mut options = Vec::new();
    for (_, doc_id) in PRODUCT_LEXICON {
        if seen.insert(*doc_id) {
            options.push(Option_ { value: doc_id.to_string(), label: humanize(doc_id) });
        }
    }
    options
}

/// Maps the rows of an opaque options query to `Option_`: a `value`/`label`
/// column pair if present, else the first column used for both.
fn rows_to_options(rows: Vec<HashMap<String, Value>>) -> Vec<Option_> {
    rows.into_iter()
        .filter_map(|row| {
            let value = row.get("value").or_else(|| row.values().next())?.as_str()?.to_string();
            let label = row.get("label").and_then(|v| v.as_str()).map(|s| s.to_string()).unwrap_or_else(|| value.clone());
            Some(Option_ { value, label })
        })
        .collect()
}

/// Outcome of walking the flow graph from the current position.
enum FlowWalk {
    NeedsCondition(Condition),
    Satisfied { last_condition_id: String },
}

pub struct ConversationEngine {
    flow_store: FlowStore,
    session_store: SessionStore,
    graph_store: GraphStore,
    llm: LlmManager,
    narrative: NarrativeGenerator,
    turn_locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl ConversationEngine {
    pub fn new(
        flow_store: FlowStore,
        session_store: SessionStore,
        graph_store: GraphStore,
        llm: LlmManager,
        narrative: NarrativeGenerator,
    ) -> Self {
        Self {
            flow_store,
            session_store,
            graph_store,
            llm,
            narrative,
            turn_locks: Arc::new(DashMap::new()),
        }
    }

    pub fn session_store(&self) -> &SessionStore {
        &self.session_store
    }

    pub fn flow_store(&self) -> &FlowStore {
        &self.flow_store
    }

    /// One conversational turn (spec §4.8). Never panics: any internal
    /// failure is converted to a benign user-visible apology plus a recorded
    /// `error` string, with session state left readable (spec §7).
    pub async fn handle_turn(&self, req: ChatRequest) -> ChatResponse {
        let mut session = self.session_store.get_or_create(req.session_id.as_deref());
        let session_id = session.session_id.clone();

        let lock = self
            .turn_locks
            .entry(session_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        // Re-fetch: another turn may have completed while we waited for the
        // lock (spec §5 "at most one in-flight guard on the session_id").
        if let Some(latest) = self.session_store.get(&session_id) {
            session = latest;
        }

        session.add_message("user", if req.message.is_empty() { "<option selected>" } else { &req.message });

        let response = match self.run_turn(&mut session, &req).await {
            Ok(resp) => resp,
            Err(e) => {
                error!(session_id = %session_id, error = %e, "conversation turn failed");
                ChatResponse::failure(session_id.clone(), e.to_string())
            }
        };

        if let Some(answer) = &response.final_answer {
            if response.is_complete {
                session.add_message("assistant", answer);
            }
        }
        let _ = self.session_store.update(session);

        response
    }

    async fn run_turn(&self, session: &mut crate::models::Session, req: &ChatRequest) -> AppResult<ChatResponse> {
        self.analyze(session, req).await?;

        match self.check_conditions(session).await? {
            CheckOutcome::Clarify(condition) => {
                session.current_node_id = Some(condition.id.clone());
                let question = render_template(&condition.question_template, &session.collected_values);
                let options = self.resolve_options(&condition).await?;
                Ok(ChatResponse::clarification(session.session_id.clone(), &condition, question, options))
            }
            CheckOutcome::Execute(action) => {
                let graph = self.execute(session, &action).await?;
                self.generate(session, &graph).await
            }
            CheckOutcome::End => Ok(ChatResponse {
                session_id: session.session_id.clone(),
                needs_input: false,
                input_type: None,
                question: None,
                options: None,
                final_answer: Some("I couldn't determine how to help with that — could you rephrase?".to_string()),
                graph_data: None,
                sources: None,
                is_complete: true,
                error: None,
            }),
        }
    }

    // -----------------------------------------------------------------
    // analyze
    // -----------------------------------------------------------------

    async fn analyze(&self, session: &mut crate::models::Session, req: &ChatRequest) -> AppResult<()> {
        if let (Some(selected), Some(node_id)) = (&req.selected_option, session.current_node_id.clone()) {
            if let Some(condition) = self.flow_store.get_condition(&node_id).await? {
                session.collected_values.insert(condition.name.clone(), json!(selected));
            }
            return Ok(());
        }

        if session.current_intent.is_some() && session.document_context.is_some() {
            // Follow-up turn: reuse document_context, no re-classification,
            // but the new message becomes the query `execute` composes from.
            session.collected_values.insert(ORIGINAL_QUERY_KEY.to_string(), json!(req.message));
            return Ok(());
        }

        if !session.collected_values.contains_key(ORIGINAL_QUERY_KEY) {
            session.collected_values.insert(ORIGINAL_QUERY_KEY.to_string(), json!(req.message));
        }

        let matched = self.flow_store.match_intent(&req.message).await?;
        session.current_intent = match matched {
            Some(intent) => Some(intent.name),
            None => self.classify_intent_with_llm(&req.message).await?,
        };

        if session.document_context.is_none() {
            let lowered = req.message.to_lowercase();
            for (keyword, doc_id) in PRODUCT_LEXICON {
                if lowered.contains(keyword) {
                    session.document_context = Some(doc_id.to_string());
                    break;
                }
            }
        }

        Ok(())
    }

    async fn classify_intent_with_llm(&self, message: &str) -> AppResult<Option<String>> {
        let intents = self.flow_store.list_intents(true).await?;
        if intents.is_empty() {
            return Ok(None);
        }
        let names: Vec<&str> = intents.iter().map(|i| i.name.as_str()).collect();
        let prompt = format!("Known intents: {}\nMessage: {message}\nIntent:", names.join(", "));
        let raw = match self.llm.complete(INTENT_CLASSIFY_SYSTEM_PROMPT, &prompt, None, TIMEOUT_CLASSIFY).await {
            Ok(r) => r,
            Err(_) => return Ok(None),
        };
        let candidate = raw.trim().trim_matches(|c: char| c == '"' || c == '.').to_lowercase();
        Ok(names.iter().find(|n| n.to_lowercase() == candidate).map(|n| n.to_string()))
    }

    // -----------------------------------------------------------------
    // check_conditions
    // -----------------------------------------------------------------

    async fn check_conditions(&self, session: &mut crate::models::Session) -> AppResult<CheckOutcome> {
        if session.current_intent.is_none() {
            if session.collected_values.contains_key("product_type") {
                return Ok(CheckOutcome::Execute(None));
            }
            if let Some(product_condition) = self.flow_store.condition_by_name("product_type").await? {
                return Ok(CheckOutcome::Clarify(product_condition));
            }
            return Ok(CheckOutcome::End);
        }

        let intent_name = session.current_intent.clone().unwrap();
        let Some(intent) = self
            .flow_store
            .list_intents(false)
            .await?
            .into_iter()
            .find(|i| i.name == intent_name)
        else {
            return Ok(CheckOutcome::End);
        };

        let start_id = match &session.current_node_id {
            Some(id) => id.clone(),
            None => {
                let required = self.flow_store.conditions_for_intent(&intent.id).await?;
                match required.into_iter().next() {
                    Some(c) => c.id,
                    None => return Ok(CheckOutcome::End),
                }
            }
        };

        match self.walk_flow(&intent.id, &start_id, &session.collected_values, &intent_name).await? {
            FlowWalk::NeedsCondition(condition) => Ok(CheckOutcome::Clarify(condition)),
            FlowWalk::Satisfied { last_condition_id } => {
                let action = self.flow_store.action_for_condition(&last_condition_id).await?;
                Ok(CheckOutcome::Execute(action))
            }
        }
    }

    /// DFS from `start_condition_id` over NEXT/BRANCH edges, stopping at the
    /// first condition whose name has no collected value. A visited set and
    /// a step budget bounded by the intent's condition count keep this
    /// terminating on cyclic flow graphs (spec §8 P8, §9).
    async fn walk_flow(
        &self,
        intent_id: &str,
        start_condition_id: &str,
        collected: &HashMap<String, Value>,
        intent_name: &str,
    ) -> AppResult<FlowWalk> {
        let budget = self.flow_store.conditions_for_intent(intent_id).await?.len().max(1) + 1;
        let mut visited = HashSet::new();
        let mut stack = vec![start_condition_id.to_string()];
        let mut last_seen = start_condition_id.to_string();
        let mut steps = 0;

        while let Some(id) = stack.pop() {
            steps += 1;
            if steps > budget || !visited.insert(id.clone()) {
                break;
            }
            last_seen = id.clone();
            let Some(condition) = self.flow_store.get_condition(&id).await? else {
                continue;
            };
            if !collected.contains_key(&condition.name) {
                return Ok(FlowWalk::NeedsCondition(condition));
            }
            let next = self.flow_store.next_conditions(&id, collected, Some(intent_name)).await?;
            for n in next.into_iter().rev() {
                stack.push(n.id);
            }
        }

        Ok(FlowWalk::Satisfied { last_condition_id: last_seen })
    }

    /// Resolves a condition's presented options (spec §4.8 clarify): a
    /// static list, a `DYNAMIC:<source>` tag, or a stored opaque Cypher
    /// query string. `options_source`, when present, takes priority over
    /// any static `options` the condition also carries.
    async fn resolve_options(&self, condition: &Condition) -> AppResult<Option<Vec<Option_>>> {
        match condition.options_source.as_deref() {
            Some("DYNAMIC:neo4j_entity_types") => {
                let stats = self.graph_store.stats(None).await?;
                let mut types: Vec<&String> = stats.entity_types.keys().collect();
                types.sort();
                Ok(Some(types.into_iter().map(|t| Option_ { value: t.clone(), label: humanize(t) }).collect()))
            }
            Some("DYNAMIC:dify_documents") => Ok(Some(dynamic_document_options())),
            Some(source) if source.starts_with("DYNAMIC:") => {
                error!(source = %source, "unrecognized dynamic option source, falling back to static options");
                Ok(condition.options.clone())
            }
            Some(opaque_query) => {
                let rows = self.graph_store.execute_query(opaque_query).await?;
                Ok(Some(rows_to_options(rows)))
            }
            None => Ok(condition.options.clone()),
        }
    }

    // -----------------------------------------------------------------
    // execute
    // -----------------------------------------------------------------

    async fn execute(&self, session: &crate::models::Session, _action: &Option<crate::models::Action>) -> AppResult<GraphData> {
        let original_query = session
            .collected_values
            .get(ORIGINAL_QUERY_KEY)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        let keywords = stem_keywords(&original_query);
        let document_filter = session.document_context.clone();

        let mut seen_ids = HashSet::new();
        let mut entities = Vec::new();
        for kw in &keywords {
            let hits = self
                .graph_store
                .search_with_context(kw, None, None, document_filter.as_deref(), 5)
                .await?;
            for (entity, _context) in hits {
                if seen_ids.insert(entity.id.clone()) {
                    entities.push(entity);
                }
            }
        }

        if entities.len() < 3 {
            for kw in &keywords {
                let hits = self.graph_store.search_with_context(kw, None, None, None, 5).await?;
                for (entity, _context) in hits {
                    if seen_ids.insert(entity.id.clone()) {
                        entities.push(entity);
                    }
                }
            }
        }

        if let Some(top) = entities.first() {
            self.graph_store.neighbors(&top.id, 2, 50).await
        } else {
            Ok(GraphData::default())
        }
    }

    // -----------------------------------------------------------------
    // generate
    // -----------------------------------------------------------------

    async fn generate(&self, session: &crate::models::Session, graph: &GraphData) -> AppResult<ChatResponse> {
        let question = session
            .collected_values
            .get(ORIGINAL_QUERY_KEY)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        let answer = self.narrative.answer_question(&question, graph, None).await?;

        Ok(ChatResponse {
            session_id: session.session_id.clone(),
            needs_input: false,
            input_type: None,
            question: None,
            options: None,
            final_answer: Some(answer.answer),
            graph_data: answer.graph,
            sources: Some(answer.sources),
            is_complete: true,
            error: None,
        })
    }
}

enum CheckOutcome {
    Clarify(Condition),
    Execute(Option<crate::models::Action>),
    End,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_template_placeholders_from_collected_values() {
        let mut values = HashMap::new();
        values.insert("product_type".to_string(), json!("life"));
        let out = render_template("What is the reason for the {product_type} claim?", &values);
        assert_eq!(out, "What is the reason for the life claim?");
    }

    #[test]
    fn renders_template_leaves_unknown_placeholders_untouched() {
        let values = HashMap::new();
        let out = render_template("Reason for {product_type}?", &values);
        assert_eq!(out, "Reason for {product_type}?");
    }
}
