use std::sync::Arc;

use crate::backup::BackupManager;
use crate::config::AppConfig;
use crate::conversation::ConversationEngine;
use crate::flow_store::FlowStore;
use crate::graph_store::GraphStore;
use crate::hybrid_search::HybridSearch;
use crate::ingestion::IngestionEngine;
use crate::llm::LlmManager;
use crate::narrative::{DocumentNameCache, NarrativeGenerator};
use crate::session_store::SessionStore;
use crate::vector_store::VectorStore;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub graph_store: GraphStore,
    pub vector_store: VectorStore,
    pub flow_store: FlowStore,
    pub llm_manager: LlmManager,
    pub hybrid_search: Arc<HybridSearch>,
    pub narrative: Arc<NarrativeGenerator>,
    pub ingestion: Arc<IngestionEngine>,
    pub backup: Arc<BackupManager>,
    pub conversation: Arc<ConversationEngine>,
    pub shutdown_sender: Arc<tokio::sync::Mutex<Option<tokio::sync::oneshot::Sender<()>>>>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        graph_store: GraphStore,
        vector_store: VectorStore,
        flow_store: FlowStore,
        llm_manager: LlmManager,
        shutdown_sender: tokio::sync::oneshot::Sender<()>,
    ) -> Self {
        let doc_names = DocumentNameCache::new();
        let session_store = SessionStore::new(config.session_ttl_secs);
        let hybrid_search = Arc::new(HybridSearch::new(graph_store.clone(), vector_store.clone(), llm_manager.clone(), &config));
        let narrative_generator = NarrativeGenerator::new(llm_manager.clone(), doc_names);
        let narrative = Arc::new(narrative_generator.clone());
        let ingestion = Arc::new(IngestionEngine::new(graph_store.clone(), vector_store.clone(), llm_manager.clone()));
        let backup = Arc::new(BackupManager::new(graph_store.clone(), vector_store.clone()));
        let conversation = Arc::new(ConversationEngine::new(
            flow_store.clone(),
            session_store,
            graph_store.clone(),
            llm_manager.clone(),
            narrative_generator,
        ));

        Self {
            config,
            graph_store,
            vector_store,
            flow_store,
            llm_manager,
            hybrid_search,
            narrative,
            ingestion,
            backup,
            conversation,
            shutdown_sender: Arc::new(tokio::sync::Mutex::new(Some(shutdown_sender))),
        }
    }
}
