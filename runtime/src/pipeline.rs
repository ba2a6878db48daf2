//! One conversational turn, end to end.
//!
//! identity → partitions → (fallback when empty) → grounding examples → agent loop →
//! conversation log → wrapped result. Every failure degrades to one of two fixed
//! results; nothing propagates to the caller.

use std::sync::Arc;
use std::time::Duration;

use ordersight_core::identity::SessionContext;
use ordersight_core::partition::PartitionFilter;
use ordersight_core::schema::SchemaGraph;
use ordersight_core::turn::TurnResult;
use sqlx::PgPool;

use crate::agent::AgentLoop;
use crate::authorization::{AuthorizationLookup, HttpAuthorizationLookup};
use crate::config::RuntimeConfig;
use crate::database::PgDatabase;
use crate::identity::{GraphIdentityResolver, IdentityResolver};
use crate::llm::{AzureChatModel, ChatModel};
use crate::prompt::{self, InstructionContext};
use crate::retrieval::{AzureSearchRetriever, ExampleRetriever, GroundingExample, RetrievalOutcome};
use crate::store::{self, ConversationRecord, ConversationStore, PgConversationStore};
use crate::tools::SqlToolbox;

/// Values interpolated into the instruction plus the whole-turn deadline.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub dialect: String,
    pub top_k: usize,
    pub turn_timeout: Duration,
}

/// The injected collaborators of a pipeline.
pub struct Collaborators {
    pub identity: Arc<dyn IdentityResolver>,
    pub authorization: Arc<dyn AuthorizationLookup>,
    pub retriever: Arc<dyn ExampleRetriever>,
    pub agent: AgentLoop,
    pub store: Arc<dyn ConversationStore>,
}

pub struct TurnPipeline {
    identity: Arc<dyn IdentityResolver>,
    authorization: Arc<dyn AuthorizationLookup>,
    retriever: Arc<dyn ExampleRetriever>,
    agent: AgentLoop,
    store: Arc<dyn ConversationStore>,
    schema: Arc<SchemaGraph>,
    settings: PipelineSettings,
}

impl TurnPipeline {
    pub fn new(collaborators: Collaborators, schema: Arc<SchemaGraph>, settings: PipelineSettings) -> Self {
        Self {
            identity: collaborators.identity,
            authorization: collaborators.authorization,
            retriever: collaborators.retriever,
            agent: collaborators.agent,
            store: collaborators.store,
            schema,
            settings,
        }
    }

    /// Wires the production clients. Each HTTP collaborator gets its own pooled client.
    pub fn from_config(config: &RuntimeConfig, pool: PgPool) -> Result<Self, reqwest::Error> {
        let schema = Arc::new(SchemaGraph::standard());
        let model: Arc<dyn ChatModel> = Arc::new(AzureChatModel::new(
            crate::http::client(config.http_timeout)?,
            config.chat_model.clone(),
        ));
        let database = Arc::new(PgDatabase::new(
            pool.clone(),
            schema.clone(),
            config.agent.statement_timeout,
        ));
        let toolbox = SqlToolbox::new(database, model.clone(), &config.agent.dialect);

        let collaborators = Collaborators {
            identity: Arc::new(GraphIdentityResolver::new(
                crate::http::client(config.http_timeout)?,
                config.directory.clone(),
            )),
            authorization: Arc::new(HttpAuthorizationLookup::new(
                crate::http::client(config.authorization.timeout)?,
                config.authorization.clone(),
            )),
            retriever: Arc::new(AzureSearchRetriever::new(
                crate::http::client(config.http_timeout)?,
                config.search.clone(),
            )),
            agent: AgentLoop::new(model, toolbox, config.agent.max_steps),
            store: Arc::new(PgConversationStore::new(pool)),
        };

        Ok(Self::new(
            collaborators,
            schema,
            PipelineSettings {
                dialect: config.agent.dialect.clone(),
                top_k: config.agent.top_k,
                turn_timeout: config.turn_timeout,
            },
        ))
    }

    pub fn schema(&self) -> &SchemaGraph {
        &self.schema
    }

    /// Handles one turn. Never fails: errors become the fallback or the empty result.
    pub async fn run(&self, session: &SessionContext) -> TurnResult {
        match tokio::time::timeout(self.settings.turn_timeout, self.run_turn(session)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::error!(
                    conversation_id = session.conversation_id.as_deref().unwrap_or("<none>"),
                    timeout_secs = self.settings.turn_timeout.as_secs(),
                    "turn timed out"
                );
                TurnResult::empty()
            }
        }
    }

    async fn run_turn(&self, session: &SessionContext) -> TurnResult {
        let Some(identity) = self.identity.resolve(session).await else {
            tracing::info!("no identity for session; returning permissions fallback");
            return TurnResult::permissions_unavailable();
        };

        let partitions = self.authorization.authorize(&identity).await;
        let Some(filter) = PartitionFilter::new(self.schema.partition_column(), &partitions) else {
            tracing::info!(email = %identity.email, "no authorized partitions; returning permissions fallback");
            return TurnResult::permissions_unavailable();
        };

        let question = session.question.trim();
        if question.is_empty() {
            return TurnResult::empty();
        }
        tracing::info!(email = %identity.email, question, "handling turn");

        let retrieval = RetrievalOutcome::from(self.retriever.retrieve(question).await);
        if let RetrievalOutcome::Failed(reason) = &retrieval {
            tracing::warn!(error = %reason, "example retrieval failed; continuing without examples");
        }

        self.answer(question, &filter, retrieval.examples()).await
    }

    async fn answer(
        &self,
        question: &str,
        filter: &PartitionFilter,
        examples: &[GroundingExample],
    ) -> TurnResult {
        let instruction = prompt::system_instruction(&InstructionContext {
            dialect: &self.settings.dialect,
            top_k: self.settings.top_k,
            filter,
            schema: &self.schema,
            examples,
        });

        let outcome = match self.agent.run(instruction, question, filter).await {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::error!(error = %err, "agent loop failed");
                return TurnResult::empty();
            }
        };
        tracing::info!(
            sql_query = outcome.executed_sql.as_deref().unwrap_or(store::NO_QUERY),
            steps = outcome.steps,
            path = ?outcome.path,
            "agent answered"
        );

        self.store.record(ConversationRecord::new(
            question,
            outcome.executed_sql.as_deref(),
            &outcome.answer,
        ));
        TurnResult::from_answer(&outcome.answer)
    }
}
