//! Shared doubles for runtime tests: in-process HTTP servers and scripted collaborators.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use axum::Router;
use ordersight_core::identity::{Identity, SessionContext};
use ordersight_core::partition::PartitionSet;
use serde_json::Value;

use crate::authorization::AuthorizationLookup;
use crate::database::{DatabaseError, QueryRows, SqlDatabase};
use crate::identity::IdentityResolver;
use crate::llm::{AssistantMessage, ChatMessage, ChatModel, ModelError, ToolCall, ToolDefinition};
use crate::retrieval::{ExampleRetriever, GroundingExample, RetrievalError};
use crate::store::{ConversationRecord, ConversationStore};

/// Serves `app` on an ephemeral local port and returns its base URL.
pub async fn spawn_server(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("test server");
    });
    format!("http://{addr}")
}

pub struct FixedIdentity(pub Option<Identity>);

#[async_trait]
impl IdentityResolver for FixedIdentity {
    async fn resolve(&self, _session: &SessionContext) -> Option<Identity> {
        self.0.clone()
    }
}

pub struct FixedPartitions(pub PartitionSet);

#[async_trait]
impl AuthorizationLookup for FixedPartitions {
    async fn authorize(&self, _identity: &Identity) -> PartitionSet {
        self.0.clone()
    }
}

pub struct FixedExamples(pub Result<Vec<GroundingExample>, String>);

#[async_trait]
impl ExampleRetriever for FixedExamples {
    async fn retrieve(&self, _question: &str) -> Result<Vec<GroundingExample>, RetrievalError> {
        self.0.clone().map_err(RetrievalError::Search)
    }
}

/// Replays assistant messages in order and records every conversation it was shown.
#[derive(Default)]
pub struct ScriptedModel {
    replies: Mutex<VecDeque<Result<AssistantMessage, ModelError>>>,
    pub seen: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedModel {
    pub fn new(replies: Vec<Result<AssistantMessage, ModelError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        _tools: &[ToolDefinition],
    ) -> Result<AssistantMessage, ModelError> {
        self.seen.lock().unwrap().push(messages.to_vec());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ModelError::Malformed("script exhausted".to_string())))
    }
}

pub fn tool_call(id: &str, name: &str, arguments: Value) -> AssistantMessage {
    AssistantMessage {
        content: None,
        tool_calls: vec![ToolCall {
            id: id.to_string(),
            name: name.to_string(),
            arguments: arguments.to_string(),
        }],
    }
}

pub fn answer(text: &str) -> AssistantMessage {
    AssistantMessage {
        content: Some(text.to_string()),
        tool_calls: Vec::new(),
    }
}

/// In-memory database that records every query that reached it.
pub struct RecordingDatabase {
    pub tables: Vec<String>,
    pub rows: QueryRows,
    pub fail_with: Option<String>,
    pub executed: Mutex<Vec<String>>,
}

impl RecordingDatabase {
    pub fn with_rows(rows: QueryRows) -> Self {
        Self {
            tables: vec!["Orders".to_string(), "ApplicationUsers".to_string()],
            rows,
            fail_with: None,
            executed: Mutex::new(Vec::new()),
        }
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }
}

#[async_trait]
impl SqlDatabase for RecordingDatabase {
    async fn list_tables(&self) -> Result<Vec<String>, DatabaseError> {
        Ok(self.tables.clone())
    }

    async fn table_info(&self, tables: &[String]) -> Result<String, DatabaseError> {
        Ok(tables
            .iter()
            .map(|t| format!("CREATE TABLE {t} (Id integer)"))
            .collect::<Vec<_>>()
            .join("\n\n"))
    }

    async fn run_read_only(&self, query: &str) -> Result<QueryRows, DatabaseError> {
        self.executed.lock().unwrap().push(query.to_string());
        match &self.fail_with {
            Some(message) => Err(DatabaseError::Query(message.clone())),
            None => Ok(self.rows.clone()),
        }
    }
}

#[derive(Default)]
pub struct MemoryStore {
    pub records: Mutex<Vec<ConversationRecord>>,
}

impl ConversationStore for MemoryStore {
    fn record(&self, record: ConversationRecord) {
        self.records.lock().unwrap().push(record);
    }
}
