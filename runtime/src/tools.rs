//! The four SQL tools the model may call during a turn.
//!
//! Tool failures that the model can recover from (missing filter, bad SQL, unknown
//! table) come back as JSON error text in the tool result. Failures the model cannot
//! recover from (unknown tool, unparsable arguments, checker model down) abort the turn.

use std::sync::Arc;

use ordersight_core::error::codes;
use ordersight_core::guard::{self, GuardViolation};
use ordersight_core::partition::PartitionFilter;
use serde_json::{Map, Value, json};

use crate::agent::AgentError;
use crate::database::{DatabaseError, SqlDatabase};
use crate::llm::{ChatMessage, ChatModel, ToolCall, ToolDefinition};
use crate::prompt;

pub const LIST_TABLES: &str = "sql_db_list_tables";
pub const SCHEMA: &str = "sql_db_schema";
pub const QUERY_CHECKER: &str = "sql_db_query_checker";
pub const QUERY: &str = "sql_db_query";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    ListTables,
    Schema,
    QueryChecker,
    Query,
}

impl ToolKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            LIST_TABLES => Some(ToolKind::ListTables),
            SCHEMA => Some(ToolKind::Schema),
            QUERY_CHECKER => Some(ToolKind::QueryChecker),
            QUERY => Some(ToolKind::Query),
            _ => None,
        }
    }
}

pub fn definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: LIST_TABLES,
            description: "Input is an empty string, output is a comma-separated list of tables in the database.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "tool_input": { "type": "string", "description": "An empty string" }
                }
            }),
        },
        ToolDefinition {
            name: SCHEMA,
            description: "Get the columns and keys of the specified tables. Call sql_db_list_tables first to learn which tables exist.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "table_names": {
                        "type": "string",
                        "description": "A comma-separated list of table names, e.g. 'Orders, Pets'"
                    }
                },
                "required": ["table_names"]
            }),
        },
        ToolDefinition {
            name: QUERY_CHECKER,
            description: "Double check that a query is correct and carries the mandatory ServiceTeamId filter before executing it. Always use this tool before sql_db_query.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "The SQL query to check" }
                },
                "required": ["query"]
            }),
        },
        ToolDefinition {
            name: QUERY,
            description: "Execute a SQL query against the database and get back the rows. If the query is rejected or fails, an error is returned; rewrite the query, check it, and try again. Every query must filter ServiceTeamId on the Orders table, joining Orders when the question is about another table.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "A detailed and correct SQL query" }
                },
                "required": ["query"]
            }),
        },
    ]
}

/// A recoverable tool failure, rendered back to the model as JSON.
#[derive(Debug, Clone)]
pub struct ToolError {
    code: String,
    message: String,
    field: Option<String>,
    docs_hint: Option<String>,
}

impl ToolError {
    fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            field: None,
            docs_hint: None,
        }
    }

    fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    fn with_docs_hint(mut self, docs_hint: impl Into<String>) -> Self {
        self.docs_hint = Some(docs_hint.into());
        self
    }

    fn to_value(&self) -> Value {
        let mut payload = json!({
            "error": self.code,
            "message": self.message
        });
        if let Some(field) = &self.field {
            payload["field"] = Value::String(field.clone());
        }
        if let Some(docs_hint) = &self.docs_hint {
            payload["docs_hint"] = Value::String(docs_hint.clone());
        }
        payload
    }

    fn from_violation(violation: &GuardViolation) -> Self {
        match violation {
            GuardViolation::MissingFilter { fragment } => {
                ToolError::new(codes::MISSING_REQUIRED_FILTER, violation.to_string())
                    .with_field("query")
                    .with_docs_hint(format!(
                        "Join the Orders table and add `{fragment}` exactly as written."
                    ))
            }
            GuardViolation::NotReadOnly(_) => {
                ToolError::new(codes::STATEMENT_NOT_ALLOWED, violation.to_string())
                    .with_field("query")
                    .with_docs_hint("Only a single SELECT or WITH statement can be executed.")
            }
        }
    }

    fn from_database(error: &DatabaseError) -> Self {
        match error {
            DatabaseError::UnknownTable(table) => ToolError::new(
                codes::UNKNOWN_TABLE,
                format!("Error: table '{table}' does not exist."),
            )
            .with_field("table_names")
            .with_docs_hint("Call sql_db_list_tables to see the available tables."),
            other => ToolError::new(codes::DATABASE_ERROR, format!("Error: {other}")),
        }
    }
}

/// What one tool call produced.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutcome {
    pub kind: ToolKind,
    /// Text returned to the model as the tool result
    pub content: String,
    /// Set when a query cleared the guard and reached the database
    pub executed_query: Option<String>,
}

impl ToolOutcome {
    fn text(kind: ToolKind, content: impl Into<String>) -> Self {
        Self {
            kind,
            content: content.into(),
            executed_query: None,
        }
    }

    fn error(kind: ToolKind, error: ToolError) -> Self {
        Self::text(kind, error.to_value().to_string())
    }
}

/// Binds the tools to one database and one checker model.
pub struct SqlToolbox {
    database: Arc<dyn SqlDatabase>,
    checker: Arc<dyn ChatModel>,
    dialect: String,
}

impl SqlToolbox {
    pub fn new(database: Arc<dyn SqlDatabase>, checker: Arc<dyn ChatModel>, dialect: &str) -> Self {
        Self {
            database,
            checker,
            dialect: dialect.to_string(),
        }
    }

    /// Dispatches one model tool call under the turn's partition filter.
    pub async fn invoke(
        &self,
        call: &ToolCall,
        filter: &PartitionFilter,
    ) -> Result<ToolOutcome, AgentError> {
        let kind =
            ToolKind::from_name(&call.name).ok_or_else(|| AgentError::UnknownTool(call.name.clone()))?;
        let args = parse_arguments(call)?;

        let outcome = match kind {
            ToolKind::ListTables => self.list_tables().await,
            ToolKind::Schema => match required_string(&args, "table_names") {
                Ok(names) => self.schema(&names).await,
                Err(e) => ToolOutcome::error(kind, e),
            },
            ToolKind::QueryChecker => match required_string(&args, "query") {
                Ok(query) => self.check_query(&query, filter).await?,
                Err(e) => ToolOutcome::error(kind, e),
            },
            ToolKind::Query => match required_string(&args, "query") {
                Ok(query) => self.execute(&query, filter).await,
                Err(e) => ToolOutcome::error(kind, e),
            },
        };
        Ok(outcome)
    }

    async fn list_tables(&self) -> ToolOutcome {
        match self.database.list_tables().await {
            Ok(tables) => ToolOutcome::text(ToolKind::ListTables, tables.join(", ")),
            Err(e) => ToolOutcome::error(ToolKind::ListTables, ToolError::from_database(&e)),
        }
    }

    async fn schema(&self, table_names: &str) -> ToolOutcome {
        let tables: Vec<String> = table_names
            .split(',')
            .map(|t| t.trim().trim_matches('"').to_string())
            .filter(|t| !t.is_empty())
            .collect();
        if tables.is_empty() {
            return ToolOutcome::error(
                ToolKind::Schema,
                ToolError::new(codes::VALIDATION_FAILED, "No table names given")
                    .with_field("table_names"),
            );
        }
        match self.database.table_info(&tables).await {
            Ok(info) => ToolOutcome::text(ToolKind::Schema, info),
            Err(e) => ToolOutcome::error(ToolKind::Schema, ToolError::from_database(&e)),
        }
    }

    /// Gates the query, then asks the model to review it. Returns the reviewed text.
    async fn check_query(
        &self,
        query: &str,
        filter: &PartitionFilter,
    ) -> Result<ToolOutcome, AgentError> {
        if let Err(violation) = guard::inspect(query, filter) {
            tracing::info!(tool = QUERY_CHECKER, reason = %violation, "query rejected by guard");
            return Ok(ToolOutcome::error(
                ToolKind::QueryChecker,
                ToolError::from_violation(&violation),
            ));
        }

        let instruction = prompt::checker_instruction(query, &self.dialect, filter.fragment());
        let reply = self
            .checker
            .complete(&[ChatMessage::User(instruction)], &[])
            .await
            .map_err(AgentError::Model)?;
        let reviewed = reply
            .content
            .as_deref()
            .map(prompt::strip_code_fence)
            .filter(|text| !text.is_empty())
            .unwrap_or(query);
        Ok(ToolOutcome::text(ToolKind::QueryChecker, reviewed))
    }

    /// Re-checks the guard independently of the checker; rejected queries never reach the database.
    async fn execute(&self, query: &str, filter: &PartitionFilter) -> ToolOutcome {
        if let Err(violation) = guard::inspect(query, filter) {
            tracing::info!(tool = QUERY, reason = %violation, "query rejected by guard");
            return ToolOutcome::error(ToolKind::Query, ToolError::from_violation(&violation));
        }

        match self.database.run_read_only(query).await {
            Ok(rows) => ToolOutcome {
                kind: ToolKind::Query,
                content: Value::Array(rows).to_string(),
                executed_query: Some(query.to_string()),
            },
            Err(e) => {
                tracing::info!(error = %e, "query failed");
                ToolOutcome {
                    kind: ToolKind::Query,
                    content: ToolError::from_database(&e).to_value().to_string(),
                    executed_query: Some(query.to_string()),
                }
            }
        }
    }
}

fn parse_arguments(call: &ToolCall) -> Result<Map<String, Value>, AgentError> {
    let raw = call.arguments.trim();
    if raw.is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(AgentError::MalformedToolArguments {
            tool: call.name.clone(),
            reason: format!("expected a JSON object, got {other}"),
        }),
        Err(e) => Err(AgentError::MalformedToolArguments {
            tool: call.name.clone(),
            reason: e.to_string(),
        }),
    }
}

fn required_string(args: &Map<String, Value>, key: &str) -> Result<String, ToolError> {
    let value = args.get(key).ok_or_else(|| {
        ToolError::new(
            codes::VALIDATION_FAILED,
            format!("Missing required field '{key}'"),
        )
        .with_field(key)
    })?;
    match value {
        Value::String(v) if !v.trim().is_empty() => Ok(v.clone()),
        Value::String(_) => Err(ToolError::new(
            codes::VALIDATION_FAILED,
            format!("'{key}' must not be empty"),
        )
        .with_field(key)),
        _ => Err(
            ToolError::new(codes::VALIDATION_FAILED, format!("'{key}' must be a string"))
                .with_field(key),
        ),
    }
}

#[cfg(test)]
mod tests {
    use ordersight_core::guard::MISSING_FILTER_PHRASE;
    use ordersight_core::partition::PartitionSet;

    use super::*;
    use crate::test_support::{RecordingDatabase, ScriptedModel, answer};

    fn filter() -> PartitionFilter {
        let partitions: PartitionSet = [101, 205].into_iter().collect();
        PartitionFilter::new("ServiceTeamId", &partitions).unwrap()
    }

    fn call(name: &str, arguments: Value) -> ToolCall {
        ToolCall {
            id: "call_1".to_string(),
            name: name.to_string(),
            arguments: arguments.to_string(),
        }
    }

    fn toolbox(
        db: Arc<RecordingDatabase>,
        checker: Arc<ScriptedModel>,
    ) -> SqlToolbox {
        SqlToolbox::new(db, checker, "PostgreSQL")
    }

    #[tokio::test]
    async fn unfiltered_query_never_reaches_database() {
        let db = Arc::new(RecordingDatabase::with_rows(vec![json!({ "n": 1 })]));
        let tools = toolbox(db.clone(), Arc::new(ScriptedModel::default()));

        let outcome = tools
            .invoke(&call(QUERY, json!({ "query": "SELECT COUNT(*) FROM Orders" })), &filter())
            .await
            .unwrap();

        assert!(outcome.content.contains(MISSING_FILTER_PHRASE));
        assert!(outcome.content.contains(codes::MISSING_REQUIRED_FILTER));
        assert_eq!(outcome.executed_query, None);
        assert!(db.executed().is_empty());
    }

    #[tokio::test]
    async fn fragment_hidden_in_literal_or_comment_never_reaches_database() {
        let db = Arc::new(RecordingDatabase::with_rows(vec![json!({ "Id": 1 })]));
        let checker = Arc::new(ScriptedModel::default());
        let tools = toolbox(db.clone(), checker.clone());

        for query in [
            "SELECT Id, ServiceTeamId FROM Orders WHERE 'ServiceTeamId IN (101,205)' <> ''",
            "SELECT Id FROM Orders -- ServiceTeamId IN (101,205)",
        ] {
            for tool in [QUERY_CHECKER, QUERY] {
                let outcome = tools
                    .invoke(&call(tool, json!({ "query": query })), &filter())
                    .await
                    .unwrap();
                assert!(outcome.content.contains(MISSING_FILTER_PHRASE), "{tool}: {query}");
                assert_eq!(outcome.executed_query, None);
            }
        }
        assert!(db.executed().is_empty());
        assert_eq!(checker.calls(), 0);
    }

    #[tokio::test]
    async fn filtered_query_returns_rows_unmodified() {
        let rows = vec![json!({ "Id": 7, "Name": "O'Brien" }), json!({ "Id": 9, "Name": null })];
        let db = Arc::new(RecordingDatabase::with_rows(rows.clone()));
        let tools = toolbox(db.clone(), Arc::new(ScriptedModel::default()));
        let query = "SELECT Id, Name FROM Orders WHERE ServiceTeamId IN (101,205)";

        let outcome = tools
            .invoke(&call(QUERY, json!({ "query": query })), &filter())
            .await
            .unwrap();

        assert_eq!(serde_json::from_str::<Value>(&outcome.content).unwrap(), Value::Array(rows));
        assert_eq!(outcome.executed_query.as_deref(), Some(query));
        assert_eq!(db.executed(), vec![query.to_string()]);
    }

    #[tokio::test]
    async fn mutating_statement_is_rejected_even_with_filter() {
        let db = Arc::new(RecordingDatabase::with_rows(Vec::new()));
        let tools = toolbox(db.clone(), Arc::new(ScriptedModel::default()));

        let outcome = tools
            .invoke(
                &call(
                    QUERY,
                    json!({ "query": "DELETE FROM Orders WHERE ServiceTeamId IN (101,205)" }),
                ),
                &filter(),
            )
            .await
            .unwrap();

        assert!(outcome.content.contains(codes::STATEMENT_NOT_ALLOWED));
        assert!(db.executed().is_empty());
    }

    #[tokio::test]
    async fn database_error_is_returned_as_text() {
        let mut db = RecordingDatabase::with_rows(Vec::new());
        db.fail_with = Some("column \"nope\" does not exist".to_string());
        let db = Arc::new(db);
        let tools = toolbox(db.clone(), Arc::new(ScriptedModel::default()));

        let outcome = tools
            .invoke(
                &call(
                    QUERY,
                    json!({ "query": "SELECT nope FROM Orders WHERE ServiceTeamId IN (101,205)" }),
                ),
                &filter(),
            )
            .await
            .unwrap();

        assert!(outcome.content.contains(codes::DATABASE_ERROR));
        assert!(outcome.content.contains("does not exist"));
        assert_eq!(db.executed().len(), 1);
    }

    #[tokio::test]
    async fn checker_rejects_unfiltered_query_without_asking_the_model() {
        let checker = Arc::new(ScriptedModel::default());
        let tools = toolbox(
            Arc::new(RecordingDatabase::with_rows(Vec::new())),
            checker.clone(),
        );

        let outcome = tools
            .invoke(&call(QUERY_CHECKER, json!({ "query": "SELECT * FROM Pets" })), &filter())
            .await
            .unwrap();

        assert!(outcome.content.contains(MISSING_FILTER_PHRASE));
        assert_eq!(checker.calls(), 0);
    }

    #[tokio::test]
    async fn checker_returns_reviewed_query() {
        let reviewed = "SELECT Id FROM Orders WHERE ServiceTeamId IN (101,205) LIMIT 5";
        let checker = Arc::new(ScriptedModel::new(vec![Ok(answer(&format!(
            "```sql\n{reviewed}\n```"
        )))]));
        let tools = toolbox(
            Arc::new(RecordingDatabase::with_rows(Vec::new())),
            checker.clone(),
        );

        let outcome = tools
            .invoke(
                &call(
                    QUERY_CHECKER,
                    json!({ "query": "SELECT Id FROM Orders WHERE ServiceTeamId IN (101,205)" }),
                ),
                &filter(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.content, reviewed);
        assert_eq!(outcome.executed_query, None);
        let seen = checker.seen.lock().unwrap();
        match &seen[0][0] {
            ChatMessage::User(text) => assert!(text.contains("Double check the PostgreSQL query")),
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[tokio::test]
    async fn schema_splits_comma_separated_names() {
        let tools = toolbox(
            Arc::new(RecordingDatabase::with_rows(Vec::new())),
            Arc::new(ScriptedModel::default()),
        );
        let outcome = tools
            .invoke(&call(SCHEMA, json!({ "table_names": "Orders, Pets" })), &filter())
            .await
            .unwrap();
        assert!(outcome.content.contains("CREATE TABLE Orders"));
        assert!(outcome.content.contains("CREATE TABLE Pets"));
    }

    #[tokio::test]
    async fn list_tables_joins_names() {
        let tools = toolbox(
            Arc::new(RecordingDatabase::with_rows(Vec::new())),
            Arc::new(ScriptedModel::default()),
        );
        let outcome = tools
            .invoke(&call(LIST_TABLES, json!({ "tool_input": "" })), &filter())
            .await
            .unwrap();
        assert_eq!(outcome.content, "Orders, ApplicationUsers");
    }

    #[tokio::test]
    async fn missing_argument_is_recoverable() {
        let tools = toolbox(
            Arc::new(RecordingDatabase::with_rows(Vec::new())),
            Arc::new(ScriptedModel::default()),
        );
        let outcome = tools.invoke(&call(QUERY, json!({})), &filter()).await.unwrap();
        assert!(outcome.content.contains(codes::VALIDATION_FAILED));
    }

    #[tokio::test]
    async fn unparsable_arguments_abort() {
        let tools = toolbox(
            Arc::new(RecordingDatabase::with_rows(Vec::new())),
            Arc::new(ScriptedModel::default()),
        );
        let bad = ToolCall {
            id: "call_1".to_string(),
            name: QUERY.to_string(),
            arguments: "{not json".to_string(),
        };
        let err = tools.invoke(&bad, &filter()).await.unwrap_err();
        assert!(matches!(err, AgentError::MalformedToolArguments { .. }));

        let err = tools
            .invoke(&call("drop_everything", json!({})), &filter())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::UnknownTool(name) if name == "drop_everything"));
    }

    #[test]
    fn four_tools_are_advertised() {
        let names: Vec<&str> = definitions().iter().map(|d| d.name).collect();
        assert_eq!(names, vec![LIST_TABLES, SCHEMA, QUERY_CHECKER, QUERY]);
    }
}
