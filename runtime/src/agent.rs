//! Model-directed tool loop.
//!
//! The model alternates between tool calls and, eventually, a reply with no tool
//! calls, which is the answer. Every model call spends one step of a fixed budget.

use std::sync::Arc;

use ordersight_core::partition::PartitionFilter;
use thiserror::Error;

use crate::llm::{ChatMessage, ChatModel, ModelError, ToolDefinition};
use crate::tools::{self, SqlToolbox, ToolKind};

pub const DEFAULT_MAX_STEPS: usize = 25;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("step budget of {limit} model calls exhausted")]
    StepBudgetExhausted { limit: usize },
    #[error("malformed arguments for tool '{tool}': {reason}")]
    MalformedToolArguments { tool: String, reason: String },
    #[error("unknown tool '{0}'")]
    UnknownTool(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Planning,
    SchemaLookup,
    QueryCheck,
    QueryExecute,
    Answer,
}

impl From<ToolKind> for AgentState {
    fn from(kind: ToolKind) -> Self {
        match kind {
            ToolKind::ListTables | ToolKind::Schema => AgentState::SchemaLookup,
            ToolKind::QueryChecker => AgentState::QueryCheck,
            ToolKind::Query => AgentState::QueryExecute,
        }
    }
}

/// Upper bound on model calls per turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepBudget {
    limit: usize,
    used: usize,
}

impl StepBudget {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            used: 0,
        }
    }

    /// Spends one step, failing once the limit is reached.
    pub fn spend(&mut self) -> Result<(), AgentError> {
        if self.used >= self.limit {
            return Err(AgentError::StepBudgetExhausted { limit: self.limit });
        }
        self.used += 1;
        Ok(())
    }

    pub fn used(&self) -> usize {
        self.used
    }

    pub fn remaining(&self) -> usize {
        self.limit - self.used
    }
}

impl Default for StepBudget {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_STEPS)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentOutcome {
    pub answer: String,
    /// Last query that cleared the guard and was executed
    pub executed_sql: Option<String>,
    pub steps: usize,
    /// States visited, starting at `Planning` and ending at `Answer`
    pub path: Vec<AgentState>,
}

pub struct AgentLoop {
    model: Arc<dyn ChatModel>,
    toolbox: SqlToolbox,
    tools: Vec<ToolDefinition>,
    max_steps: usize,
}

impl AgentLoop {
    pub fn new(model: Arc<dyn ChatModel>, toolbox: SqlToolbox, max_steps: usize) -> Self {
        Self {
            model,
            toolbox,
            tools: tools::definitions(),
            max_steps,
        }
    }

    /// Drives the model from the question to a final answer.
    pub async fn run(
        &self,
        instruction: String,
        question: &str,
        filter: &PartitionFilter,
    ) -> Result<AgentOutcome, AgentError> {
        let mut messages = vec![
            ChatMessage::System(instruction),
            ChatMessage::User(question.to_string()),
        ];
        let mut budget = StepBudget::new(self.max_steps);
        let mut path = vec![AgentState::Planning];
        let mut executed_sql = None;

        loop {
            budget.spend()?;
            let reply = self.model.complete(&messages, &self.tools).await?;

            if reply.tool_calls.is_empty() {
                transition(&mut path, AgentState::Answer);
                return Ok(AgentOutcome {
                    answer: reply.content.unwrap_or_default(),
                    executed_sql,
                    steps: budget.used(),
                    path,
                });
            }

            let calls = reply.tool_calls.clone();
            messages.push(ChatMessage::Assistant(reply));
            for call in &calls {
                let outcome = self.toolbox.invoke(call, filter).await?;
                transition(&mut path, outcome.kind.into());
                if outcome.executed_query.is_some() {
                    executed_sql = outcome.executed_query;
                }
                messages.push(ChatMessage::Tool {
                    tool_call_id: call.id.clone(),
                    content: outcome.content,
                });
            }
            tracing::debug!(remaining = budget.remaining(), "agent step complete");
        }
    }
}

fn transition(path: &mut Vec<AgentState>, next: AgentState) {
    let from = path.last().copied().unwrap_or(AgentState::Planning);
    tracing::debug!(?from, to = ?next, "agent state");
    path.push(next);
}
