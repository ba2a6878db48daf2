use sqlx::PgPool;
use uuid::Uuid;

/// Partition key every conversation row is written under.
pub const CONVERSATION_PARTITION_KEY: &str = "ChatBot";

/// Placeholder stored when no query cleared the guard during the turn.
pub const NO_QUERY: &str = "N/A";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationRecord {
    pub id: Uuid,
    pub question: String,
    pub sql_query: String,
    pub response: String,
}

impl ConversationRecord {
    pub fn new(question: &str, sql_query: Option<&str>, response: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            question: question.to_string(),
            sql_query: sql_query.unwrap_or(NO_QUERY).to_string(),
            response: response.to_string(),
        }
    }
}

/// Fire-and-forget conversation log. `record` must never block or fail the turn.
pub trait ConversationStore: Send + Sync {
    fn record(&self, record: ConversationRecord);
}

pub struct PgConversationStore {
    pool: PgPool,
}

impl PgConversationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl ConversationStore for PgConversationStore {
    fn record(&self, record: ConversationRecord) {
        let pool = self.pool.clone();
        tokio::spawn(async move {
            if let Err(e) = sqlx::query(
                "INSERT INTO conversation_log (id, partition_key, question, sql_query, response) \
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(record.id)
            .bind(CONVERSATION_PARTITION_KEY)
            .bind(&record.question)
            .bind(&record.sql_query)
            .bind(&record.response)
            .execute(&pool)
            .await
            {
                tracing::warn!(error = %e, id = %record.id, "Failed to insert conversation log entry");
            }
        });
    }
}
