use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
}

/// Client-credentials registration used to reach the directory.
#[derive(Debug, Clone)]
pub struct DirectoryConfig {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
    pub authority_base: String,
    pub graph_base: String,
}

#[derive(Debug, Clone)]
pub struct AuthorizationConfig {
    /// Prefix the user's email is appended to
    pub base_url: String,
    /// Static value sent in the `Token` header
    pub token: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct ChatModelConfig {
    pub endpoint: String,
    pub api_key: String,
    pub deployment: String,
    pub api_version: String,
}

#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub endpoint: String,
    pub index: String,
    pub api_key: String,
    pub semantic_configuration: String,
    pub content_field: String,
    pub vector_field: String,
    pub top_k: usize,
    pub embedding_endpoint: String,
    pub embedding_key: String,
    pub embedding_deployment: String,
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub dialect: String,
    /// Result-count cap written into the instruction
    pub top_k: usize,
    pub max_steps: usize,
    pub statement_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub database_url: String,
    pub directory: DirectoryConfig,
    pub authorization: AuthorizationConfig,
    pub chat_model: ChatModelConfig,
    pub search: SearchConfig,
    pub agent: AgentConfig,
    /// Uniform timeout for directory, search and model calls
    pub http_timeout: Duration,
    pub turn_timeout: Duration,
}

const DEFAULT_API_VERSION: &str = "2024-02-01";

impl RuntimeConfig {
    /// Reads the process environment. Call `dotenvy::dotenv()` first to honour `.env`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &'static str| -> Result<String, ConfigError> {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .ok_or(ConfigError::Missing(name))
        };
        let get_or = |name: &str, default: &str| -> String {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| default.to_string())
        };
        let get_u64 = |name: &str, min: u64, max: u64, default: u64| -> u64 {
            parse_u64_with_bounds(lookup(name), min, max, default)
        };

        Ok(Self {
            database_url: get("DATABASE_URL")?,
            directory: DirectoryConfig {
                tenant_id: get("TEAMS_APP_TENANT_ID")?,
                client_id: get("BOT_ID")?,
                client_secret: get("BOT_PASSWORD")?,
                authority_base: get_or("LOGIN_AUTHORITY_BASE", "https://login.microsoftonline.com"),
                graph_base: get_or("GRAPH_BASE_URL", "https://graph.microsoft.com"),
            },
            authorization: AuthorizationConfig {
                base_url: get("SERVICEID_TOKEN_REQUEST_URL")?,
                token: get("SERVICEID_TOKEN")?,
                timeout: Duration::from_secs(get_u64("ORDERSIGHT_AUTHZ_TIMEOUT_SECS", 1, 60, 5)),
            },
            chat_model: ChatModelConfig {
                endpoint: get("AZURE_OPENAI_ENDPOINT")?,
                api_key: get("AZURE_OPENAI_API_KEY")?,
                deployment: get("AZURE_OPENAI_MODEL_DEPLOYMENT_NAME")?,
                api_version: get_or("AZURE_OPENAI_API_VERSION", DEFAULT_API_VERSION),
            },
            search: SearchConfig {
                endpoint: get("AI_SEARCH_ENDPOINT")?,
                index: get("AI_SEARCH_INDEX")?,
                api_key: get("AI_SEARCH_API_KEY")?,
                semantic_configuration: get("AI_SEARCH_SEMANTIC_CONFIG_NAME")?,
                content_field: get_or("AZURESEARCH_FIELDS_CONTENT", "content"),
                vector_field: get_or("AZURESEARCH_FIELDS_CONTENT_VECTOR", "content_vector"),
                top_k: get_u64("ORDERSIGHT_EXAMPLE_K", 1, 20, 3) as usize,
                embedding_endpoint: get("OPENAI_ENDPOINT")?,
                embedding_key: get("OPENAI_KEY")?,
                embedding_deployment: get("OPENAI_DEPOLYMENT_ID_ADA")?,
            },
            agent: AgentConfig {
                dialect: get_or("ORDERSIGHT_SQL_DIALECT", "PostgreSQL"),
                top_k: get_u64("ORDERSIGHT_TOP_K", 1, 1000, 5) as usize,
                max_steps: get_u64("ORDERSIGHT_MAX_AGENT_STEPS", 2, 200, 25) as usize,
                statement_timeout: Duration::from_millis(get_u64(
                    "ORDERSIGHT_STATEMENT_TIMEOUT_MS",
                    100,
                    600_000,
                    15_000,
                )),
            },
            http_timeout: Duration::from_secs(get_u64("ORDERSIGHT_HTTP_TIMEOUT_SECS", 1, 300, 30)),
            turn_timeout: Duration::from_secs(get_u64("ORDERSIGHT_TURN_TIMEOUT_SECS", 5, 900, 120)),
        })
    }
}

fn parse_u64_with_bounds(raw: Option<String>, min: u64, max: u64, default: u64) -> u64 {
    match raw.and_then(|value| value.trim().parse::<u64>().ok()) {
        Some(parsed) => parsed.clamp(min, max),
        None => default,
    }
}
