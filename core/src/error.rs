use serde::Serialize;
use utoipa::ToSchema;

/// Structured error response returned by the HTTP host.
/// Carries enough to act on, never raw exception text, SQL or internal identifiers.
#[derive(Debug, Serialize, ToSchema)]
pub struct ApiError {
    /// Machine-readable error code (e.g. "validation_failed")
    pub error: String,
    /// Human-readable description of what went wrong
    pub message: String,
    /// Which field caused the error (if applicable)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    /// The value that was received (if applicable)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub received: Option<serde_json::Value>,
    /// Request ID for tracing and debugging
    pub request_id: String,
    /// Hint about what the correct usage looks like
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docs_hint: Option<String>,
}

/// Error codes used across the API and the tool surface
pub mod codes {
    pub const VALIDATION_FAILED: &str = "validation_failed";
    pub const MISSING_REQUIRED_FILTER: &str = "missing_required_filter";
    pub const STATEMENT_NOT_ALLOWED: &str = "statement_not_allowed";
    pub const UNKNOWN_TABLE: &str = "unknown_table";
    pub const DATABASE_ERROR: &str = "database_error";
}
