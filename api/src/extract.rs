//! JSON extractor whose rejections are structured `AppError` bodies instead of
//! axum's plain-text 4xx responses.

use axum::{
    Json,
    extract::{FromRequest, Request, rejection::JsonRejection},
};

use crate::error::AppError;

pub struct AppJson<T>(pub T);

impl<S, T> FromRequest<S> for AppJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(AppJson(value)),
            Err(rejection) => Err(map_json_rejection(rejection)),
        }
    }
}

pub fn map_json_rejection(rejection: JsonRejection) -> AppError {
    let body_text = rejection.body_text();
    AppError::Validation {
        message: format!("Invalid request body: {body_text}"),
        field: Some(serde_field(&body_text).unwrap_or_else(|| "body".to_string())),
        received: None,
        docs_hint: Some(
            "Check the request body against the schema at /api-doc/openapi.json.".to_string(),
        ),
    }
}

/// Field named in serde's "missing field `x`" / "unknown field `x`" messages.
fn serde_field(msg: &str) -> Option<String> {
    ["missing field `", "unknown field `"].iter().find_map(|marker| {
        let after = &msg[msg.find(marker)? + marker.len()..];
        let end = after.find('`')?;
        Some(after[..end].to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_missing_field() {
        let msg = "Failed to deserialize the JSON body: missing field `question` at line 1 column 2";
        assert_eq!(serde_field(msg), Some("question".to_string()));
    }

    #[test]
    fn finds_unknown_field() {
        let msg = "unknown field `sql`, expected one of `question`, `conversation_id`";
        assert_eq!(serde_field(msg), Some("sql".to_string()));
    }

    #[test]
    fn generic_errors_have_no_field() {
        assert_eq!(serde_field("invalid type: integer, expected a string"), None);
    }
}
