use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use ordersight_core::identity::SessionContext;
use ordersight_core::turn::TurnResult;
use serde::Deserialize;
use utoipa::ToSchema;

use crate::error::AppError;
use crate::extract::AppJson;
use crate::state::AppState;

/// Longest question accepted, in characters.
pub const MAX_QUESTION_CHARS: usize = 4000;

pub fn router() -> Router<AppState> {
    Router::new().route("/v1/turns", post(run_turn))
}

/// One conversational turn as delivered by the bot host.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct TurnRequest {
    /// Opaque conversation id, used only for log correlation
    #[serde(default)]
    pub conversation_id: Option<String>,
    /// Directory object id of the user asking
    #[serde(default)]
    pub directory_object_id: Option<String>,
    /// The user's question in plain language
    pub question: String,
}

impl TurnRequest {
    fn into_session(self) -> Result<SessionContext, AppError> {
        let length = self.question.chars().count();
        if length > MAX_QUESTION_CHARS {
            return Err(AppError::Validation {
                message: format!(
                    "question is {length} characters; at most {MAX_QUESTION_CHARS} are accepted"
                ),
                field: Some("question".to_string()),
                received: None,
                docs_hint: Some("Ask a shorter, more specific question.".to_string()),
            });
        }
        Ok(SessionContext {
            conversation_id: self.conversation_id,
            directory_object_id: self.directory_object_id,
            question: self.question,
        })
    }
}

/// Run one turn: authorize the user, ground, query and answer
///
/// Always 200 once the request is valid. Permission problems yield the fixed
/// fallback message and any other failure yields an empty result.
#[utoipa::path(
    post,
    path = "/v1/turns",
    request_body = TurnRequest,
    responses(
        (status = 200, description = "Turn handled", body = TurnResult),
        (status = 400, description = "Invalid request", body = ordersight_core::error::ApiError)
    ),
    tag = "turns"
)]
pub async fn run_turn(
    State(state): State<AppState>,
    AppJson(req): AppJson<TurnRequest>,
) -> Result<Json<TurnResult>, AppError> {
    let session = req.into_session()?;
    let result = state.pipeline.run(&session).await;
    tracing::info!(
        conversation_id = session.conversation_id.as_deref().unwrap_or("<none>"),
        length = result.length,
        empty = result.is_empty(),
        "turn completed"
    );
    Ok(Json(result))
}
