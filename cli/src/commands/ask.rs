use ordersight_core::identity::SessionContext;
use ordersight_runtime::config::RuntimeConfig;
use ordersight_runtime::pipeline::TurnPipeline;
use serde_json::{Value, json};
use sqlx::postgres::PgPoolOptions;

use crate::util::{api_request, emit, exit_error};

fn turn_body(question: &str, directory_object_id: Option<&str>, conversation_id: Option<&str>) -> Value {
    let mut body = json!({ "question": question });
    if let Some(id) = directory_object_id {
        body["directory_object_id"] = json!(id);
    }
    if let Some(id) = conversation_id {
        body["conversation_id"] = json!(id);
    }
    body
}

/// Ask through a running API server.
pub async fn remote(
    api_url: &str,
    question: &str,
    directory_object_id: Option<&str>,
    conversation_id: Option<&str>,
) -> i32 {
    let body = turn_body(question, directory_object_id, conversation_id);
    api_request(api_url, reqwest::Method::POST, "/v1/turns", Some(body)).await
}

/// Run the turn in-process against the configured database and services.
pub async fn local(
    question: &str,
    directory_object_id: Option<&str>,
    conversation_id: Option<&str>,
) -> i32 {
    let config = match RuntimeConfig::from_env() {
        Ok(config) => config,
        Err(e) => exit_error(
            &e.to_string(),
            Some("Local mode reads the same environment variables as the API server."),
        ),
    };
    let pool = match PgPoolOptions::new()
        .max_connections(2)
        .connect(&config.database_url)
        .await
    {
        Ok(pool) => pool,
        Err(e) => {
            return emit(
                &json!({
                    "error": "connection_error",
                    "message": format!("Failed to connect to database: {e}"),
                }),
                3,
            );
        }
    };
    let pipeline = match TurnPipeline::from_config(&config, pool) {
        Ok(pipeline) => pipeline,
        Err(e) => exit_error(&format!("Failed to build HTTP clients: {e}"), None),
    };

    let session = SessionContext {
        conversation_id: conversation_id.map(str::to_string),
        directory_object_id: directory_object_id.map(str::to_string),
        question: question.to_string(),
    };
    let result = pipeline.run(&session).await;
    match serde_json::to_value(&result) {
        Ok(value) => emit(&value, 0),
        Err(e) => exit_error(&format!("Failed to render result: {e}"), None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optional_ids_are_omitted() {
        let body = turn_body("open orders", None, None);
        assert_eq!(body, json!({ "question": "open orders" }));
    }

    #[test]
    fn ids_are_forwarded() {
        let body = turn_body("open orders", Some("aad-1"), Some("conv-9"));
        assert_eq!(body["directory_object_id"], "aad-1");
        assert_eq!(body["conversation_id"], "conv-9");
    }
}
