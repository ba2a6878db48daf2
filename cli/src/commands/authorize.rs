use std::time::Duration;

use ordersight_runtime::authorization::HttpAuthorizationLookup;
use ordersight_runtime::config::AuthorizationConfig;
use serde_json::json;

use crate::util::{emit, exit_error};

/// Look up the partitions an email is authorized for, surfacing failures
/// instead of collapsing them to an empty set.
pub async fn run(email: &str, base_url: &str, token: &str, timeout_secs: u64) -> i32 {
    let timeout = Duration::from_secs(timeout_secs.clamp(1, 60));
    let http = match ordersight_runtime::http::client(timeout) {
        Ok(http) => http,
        Err(e) => exit_error(&format!("Failed to build HTTP client: {e}"), None),
    };
    let lookup = HttpAuthorizationLookup::new(
        http,
        AuthorizationConfig {
            base_url: base_url.to_string(),
            token: token.to_string(),
            timeout,
        },
    );

    match lookup.try_authorize(email).await {
        Ok(partitions) => emit(
            &json!({
                "email": email,
                "partitions": partitions,
                "count": partitions.len(),
            }),
            0,
        ),
        Err(e) => emit(
            &json!({
                "error": "authorization_failed",
                "message": e.to_string(),
                "docs_hint": "Check SERVICEID_TOKEN_REQUEST_URL and SERVICEID_TOKEN.",
            }),
            2,
        ),
    }
}
