use axum::http::{HeaderName, HeaderValue, Method};
use tower_http::cors::CorsLayer;

/// CORS for browser-based bot hosts, from `ORDERSIGHT_CORS_ORIGINS`.
///
/// Comma-separated origins (default `http://localhost:3978`); GET, POST and OPTIONS only.
pub fn build_cors_layer() -> CorsLayer {
    let raw = std::env::var("ORDERSIGHT_CORS_ORIGINS")
        .unwrap_or_else(|_| "http://localhost:3978".to_string());

    CorsLayer::new()
        .allow_origin(parse_origins(&raw))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([HeaderName::from_static("content-type")])
        .max_age(std::time::Duration::from_secs(3600))
}

fn parse_origins(raw: &str) -> Vec<HeaderValue> {
    raw.split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .filter_map(|origin| origin.parse::<HeaderValue>().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_entries_are_skipped() {
        let origins = parse_origins("https://teams.example, ,http://localhost:3978");
        assert_eq!(origins.len(), 2);
        assert_eq!(origins[0], "https://teams.example");
    }
}
