use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use ordersight_runtime::config::RuntimeConfig;
use ordersight_runtime::pipeline::TurnPipeline;
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

mod error;
mod extract;
mod middleware;
mod routes;
mod state;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Ordersight API",
        version = "0.1.0",
        description = "Ask plain-language questions about orders. Every query is scoped to the partitions the asking user is authorized for."
    ),
    paths(routes::health::health_check, routes::turns::run_turn),
    components(schemas(
        HealthResponse,
        routes::turns::TurnRequest,
        ordersight_core::turn::TurnResult,
        ordersight_core::error::ApiError,
    ))
)]
struct ApiDoc;

#[derive(Serialize, utoipa::ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    /// Tables the agent may query
    pub tables: usize,
}

#[tokio::main]
async fn main() {
    // Load .env if present (dev only)
    let _ = dotenvy::dotenv();

    // Structured JSON logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "ordersight_api=debug,ordersight_runtime=info,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let config = RuntimeConfig::from_env().expect("Invalid configuration");

    let pool = PgPoolOptions::new()
        .max_connections(20)
        .connect(&config.database_url)
        .await
        .expect("Failed to connect to database");

    sqlx::migrate!("../migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    let pipeline =
        TurnPipeline::from_config(&config, pool.clone()).expect("Failed to build HTTP clients");
    let app_state = state::AppState {
        db: pool,
        pipeline: Arc::new(pipeline),
    };

    let app = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .merge(routes::health::router())
        .merge(routes::turns::router())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(middleware::cors::build_cors_layer()),
        )
        .with_state(app_state);

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(3978);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Ordersight API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind listener");
    axum::serve(listener, app)
        .await
        .expect("Server error");
}
