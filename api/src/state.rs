use std::sync::Arc;

use ordersight_runtime::pipeline::TurnPipeline;
use sqlx::PgPool;

#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub pipeline: Arc<TurnPipeline>,
}
