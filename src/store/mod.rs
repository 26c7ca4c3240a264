pub mod bootstrap;
pub mod pool;

use std::sync::Arc;

use sqlx::PgPool;

use crate::build::queue::BuildState;
use crate::config::Config;

/// Shared application state, threaded through every handler via axum's
/// `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<Config>,
    pub build_state: Arc<BuildState>,
}

impl AppState {
    pub fn new(pool: PgPool, config: Config) -> Self {
        let build_concurrency = config.build_concurrency;
        Self {
            pool,
            config: Arc::new(config),
            build_state: Arc::new(BuildState::new(build_concurrency)),
        }
    }
}
