pub mod health;
pub mod reconcile;
pub mod trades;

use crate::config::Config;
use crate::db::Repository;
use crate::orchestration::Reconciler;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<Repository>,
    pub config: Config,
    pub reconciler: Arc<Reconciler>,
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        .route("/v1/trades", get(trades::get_trades))
        .route("/v1/reconcile", post(reconcile::run_reconcile))
        .layer(cors)
        .with_state(state)
}
