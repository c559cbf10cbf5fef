pub mod auth;
pub mod config;
pub mod db;
pub mod logging;
pub mod middleware;
pub mod response;
pub mod routes;
pub mod seed;
pub mod services;
pub mod state;

use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::Config;
use crate::db::{DatabaseProxy, DbInitError};
use crate::state::AppState;

pub fn build_router(state: AppState) -> axum::Router {
    routes::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Connects the database, applies migrations and optional seed data, and
/// returns the router.
pub async fn create_app(config: Config) -> Result<axum::Router, DbInitError> {
    let db = DatabaseProxy::connect(config.db.clone()).await?;

    if config.seed_demo_data {
        if let Err(err) = seed::run(db.pool(), &config).await {
            tracing::warn!(error = %err, "seeding demo data failed");
        }
    }

    Ok(build_router(AppState::new(db, config)))
}
