mod announcements;
mod assessments;
mod auth;
mod courses;
mod domains;
mod health;
mod notifications;
mod projects;
mod students;

use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::Router;

use crate::middleware::auth::require_auth;
use crate::response::AppError;
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .nest("/api/students", students::router())
        .nest("/api/domains", domains::router())
        .nest("/api/courses", courses::router())
        .nest("/api/announcements", announcements::router())
        .nest("/api/projects", projects::router())
        .nest("/api/notifications", notifications::router())
        .nest("/api/assessments", assessments::router())
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .nest("/health", health::router())
        .nest("/api/auth", auth::router(state.clone()))
        .merge(protected)
        .fallback(fallback_handler)
        .with_state(state)
}

async fn fallback_handler() -> Response {
    AppError::not_found("Endpoint not found").into_response()
}
