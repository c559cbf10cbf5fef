use axum::extract::State;
use axum::middleware;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use serde::Deserialize;

use crate::auth::AuthUser;
use crate::middleware::auth::require_auth;
use crate::response::{created, ok, AppError};
use crate::services::{courses, users};
use crate::state::AppState;

pub fn router(state: AppState) -> Router<AppState> {
    let protected = Router::new()
        .route("/profile", get(profile).put(update_profile))
        .route("/admin-code", get(admin_code).put(set_admin_code))
        .route_layer(middleware::from_fn_with_state(state, require_auth));

    Router::new()
        .route("/register", post(register))
        .route("/courses", get(registration_courses))
        .merge(protected)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AdminCodePayload {
    admin_code: String,
}

async fn register(
    State(state): State<AppState>,
    Json(payload): Json<users::RegisterInput>,
) -> Result<impl IntoResponse, AppError> {
    let registration = users::register(state.db(), state.services(), payload).await?;
    Ok(created(registration))
}

async fn registration_courses(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let courses = courses::list_active_courses(state.db().pool()).await?;
    Ok(ok(courses))
}

async fn profile(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<impl IntoResponse, AppError> {
    Ok(ok(users::profile(state.db().pool(), &user).await?))
}

async fn update_profile(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(payload): Json<users::ProfilePatch>,
) -> Result<impl IntoResponse, AppError> {
    Ok(ok(users::update_profile(state.db().pool(), &user, payload).await?))
}

async fn admin_code(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<impl IntoResponse, AppError> {
    Ok(ok(users::admin_code(state.db().pool(), &user).await?))
}

async fn set_admin_code(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(payload): Json<AdminCodePayload>,
) -> Result<impl IntoResponse, AppError> {
    let code = users::set_admin_code(state.db().pool(), &user, &payload.admin_code).await?;
    Ok(ok(code))
}
