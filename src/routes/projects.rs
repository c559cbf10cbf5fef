use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use serde::Serialize;

use crate::auth::AuthUser;
use crate::response::{created, ok, ok_with_message, AppError};
use crate::services::projects::{self, ProjectInput, ProjectPatch, ReviewInput};
use crate::services::require_admin;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list).post(submit))
        .route("/:id", get(get_one).put(update).delete(remove))
        .route("/:id/review", post(review))
}

#[derive(Serialize)]
struct Deleted {
    id: i64,
}

async fn list(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<impl IntoResponse, AppError> {
    Ok(ok(projects::list_for(state.db().pool(), &user).await?))
}

async fn get_one(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    Ok(ok(projects::visible_project(state.db().pool(), &user, id).await?))
}

async fn submit(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(payload): Json<ProjectInput>,
) -> Result<impl IntoResponse, AppError> {
    Ok(created(projects::submit(state.db(), &user, payload).await?))
}

async fn update(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<i64>,
    Json(payload): Json<ProjectPatch>,
) -> Result<impl IntoResponse, AppError> {
    require_admin(&user)?;
    Ok(ok(projects::update_project(state.db().pool(), id, payload).await?))
}

async fn remove(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    require_admin(&user)?;
    projects::delete_project(state.db().pool(), id).await?;
    Ok(ok_with_message(Deleted { id }, "Project deleted"))
}

async fn review(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<i64>,
    Json(payload): Json<ReviewInput>,
) -> Result<impl IntoResponse, AppError> {
    require_admin(&user)?;
    Ok(ok(projects::review(state.db(), &user, id, payload).await?))
}
