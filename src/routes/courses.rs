use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::{get, put};
use axum::{Extension, Json, Router};
use serde::{Deserialize, Serialize};

use crate::auth::AuthUser;
use crate::response::{created, ok, ok_with_message, AppError};
use crate::services::courses::{self, CourseInput, CoursePatch};
use crate::services::require_admin;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list).post(create))
        .route("/:id", get(get_one).put(update).delete(remove))
        .route("/:id/domains", put(replace_domains))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DomainSetPayload {
    domain_ids: Vec<i64>,
}

#[derive(Serialize)]
struct Deleted {
    id: i64,
}

async fn list(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    Ok(ok(courses::list_courses(state.db().pool()).await?))
}

async fn get_one(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    Ok(ok(courses::get_course(state.db().pool(), id).await?))
}

async fn create(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(payload): Json<CourseInput>,
) -> Result<impl IntoResponse, AppError> {
    require_admin(&user)?;
    Ok(created(courses::create_course(state.db(), state.services(), payload).await?))
}

async fn update(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<i64>,
    Json(payload): Json<CoursePatch>,
) -> Result<impl IntoResponse, AppError> {
    require_admin(&user)?;
    Ok(ok(courses::update_course(state.db(), state.services(), id, payload).await?))
}

async fn replace_domains(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<i64>,
    Json(payload): Json<DomainSetPayload>,
) -> Result<impl IntoResponse, AppError> {
    require_admin(&user)?;
    let patch = CoursePatch {
        domain_ids: Some(payload.domain_ids),
        ..CoursePatch::default()
    };
    Ok(ok(courses::update_course(state.db(), state.services(), id, patch).await?))
}

async fn remove(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    require_admin(&user)?;
    courses::delete_course(state.db(), id).await?;
    Ok(ok_with_message(Deleted { id }, "Course deleted"))
}
