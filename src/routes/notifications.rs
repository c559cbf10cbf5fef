use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Extension, Router};
use serde::Serialize;

use crate::auth::AuthUser;
use crate::response::{ok, AppError};
use crate::services::{notification, require_admin};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list))
        .route("/unread-count", get(unread_count))
        .route("/read-all", post(mark_all_read))
        .route("/cleanup", post(cleanup))
        .route("/:id/read", post(mark_read))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UnreadCount {
    count: i64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Affected {
    affected: u64,
}

async fn list(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<impl IntoResponse, AppError> {
    let retention = state.services().notification_retention_days;
    Ok(ok(notification::list_for_user(state.db().pool(), user.id, retention).await?))
}

async fn unread_count(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<impl IntoResponse, AppError> {
    let count = notification::unread_count(state.db().pool(), user.id).await?;
    Ok(ok(UnreadCount { count }))
}

async fn mark_read(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    Ok(ok(notification::mark_read(state.db().pool(), user.id, id).await?))
}

async fn mark_all_read(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<impl IntoResponse, AppError> {
    let affected = notification::mark_all_read(state.db().pool(), user.id).await?;
    Ok(ok(Affected { affected }))
}

async fn cleanup(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<impl IntoResponse, AppError> {
    require_admin(&user)?;
    let retention = state.services().notification_retention_days;
    let affected = notification::cleanup_old(state.db().pool(), retention).await?;
    Ok(ok(Affected { affected }))
}
