use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use serde::Serialize;

use crate::auth::AuthUser;
use crate::response::{created, ok, ok_with_message, AppError};
use crate::services::announcements::{self, AnnouncementInput, AnnouncementPatch};
use crate::services::require_admin;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list).post(create))
        .route("/:id", get(get_one).put(update).delete(remove))
        .route("/:id/read", post(mark_read))
}

#[derive(Serialize)]
struct Ack {
    id: i64,
}

async fn list(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<impl IntoResponse, AppError> {
    Ok(ok(announcements::list_for(state.db().pool(), &user).await?))
}

async fn get_one(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    if user.is_admin() {
        return Ok(ok(announcements::get_announcement(state.db().pool(), id).await?));
    }
    let visible = announcements::list_for(state.db().pool(), &user).await?;
    let announcement = visible
        .into_iter()
        .find(|a| a.id == id)
        .ok_or_else(|| AppError::not_found("Announcement not found"))?;
    Ok(ok(announcement))
}

async fn create(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(payload): Json<AnnouncementInput>,
) -> Result<impl IntoResponse, AppError> {
    require_admin(&user)?;
    Ok(created(announcements::create_announcement(state.db(), &user, payload).await?))
}

async fn update(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<i64>,
    Json(payload): Json<AnnouncementPatch>,
) -> Result<impl IntoResponse, AppError> {
    require_admin(&user)?;
    Ok(ok(announcements::update_announcement(state.db(), id, payload).await?))
}

async fn remove(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    require_admin(&user)?;
    announcements::delete_announcement(state.db().pool(), id).await?;
    Ok(ok_with_message(Ack { id }, "Announcement deleted"))
}

async fn mark_read(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    announcements::mark_read(state.db().pool(), &user, id).await?;
    Ok(ok_with_message(Ack { id }, "Announcement marked as read"))
}
