use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Extension, Json, Router};
use serde::Serialize;

use crate::auth::AuthUser;
use crate::response::{created, ok, ok_with_message, AppError};
use crate::services::domains::{self, DomainInput, DomainPatch};
use crate::services::require_admin;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list).post(create))
        .route("/:id", get(get_one).put(update).delete(remove))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DomainDeleted {
    id: i64,
    students_recomputed: usize,
}

async fn list(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    Ok(ok(domains::list_domains(state.db().pool()).await?))
}

async fn get_one(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    Ok(ok(domains::get_domain(state.db().pool(), id).await?))
}

async fn create(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(payload): Json<DomainInput>,
) -> Result<impl IntoResponse, AppError> {
    require_admin(&user)?;
    Ok(created(domains::create_domain(state.db().pool(), payload).await?))
}

async fn update(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<i64>,
    Json(payload): Json<DomainPatch>,
) -> Result<impl IntoResponse, AppError> {
    require_admin(&user)?;
    Ok(ok(domains::update_domain(state.db().pool(), id, payload).await?))
}

async fn remove(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    require_admin(&user)?;
    let affected = domains::delete_domain(state.db(), state.services(), id).await?;
    Ok(ok_with_message(
        DomainDeleted {
            id,
            students_recomputed: affected.len(),
        },
        "Domain deleted",
    ))
}
