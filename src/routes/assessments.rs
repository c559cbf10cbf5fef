use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Extension, Json, Router};

use crate::auth::AuthUser;
use crate::response::{created, ok, AppError};
use crate::services::assessments::{self, AssessmentInput};
use crate::services::require_admin;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list).post(create))
        .route("/:id", get(get_one))
}

async fn list(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<impl IntoResponse, AppError> {
    Ok(ok(assessments::list_for(state.db().pool(), &user).await?))
}

async fn get_one(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    Ok(ok(assessments::get_assessment(state.db().pool(), &user, id).await?))
}

async fn create(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(payload): Json<AssessmentInput>,
) -> Result<impl IntoResponse, AppError> {
    require_admin(&user)?;
    Ok(created(assessments::create_assessment(state.db(), &user, payload).await?))
}
