use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::{get, post, put};
use axum::{Extension, Json, Router};
use serde::{Deserialize, Serialize};

use crate::auth::AuthUser;
use crate::response::{created, ok, ok_with_message, AppError};
use crate::services::students::{self, CreateStudentInput, StrengthInput, UpdateStudentInput, WeaknessInput};
use crate::services::sync::{self, ScoreChange};
use crate::services::{domains, require_admin};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list).post(create))
        .route("/me", get(me))
        .route("/domains", get(available_domains))
        .route("/:id", get(get_one).put(update).delete(remove))
        .route("/:id/domain-scores", put(bulk_set_scores))
        .route(
            "/:id/domain-scores/:domain_id",
            put(set_score).delete(remove_score),
        )
        .route("/:id/domain-scores/:domain_id/strengths", post(add_strength))
        .route("/:id/domain-scores/:domain_id/weaknesses", post(add_weakness))
        .route("/:id/sync-domains", post(resync))
        .route("/:id/strengths-weaknesses", get(strengths_weaknesses))
        .route("/:id/weekly-progress", get(weekly_progress))
}

#[derive(Debug, Deserialize)]
struct ScorePayload {
    score: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScoreEntry {
    domain_id: i64,
    score: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BulkScoresPayload {
    #[serde(default)]
    scores: Vec<ScoreEntry>,
    #[serde(default)]
    remove: Vec<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Deleted {
    id: i64,
}

async fn me(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<impl IntoResponse, AppError> {
    Ok(ok(students::current_student(state.db().pool(), &user).await?))
}

async fn list(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<impl IntoResponse, AppError> {
    require_admin(&user)?;
    Ok(ok(students::list_students(state.db().pool()).await?))
}

async fn available_domains(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    Ok(ok(domains::list_domains(state.db().pool()).await?))
}

async fn get_one(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    Ok(ok(students::visible_student(state.db().pool(), &user, id).await?))
}

async fn create(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(payload): Json<CreateStudentInput>,
) -> Result<impl IntoResponse, AppError> {
    require_admin(&user)?;
    let student = students::create_student(state.db(), state.services(), payload).await?;
    Ok(created(student))
}

async fn update(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<i64>,
    Json(payload): Json<UpdateStudentInput>,
) -> Result<impl IntoResponse, AppError> {
    require_admin(&user)?;
    let updated = students::update_student(state.db(), state.services(), id, payload).await?;
    Ok(ok(updated))
}

async fn remove(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    require_admin(&user)?;
    let name = students::delete_student(state.db(), id).await?;
    Ok(ok_with_message(Deleted { id }, format!("Student {name} deleted")))
}

async fn set_score(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path((id, domain_id)): Path<(i64, i64)>,
    Json(payload): Json<ScorePayload>,
) -> Result<impl IntoResponse, AppError> {
    require_admin(&user)?;
    let change = ScoreChange::Set {
        domain_id,
        score: payload.score,
    };
    let aggregates = students::change_domain_scores(state.db(), state.services(), id, &[change]).await?;
    Ok(ok(aggregates))
}

async fn remove_score(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path((id, domain_id)): Path<(i64, i64)>,
) -> Result<impl IntoResponse, AppError> {
    require_admin(&user)?;
    let change = ScoreChange::Remove { domain_id };
    let aggregates = students::change_domain_scores(state.db(), state.services(), id, &[change]).await?;
    Ok(ok(aggregates))
}

async fn bulk_set_scores(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<i64>,
    Json(payload): Json<BulkScoresPayload>,
) -> Result<impl IntoResponse, AppError> {
    require_admin(&user)?;
    let changes: Vec<ScoreChange> = payload
        .scores
        .iter()
        .map(|entry| ScoreChange::Set {
            domain_id: entry.domain_id,
            score: entry.score,
        })
        .chain(
            payload
                .remove
                .iter()
                .map(|domain_id| ScoreChange::Remove { domain_id: *domain_id }),
        )
        .collect();

    let aggregates = students::change_domain_scores(state.db(), state.services(), id, &changes).await?;
    Ok(ok(aggregates))
}

async fn add_strength(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path((id, domain_id)): Path<(i64, i64)>,
    Json(payload): Json<StrengthInput>,
) -> Result<impl IntoResponse, AppError> {
    require_admin(&user)?;
    Ok(created(students::add_strength(state.db(), id, domain_id, payload).await?))
}

async fn add_weakness(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path((id, domain_id)): Path<(i64, i64)>,
    Json(payload): Json<WeaknessInput>,
) -> Result<impl IntoResponse, AppError> {
    require_admin(&user)?;
    Ok(created(students::add_weakness(state.db(), id, domain_id, payload).await?))
}

async fn resync(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    require_admin(&user)?;
    Ok(ok(students::resync_domains(state.db(), state.services(), id).await?))
}

async fn strengths_weaknesses(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let record = students::visible_student(state.db().pool(), &user, id).await?;
    Ok(ok(students::summarize_strengths_weaknesses(&record)))
}

async fn weekly_progress(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let record = students::visible_student(state.db().pool(), &user, id).await?;
    let view = students::weekly_progress_view(state.db().pool(), &record, sync::today()).await?;
    Ok(ok(view))
}
