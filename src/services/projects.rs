use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::auth::AuthUser;
use crate::db::DatabaseProxy;
use crate::services::notification::{self, Notice, NotificationType};
use crate::services::scoring;
use crate::services::students::student_id_for_user;
use crate::services::{trimmed_required, ServiceError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    #[default]
    Pending,
    InReview,
    Approved,
    NeedsRevision,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InReview => "in_review",
            Self::Approved => "approved",
            Self::NeedsRevision => "needs_revision",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "in_review" => Some(Self::InReview),
            "approved" => Some(Self::Approved),
            "needs_revision" => Some(Self::NeedsRevision),
            _ => None,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InReview => "in review",
            Self::Approved => "approved",
            Self::NeedsRevision => "returned for revision",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectRecord {
    pub id: i64,
    pub student_id: i64,
    pub student_identifier: String,
    pub student_name: String,
    pub title: String,
    pub description: String,
    pub project_url: String,
    pub technologies_used: String,
    pub submission_date: DateTime<Utc>,
    pub status: ProjectStatus,
    pub grade: Option<f64>,
    pub feedback: String,
    pub reviewed_by: Option<i64>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectInput {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub project_url: String,
    #[serde(default)]
    pub technologies_used: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub project_url: Option<String>,
    pub technologies_used: Option<String>,
    pub status: Option<ProjectStatus>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewInput {
    pub status: ProjectStatus,
    #[serde(default)]
    pub grade: Option<f64>,
    #[serde(default)]
    pub feedback: String,
}

const PROJECT_SELECT: &str = r#"
    SELECT p."id", p."student_id", p."title", p."description", p."project_url",
           p."technologies_used", p."submission_date", p."status", p."grade", p."feedback",
           p."reviewed_by", p."reviewed_at", p."created_at", p."updated_at",
           s."student_id" AS "student_identifier",
           TRIM(u."first_name" || ' ' || u."last_name") AS "student_name"
    FROM "projects" p
    JOIN "students" s ON s."id" = p."student_id"
    JOIN "users" u ON u."id" = s."user_id"
"#;

fn map_project_row(row: &SqliteRow) -> Result<ProjectRecord, sqlx::Error> {
    let status: String = row.try_get("status")?;
    let status = ProjectStatus::parse(&status)
        .ok_or_else(|| sqlx::Error::Decode(format!("unknown project status {status}").into()))?;

    Ok(ProjectRecord {
        id: row.try_get("id")?,
        student_id: row.try_get("student_id")?,
        student_identifier: row.try_get("student_identifier")?,
        student_name: row.try_get("student_name")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        project_url: row.try_get("project_url")?,
        technologies_used: row.try_get("technologies_used")?,
        submission_date: row.try_get("submission_date")?,
        status,
        grade: row.try_get("grade")?,
        feedback: row.try_get("feedback")?,
        reviewed_by: row.try_get("reviewed_by")?,
        reviewed_at: row.try_get("reviewed_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

pub async fn get_project(pool: &SqlitePool, id: i64) -> Result<ProjectRecord, ServiceError> {
    let sql = format!(r#"{PROJECT_SELECT} WHERE p."id" = ?"#);
    let row = sqlx::query(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| ServiceError::not_found("Project not found"))?;
    Ok(map_project_row(&row)?)
}

/// Students see their own submissions; admins see all.
pub async fn list_for(pool: &SqlitePool, user: &AuthUser) -> Result<Vec<ProjectRecord>, ServiceError> {
    let rows = if user.is_admin() {
        let sql = format!(r#"{PROJECT_SELECT} ORDER BY p."submission_date" DESC, p."id" DESC"#);
        sqlx::query(&sql).fetch_all(pool).await?
    } else {
        let Some(student_id) = student_id_for_user(pool, user.id).await? else {
            return Err(ServiceError::StudentProfileMissing(Box::new(user.clone())));
        };
        let sql = format!(
            r#"{PROJECT_SELECT} WHERE p."student_id" = ? ORDER BY p."submission_date" DESC, p."id" DESC"#
        );
        sqlx::query(&sql).bind(student_id).fetch_all(pool).await?
    };

    Ok(rows
        .iter()
        .map(map_project_row)
        .collect::<Result<Vec<_>, sqlx::Error>>()?)
}

pub async fn visible_project(
    pool: &SqlitePool,
    user: &AuthUser,
    id: i64,
) -> Result<ProjectRecord, ServiceError> {
    let project = get_project(pool, id).await?;
    if user.is_admin() {
        return Ok(project);
    }
    match student_id_for_user(pool, user.id).await? {
        Some(student_id) if student_id == project.student_id => Ok(project),
        _ => Err(ServiceError::not_found("Project not found")),
    }
}

pub async fn submit(
    proxy: &DatabaseProxy,
    user: &AuthUser,
    input: ProjectInput,
) -> Result<ProjectRecord, ServiceError> {
    if user.is_admin() {
        return Err(ServiceError::Forbidden(
            "Only students can submit projects".to_string(),
        ));
    }
    let title = trimmed_required(&input.title, "Title")?;
    let student_id = student_id_for_user(proxy.pool(), user.id)
        .await?
        .ok_or_else(|| ServiceError::StudentProfileMissing(Box::new(user.clone())))?;

    let mut tx = proxy.begin_write().await?;
    let now = Utc::now();

    let result = sqlx::query(
        r#"
        INSERT INTO "projects"
          ("student_id", "title", "description", "project_url", "technologies_used",
           "submission_date", "status", "feedback", "created_at", "updated_at")
        VALUES (?, ?, ?, ?, ?, ?, 'pending', '', ?, ?)
        "#,
    )
    .bind(student_id)
    .bind(&title)
    .bind(input.description.trim())
    .bind(input.project_url.trim())
    .bind(input.technologies_used.trim())
    .bind(now)
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    let project_id = result.last_insert_rowid();
    let admins = notification::admin_ids(&mut tx).await?;
    notification::emit(
        &mut tx,
        &admins,
        &Notice {
            kind: NotificationType::ProjectSubmitted,
            title: "New project submission".to_string(),
            message: format!("{} submitted \"{title}\".", user.full_name()),
            related_project_id: Some(project_id),
            route_url: format!("/admin/projects/{project_id}"),
        },
    )
    .await?;

    tx.commit().await?;

    tracing::info!(project_id, student_id, "project submitted");
    get_project(proxy.pool(), project_id).await
}

pub async fn update_project(
    pool: &SqlitePool,
    id: i64,
    patch: ProjectPatch,
) -> Result<ProjectRecord, ServiceError> {
    let title = patch
        .title
        .as_deref()
        .map(|v| trimmed_required(v, "Title"))
        .transpose()?;

    let result = sqlx::query(
        r#"
        UPDATE "projects"
        SET "title" = COALESCE(?, "title"),
            "description" = COALESCE(?, "description"),
            "project_url" = COALESCE(?, "project_url"),
            "technologies_used" = COALESCE(?, "technologies_used"),
            "status" = COALESCE(?, "status"),
            "updated_at" = ?
        WHERE "id" = ?
        "#,
    )
    .bind(title)
    .bind(patch.description)
    .bind(patch.project_url)
    .bind(patch.technologies_used)
    .bind(patch.status.map(|s| s.as_str()))
    .bind(Utc::now())
    .bind(id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(ServiceError::not_found("Project not found"));
    }
    get_project(pool, id).await
}

pub async fn delete_project(pool: &SqlitePool, id: i64) -> Result<(), ServiceError> {
    let result = sqlx::query(r#"DELETE FROM "projects" WHERE "id" = ?"#)
        .bind(id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(ServiceError::not_found("Project not found"));
    }
    Ok(())
}

/// Records a trainer's review and notifies the student.
pub async fn review(
    proxy: &DatabaseProxy,
    reviewer: &AuthUser,
    id: i64,
    input: ReviewInput,
) -> Result<ProjectRecord, ServiceError> {
    let grade = input
        .grade
        .map(scoring::validate_score)
        .transpose()
        .map_err(ServiceError::Validation)?;

    let mut tx = proxy.begin_write().await?;
    let now = Utc::now();

    let row = sqlx::query(
        r#"
        UPDATE "projects"
        SET "status" = ?, "grade" = ?, "feedback" = ?, "reviewed_by" = ?,
            "reviewed_at" = ?, "updated_at" = ?
        WHERE "id" = ?
        RETURNING "student_id", "title"
        "#,
    )
    .bind(input.status.as_str())
    .bind(grade)
    .bind(input.feedback.trim())
    .bind(reviewer.id)
    .bind(now)
    .bind(now)
    .bind(id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| ServiceError::not_found("Project not found"))?;

    let student_id: i64 = row.try_get("student_id")?;
    let title: String = row.try_get("title")?;

    let recipient: i64 = sqlx::query_scalar(r#"SELECT "user_id" FROM "students" WHERE "id" = ?"#)
        .bind(student_id)
        .fetch_one(&mut *tx)
        .await?;

    let mut message = format!("Your project \"{title}\" was {}.", input.status.label());
    if let Some(grade) = grade {
        message.push_str(&format!(" Grade: {grade}."));
    }

    notification::emit(
        &mut tx,
        &[recipient],
        &Notice {
            kind: NotificationType::ProjectReviewed,
            title: "Project reviewed".to_string(),
            message,
            related_project_id: Some(id),
            route_url: format!("/projects/{id}"),
        },
    )
    .await?;

    tx.commit().await?;

    tracing::info!(project_id = id, status = input.status.as_str(), "project reviewed");
    get_project(proxy.pool(), id).await
}
