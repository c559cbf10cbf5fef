use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};

use crate::db::DatabaseProxy;
use crate::services::domains::{map_domain_row, DomainRecord};
use crate::services::{double_option, sync, trimmed_required, ServiceContext, ServiceError};

const DEFAULT_DURATION_WEEKS: i64 = 12;
/// Ten years of weekly checkpoints.
pub const MAX_DURATION_WEEKS: i64 = 520;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseRecord {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub duration_weeks: i64,
    pub is_active: bool,
    pub domains: Vec<DomainRecord>,
    pub student_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseInput {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub duration_weeks: Option<i64>,
    #[serde(default)]
    pub is_active: Option<bool>,
    #[serde(default)]
    pub domain_ids: Option<Vec<i64>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoursePatch {
    pub name: Option<String>,
    pub description: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub start_date: Option<Option<NaiveDate>>,
    #[serde(default, deserialize_with = "double_option")]
    pub end_date: Option<Option<NaiveDate>>,
    pub duration_weeks: Option<i64>,
    pub is_active: Option<bool>,
    pub domain_ids: Option<Vec<i64>>,
}

/// Students touched by a domain-set change.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseSyncSummary {
    pub students_synced: usize,
    pub students_changed: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseChange {
    pub course: CourseRecord,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync: Option<CourseSyncSummary>,
}

const COURSE_SELECT: &str = r#"
    SELECT c."id", c."name", c."description", c."start_date", c."end_date",
           c."duration_weeks", c."is_active", c."created_at", c."updated_at",
           (SELECT COUNT(*) FROM "students" s WHERE s."course_id" = c."id") AS "student_count"
    FROM "courses" c
"#;

fn map_course_row(row: &SqliteRow) -> Result<CourseRecord, sqlx::Error> {
    Ok(CourseRecord {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        start_date: row.try_get("start_date")?,
        end_date: row.try_get("end_date")?,
        duration_weeks: row.try_get("duration_weeks")?,
        is_active: row.try_get("is_active")?,
        domains: Vec::new(),
        student_count: row.try_get("student_count")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

async fn course_domains(pool: &SqlitePool, course_id: i64) -> Result<Vec<DomainRecord>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT d."id", d."name", d."description", d."sort_order", d."created_at"
        FROM "course_domains" cd
        JOIN "domains" d ON d."id" = cd."domain_id"
        WHERE cd."course_id" = ?
        ORDER BY d."sort_order", d."name"
        "#,
    )
    .bind(course_id)
    .fetch_all(pool)
    .await?;

    rows.iter().map(map_domain_row).collect()
}

pub async fn list_courses(pool: &SqlitePool) -> Result<Vec<CourseRecord>, sqlx::Error> {
    let sql = format!(r#"{COURSE_SELECT} ORDER BY c."start_date" DESC, c."id" DESC"#);
    let rows = sqlx::query(&sql).fetch_all(pool).await?;

    let mut courses = Vec::with_capacity(rows.len());
    for row in &rows {
        let mut course = map_course_row(row)?;
        course.domains = course_domains(pool, course.id).await?;
        courses.push(course);
    }
    Ok(courses)
}

pub async fn get_course(pool: &SqlitePool, id: i64) -> Result<CourseRecord, ServiceError> {
    let sql = format!(r#"{COURSE_SELECT} WHERE c."id" = ?"#);
    let row = sqlx::query(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| ServiceError::not_found("Course not found"))?;

    let mut course = map_course_row(&row)?;
    course.domains = course_domains(pool, id).await?;
    Ok(course)
}

fn validate_dates(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Result<(), ServiceError> {
    if let (Some(start), Some(end)) = (start, end) {
        if end < start {
            return Err(ServiceError::validation("End date must not be before start date"));
        }
    }
    Ok(())
}

fn validate_duration(weeks: i64) -> Result<i64, ServiceError> {
    if weeks < 1 {
        return Err(ServiceError::validation("Duration must be at least one week"));
    }
    if weeks > MAX_DURATION_WEEKS {
        return Err(ServiceError::validation(format!(
            "Duration cannot exceed {MAX_DURATION_WEEKS} weeks"
        )));
    }
    Ok(weeks)
}

/// Replaces the course's domain set and re-syncs enrolled students when the
/// set actually changed.
async fn replace_domain_set(
    conn: &mut SqliteConnection,
    ctx: &ServiceContext,
    course_id: i64,
    domain_ids: &[i64],
) -> Result<Option<CourseSyncSummary>, ServiceError> {
    let wanted: BTreeSet<i64> = domain_ids.iter().copied().collect();

    for domain_id in &wanted {
        let exists: Option<i64> = sqlx::query_scalar(r#"SELECT "id" FROM "domains" WHERE "id" = ?"#)
            .bind(*domain_id)
            .fetch_optional(&mut *conn)
            .await?;
        if exists.is_none() {
            return Err(ServiceError::not_found(format!("Domain {domain_id} not found")));
        }
    }

    let current: BTreeSet<i64> = sqlx::query_scalar(
        r#"SELECT "domain_id" FROM "course_domains" WHERE "course_id" = ?"#,
    )
    .bind(course_id)
    .fetch_all(&mut *conn)
    .await?
    .into_iter()
    .collect();

    if current == wanted {
        return Ok(None);
    }

    for domain_id in current.difference(&wanted) {
        sqlx::query(r#"DELETE FROM "course_domains" WHERE "course_id" = ? AND "domain_id" = ?"#)
            .bind(course_id)
            .bind(*domain_id)
            .execute(&mut *conn)
            .await?;
    }
    for domain_id in wanted.difference(&current) {
        sqlx::query(r#"INSERT INTO "course_domains" ("course_id", "domain_id") VALUES (?, ?)"#)
            .bind(course_id)
            .bind(*domain_id)
            .execute(&mut *conn)
            .await?;
    }

    let outcomes = ctx
        .engine
        .sync_course_students(conn, course_id, sync::today())
        .await?;

    let summary = CourseSyncSummary {
        students_synced: outcomes.len(),
        students_changed: outcomes.iter().filter(|(_, o)| o.changed()).count(),
    };

    tracing::info!(
        course_id,
        domains = wanted.len(),
        students_synced = summary.students_synced,
        students_changed = summary.students_changed,
        "course domain set replaced"
    );

    Ok(Some(summary))
}

pub async fn create_course(
    proxy: &DatabaseProxy,
    ctx: &ServiceContext,
    input: CourseInput,
) -> Result<CourseChange, ServiceError> {
    let name = trimmed_required(&input.name, "Course name")?;
    validate_dates(input.start_date, input.end_date)?;
    let duration = validate_duration(input.duration_weeks.unwrap_or(DEFAULT_DURATION_WEEKS))?;

    let mut tx = proxy.begin_write().await?;
    let now = Utc::now();

    let result = sqlx::query(
        r#"
        INSERT INTO "courses"
          ("name", "description", "start_date", "end_date", "duration_weeks", "is_active",
           "created_at", "updated_at")
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&name)
    .bind(input.description.trim())
    .bind(input.start_date)
    .bind(input.end_date)
    .bind(duration)
    .bind(input.is_active.unwrap_or(true))
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    let course_id = result.last_insert_rowid();
    let sync = match input.domain_ids.as_deref() {
        Some(ids) => replace_domain_set(&mut tx, ctx, course_id, ids).await?,
        None => None,
    };

    tx.commit().await?;

    tracing::info!(course_id, name = %name, "course created");

    Ok(CourseChange {
        course: get_course(proxy.pool(), course_id).await?,
        sync,
    })
}

pub async fn update_course(
    proxy: &DatabaseProxy,
    ctx: &ServiceContext,
    course_id: i64,
    patch: CoursePatch,
) -> Result<CourseChange, ServiceError> {
    let name = patch
        .name
        .as_deref()
        .map(|n| trimmed_required(n, "Course name"))
        .transpose()?;
    let duration = patch.duration_weeks.map(validate_duration).transpose()?;

    let mut tx = proxy.begin_write().await?;

    let result = sqlx::query(
        r#"
        UPDATE "courses"
        SET "name" = COALESCE(?, "name"),
            "description" = COALESCE(?, "description"),
            "duration_weeks" = COALESCE(?, "duration_weeks"),
            "is_active" = COALESCE(?, "is_active"),
            "updated_at" = ?
        WHERE "id" = ?
        "#,
    )
    .bind(name)
    .bind(patch.description)
    .bind(duration)
    .bind(patch.is_active)
    .bind(Utc::now())
    .bind(course_id)
    .execute(&mut *tx)
    .await?;

    if result.rows_affected() == 0 {
        return Err(ServiceError::not_found("Course not found"));
    }

    if let Some(start_date) = patch.start_date {
        sqlx::query(r#"UPDATE "courses" SET "start_date" = ? WHERE "id" = ?"#)
            .bind(start_date)
            .bind(course_id)
            .execute(&mut *tx)
            .await?;
    }
    if let Some(end_date) = patch.end_date {
        sqlx::query(r#"UPDATE "courses" SET "end_date" = ? WHERE "id" = ?"#)
            .bind(end_date)
            .bind(course_id)
            .execute(&mut *tx)
            .await?;
    }

    let row = sqlx::query(r#"SELECT "start_date", "end_date" FROM "courses" WHERE "id" = ?"#)
        .bind(course_id)
        .fetch_one(&mut *tx)
        .await?;
    validate_dates(row.try_get("start_date")?, row.try_get("end_date")?)?;

    let sync = match patch.domain_ids.as_deref() {
        Some(ids) => replace_domain_set(&mut tx, ctx, course_id, ids).await?,
        None => None,
    };

    tx.commit().await?;

    Ok(CourseChange {
        course: get_course(proxy.pool(), course_id).await?,
        sync,
    })
}

/// Deletes the course. Enrolled students keep their ledger and lose the
/// course link.
pub async fn delete_course(proxy: &DatabaseProxy, course_id: i64) -> Result<(), ServiceError> {
    let result = sqlx::query(r#"DELETE FROM "courses" WHERE "id" = ?"#)
        .bind(course_id)
        .execute(proxy.pool())
        .await?;

    if result.rows_affected() == 0 {
        return Err(ServiceError::not_found("Course not found"));
    }
    tracing::info!(course_id, "course deleted");
    Ok(())
}

/// Active courses offered at registration.
pub async fn list_active_courses(pool: &SqlitePool) -> Result<Vec<CourseRecord>, sqlx::Error> {
    let sql = format!(r#"{COURSE_SELECT} WHERE c."is_active" = 1 ORDER BY c."start_date" DESC, c."id" DESC"#);
    let rows = sqlx::query(&sql).fetch_all(pool).await?;

    let mut courses = Vec::with_capacity(rows.len());
    for row in &rows {
        let mut course = map_course_row(row)?;
        course.domains = course_domains(pool, course.id).await?;
        courses.push(course);
    }
    Ok(courses)
}
