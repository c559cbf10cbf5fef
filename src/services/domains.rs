use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::db::DatabaseProxy;
use crate::services::{sync, trimmed_required, ServiceContext, ServiceError};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainRecord {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub sort_order: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainInput {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub sort_order: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub sort_order: Option<i64>,
}

pub(crate) fn map_domain_row(row: &SqliteRow) -> Result<DomainRecord, sqlx::Error> {
    Ok(DomainRecord {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        sort_order: row.try_get("sort_order")?,
        created_at: row.try_get("created_at")?,
    })
}

pub async fn list_domains(pool: &SqlitePool) -> Result<Vec<DomainRecord>, sqlx::Error> {
    let rows = sqlx::query(
        r#"SELECT "id", "name", "description", "sort_order", "created_at"
           FROM "domains" ORDER BY "sort_order", "name""#,
    )
    .fetch_all(pool)
    .await?;

    rows.iter().map(map_domain_row).collect()
}

pub async fn get_domain(pool: &SqlitePool, id: i64) -> Result<DomainRecord, ServiceError> {
    let row = sqlx::query(
        r#"SELECT "id", "name", "description", "sort_order", "created_at"
           FROM "domains" WHERE "id" = ?"#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| ServiceError::not_found("Domain not found"))?;

    Ok(map_domain_row(&row)?)
}

pub async fn create_domain(
    pool: &SqlitePool,
    input: DomainInput,
) -> Result<DomainRecord, ServiceError> {
    let name = trimmed_required(&input.name, "Domain name")?;
    let result = sqlx::query(
        r#"INSERT INTO "domains" ("name", "description", "sort_order", "created_at")
           VALUES (?, ?, ?, ?)"#,
    )
    .bind(&name)
    .bind(input.description.trim())
    .bind(input.sort_order)
    .bind(Utc::now())
    .execute(pool)
    .await?;

    let id = result.last_insert_rowid();
    tracing::info!(domain_id = id, name = %name, "domain created");
    get_domain(pool, id).await
}

pub async fn update_domain(
    pool: &SqlitePool,
    id: i64,
    patch: DomainPatch,
) -> Result<DomainRecord, ServiceError> {
    let name = patch
        .name
        .as_deref()
        .map(|n| trimmed_required(n, "Domain name"))
        .transpose()?;

    let result = sqlx::query(
        r#"
        UPDATE "domains"
        SET "name" = COALESCE(?, "name"),
            "description" = COALESCE(?, "description"),
            "sort_order" = COALESCE(?, "sort_order")
        WHERE "id" = ?
        "#,
    )
    .bind(name)
    .bind(patch.description)
    .bind(patch.sort_order)
    .bind(id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(ServiceError::not_found("Domain not found"));
    }
    get_domain(pool, id).await
}

/// Deletes a domain. Its ledger entries and course links cascade away, so
/// every student who held one is recomputed in the same transaction.
pub async fn delete_domain(
    proxy: &DatabaseProxy,
    ctx: &ServiceContext,
    id: i64,
) -> Result<Vec<i64>, ServiceError> {
    let mut tx = proxy.begin_write().await?;

    let affected: Vec<i64> = sqlx::query_scalar(
        r#"SELECT "student_id" FROM "domain_scores" WHERE "domain_id" = ? ORDER BY "student_id""#,
    )
    .bind(id)
    .fetch_all(&mut *tx)
    .await?;

    let courses: Vec<i64> = sqlx::query_scalar(
        r#"SELECT "course_id" FROM "course_domains" WHERE "domain_id" = ?"#,
    )
    .bind(id)
    .fetch_all(&mut *tx)
    .await?;

    let result = sqlx::query(r#"DELETE FROM "domains" WHERE "id" = ?"#)
        .bind(id)
        .execute(&mut *tx)
        .await?;

    if result.rows_affected() == 0 {
        return Err(ServiceError::not_found("Domain not found"));
    }

    let today = sync::today();
    ctx.engine.recompute_students(&mut tx, &affected, today).await?;
    // refreshes total_domains for enrolled students
    for course_id in courses {
        ctx.engine.sync_course_students(&mut tx, course_id, today).await?;
    }

    tx.commit().await?;

    tracing::info!(domain_id = id, students = affected.len(), "domain deleted");
    Ok(affected)
}
