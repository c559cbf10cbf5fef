//! Recorded assessments. They are history only and never feed the ledger.

use std::collections::HashMap;

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::auth::AuthUser;
use crate::db::DatabaseProxy;
use crate::services::scoring;
use crate::services::students::student_id_for_user;
use crate::services::ServiceError;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentDetail {
    pub id: i64,
    pub question: String,
    pub answer: String,
    pub is_correct: bool,
    pub points_earned: f64,
    pub points_possible: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentRecord {
    pub id: i64,
    pub student_id: i64,
    pub domain_id: i64,
    pub domain_name: String,
    pub score: f64,
    pub date_taken: NaiveDate,
    pub notes: String,
    pub details: Vec<AssessmentDetail>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentDetailInput {
    pub question: String,
    #[serde(default)]
    pub answer: String,
    #[serde(default)]
    pub is_correct: bool,
    #[serde(default)]
    pub points_earned: f64,
    pub points_possible: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentInput {
    pub student_id: i64,
    pub domain_id: i64,
    pub score: f64,
    #[serde(default)]
    pub date_taken: Option<NaiveDate>,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub details: Vec<AssessmentDetailInput>,
}

const ASSESSMENT_SELECT: &str = r#"
    SELECT a."id", a."student_id", a."domain_id", d."name" AS "domain_name",
           a."score", a."date_taken", a."notes"
    FROM "assessments" a
    JOIN "domains" d ON d."id" = a."domain_id"
"#;

fn map_assessment_row(row: &SqliteRow) -> Result<AssessmentRecord, sqlx::Error> {
    Ok(AssessmentRecord {
        id: row.try_get("id")?,
        student_id: row.try_get("student_id")?,
        domain_id: row.try_get("domain_id")?,
        domain_name: row.try_get("domain_name")?,
        score: row.try_get("score")?,
        date_taken: row.try_get("date_taken")?,
        notes: row.try_get("notes")?,
        details: Vec::new(),
    })
}

async fn attach_details(
    pool: &SqlitePool,
    mut records: Vec<AssessmentRecord>,
) -> Result<Vec<AssessmentRecord>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT "id", "assessment_id", "question", "answer", "is_correct",
               "points_earned", "points_possible"
        FROM "assessment_details"
        ORDER BY "id"
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut details: HashMap<i64, Vec<AssessmentDetail>> = HashMap::new();
    for row in &rows {
        details
            .entry(row.try_get("assessment_id")?)
            .or_default()
            .push(AssessmentDetail {
                id: row.try_get("id")?,
                question: row.try_get("question")?,
                answer: row.try_get("answer")?,
                is_correct: row.try_get("is_correct")?,
                points_earned: row.try_get("points_earned")?,
                points_possible: row.try_get("points_possible")?,
            });
    }

    for record in &mut records {
        record.details = details.remove(&record.id).unwrap_or_default();
    }
    Ok(records)
}

pub async fn list_for(
    pool: &SqlitePool,
    user: &AuthUser,
) -> Result<Vec<AssessmentRecord>, ServiceError> {
    let rows = if user.is_admin() {
        let sql = format!(r#"{ASSESSMENT_SELECT} ORDER BY a."date_taken" DESC, a."id" DESC"#);
        sqlx::query(&sql).fetch_all(pool).await?
    } else {
        let student_id = student_id_for_user(pool, user.id)
            .await?
            .ok_or_else(|| ServiceError::StudentProfileMissing(Box::new(user.clone())))?;
        let sql = format!(
            r#"{ASSESSMENT_SELECT} WHERE a."student_id" = ? ORDER BY a."date_taken" DESC, a."id" DESC"#
        );
        sqlx::query(&sql).bind(student_id).fetch_all(pool).await?
    };

    let records = rows
        .iter()
        .map(map_assessment_row)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(attach_details(pool, records).await?)
}

pub async fn get_assessment(
    pool: &SqlitePool,
    user: &AuthUser,
    id: i64,
) -> Result<AssessmentRecord, ServiceError> {
    let sql = format!(r#"{ASSESSMENT_SELECT} WHERE a."id" = ?"#);
    let row = sqlx::query(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| ServiceError::not_found("Assessment not found"))?;
    let record = map_assessment_row(&row)?;

    if !user.is_admin() && student_id_for_user(pool, user.id).await? != Some(record.student_id) {
        return Err(ServiceError::not_found("Assessment not found"));
    }

    let mut records = attach_details(pool, vec![record]).await?;
    records
        .pop()
        .ok_or_else(|| ServiceError::not_found("Assessment not found"))
}

pub async fn create_assessment(
    proxy: &DatabaseProxy,
    user: &AuthUser,
    input: AssessmentInput,
) -> Result<AssessmentRecord, ServiceError> {
    let score = scoring::validate_score(input.score).map_err(ServiceError::Validation)?;
    for detail in &input.details {
        if detail.question.trim().is_empty() {
            return Err(ServiceError::validation("Question is required"));
        }
        if detail.points_possible <= 0.0 || detail.points_earned < 0.0 || detail.points_earned > detail.points_possible {
            return Err(ServiceError::validation(
                "Points earned must be between 0 and points possible",
            ));
        }
    }

    let mut tx = proxy.begin_write().await?;

    let result = sqlx::query(
        r#"
        INSERT INTO "assessments" ("student_id", "domain_id", "score", "date_taken", "notes")
        SELECT ?, ?, ?, ?, ?
        WHERE EXISTS (SELECT 1 FROM "students" WHERE "id" = ?)
          AND EXISTS (SELECT 1 FROM "domains" WHERE "id" = ?)
        "#,
    )
    .bind(input.student_id)
    .bind(input.domain_id)
    .bind(score)
    .bind(input.date_taken.unwrap_or_else(|| Utc::now().date_naive()))
    .bind(input.notes.trim())
    .bind(input.student_id)
    .bind(input.domain_id)
    .execute(&mut *tx)
    .await?;

    if result.rows_affected() == 0 {
        return Err(ServiceError::not_found("Student or domain not found"));
    }
    let id = result.last_insert_rowid();

    for detail in &input.details {
        sqlx::query(
            r#"
            INSERT INTO "assessment_details"
              ("assessment_id", "question", "answer", "is_correct", "points_earned", "points_possible")
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id)
        .bind(detail.question.trim())
        .bind(&detail.answer)
        .bind(detail.is_correct)
        .bind(detail.points_earned)
        .bind(detail.points_possible)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    tracing::info!(
        assessment_id = id,
        student_id = input.student_id,
        domain_id = input.domain_id,
        recorded_by = user.id,
        "assessment recorded"
    );
    get_assessment(proxy.pool(), user, id).await
}
