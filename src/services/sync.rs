//! Keeps the derived student fields consistent with the domain score ledger.
//!
//! Every ledger mutation goes through [`SyncEngine`], which runs the
//! recomputation chain explicitly: aggregate score, mastery count, then the
//! weekly snapshot. All methods take a connection so callers can compose
//! them inside one transaction; the caller owns commit.

use std::collections::BTreeSet;

use chrono::{NaiveDate, Utc};
use serde::Serialize;
use sqlx::{Row, SqliteConnection};

use crate::services::scoring::{self, aggregate_score, mastered_count};
use crate::services::ServiceError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScoreChange {
    Set { domain_id: i64, score: f64 },
    Remove { domain_id: i64 },
}

impl ScoreChange {
    pub fn domain_id(&self) -> i64 {
        match self {
            Self::Set { domain_id, .. } | Self::Remove { domain_id } => *domain_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeeklySnapshot {
    pub week_number: i64,
    pub average_score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentAggregates {
    pub overall_score: f64,
    pub domains_mastered: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weekly: Option<WeeklySnapshot>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOutcome {
    pub course_id: Option<i64>,
    pub added: Vec<i64>,
    pub removed: Vec<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aggregates: Option<StudentAggregates>,
}

impl SyncOutcome {
    pub fn changed(&self) -> bool {
        !self.added.is_empty() || !self.removed.is_empty()
    }
}

pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}

#[derive(Debug, Clone, Copy)]
pub struct SyncEngine {
    mastery_threshold: f64,
}

impl SyncEngine {
    pub fn new(mastery_threshold: f64) -> Self {
        Self { mastery_threshold }
    }

    /// Takes the student's write lock for the rest of the transaction.
    /// Returns false when the student does not exist.
    pub async fn lock_student(
        &self,
        conn: &mut SqliteConnection,
        student_id: i64,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(r#"UPDATE "students" SET "updated_at" = ? WHERE "id" = ?"#)
            .bind(Utc::now())
            .bind(student_id)
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn ledger_scores(
        &self,
        conn: &mut SqliteConnection,
        student_id: i64,
    ) -> Result<Vec<f64>, sqlx::Error> {
        sqlx::query_scalar(r#"SELECT "score" FROM "domain_scores" WHERE "student_id" = ?"#)
            .bind(student_id)
            .fetch_all(&mut *conn)
            .await
    }

    pub async fn recompute_aggregate(
        &self,
        conn: &mut SqliteConnection,
        student_id: i64,
    ) -> Result<f64, sqlx::Error> {
        let scores = self.ledger_scores(conn, student_id).await?;
        let overall = aggregate_score(&scores);

        sqlx::query(r#"UPDATE "students" SET "overall_score" = ? WHERE "id" = ?"#)
            .bind(overall)
            .bind(student_id)
            .execute(&mut *conn)
            .await?;

        Ok(overall)
    }

    pub async fn recompute_mastery(
        &self,
        conn: &mut SqliteConnection,
        student_id: i64,
    ) -> Result<i64, sqlx::Error> {
        let scores = self.ledger_scores(conn, student_id).await?;
        let mastered = mastered_count(&scores, self.mastery_threshold);

        sqlx::query(r#"UPDATE "students" SET "domains_mastered" = ? WHERE "id" = ?"#)
            .bind(mastered)
            .bind(student_id)
            .execute(&mut *conn)
            .await?;

        Ok(mastered)
    }

    /// Program start for the student: course start, else the student's own
    /// program start date.
    pub async fn start_date(
        &self,
        conn: &mut SqliteConnection,
        student_id: i64,
    ) -> Result<Option<NaiveDate>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT c."start_date" AS "course_start", s."program_start_date" AS "program_start"
            FROM "students" s
            LEFT JOIN "courses" c ON c."id" = s."course_id"
            WHERE s."id" = ?
            "#,
        )
        .bind(student_id)
        .fetch_optional(&mut *conn)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let course_start: Option<NaiveDate> = row.try_get("course_start")?;
        let program_start: Option<NaiveDate> = row.try_get("program_start")?;
        Ok(course_start.or(program_start))
    }

    pub async fn record_weekly_progress(
        &self,
        conn: &mut SqliteConnection,
        student_id: i64,
        today: NaiveDate,
    ) -> Result<Option<WeeklySnapshot>, sqlx::Error> {
        let Some(start) = self.start_date(conn, student_id).await? else {
            return Ok(None);
        };
        let Some(week_number) = scoring::week_number(start, today) else {
            return Ok(None);
        };

        let scores = self.ledger_scores(conn, student_id).await?;
        let average_score = aggregate_score(&scores);

        sqlx::query(
            r#"
            INSERT INTO "weekly_progress" ("student_id", "week_number", "average_score", "recorded_at")
            VALUES (?, ?, ?, ?)
            ON CONFLICT ("student_id", "week_number")
            DO UPDATE SET "average_score" = excluded."average_score",
                          "recorded_at" = excluded."recorded_at"
            "#,
        )
        .bind(student_id)
        .bind(week_number)
        .bind(average_score)
        .bind(Utc::now())
        .execute(&mut *conn)
        .await?;

        Ok(Some(WeeklySnapshot {
            week_number,
            average_score,
        }))
    }

    /// Runs the full chain after the ledger has changed.
    pub async fn recompute_all(
        &self,
        conn: &mut SqliteConnection,
        student_id: i64,
        today: NaiveDate,
    ) -> Result<StudentAggregates, sqlx::Error> {
        let overall_score = self.recompute_aggregate(conn, student_id).await?;
        let domains_mastered = self.recompute_mastery(conn, student_id).await?;
        let weekly = self.record_weekly_progress(conn, student_id, today).await?;

        tracing::debug!(
            student_id,
            overall_score,
            domains_mastered,
            ?weekly,
            "student aggregates recomputed"
        );

        Ok(StudentAggregates {
            overall_score,
            domains_mastered,
            weekly,
        })
    }

    pub async fn apply_domain_score_change(
        &self,
        conn: &mut SqliteConnection,
        student_id: i64,
        change: ScoreChange,
        today: NaiveDate,
    ) -> Result<StudentAggregates, ServiceError> {
        self.apply_domain_score_changes(conn, student_id, &[change], today)
            .await
    }

    /// Applies every change, then recomputes once.
    pub async fn apply_domain_score_changes(
        &self,
        conn: &mut SqliteConnection,
        student_id: i64,
        changes: &[ScoreChange],
        today: NaiveDate,
    ) -> Result<StudentAggregates, ServiceError> {
        if !self.lock_student(conn, student_id).await? {
            return Err(ServiceError::not_found("Student not found"));
        }

        for change in changes {
            self.write_change(conn, student_id, *change).await?;
        }

        Ok(self.recompute_all(conn, student_id, today).await?)
    }

    async fn write_change(
        &self,
        conn: &mut SqliteConnection,
        student_id: i64,
        change: ScoreChange,
    ) -> Result<(), ServiceError> {
        match change {
            ScoreChange::Set { domain_id, score } => {
                let score = scoring::validate_score(score).map_err(ServiceError::Validation)?;
                ensure_domain_exists(conn, domain_id).await?;

                sqlx::query(
                    r#"
                    INSERT INTO "domain_scores" ("student_id", "domain_id", "score", "updated_at")
                    VALUES (?, ?, ?, ?)
                    ON CONFLICT ("student_id", "domain_id")
                    DO UPDATE SET "score" = excluded."score", "updated_at" = excluded."updated_at"
                    "#,
                )
                .bind(student_id)
                .bind(domain_id)
                .bind(score)
                .bind(Utc::now())
                .execute(&mut *conn)
                .await?;
            }
            ScoreChange::Remove { domain_id } => {
                let result = sqlx::query(
                    r#"DELETE FROM "domain_scores" WHERE "student_id" = ? AND "domain_id" = ?"#,
                )
                .bind(student_id)
                .bind(domain_id)
                .execute(&mut *conn)
                .await?;

                if result.rows_affected() == 0 {
                    return Err(ServiceError::not_found("Domain score not found"));
                }
            }
        }
        Ok(())
    }

    /// Reconciles the ledger with the course's domain set. Missing domains
    /// get a zero score, domains the course no longer has are dropped.
    pub async fn sync_domains_with_course(
        &self,
        conn: &mut SqliteConnection,
        student_id: i64,
        today: NaiveDate,
    ) -> Result<SyncOutcome, sqlx::Error> {
        if !self.lock_student(conn, student_id).await? {
            return Ok(SyncOutcome::default());
        }

        let course_id: Option<i64> =
            sqlx::query_scalar(r#"SELECT "course_id" FROM "students" WHERE "id" = ?"#)
                .bind(student_id)
                .fetch_one(&mut *conn)
                .await?;

        let Some(course_id) = course_id else {
            return Ok(SyncOutcome::default());
        };

        let course_domains: BTreeSet<i64> = sqlx::query_scalar(
            r#"SELECT "domain_id" FROM "course_domains" WHERE "course_id" = ?"#,
        )
        .bind(course_id)
        .fetch_all(&mut *conn)
        .await?
        .into_iter()
        .collect();

        let student_domains: BTreeSet<i64> = sqlx::query_scalar(
            r#"SELECT "domain_id" FROM "domain_scores" WHERE "student_id" = ?"#,
        )
        .bind(student_id)
        .fetch_all(&mut *conn)
        .await?
        .into_iter()
        .collect();

        let added: Vec<i64> = course_domains.difference(&student_domains).copied().collect();
        let removed: Vec<i64> = student_domains.difference(&course_domains).copied().collect();

        let now = Utc::now();
        for domain_id in &added {
            sqlx::query(
                r#"
                INSERT INTO "domain_scores" ("student_id", "domain_id", "score", "updated_at")
                VALUES (?, ?, 0, ?)
                ON CONFLICT ("student_id", "domain_id") DO NOTHING
                "#,
            )
            .bind(student_id)
            .bind(*domain_id)
            .bind(now)
            .execute(&mut *conn)
            .await?;
        }

        for domain_id in &removed {
            sqlx::query(
                r#"DELETE FROM "domain_scores" WHERE "student_id" = ? AND "domain_id" = ?"#,
            )
            .bind(student_id)
            .bind(*domain_id)
            .execute(&mut *conn)
            .await?;
        }

        sqlx::query(r#"UPDATE "students" SET "total_domains" = ? WHERE "id" = ?"#)
            .bind(course_domains.len() as i64)
            .bind(student_id)
            .execute(&mut *conn)
            .await?;

        let mut outcome = SyncOutcome {
            course_id: Some(course_id),
            added,
            removed,
            aggregates: None,
        };

        if outcome.changed() {
            tracing::info!(
                student_id,
                course_id,
                added = outcome.added.len(),
                removed = outcome.removed.len(),
                "student domains synced with course"
            );
            outcome.aggregates = Some(self.recompute_all(conn, student_id, today).await?);
        }

        Ok(outcome)
    }

    /// Re-syncs every student enrolled in the course.
    pub async fn sync_course_students(
        &self,
        conn: &mut SqliteConnection,
        course_id: i64,
        today: NaiveDate,
    ) -> Result<Vec<(i64, SyncOutcome)>, sqlx::Error> {
        let student_ids: Vec<i64> = sqlx::query_scalar(
            r#"SELECT "id" FROM "students" WHERE "course_id" = ? ORDER BY "id""#,
        )
        .bind(course_id)
        .fetch_all(&mut *conn)
        .await?;

        let mut outcomes = Vec::with_capacity(student_ids.len());
        for student_id in student_ids {
            let outcome = self.sync_domains_with_course(conn, student_id, today).await?;
            outcomes.push((student_id, outcome));
        }
        Ok(outcomes)
    }

    /// Recomputes students whose ledger was changed outside the engine,
    /// e.g. by a cascading domain delete.
    pub async fn recompute_students(
        &self,
        conn: &mut SqliteConnection,
        student_ids: &[i64],
        today: NaiveDate,
    ) -> Result<(), sqlx::Error> {
        for student_id in student_ids {
            if self.lock_student(conn, *student_id).await? {
                self.recompute_all(conn, *student_id, today).await?;
            }
        }
        Ok(())
    }
}

async fn ensure_domain_exists(
    conn: &mut SqliteConnection,
    domain_id: i64,
) -> Result<(), ServiceError> {
    let exists: Option<i64> = sqlx::query_scalar(r#"SELECT "id" FROM "domains" WHERE "id" = ?"#)
        .bind(domain_id)
        .fetch_optional(&mut *conn)
        .await?;

    if exists.is_none() {
        return Err(ServiceError::not_found(format!("Domain {domain_id} not found")));
    }
    Ok(())
}
