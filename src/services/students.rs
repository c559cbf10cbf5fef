use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};

use crate::auth::{self, AuthUser, Role};
use crate::db::DatabaseProxy;
use crate::services::scoring::round_to;
use crate::services::sync::{self, ScoreChange, StudentAggregates, SyncOutcome};
use crate::services::{
    conflict_on_unique, double_option, trimmed_required, ServiceContext, ServiceError,
};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: i64,
    pub email: String,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub role: Role,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseSummary {
    pub id: i64,
    pub name: String,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub duration_weeks: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StrengthRecord {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeaknessRecord {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub improvement_suggestion: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainScoreRecord {
    pub id: i64,
    pub domain_id: i64,
    pub domain_name: String,
    pub score: f64,
    pub strengths: Vec<StrengthRecord>,
    pub weaknesses: Vec<WeaknessRecord>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRecord {
    pub id: i64,
    pub student_id: String,
    pub user: UserSummary,
    pub course: Option<CourseSummary>,
    pub program: String,
    pub program_start_date: Option<NaiveDate>,
    pub next_milestone: String,
    pub total_domains: i64,
    pub overall_summary: String,
    pub trainer_feedback: String,
    pub overall_score: f64,
    pub domains_mastered: i64,
    pub domain_scores: Vec<DomainScoreRecord>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrengthInput {
    pub title: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeaknessInput {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub improvement_suggestion: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainScoreInput {
    pub domain_id: i64,
    pub score: f64,
    #[serde(default)]
    pub strengths: Vec<StrengthInput>,
    #[serde(default)]
    pub weaknesses: Vec<WeaknessInput>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateStudentInput {
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub course_id: Option<i64>,
    #[serde(default)]
    pub domains: Vec<DomainScoreInput>,
    #[serde(default)]
    pub program: Option<String>,
    #[serde(default)]
    pub program_start_date: Option<NaiveDate>,
    #[serde(default)]
    pub next_milestone: String,
    #[serde(default)]
    pub overall_summary: String,
    #[serde(default)]
    pub trainer_feedback: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStudentInput {
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub course_id: Option<Option<i64>>,
    #[serde(default)]
    pub program: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub program_start_date: Option<Option<NaiveDate>>,
    #[serde(default)]
    pub next_milestone: Option<String>,
    #[serde(default)]
    pub overall_summary: Option<String>,
    #[serde(default)]
    pub trainer_feedback: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatedStudent {
    pub student: StudentRecord,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync: Option<SyncOutcome>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotatedItem {
    pub domain: String,
    pub title: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartBar {
    pub category: &'static str,
    pub count: usize,
    pub color: &'static str,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StrengthsWeaknessesSummary {
    pub strengths: Vec<AnnotatedItem>,
    pub weaknesses: Vec<AnnotatedItem>,
    pub chart_data: Vec<ChartBar>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeekPoint {
    pub week: String,
    pub date: NaiveDate,
    pub score: f64,
    pub is_historical: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeeklyProgressView {
    pub weeks: Vec<WeekPoint>,
    pub current_average: f64,
    pub program_start_date: Option<NaiveDate>,
    pub course_duration: Option<i64>,
    pub has_data: bool,
}

/// Everything needed to enroll a new student inside an open transaction.
#[derive(Debug, Clone)]
pub(crate) struct NewStudent {
    pub user_id: i64,
    pub course_id: Option<i64>,
    pub program: String,
    pub program_start_date: Option<NaiveDate>,
    pub next_milestone: String,
    pub overall_summary: String,
    pub trainer_feedback: String,
    pub domains: Vec<DomainScoreInput>,
}

const STUDENT_SELECT: &str = r#"
    SELECT
      s."id", s."student_id", s."course_id", s."program", s."program_start_date",
      s."next_milestone", s."total_domains", s."overall_summary", s."trainer_feedback",
      s."overall_score", s."domains_mastered", s."created_at", s."updated_at",
      u."id" AS "user_id", u."email", u."username", u."first_name", u."last_name", u."role",
      c."name" AS "course_name", c."start_date" AS "course_start_date",
      c."end_date" AS "course_end_date", c."duration_weeks" AS "course_duration_weeks"
    FROM "students" s
    JOIN "users" u ON u."id" = s."user_id"
    LEFT JOIN "courses" c ON c."id" = s."course_id"
"#;

fn map_student_row(row: &SqliteRow) -> Result<StudentRecord, sqlx::Error> {
    let role: String = row.try_get("role")?;
    let course_id: Option<i64> = row.try_get("course_id")?;
    let course = match course_id {
        Some(id) => Some(CourseSummary {
            id,
            name: row.try_get("course_name")?,
            start_date: row.try_get("course_start_date")?,
            end_date: row.try_get("course_end_date")?,
            duration_weeks: row.try_get("course_duration_weeks")?,
        }),
        None => None,
    };

    Ok(StudentRecord {
        id: row.try_get("id")?,
        student_id: row.try_get("student_id")?,
        user: UserSummary {
            id: row.try_get("user_id")?,
            email: row.try_get("email")?,
            username: row.try_get("username")?,
            first_name: row.try_get("first_name")?,
            last_name: row.try_get("last_name")?,
            role: Role::parse(&role).unwrap_or(Role::Student),
        },
        course,
        program: row.try_get("program")?,
        program_start_date: row.try_get("program_start_date")?,
        next_milestone: row.try_get("next_milestone")?,
        total_domains: row.try_get("total_domains")?,
        overall_summary: row.try_get("overall_summary")?,
        trainer_feedback: row.try_get("trainer_feedback")?,
        overall_score: row.try_get("overall_score")?,
        domains_mastered: row.try_get("domains_mastered")?,
        domain_scores: Vec::new(),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

pub async fn load_domain_scores(
    pool: &SqlitePool,
    student_id: i64,
) -> Result<Vec<DomainScoreRecord>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT ds."id", ds."domain_id", d."name" AS "domain_name", ds."score", ds."updated_at"
        FROM "domain_scores" ds
        JOIN "domains" d ON d."id" = ds."domain_id"
        WHERE ds."student_id" = ?
        ORDER BY d."sort_order", d."name"
        "#,
    )
    .bind(student_id)
    .fetch_all(pool)
    .await?;

    let strength_rows = sqlx::query(
        r#"
        SELECT st."id", st."domain_score_id", st."title", st."description", st."created_at"
        FROM "domain_strengths" st
        JOIN "domain_scores" ds ON ds."id" = st."domain_score_id"
        WHERE ds."student_id" = ?
        ORDER BY st."id"
        "#,
    )
    .bind(student_id)
    .fetch_all(pool)
    .await?;

    let weakness_rows = sqlx::query(
        r#"
        SELECT w."id", w."domain_score_id", w."title", w."description",
               w."improvement_suggestion", w."created_at"
        FROM "domain_weaknesses" w
        JOIN "domain_scores" ds ON ds."id" = w."domain_score_id"
        WHERE ds."student_id" = ?
        ORDER BY w."id"
        "#,
    )
    .bind(student_id)
    .fetch_all(pool)
    .await?;

    let mut strengths: HashMap<i64, Vec<StrengthRecord>> = HashMap::new();
    for row in &strength_rows {
        strengths
            .entry(row.try_get("domain_score_id")?)
            .or_default()
            .push(StrengthRecord {
                id: row.try_get("id")?,
                title: row.try_get("title")?,
                description: row.try_get("description")?,
                created_at: row.try_get("created_at")?,
            });
    }

    let mut weaknesses: HashMap<i64, Vec<WeaknessRecord>> = HashMap::new();
    for row in &weakness_rows {
        weaknesses
            .entry(row.try_get("domain_score_id")?)
            .or_default()
            .push(WeaknessRecord {
                id: row.try_get("id")?,
                title: row.try_get("title")?,
                description: row.try_get("description")?,
                improvement_suggestion: row.try_get("improvement_suggestion")?,
                created_at: row.try_get("created_at")?,
            });
    }

    rows.iter()
        .map(|row| {
            let id: i64 = row.try_get("id")?;
            Ok(DomainScoreRecord {
                id,
                domain_id: row.try_get("domain_id")?,
                domain_name: row.try_get("domain_name")?,
                score: row.try_get("score")?,
                strengths: strengths.remove(&id).unwrap_or_default(),
                weaknesses: weaknesses.remove(&id).unwrap_or_default(),
                updated_at: row.try_get("updated_at")?,
            })
        })
        .collect()
}

pub async fn load_student(
    pool: &SqlitePool,
    student_id: i64,
) -> Result<Option<StudentRecord>, sqlx::Error> {
    let sql = format!(r#"{STUDENT_SELECT} WHERE s."id" = ?"#);
    let row = sqlx::query(&sql)
        .bind(student_id)
        .fetch_optional(pool)
        .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let mut record = map_student_row(&row)?;
    record.domain_scores = load_domain_scores(pool, record.id).await?;
    Ok(Some(record))
}

pub async fn student_id_for_user(
    pool: &SqlitePool,
    user_id: i64,
) -> Result<Option<i64>, sqlx::Error> {
    sqlx::query_scalar(r#"SELECT "id" FROM "students" WHERE "user_id" = ?"#)
        .bind(user_id)
        .fetch_optional(pool)
        .await
}

/// Profile of the signed-in user.
pub async fn current_student(
    pool: &SqlitePool,
    user: &AuthUser,
) -> Result<StudentRecord, ServiceError> {
    let Some(student_id) = student_id_for_user(pool, user.id).await? else {
        return Err(ServiceError::StudentProfileMissing(Box::new(user.clone())));
    };

    load_student(pool, student_id)
        .await?
        .ok_or_else(|| ServiceError::StudentProfileMissing(Box::new(user.clone())))
}

/// Students may only see their own profile; admins see all.
pub async fn visible_student(
    pool: &SqlitePool,
    user: &AuthUser,
    student_id: i64,
) -> Result<StudentRecord, ServiceError> {
    let record = load_student(pool, student_id)
        .await?
        .ok_or_else(|| ServiceError::not_found("Student not found"))?;

    if !user.is_admin() && record.user.id != user.id {
        return Err(ServiceError::not_found("Student not found"));
    }
    Ok(record)
}

pub async fn list_students(pool: &SqlitePool) -> Result<Vec<StudentRecord>, ServiceError> {
    let sql = format!(r#"{STUDENT_SELECT} ORDER BY s."created_at" DESC, s."id" DESC"#);
    let rows = sqlx::query(&sql).fetch_all(pool).await?;

    let mut students = Vec::with_capacity(rows.len());
    for row in &rows {
        let mut record = map_student_row(row)?;
        record.domain_scores = load_domain_scores(pool, record.id).await?;
        students.push(record);
    }
    Ok(students)
}

pub(crate) async fn insert_user(
    conn: &mut SqliteConnection,
    username: &str,
    email: &str,
    password_hash: &str,
    first_name: &str,
    last_name: &str,
    role: Role,
) -> Result<i64, ServiceError> {
    let now = Utc::now();
    let result = sqlx::query(
        r#"
        INSERT INTO "users"
          ("username", "email", "password_hash", "first_name", "last_name", "role", "created_at", "updated_at")
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(username)
    .bind(email)
    .bind(password_hash)
    .bind(first_name)
    .bind(last_name)
    .bind(role.as_str())
    .bind(now)
    .bind(now)
    .execute(&mut *conn)
    .await
    .map_err(|err| conflict_on_unique(err, "A user with this email or username already exists"))?;

    Ok(result.last_insert_rowid())
}

/// Creates the profile and its initial ledger. Explicit domain scores win;
/// otherwise every course domain starts at zero. Either way the ledger is
/// written through the bulk API so the aggregates are computed once.
pub(crate) async fn enroll_student(
    conn: &mut SqliteConnection,
    ctx: &ServiceContext,
    new: NewStudent,
) -> Result<i64, ServiceError> {
    let course_domains: Vec<i64> = match new.course_id {
        Some(course_id) => {
            let exists: Option<i64> =
                sqlx::query_scalar(r#"SELECT "id" FROM "courses" WHERE "id" = ?"#)
                    .bind(course_id)
                    .fetch_optional(&mut *conn)
                    .await?;
            if exists.is_none() {
                return Err(ServiceError::not_found(format!("Course {course_id} not found")));
            }
            sqlx::query_scalar(
                r#"SELECT "domain_id" FROM "course_domains" WHERE "course_id" = ? ORDER BY "domain_id""#,
            )
            .bind(course_id)
            .fetch_all(&mut *conn)
            .await?
        }
        None => Vec::new(),
    };

    let changes: Vec<ScoreChange> = if new.domains.is_empty() {
        course_domains
            .iter()
            .map(|domain_id| ScoreChange::Set {
                domain_id: *domain_id,
                score: 0.0,
            })
            .collect()
    } else {
        new.domains
            .iter()
            .map(|d| ScoreChange::Set {
                domain_id: d.domain_id,
                score: d.score,
            })
            .collect()
    };

    let identifier = ctx.ids.next(conn).await?;
    let now = Utc::now();

    let result = sqlx::query(
        r#"
        INSERT INTO "students"
          ("user_id", "student_id", "course_id", "program", "program_start_date",
           "next_milestone", "total_domains", "overall_summary", "trainer_feedback",
           "overall_score", "domains_mastered", "created_at", "updated_at")
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 0, 0, ?, ?)
        "#,
    )
    .bind(new.user_id)
    .bind(&identifier)
    .bind(new.course_id)
    .bind(&new.program)
    .bind(new.program_start_date)
    .bind(&new.next_milestone)
    .bind(changes.len() as i64)
    .bind(&new.overall_summary)
    .bind(&new.trainer_feedback)
    .bind(now)
    .bind(now)
    .execute(&mut *conn)
    .await
    .map_err(|err| conflict_on_unique(err, "Student profile already exists"))?;

    let student_id = result.last_insert_rowid();

    ctx.engine
        .apply_domain_score_changes(conn, student_id, &changes, sync::today())
        .await?;

    for domain in &new.domains {
        let domain_score_id = domain_score_id(conn, student_id, domain.domain_id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Domain score not found"))?;
        for strength in domain.strengths.iter().filter(|s| !s.title.trim().is_empty()) {
            insert_strength(conn, domain_score_id, strength).await?;
        }
        for weakness in domain.weaknesses.iter().filter(|w| !w.title.trim().is_empty()) {
            insert_weakness(conn, domain_score_id, weakness).await?;
        }
    }

    tracing::info!(
        student_id,
        identifier = %identifier,
        ledger = changes.len(),
        "student enrolled"
    );

    Ok(student_id)
}

pub async fn create_student(
    proxy: &DatabaseProxy,
    ctx: &ServiceContext,
    input: CreateStudentInput,
) -> Result<StudentRecord, ServiceError> {
    let username = trimmed_required(&input.username, "Username")?;
    let email = trimmed_required(&input.email, "Email")?.to_lowercase();
    let first_name = trimmed_required(&input.first_name, "First name")?;
    let last_name = trimmed_required(&input.last_name, "Last name")?;
    let password = input
        .password
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| ctx.default_student_password.clone());
    let password_hash = auth::hash_password(&password, ctx.bcrypt_cost)?;

    let mut tx = proxy.begin_write().await?;

    let user_id = insert_user(
        &mut tx,
        &username,
        &email,
        &password_hash,
        &first_name,
        &last_name,
        Role::Student,
    )
    .await?;

    let program = match (input.program, input.course_id) {
        (Some(program), _) if !program.trim().is_empty() => program.trim().to_string(),
        (_, Some(course_id)) => {
            sqlx::query_scalar(r#"SELECT "name" FROM "courses" WHERE "id" = ?"#)
                .bind(course_id)
                .fetch_optional(&mut *tx)
                .await?
                .unwrap_or_default()
        }
        _ => String::new(),
    };

    let student_id = enroll_student(
        &mut tx,
        ctx,
        NewStudent {
            user_id,
            course_id: input.course_id,
            program,
            program_start_date: input.program_start_date,
            next_milestone: input.next_milestone,
            overall_summary: input.overall_summary,
            trainer_feedback: input.trainer_feedback,
            domains: input.domains,
        },
    )
    .await?;

    tx.commit().await?;

    load_student(proxy.pool(), student_id)
        .await?
        .ok_or_else(|| ServiceError::not_found("Student not found"))
}

pub async fn update_student(
    proxy: &DatabaseProxy,
    ctx: &ServiceContext,
    student_id: i64,
    input: UpdateStudentInput,
) -> Result<UpdatedStudent, ServiceError> {
    let mut tx = proxy.begin_write().await?;

    if !ctx.engine.lock_student(&mut tx, student_id).await? {
        return Err(ServiceError::not_found("Student not found"));
    }

    let row = sqlx::query(r#"SELECT "user_id", "course_id" FROM "students" WHERE "id" = ?"#)
        .bind(student_id)
        .fetch_one(&mut *tx)
        .await?;
    let user_id: i64 = row.try_get("user_id")?;
    let current_course: Option<i64> = row.try_get("course_id")?;

    if input.first_name.is_some() || input.last_name.is_some() {
        let first_name = input
            .first_name
            .as_deref()
            .map(|v| trimmed_required(v, "First name"))
            .transpose()?;
        let last_name = input
            .last_name
            .as_deref()
            .map(|v| trimmed_required(v, "Last name"))
            .transpose()?;
        sqlx::query(
            r#"
            UPDATE "users"
            SET "first_name" = COALESCE(?, "first_name"),
                "last_name" = COALESCE(?, "last_name"),
                "updated_at" = ?
            WHERE "id" = ?
            "#,
        )
        .bind(first_name)
        .bind(last_name)
        .bind(Utc::now())
        .bind(user_id)
        .execute(&mut *tx)
        .await?;
    }

    sqlx::query(
        r#"
        UPDATE "students"
        SET "program" = COALESCE(?, "program"),
            "next_milestone" = COALESCE(?, "next_milestone"),
            "overall_summary" = COALESCE(?, "overall_summary"),
            "trainer_feedback" = COALESCE(?, "trainer_feedback")
        WHERE "id" = ?
        "#,
    )
    .bind(input.program)
    .bind(input.next_milestone)
    .bind(input.overall_summary)
    .bind(input.trainer_feedback)
    .bind(student_id)
    .execute(&mut *tx)
    .await?;

    if let Some(program_start_date) = input.program_start_date {
        sqlx::query(r#"UPDATE "students" SET "program_start_date" = ? WHERE "id" = ?"#)
            .bind(program_start_date)
            .bind(student_id)
            .execute(&mut *tx)
            .await?;
    }

    let mut sync_outcome = None;
    if let Some(new_course) = input.course_id {
        if new_course != current_course {
            if let Some(course_id) = new_course {
                let exists: Option<i64> =
                    sqlx::query_scalar(r#"SELECT "id" FROM "courses" WHERE "id" = ?"#)
                        .bind(course_id)
                        .fetch_optional(&mut *tx)
                        .await?;
                if exists.is_none() {
                    return Err(ServiceError::not_found(format!("Course {course_id} not found")));
                }
            }

            sqlx::query(r#"UPDATE "students" SET "course_id" = ? WHERE "id" = ?"#)
                .bind(new_course)
                .bind(student_id)
                .execute(&mut *tx)
                .await?;

            tracing::info!(student_id, ?current_course, ?new_course, "student course changed");

            sync_outcome = Some(
                ctx.engine
                    .sync_domains_with_course(&mut tx, student_id, sync::today())
                    .await?,
            );
        }
    }

    tx.commit().await?;

    let student = load_student(proxy.pool(), student_id)
        .await?
        .ok_or_else(|| ServiceError::not_found("Student not found"))?;

    Ok(UpdatedStudent {
        student,
        sync: sync_outcome,
    })
}

/// Deletes the profile together with the user account. Returns the
/// student's display name.
pub async fn delete_student(
    proxy: &DatabaseProxy,
    student_id: i64,
) -> Result<String, ServiceError> {
    let mut tx = proxy.begin_write().await?;

    let row = sqlx::query(
        r#"
        SELECT u."id", u."first_name", u."last_name"
        FROM "students" s JOIN "users" u ON u."id" = s."user_id"
        WHERE s."id" = ?
        "#,
    )
    .bind(student_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| ServiceError::not_found("Student not found"))?;

    let user_id: i64 = row.try_get("id")?;
    let first_name: String = row.try_get("first_name")?;
    let last_name: String = row.try_get("last_name")?;

    sqlx::query(r#"DELETE FROM "users" WHERE "id" = ?"#)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    tracing::info!(student_id, user_id, "student deleted");
    Ok(format!("{first_name} {last_name}").trim().to_string())
}

/// Applies ledger changes for one student in a single transaction.
pub async fn change_domain_scores(
    proxy: &DatabaseProxy,
    ctx: &ServiceContext,
    student_id: i64,
    changes: &[ScoreChange],
) -> Result<StudentAggregates, ServiceError> {
    let mut tx = proxy.begin_write().await?;
    let aggregates = ctx
        .engine
        .apply_domain_score_changes(&mut tx, student_id, changes, sync::today())
        .await?;
    tx.commit().await?;
    Ok(aggregates)
}

pub async fn resync_domains(
    proxy: &DatabaseProxy,
    ctx: &ServiceContext,
    student_id: i64,
) -> Result<SyncOutcome, ServiceError> {
    let mut tx = proxy.begin_write().await?;
    if !ctx.engine.lock_student(&mut tx, student_id).await? {
        return Err(ServiceError::not_found("Student not found"));
    }
    let outcome = ctx
        .engine
        .sync_domains_with_course(&mut tx, student_id, sync::today())
        .await?;
    tx.commit().await?;
    Ok(outcome)
}

async fn domain_score_id(
    conn: &mut SqliteConnection,
    student_id: i64,
    domain_id: i64,
) -> Result<Option<i64>, sqlx::Error> {
    sqlx::query_scalar(
        r#"SELECT "id" FROM "domain_scores" WHERE "student_id" = ? AND "domain_id" = ?"#,
    )
    .bind(student_id)
    .bind(domain_id)
    .fetch_optional(&mut *conn)
    .await
}

async fn insert_strength(
    conn: &mut SqliteConnection,
    domain_score_id: i64,
    input: &StrengthInput,
) -> Result<StrengthRecord, sqlx::Error> {
    let now = Utc::now();
    let title = input.title.trim().to_string();
    let result = sqlx::query(
        r#"
        INSERT INTO "domain_strengths" ("domain_score_id", "title", "description", "created_at")
        VALUES (?, ?, ?, ?)
        "#,
    )
    .bind(domain_score_id)
    .bind(&title)
    .bind(&input.description)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    Ok(StrengthRecord {
        id: result.last_insert_rowid(),
        title,
        description: input.description.clone(),
        created_at: now,
    })
}

async fn insert_weakness(
    conn: &mut SqliteConnection,
    domain_score_id: i64,
    input: &WeaknessInput,
) -> Result<WeaknessRecord, sqlx::Error> {
    let now = Utc::now();
    let title = input.title.trim().to_string();
    let result = sqlx::query(
        r#"
        INSERT INTO "domain_weaknesses"
          ("domain_score_id", "title", "description", "improvement_suggestion", "created_at")
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(domain_score_id)
    .bind(&title)
    .bind(&input.description)
    .bind(&input.improvement_suggestion)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    Ok(WeaknessRecord {
        id: result.last_insert_rowid(),
        title,
        description: input.description.clone(),
        improvement_suggestion: input.improvement_suggestion.clone(),
        created_at: now,
    })
}

pub async fn add_strength(
    proxy: &DatabaseProxy,
    student_id: i64,
    domain_id: i64,
    input: StrengthInput,
) -> Result<StrengthRecord, ServiceError> {
    trimmed_required(&input.title, "Title")?;
    let mut conn = proxy.pool().acquire().await?;
    let domain_score_id = domain_score_id(&mut conn, student_id, domain_id)
        .await?
        .ok_or_else(|| ServiceError::not_found("Domain score not found"))?;
    Ok(insert_strength(&mut conn, domain_score_id, &input).await?)
}

pub async fn add_weakness(
    proxy: &DatabaseProxy,
    student_id: i64,
    domain_id: i64,
    input: WeaknessInput,
) -> Result<WeaknessRecord, ServiceError> {
    trimmed_required(&input.title, "Title")?;
    let mut conn = proxy.pool().acquire().await?;
    let domain_score_id = domain_score_id(&mut conn, student_id, domain_id)
        .await?
        .ok_or_else(|| ServiceError::not_found("Domain score not found"))?;
    Ok(insert_weakness(&mut conn, domain_score_id, &input).await?)
}

pub fn summarize_strengths_weaknesses(record: &StudentRecord) -> StrengthsWeaknessesSummary {
    let mut strengths = Vec::new();
    let mut weaknesses = Vec::new();

    for score in &record.domain_scores {
        strengths.extend(score.strengths.iter().map(|s| AnnotatedItem {
            domain: score.domain_name.clone(),
            title: s.title.clone(),
            description: s.description.clone(),
            suggestion: None,
        }));
        weaknesses.extend(score.weaknesses.iter().map(|w| AnnotatedItem {
            domain: score.domain_name.clone(),
            title: w.title.clone(),
            description: w.description.clone(),
            suggestion: Some(w.improvement_suggestion.clone()),
        }));
    }

    let chart_data = vec![
        ChartBar {
            category: "Strengths",
            count: strengths.len(),
            color: "#22c55e",
        },
        ChartBar {
            category: "Weaknesses",
            count: weaknesses.len(),
            color: "#ef4444",
        },
    ];

    StrengthsWeaknessesSummary {
        strengths,
        weaknesses,
        chart_data,
    }
}

/// Week-by-week trend: stored snapshots where they exist, the current
/// average for weeks that were never recorded. Weeks that have not started
/// yet are left out.
pub async fn weekly_progress_view(
    pool: &SqlitePool,
    record: &StudentRecord,
    today: NaiveDate,
) -> Result<WeeklyProgressView, sqlx::Error> {
    let scores: Vec<f64> = record.domain_scores.iter().map(|d| d.score).collect();
    let current_average = round_to(crate::services::scoring::mean_score(&scores), 1);

    let course_start = record
        .course
        .as_ref()
        .and_then(|c| c.start_date.map(|start| (start, c.duration_weeks)));

    let (start, num_weeks) = match (course_start, record.program_start_date) {
        (Some((start, duration)), _) => (start, duration),
        (None, Some(start)) => (start, (today - start).num_days().div_euclid(7) + 1),
        (None, None) => {
            return Ok(WeeklyProgressView {
                weeks: Vec::new(),
                current_average: 0.0,
                program_start_date: None,
                course_duration: None,
                has_data: false,
            });
        }
    };

    let rows = sqlx::query(
        r#"SELECT "week_number", "average_score" FROM "weekly_progress" WHERE "student_id" = ?"#,
    )
    .bind(record.id)
    .fetch_all(pool)
    .await?;

    let mut history: BTreeMap<i64, f64> = BTreeMap::new();
    for row in &rows {
        history.insert(row.try_get("week_number")?, row.try_get("average_score")?);
    }

    // Week dates only grow, so stop at the first one past today.
    let weeks = (1..=num_weeks.max(0))
        .map_while(|week| {
            let date = Duration::try_weeks(week - 1)
                .and_then(|offset| start.checked_add_signed(offset))?;
            if date > today {
                return None;
            }
            let stored = history.get(&week).copied();
            Some(WeekPoint {
                week: format!("Week {week}"),
                date,
                score: stored.unwrap_or(current_average),
                is_historical: stored.is_some(),
            })
        })
        .collect();

    Ok(WeeklyProgressView {
        weeks,
        current_average,
        program_start_date: Some(start),
        course_duration: record.course.as_ref().map(|c| c.duration_weeks),
        has_data: true,
    })
}
