use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};

use crate::auth::AuthUser;
use crate::db::DatabaseProxy;
use crate::services::notification::{self, Notice, NotificationType};
use crate::services::students::student_id_for_user;
use crate::services::{double_option, trimmed_required, ServiceError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    #[default]
    Low,
    Medium,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    fn parse(value: &str) -> Self {
        match value {
            "high" => Self::High,
            "medium" => Self::Medium,
            _ => Self::Low,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetCourse {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnouncementRecord {
    pub id: i64,
    pub title: String,
    pub content: String,
    pub created_by: i64,
    pub author_name: String,
    pub is_active: bool,
    pub priority: Priority,
    pub scheduled_start: Option<DateTime<Utc>>,
    pub scheduled_end: Option<DateTime<Utc>>,
    pub is_scheduled: bool,
    pub is_read: bool,
    pub courses: Vec<TargetCourse>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnouncementInput {
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub course_ids: Vec<i64>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub is_active: Option<bool>,
    #[serde(default)]
    pub scheduled_start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub scheduled_end: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnouncementPatch {
    pub title: Option<String>,
    pub content: Option<String>,
    pub course_ids: Option<Vec<i64>>,
    pub priority: Option<Priority>,
    pub is_active: Option<bool>,
    #[serde(default, deserialize_with = "double_option")]
    pub scheduled_start: Option<Option<DateTime<Utc>>>,
    #[serde(default, deserialize_with = "double_option")]
    pub scheduled_end: Option<Option<DateTime<Utc>>>,
}

const ANNOUNCEMENT_SELECT: &str = r#"
    SELECT a."id", a."title", a."content", a."created_by", a."is_active", a."priority",
           a."scheduled_start", a."scheduled_end", a."created_at", a."updated_at",
           TRIM(COALESCE(u."first_name", '') || ' ' || COALESCE(u."last_name", '')) AS "author_name"
    FROM "announcements" a
    LEFT JOIN "users" u ON u."id" = a."created_by"
"#;

fn map_announcement_row(row: &SqliteRow) -> Result<AnnouncementRecord, sqlx::Error> {
    let priority: String = row.try_get("priority")?;
    let scheduled_start: Option<DateTime<Utc>> = row.try_get("scheduled_start")?;
    let scheduled_end: Option<DateTime<Utc>> = row.try_get("scheduled_end")?;

    Ok(AnnouncementRecord {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        content: row.try_get("content")?,
        created_by: row.try_get("created_by")?,
        author_name: row.try_get("author_name")?,
        is_active: row.try_get("is_active")?,
        priority: Priority::parse(&priority),
        scheduled_start,
        scheduled_end,
        is_scheduled: scheduled_start.is_some() || scheduled_end.is_some(),
        is_read: false,
        courses: Vec::new(),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn validate_window(
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> Result<(), ServiceError> {
    if let (Some(start), Some(end)) = (start, end) {
        if end <= start {
            return Err(ServiceError::validation(
                "Scheduled end must be after scheduled start",
            ));
        }
    }
    Ok(())
}

async fn target_courses(
    pool: &SqlitePool,
) -> Result<HashMap<i64, Vec<TargetCourse>>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT ac."announcement_id", c."id", c."name"
        FROM "announcement_courses" ac
        JOIN "courses" c ON c."id" = ac."course_id"
        ORDER BY c."name"
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut targets: HashMap<i64, Vec<TargetCourse>> = HashMap::new();
    for row in &rows {
        targets
            .entry(row.try_get("announcement_id")?)
            .or_default()
            .push(TargetCourse {
                id: row.try_get("id")?,
                name: row.try_get("name")?,
            });
    }
    Ok(targets)
}

/// Admins see every announcement. Students see active announcements inside
/// their schedule window that target their course.
pub async fn list_for(
    pool: &SqlitePool,
    user: &AuthUser,
) -> Result<Vec<AnnouncementRecord>, ServiceError> {
    let rows = if user.is_admin() {
        let sql = format!(r#"{ANNOUNCEMENT_SELECT} ORDER BY a."created_at" DESC, a."id" DESC"#);
        sqlx::query(&sql).fetch_all(pool).await?
    } else {
        let Some(student_id) = student_id_for_user(pool, user.id).await? else {
            return Ok(Vec::new());
        };
        let course_id: Option<i64> =
            sqlx::query_scalar(r#"SELECT "course_id" FROM "students" WHERE "id" = ?"#)
                .bind(student_id)
                .fetch_one(pool)
                .await?;
        let Some(course_id) = course_id else {
            return Ok(Vec::new());
        };

        let now = Utc::now();
        let sql = format!(
            r#"{ANNOUNCEMENT_SELECT}
            WHERE a."is_active" = 1
              AND (a."scheduled_start" IS NULL OR a."scheduled_start" <= ?)
              AND (a."scheduled_end" IS NULL OR a."scheduled_end" >= ?)
              AND EXISTS (
                SELECT 1 FROM "announcement_courses" ac
                WHERE ac."announcement_id" = a."id" AND ac."course_id" = ?
              )
            ORDER BY a."created_at" DESC, a."id" DESC"#
        );
        sqlx::query(&sql)
            .bind(now)
            .bind(now)
            .bind(course_id)
            .fetch_all(pool)
            .await?
    };

    let mut targets = target_courses(pool).await?;

    let read: Vec<i64> = match student_id_for_user(pool, user.id).await? {
        Some(student_id) => {
            sqlx::query_scalar(
                r#"SELECT "announcement_id" FROM "announcement_reads" WHERE "student_id" = ?"#,
            )
            .bind(student_id)
            .fetch_all(pool)
            .await?
        }
        None => Vec::new(),
    };

    rows.iter()
        .map(|row| {
            let mut record = map_announcement_row(row)?;
            record.courses = targets.remove(&record.id).unwrap_or_default();
            record.is_read = read.contains(&record.id);
            Ok(record)
        })
        .collect()
}

pub async fn get_announcement(
    pool: &SqlitePool,
    id: i64,
) -> Result<AnnouncementRecord, ServiceError> {
    let sql = format!(r#"{ANNOUNCEMENT_SELECT} WHERE a."id" = ?"#);
    let row = sqlx::query(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| ServiceError::not_found("Announcement not found"))?;

    let mut record = map_announcement_row(&row)?;
    record.courses = target_courses(pool).await?.remove(&id).unwrap_or_default();
    Ok(record)
}

async fn replace_targets(
    conn: &mut SqliteConnection,
    announcement_id: i64,
    course_ids: &[i64],
) -> Result<(), ServiceError> {
    sqlx::query(r#"DELETE FROM "announcement_courses" WHERE "announcement_id" = ?"#)
        .bind(announcement_id)
        .execute(&mut *conn)
        .await?;

    for course_id in course_ids {
        let exists: Option<i64> = sqlx::query_scalar(r#"SELECT "id" FROM "courses" WHERE "id" = ?"#)
            .bind(*course_id)
            .fetch_optional(&mut *conn)
            .await?;
        if exists.is_none() {
            return Err(ServiceError::not_found(format!("Course {course_id} not found")));
        }
        sqlx::query(
            r#"INSERT OR IGNORE INTO "announcement_courses" ("announcement_id", "course_id") VALUES (?, ?)"#,
        )
        .bind(announcement_id)
        .bind(*course_id)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

pub async fn create_announcement(
    proxy: &DatabaseProxy,
    author: &AuthUser,
    input: AnnouncementInput,
) -> Result<AnnouncementRecord, ServiceError> {
    let title = trimmed_required(&input.title, "Title")?;
    let content = trimmed_required(&input.content, "Content")?;
    validate_window(input.scheduled_start, input.scheduled_end)?;
    let is_active = input.is_active.unwrap_or(true);

    let mut tx = proxy.begin_write().await?;
    let now = Utc::now();

    let result = sqlx::query(
        r#"
        INSERT INTO "announcements"
          ("title", "content", "created_by", "is_active", "priority",
           "scheduled_start", "scheduled_end", "created_at", "updated_at")
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&title)
    .bind(&content)
    .bind(author.id)
    .bind(is_active)
    .bind(input.priority.as_str())
    .bind(input.scheduled_start)
    .bind(input.scheduled_end)
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    let id = result.last_insert_rowid();
    replace_targets(&mut tx, id, &input.course_ids).await?;

    if is_active && !input.course_ids.is_empty() {
        let recipients: Vec<i64> = sqlx::query_scalar(
            r#"
            SELECT DISTINCT s."user_id"
            FROM "students" s
            JOIN "announcement_courses" ac ON ac."course_id" = s."course_id"
            WHERE ac."announcement_id" = ?
            ORDER BY s."user_id"
            "#,
        )
        .bind(id)
        .fetch_all(&mut *tx)
        .await?;

        notification::emit(
            &mut tx,
            &recipients,
            &Notice {
                kind: NotificationType::AnnouncementPosted,
                title: format!("New announcement: {title}"),
                message: format!("{} posted a new announcement.", author.full_name()),
                related_project_id: None,
                route_url: "/announcements".to_string(),
            },
        )
        .await?;
    }

    tx.commit().await?;

    tracing::info!(announcement_id = id, courses = input.course_ids.len(), "announcement created");
    get_announcement(proxy.pool(), id).await
}

pub async fn update_announcement(
    proxy: &DatabaseProxy,
    id: i64,
    patch: AnnouncementPatch,
) -> Result<AnnouncementRecord, ServiceError> {
    let title = patch
        .title
        .as_deref()
        .map(|v| trimmed_required(v, "Title"))
        .transpose()?;
    let content = patch
        .content
        .as_deref()
        .map(|v| trimmed_required(v, "Content"))
        .transpose()?;

    let mut tx = proxy.begin_write().await?;

    let result = sqlx::query(
        r#"
        UPDATE "announcements"
        SET "title" = COALESCE(?, "title"),
            "content" = COALESCE(?, "content"),
            "priority" = COALESCE(?, "priority"),
            "is_active" = COALESCE(?, "is_active"),
            "updated_at" = ?
        WHERE "id" = ?
        "#,
    )
    .bind(title)
    .bind(content)
    .bind(patch.priority.map(|p| p.as_str()))
    .bind(patch.is_active)
    .bind(Utc::now())
    .bind(id)
    .execute(&mut *tx)
    .await?;

    if result.rows_affected() == 0 {
        return Err(ServiceError::not_found("Announcement not found"));
    }

    if let Some(start) = patch.scheduled_start {
        sqlx::query(r#"UPDATE "announcements" SET "scheduled_start" = ? WHERE "id" = ?"#)
            .bind(start)
            .bind(id)
            .execute(&mut *tx)
            .await?;
    }
    if let Some(end) = patch.scheduled_end {
        sqlx::query(r#"UPDATE "announcements" SET "scheduled_end" = ? WHERE "id" = ?"#)
            .bind(end)
            .bind(id)
            .execute(&mut *tx)
            .await?;
    }

    let row = sqlx::query(
        r#"SELECT "scheduled_start", "scheduled_end" FROM "announcements" WHERE "id" = ?"#,
    )
    .bind(id)
    .fetch_one(&mut *tx)
    .await?;
    validate_window(row.try_get("scheduled_start")?, row.try_get("scheduled_end")?)?;

    if let Some(course_ids) = patch.course_ids.as_deref() {
        replace_targets(&mut tx, id, course_ids).await?;
    }

    tx.commit().await?;
    get_announcement(proxy.pool(), id).await
}

pub async fn delete_announcement(pool: &SqlitePool, id: i64) -> Result<(), ServiceError> {
    let result = sqlx::query(r#"DELETE FROM "announcements" WHERE "id" = ?"#)
        .bind(id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(ServiceError::not_found("Announcement not found"));
    }
    Ok(())
}

/// Records that the student read the announcement. Repeated calls are no-ops.
pub async fn mark_read(
    pool: &SqlitePool,
    user: &AuthUser,
    announcement_id: i64,
) -> Result<(), ServiceError> {
    if user.is_admin() {
        return Err(ServiceError::Forbidden(
            "Only students can mark announcements as read".to_string(),
        ));
    }
    let student_id = student_id_for_user(pool, user.id)
        .await?
        .ok_or_else(|| ServiceError::StudentProfileMissing(Box::new(user.clone())))?;

    let exists: Option<i64> = sqlx::query_scalar(r#"SELECT "id" FROM "announcements" WHERE "id" = ?"#)
        .bind(announcement_id)
        .fetch_optional(pool)
        .await?;
    if exists.is_none() {
        return Err(ServiceError::not_found("Announcement not found"));
    }

    sqlx::query(
        r#"
        INSERT INTO "announcement_reads" ("student_id", "announcement_id", "read_at")
        VALUES (?, ?, ?)
        ON CONFLICT ("student_id", "announcement_id") DO NOTHING
        "#,
    )
    .bind(student_id)
    .bind(announcement_id)
    .bind(Utc::now())
    .execute(pool)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn window_must_be_ordered() {
        let start = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
        assert!(validate_window(Some(start), Some(end)).is_ok());
        assert!(validate_window(Some(end), Some(start)).is_err());
        assert!(validate_window(Some(start), Some(start)).is_err());
        assert!(validate_window(None, Some(start)).is_ok());
    }

    #[test]
    fn unknown_priority_reads_as_low() {
        assert_eq!(Priority::parse("urgent"), Priority::Low);
        assert_eq!(Priority::parse("high"), Priority::High);
    }
}
