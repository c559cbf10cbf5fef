//! Persisted in-app notifications. Delivery beyond the table is out of scope;
//! clients poll the list and unread count.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};

use crate::services::ServiceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    ProjectSubmitted,
    ProjectReviewed,
    AnnouncementPosted,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProjectSubmitted => "project_submitted",
            Self::ProjectReviewed => "project_reviewed",
            Self::AnnouncementPosted => "announcement_posted",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "project_submitted" => Some(Self::ProjectSubmitted),
            "project_reviewed" => Some(Self::ProjectReviewed),
            "announcement_posted" => Some(Self::AnnouncementPosted),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRecord {
    pub id: i64,
    pub notification_type: NotificationType,
    pub title: String,
    pub message: String,
    pub related_project_id: Option<i64>,
    pub route_url: String,
    pub is_read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// A notification waiting to be written for one or more recipients.
#[derive(Debug, Clone)]
pub struct Notice {
    pub kind: NotificationType,
    pub title: String,
    pub message: String,
    pub related_project_id: Option<i64>,
    pub route_url: String,
}

fn map_notification_row(row: &SqliteRow) -> Result<NotificationRecord, sqlx::Error> {
    let kind: String = row.try_get("notification_type")?;
    let notification_type = NotificationType::parse(&kind).ok_or_else(|| {
        sqlx::Error::Decode(format!("unknown notification type {kind}").into())
    })?;

    Ok(NotificationRecord {
        id: row.try_get("id")?,
        notification_type,
        title: row.try_get("title")?,
        message: row.try_get("message")?,
        related_project_id: row.try_get("related_project_id")?,
        route_url: row.try_get("route_url")?,
        is_read: row.try_get("is_read")?,
        read_at: row.try_get("read_at")?,
        created_at: row.try_get("created_at")?,
    })
}

/// Writes one row per recipient. Runs on the caller's connection so the
/// notification commits with the change that caused it.
pub async fn emit(
    conn: &mut SqliteConnection,
    recipients: &[i64],
    notice: &Notice,
) -> Result<usize, sqlx::Error> {
    let now = Utc::now();
    for recipient_id in recipients {
        sqlx::query(
            r#"
            INSERT INTO "notifications"
              ("recipient_id", "notification_type", "title", "message",
               "related_project_id", "route_url", "is_read", "created_at")
            VALUES (?, ?, ?, ?, ?, ?, 0, ?)
            "#,
        )
        .bind(*recipient_id)
        .bind(notice.kind.as_str())
        .bind(&notice.title)
        .bind(&notice.message)
        .bind(notice.related_project_id)
        .bind(&notice.route_url)
        .bind(now)
        .execute(&mut *conn)
        .await?;
    }

    if !recipients.is_empty() {
        tracing::debug!(
            kind = notice.kind.as_str(),
            recipients = recipients.len(),
            "notifications emitted"
        );
    }
    Ok(recipients.len())
}

/// Removes read notifications whose read time is older than the retention
/// window. Unread notifications are never removed.
/// A window reaching past the representable range keeps everything.
pub async fn cleanup_old(pool: &SqlitePool, retention_days: i64) -> Result<u64, sqlx::Error> {
    let Some(cutoff) = Duration::try_days(retention_days)
        .and_then(|window| Utc::now().checked_sub_signed(window))
    else {
        return Ok(0);
    };
    let result = sqlx::query(
        r#"DELETE FROM "notifications" WHERE "is_read" = 1 AND "read_at" IS NOT NULL AND "read_at" < ?"#,
    )
    .bind(cutoff)
    .execute(pool)
    .await?;

    let deleted = result.rows_affected();
    if deleted > 0 {
        tracing::info!(deleted, retention_days, "old notifications removed");
    }
    Ok(deleted)
}

pub async fn list_for_user(
    pool: &SqlitePool,
    user_id: i64,
    retention_days: i64,
) -> Result<Vec<NotificationRecord>, sqlx::Error> {
    cleanup_old(pool, retention_days).await?;

    let rows = sqlx::query(
        r#"
        SELECT "id", "notification_type", "title", "message", "related_project_id",
               "route_url", "is_read", "read_at", "created_at"
        FROM "notifications"
        WHERE "recipient_id" = ?
        ORDER BY "created_at" DESC, "id" DESC
        "#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    rows.iter().map(map_notification_row).collect()
}

pub async fn unread_count(pool: &SqlitePool, user_id: i64) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar(
        r#"SELECT COUNT(*) FROM "notifications" WHERE "recipient_id" = ? AND "is_read" = 0"#,
    )
    .bind(user_id)
    .fetch_one(pool)
    .await
}

/// Marks one of the user's notifications read. Other users' notifications
/// are reported as missing.
pub async fn mark_read(
    pool: &SqlitePool,
    user_id: i64,
    notification_id: i64,
) -> Result<NotificationRecord, ServiceError> {
    let row = sqlx::query(
        r#"
        UPDATE "notifications"
        SET "is_read" = 1, "read_at" = COALESCE("read_at", ?)
        WHERE "id" = ? AND "recipient_id" = ?
        RETURNING "id", "notification_type", "title", "message", "related_project_id",
                  "route_url", "is_read", "read_at", "created_at"
        "#,
    )
    .bind(Utc::now())
    .bind(notification_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| ServiceError::not_found("Notification not found"))?;

    Ok(map_notification_row(&row)?)
}

pub async fn mark_all_read(pool: &SqlitePool, user_id: i64) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE "notifications"
        SET "is_read" = 1, "read_at" = ?
        WHERE "recipient_id" = ? AND "is_read" = 0
        "#,
    )
    .bind(Utc::now())
    .bind(user_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

pub async fn admin_ids(conn: &mut SqliteConnection) -> Result<Vec<i64>, sqlx::Error> {
    sqlx::query_scalar(r#"SELECT "id" FROM "users" WHERE "role" = 'admin' ORDER BY "id""#)
        .fetch_all(&mut *conn)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_names_round_trip() {
        for kind in [
            NotificationType::ProjectSubmitted,
            NotificationType::ProjectReviewed,
            NotificationType::AnnouncementPosted,
        ] {
            assert_eq!(NotificationType::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(NotificationType::parse("digest"), None);
    }

    #[test]
    fn serializes_as_snake_case() {
        let value = serde_json::to_value(NotificationType::AnnouncementPosted).unwrap();
        assert_eq!(value, serde_json::json!("announcement_posted"));
    }
}
