use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};

use crate::auth::{self, AuthUser, Role};
use crate::db::DatabaseProxy;
use crate::services::students::{self, NewStudent, StudentRecord};
use crate::services::{
    conflict_on_unique, require_admin, trimmed_required, ServiceContext, ServiceError,
};

const ADMIN_CODE_MIN: usize = 6;
const ADMIN_CODE_MAX: usize = 20;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterInput {
    pub email: String,
    pub password: String,
    pub confirm_password: String,
    pub first_name: String,
    pub last_name: String,
    pub course_id: i64,
    pub admin_code: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    pub user: AuthUser,
    pub student: StudentRecord,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    #[serde(flatten)]
    pub user: AuthUser,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfilePatch {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminCode {
    pub admin_code: Option<String>,
}

/// Normalizes and checks an admin code: trimmed, upper-cased, 6 to 20 ASCII
/// alphanumerics.
pub fn normalize_admin_code(raw: &str) -> Result<String, ServiceError> {
    let code = raw.trim().to_ascii_uppercase();
    if !(ADMIN_CODE_MIN..=ADMIN_CODE_MAX).contains(&code.len()) {
        return Err(ServiceError::validation(format!(
            "Admin code must be between {ADMIN_CODE_MIN} and {ADMIN_CODE_MAX} characters"
        )));
    }
    if !code.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return Err(ServiceError::validation(
            "Admin code may only contain letters and numbers",
        ));
    }
    Ok(code)
}

fn is_plausible_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
        }
        None => false,
    }
}

/// Self-service registration. The user, the student profile and the initial
/// ledger are created in one transaction.
pub async fn register(
    proxy: &DatabaseProxy,
    ctx: &ServiceContext,
    input: RegisterInput,
) -> Result<Registration, ServiceError> {
    let email = trimmed_required(&input.email, "Email")?.to_lowercase();
    if !is_plausible_email(&email) {
        return Err(ServiceError::validation("Please enter a valid email address"));
    }
    let first_name = trimmed_required(&input.first_name, "First name")?;
    let last_name = trimmed_required(&input.last_name, "Last name")?;

    if input.password != input.confirm_password {
        return Err(ServiceError::validation("Passwords do not match"));
    }
    auth::check_password_strength(&input.password).map_err(ServiceError::validation)?;

    let admin_code = trimmed_required(&input.admin_code, "Admin code")?.to_ascii_uppercase();
    let password_hash = auth::hash_password(&input.password, ctx.bcrypt_cost)?;

    let mut tx = proxy.begin_write().await?;

    let taken: Option<i64> = sqlx::query_scalar(r#"SELECT "id" FROM "users" WHERE "email" = ?"#)
        .bind(&email)
        .fetch_optional(&mut *tx)
        .await?;
    if taken.is_some() {
        return Err(ServiceError::Conflict(
            "An account with this email already exists".to_string(),
        ));
    }

    let course = sqlx::query(
        r#"SELECT "name", "start_date", "is_active" FROM "courses" WHERE "id" = ?"#,
    )
    .bind(input.course_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| ServiceError::validation("Selected course does not exist"))?;

    let course_name: String = course.try_get("name")?;
    let course_start: Option<NaiveDate> = course.try_get("start_date")?;
    let is_active: bool = course.try_get("is_active")?;
    if !is_active {
        return Err(ServiceError::validation("Selected course is not active"));
    }

    let admin: Option<i64> = sqlx::query_scalar(
        r#"SELECT "id" FROM "users" WHERE "admin_code" = ? AND "role" = 'admin'"#,
    )
    .bind(&admin_code)
    .fetch_optional(&mut *tx)
    .await?;
    if admin.is_none() {
        return Err(ServiceError::validation("Invalid admin code"));
    }

    let user_id = students::insert_user(
        &mut tx,
        &email,
        &email,
        &password_hash,
        &first_name,
        &last_name,
        Role::Student,
    )
    .await?;

    let student_id = students::enroll_student(
        &mut tx,
        ctx,
        NewStudent {
            user_id,
            course_id: Some(input.course_id),
            program: course_name,
            program_start_date: course_start,
            next_milestone: String::new(),
            overall_summary: String::new(),
            trainer_feedback: String::new(),
            domains: Vec::new(),
        },
    )
    .await?;

    tx.commit().await?;

    tracing::info!(user_id, student_id, course_id = input.course_id, "student registered");

    let user = AuthUser {
        id: user_id,
        email: email.clone(),
        username: email,
        first_name,
        last_name,
        role: Role::Student,
    };
    let student = students::load_student(proxy.pool(), student_id)
        .await?
        .ok_or_else(|| ServiceError::not_found("Student not found"))?;

    Ok(Registration { user, student })
}

pub async fn profile(pool: &SqlitePool, user: &AuthUser) -> Result<Profile, ServiceError> {
    let created_at: DateTime<Utc> =
        sqlx::query_scalar(r#"SELECT "created_at" FROM "users" WHERE "id" = ?"#)
            .bind(user.id)
            .fetch_optional(pool)
            .await?
            .ok_or_else(|| ServiceError::not_found("User not found"))?;

    Ok(Profile {
        user: user.clone(),
        created_at,
    })
}

pub async fn update_profile(
    pool: &SqlitePool,
    user: &AuthUser,
    patch: ProfilePatch,
) -> Result<Profile, ServiceError> {
    let first_name = patch
        .first_name
        .as_deref()
        .map(|v| trimmed_required(v, "First name"))
        .transpose()?;
    let last_name = patch
        .last_name
        .as_deref()
        .map(|v| trimmed_required(v, "Last name"))
        .transpose()?;

    let row = sqlx::query(
        r#"
        UPDATE "users"
        SET "first_name" = COALESCE(?, "first_name"),
            "last_name" = COALESCE(?, "last_name"),
            "updated_at" = ?
        WHERE "id" = ?
        RETURNING "first_name", "last_name", "created_at"
        "#,
    )
    .bind(first_name)
    .bind(last_name)
    .bind(Utc::now())
    .bind(user.id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| ServiceError::not_found("User not found"))?;

    let mut updated = user.clone();
    updated.first_name = row.try_get("first_name")?;
    updated.last_name = row.try_get("last_name")?;

    Ok(Profile {
        user: updated,
        created_at: row.try_get("created_at")?,
    })
}

pub async fn admin_code(pool: &SqlitePool, user: &AuthUser) -> Result<AdminCode, ServiceError> {
    require_admin(user)?;
    let admin_code: Option<String> =
        sqlx::query_scalar(r#"SELECT "admin_code" FROM "users" WHERE "id" = ?"#)
            .bind(user.id)
            .fetch_optional(pool)
            .await?
            .flatten();
    Ok(AdminCode { admin_code })
}

pub async fn set_admin_code(
    pool: &SqlitePool,
    user: &AuthUser,
    raw: &str,
) -> Result<AdminCode, ServiceError> {
    require_admin(user)?;
    let code = normalize_admin_code(raw)?;

    let holder: Option<i64> =
        sqlx::query_scalar(r#"SELECT "id" FROM "users" WHERE "admin_code" = ? AND "id" <> ?"#)
            .bind(&code)
            .bind(user.id)
            .fetch_optional(pool)
            .await?;
    if holder.is_some() {
        return Err(ServiceError::Conflict(
            "This admin code is already in use".to_string(),
        ));
    }

    sqlx::query(r#"UPDATE "users" SET "admin_code" = ?, "updated_at" = ? WHERE "id" = ?"#)
        .bind(&code)
        .bind(Utc::now())
        .bind(user.id)
        .execute(pool)
        .await
        .map_err(|err| conflict_on_unique(err, "This admin code is already in use"))?;

    tracing::info!(user_id = user.id, "admin code updated");
    Ok(AdminCode {
        admin_code: Some(code),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_code_is_normalized() {
        assert_eq!(normalize_admin_code("  abc123 ").unwrap(), "ABC123");
        assert_eq!(normalize_admin_code("Trainer2026").unwrap(), "TRAINER2026");
    }

    #[test]
    fn admin_code_rejects_bad_shapes() {
        assert!(normalize_admin_code("ab12").is_err());
        assert!(normalize_admin_code("abc-123").is_err());
        assert!(normalize_admin_code(&"A".repeat(21)).is_err());
    }

    #[test]
    fn email_shape() {
        assert!(is_plausible_email("ada@example.com"));
        assert!(!is_plausible_email("ada.example.com"));
        assert!(!is_plausible_email("@example.com"));
        assert!(!is_plausible_email("ada@localhost"));
    }
}
