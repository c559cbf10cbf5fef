pub mod announcements;
pub mod assessments;
pub mod courses;
pub mod domains;
pub mod notification;
pub mod projects;
pub mod scoring;
pub mod student_id;
pub mod students;
pub mod sync;
pub mod users;

use serde::{Deserialize, Deserializer};
use thiserror::Error;

use crate::auth::AuthUser;
use crate::config::Config;
use crate::services::student_id::IdentifierGenerator;
use crate::services::sync::SyncEngine;

/// Settings the services need besides a database handle.
#[derive(Debug, Clone)]
pub struct ServiceContext {
    pub engine: SyncEngine,
    pub ids: IdentifierGenerator,
    pub bcrypt_cost: u32,
    pub default_student_password: String,
    pub notification_retention_days: i64,
}

impl ServiceContext {
    pub fn from_config(config: &Config) -> Self {
        Self {
            engine: SyncEngine::new(config.mastery_threshold),
            ids: IdentifierGenerator::new(config.student_id_prefix.clone()),
            bcrypt_cost: config.bcrypt_cost,
            default_student_password: config.default_student_password.clone(),
            notification_retention_days: config.notification_retention_days,
        }
    }
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("no student profile for user {}", .0.id)]
    StudentProfileMissing(Box<AuthUser>),
    #[error(transparent)]
    Sql(#[from] sqlx::Error),
    #[error(transparent)]
    Password(#[from] bcrypt::BcryptError),
}

impl ServiceError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }
}

pub(crate) fn require_admin(user: &AuthUser) -> Result<(), ServiceError> {
    if user.is_admin() {
        Ok(())
    } else {
        Err(ServiceError::Forbidden(
            "Administrator access required".to_string(),
        ))
    }
}

/// Maps a UNIQUE constraint violation to a conflict with the given message.
pub(crate) fn conflict_on_unique(err: sqlx::Error, message: &str) -> ServiceError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            ServiceError::Conflict(message.to_string())
        }
        _ => ServiceError::Sql(err),
    }
}

pub(crate) fn trimmed_required(value: &str, field: &str) -> Result<String, ServiceError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ServiceError::validation(format!("{field} is required")));
    }
    Ok(trimmed.to_string())
}

/// Distinguishes an absent field from an explicit `null` in update payloads.
pub(crate) fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}
