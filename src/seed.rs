//! Optional first-run data: the default domain registry and a bootstrap
//! admin account.

use chrono::{Duration, Utc};
use sqlx::SqlitePool;

use crate::auth::{self, Role};
use crate::config::Config;
use crate::services::ServiceError;

const DEFAULT_DOMAINS: &[(&str, &str)] = &[
    ("Mathematics & Statistics", "Linear algebra, calculus, probability & statistics"),
    ("Machine Learning", "Supervised & unsupervised learning algorithms"),
    ("Deep Learning", "Neural networks, CNNs, RNNs, transformers"),
    ("Data Science", "Data analysis, visualization, feature engineering"),
    ("Computer Vision", "Image processing, object detection, segmentation"),
    ("Natural Language Processing", "Text processing, sentiment analysis, language models"),
    ("Generative AI", "GANs, VAEs, diffusion models, LLMs"),
    ("Deployment", "MLOps, model serving, cloud deployment"),
    ("Portfolio", "Projects, documentation, GitHub presence"),
];

const BOOTSTRAP_ADMIN_EMAIL: &str = "admin@capsule.local";
const BOOTSTRAP_ADMIN_CODE: &str = "CAPSULE01";

/// Inserts the default domains when the registry is empty. Returns how many
/// were created.
pub async fn seed_domains(pool: &SqlitePool) -> Result<usize, sqlx::Error> {
    let existing: i64 = sqlx::query_scalar(r#"SELECT COUNT(*) FROM "domains""#)
        .fetch_one(pool)
        .await?;
    if existing > 0 {
        return Ok(0);
    }

    let now = Utc::now();
    for (index, (name, description)) in DEFAULT_DOMAINS.iter().enumerate() {
        sqlx::query(
            r#"INSERT INTO "domains" ("name", "description", "sort_order", "created_at")
               VALUES (?, ?, ?, ?)"#,
        )
        .bind(*name)
        .bind(*description)
        .bind(index as i64 + 1)
        .bind(now)
        .execute(pool)
        .await?;
    }
    Ok(DEFAULT_DOMAINS.len())
}

/// Creates an admin when none exists. Returns the new user's id.
pub async fn seed_admin(pool: &SqlitePool, config: &Config) -> Result<Option<i64>, ServiceError> {
    let admins: i64 = sqlx::query_scalar(r#"SELECT COUNT(*) FROM "users" WHERE "role" = 'admin'"#)
        .fetch_one(pool)
        .await?;
    if admins > 0 {
        return Ok(None);
    }

    let password = std::env::var("SEED_ADMIN_PASSWORD")
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| "Admin123!".to_string());
    let hash = auth::hash_password(&password, config.bcrypt_cost)?;
    let now = Utc::now();

    let result = sqlx::query(
        r#"
        INSERT INTO "users"
          ("username", "email", "password_hash", "first_name", "last_name", "role",
           "admin_code", "created_at", "updated_at")
        VALUES (?, ?, ?, 'Capsule', 'Admin', ?, ?, ?, ?)
        "#,
    )
    .bind("admin")
    .bind(BOOTSTRAP_ADMIN_EMAIL)
    .bind(&hash)
    .bind(Role::Admin.as_str())
    .bind(BOOTSTRAP_ADMIN_CODE)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(Some(result.last_insert_rowid()))
}

pub async fn run(pool: &SqlitePool, config: &Config) -> Result<(), ServiceError> {
    let domains = seed_domains(pool).await?;
    if domains > 0 {
        tracing::info!(domains, "default domains seeded");
    }

    if let Some(admin_id) = seed_admin(pool, config).await? {
        tracing::info!(
            admin_id,
            email = BOOTSTRAP_ADMIN_EMAIL,
            admin_code = BOOTSTRAP_ADMIN_CODE,
            "bootstrap admin created"
        );
        if let Some(secret) = config.jwt_secret.as_deref() {
            match auth::sign_jwt_for_user(admin_id, secret, Duration::days(7)) {
                Ok(token) => tracing::info!(token = %token, "bootstrap admin token (valid 7 days)"),
                Err(err) => tracing::warn!(error = %err, "could not sign bootstrap admin token"),
            }
        }
    }
    Ok(())
}
