#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use chrono::{NaiveDate, Utc};
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use capsule_backend::auth::{self, Role};
use capsule_backend::config::Config;
use capsule_backend::db::DatabaseProxy;
use capsule_backend::services::courses::{self, CourseInput};
use capsule_backend::services::domains::{self, DomainInput};
use capsule_backend::services::students::{self, CreateStudentInput, DomainScoreInput};
use capsule_backend::services::ServiceContext;
use capsule_backend::state::AppState;

pub const JWT_SECRET: &str = "integration-test-secret";
pub const ADMIN_CODE: &str = "TRAINER01";

pub struct TestApp {
    _dir: TempDir,
    pub db: Arc<DatabaseProxy>,
    pub ctx: ServiceContext,
    pub router: Router,
}

impl TestApp {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let url = format!("sqlite://{}", dir.path().join("capsule-test.db").display());
        let config = Config::for_database(url, JWT_SECRET);

        let db = DatabaseProxy::connect(config.db.clone())
            .await
            .expect("database");
        let ctx = ServiceContext::from_config(&config);
        let router = capsule_backend::build_router(AppState::new(Arc::clone(&db), config));

        Self {
            _dir: dir,
            db,
            ctx,
            router,
        }
    }

    pub fn pool(&self) -> &sqlx::SqlitePool {
        self.db.pool()
    }

    pub async fn admin(&self) -> i64 {
        let now = Utc::now();
        let hash = auth::hash_password("Admin123!", 4).expect("hash");
        sqlx::query(
            r#"INSERT INTO "users"
                 ("username", "email", "password_hash", "first_name", "last_name", "role",
                  "admin_code", "created_at", "updated_at")
               VALUES ('trainer', 'trainer@example.com', ?, 'Grace', 'Hopper', ?, ?, ?, ?)"#,
        )
        .bind(hash)
        .bind(Role::Admin.as_str())
        .bind(ADMIN_CODE)
        .bind(now)
        .bind(now)
        .execute(self.pool())
        .await
        .expect("insert admin")
        .last_insert_rowid()
    }

    pub async fn plain_user(&self, email: &str) -> i64 {
        let now = Utc::now();
        sqlx::query(
            r#"INSERT INTO "users"
                 ("username", "email", "password_hash", "first_name", "last_name", "role",
                  "created_at", "updated_at")
               VALUES (?, ?, 'x', 'Alan', 'Turing', 'student', ?, ?)"#,
        )
        .bind(email)
        .bind(email)
        .bind(now)
        .bind(now)
        .execute(self.pool())
        .await
        .expect("insert user")
        .last_insert_rowid()
    }

    pub async fn domain(&self, name: &str) -> i64 {
        domains::create_domain(
            self.pool(),
            DomainInput {
                name: name.to_string(),
                ..DomainInput::default()
            },
        )
        .await
        .expect("create domain")
        .id
    }

    pub async fn course(&self, name: &str, start: Option<NaiveDate>, domain_ids: &[i64]) -> i64 {
        courses::create_course(
            &self.db,
            &self.ctx,
            CourseInput {
                name: name.to_string(),
                start_date: start,
                domain_ids: Some(domain_ids.to_vec()),
                ..CourseInput::default()
            },
        )
        .await
        .expect("create course")
        .course
        .id
    }

    /// Creates a student with explicit scores and returns the profile id.
    pub async fn student_with_scores(
        &self,
        username: &str,
        course_id: Option<i64>,
        scores: &[(i64, f64)],
    ) -> i64 {
        students::create_student(
            &self.db,
            &self.ctx,
            CreateStudentInput {
                username: username.to_string(),
                email: format!("{username}@example.com"),
                first_name: "Ada".to_string(),
                last_name: "Lovelace".to_string(),
                course_id,
                domains: scores
                    .iter()
                    .map(|(domain_id, score)| DomainScoreInput {
                        domain_id: *domain_id,
                        score: *score,
                        strengths: Vec::new(),
                        weaknesses: Vec::new(),
                    })
                    .collect(),
                ..CreateStudentInput::default()
            },
        )
        .await
        .expect("create student")
        .id
    }

    pub async fn user_id_of_student(&self, student_id: i64) -> i64 {
        sqlx::query_scalar(r#"SELECT "user_id" FROM "students" WHERE "id" = ?"#)
            .bind(student_id)
            .fetch_one(self.pool())
            .await
            .expect("student user")
    }

    pub async fn ledger(&self, student_id: i64) -> Vec<(i64, f64)> {
        sqlx::query_as(
            r#"SELECT "domain_id", "score" FROM "domain_scores" WHERE "student_id" = ? ORDER BY "domain_id""#,
        )
        .bind(student_id)
        .fetch_all(self.pool())
        .await
        .expect("ledger")
    }

    pub async fn aggregates(&self, student_id: i64) -> (f64, i64, i64) {
        sqlx::query_as(
            r#"SELECT "overall_score", "domains_mastered", "total_domains" FROM "students" WHERE "id" = ?"#,
        )
        .bind(student_id)
        .fetch_one(self.pool())
        .await
        .expect("aggregates")
    }

    pub async fn send(
        &self,
        method: Method,
        uri: &str,
        user_id: Option<i64>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(user_id) = user_id {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token_for(user_id)));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("request");

        let response = self.router.clone().oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("body")
            .to_bytes();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }
}

pub fn token_for(user_id: i64) -> String {
    auth::sign_jwt_for_user(user_id, JWT_SECRET, chrono::Duration::hours(1)).expect("token")
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("date")
}
