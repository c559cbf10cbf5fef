mod common;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use serde_json::json;
use tower::ServiceExt;

use common::{date, TestApp, ADMIN_CODE};

#[tokio::test]
async fn health_reports_database() {
    let app = TestApp::new().await;
    let (status, body) = app.send(Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["database"], "connected");

    let (status, body) = app.send(Method::GET, "/health/live", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn unknown_route_uses_error_envelope() {
    let app = TestApp::new().await;
    let (status, body) = app.send(Method::GET, "/api/nope", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn protected_routes_require_a_token() {
    let app = TestApp::new().await;
    let (status, body) = app.send(Method::GET, "/api/students/me", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "UNAUTHORIZED");

    let request = Request::builder()
        .uri("/api/students/me")
        .header("Authorization", "Bearer not.a.token")
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn token_in_cookie_is_accepted() {
    let app = TestApp::new().await;
    let admin = app.admin().await;

    let request = Request::builder()
        .uri("/api/domains")
        .header("Cookie", format!("auth_token={}", common::token_for(admin)))
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn user_without_profile_gets_guidance() {
    let app = TestApp::new().await;
    let user = app.plain_user("alan@example.com").await;

    let (status, body) = app.send(Method::GET, "/api/students/me", Some(user), None).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "STUDENT_PROFILE_NOT_FOUND");
    assert_eq!(body["error"], "No student profile found");
    assert_eq!(body["details"]["user"]["email"], "alan@example.com");
    assert_eq!(body["details"]["user"]["role"], "student");
    assert!(body["details"]["message"]
        .as_str()
        .unwrap()
        .contains("contact an administrator"));
}

#[tokio::test]
async fn students_cannot_use_admin_endpoints() {
    let app = TestApp::new().await;
    let a = app.domain("Math").await;
    let student = app.student_with_scores("ada", None, &[(a, 50.0)]).await;
    let user = app.user_id_of_student(student).await;

    let (status, _) = app.send(Method::GET, "/api/students", Some(user), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let uri = format!("/api/students/{student}/domain-scores/{a}");
    let (status, body) = app
        .send(Method::PUT, &uri, Some(user), Some(json!({ "score": 99 })))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "FORBIDDEN");

    let (status, _) = app
        .send(Method::POST, "/api/domains", Some(user), Some(json!({ "name": "Rust" })))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn student_sees_own_profile_but_not_others() {
    let app = TestApp::new().await;
    let a = app.domain("Math").await;
    let mine = app.student_with_scores("mine", None, &[(a, 81.0)]).await;
    let other = app.student_with_scores("other", None, &[(a, 40.0)]).await;
    let user = app.user_id_of_student(mine).await;

    let (status, body) = app.send(Method::GET, "/api/students/me", Some(user), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["id"], mine);
    assert_eq!(body["data"]["overallScore"], 81.0);
    assert_eq!(body["data"]["domainsMastered"], 1);
    assert_eq!(body["data"]["domainScores"][0]["domainName"], "Math");

    let (status, _) = app
        .send(Method::GET, &format!("/api/students/{other}"), Some(user), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn admin_manages_scores_over_http() {
    let app = TestApp::new().await;
    let admin = app.admin().await;
    let a = app.domain("Math").await;
    let b = app.domain("ML").await;

    let (status, body) = app
        .send(
            Method::POST,
            "/api/students",
            Some(admin),
            Some(json!({
                "username": "hopper",
                "email": "Hopper@Example.com",
                "firstName": "Grace",
                "lastName": "Hopper",
                "domains": [
                    { "domainId": a, "score": 92, "strengths": [{ "title": "Proofs" }] },
                    { "domainId": b, "score": 70, "weaknesses": [{ "title": "Tuning", "improvementSuggestion": "More labs" }] }
                ]
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["studentId"], "CAP-ST-01");
    assert_eq!(body["data"]["user"]["email"], "hopper@example.com");
    assert_eq!(body["data"]["overallScore"], 81.0);
    let student = body["data"]["id"].as_i64().unwrap();

    let (status, body) = app
        .send(
            Method::PUT,
            &format!("/api/students/{student}/domain-scores/{b}"),
            Some(admin),
            Some(json!({ "score": 80 })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["overallScore"], 86.0);
    assert_eq!(body["data"]["domainsMastered"], 2);

    let (status, body) = app
        .send(
            Method::PUT,
            &format!("/api/students/{student}/domain-scores/{b}"),
            Some(admin),
            Some(json!({ "score": 101 })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");

    let (status, body) = app
        .send(
            Method::DELETE,
            &format!("/api/students/{student}/domain-scores/{a}"),
            Some(admin),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["overallScore"], 80.0);
    assert_eq!(body["data"]["domainsMastered"], 1);

    let (status, body) = app
        .send(
            Method::GET,
            &format!("/api/students/{student}/strengths-weaknesses"),
            Some(admin),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["strengths"].as_array().unwrap().len(), 0);
    assert_eq!(body["data"]["weaknesses"][0]["suggestion"], "More labs");
    assert_eq!(body["data"]["chartData"][1]["color"], "#ef4444");

    let (status, _) = app
        .send(Method::DELETE, &format!("/api/students/{student}"), Some(admin), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = app
        .send(Method::GET, &format!("/api/students/{student}"), Some(admin), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn registration_creates_profile_with_course_ledger() {
    let app = TestApp::new().await;
    app.admin().await;
    let a = app.domain("Math").await;
    let b = app.domain("ML").await;
    let course = app.course("AI Capsule", Some(date(2026, 1, 5)), &[a, b]).await;

    let payload = json!({
        "email": "New.Student@Example.com",
        "password": "Str0ng!pass",
        "confirmPassword": "Str0ng!pass",
        "firstName": "New",
        "lastName": "Student",
        "courseId": course,
        "adminCode": ADMIN_CODE.to_lowercase(),
    });
    let (status, body) = app
        .send(Method::POST, "/api/auth/register", None, Some(payload.clone()))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let student = &body["data"]["student"];
    assert_eq!(student["program"], "AI Capsule");
    assert_eq!(student["programStartDate"], "2026-01-05");
    assert_eq!(student["totalDomains"], 2);
    assert_eq!(student["domainScores"].as_array().unwrap().len(), 2);
    assert_eq!(student["overallScore"], 0.0);
    assert_eq!(body["data"]["user"]["email"], "new.student@example.com");

    let (status, body) = app
        .send(Method::POST, "/api/auth/register", None, Some(payload))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "CONFLICT");
}

#[tokio::test]
async fn registration_rejects_bad_input() {
    let app = TestApp::new().await;
    app.admin().await;
    let course = app.course("AI Capsule", None, &[]).await;

    let base = json!({
        "email": "x@example.com",
        "password": "Str0ng!pass",
        "confirmPassword": "Str0ng!pass",
        "firstName": "X",
        "lastName": "Y",
        "courseId": course,
        "adminCode": ADMIN_CODE,
    });

    let mut weak = base.clone();
    weak["password"] = json!("weakpass");
    weak["confirmPassword"] = json!("weakpass");
    let (status, body) = app.send(Method::POST, "/api/auth/register", None, Some(weak)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Password must contain uppercase letter");

    let mut mismatch = base.clone();
    mismatch["confirmPassword"] = json!("Other!pass1");
    let (status, body) = app
        .send(Method::POST, "/api/auth/register", None, Some(mismatch))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Passwords do not match");

    let mut wrong_code = base.clone();
    wrong_code["adminCode"] = json!("NOPE99");
    let (status, body) = app
        .send(Method::POST, "/api/auth/register", None, Some(wrong_code))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid admin code");

    let mut missing_course = base;
    missing_course["courseId"] = json!(course + 100);
    let (status, _) = app
        .send(Method::POST, "/api/auth/register", None, Some(missing_course))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn admin_code_is_admin_only_and_normalized() {
    let app = TestApp::new().await;
    let admin = app.admin().await;
    let user = app.plain_user("plain@example.com").await;

    let (status, _) = app.send(Method::GET, "/api/auth/admin-code", Some(user), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app
        .send(
            Method::PUT,
            "/api/auth/admin-code",
            Some(admin),
            Some(json!({ "adminCode": "  cohort2026 " })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["adminCode"], "COHORT2026");

    let (status, _) = app
        .send(
            Method::PUT,
            "/api/auth/admin-code",
            Some(admin),
            Some(json!({ "adminCode": "ab-1" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn course_domain_change_over_http_syncs_students() {
    let app = TestApp::new().await;
    let admin = app.admin().await;
    let a = app.domain("Math").await;
    let b = app.domain("ML").await;
    let course = app.course("Cohort", None, &[a, b]).await;
    let student = app
        .student_with_scores("sync", Some(course), &[(a, 90.0), (b, 75.0)])
        .await;

    let (status, body) = app
        .send(
            Method::PUT,
            &format!("/api/courses/{course}/domains"),
            Some(admin),
            Some(json!({ "domainIds": [a] })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["sync"]["studentsChanged"], 1);
    assert_eq!(body["data"]["course"]["domains"].as_array().unwrap().len(), 1);
    assert_eq!(body["data"]["course"]["studentCount"], 1);

    assert_eq!(app.ledger(student).await, vec![(a, 90.0)]);
    assert_eq!(app.aggregates(student).await, (90.0, 1, 1));
}

#[tokio::test]
async fn projects_notify_admins_and_students() {
    let app = TestApp::new().await;
    let admin = app.admin().await;
    let student = app.student_with_scores("builder", None, &[]).await;
    let user = app.user_id_of_student(student).await;

    let (status, body) = app
        .send(
            Method::POST,
            "/api/projects",
            Some(user),
            Some(json!({ "title": "Image classifier", "projectUrl": "https://example.com/repo" })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["status"], "pending");
    let project = body["data"]["id"].as_i64().unwrap();

    let (_, body) = app
        .send(Method::GET, "/api/notifications/unread-count", Some(admin), None)
        .await;
    assert_eq!(body["data"]["count"], 1);

    let (status, body) = app
        .send(
            Method::POST,
            &format!("/api/projects/{project}/review"),
            Some(admin),
            Some(json!({ "status": "approved", "grade": 93.5, "feedback": "Nice work" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "approved");
    assert_eq!(body["data"]["reviewedBy"], admin);

    let (_, body) = app.send(Method::GET, "/api/notifications", Some(user), None).await;
    let notifications = body["data"].as_array().unwrap();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0]["notificationType"], "project_reviewed");
    assert_eq!(notifications[0]["relatedProjectId"], project);

    let id = notifications[0]["id"].as_i64().unwrap();
    let (status, _) = app
        .send(Method::POST, &format!("/api/notifications/{id}/read"), Some(admin), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = app
        .send(Method::POST, &format!("/api/notifications/{id}/read"), Some(user), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["isRead"], true);

    let (status, _) = app
        .send(Method::POST, "/api/projects", Some(admin), Some(json!({ "title": "x" })))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn announcements_are_scoped_to_the_students_course() {
    let app = TestApp::new().await;
    let admin = app.admin().await;
    let morning = app.course("Morning", None, &[]).await;
    let evening = app.course("Evening", None, &[]).await;
    let enrolled = app.student_with_scores("early", Some(morning), &[]).await;
    let elsewhere = app.student_with_scores("late", Some(evening), &[]).await;
    let enrolled_user = app.user_id_of_student(enrolled).await;
    let elsewhere_user = app.user_id_of_student(elsewhere).await;

    let (status, body) = app
        .send(
            Method::POST,
            "/api/announcements",
            Some(admin),
            Some(json!({ "title": "Demo day", "content": "Friday 3pm", "courseIds": [morning], "priority": "high" })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["isScheduled"], false);
    let announcement = body["data"]["id"].as_i64().unwrap();

    let (_, body) = app
        .send(Method::GET, "/api/announcements", Some(enrolled_user), None)
        .await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
    assert_eq!(body["data"][0]["isRead"], false);

    let (_, body) = app
        .send(Method::GET, "/api/announcements", Some(elsewhere_user), None)
        .await;
    assert!(body["data"].as_array().unwrap().is_empty());

    let (_, body) = app
        .send(Method::GET, "/api/notifications/unread-count", Some(enrolled_user), None)
        .await;
    assert_eq!(body["data"]["count"], 1);

    for _ in 0..2 {
        let (status, _) = app
            .send(
                Method::POST,
                &format!("/api/announcements/{announcement}/read"),
                Some(enrolled_user),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::OK);
    }
    let (_, body) = app
        .send(Method::GET, "/api/announcements", Some(enrolled_user), None)
        .await;
    assert_eq!(body["data"][0]["isRead"], true);

    let (status, body) = app
        .send(
            Method::POST,
            "/api/announcements",
            Some(admin),
            Some(json!({
                "title": "Bad window",
                "content": "x",
                "courseIds": [morning],
                "scheduledStart": "2026-05-02T00:00:00Z",
                "scheduledEnd": "2026-05-01T00:00:00Z"
            })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn notification_cleanup_tolerates_huge_retention() {
    use capsule_backend::config::MAX_NOTIFICATION_RETENTION_DAYS;
    use capsule_backend::services::notification::cleanup_old;

    let app = TestApp::new().await;
    let user = app.plain_user("reader@example.com").await;
    let read_at = chrono::Utc::now() - chrono::Duration::days(30);
    sqlx::query(
        r#"INSERT INTO "notifications"
             ("recipient_id", "notification_type", "title", "message", "is_read", "read_at", "created_at")
           VALUES (?, 'project_reviewed', 'Reviewed', 'Done', 1, ?, ?)"#,
    )
    .bind(user)
    .bind(read_at)
    .bind(read_at)
    .execute(app.pool())
    .await
    .unwrap();

    assert_eq!(cleanup_old(app.pool(), i64::MAX).await.unwrap(), 0);
    assert_eq!(cleanup_old(app.pool(), MAX_NOTIFICATION_RETENTION_DAYS).await.unwrap(), 0);
    assert_eq!(cleanup_old(app.pool(), 2).await.unwrap(), 1);
}

#[tokio::test]
async fn assessments_do_not_touch_the_ledger() {
    let app = TestApp::new().await;
    let admin = app.admin().await;
    let a = app.domain("Math").await;
    let student = app.student_with_scores("tested", None, &[(a, 55.0)]).await;
    let user = app.user_id_of_student(student).await;

    let (status, body) = app
        .send(
            Method::POST,
            "/api/assessments",
            Some(admin),
            Some(json!({
                "studentId": student,
                "domainId": a,
                "score": 95,
                "details": [
                    { "question": "2+2", "answer": "4", "isCorrect": true, "pointsEarned": 1, "pointsPossible": 1 }
                ]
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["details"].as_array().unwrap().len(), 1);

    assert_eq!(app.ledger(student).await, vec![(a, 55.0)]);
    assert_eq!(app.aggregates(student).await.0, 55.0);

    let (status, body) = app.send(Method::GET, "/api/assessments", Some(user), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
    assert_eq!(body["data"][0]["domainName"], "Math");
}

#[tokio::test]
async fn weekly_progress_view_lists_started_weeks() {
    let app = TestApp::new().await;
    let admin = app.admin().await;
    let a = app.domain("Math").await;
    let start = chrono::Utc::now().date_naive() - chrono::Duration::days(15);
    let course = app.course("Current", Some(start), &[a]).await;
    let student = app.student_with_scores("weekly", Some(course), &[(a, 66.66)]).await;

    let (status, body) = app
        .send(
            Method::GET,
            &format!("/api/students/{student}/weekly-progress"),
            Some(admin),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let data = &body["data"];
    assert_eq!(data["hasData"], true);
    assert_eq!(data["courseDuration"], 12);
    assert_eq!(data["currentAverage"], 66.7);

    let weeks = data["weeks"].as_array().unwrap();
    assert_eq!(weeks.len(), 3);
    assert_eq!(weeks[0]["week"], "Week 1");
    assert_eq!(weeks[2]["isHistorical"], true);
    assert_eq!(weeks[2]["score"], 66.66);
    assert_eq!(weeks[0]["isHistorical"], false);
    assert_eq!(weeks[0]["score"], 66.7);
}

#[tokio::test]
async fn weekly_progress_without_start_date_is_empty() {
    let app = TestApp::new().await;
    let admin = app.admin().await;
    let student = app.student_with_scores("nostart", None, &[]).await;

    let (status, body) = app
        .send(
            Method::GET,
            &format!("/api/students/{student}/weekly-progress"),
            Some(admin),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["hasData"], false);
    assert!(body["data"]["weeks"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn course_duration_is_capped() {
    let app = TestApp::new().await;
    let admin = app.admin().await;
    let course = app.course("Long", None, &[]).await;

    let (status, body) = app
        .send(
            Method::PUT,
            &format!("/api/courses/{course}"),
            Some(admin),
            Some(json!({ "durationWeeks": 20_000_000 })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");

    let (status, body) = app
        .send(
            Method::POST,
            "/api/courses",
            Some(admin),
            Some(json!({ "name": "Decade", "durationWeeks": 520 })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["course"]["durationWeeks"], 520);
}

#[tokio::test]
async fn weekly_progress_stops_at_today_for_oversized_courses() {
    let app = TestApp::new().await;
    let admin = app.admin().await;
    let a = app.domain("Math").await;
    let start = date(2000, 1, 3);
    let course = app.course("Legacy", Some(start), &[a]).await;
    let student = app.student_with_scores("legacy", Some(course), &[(a, 70.0)]).await;

    sqlx::query(r#"UPDATE "courses" SET "duration_weeks" = ? WHERE "id" = ?"#)
        .bind(20_000_000_i64)
        .bind(course)
        .execute(app.pool())
        .await
        .unwrap();

    let (status, body) = app
        .send(
            Method::GET,
            &format!("/api/students/{student}/weekly-progress"),
            Some(admin),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let today = chrono::Utc::now().date_naive();
    let elapsed = (today - start).num_days() / 7 + 1;
    let weeks = body["data"]["weeks"].as_array().unwrap();
    assert_eq!(weeks.len() as i64, elapsed);
    assert_eq!(body["data"]["courseDuration"], 20_000_000);
}

#[tokio::test]
async fn seeding_is_idempotent() {
    let app = TestApp::new().await;
    let config = capsule_backend::config::Config::for_database("sqlite::memory:", common::JWT_SECRET);

    capsule_backend::seed::run(app.pool(), &config).await.unwrap();
    capsule_backend::seed::run(app.pool(), &config).await.unwrap();

    let domains: i64 = sqlx::query_scalar(r#"SELECT COUNT(*) FROM "domains""#)
        .fetch_one(app.pool())
        .await
        .unwrap();
    assert_eq!(domains, 9);

    let admin: (i64, Option<String>) =
        sqlx::query_as(r#"SELECT COUNT(*), MAX("admin_code") FROM "users" WHERE "role" = 'admin'"#)
            .fetch_one(app.pool())
            .await
            .unwrap();
    assert_eq!(admin, (1, Some("CAPSULE01".to_string())));

    let (status, body) = app.send(Method::GET, "/api/auth/courses", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"].as_array().unwrap().is_empty());
}
