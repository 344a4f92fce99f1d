use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use course_roster::config::Config;
use course_roster::db;
use course_roster::migrate::ensure_base_collections;
use course_roster::server::{build_router, AppState};
use course_roster::sqlite_store::SqliteStore;
use course_roster_core::models::{collections, CohortSummary};
use course_roster_core::store::{find_as, Filter, Store};
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

// ============ HTTP ============

struct TestApp {
    _tmp: TempDir,
    store: Arc<SqliteStore>,
    router: Router,
}

async fn setup_app() -> TestApp {
    let tmp = TempDir::new().unwrap();
    let config = Config::new(tmp.path().join("data/roster.sqlite"), "127.0.0.1:0");
    let pool = db::connect(&config).await.unwrap();
    let store = Arc::new(SqliteStore::new(pool));
    ensure_base_collections(store.as_ref()).await.unwrap();
    let router = build_router(AppState::new(store.clone(), config));
    TestApp {
        _tmp: tmp,
        store,
        router,
    }
}

async fn send(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

struct Hierarchy {
    course_id: String,
    year_id: String,
    month_id: String,
    batch_id: String,
    student_id: String,
}

async fn build_hierarchy(router: &Router) -> Hierarchy {
    let (status, body) = send(
        router,
        "POST",
        "/api/courses/add",
        Some(json!({ "course": "Data Science", "description": "ML track" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let course_id = body["course"]["_id"].as_str().unwrap().to_string();

    let (status, body) = send(
        router,
        "POST",
        &format!("/api/courses/{course_id}/years/add"),
        Some(json!({ "year": 2025 })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["year"]["description"], "");
    let year_id = body["year"]["_id"].as_str().unwrap().to_string();

    let (status, body) = send(
        router,
        "POST",
        &format!("/api/years/{year_id}/months/add"),
        Some(json!({ "month": "January" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let month_id = body["month"]["_id"].as_str().unwrap().to_string();

    let (status, body) = send(
        router,
        "POST",
        &format!("/api/months/{month_id}/batches/add"),
        Some(json!({ "batch": "Batch 1" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let batch_id = body["batch"]["_id"].as_str().unwrap().to_string();

    let (status, body) = send(
        router,
        "POST",
        "/api/students/add",
        Some(json!({
            "firstName": "Ada",
            "lastName": "Lovelace",
            "email": "ada@example.com",
            "contactNumber": "9876543210",
            "fees": "1500"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let student_id = body["student"]["_id"].as_str().unwrap().to_string();

    Hierarchy {
        course_id,
        year_id,
        month_id,
        batch_id,
        student_id,
    }
}

#[tokio::test]
async fn test_health() {
    let app = setup_app().await;
    let (status, body) = send(&app.router, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn test_membership_end_to_end() {
    let app = setup_app().await;
    let h = build_hierarchy(&app.router).await;

    let request = json!({
        "course": "data",
        "year": "2025",
        "month": "January",
        "batch": "Batch 1",
        "studentId": h.student_id,
    });
    let (status, body) = send(
        &app.router,
        "POST",
        "/api/course-year-month-batch/add-student",
        Some(request.clone()),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let outcome = &body["courseYearMonthBatch"];
    assert_eq!(outcome["totalStudents"], 1);
    assert_eq!(
        outcome["collectionName"],
        "datascience_2025_january_batch1_stu-details"
    );

    let partition = "datascience_2025_january_batch1_stu-details";
    assert_eq!(app.store.count(partition, &Filter::All).await.unwrap(), 1);

    let (status, body) = send(
        &app.router,
        "POST",
        "/api/course-year-month-batch/add-student",
        Some(request),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "already_member");
    assert_eq!(body["error"]["details"]["studentId"], json!(h.student_id));
    assert_eq!(app.store.count(partition, &Filter::All).await.unwrap(), 1);

    let (status, body) = send(
        &app.router,
        "GET",
        "/api/course-year-month-batch?course=data&year=2025",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let summaries = body["courseYearMonthBatches"].as_array().unwrap();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0]["totalStudents"], 1);

    let (status, body) = send(
        &app.router,
        "GET",
        "/api/students/list?course=Data%20Science&year=2025&month=January&batch=Batch%201",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["collectionName"], partition);
    assert_eq!(body["students"].as_array().unwrap().len(), 1);
    assert_eq!(body["students"][0]["email"], "ada@example.com");
}

#[tokio::test]
async fn test_dynamic_collection_endpoint_shares_membership() {
    let app = setup_app().await;
    let h = build_hierarchy(&app.router).await;

    let (status, body) = send(
        &app.router,
        "POST",
        "/api/students/add-to-dynamic-collection",
        Some(json!({
            "course": h.course_id,
            "year": h.year_id,
            "month": h.month_id,
            "batch": h.batch_id,
            "studentId": h.student_id,
            "additionalDetails": { "mentor": "Grace" }
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["totalStudents"], 1);
    assert_eq!(body["entry"]["studentName"], "Ada Lovelace");

    let (status, body) = send(
        &app.router,
        "POST",
        "/api/course-year-month-batch/add-student",
        Some(json!({
            "course": "Data Science",
            "year": "2025",
            "month": "January",
            "batch": "Batch 1",
            "studentId": h.student_id,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "already_member");
}

#[tokio::test]
async fn test_unknown_month_lists_available_months() {
    let app = setup_app().await;
    let h = build_hierarchy(&app.router).await;

    let (status, body) = send(
        &app.router,
        "POST",
        "/api/course-year-month-batch/add-student",
        Some(json!({
            "course": "data science",
            "year": "2025",
            "month": "March",
            "batch": "Batch 1",
            "studentId": h.student_id,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "not_found");
    assert_eq!(body["error"]["message"], "Month not found");
    let months = body["error"]["details"]["availableMonths"].as_array().unwrap();
    assert_eq!(months.len(), 1);
    assert_eq!(months[0]["name"], "January");
    assert_eq!(months[0]["id"], json!(h.month_id));

    let collections = app.store.list_collections().await.unwrap();
    assert!(!collections.iter().any(|c| c.ends_with("_stu-details")));
}

#[tokio::test]
async fn test_missing_fields_rejected() {
    let app = setup_app().await;
    let (status, body) = send(
        &app.router,
        "POST",
        "/api/course-year-month-batch/add-student",
        Some(json!({ "course": "data science" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "validation_failed");
}

#[tokio::test]
async fn test_uniqueness_conflicts() {
    let app = setup_app().await;
    let h = build_hierarchy(&app.router).await;

    let (status, body) = send(
        &app.router,
        "POST",
        "/api/courses/add",
        Some(json!({ "course": "Data Science" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "conflict");

    let (status, _) = send(
        &app.router,
        "POST",
        &format!("/api/courses/{}/years/add", h.course_id),
        Some(json!({ "year": "2025" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = send(
        &app.router,
        "POST",
        &format!("/api/years/{}/months/add", h.year_id),
        Some(json!({ "month": "January" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = send(
        &app.router,
        "POST",
        &format!("/api/months/{}/batches/add", h.month_id),
        Some(json!({ "batch": "Batch 1" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = send(
        &app.router,
        "POST",
        "/api/students/add",
        Some(json!({
            "firstName": "Ada",
            "lastName": "Lovelace",
            "email": "ada@example.com"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["details"]["studentId"], json!(h.student_id));
}

#[tokio::test]
async fn test_student_validation_and_email_lookup() {
    let app = setup_app().await;
    let (status, body) = send(
        &app.router,
        "POST",
        "/api/students/add",
        Some(json!({
            "firstName": "Bob",
            "lastName": "Stone",
            "email": "not-an-email",
            "contactNumber": "123"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "validation_failed");

    let (status, body) = send(&app.router, "POST", "/api/students/add", Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"]["details"]["missingFields"].is_array());

    build_hierarchy(&app.router).await;
    let (status, body) = send(
        &app.router,
        "GET",
        "/api/students/check-email?email=ada@example.com",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["exists"], true);

    let (status, body) = send(
        &app.router,
        "PUT",
        "/api/students/update-by-email",
        Some(json!({ "email": "ada@example.com", "college": "Analytical" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["student"]["college"], "Analytical");
}

#[tokio::test]
async fn test_malformed_json_is_bad_request() {
    let app = setup_app().await;
    let request = Request::builder()
        .method("POST")
        .uri("/api/courses/add")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_delete_course_with_malformed_id() {
    let app = setup_app().await;
    let (status, body) = send(&app.router, "DELETE", "/api/courses/delete/abc", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "bad_request");
}

async fn add_student(router: &Router, first: &str, last: &str, email: &str) -> String {
    let (status, body) = send(
        router,
        "POST",
        "/api/students/add",
        Some(json!({ "firstName": first, "lastName": last, "email": email })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    body["student"]["_id"].as_str().unwrap().to_string()
}

fn cohort_request(student_id: &str) -> Value {
    json!({
        "course": "Data Science",
        "year": "2025",
        "month": "January",
        "batch": "Batch 1",
        "studentId": student_id,
    })
}

async fn summaries(store: &SqliteStore) -> Vec<CohortSummary> {
    find_as(store, collections::COHORT_SUMMARIES, &Filter::All)
        .await
        .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_memberships_keep_summary_complete() {
    const MEMBERS: usize = 16;
    let app = setup_app().await;
    build_hierarchy(&app.router).await;

    let mut ids = Vec::new();
    for n in 0..MEMBERS {
        let email = format!("student{n}@example.com");
        ids.push(add_student(&app.router, "Student", &format!("No{n}"), &email).await);
    }

    let mut handles = Vec::new();
    for id in &ids {
        let router = app.router.clone();
        let request = cohort_request(id);
        handles.push(tokio::spawn(async move {
            send(
                &router,
                "POST",
                "/api/course-year-month-batch/add-student",
                Some(request),
            )
            .await
        }));
    }
    for handle in handles {
        let (status, body) = handle.await.unwrap();
        assert_eq!(status, StatusCode::CREATED, "{body}");
    }

    let partition = "datascience_2025_january_batch1_stu-details";
    assert_eq!(app.store.count(partition, &Filter::All).await.unwrap(), MEMBERS);
    let summaries = summaries(&app.store).await;
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].students.len(), MEMBERS);
    assert_eq!(summaries[0].total_students, MEMBERS);
    for id in &ids {
        assert!(summaries[0].students.contains(id));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_duplicate_membership_is_conflict() {
    let app = setup_app().await;
    let h = build_hierarchy(&app.router).await;

    let mut handles = Vec::new();
    for _ in 0..2 {
        let router = app.router.clone();
        let request = cohort_request(&h.student_id);
        handles.push(tokio::spawn(async move {
            send(
                &router,
                "POST",
                "/api/course-year-month-batch/add-student",
                Some(request),
            )
            .await
        }));
    }
    let mut statuses = Vec::new();
    for handle in handles {
        let (status, body) = handle.await.unwrap();
        if status == StatusCode::CONFLICT {
            let code = body["error"]["code"].as_str().unwrap_or_default();
            assert!(code == "already_member" || code == "conflict", "{body}");
        }
        statuses.push(status);
    }
    statuses.sort();
    assert_eq!(statuses, vec![StatusCode::CREATED, StatusCode::CONFLICT]);

    let partition = "datascience_2025_january_batch1_stu-details";
    assert_eq!(app.store.count(partition, &Filter::All).await.unwrap(), 1);
    let summaries = summaries(&app.store).await;
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].students, vec![h.student_id.clone()]);
    assert_eq!(summaries[0].total_students, 1);
}

#[tokio::test]
async fn test_course_fragment_matches_non_ascii_names() {
    let app = setup_app().await;
    let (status, _) = send(
        &app.router,
        "POST",
        "/api/courses/add",
        Some(json!({ "course": "Électronique" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send(
        &app.router,
        "GET",
        "/api/course-year-month-batch?course=%C3%A9lectronique",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert!(body["courseYearMonthBatches"].as_array().unwrap().is_empty());

    let (status, _) = send(
        &app.router,
        "GET",
        "/api/course-year-month-batch?course=%C3%A9lectro",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_create_year_defaults_description() {
    let app = setup_app().await;
    let h = build_hierarchy(&app.router).await;
    let (status, body) = send(
        &app.router,
        "POST",
        "/api/years",
        Some(json!({ "year": "2026", "courseId": h.course_id })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["year"]["description"], "Academic year 2026");
}

// ============ CLI ============

fn roster_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_roster"))
}

fn setup_cli_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/roster.sqlite"

[server]
bind = "127.0.0.1:5000"

[seed]
years = ["2025"]
months = ["January"]
batches = ["Batch 1"]
"#,
        root.display()
    );

    let config_path = config_dir.join("roster.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_roster(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = roster_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run roster binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_partition_command_needs_no_config() {
    let (stdout, stderr, success) = run_roster(
        Path::new("/nonexistent/roster.toml"),
        &["partition", "Data Science", "2025", "January", "Batch 1"],
    );
    assert!(success, "partition failed: {}", stderr);
    assert_eq!(stdout.trim(), "datascience_2025_january_batch1_stu-details");
}

#[test]
fn test_init_creates_database() {
    let (tmp, config) = setup_cli_env();
    let (stdout, stderr, success) = run_roster(&config, &["init"]);
    assert!(success, "init failed: {}", stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/roster.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config) = setup_cli_env();
    let (_, _, first) = run_roster(&config, &["init"]);
    let (_, stderr, second) = run_roster(&config, &["init"]);
    assert!(first);
    assert!(second, "second init failed: {}", stderr);
}

#[test]
fn test_seed_then_stats() {
    let (_tmp, config) = setup_cli_env();
    let (stdout, stderr, success) = run_roster(&config, &["seed"]);
    assert!(success, "seed failed: {}", stderr);
    // 2 default courses, one year, one month and one batch each.
    assert!(stdout.contains("Seeded 8 records"), "{}", stdout);

    let (stdout, _, success) = run_roster(&config, &["seed"]);
    assert!(success);
    assert!(stdout.contains("Seeded 0 records"), "{}", stdout);

    let (stdout, stderr, success) = run_roster(&config, &["stats"]);
    assert!(success, "stats failed: {}", stderr);
    assert!(stdout.contains("Course_details"), "{}", stdout);
}

#[test]
fn test_missing_config_fails() {
    let (_, stderr, success) = run_roster(Path::new("/nonexistent/roster.toml"), &["init"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"));
}
