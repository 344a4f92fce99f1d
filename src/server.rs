//! REST API server.
//!
//! Every route lives under `/api` except the health check. Handlers are
//! thin: they decode the request, call into [`catalog`](crate::catalog),
//! [`students`](crate::students) or [`cohort`](crate::cohort), and wrap the
//! result in a JSON envelope.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/api/courses/add` | Create a course |
//! | `GET`  | `/api/courses` | List courses |
//! | `DELETE` | `/api/courses/delete/{courseId}` | Delete a course (no cascade) |
//! | `POST` | `/api/courses/{courseId}/years/add` | Add a year to a course |
//! | `GET`  | `/api/courses/{courseId}/years` | Years of a course |
//! | `GET`  | `/api/years?courseId=` | Years, seeding defaults for an empty course |
//! | `POST` | `/api/years` | Create a year |
//! | `POST` | `/api/years/{yearId}/months/add` | Add a month to a year |
//! | `GET`  | `/api/years/{yearId}/months` | Months of a year |
//! | `POST` | `/api/months/{monthId}/batches/add` | Add a batch to a month |
//! | `GET`  | `/api/months/{monthId}/batches` | Batches of a month |
//! | `GET`  | `/api/months`, `/api/batches` | All months / batches |
//! | `POST` | `/api/batches/{batchId}/students/add` | Create a student in a batch |
//! | `GET`  | `/api/batches/{batchId}/students` | Students of a batch |
//! | `POST` | `/api/students/add` | Create a student |
//! | `GET`  | `/api/students` | Students by label |
//! | `DELETE` | `/api/students/{id}` | Delete a student |
//! | `GET`  | `/api/students/check-email` | Whether an email is in use |
//! | `PUT`  | `/api/students/update-by-email` | Update a student found by email |
//! | `POST` | `/api/course-year-month-batch/add-student` | Record a cohort membership |
//! | `POST` | `/api/students/add-to-dynamic-collection` | Record a cohort membership with details |
//! | `GET`  | `/api/course-year-month-batch` | Query cohort summaries |
//! | `GET`  | `/api/students/list` | Members of a cohort partition |
//! | `GET`  | `/api/students/members` | Members, compact form |
//! | `GET`  | `/api/debug-references` | Trace reference resolution |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "Month not found", "details": { ... } } }
//! ```
//!
//! Error codes: `bad_request` (400), `validation_failed` (400), `not_found`
//! (404), `conflict` (409), `already_member` (409), `internal` (500).
//! Internal failure text is only exposed when `server.environment` is
//! `development`.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support the browser
//! client.

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use course_roster_core::store::{Store, StoreError};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::catalog::{course_view, Catalog};
use crate::cohort::{CohortManager, MembershipRequest, PartitionRegistry, SummaryQuery};
use crate::config::{Config, Environment};
use crate::db;
use crate::error::RosterError;
use crate::migrate::ensure_base_collections;
use crate::sqlite_store::SqliteStore;
use crate::students::{loose_string, StudentInput, StudentQuery, Students};

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub config: Arc<Config>,
    /// Partitions provisioned by this process.
    pub partitions: Arc<PartitionRegistry>,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, config: Config) -> Self {
        Self {
            store,
            config: Arc::new(config),
            partitions: Arc::new(PartitionRegistry::new()),
        }
    }

    fn catalog(&self) -> Catalog<'_> {
        Catalog::new(self.store.as_ref())
    }

    fn students(&self) -> Students<'_> {
        Students::new(self.store.as_ref(), &self.config.defaults)
    }

    fn cohorts(&self) -> CohortManager<'_> {
        CohortManager::new(self.store.as_ref(), &self.partitions)
    }

    fn error(&self, err: RosterError) -> AppError {
        AppError::from_domain(err, self.config.server.environment)
    }
}

/// Starts the HTTP server.
///
/// Opens the database, declares the base collections, and serves on
/// `[server].bind` until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool);
    ensure_base_collections(&store).await?;

    let bind_addr = config.server.bind.clone();
    let app = build_router(AppState::new(Arc::new(store), config.clone()));

    info!(bind = %bind_addr, environment = ?config.server.environment, "roster server listening");

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// The full application router over the given state.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api = Router::new()
        .route("/courses/add", post(handle_add_course))
        .route("/courses", get(handle_list_courses))
        .route("/courses/delete/{course_id}", delete(handle_delete_course))
        .route("/courses/{course_id}/years/add", post(handle_add_course_year))
        .route("/courses/{course_id}/years", get(handle_course_years))
        .route("/years", get(handle_list_years).post(handle_create_year))
        .route("/years/{year_id}/months/add", post(handle_add_month))
        .route("/years/{year_id}/months", get(handle_year_months))
        .route("/months/{month_id}/batches/add", post(handle_add_batch))
        .route("/months/{month_id}/batches", get(handle_month_batches))
        .route("/months", get(handle_list_months))
        .route("/batches", get(handle_list_batches))
        .route("/batches/{batch_id}/students/add", post(handle_add_batch_student))
        .route("/batches/{batch_id}/students", get(handle_batch_students))
        .route("/students/add", post(handle_add_student))
        .route("/students", get(handle_query_students))
        .route("/students/{id}", delete(handle_delete_student))
        .route("/students/check-email", get(handle_check_email))
        .route("/students/update-by-email", put(handle_update_by_email))
        .route(
            "/course-year-month-batch/add-student",
            post(handle_add_cohort_student),
        )
        .route(
            "/students/add-to-dynamic-collection",
            post(handle_add_to_partition),
        )
        .route("/course-year-month-batch", get(handle_query_summaries))
        .route("/students/list", get(handle_list_members))
        .route("/students/members", get(handle_list_members_compact))
        .route("/debug-references", get(handle_debug_references));

    Router::new()
        .nest("/api", api)
        .route("/health", get(handle_health))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// ============ Error response ============

/// JSON error response body.
#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

/// Inner error detail with a machine-readable code and human-readable message.
#[derive(Serialize)]
struct ErrorDetail {
    /// Machine-readable error code (e.g., `"bad_request"`, `"not_found"`).
    code: String,
    /// Human-readable error message.
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Value>,
}

/// Error type that converts into an Axum HTTP response.
pub struct AppError {
    status: StatusCode,
    code: String,
    message: String,
    details: Option<Value>,
}

impl AppError {
    fn new(status: StatusCode, code: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }

    fn with_details(mut self, details: Value) -> Self {
        let empty = matches!(&details, Value::Object(m) if m.is_empty()) || details.is_null();
        if !empty {
            self.details = Some(details);
        }
        self
    }

    /// Maps a domain error to its HTTP form. Internal failure text is only
    /// attached in development.
    fn from_domain(err: RosterError, environment: Environment) -> Self {
        match err {
            RosterError::Validation { message, errors } => {
                AppError::new(StatusCode::BAD_REQUEST, "validation_failed", message)
                    .with_details(json!({ "errors": errors }))
            }
            RosterError::MissingFields { fields } => {
                AppError::new(StatusCode::BAD_REQUEST, "validation_failed", "Missing required fields")
                    .with_details(json!({ "missingFields": fields }))
            }
            RosterError::InvalidId(message) => bad_request(message),
            RosterError::NotFound { message, details } => {
                AppError::new(StatusCode::NOT_FOUND, "not_found", message).with_details(details)
            }
            RosterError::Conflict { message, details } => {
                AppError::new(StatusCode::CONFLICT, "conflict", message).with_details(details)
            }
            RosterError::AlreadyMember {
                student,
                partition,
                existing,
            } => AppError::new(
                StatusCode::CONFLICT,
                "already_member",
                "Student already exists in this specific collection",
            )
            .with_details(json!({
                "studentId": student,
                "collectionName": partition,
                "existingEntry": existing,
            })),
            RosterError::Store(StoreError::Duplicate { collection, fields }) => {
                AppError::new(StatusCode::CONFLICT, "conflict", "Record already exists")
                    .with_details(json!({ "collection": collection, "fields": fields }))
            }
            other => {
                error!(error = %other, "request failed");
                let err = AppError::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal",
                    "Internal server error",
                );
                match environment {
                    Environment::Development => {
                        err.with_details(json!({ "internal": other.to_string() }))
                    }
                    Environment::Production => err,
                }
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
                details: self.details,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

/// Constructs a 400 Bad Request error.
fn bad_request(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::BAD_REQUEST, "bad_request", message)
}

/// Unwraps a JSON body, turning decode failures into `bad_request`.
fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| bad_request(rejection.body_text()))
}

type ApiResult = Result<Response, AppError>;

fn created(value: Value) -> ApiResult {
    Ok((StatusCode::CREATED, Json(value)).into_response())
}

fn ok(value: Value) -> ApiResult {
    Ok(Json(value).into_response())
}

fn to_json<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

// ============ GET /health ============

/// JSON response body for `GET /health`.
#[derive(Serialize)]
struct HealthResponse {
    /// Always `"ok"` when the server is running.
    status: String,
    /// The crate version from `Cargo.toml`.
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ Courses ============

#[derive(Deserialize)]
struct CourseBody {
    course: Option<String>,
    name: Option<String>,
    description: Option<String>,
}

async fn handle_add_course(
    State(state): State<AppState>,
    payload: Result<Json<CourseBody>, JsonRejection>,
) -> ApiResult {
    let req = body(payload)?;
    let name = req.course.or(req.name).unwrap_or_default();
    let course = state
        .catalog()
        .add_course(&name, req.description.as_deref().unwrap_or_default())
        .await
        .map_err(|e| state.error(e))?;
    created(json!({ "message": "Course added successfully", "course": course_view(&course) }))
}

async fn handle_list_courses(State(state): State<AppState>) -> ApiResult {
    let courses = state
        .catalog()
        .list_courses()
        .await
        .map_err(|e| state.error(e))?;
    ok(Value::Array(courses.iter().map(course_view).collect()))
}

async fn handle_delete_course(
    State(state): State<AppState>,
    Path(course_id): Path<String>,
) -> ApiResult {
    let course = state
        .catalog()
        .delete_course(&course_id)
        .await
        .map_err(|e| state.error(e))?;
    ok(json!({ "message": "Course deleted successfully", "course": course_view(&course) }))
}

// ============ Years ============

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct YearBody {
    #[serde(default, deserialize_with = "loose_string")]
    year: Option<String>,
    #[serde(default)]
    course_id: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

async fn handle_add_course_year(
    State(state): State<AppState>,
    Path(course_id): Path<String>,
    payload: Result<Json<YearBody>, JsonRejection>,
) -> ApiResult {
    let req = body(payload)?;
    let year = state
        .catalog()
        .add_year(
            &course_id,
            req.year.as_deref().unwrap_or_default(),
            Some(req.description.as_deref().unwrap_or_default()),
        )
        .await
        .map_err(|e| state.error(e))?;
    created(json!({ "message": "Year added successfully", "year": year }))
}

async fn handle_course_years(
    State(state): State<AppState>,
    Path(course_id): Path<String>,
) -> ApiResult {
    let years = state
        .catalog()
        .years_of_course(&course_id)
        .await
        .map_err(|e| state.error(e))?;
    ok(to_json(&years))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct YearsQuery {
    course_id: Option<String>,
}

async fn handle_list_years(
    State(state): State<AppState>,
    Query(query): Query<YearsQuery>,
) -> ApiResult {
    let listing = state
        .catalog()
        .list_years(query.course_id.as_deref())
        .await
        .map_err(|e| state.error(e))?;
    if listing.seeded {
        created(json!({ "message": "Created default years", "years": listing.years }))
    } else {
        ok(json!({ "message": "Years retrieved successfully", "years": listing.years }))
    }
}

async fn handle_create_year(
    State(state): State<AppState>,
    payload: Result<Json<YearBody>, JsonRejection>,
) -> ApiResult {
    let req = body(payload)?;
    let year = state
        .catalog()
        .add_year(
            req.course_id.as_deref().unwrap_or_default(),
            req.year.as_deref().unwrap_or_default(),
            req.description.as_deref().filter(|d| !d.trim().is_empty()),
        )
        .await
        .map_err(|e| state.error(e))?;
    created(json!({ "message": "Year created successfully", "year": year }))
}

// ============ Months ============

#[derive(Deserialize)]
struct MonthBody {
    month: Option<String>,
    name: Option<String>,
}

async fn handle_add_month(
    State(state): State<AppState>,
    Path(year_id): Path<String>,
    payload: Result<Json<MonthBody>, JsonRejection>,
) -> ApiResult {
    let req = body(payload)?;
    let name = req.month.or(req.name).unwrap_or_default();
    let month = state
        .catalog()
        .add_month(&year_id, &name)
        .await
        .map_err(|e| state.error(e))?;
    created(json!({ "message": "Month added successfully", "month": month }))
}

async fn handle_year_months(
    State(state): State<AppState>,
    Path(year_id): Path<String>,
) -> ApiResult {
    let months = state
        .catalog()
        .months_of_year(&year_id)
        .await
        .map_err(|e| state.error(e))?;
    ok(to_json(&months))
}

async fn handle_list_months(State(state): State<AppState>) -> ApiResult {
    let months = state.catalog().list_months().await.map_err(|e| state.error(e))?;
    ok(to_json(&months))
}

// ============ Batches ============

#[derive(Deserialize)]
struct BatchBody {
    batch: Option<String>,
    name: Option<String>,
    description: Option<String>,
}

async fn handle_add_batch(
    State(state): State<AppState>,
    Path(month_id): Path<String>,
    payload: Result<Json<BatchBody>, JsonRejection>,
) -> ApiResult {
    let req = body(payload)?;
    let name = req.batch.or(req.name).unwrap_or_default();
    let batch = state
        .catalog()
        .add_batch(&month_id, &name, req.description.as_deref().unwrap_or_default())
        .await
        .map_err(|e| state.error(e))?;
    created(json!({ "message": "Batch added successfully", "batch": batch }))
}

async fn handle_month_batches(
    State(state): State<AppState>,
    Path(month_id): Path<String>,
) -> ApiResult {
    let batches = state
        .catalog()
        .batches_of_month(&month_id)
        .await
        .map_err(|e| state.error(e))?;
    ok(to_json(&batches))
}

async fn handle_list_batches(State(state): State<AppState>) -> ApiResult {
    let batches = state.catalog().list_batches().await.map_err(|e| state.error(e))?;
    ok(to_json(&batches))
}

#[derive(Deserialize)]
struct BatchStudentBody {
    student: Option<StudentInput>,
}

async fn handle_add_batch_student(
    State(state): State<AppState>,
    Path(batch_id): Path<String>,
    payload: Result<Json<BatchStudentBody>, JsonRejection>,
) -> ApiResult {
    let req = body(payload)?;
    let student = state
        .catalog()
        .add_batch_student(&batch_id, req.student, &state.config.defaults)
        .await
        .map_err(|e| state.error(e))?;
    created(json!({ "message": "Student added successfully", "student": student }))
}

async fn handle_batch_students(
    State(state): State<AppState>,
    Path(batch_id): Path<String>,
) -> ApiResult {
    let students = state
        .catalog()
        .batch_students(&batch_id)
        .await
        .map_err(|e| state.error(e))?;
    ok(to_json(&students))
}

// ============ Students ============

async fn handle_add_student(
    State(state): State<AppState>,
    payload: Result<Json<StudentInput>, JsonRejection>,
) -> ApiResult {
    let input = body(payload)?;
    let student = state
        .students()
        .add(input)
        .await
        .map_err(|e| state.error(e))?;
    created(json!({ "message": "Student added successfully", "student": student }))
}

async fn handle_query_students(
    State(state): State<AppState>,
    Query(query): Query<StudentQuery>,
) -> ApiResult {
    let students = state
        .students()
        .query(&query)
        .await
        .map_err(|e| state.error(e))?;
    ok(json!({ "count": students.len(), "students": students }))
}

async fn handle_delete_student(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult {
    let student = state
        .students()
        .delete(&id)
        .await
        .map_err(|e| state.error(e))?;
    ok(json!({
        "message": "Student deleted successfully",
        "student": {
            "_id": student.id,
            "firstName": student.first_name,
            "email": student.email,
        }
    }))
}

#[derive(Deserialize)]
struct EmailQuery {
    email: Option<String>,
}

async fn handle_check_email(
    State(state): State<AppState>,
    Query(query): Query<EmailQuery>,
) -> ApiResult {
    let exists = state
        .students()
        .email_exists(query.email.as_deref())
        .await
        .map_err(|e| state.error(e))?;
    ok(json!({ "exists": exists }))
}

async fn handle_update_by_email(
    State(state): State<AppState>,
    payload: Result<Json<Map<String, Value>>, JsonRejection>,
) -> ApiResult {
    let mut changes = body(payload)?;
    let email = match changes.remove("email") {
        Some(Value::String(email)) => Some(email),
        _ => None,
    };
    let student = state
        .students()
        .update_by_email(email.as_deref(), changes)
        .await
        .map_err(|e| state.error(e))?;
    ok(json!({ "message": "Student updated successfully", "student": student }))
}

// ============ Cohorts ============

async fn handle_add_cohort_student(
    State(state): State<AppState>,
    payload: Result<Json<MembershipRequest>, JsonRejection>,
) -> ApiResult {
    let req = body(payload)?;
    let outcome = state
        .cohorts()
        .record_membership(&req)
        .await
        .map_err(|e| state.error(e))?;
    created(json!({
        "message": "Student added to CourseYearMonthBatch successfully",
        "courseYearMonthBatch": outcome,
    }))
}

async fn handle_add_to_partition(
    State(state): State<AppState>,
    payload: Result<Json<MembershipRequest>, JsonRejection>,
) -> ApiResult {
    let req = body(payload)?;
    let outcome = state
        .cohorts()
        .record_membership(&req)
        .await
        .map_err(|e| state.error(e))?;
    created(json!({
        "message": "Student added to dynamic collection successfully",
        "collectionName": outcome.collection_name,
        "entry": {
            "studentName": outcome.student_name,
            "course": outcome.course,
            "year": outcome.year,
            "month": outcome.month,
            "batch": outcome.batch,
        },
        "totalStudents": outcome.total_students,
    }))
}

async fn handle_query_summaries(
    State(state): State<AppState>,
    Query(query): Query<SummaryQuery>,
) -> ApiResult {
    let summaries = state
        .cohorts()
        .query_summaries(&query)
        .await
        .map_err(|e| state.error(e))?;
    ok(json!({
        "message": format!("Found {} CourseYearMonthBatch documents", summaries.len()),
        "courseYearMonthBatches": summaries,
    }))
}

async fn handle_list_members(
    State(state): State<AppState>,
    Query(query): Query<SummaryQuery>,
) -> ApiResult {
    let members = state
        .cohorts()
        .list_members(&query)
        .await
        .map_err(|e| state.error(e))?;
    let mut value = to_json(&members);
    if let Value::Object(map) = &mut value {
        map.insert("message".into(), json!("Students retrieved successfully"));
    }
    ok(value)
}

async fn handle_list_members_compact(
    State(state): State<AppState>,
    Query(query): Query<SummaryQuery>,
) -> ApiResult {
    let members = state
        .cohorts()
        .list_members_compact(&query)
        .await
        .map_err(|e| state.error(e))?;
    ok(to_json(&members))
}

async fn handle_debug_references(
    State(state): State<AppState>,
    Query(query): Query<SummaryQuery>,
) -> ApiResult {
    let trace = state
        .cohorts()
        .debug_references(&query)
        .await
        .map_err(|e| state.error(e))?;
    ok(trace)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(err: RosterError, env: Environment) -> (StatusCode, String, Option<Value>) {
        let app = AppError::from_domain(err, env);
        (app.status, app.code, app.details)
    }

    #[test]
    fn test_status_mapping() {
        let (status, code, _) = status_of(
            RosterError::validation("Validation failed", vec!["Year is required".into()]),
            Environment::Production,
        );
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(code, "validation_failed");

        let (status, code, details) = status_of(
            RosterError::AlreadyMember {
                student: "s".into(),
                partition: "p_stu-details".into(),
                existing: json!({}),
            },
            Environment::Production,
        );
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(code, "already_member");
        assert_eq!(details.unwrap()["collectionName"], "p_stu-details");

        let (status, code, _) = status_of(
            RosterError::Store(StoreError::Duplicate {
                collection: "Years".into(),
                fields: vec!["year".into(), "course".into()],
            }),
            Environment::Production,
        );
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(code, "conflict");

        let (status, _, details) = status_of(
            RosterError::not_found("Course not found"),
            Environment::Production,
        );
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(details.is_none());
    }

    #[test]
    fn test_internal_detail_only_in_development() {
        let (status, code, details) = status_of(
            RosterError::Internal(anyhow::anyhow!("disk on fire")),
            Environment::Production,
        );
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(code, "internal");
        assert!(details.is_none());

        let (_, _, details) = status_of(
            RosterError::Internal(anyhow::anyhow!("disk on fire")),
            Environment::Development,
        );
        assert_eq!(details.unwrap()["internal"], "disk on fire");
    }
}
