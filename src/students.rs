//! Student records.
//!
//! Students are standalone documents in `Students`. Their `course`, `year`,
//! `month` and `batch` fields are free-text labels filled from
//! [`StudentDefaults`] when absent; cohort membership proper lives in the
//! partitions managed by [`cohort`](crate::cohort).

use course_roster_core::models::{collections, Student};
use course_roster_core::store::{
    find_as, find_one_as, from_document, is_valid_id, to_document, Filter, Store, StoreError,
    Update, CREATED_AT_FIELD, ID_FIELD, UPDATED_AT_FIELD,
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer};
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use crate::config::StudentDefaults;
use crate::error::{require_fields, Result, RosterError};

/// Loosely typed student fields as sent by clients.
///
/// Numeric JSON values are accepted for the text fields that clients tend
/// to send as numbers (`contactNumber`, `year`).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentInput {
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub college: Option<String>,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default, deserialize_with = "loose_string")]
    pub contact_number: Option<String>,
    #[serde(default)]
    pub fees: Option<Value>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub course: Option<String>,
    #[serde(default, deserialize_with = "loose_string")]
    pub year: Option<String>,
    #[serde(default)]
    pub month: Option<String>,
    #[serde(default)]
    pub batch: Option<String>,
    #[serde(default)]
    pub additional_details: Map<String, Value>,
}

pub(crate) fn loose_string<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Label filters for [`Students::query`]. Absent labels fall back to the
/// configured defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StudentQuery {
    #[serde(default)]
    pub course: Option<String>,
    #[serde(default)]
    pub year: Option<String>,
    #[serde(default)]
    pub month: Option<String>,
    #[serde(default)]
    pub batch: Option<String>,
}

fn trimmed(value: &Option<String>) -> String {
    value.as_deref().map(str::trim).unwrap_or_default().to_string()
}

fn label(value: &Option<String>, default: &str) -> String {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => v.to_string(),
        _ => default.to_string(),
    }
}

/// Parses fees leniently: numbers pass through, numeric strings are parsed,
/// anything else counts as zero.
fn parse_fees(value: &Option<Value>) -> f64 {
    let parsed = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|f| f.is_finite()).unwrap_or(0.0)
}

/// `local@domain.tld`: word runs joined by single `.` or `-`, ending in one
/// or more `.` labels of two or three word characters.
static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?-u:\w)+([.-]?(?-u:\w)+)*@(?-u:\w)+([.-]?(?-u:\w)+)*(\.(?-u:\w){2,3})+$")
        .unwrap_or_else(|err| panic!("invalid email pattern: {err}"))
});

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

fn is_valid_contact_number(number: &str) -> bool {
    number.is_empty() || (number.len() == 10 && number.chars().all(|c| c.is_ascii_digit()))
}

/// Normalizes and validates client input into a storable [`Student`].
///
/// All rule violations are reported together.
pub fn build_student(input: &StudentInput, defaults: &StudentDefaults) -> Result<Student> {
    require_fields(&[
        ("firstName", input.first_name.as_deref()),
        ("lastName", input.last_name.as_deref()),
        ("email", input.email.as_deref()),
    ])?;

    let first_name = trimmed(&input.first_name);
    let last_name = trimmed(&input.last_name);
    let email = trimmed(&input.email).to_lowercase();
    let contact_number = trimmed(&input.contact_number);
    let fees = parse_fees(&input.fees);

    let mut errors = Vec::new();
    if first_name.chars().count() < 2 {
        errors.push("First name must be at least 2 characters".to_string());
    }
    if last_name.chars().count() < 2 {
        errors.push("Last name must be at least 2 characters".to_string());
    }
    if !is_valid_email(&email) {
        errors.push("Please fill a valid email address".to_string());
    }
    if !is_valid_contact_number(&contact_number) {
        errors.push(format!(
            "{} is not a valid 10-digit phone number!",
            contact_number
        ));
    }
    if fees < 0.0 {
        errors.push("Fees cannot be negative".to_string());
    }
    if !errors.is_empty() {
        return Err(RosterError::validation("Student validation failed", errors));
    }

    Ok(Student {
        id: String::new(),
        first_name,
        last_name,
        email,
        college: trimmed(&input.college),
        department: trimmed(&input.department),
        contact_number,
        fees,
        address: trimmed(&input.address),
        batch: label(&input.batch, &defaults.batch),
        course: label(&input.course, &defaults.course),
        month: label(&input.month, &defaults.month),
        year: label(&input.year, &defaults.year()),
        additional_details: input.additional_details.clone(),
        created_at: None,
        updated_at: None,
    })
}

/// Field values a stored student is rewritten with.
fn student_fields(student: &Student) -> Result<Map<String, Value>> {
    let mut doc = to_document(student)?;
    for key in [ID_FIELD, CREATED_AT_FIELD, UPDATED_AT_FIELD] {
        doc.remove(key);
    }
    Ok(doc)
}

pub struct Students<'a> {
    store: &'a dyn Store,
    defaults: &'a StudentDefaults,
}

impl<'a> Students<'a> {
    pub fn new(store: &'a dyn Store, defaults: &'a StudentDefaults) -> Self {
        Self { store, defaults }
    }

    /// Validates and inserts a student. (firstName, lastName, email) must be
    /// unused.
    pub async fn add(&self, input: StudentInput) -> Result<Student> {
        let student = build_student(&input, self.defaults)?;
        self.insert(student).await
    }

    /// Inserts an already validated student.
    pub(crate) async fn insert(&self, student: Student) -> Result<Student> {
        let identity = Filter::And(vec![
            Filter::eq("firstName", student.first_name.as_str()),
            Filter::eq("lastName", student.last_name.as_str()),
            Filter::eq("email", student.email.as_str()),
        ]);
        let message = format!("Student with email {} already exists", student.email);
        if let Some(existing) =
            find_one_as::<Student>(self.store, collections::STUDENTS, &identity).await?
        {
            warn!(email = %student.email, "duplicate student");
            return Err(RosterError::conflict(
                message,
                json!({ "studentId": existing.id }),
            ));
        }
        let doc = self
            .store
            .insert(collections::STUDENTS, to_document(&student)?)
            .await
            .map_err(|e| RosterError::on_duplicate(e, &message))?;
        let stored: Student = from_document(doc)?;
        info!(id = %stored.id, name = %stored.full_name(), "student added");
        Ok(stored)
    }

    /// Students whose labels contain every filter token, ignoring case.
    pub async fn query(&self, query: &StudentQuery) -> Result<Vec<Student>> {
        let filter = Filter::And(vec![
            Filter::contains("course", label(&query.course, &self.defaults.course)),
            Filter::contains("year", label(&query.year, &self.defaults.year())),
            Filter::contains("month", label(&query.month, &self.defaults.month)),
            Filter::contains("batch", label(&query.batch, &self.defaults.batch)),
        ]);
        Ok(find_as(self.store, collections::STUDENTS, &filter).await?)
    }

    pub async fn delete(&self, id: &str) -> Result<Student> {
        let deleted = if is_valid_id(id) {
            self.store.delete_by_id(collections::STUDENTS, id).await?
        } else {
            None
        };
        match deleted {
            Some(doc) => {
                let student: Student = from_document(doc)?;
                info!(id, "student deleted");
                Ok(student)
            }
            None => Err(RosterError::not_found_with(
                "Student not found",
                json!({ "studentId": id }),
            )),
        }
    }

    pub async fn email_exists(&self, email: Option<&str>) -> Result<bool> {
        require_fields(&[("email", email)])?;
        let email = email.unwrap_or_default().trim().to_lowercase();
        Ok(self
            .store
            .find_one(collections::STUDENTS, &Filter::eq("email", email))
            .await?
            .is_some())
    }

    /// Applies `changes` to the first student with `email`. The merged
    /// record goes through the same validation as a new student.
    pub async fn update_by_email(
        &self,
        email: Option<&str>,
        changes: Map<String, Value>,
    ) -> Result<Student> {
        require_fields(&[("email", email)])?;
        let email = email.unwrap_or_default().trim().to_lowercase();
        let Some(mut doc) = self
            .store
            .find_one(collections::STUDENTS, &Filter::eq("email", email.as_str()))
            .await?
        else {
            warn!(email = %email, "update for unknown student");
            return Err(RosterError::not_found_with(
                "Student not found",
                json!({ "email": email }),
            ));
        };

        let id = doc
            .get(ID_FIELD)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        for (key, value) in changes {
            if key == ID_FIELD || key == CREATED_AT_FIELD || key == UPDATED_AT_FIELD {
                continue;
            }
            doc.insert(key, value);
        }
        let input: StudentInput =
            serde_json::from_value(Value::Object(doc)).map_err(StoreError::from)?;
        let merged = build_student(&input, self.defaults)?;

        let mut update = Update::new();
        for (key, value) in student_fields(&merged)? {
            update = update.set(key, value);
        }
        let updated = self
            .store
            .update_one(collections::STUDENTS, &Filter::id(&id), &update)
            .await
            .map_err(|e| {
                RosterError::on_duplicate(e, "Another student already uses these details")
            })?
            .ok_or_else(|| RosterError::not_found("Student not found"))?;
        let student: Student = from_document(updated)?;
        info!(id = %student.id, "student updated");
        Ok(student)
    }
}
