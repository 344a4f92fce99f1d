//! Core data models used throughout Course Roster.
//!
//! Every entity is a stored document: `_id` plus `createdAt` / `updatedAt`
//! maintained by the store. Field names are camelCase on the wire and in
//! storage. References between entities are document ids held as strings.
//!
//! Two representations of a student's cohort coexist: the reference graph
//! (Batch → Month → Year → Course, plus cohort partitions) and the free-text
//! `course` / `year` / `month` / `batch` labels on [`Student`]. Nothing keeps
//! them in sync.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::store::CollectionSpec;

/// Names of the fixed collections.
pub mod collections {
    pub const COURSES: &str = "Course_details";
    pub const YEARS: &str = "Years";
    pub const MONTHS: &str = "Months";
    pub const BATCHES: &str = "Batches";
    pub const STUDENTS: &str = "Students";
    pub const COHORT_SUMMARIES: &str = "CourseYearMonthBatches";
}

/// Fixed collections with their uniqueness constraints.
pub fn base_collection_specs() -> Vec<CollectionSpec> {
    vec![
        CollectionSpec::new(collections::COURSES).unique(&["name"]),
        CollectionSpec::new(collections::YEARS).unique(&["year", "course"]),
        CollectionSpec::new(collections::MONTHS).unique(&["name", "year", "course"]),
        CollectionSpec::new(collections::BATCHES).unique(&["name", "course", "year", "month"]),
        CollectionSpec::new(collections::STUDENTS).unique(&["firstName", "lastName", "email"]),
        CollectionSpec::new(collections::COHORT_SUMMARIES)
            .unique(&["course", "year", "month", "batch"]),
    ]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Course {
    #[serde(rename = "_id", default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Year ids in creation order.
    #[serde(default)]
    pub years: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// An academic year of a course. The label is free text, not necessarily
/// numeric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Year {
    #[serde(rename = "_id", default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub year: String,
    /// Owning course id.
    pub course: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub months: Vec<String>,
    #[serde(default)]
    pub batches: Vec<String>,
    #[serde(default)]
    pub students: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Month {
    #[serde(rename = "_id", default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub name: String,
    /// Owning year id.
    pub year: String,
    /// Owning course id.
    pub course: String,
    #[serde(default)]
    pub batches: Vec<String>,
    #[serde(default)]
    pub students: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Batch {
    #[serde(rename = "_id", default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub name: String,
    /// Owning course id.
    pub course: String,
    /// Year label (not a year id).
    pub year: String,
    /// Owning month id.
    pub month: String,
    #[serde(default)]
    pub students: Vec<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    #[serde(rename = "_id", default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(default)]
    pub college: String,
    #[serde(default)]
    pub department: String,
    #[serde(default)]
    pub contact_number: String,
    #[serde(default)]
    pub fees: f64,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub batch: String,
    #[serde(default)]
    pub course: String,
    #[serde(default)]
    pub month: String,
    #[serde(default)]
    pub year: String,
    #[serde(default)]
    pub additional_details: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Student {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// One student's membership in a cohort partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MembershipRecord {
    #[serde(rename = "_id", default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub student: String,
    pub course: String,
    /// Year label.
    pub year: String,
    pub month: String,
    pub batch: String,
    #[serde(default)]
    pub additional_details: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Aggregate over one (course, year, month, batch) cohort.
///
/// `total_students` always equals `students.len()` after a write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CohortSummary {
    #[serde(rename = "_id", default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub course: String,
    /// Year label.
    pub year: String,
    pub month: String,
    pub batch: String,
    #[serde(default)]
    pub students: Vec<String>,
    #[serde(default)]
    pub total_students: usize,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{from_document, to_document};
    use serde_json::json;

    #[test]
    fn test_new_course_serializes_without_id() {
        let course = Course {
            id: String::new(),
            name: "data science".into(),
            description: "ML".into(),
            years: vec![],
            created_at: None,
            updated_at: None,
        };
        let doc = to_document(&course).unwrap();
        assert!(!doc.contains_key("_id"));
        assert_eq!(doc["name"], "data science");
    }

    #[test]
    fn test_student_reads_camel_case_with_defaults() {
        let doc = match json!({
            "_id": "s1",
            "firstName": "Ada",
            "lastName": "Lovelace",
            "email": "ada@example.com",
            "createdAt": "2025-01-02T03:04:05.000Z"
        }) {
            Value::Object(m) => m,
            _ => unreachable!(),
        };
        let student: Student = from_document(doc).unwrap();
        assert_eq!(student.id, "s1");
        assert_eq!(student.full_name(), "Ada Lovelace");
        assert_eq!(student.fees, 0.0);
        assert!(student.created_at.is_some());
    }

    #[test]
    fn test_base_collections_declare_uniqueness() {
        let specs = base_collection_specs();
        assert_eq!(specs.len(), 6);
        let batches = specs
            .iter()
            .find(|s| s.name == collections::BATCHES)
            .unwrap();
        assert_eq!(batches.unique[0], vec!["name", "course", "year", "month"]);
    }
}
