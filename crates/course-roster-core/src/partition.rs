//! Cohort partition naming.
//!
//! Every (course, year, month, batch) cohort stores its membership records
//! in a dedicated collection whose name is a pure function of the four
//! display names. Each name is canonicalized independently (lower-cased,
//! whitespace and every character outside `[a-z0-9]` removed), then the
//! parts are joined with `_` and suffixed with `_stu-details`:
//!
//! ```text
//! ("Web Development", "2025", "January", "Batch 1")
//!     -> "webdevelopment_2025_january_batch1_stu-details"
//! ```
//!
//! Names that differ only in case, spacing, or punctuation share a
//! partition. The naming is part of the persisted contract: changing it
//! orphans existing cohort data.

use crate::store::CollectionSpec;

/// Joins the canonicalized name parts.
pub const PARTITION_SEPARATOR: &str = "_";

/// Appended to every partition name.
pub const PARTITION_SUFFIX: &str = "stu-details";

/// Field holding the student reference in a membership record; unique per
/// partition.
pub const MEMBER_FIELD: &str = "student";

/// Lower-cases and keeps only ASCII letters and digits.
pub fn canonicalize(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        .collect()
}

/// The partition (collection) name for a cohort.
pub fn partition_name(course: &str, year: &str, month: &str, batch: &str) -> String {
    let mut name = [course, year, month, batch]
        .iter()
        .map(|part| canonicalize(part))
        .collect::<Vec<_>>()
        .join(PARTITION_SEPARATOR);
    name.push_str(PARTITION_SEPARATOR);
    name.push_str(PARTITION_SUFFIX);
    name
}

/// Whether a collection name has the shape of a cohort partition.
pub fn is_partition_name(name: &str) -> bool {
    name.ends_with(&format!("{}{}", PARTITION_SEPARATOR, PARTITION_SUFFIX))
}

/// Schema of a partition: one membership record per student.
pub fn partition_spec(name: &str) -> CollectionSpec {
    CollectionSpec::new(name).unique(&[MEMBER_FIELD])
}

/// Stable identifier of one membership, stored alongside the record.
pub fn membership_identifier(
    student_id: &str,
    course_id: &str,
    year: &str,
    month_id: &str,
    batch_id: &str,
) -> String {
    format!(
        "{}-{}-{}-{}-{}",
        student_id, course_id, year, month_id, batch_id
    )
}
