//! Domain error taxonomy.
//!
//! Every operation in [`catalog`](crate::catalog), [`students`](crate::students),
//! [`resolver`](crate::resolver) and [`cohort`](crate::cohort) returns
//! [`RosterError`]. The HTTP layer maps each variant to a status code and a
//! structured body (see [`server`](crate::server)).

use course_roster_core::store::StoreError;
use serde_json::{json, Value};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RosterError>;

#[derive(Debug, Error)]
pub enum RosterError {
    /// Required input missing or malformed; raised before any store access.
    #[error("{message}")]
    Validation { message: String, errors: Vec<String> },

    /// Required fields absent from the request body or query.
    #[error("Missing required fields: {}", fields.join(", "))]
    MissingFields { fields: Vec<String> },

    /// An identifier that is not syntactically valid where one is required.
    #[error("{0}")]
    InvalidId(String),

    /// A token did not resolve at its scope. `details` carries diagnostics
    /// such as the sibling records available in that scope.
    #[error("{message}")]
    NotFound { message: String, details: Value },

    /// An entity that must be unique already exists.
    #[error("{message}")]
    Conflict { message: String, details: Value },

    /// The student already has a membership record in the partition.
    #[error("student {student} is already a member of {partition}")]
    AlreadyMember {
        student: String,
        partition: String,
        existing: Value,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl RosterError {
    pub fn validation(message: impl Into<String>, errors: Vec<String>) -> Self {
        RosterError::Validation {
            message: message.into(),
            errors,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        RosterError::NotFound {
            message: message.into(),
            details: json!({}),
        }
    }

    pub fn not_found_with(message: impl Into<String>, details: Value) -> Self {
        RosterError::NotFound {
            message: message.into(),
            details,
        }
    }

    pub fn conflict(message: impl Into<String>, details: Value) -> Self {
        RosterError::Conflict {
            message: message.into(),
            details,
        }
    }

    /// Converts a store-level uniqueness violation into a conflict with the
    /// given message; other errors pass through.
    pub fn on_duplicate(err: StoreError, message: &str) -> Self {
        match err {
            StoreError::Duplicate { collection, fields } => RosterError::conflict(
                message,
                json!({ "collection": collection, "fields": fields }),
            ),
            other => RosterError::Store(other),
        }
    }
}

/// Fails with [`RosterError::MissingFields`] naming every blank or absent
/// field.
pub fn require_fields(fields: &[(&str, Option<&str>)]) -> Result<()> {
    let missing: Vec<String> = fields
        .iter()
        .filter(|(_, value)| value.map(|v| v.trim().is_empty()).unwrap_or(true))
        .map(|(name, _)| name.to_string())
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(RosterError::MissingFields { fields: missing })
    }
}
