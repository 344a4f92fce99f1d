//! # Course Roster Core
//!
//! Shared, runtime-agnostic logic for Course Roster: data models, cohort
//! partition naming, and the document store abstraction.
//!
//! This crate contains no tokio, sqlx, or filesystem I/O. Concrete stores
//! that need a database live in the `course-roster` crate; the
//! [`store::memory::InMemoryStore`] here backs unit tests.

pub mod models;
pub mod partition;
pub mod store;
