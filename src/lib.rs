//! # Course Roster
//!
//! A REST backend for administering courses, their academic years, months
//! and batches, and the students enrolled in them.
//!
//! Taxonomy entities are addressed loosely (by id, exact name, or for
//! courses a case-insensitive fragment) and resolved top-down by the
//! [`resolver`]. Each resolved (course, year, month, batch) cohort gets its
//! own membership partition, named deterministically from the four display
//! names and provisioned on first use by [`cohort`].
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌──────────────┐   ┌──────────┐
//! │  HTTP    │──▶│  Resolver    │──▶│ Cohort       │──▶│  Store   │
//! │  (axum)  │   │ course→batch │   │ partitions   │   │ (SQLite) │
//! └──────────┘   └──────────────┘   └──────────────┘   └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Base collection setup |
//! | [`sqlite_store`] | SQLite implementation of the document store |
//! | [`error`] | Domain error type |
//! | [`resolver`] | Loose reference resolution |
//! | [`cohort`] | Partition provisioning, membership, summaries |
//! | [`catalog`] | Courses, years, months, batches |
//! | [`students`] | Student validation and CRUD |
//! | [`seed`] | Default reference data |
//! | [`stats`] | Collection counts |
//! | [`server`] | REST API |
//!
//! Models, partition naming and the store trait live in
//! [`course_roster_core`].

pub mod catalog;
pub mod cohort;
pub mod config;
pub mod db;
pub mod error;
pub mod migrate;
pub mod resolver;
pub mod seed;
pub mod server;
pub mod sqlite_store;
pub mod stats;
pub mod students;
