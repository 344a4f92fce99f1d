//! Reference resolution for the course → year → month → batch hierarchy.
//!
//! Callers identify taxonomy entities with loose tokens: a document id, an
//! exact display name, or (for courses only) a case-insensitive fragment of
//! the name. Each level is resolved with one disjunctive query, scoped by the
//! levels already resolved above it:
//!
//! | Level  | Candidates                                  | Scope                          |
//! |--------|---------------------------------------------|--------------------------------|
//! | course | `_id`, `name ==`, `name` contains (any case) | all courses                    |
//! | year   | `_id`, `year ==`                            | course id                      |
//! | month  | `_id`, `name ==`                            | course id, year id             |
//! | batch  | `_id`, `name ==`                            | course id, year label, month id|
//!
//! The first matching document in insertion order wins, even when a later
//! document would match a more specific branch. Tokens that are not
//! syntactically ids skip the id branch. Nothing is cached: every call
//! queries the store.
//!
//! [`Resolver::resolve_cohort`] chains the four levels and stops at the
//! first miss with a [`RosterError::NotFound`] listing the sibling records
//! available in the already-resolved scope.

use course_roster_core::models::{collections, Batch, Course, Month, Student, Year};
use course_roster_core::partition::partition_name;
use course_roster_core::store::{find_as, find_one_as, is_valid_id, Filter, Store, ID_FIELD};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::error::{RosterError, Result};

/// Loose tokens naming one cohort.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CohortTokens {
    pub course: String,
    pub year: String,
    pub month: String,
    pub batch: String,
}

impl CohortTokens {
    pub fn new(
        course: impl Into<String>,
        year: impl Into<String>,
        month: impl Into<String>,
        batch: impl Into<String>,
    ) -> Self {
        Self {
            course: course.into(),
            year: year.into(),
            month: month.into(),
            batch: batch.into(),
        }
    }
}

/// The four canonical records behind a set of [`CohortTokens`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedCohort {
    pub course: Course,
    pub year: Year,
    pub month: Month,
    pub batch: Batch,
}

impl ResolvedCohort {
    /// Partition holding this cohort's membership records.
    pub fn partition_name(&self) -> String {
        partition_name(
            &self.course.name,
            &self.year.year,
            &self.month.name,
            &self.batch.name,
        )
    }
}

/// `Or` of the supplied branches, preceded by an id match when the token is
/// syntactically an id.
fn token_filter(token: &str, branches: Vec<Filter>) -> Filter {
    let mut any = Vec::with_capacity(branches.len() + 1);
    if is_valid_id(token) {
        any.push(Filter::id(token));
    }
    any.extend(branches);
    Filter::Or(any)
}

pub struct Resolver<'a> {
    store: &'a dyn Store,
}

impl<'a> Resolver<'a> {
    pub fn new(store: &'a dyn Store) -> Self {
        Self { store }
    }

    pub async fn course(&self, token: &str) -> Result<Option<Course>> {
        let filter = token_filter(
            token,
            vec![Filter::eq("name", token), Filter::contains("name", token)],
        );
        let found = find_one_as::<Course>(self.store, collections::COURSES, &filter).await?;
        debug!(token, found = ?found.as_ref().map(|c| &c.name), "resolved course");
        Ok(found)
    }

    pub async fn year(&self, course: &Course, token: &str) -> Result<Option<Year>> {
        let filter = Filter::And(vec![
            Filter::eq("course", course.id.as_str()),
            token_filter(token, vec![Filter::eq("year", token)]),
        ]);
        let found = find_one_as::<Year>(self.store, collections::YEARS, &filter).await?;
        debug!(token, course = %course.id, found = ?found.as_ref().map(|y| &y.year), "resolved year");
        Ok(found)
    }

    pub async fn month(&self, course: &Course, year: &Year, token: &str) -> Result<Option<Month>> {
        let filter = Filter::And(vec![
            Filter::eq("course", course.id.as_str()),
            Filter::eq("year", year.id.as_str()),
            token_filter(token, vec![Filter::eq("name", token)]),
        ]);
        let found = find_one_as::<Month>(self.store, collections::MONTHS, &filter).await?;
        debug!(token, year = %year.id, found = ?found.as_ref().map(|m| &m.name), "resolved month");
        Ok(found)
    }

    pub async fn batch(
        &self,
        course: &Course,
        year: &Year,
        month: &Month,
        token: &str,
    ) -> Result<Option<Batch>> {
        let filter = Filter::And(vec![
            Filter::eq("course", course.id.as_str()),
            Filter::eq("year", year.year.as_str()),
            Filter::eq("month", month.id.as_str()),
            token_filter(token, vec![Filter::eq("name", token)]),
        ]);
        let found = find_one_as::<Batch>(self.store, collections::BATCHES, &filter).await?;
        debug!(token, month = %month.id, found = ?found.as_ref().map(|b| &b.name), "resolved batch");
        Ok(found)
    }

    /// Looks a student up by id. Malformed ids resolve to `None`.
    pub async fn student(&self, id: &str) -> Result<Option<Student>> {
        if !is_valid_id(id) {
            return Ok(None);
        }
        Ok(find_one_as::<Student>(self.store, collections::STUDENTS, &Filter::id(id)).await?)
    }

    /// Resolves a course or fails with the list of available courses.
    pub async fn require_course(&self, token: &str) -> Result<Course> {
        if let Some(course) = self.course(token).await? {
            return Ok(course);
        }
        let courses: Vec<Course> = find_as(self.store, collections::COURSES, &Filter::All).await?;
        warn!(token, "course not found");
        Err(RosterError::not_found_with(
            "Course not found",
            json!({
                "searchedValue": token,
                "availableCourses": courses
                    .iter()
                    .map(|c| json!({ "id": c.id, "name": c.name, "course": c.name }))
                    .collect::<Vec<_>>(),
            }),
        ))
    }

    pub async fn require_year(&self, course: &Course, token: &str) -> Result<Year> {
        if let Some(year) = self.year(course, token).await? {
            return Ok(year);
        }
        let siblings = self.years_of(course).await?;
        warn!(token, course = %course.name, "year not found");
        Err(RosterError::not_found_with(
            "Year not found",
            json!({
                "searchedValue": token,
                "courseId": course.id,
                "availableYears": siblings
                    .iter()
                    .map(|y| json!({ "id": y.id, "year": y.year }))
                    .collect::<Vec<_>>(),
            }),
        ))
    }

    pub async fn require_month(&self, course: &Course, year: &Year, token: &str) -> Result<Month> {
        if let Some(month) = self.month(course, year, token).await? {
            return Ok(month);
        }
        let filter = Filter::And(vec![
            Filter::eq("course", course.id.as_str()),
            Filter::eq("year", year.id.as_str()),
        ]);
        let siblings: Vec<Month> = find_as(self.store, collections::MONTHS, &filter).await?;
        warn!(token, course = %course.name, year = %year.year, "month not found");
        Err(RosterError::not_found_with(
            "Month not found",
            json!({
                "searchedValue": token,
                "courseId": course.id,
                "yearId": year.id,
                "availableMonths": named(siblings.iter().map(|m| (&m.id, &m.name))),
            }),
        ))
    }

    pub async fn require_batch(
        &self,
        course: &Course,
        year: &Year,
        month: &Month,
        token: &str,
    ) -> Result<Batch> {
        if let Some(batch) = self.batch(course, year, month, token).await? {
            return Ok(batch);
        }
        let filter = Filter::And(vec![
            Filter::eq("course", course.id.as_str()),
            Filter::eq("year", year.year.as_str()),
            Filter::eq("month", month.id.as_str()),
        ]);
        let siblings: Vec<Batch> = find_as(self.store, collections::BATCHES, &filter).await?;
        warn!(token, month = %month.name, "batch not found");
        Err(RosterError::not_found_with(
            "Batch not found",
            json!({
                "searchedValue": token,
                "courseId": course.id,
                "yearId": year.id,
                "monthId": month.id,
                "availableBatches": named(siblings.iter().map(|b| (&b.id, &b.name))),
            }),
        ))
    }

    pub async fn require_student(&self, id: &str) -> Result<Student> {
        match self.student(id).await? {
            Some(student) => Ok(student),
            None => {
                warn!(student = id, "student not found");
                Err(RosterError::not_found_with(
                    "Student not found",
                    json!({ "searchedValue": id }),
                ))
            }
        }
    }

    /// Resolves all four levels, top-down.
    pub async fn resolve_cohort(&self, tokens: &CohortTokens) -> Result<ResolvedCohort> {
        let course = self.require_course(&tokens.course).await?;
        let year = self.require_year(&course, &tokens.year).await?;
        let month = self.require_month(&course, &year, &tokens.month).await?;
        let batch = self.require_batch(&course, &year, &month, &tokens.batch).await?;
        Ok(ResolvedCohort {
            course,
            year,
            month,
            batch,
        })
    }

    async fn years_of(&self, course: &Course) -> Result<Vec<Year>> {
        Ok(find_as(self.store, collections::YEARS, &Filter::eq("course", course.id.as_str())).await?)
    }
}

fn named<'s>(items: impl Iterator<Item = (&'s String, &'s String)>) -> Vec<Value> {
    items
        .map(|(id, name)| json!({ "id": id, "name": name }))
        .collect()
}

/// Id filter over a set of ids, for joins.
pub(crate) fn ids_filter(ids: &[String]) -> Filter {
    Filter::is_in(ID_FIELD, ids.iter().cloned())
}
