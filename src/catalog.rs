//! Course taxonomy: courses, years, months and batches.
//!
//! Each entity is created under an already existing parent addressed by id,
//! and its id is appended to the parent's child list. Uniqueness is checked
//! up front so callers get a descriptive conflict, and the collection's
//! unique key rejects anything that slips past the check.
//!
//! Deleting a course does not touch its years, months, batches or students.

use course_roster_core::models::{collections, Batch, Course, Month, Student, Year};
use course_roster_core::store::{
    find_as, find_one_as, from_document, insert_as, is_valid_id, Filter, Store, Update,
};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::config::StudentDefaults;
use crate::error::{require_fields, Result, RosterError};
use crate::resolver::ids_filter;
use crate::students::{build_student, StudentInput, Students};

/// First and last year seeded for a course that has none.
pub const DEFAULT_YEAR_RANGE: (u32, u32) = (2020, 2030);

pub fn default_year_description(year: &str) -> String {
    format!("Academic year {}", year)
}

/// A course as returned to clients: every stored field plus `course`, an
/// alias of `name`.
pub fn course_view(course: &Course) -> Value {
    let mut value = serde_json::to_value(course).unwrap_or(Value::Null);
    if let Value::Object(map) = &mut value {
        map.insert("course".into(), json!(course.name));
    }
    value
}

/// Outcome of [`Catalog::list_years`].
#[derive(Debug, Clone, Serialize)]
pub struct YearListing {
    pub years: Vec<Year>,
    /// True when the years were just created as defaults.
    pub seeded: bool,
}

pub struct Catalog<'a> {
    store: &'a dyn Store,
}

impl<'a> Catalog<'a> {
    pub fn new(store: &'a dyn Store) -> Self {
        Self { store }
    }

    async fn by_id<T: serde::de::DeserializeOwned>(
        &self,
        collection: &str,
        id: &str,
        what: &str,
    ) -> Result<T> {
        let found = if is_valid_id(id) {
            find_one_as::<T>(self.store, collection, &Filter::id(id)).await?
        } else {
            None
        };
        found.ok_or_else(|| {
            warn!(id, what, "lookup by id failed");
            RosterError::not_found_with(format!("{} not found", what), json!({ "id": id }))
        })
    }

    // -- courses --

    pub async fn add_course(&self, name: &str, description: &str) -> Result<Course> {
        require_fields(&[("name", Some(name)), ("description", Some(description))])?;
        let name = name.trim();
        if find_one_as::<Course>(self.store, collections::COURSES, &Filter::eq("name", name))
            .await?
            .is_some()
        {
            warn!(name, "course already exists");
            return Err(RosterError::conflict(
                "Course already exists",
                json!({ "name": name }),
            ));
        }
        let course = Course {
            id: String::new(),
            name: name.to_string(),
            description: description.trim().to_string(),
            years: vec![],
            created_at: None,
            updated_at: None,
        };
        let course = insert_as(self.store, collections::COURSES, &course)
            .await
            .map_err(|e| RosterError::on_duplicate(e, "Course already exists"))?;
        info!(id = %course.id, name = %course.name, "course added");
        Ok(course)
    }

    pub async fn list_courses(&self) -> Result<Vec<Course>> {
        Ok(find_as(self.store, collections::COURSES, &Filter::All).await?)
    }

    /// Removes the course only; its descendants are left in place.
    pub async fn delete_course(&self, id: &str) -> Result<Course> {
        if !is_valid_id(id) {
            warn!(id, "invalid course id");
            return Err(RosterError::InvalidId("Invalid course ID format".into()));
        }
        match self.store.delete_by_id(collections::COURSES, id).await? {
            Some(doc) => {
                let course: Course = from_document(doc)?;
                info!(id, name = %course.name, "course deleted");
                Ok(course)
            }
            None => Err(RosterError::not_found("Course not found")),
        }
    }

    // -- years --

    /// Adds a year label to a course. Without a description the year gets
    /// "Academic year N"; a given description, empty included, is kept.
    pub async fn add_year(
        &self,
        course_id: &str,
        year: &str,
        description: Option<&str>,
    ) -> Result<Year> {
        require_fields(&[("courseId", Some(course_id)), ("year", Some(year))])?;
        let course: Course = self.by_id(collections::COURSES, course_id, "Course").await?;
        let year = year.trim();

        let key = Filter::And(vec![
            Filter::eq("course", course.id.as_str()),
            Filter::eq("year", year),
        ]);
        if self.store.find_one(collections::YEARS, &key).await?.is_some() {
            warn!(year, course = %course.name, "year already exists");
            return Err(RosterError::conflict(
                "Year already exists for this course",
                json!({ "year": year, "courseId": course.id }),
            ));
        }

        let description = match description {
            Some(text) => text.trim().to_string(),
            None => default_year_description(year),
        };
        let created = self.insert_year(&course, year, description).await?;
        info!(id = %created.id, year, course = %course.name, "year added");
        Ok(created)
    }

    async fn insert_year(&self, course: &Course, year: &str, description: String) -> Result<Year> {
        let record = Year {
            id: String::new(),
            year: year.to_string(),
            course: course.id.clone(),
            description,
            months: vec![],
            batches: vec![],
            students: vec![],
            created_at: None,
            updated_at: None,
        };
        let created = insert_as(self.store, collections::YEARS, &record)
            .await
            .map_err(|e| RosterError::on_duplicate(e, "Year already exists for this course"))?;
        self.store
            .update_one(
                collections::COURSES,
                &Filter::id(&course.id),
                &Update::new().push("years", created.id.as_str()),
            )
            .await?;
        Ok(created)
    }

    pub async fn years_of_course(&self, course_id: &str) -> Result<Vec<Year>> {
        let course: Course = self.by_id(collections::COURSES, course_id, "Course").await?;
        Ok(find_as(self.store, collections::YEARS, &Filter::eq("course", course.id.as_str())).await?)
    }

    /// Years sorted by label, optionally for one course. A known course
    /// without years gets the default range created first.
    pub async fn list_years(&self, course_id: Option<&str>) -> Result<YearListing> {
        let course_id = course_id.map(str::trim).filter(|c| !c.is_empty());
        let (filter, course) = match course_id {
            Some(id) => {
                let course: Course = self.by_id(collections::COURSES, id, "Course").await?;
                (Filter::eq("course", course.id.as_str()), Some(course))
            }
            None => (Filter::All, None),
        };

        let mut years: Vec<Year> = find_as(self.store, collections::YEARS, &filter).await?;
        let mut seeded = false;
        if let (true, Some(course)) = (years.is_empty(), course.as_ref()) {
            let (first, last) = DEFAULT_YEAR_RANGE;
            for label in first..=last {
                let label = label.to_string();
                let description = default_year_description(&label);
                years.push(self.insert_year(course, &label, description).await?);
            }
            seeded = true;
            info!(course = %course.name, count = years.len(), "created default years");
        }
        years.sort_by(|a, b| a.year.cmp(&b.year));
        Ok(YearListing { years, seeded })
    }

    // -- months --

    /// Adds a month under a year; the course is inherited from the year.
    pub async fn add_month(&self, year_id: &str, name: &str) -> Result<Month> {
        require_fields(&[("yearId", Some(year_id)), ("month", Some(name))])?;
        let year: Year = self.by_id(collections::YEARS, year_id, "Year").await?;
        let name = name.trim();

        let key = Filter::And(vec![
            Filter::eq("name", name),
            Filter::eq("year", year.id.as_str()),
            Filter::eq("course", year.course.as_str()),
        ]);
        if self.store.find_one(collections::MONTHS, &key).await?.is_some() {
            warn!(month = name, year = %year.year, "month already exists");
            return Err(RosterError::conflict(
                "Month already exists for this year",
                json!({ "month": name, "yearId": year.id }),
            ));
        }

        let record = Month {
            id: String::new(),
            name: name.to_string(),
            year: year.id.clone(),
            course: year.course.clone(),
            batches: vec![],
            students: vec![],
            created_at: None,
            updated_at: None,
        };
        let created = insert_as(self.store, collections::MONTHS, &record)
            .await
            .map_err(|e| RosterError::on_duplicate(e, "Month already exists for this year"))?;
        self.store
            .update_one(
                collections::YEARS,
                &Filter::id(&year.id),
                &Update::new().push("months", created.id.as_str()),
            )
            .await?;
        info!(id = %created.id, month = name, year = %year.year, "month added");
        Ok(created)
    }

    pub async fn months_of_year(&self, year_id: &str) -> Result<Vec<Month>> {
        let year: Year = self.by_id(collections::YEARS, year_id, "Year").await?;
        Ok(find_as(self.store, collections::MONTHS, &Filter::eq("year", year.id.as_str())).await?)
    }

    pub async fn list_months(&self) -> Result<Vec<Month>> {
        Ok(find_as(self.store, collections::MONTHS, &Filter::All).await?)
    }

    // -- batches --

    /// Adds a batch under a month. Course and year label come from the
    /// month's year; the batch id is appended to both the month and the year.
    pub async fn add_batch(&self, month_id: &str, name: &str, description: &str) -> Result<Batch> {
        require_fields(&[("monthId", Some(month_id)), ("batch", Some(name))])?;
        let month: Month = self.by_id(collections::MONTHS, month_id, "Month").await?;
        let year: Year = self.by_id(collections::YEARS, &month.year, "Year").await?;
        let name = name.trim();

        let key = Filter::And(vec![
            Filter::eq("name", name),
            Filter::eq("course", month.course.as_str()),
            Filter::eq("year", year.year.as_str()),
            Filter::eq("month", month.id.as_str()),
        ]);
        if self.store.find_one(collections::BATCHES, &key).await?.is_some() {
            warn!(batch = name, month = %month.name, "batch already exists");
            return Err(RosterError::conflict(
                "Batch already exists for this month",
                json!({ "batch": name, "monthId": month.id }),
            ));
        }

        let record = Batch {
            id: String::new(),
            name: name.to_string(),
            course: month.course.clone(),
            year: year.year.clone(),
            month: month.id.clone(),
            students: vec![],
            description: description.trim().to_string(),
            created_at: None,
            updated_at: None,
        };
        let created = insert_as(self.store, collections::BATCHES, &record)
            .await
            .map_err(|e| RosterError::on_duplicate(e, "Batch already exists for this month"))?;
        let link = Update::new().push("batches", created.id.as_str());
        self.store
            .update_one(collections::MONTHS, &Filter::id(&month.id), &link)
            .await?;
        self.store
            .update_one(collections::YEARS, &Filter::id(&year.id), &link)
            .await?;
        info!(id = %created.id, batch = name, month = %month.name, "batch added");
        Ok(created)
    }

    pub async fn batches_of_month(&self, month_id: &str) -> Result<Vec<Batch>> {
        let month: Month = self.by_id(collections::MONTHS, month_id, "Month").await?;
        Ok(find_as(self.store, collections::BATCHES, &Filter::eq("month", month.id.as_str())).await?)
    }

    pub async fn list_batches(&self) -> Result<Vec<Batch>> {
        Ok(find_as(self.store, collections::BATCHES, &Filter::All).await?)
    }

    /// Creates a student labelled with the batch's course, year, month and
    /// batch names and links it to the batch.
    pub async fn add_batch_student(
        &self,
        batch_id: &str,
        input: Option<StudentInput>,
        defaults: &StudentDefaults,
    ) -> Result<Student> {
        let batch: Batch = self.by_id(collections::BATCHES, batch_id, "Batch").await?;
        let Some(mut input) = input else {
            return Err(RosterError::MissingFields {
                fields: vec!["student".into()],
            });
        };
        let course: Course = self.by_id(collections::COURSES, &batch.course, "Course").await?;
        let month: Month = self.by_id(collections::MONTHS, &batch.month, "Month").await?;
        input.course = Some(course.name);
        input.year = Some(batch.year.clone());
        input.month = Some(month.name);
        input.batch = Some(batch.name.clone());

        let student = build_student(&input, defaults)?;
        let students = Students::new(self.store, defaults);
        let created = students.insert(student).await?;
        self.store
            .update_one(
                collections::BATCHES,
                &Filter::id(&batch.id),
                &Update::new().add_to_set("students", created.id.as_str()),
            )
            .await?;
        info!(student = %created.id, batch = %batch.name, "student added to batch");
        Ok(created)
    }

    /// Students referenced by the batch, in the batch's order.
    pub async fn batch_students(&self, batch_id: &str) -> Result<Vec<Student>> {
        let batch: Batch = self.by_id(collections::BATCHES, batch_id, "Batch").await?;
        let mut found: Vec<Student> =
            find_as(self.store, collections::STUDENTS, &ids_filter(&batch.students)).await?;
        found.sort_by_key(|s| batch.students.iter().position(|id| *id == s.id));
        Ok(found)
    }
}
