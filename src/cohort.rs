//! Cohort partition management.
//!
//! A cohort is one (course, year, month, batch) combination. Each cohort
//! owns a partition collection of [`MembershipRecord`]s, named by
//! [`partition_name`](course_roster_core::partition::partition_name), plus a
//! [`CohortSummary`] document in `CourseYearMonthBatches` keyed by the
//! (course id, year label, month id, batch id) tuple.
//!
//! # Recording a membership
//!
//! [`CohortManager::record_membership`] runs these steps and stops at the
//! first failure:
//!
//! 1. Every token and the student id must be present.
//! 2. Course, year, month and batch resolve top-down; the student resolves
//!    by id. Nothing is written before all five resolve.
//! 3. The partition is provisioned (idempotent by name).
//! 4. A pre-insert lookup rejects a second membership for the same student
//!    with [`RosterError::AlreadyMember`].
//! 5. The membership record is inserted.
//! 6. The summary is created with the student as its only member, or the
//!    student is appended when absent. `totalStudents` is rewritten from the
//!    member list in the same update.
//!
//! Two concurrent requests for the same student can both pass step 4. The
//! partition's unique `student` key then rejects the second insert with a
//! store-level conflict instead of `AlreadyMember`.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use course_roster_core::models::{collections, CohortSummary, Course, MembershipRecord, Month, Student};
use course_roster_core::partition::{membership_identifier, partition_spec, MEMBER_FIELD};
use course_roster_core::store::{
    document_id, find_as, from_document, insert_as, is_valid_id, Document, Filter,
    Store, StoreError, Update,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::error::{require_fields, RosterError, Result};
use crate::resolver::{ids_filter, CohortTokens, ResolvedCohort, Resolver};

/// Process-wide record of partitions whose schema has been provisioned.
///
/// Entries are added on first use and never evicted. A miss only costs one
/// idempotent `ensure_collection` call, so a fresh process simply
/// re-provisions on demand.
#[derive(Debug, Default)]
pub struct PartitionRegistry {
    provisioned: RwLock<HashSet<String>>,
}

impl PartitionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.provisioned
            .read()
            .map(|set| set.contains(name))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.provisioned.read().map(|set| set.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Makes sure the partition exists with its one-record-per-student key.
    pub async fn ensure(&self, store: &dyn Store, name: &str) -> Result<()> {
        if self.contains(name) {
            return Ok(());
        }
        store.ensure_collection(&partition_spec(name)).await?;
        self.provisioned
            .write()
            .map_err(|_| anyhow::anyhow!("partition registry lock poisoned"))?
            .insert(name.to_string());
        info!(partition = name, "provisioned cohort partition");
        Ok(())
    }
}

/// Input of [`CohortManager::record_membership`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MembershipRequest {
    #[serde(default)]
    pub course: Option<String>,
    #[serde(default, deserialize_with = "crate::students::loose_string")]
    pub year: Option<String>,
    #[serde(default)]
    pub month: Option<String>,
    #[serde(default)]
    pub batch: Option<String>,
    #[serde(default)]
    pub student_id: Option<String>,
    /// Caller-supplied details stored on the membership record.
    #[serde(default)]
    pub additional_details: Map<String, Value>,
}

/// Result of a successful membership write.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MembershipOutcome {
    /// Summary document id.
    #[serde(rename = "_id")]
    pub summary_id: String,
    pub course: String,
    pub year: String,
    pub month: String,
    pub batch: String,
    pub collection_name: String,
    pub student_name: String,
    pub total_students: usize,
    pub membership: MembershipRecord,
}

/// Optional tokens for [`CohortManager::query_summaries`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SummaryQuery {
    #[serde(default)]
    pub course: Option<String>,
    #[serde(default)]
    pub year: Option<String>,
    #[serde(default)]
    pub month: Option<String>,
    #[serde(default)]
    pub batch: Option<String>,
}

/// A summary with names in place of references and students populated.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryView {
    #[serde(rename = "_id")]
    pub id: String,
    pub course: String,
    pub year: String,
    pub month: String,
    pub batch: String,
    pub total_students: usize,
    pub students: Vec<Value>,
}

/// Members of one partition.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionMembers {
    pub collection_name: String,
    pub course: String,
    pub year: String,
    pub month: String,
    pub batch: String,
    pub students: Vec<Value>,
}

pub struct CohortManager<'a> {
    store: &'a dyn Store,
    partitions: &'a PartitionRegistry,
}

impl<'a> CohortManager<'a> {
    pub fn new(store: &'a dyn Store, partitions: &'a PartitionRegistry) -> Self {
        Self { store, partitions }
    }

    fn resolver(&self) -> Resolver<'a> {
        Resolver::new(self.store)
    }

    pub async fn record_membership(&self, request: &MembershipRequest) -> Result<MembershipOutcome> {
        let (tokens, student_id) = validate_membership(request)?;

        let resolver = self.resolver();
        let cohort = resolver.resolve_cohort(&tokens).await?;
        let student = resolver.require_student(&student_id).await?;

        let partition = cohort.partition_name();
        self.partitions.ensure(self.store, &partition).await?;

        let existing = self
            .store
            .find_one(&partition, &Filter::eq(MEMBER_FIELD, student.id.as_str()))
            .await?;
        if let Some(existing) = existing {
            warn!(student = %student.id, partition = %partition, "student already a member");
            return Err(RosterError::AlreadyMember {
                student: student.id,
                partition,
                existing: Value::Object(existing),
            });
        }

        let mut details = request.additional_details.clone();
        details.insert(
            "uniqueIdentifier".to_string(),
            Value::String(membership_identifier(
                &student.id,
                &cohort.course.id,
                &cohort.year.year,
                &cohort.month.id,
                &cohort.batch.id,
            )),
        );
        let record = MembershipRecord {
            id: String::new(),
            student: student.id.clone(),
            course: cohort.course.id.clone(),
            year: cohort.year.year.clone(),
            month: cohort.month.id.clone(),
            batch: cohort.batch.id.clone(),
            additional_details: details,
            created_at: None,
            updated_at: None,
        };
        let membership = insert_as(self.store, &partition, &record).await?;

        let summary = self.add_to_summary(&cohort, &student).await?;

        info!(
            student = %student.full_name(),
            partition = %partition,
            total = summary.total_students,
            "recorded cohort membership"
        );

        Ok(MembershipOutcome {
            summary_id: summary.id,
            course: cohort.course.name,
            year: cohort.year.year,
            month: cohort.month.name,
            batch: cohort.batch.name,
            collection_name: partition,
            student_name: student.full_name(),
            total_students: summary.total_students,
            membership,
        })
    }

    /// Creates the cohort summary or appends the student to it.
    async fn add_to_summary(&self, cohort: &ResolvedCohort, student: &Student) -> Result<CohortSummary> {
        let key = summary_key(cohort);
        if let Some(summary) = self.append_member(&key, &student.id).await? {
            return Ok(summary);
        }

        let mut metadata = Map::new();
        metadata.insert("courseName".into(), json!(cohort.course.name));
        metadata.insert("monthName".into(), json!(cohort.month.name));
        metadata.insert("batchName".into(), json!(cohort.batch.name));
        let summary = CohortSummary {
            id: String::new(),
            course: cohort.course.id.clone(),
            year: cohort.year.year.clone(),
            month: cohort.month.id.clone(),
            batch: cohort.batch.id.clone(),
            students: vec![student.id.clone()],
            total_students: 1,
            metadata,
            created_at: None,
            updated_at: None,
        };
        match insert_as(self.store, collections::COHORT_SUMMARIES, &summary).await {
            Ok(created) => Ok(created),
            // Another request created the summary first.
            Err(StoreError::Duplicate { .. }) => self
                .append_member(&key, &student.id)
                .await?
                .ok_or_else(|| anyhow::anyhow!("cohort summary vanished during update").into()),
            Err(err) => Err(err.into()),
        }
    }

    /// Adds the student to the summary matching `key` and recounts it in
    /// the same store update.
    async fn append_member(&self, key: &Filter, student_id: &str) -> Result<Option<CohortSummary>> {
        let update = Update::new()
            .add_to_set("students", student_id)
            .set_len("totalStudents", "students");
        let updated = self
            .store
            .update_one(collections::COHORT_SUMMARIES, key, &update)
            .await?;
        match updated {
            Some(doc) => Ok(Some(from_document(doc)?)),
            None => Ok(None),
        }
    }

    /// Summaries matching any subset of the four tokens.
    ///
    /// Each given token narrows the candidates at its level (scoped by the
    /// levels above it when those were given too). A token with no candidate
    /// is a not-found error; a query with candidates but no summary yields an
    /// empty list.
    pub async fn query_summaries(&self, query: &SummaryQuery) -> Result<Vec<SummaryView>> {
        let resolver = self.resolver();
        let mut filters = Vec::new();

        let course = match given(&query.course) {
            Some(token) => {
                let course = resolver.require_course(token).await?;
                filters.push(Filter::eq("course", course.id.as_str()));
                Some(course)
            }
            None => None,
        };

        let mut year_ids: Option<Vec<String>> = None;
        let mut year_labels: Option<Vec<String>> = None;
        if let Some(token) = given(&query.year) {
            let mut scope = scoped(&[("course", course.as_ref().map(|c| vec![c.id.clone()]))]);
            scope.push(token_or(token, "year"));
            let years = self.store.find(collections::YEARS, &Filter::And(scope)).await?;
            if years.is_empty() {
                return Err(level_not_found("Year", token));
            }
            let labels = unique_strings(&years, "year");
            filters.push(Filter::is_in("year", labels.clone()));
            year_ids = Some(years.iter().map(|y| document_id(y).to_string()).collect());
            year_labels = Some(labels);
        }

        let mut month_ids: Option<Vec<String>> = None;
        if let Some(token) = given(&query.month) {
            let mut scope = scoped(&[
                ("course", course.as_ref().map(|c| vec![c.id.clone()])),
                ("year", year_ids.clone()),
            ]);
            scope.push(token_or(token, "name"));
            let months = self.store.find(collections::MONTHS, &Filter::And(scope)).await?;
            if months.is_empty() {
                return Err(level_not_found("Month", token));
            }
            let ids: Vec<String> = months.iter().map(|m| document_id(m).to_string()).collect();
            filters.push(Filter::is_in("month", ids.clone()));
            month_ids = Some(ids);
        }

        if let Some(token) = given(&query.batch) {
            let mut scope = scoped(&[
                ("course", course.as_ref().map(|c| vec![c.id.clone()])),
                ("year", year_labels.clone()),
                ("month", month_ids.clone()),
            ]);
            scope.push(token_or(token, "name"));
            let batches = self.store.find(collections::BATCHES, &Filter::And(scope)).await?;
            if batches.is_empty() {
                return Err(level_not_found("Batch", token));
            }
            let ids: Vec<String> = batches.iter().map(|b| document_id(b).to_string()).collect();
            filters.push(Filter::is_in("batch", ids));
        }

        let summaries: Vec<CohortSummary> =
            find_as(self.store, collections::COHORT_SUMMARIES, &Filter::And(filters)).await?;
        debug!(count = summaries.len(), "cohort summaries matched");
        self.populate(summaries).await
    }

    async fn populate(&self, summaries: Vec<CohortSummary>) -> Result<Vec<SummaryView>> {
        if summaries.is_empty() {
            return Ok(Vec::new());
        }
        let course_names = self
            .names(collections::COURSES, summaries.iter().map(|s| &s.course), "name")
            .await?;
        let month_names = self
            .names(collections::MONTHS, summaries.iter().map(|s| &s.month), "name")
            .await?;
        let batch_names = self
            .names(collections::BATCHES, summaries.iter().map(|s| &s.batch), "name")
            .await?;
        let student_ids: Vec<String> = summaries
            .iter()
            .flat_map(|s| s.students.iter().cloned())
            .collect();
        let students: HashMap<String, Student> =
            find_as::<Student>(self.store, collections::STUDENTS, &ids_filter(&student_ids))
                .await?
                .into_iter()
                .map(|s| (s.id.clone(), s))
                .collect();

        Ok(summaries
            .into_iter()
            .map(|summary| SummaryView {
                course: lookup(&course_names, &summary.course),
                month: lookup(&month_names, &summary.month),
                batch: lookup(&batch_names, &summary.batch),
                students: summary
                    .students
                    .iter()
                    .filter_map(|id| students.get(id))
                    .map(|s| {
                        json!({
                            "_id": s.id,
                            "firstName": s.first_name,
                            "lastName": s.last_name,
                            "email": s.email,
                        })
                    })
                    .collect(),
                id: summary.id,
                year: summary.year,
                total_students: summary.total_students,
            })
            .collect())
    }

    async fn names<'s>(
        &self,
        collection: &str,
        ids: impl Iterator<Item = &'s String>,
        field: &str,
    ) -> Result<HashMap<String, String>> {
        let ids: Vec<String> = ids.cloned().collect();
        let docs = self.store.find(collection, &ids_filter(&ids)).await?;
        Ok(docs
            .iter()
            .map(|d| {
                let name = d.get(field).and_then(Value::as_str).unwrap_or_default();
                (document_id(d).to_string(), name.to_string())
            })
            .collect())
    }

    /// Every membership of the cohort joined with the full student document.
    /// Memberships whose student no longer exists are skipped.
    pub async fn list_members(&self, tokens: &SummaryQuery) -> Result<PartitionMembers> {
        let tokens = require_tokens(tokens)?;
        let cohort = self.resolver().resolve_cohort(&tokens).await?;
        let partition = cohort.partition_name();

        let memberships: Vec<MembershipRecord> = find_as(self.store, &partition, &Filter::All).await?;
        let ids: Vec<String> = memberships.iter().map(|m| m.student.clone()).collect();
        let mut students: HashMap<String, Document> = self
            .store
            .find(collections::STUDENTS, &ids_filter(&ids))
            .await?
            .into_iter()
            .map(|d| (document_id(&d).to_string(), d))
            .collect();

        let mut rows = Vec::with_capacity(memberships.len());
        for membership in memberships {
            let Some(mut student) = students.remove(&membership.student) else {
                warn!(student = %membership.student, partition = %partition, "membership references a missing student");
                continue;
            };
            student.insert("dynamicCollectionId".into(), json!(membership.id));
            student.insert("course".into(), json!(cohort.course.name));
            student.insert("year".into(), json!(membership.year));
            student.insert("month".into(), json!(cohort.month.name));
            student.insert("batch".into(), json!(cohort.batch.name));
            rows.push(Value::Object(student));
        }
        debug!(partition = %partition, count = rows.len(), "listed partition members");

        Ok(PartitionMembers {
            collection_name: partition,
            course: cohort.course.name,
            year: cohort.year.year,
            month: cohort.month.name,
            batch: cohort.batch.name,
            students: rows,
        })
    }

    /// Like [`list_members`](Self::list_members) with a compact projection
    /// per student.
    pub async fn list_members_compact(&self, tokens: &SummaryQuery) -> Result<PartitionMembers> {
        let mut members = self.list_members(tokens).await?;
        members.students = members
            .students
            .iter()
            .map(|s| {
                let field = |name: &str| s.get(name).and_then(Value::as_str).unwrap_or_default();
                json!({
                    "studentId": s.get("_id").cloned().unwrap_or(Value::Null),
                    "name": format!("{} {}", field("firstName"), field("lastName")),
                    "email": field("email"),
                    "course": field("course"),
                    "batch": field("batch"),
                    "year": field("year"),
                    "month": field("month"),
                })
            })
            .collect();
        Ok(members)
    }

    /// Runs the full resolution chain and reports every resolved level.
    pub async fn debug_references(&self, tokens: &SummaryQuery) -> Result<Value> {
        let tokens = require_tokens(tokens)?;
        let cohort = self.resolver().resolve_cohort(&tokens).await?;
        Ok(json!({
            "course": course_ref(&cohort.course),
            "year": { "id": cohort.year.id, "year": cohort.year.year },
            "month": month_ref(&cohort.month),
            "batch": { "id": cohort.batch.id, "name": cohort.batch.name },
            "collectionName": cohort.partition_name(),
        }))
    }
}

fn course_ref(course: &Course) -> Value {
    json!({ "id": course.id, "name": course.name, "course": course.name })
}

fn month_ref(month: &Month) -> Value {
    json!({ "id": month.id, "name": month.name })
}

fn summary_key(cohort: &ResolvedCohort) -> Filter {
    Filter::And(vec![
        Filter::eq("course", cohort.course.id.as_str()),
        Filter::eq("year", cohort.year.year.as_str()),
        Filter::eq("month", cohort.month.id.as_str()),
        Filter::eq("batch", cohort.batch.id.as_str()),
    ])
}

fn validate_membership(request: &MembershipRequest) -> Result<(CohortTokens, String)> {
    let fields = [
        ("Course", &request.course),
        ("Year", &request.year),
        ("Month", &request.month),
        ("Batch", &request.batch),
        ("Student ID", &request.student_id),
    ];
    let errors: Vec<String> = fields
        .iter()
        .filter(|(_, value)| given(value).is_none())
        .map(|(label, _)| format!("{} is required", label))
        .collect();
    if !errors.is_empty() {
        warn!(?errors, "membership request rejected");
        return Err(RosterError::validation("Validation failed", errors));
    }
    Ok((
        CohortTokens::new(
            text(&request.course),
            text(&request.year),
            text(&request.month),
            text(&request.batch),
        ),
        text(&request.student_id),
    ))
}

fn require_tokens(query: &SummaryQuery) -> Result<CohortTokens> {
    require_fields(&[
        ("course", query.course.as_deref()),
        ("year", query.year.as_deref()),
        ("month", query.month.as_deref()),
        ("batch", query.batch.as_deref()),
    ])?;
    Ok(CohortTokens::new(
        text(&query.course),
        text(&query.year),
        text(&query.month),
        text(&query.batch),
    ))
}

fn given(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn text(value: &Option<String>) -> String {
    given(value).unwrap_or_default().to_string()
}

/// `Eq`/`In` constraints for the scope levels that are known.
fn scoped(levels: &[(&str, Option<Vec<String>>)]) -> Vec<Filter> {
    levels
        .iter()
        .filter_map(|(field, values)| {
            values
                .as_ref()
                .map(|values| Filter::is_in(*field, values.iter().cloned()))
        })
        .collect()
}

fn token_or(token: &str, field: &str) -> Filter {
    let mut any = vec![Filter::eq(field, token)];
    if is_valid_id(token) {
        any.insert(0, Filter::id(token));
    }
    Filter::Or(any)
}

fn unique_strings(docs: &[Document], field: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for value in docs.iter().filter_map(|d| d.get(field).and_then(Value::as_str)) {
        if !out.iter().any(|v| v == value) {
            out.push(value.to_string());
        }
    }
    out
}

fn level_not_found(level: &str, token: &str) -> RosterError {
    warn!(level, token, "summary query token did not resolve");
    RosterError::not_found_with(
        format!("{} not found", level),
        json!({ "searchedValue": token }),
    )
}

fn lookup(names: &HashMap<String, String>, id: &str) -> String {
    names.get(id).cloned().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use crate::students::{StudentInput, Students};
    use crate::config::StudentDefaults;
    use course_roster_core::store::memory::InMemoryStore;

    struct Fixture {
        store: InMemoryStore,
        partitions: PartitionRegistry,
        student_id: String,
    }

    async fn fixture() -> Fixture {
        let store = InMemoryStore::new();
        let catalog = Catalog::new(&store);
        let course = catalog.add_course("data science", "ML").await.unwrap();
        let year = catalog.add_year(&course.id, "2025", None).await.unwrap();
        let month = catalog.add_month(&year.id, "January").await.unwrap();
        catalog.add_batch(&month.id, "Batch 1", "").await.unwrap();
        let student = Students::new(&store, &StudentDefaults::default())
            .add(StudentInput {
                first_name: Some("Ada".into()),
                last_name: Some("Lovelace".into()),
                email: Some("ada@example.com".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        Fixture {
            store,
            partitions: PartitionRegistry::new(),
            student_id: student.id,
        }
    }

    fn request(student_id: &str, batch: &str) -> MembershipRequest {
        MembershipRequest {
            course: Some("data science".into()),
            year: Some("2025".into()),
            month: Some("January".into()),
            batch: Some(batch.into()),
            student_id: Some(student_id.into()),
            additional_details: Map::new(),
        }
    }

    const PARTITION: &str = "datascience_2025_january_batch1_stu-details";

    #[tokio::test]
    async fn test_record_membership_creates_partition_and_summary() {
        let fx = fixture().await;
        let manager = CohortManager::new(&fx.store, &fx.partitions);
        let outcome = manager
            .record_membership(&request(&fx.student_id, "Batch 1"))
            .await
            .unwrap();

        assert_eq!(outcome.collection_name, PARTITION);
        assert_eq!(outcome.total_students, 1);
        assert_eq!(outcome.student_name, "Ada Lovelace");
        assert!(fx.partitions.contains(PARTITION));
        assert_eq!(fx.store.count(PARTITION, &Filter::All).await.unwrap(), 1);
        let unique = outcome.membership.additional_details["uniqueIdentifier"]
            .as_str()
            .unwrap();
        assert!(unique.starts_with(&fx.student_id));
    }

    #[tokio::test]
    async fn test_second_membership_is_already_member() {
        let fx = fixture().await;
        let manager = CohortManager::new(&fx.store, &fx.partitions);
        let req = request(&fx.student_id, "Batch 1");
        manager.record_membership(&req).await.unwrap();
        let err = manager.record_membership(&req).await.unwrap_err();
        assert!(matches!(err, RosterError::AlreadyMember { .. }));

        assert_eq!(fx.store.count(PARTITION, &Filter::All).await.unwrap(), 1);
        let summaries: Vec<CohortSummary> =
            find_as(&fx.store, collections::COHORT_SUMMARIES, &Filter::All)
                .await
                .unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].total_students, 1);
    }

    #[tokio::test]
    async fn test_unresolved_batch_writes_nothing() {
        let fx = fixture().await;
        let manager = CohortManager::new(&fx.store, &fx.partitions);
        let err = manager
            .record_membership(&request(&fx.student_id, "Batch 9"))
            .await
            .unwrap_err();
        match err {
            RosterError::NotFound { details, .. } => {
                assert_eq!(details["availableBatches"][0]["name"], "Batch 1");
            }
            other => panic!("expected not found, got {other:?}"),
        }
        assert!(fx.partitions.is_empty());
        assert!(!fx.store.collection_exists(PARTITION).await.unwrap());
        assert_eq!(
            fx.store
                .count(collections::COHORT_SUMMARIES, &Filter::All)
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_missing_student_writes_nothing() {
        let fx = fixture().await;
        let manager = CohortManager::new(&fx.store, &fx.partitions);
        let ghost = course_roster_core::store::new_id();
        let err = manager
            .record_membership(&request(&ghost, "Batch 1"))
            .await
            .unwrap_err();
        assert!(matches!(err, RosterError::NotFound { .. }));
        assert!(!fx.store.collection_exists(PARTITION).await.unwrap());
    }

    #[tokio::test]
    async fn test_validation_lists_every_missing_field() {
        let fx = fixture().await;
        let manager = CohortManager::new(&fx.store, &fx.partitions);
        let err = manager
            .record_membership(&MembershipRequest {
                course: Some("data science".into()),
                month: Some(" ".into()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        match err {
            RosterError::Validation { errors, .. } => {
                assert_eq!(
                    errors,
                    vec![
                        "Year is required",
                        "Month is required",
                        "Batch is required",
                        "Student ID is required"
                    ]
                );
            }
            other => panic!("expected validation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_count_tracks_member_set() {
        let fx = fixture().await;
        let defaults = StudentDefaults::default();
        let students = Students::new(&fx.store, &defaults);
        let manager = CohortManager::new(&fx.store, &fx.partitions);
        manager
            .record_membership(&request(&fx.student_id, "Batch 1"))
            .await
            .unwrap();
        for (first, email) in [("Grace", "grace@example.com"), ("Alan", "alan@example.com")] {
            let s = students
                .add(StudentInput {
                    first_name: Some(first.into()),
                    last_name: Some("Hopper".into()),
                    email: Some(email.into()),
                    ..Default::default()
                })
                .await
                .unwrap();
            manager
                .record_membership(&request(&s.id, "Batch 1"))
                .await
                .unwrap();
        }
        let summary: CohortSummary =
            course_roster_core::store::find_one_as(&fx.store, collections::COHORT_SUMMARIES, &Filter::All)
                .await
                .unwrap()
                .unwrap();
        assert_eq!(summary.students.len(), 3);
        assert_eq!(summary.total_students, summary.students.len());
        assert_eq!(summary.metadata["batchName"], "Batch 1");
    }

    #[tokio::test]
    async fn test_query_and_list_members() {
        let fx = fixture().await;
        let manager = CohortManager::new(&fx.store, &fx.partitions);
        manager
            .record_membership(&request(&fx.student_id, "Batch 1"))
            .await
            .unwrap();

        let all = manager.query_summaries(&SummaryQuery::default()).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].course, "data science");
        assert_eq!(all[0].students[0]["firstName"], "Ada");

        let by_month = manager
            .query_summaries(&SummaryQuery {
                month: Some("January".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(by_month.len(), 1);

        let unknown = manager
            .query_summaries(&SummaryQuery {
                course: Some("history".into()),
                ..Default::default()
            })
            .await;
        assert!(matches!(unknown, Err(RosterError::NotFound { .. })));

        let query = SummaryQuery {
            course: Some("data science".into()),
            year: Some("2025".into()),
            month: Some("January".into()),
            batch: Some("Batch 1".into()),
        };
        let members = manager.list_members(&query).await.unwrap();
        assert_eq!(members.collection_name, PARTITION);
        assert_eq!(members.students.len(), 1);
        assert_eq!(members.students[0]["email"], "ada@example.com");
        assert!(members.students[0]["dynamicCollectionId"].is_string());

        let compact = manager.list_members_compact(&query).await.unwrap();
        assert_eq!(compact.students[0]["name"], "Ada Lovelace");
    }

    #[tokio::test]
    async fn test_query_without_summaries_is_empty() {
        let fx = fixture().await;
        let manager = CohortManager::new(&fx.store, &fx.partitions);
        let found = manager
            .query_summaries(&SummaryQuery {
                course: Some("data".into()),
                year: Some("2025".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn test_list_members_skips_deleted_students() {
        let fx = fixture().await;
        let manager = CohortManager::new(&fx.store, &fx.partitions);
        manager
            .record_membership(&request(&fx.student_id, "Batch 1"))
            .await
            .unwrap();
        fx.store
            .delete_by_id(collections::STUDENTS, &fx.student_id)
            .await
            .unwrap();
        let members = manager
            .list_members(&SummaryQuery {
                course: Some("data science".into()),
                year: Some("2025".into()),
                month: Some("January".into()),
                batch: Some("Batch 1".into()),
            })
            .await
            .unwrap();
        assert!(members.students.is_empty());
    }

    #[tokio::test]
    async fn test_debug_references_reports_each_level() {
        let fx = fixture().await;
        let manager = CohortManager::new(&fx.store, &fx.partitions);
        let mut query = SummaryQuery {
            course: Some("science".into()),
            year: Some("2025".into()),
            month: Some("January".into()),
            batch: Some("Batch 1".into()),
        };
        let trace = manager.debug_references(&query).await.unwrap();
        assert_eq!(trace["course"]["name"], "data science");
        assert_eq!(trace["batch"]["name"], "Batch 1");
        assert_eq!(trace["collectionName"], PARTITION);

        query.batch = Some("Batch 9".into());
        let err = manager.debug_references(&query).await.unwrap_err();
        match err {
            RosterError::NotFound { details, .. } => {
                assert_eq!(details["availableBatches"][0]["name"], "Batch 1");
            }
            other => panic!("expected not found, got {other:?}"),
        }
    }
}
