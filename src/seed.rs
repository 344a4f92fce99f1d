//! Reference data for a fresh deployment (`roster seed`).
//!
//! Creates the configured courses, and under every course each configured
//! year, under every year each month, and under every month each batch.
//! Records that already exist are reused, so the command can run repeatedly.

use anyhow::Result;
use course_roster_core::models::{collections, Batch, Course, Month, Year};
use course_roster_core::store::{find_one_as, Filter, Store};
use tracing::info;

use crate::catalog::Catalog;
use crate::config::{Config, SeedConfig};
use crate::db;
use crate::error::RosterError;
use crate::migrate::ensure_base_collections;
use crate::sqlite_store::SqliteStore;

/// Number of records created by one seeding pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub courses: usize,
    pub years: usize,
    pub months: usize,
    pub batches: usize,
}

impl SeedReport {
    pub fn total(&self) -> usize {
        self.courses + self.years + self.months + self.batches
    }
}

/// Runs `create`, falling back to `existing` when the record is already
/// there. Returns the record and whether it was created.
async fn get_or_create<T, C, E>(create: C, existing: E) -> Result<(T, bool)>
where
    C: std::future::Future<Output = crate::error::Result<T>>,
    E: std::future::Future<Output = course_roster_core::store::StoreResult<Option<T>>>,
{
    match create.await {
        Ok(created) => Ok((created, true)),
        Err(RosterError::Conflict { message, .. }) => match existing.await? {
            Some(found) => Ok((found, false)),
            None => anyhow::bail!("{} but the record could not be read back", message),
        },
        Err(err) => Err(err.into()),
    }
}

pub async fn seed(store: &dyn Store, seed: &SeedConfig) -> Result<SeedReport> {
    let catalog = Catalog::new(store);
    let mut report = SeedReport::default();

    for entry in &seed.courses {
        let (course, created) = get_or_create(
            catalog.add_course(&entry.name, &entry.description),
            find_one_as::<Course>(store, collections::COURSES, &Filter::eq("name", entry.name.trim())),
        )
        .await?;
        report.courses += created as usize;

        for label in &seed.years {
            let key = Filter::And(vec![
                Filter::eq("course", course.id.as_str()),
                Filter::eq("year", label.trim()),
            ]);
            let (year, created) = get_or_create(
                catalog.add_year(&course.id, label, None),
                find_one_as::<Year>(store, collections::YEARS, &key),
            )
            .await?;
            report.years += created as usize;

            for name in &seed.months {
                let key = Filter::And(vec![
                    Filter::eq("year", year.id.as_str()),
                    Filter::eq("name", name.trim()),
                ]);
                let (month, created) = get_or_create(
                    catalog.add_month(&year.id, name),
                    find_one_as::<Month>(store, collections::MONTHS, &key),
                )
                .await?;
                report.months += created as usize;

                for batch in &seed.batches {
                    let key = Filter::And(vec![
                        Filter::eq("month", month.id.as_str()),
                        Filter::eq("name", batch.trim()),
                    ]);
                    let (_, created) = get_or_create(
                        catalog.add_batch(&month.id, batch, ""),
                        find_one_as::<Batch>(store, collections::BATCHES, &key),
                    )
                    .await?;
                    report.batches += created as usize;
                }
            }
        }
        info!(course = %course.name, "seeded course hierarchy");
    }

    Ok(report)
}

pub async fn run_seed(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    ensure_base_collections(&store).await?;

    let report = seed(&store, &config.seed).await?;
    println!(
        "Seeded {} records ({} courses, {} years, {} months, {} batches)",
        report.total(),
        report.courses,
        report.years,
        report.months,
        report.batches
    );

    pool.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SeedCourse;
    use course_roster_core::store::memory::InMemoryStore;

    fn small_seed() -> SeedConfig {
        SeedConfig {
            courses: vec![SeedCourse {
                name: "data science".into(),
                description: "ML".into(),
            }],
            years: vec!["2025".into(), "2026".into()],
            months: vec!["January".into()],
            batches: vec!["Batch 1".into(), "Batch 2".into()],
        }
    }

    #[tokio::test]
    async fn test_seed_is_idempotent() {
        let store = InMemoryStore::new();
        ensure_base_collections(&store).await.unwrap();

        let first = seed(&store, &small_seed()).await.unwrap();
        assert_eq!(
            first,
            SeedReport {
                courses: 1,
                years: 2,
                months: 2,
                batches: 4
            }
        );

        let second = seed(&store, &small_seed()).await.unwrap();
        assert_eq!(second.total(), 0);
        assert_eq!(
            store.count(collections::BATCHES, &Filter::All).await.unwrap(),
            4
        );
    }

    #[tokio::test]
    async fn test_default_seed_shape() {
        let store = InMemoryStore::new();
        let report = seed(&store, &SeedConfig::default()).await.unwrap();
        assert_eq!(report.courses, 2);
        assert_eq!(report.years, 10);
        assert_eq!(report.months, 120);
        assert_eq!(report.batches, 480);
    }
}
