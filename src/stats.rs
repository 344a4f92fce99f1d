//! Collection counts for `roster stats`.
//!
//! Lists every collection with its document count, fixed collections first
//! and cohort partitions after, so an operator can see at a glance which
//! cohorts hold members.

use anyhow::Result;
use course_roster_core::partition::is_partition_name;
use course_roster_core::store::{Filter, Store};

use crate::config::Config;
use crate::db;
use crate::sqlite_store::SqliteStore;

/// Document count of one collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionCount {
    pub name: String,
    pub count: usize,
    pub partition: bool,
}

/// Counts for every collection: fixed collections first, then partitions,
/// each group sorted by name.
pub async fn collection_counts(store: &dyn Store) -> Result<Vec<CollectionCount>> {
    let mut counts = Vec::new();
    for name in store.list_collections().await? {
        let count = store.count(&name, &Filter::All).await?;
        counts.push(CollectionCount {
            partition: is_partition_name(&name),
            name,
            count,
        });
    }
    counts.sort_by(|a, b| (a.partition, &a.name).cmp(&(b.partition, &b.name)));
    Ok(counts)
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let counts = collection_counts(&store).await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Course Roster: Database Stats");
    println!("==============================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));

    let (partitions, fixed): (Vec<_>, Vec<_>) = counts.iter().partition(|c| c.partition);
    for (title, group) in [("Collections", fixed), ("Cohort partitions", partitions)] {
        if group.is_empty() {
            continue;
        }
        println!();
        println!("  {}:", title);
        println!("  {:<52} {:>8}", "NAME", "DOCS");
        println!("  {}", "-".repeat(61));
        for c in group {
            println!("  {:<52} {:>8}", c.name, c.count);
        }
    }

    println!();

    pool.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
