use anyhow::{Context, Result};
use course_roster_core::models::base_collection_specs;
use course_roster_core::store::Store;
use tracing::info;

use crate::config::Config;
use crate::db;
use crate::sqlite_store::SqliteStore;

/// Declares the fixed collections and their unique keys. Idempotent.
pub async fn ensure_base_collections(store: &dyn Store) -> Result<()> {
    for spec in base_collection_specs() {
        store
            .ensure_collection(&spec)
            .await
            .with_context(|| format!("Failed to create collection {}", spec.name))?;
    }
    Ok(())
}

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    ensure_base_collections(&store).await?;
    info!(path = %config.db.path.display(), "database initialized");
    pool.close().await;
    Ok(())
}
