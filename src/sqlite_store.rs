//! SQLite-backed [`Store`] implementation.
//!
//! Each collection is one table holding whole documents as JSON text:
//!
//! ```sql
//! CREATE TABLE "<collection>" (id TEXT PRIMARY KEY, doc TEXT NOT NULL)
//! ```
//!
//! Unique keys become expression indexes over `json_extract(doc, '$.field')`,
//! filters compile to `WHERE` clauses over the same expressions, and
//! insertion order is `rowid` order. Tables are created on first insert or
//! by [`Store::ensure_collection`]; finds against a missing table return
//! nothing.
//!
//! SQLite's `lower()` folds ASCII only, so a [`Filter::Contains`] compiles
//! to a type check and the matching rows are re-checked with
//! [`Filter::matches`].
//!
//! Read-modify-write operations run in `BEGIN IMMEDIATE` transactions: the
//! write lock is taken before the read, so concurrent updates to one
//! document serialize instead of failing with `SQLITE_BUSY`.

use anyhow::anyhow;
use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::SqliteConnection;
use sqlx::{Row, Sqlite, SqlitePool};
use tracing::warn;

use course_roster_core::store::{
    document_id, now_timestamp, stamp_new, validate_collection_name, CollectionSpec, Document,
    Filter, Store, StoreError, StoreResult, Update, ID_FIELD, UPDATED_AT_FIELD,
};

/// SQLite implementation of the [`Store`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn table_exists(&self, name: &str) -> StoreResult<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name = ?",
        )
        .bind(name)
        .fetch_one(&self.pool)
        .await
        .map_err(backend)?;
        Ok(exists)
    }

    /// Starts a transaction holding the write lock from its first statement.
    async fn begin_immediate(&self) -> StoreResult<sqlx::Transaction<'static, Sqlite>> {
        self.pool
            .begin_with("BEGIN IMMEDIATE")
            .await
            .map_err(backend)
    }

    async fn create_table(&self, name: &str) -> StoreResult<()> {
        validate_collection_name(name)?;
        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {} (id TEXT PRIMARY KEY, doc TEXT NOT NULL)",
            quote_ident(name)
        ))
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }
}

fn backend(err: sqlx::Error) -> StoreError {
    StoreError::Backend(err.into())
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name)
}

const INDEX_MARKER: &str = "__unique__";

/// Index names encode their fields so a violation can be reported by field.
fn index_name(collection: &str, fields: &[String]) -> String {
    format!("{}{}{}", collection, INDEX_MARKER, fields.join("__"))
}

fn fields_from_violation(collection: &str, message: &str) -> Vec<String> {
    let prefix = format!("{}{}", collection, INDEX_MARKER);
    if let Some(start) = message.find(&prefix) {
        let rest = &message[start + prefix.len()..];
        let end = rest.find(['\'', '"', ' ']).unwrap_or(rest.len());
        return rest[..end].split("__").map(str::to_string).collect();
    }
    if message.contains(".id") {
        return vec![ID_FIELD.to_string()];
    }
    Vec::new()
}

/// Maps a failed write to [`StoreError::Duplicate`] when a unique index
/// rejected it.
fn write_error(collection: &str, err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            return StoreError::Duplicate {
                collection: collection.to_string(),
                fields: fields_from_violation(collection, db_err.message()),
            };
        }
    }
    backend(err)
}

fn json_path(field: &str) -> StoreResult<String> {
    let valid = !field.is_empty() && field.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid {
        return Err(StoreError::InvalidName(field.to_string()));
    }
    Ok(format!("json_extract(doc, '$.{}')", field))
}

enum SqlArg {
    Text(String),
    Int(i64),
    Real(f64),
}

fn compile_eq(field: &str, value: &Value, args: &mut Vec<SqlArg>) -> StoreResult<String> {
    let path = json_path(field)?;
    let clause = match value {
        Value::Null => format!("{} IS NULL", path),
        Value::Bool(b) => {
            args.push(SqlArg::Int(i64::from(*b)));
            format!("{} = ?", path)
        }
        Value::Number(n) => {
            match n.as_i64() {
                Some(i) => args.push(SqlArg::Int(i)),
                None => args.push(SqlArg::Real(n.as_f64().unwrap_or(f64::NAN))),
            }
            format!("{} = ?", path)
        }
        Value::String(s) => {
            args.push(SqlArg::Text(s.clone()));
            format!("{} = ?", path)
        }
        Value::Array(_) | Value::Object(_) => {
            args.push(SqlArg::Text(value.to_string()));
            format!("{} = json(?)", path)
        }
    };
    Ok(clause)
}

/// Compiles a filter into a SQL boolean expression plus positional args.
fn compile_filter(filter: &Filter, args: &mut Vec<SqlArg>) -> StoreResult<String> {
    let sql = match filter {
        Filter::All => "1".to_string(),
        Filter::Eq(field, value) => compile_eq(field, value, args)?,
        Filter::In(field, values) => {
            if values.is_empty() {
                "0".to_string()
            } else {
                let parts = values
                    .iter()
                    .map(|v| compile_eq(field, v, args))
                    .collect::<StoreResult<Vec<_>>>()?;
                format!("({})", parts.join(" OR "))
            }
        }
        Filter::Contains(field, _) => {
            json_path(field)?;
            format!("(json_type(doc, '$.{}') = 'text')", field)
        }
        Filter::And(filters) => {
            if filters.is_empty() {
                "1".to_string()
            } else {
                let parts = filters
                    .iter()
                    .map(|f| compile_filter(f, args))
                    .collect::<StoreResult<Vec<_>>>()?;
                format!("({})", parts.join(" AND "))
            }
        }
        Filter::Or(filters) => {
            if filters.is_empty() {
                "0".to_string()
            } else {
                let parts = filters
                    .iter()
                    .map(|f| compile_filter(f, args))
                    .collect::<StoreResult<Vec<_>>>()?;
                format!("({})", parts.join(" OR "))
            }
        }
    };
    Ok(sql)
}

/// Whether SQL alone cannot decide the filter.
fn needs_recheck(filter: &Filter) -> bool {
    match filter {
        Filter::Contains(..) => true,
        Filter::And(filters) | Filter::Or(filters) => filters.iter().any(needs_recheck),
        Filter::All | Filter::Eq(..) | Filter::In(..) => false,
    }
}

fn parse_doc(text: &str) -> StoreResult<Document> {
    match serde_json::from_str::<Value>(text)? {
        Value::Object(map) => Ok(map),
        other => Err(StoreError::Backend(anyhow!(
            "stored document is not an object: {}",
            other
        ))),
    }
}

macro_rules! bind_args {
    ($query:expr, $args:expr) => {{
        let mut q = $query;
        for arg in $args {
            q = match arg {
                SqlArg::Text(s) => q.bind(s),
                SqlArg::Int(i) => q.bind(i),
                SqlArg::Real(f) => q.bind(f),
            };
        }
        q
    }};
}

/// Rows of `collection` matching `filter` in `rowid` order, as `(id, doc)`.
/// With `first_only`, at most one row is returned.
async fn select_docs<'c, E>(
    executor: E,
    collection: &str,
    filter: &Filter,
    first_only: bool,
) -> StoreResult<Vec<(String, Document)>>
where
    E: sqlx::Executor<'c, Database = Sqlite>,
{
    let mut args = Vec::new();
    let clause = compile_filter(filter, &mut args)?;
    let recheck = needs_recheck(filter);
    let limit = if first_only && !recheck { " LIMIT 1" } else { "" };
    let sql = format!(
        "SELECT id, doc FROM {} WHERE {} ORDER BY rowid{}",
        quote_ident(collection),
        clause,
        limit
    );
    let rows = bind_args!(sqlx::query::<Sqlite>(&sql), args)
        .fetch_all(executor)
        .await
        .map_err(backend)?;

    let mut docs = Vec::new();
    for row in rows {
        let doc = parse_doc(&row.get::<String, _>("doc"))?;
        if recheck && !filter.matches(&doc) {
            continue;
        }
        docs.push((row.get::<String, _>("id"), doc));
        if first_only {
            break;
        }
    }
    Ok(docs)
}

/// Applies `update` to the first match inside the caller's transaction.
async fn update_first(
    conn: &mut SqliteConnection,
    collection: &str,
    filter: &Filter,
    update: &Update,
) -> StoreResult<Option<Document>> {
    let Some((id, mut doc)) = select_docs(&mut *conn, collection, filter, true)
        .await?
        .into_iter()
        .next()
    else {
        return Ok(None);
    };

    update.apply(&mut doc)?;
    doc.insert(
        UPDATED_AT_FIELD.to_string(),
        Value::String(now_timestamp()),
    );
    let text = serde_json::to_string(&doc)?;

    sqlx::query(&format!(
        "UPDATE {} SET doc = ? WHERE id = ?",
        quote_ident(collection)
    ))
    .bind(text)
    .bind(&id)
    .execute(&mut *conn)
    .await
    .map_err(|e| write_error(collection, e))?;
    Ok(Some(doc))
}

#[async_trait]
impl Store for SqliteStore {
    async fn ensure_collection(&self, spec: &CollectionSpec) -> StoreResult<()> {
        self.create_table(&spec.name).await?;
        for fields in &spec.unique {
            let exprs = fields
                .iter()
                .map(|f| json_path(f))
                .collect::<StoreResult<Vec<_>>>()?;
            sqlx::query(&format!(
                "CREATE UNIQUE INDEX IF NOT EXISTS {} ON {} ({})",
                quote_ident(&index_name(&spec.name, fields)),
                quote_ident(&spec.name),
                exprs.join(", ")
            ))
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        }
        Ok(())
    }

    async fn collection_exists(&self, name: &str) -> StoreResult<bool> {
        self.table_exists(name).await
    }

    async fn list_collections(&self) -> StoreResult<Vec<String>> {
        let names: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        Ok(names)
    }

    async fn find(&self, collection: &str, filter: &Filter) -> StoreResult<Vec<Document>> {
        if !self.table_exists(collection).await? {
            return Ok(Vec::new());
        }
        let rows = select_docs(&self.pool, collection, filter, false).await?;
        Ok(rows.into_iter().map(|(_, doc)| doc).collect())
    }

    async fn find_one(&self, collection: &str, filter: &Filter) -> StoreResult<Option<Document>> {
        if !self.table_exists(collection).await? {
            return Ok(None);
        }
        let rows = select_docs(&self.pool, collection, filter, true).await?;
        Ok(rows.into_iter().next().map(|(_, doc)| doc))
    }

    async fn count(&self, collection: &str, filter: &Filter) -> StoreResult<usize> {
        if !self.table_exists(collection).await? {
            return Ok(0);
        }
        if needs_recheck(filter) {
            return Ok(select_docs(&self.pool, collection, filter, false).await?.len());
        }
        let mut args = Vec::new();
        let clause = compile_filter(filter, &mut args)?;
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE {}",
            quote_ident(collection),
            clause
        );
        let count: i64 = bind_args!(sqlx::query_scalar::<Sqlite, i64>(&sql), args)
            .fetch_one(&self.pool)
            .await
            .map_err(backend)?;
        Ok(count as usize)
    }

    async fn insert(&self, collection: &str, mut doc: Document) -> StoreResult<Document> {
        self.create_table(collection).await?;
        stamp_new(&mut doc);
        let text = serde_json::to_string(&doc)?;
        sqlx::query(&format!(
            "INSERT INTO {} (id, doc) VALUES (?, ?)",
            quote_ident(collection)
        ))
        .bind(document_id(&doc))
        .bind(text)
        .execute(&self.pool)
        .await
        .map_err(|e| write_error(collection, e))?;
        Ok(doc)
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: &Filter,
        update: &Update,
    ) -> StoreResult<Option<Document>> {
        if !self.table_exists(collection).await? {
            return Ok(None);
        }
        let mut tx = self.begin_immediate().await?;
        match update_first(&mut *tx, collection, filter, update).await {
            Ok(doc) => {
                tx.commit().await.map_err(backend)?;
                Ok(doc)
            }
            Err(err) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!(collection, error = %rollback, "rollback failed");
                }
                Err(err)
            }
        }
    }

    async fn delete_by_id(&self, collection: &str, id: &str) -> StoreResult<Option<Document>> {
        if !self.table_exists(collection).await? {
            return Ok(None);
        }
        let mut tx = self.begin_immediate().await?;
        let row = sqlx::query(&format!(
            "SELECT doc FROM {} WHERE id = ?",
            quote_ident(collection)
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(backend)?;
        let doc = match row {
            Some(r) => parse_doc(&r.get::<String, _>("doc"))?,
            None => return Ok(None),
        };
        sqlx::query(&format!("DELETE FROM {} WHERE id = ?", quote_ident(collection)))
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        tx.commit().await.map_err(backend)?;
        Ok(Some(doc))
    }
}
