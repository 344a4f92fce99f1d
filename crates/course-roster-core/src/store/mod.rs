//! Document store abstraction for Course Roster.
//!
//! The [`Store`] trait is the only surface the rest of the system uses to
//! reach durable state. It models a small document database: named
//! collections of JSON objects, filtered finds (including disjunctions and
//! case-insensitive substring matches), insert, update-by-filter,
//! delete-by-id, and per-collection uniqueness constraints.
//!
//! Collections are created lazily: inserting into an unknown collection
//! creates it without constraints, and [`Store::ensure_collection`] declares
//! one (with its unique keys) idempotently by name.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

/// A stored document: a JSON object.
pub type Document = serde_json::Map<String, Value>;

/// Identifier field present on every stored document.
pub const ID_FIELD: &str = "_id";
/// Creation timestamp (RFC 3339), set by the store on insert.
pub const CREATED_AT_FIELD: &str = "createdAt";
/// Last-modification timestamp (RFC 3339), set by the store on insert and update.
pub const UPDATED_AT_FIELD: &str = "updatedAt";

/// Errors surfaced by [`Store`] implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write.
    #[error("duplicate key in collection '{collection}' on ({})", fields.join(", "))]
    Duplicate {
        collection: String,
        fields: Vec<String>,
    },

    /// The collection name cannot be used as a storage region.
    #[error("invalid collection name: {0:?}")]
    InvalidName(String),

    /// An update could not be applied to the matched document.
    #[error("invalid update: {0}")]
    InvalidUpdate(String),

    /// A value could not be converted to or from a document.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Any failure of the underlying backend.
    #[error("store backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// A filter over documents in one collection.
///
/// Field names address top-level keys only. A missing field compares as
/// `null`.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Matches every document.
    All,
    /// Field equals the value.
    Eq(String, Value),
    /// Field equals one of the values.
    In(String, Vec<Value>),
    /// Field is a string containing the needle, ignoring case.
    Contains(String, String),
    /// Every sub-filter matches. `And([])` matches everything.
    And(Vec<Filter>),
    /// At least one sub-filter matches. `Or([])` matches nothing.
    Or(Vec<Filter>),
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq(field.into(), value.into())
    }

    /// Shorthand for `Eq("_id", id)`.
    pub fn id(id: &str) -> Self {
        Filter::eq(ID_FIELD, id)
    }

    pub fn contains(field: impl Into<String>, needle: impl Into<String>) -> Self {
        Filter::Contains(field.into(), needle.into())
    }

    pub fn is_in<I, V>(field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Filter::In(field.into(), values.into_iter().map(Into::into).collect())
    }

    /// Evaluates the filter against a document.
    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            Filter::All => true,
            Filter::Eq(field, value) => field_value(doc, field) == value,
            Filter::In(field, values) => {
                let actual = field_value(doc, field);
                values.iter().any(|v| v == actual)
            }
            Filter::Contains(field, needle) => match field_value(doc, field) {
                Value::String(s) => s.to_lowercase().contains(&needle.to_lowercase()),
                _ => false,
            },
            Filter::And(filters) => filters.iter().all(|f| f.matches(doc)),
            Filter::Or(filters) => filters.iter().any(|f| f.matches(doc)),
        }
    }
}

static NULL: Value = Value::Null;

fn field_value<'a>(doc: &'a Document, field: &str) -> &'a Value {
    doc.get(field).unwrap_or(&NULL)
}

/// A modification applied to the first document matched by a filter.
///
/// Operations run in order: `set`, `push`, `add_to_set`, then `set_len`.
/// `_id` and `createdAt` are never overwritten.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Update {
    pub set: Document,
    pub push: Vec<(String, Value)>,
    pub add_to_set: Vec<(String, Value)>,
    /// `(target, array)` pairs: `target` receives the final length of `array`.
    pub set_len: Vec<(String, String)>,
}

impl Update {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set.insert(field.into(), value.into());
        self
    }

    /// Appends the value to an array field unconditionally.
    pub fn push(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.push.push((field.into(), value.into()));
        self
    }

    /// Appends the value to an array field unless already present.
    pub fn add_to_set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.add_to_set.push((field.into(), value.into()));
        self
    }

    /// Stores the length of the `array` field, as it stands after the other
    /// operations, in `target`.
    pub fn set_len(mut self, target: impl Into<String>, array: impl Into<String>) -> Self {
        self.set_len.push((target.into(), array.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
            && self.push.is_empty()
            && self.add_to_set.is_empty()
            && self.set_len.is_empty()
    }

    /// Applies the update in place. Does not touch `updatedAt`; stores
    /// stamp that themselves.
    pub fn apply(&self, doc: &mut Document) -> StoreResult<()> {
        for (field, value) in &self.set {
            if field == ID_FIELD || field == CREATED_AT_FIELD {
                continue;
            }
            doc.insert(field.clone(), value.clone());
        }
        for (field, value) in &self.push {
            array_field(doc, field)?.push(value.clone());
        }
        for (field, value) in &self.add_to_set {
            let items = array_field(doc, field)?;
            if !items.contains(value) {
                items.push(value.clone());
            }
        }
        for (target, array) in &self.set_len {
            let len = array_field(doc, array)?.len();
            doc.insert(target.clone(), Value::from(len));
        }
        Ok(())
    }
}

fn array_field<'a>(doc: &'a mut Document, field: &str) -> StoreResult<&'a mut Vec<Value>> {
    let slot = doc
        .entry(field.to_string())
        .or_insert_with(|| Value::Array(Vec::new()));
    if slot.is_null() {
        *slot = Value::Array(Vec::new());
    }
    match slot {
        Value::Array(items) => Ok(items),
        other => Err(StoreError::InvalidUpdate(format!(
            "field '{}' is not an array (found {})",
            field, other
        ))),
    }
}

/// A collection and the uniqueness constraints declared on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionSpec {
    pub name: String,
    /// Each entry is one compound unique key.
    pub unique: Vec<Vec<String>>,
}

impl CollectionSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            unique: Vec::new(),
        }
    }

    /// Declares a (possibly compound) unique key.
    pub fn unique(mut self, fields: &[&str]) -> Self {
        self.unique
            .push(fields.iter().map(|f| f.to_string()).collect());
        self
    }
}

/// Rejects names that cannot name a storage region in every backend.
pub fn validate_collection_name(name: &str) -> StoreResult<()> {
    let bad = name.is_empty()
        || name.len() > 128
        || name.starts_with("sqlite_")
        || name.chars().any(|c| c == '"' || c.is_control());
    if bad {
        return Err(StoreError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Generates a fresh document identifier.
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Whether a token is syntactically a document identifier.
pub fn is_valid_id(token: &str) -> bool {
    Uuid::parse_str(token).is_ok()
}

/// Current time in the format stored in `createdAt` / `updatedAt`.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Prepares a document for insertion: assigns `_id` when absent and stamps
/// both timestamps.
pub fn stamp_new(doc: &mut Document) {
    let has_id = matches!(doc.get(ID_FIELD), Some(Value::String(s)) if !s.is_empty());
    if !has_id {
        doc.insert(ID_FIELD.to_string(), Value::String(new_id()));
    }
    let now = now_timestamp();
    doc.insert(CREATED_AT_FIELD.to_string(), Value::String(now.clone()));
    doc.insert(UPDATED_AT_FIELD.to_string(), Value::String(now));
}

/// The document's identifier, or an empty string.
pub fn document_id(doc: &Document) -> &str {
    doc.get(ID_FIELD).and_then(Value::as_str).unwrap_or("")
}

/// Values of `fields` in `doc`, `null` for missing fields.
pub fn key_values(doc: &Document, fields: &[String]) -> Vec<Value> {
    fields
        .iter()
        .map(|f| field_value(doc, f).clone())
        .collect()
}

pub fn to_document<T: Serialize>(value: &T) -> StoreResult<Document> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(StoreError::InvalidUpdate(format!(
            "expected a JSON object, got {}",
            other
        ))),
    }
}

pub fn from_document<T: DeserializeOwned>(doc: Document) -> StoreResult<T> {
    Ok(serde_json::from_value(Value::Object(doc))?)
}

/// Abstract document store.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`ensure_collection`](Store::ensure_collection) | Declare a collection and its unique keys (idempotent) |
/// | [`collection_exists`](Store::collection_exists) | Look a collection up by name |
/// | [`list_collections`](Store::list_collections) | All collection names |
/// | [`find`](Store::find) | All matches in insertion order |
/// | [`find_one`](Store::find_one) | First match in insertion order |
/// | [`count`](Store::count) | Number of matches |
/// | [`insert`](Store::insert) | Insert one document |
/// | [`update_one`](Store::update_one) | Update the first match |
/// | [`delete_by_id`](Store::delete_by_id) | Remove one document by `_id` |
#[async_trait]
pub trait Store: Send + Sync {
    /// Creates the collection and its unique constraints if missing.
    /// Calling this again with the same name is a no-op for existing
    /// constraints.
    async fn ensure_collection(&self, spec: &CollectionSpec) -> StoreResult<()>;

    async fn collection_exists(&self, name: &str) -> StoreResult<bool>;

    async fn list_collections(&self) -> StoreResult<Vec<String>>;

    /// All documents matching the filter, in insertion order. A missing
    /// collection yields an empty list.
    async fn find(&self, collection: &str, filter: &Filter) -> StoreResult<Vec<Document>>;

    async fn find_one(&self, collection: &str, filter: &Filter) -> StoreResult<Option<Document>> {
        Ok(self.find(collection, filter).await?.into_iter().next())
    }

    async fn count(&self, collection: &str, filter: &Filter) -> StoreResult<usize> {
        Ok(self.find(collection, filter).await?.len())
    }

    /// Inserts a document and returns it as stored (with `_id` and
    /// timestamps). Uniqueness violations yield [`StoreError::Duplicate`].
    async fn insert(&self, collection: &str, doc: Document) -> StoreResult<Document>;

    /// Applies `update` to the first document matching `filter` and returns
    /// the updated document, or `None` when nothing matched.
    async fn update_one(
        &self,
        collection: &str,
        filter: &Filter,
        update: &Update,
    ) -> StoreResult<Option<Document>>;

    /// Removes a document by `_id` and returns it, or `None` when absent.
    async fn delete_by_id(&self, collection: &str, id: &str) -> StoreResult<Option<Document>>;
}

/// Typed variant of [`Store::find`].
pub async fn find_as<T: DeserializeOwned>(
    store: &dyn Store,
    collection: &str,
    filter: &Filter,
) -> StoreResult<Vec<T>> {
    store
        .find(collection, filter)
        .await?
        .into_iter()
        .map(from_document)
        .collect()
}

/// Typed variant of [`Store::find_one`].
pub async fn find_one_as<T: DeserializeOwned>(
    store: &dyn Store,
    collection: &str,
    filter: &Filter,
) -> StoreResult<Option<T>> {
    store
        .find_one(collection, filter)
        .await?
        .map(from_document)
        .transpose()
}

/// Serializes `value`, inserts it, and returns the stored form.
pub async fn insert_as<T: Serialize + DeserializeOwned>(
    store: &dyn Store,
    collection: &str,
    value: &T,
) -> StoreResult<T> {
    let stored = store.insert(collection, to_document(value)?).await?;
    from_document(stored)
}
