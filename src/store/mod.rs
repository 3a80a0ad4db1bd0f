mod schema;
mod sqlite;

pub use schema::CURRENT_SCHEMA;
pub use sqlite::SqliteStore;

use serde_json::{Map, Value};

use crate::error::AppError;
use crate::models::{Entity, EntityKind, Pid};

/// A raw entity document as held by the store.
pub type Document = Map<String, Value>;

/// Conjunction of field equality conditions. No conditions matches every
/// document of the kind.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<(&'static str, Value)>,
}

impl Filter {
    pub fn all() -> Self {
        Self::default()
    }

    /// Selects a single document, or every document when `pid` is nil.
    pub fn by_pid(pid: Pid) -> Self {
        Self::all().pid_eq("pid", pid)
    }

    pub fn eq(mut self, field: &'static str, value: impl Into<Value>) -> Self {
        self.conditions.push((field, value.into()));
        self
    }

    /// Adds an identifier condition unless `pid` is nil.
    pub fn pid_eq(self, field: &'static str, pid: Pid) -> Self {
        if pid.is_nil() { self } else { self.eq(field, pid) }
    }

    pub fn conditions(&self) -> &[(&'static str, Value)] {
        &self.conditions
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateOutcome {
    pub matched: u64,
    pub modified: u64,
}

/// Persistent collections of documents, one collection per [`EntityKind`].
///
/// The store has no notion of relationships between kinds; every
/// cross-collection rule lives in `integrity`.
#[rocket::async_trait]
pub trait EntityStore: Send + Sync {
    async fn find_by_id(&self, kind: EntityKind, pid: Pid) -> Result<Option<Document>, AppError>;

    /// Matching documents in insertion order.
    async fn find_by_filter(
        &self,
        kind: EntityKind,
        filter: &Filter,
    ) -> Result<Vec<Document>, AppError>;

    /// Stores `doc` under a freshly assigned identifier, which is also
    /// written into the document's `pid` field.
    async fn insert(&self, kind: EntityKind, doc: Document) -> Result<Pid, AppError>;

    /// Merges `changes` into the stored document. The `pid` field is never
    /// overwritten.
    async fn update_by_id(
        &self,
        kind: EntityKind,
        pid: Pid,
        changes: Document,
    ) -> Result<UpdateOutcome, AppError>;

    async fn delete_by_filter(&self, kind: EntityKind, filter: &Filter) -> Result<u64, AppError>;
}

pub fn to_document<T: Entity>(entity: &T) -> Result<Document, AppError> {
    match serde_json::to_value(entity)? {
        Value::Object(doc) => Ok(doc),
        other => Err(AppError::Internal(format!(
            "{} serialized to a non-object value: {}",
            T::KIND,
            other
        ))),
    }
}

pub fn from_document<T: Entity>(doc: Document) -> Result<T, AppError> {
    Ok(serde_json::from_value(Value::Object(doc))?)
}

pub async fn find_one<T: Entity>(store: &dyn EntityStore, pid: Pid) -> Result<Option<T>, AppError> {
    store
        .find_by_id(T::KIND, pid)
        .await?
        .map(from_document::<T>)
        .transpose()
}

pub async fn find_many<T: Entity>(
    store: &dyn EntityStore,
    filter: &Filter,
) -> Result<Vec<T>, AppError> {
    store
        .find_by_filter(T::KIND, filter)
        .await?
        .into_iter()
        .map(from_document::<T>)
        .collect()
}

pub async fn insert_entity<T: Entity>(store: &dyn EntityStore, entity: &T) -> Result<Pid, AppError> {
    let mut doc = to_document(entity)?;
    doc.remove("pid");
    store.insert(T::KIND, doc).await
}

pub async fn update_entity<T: Entity>(
    store: &dyn EntityStore,
    pid: Pid,
    entity: &T,
) -> Result<UpdateOutcome, AppError> {
    let mut doc = to_document(entity)?;
    doc.remove("pid");
    store.update_by_id(T::KIND, pid, doc).await
}
