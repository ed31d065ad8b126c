//! Document backends the session store persists records into.
//!
//! The store only needs keyed find/insert/update/delete plus index listing
//! and creation. [`MongoBackend`] talks to a real collection;
//! [`MemoryBackend`] keeps everything in process.

use std::time::Duration;

use async_trait::async_trait;
use common::error::DatabaseResult;
use mongodb::bson::{Document, oid::ObjectId};

mod memory;
mod mongo;

pub use memory::MemoryBackend;
pub use mongo::MongoBackend;

/// An index as seen by the store: the indexed fields plus the options the
/// expiry logic cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    pub name: Option<String>,
    /// Indexed fields, ascending.
    pub keys: Vec<String>,
    pub sparse: bool,
    pub expire_after: Option<Duration>,
}

impl IndexSpec {
    /// A sparse single-field index that expires documents `expire_after`
    /// past the field's timestamp.
    pub fn expiring(field: &str, expire_after: Duration) -> Self {
        Self {
            name: Some(format!("{}_1", field)),
            keys: vec![field.to_string()],
            sparse: true,
            expire_after: Some(expire_after),
        }
    }

    pub fn covers(&self, field: &str) -> bool {
        self.keys.iter().any(|k| k == field)
    }
}

/// Keyed document store with a background expiry process.
///
/// Implementations make exactly one attempt per call; callers decide about
/// retries.
#[async_trait]
pub trait DocumentBackend: Send + Sync {
    /// Fetch the document with this `_id`, if any.
    async fn find_one(&self, id: ObjectId) -> DatabaseResult<Option<Document>>;

    /// Store a new document and return the `_id` the backend assigned.
    async fn insert_one(&self, document: Document) -> DatabaseResult<ObjectId>;

    /// Overwrite the given top-level fields of the document with this `_id`.
    /// Returns the number of matched documents.
    async fn update_one(&self, id: ObjectId, fields: Document) -> DatabaseResult<u64>;

    /// Remove the document with this `_id`. Returns the number removed.
    async fn delete_one(&self, id: ObjectId) -> DatabaseResult<u64>;

    async fn list_indexes(&self) -> DatabaseResult<Vec<IndexSpec>>;

    async fn create_index(&self, index: IndexSpec) -> DatabaseResult<()>;
}
