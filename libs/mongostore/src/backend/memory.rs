//! In-process backend with MongoDB-like semantics.
//!
//! Every collection starts with the `_id_` index. Expiring indexes are
//! honoured by [`MemoryBackend::purge_expired`], which plays the part of the
//! server's TTL monitor.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::error::{DatabaseError, DatabaseResult};
use mongodb::bson::{Bson, Document, oid::ObjectId};
use tokio::sync::Mutex;
use tracing::info;

use super::{DocumentBackend, IndexSpec};

#[derive(Debug)]
struct MemoryState {
    documents: HashMap<ObjectId, Document>,
    indexes: Vec<IndexSpec>,
    unavailable: Option<String>,
}

impl Default for MemoryState {
    fn default() -> Self {
        Self {
            documents: HashMap::new(),
            indexes: vec![id_index()],
            unavailable: None,
        }
    }
}

impl MemoryState {
    fn check_available(&self) -> DatabaseResult<()> {
        match &self.unavailable {
            Some(reason) => Err(DatabaseError::Unavailable(reason.clone())),
            None => Ok(()),
        }
    }
}

fn id_index() -> IndexSpec {
    IndexSpec {
        name: Some("_id_".to_string()),
        keys: vec!["_id".to_string()],
        sparse: false,
        expire_after: None,
    }
}

/// Shared in-memory collection. Clones see the same documents.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored documents
    pub async fn len(&self) -> usize {
        self.state.lock().await.documents.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Copy of the stored document, bypassing availability checks
    pub async fn document(&self, id: &ObjectId) -> Option<Document> {
        self.state.lock().await.documents.get(id).cloned()
    }

    /// Remove a document behind the store's back
    pub async fn remove(&self, id: &ObjectId) -> bool {
        self.state.lock().await.documents.remove(id).is_some()
    }

    pub async fn indexes(&self) -> Vec<IndexSpec> {
        self.state.lock().await.indexes.clone()
    }

    /// Drop every index except `_id_`
    pub async fn drop_indexes(&self) {
        self.state.lock().await.indexes = vec![id_index()];
    }

    /// Make every subsequent call fail with [`DatabaseError::Unavailable`]
    /// until cleared with `None`.
    pub async fn set_unavailable(&self, reason: Option<&str>) {
        self.state.lock().await.unavailable = reason.map(str::to_string);
    }

    /// Remove documents whose expiring-index field is older than the
    /// index's window at `now`. Documents missing the field are skipped,
    /// as with a sparse index.
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let mut state = self.state.lock().await;

        let windows: Vec<(String, i64)> = state
            .indexes
            .iter()
            .filter_map(|index| {
                let window = index.expire_after?;
                let field = index.keys.first()?;
                Some((field.clone(), window.as_millis() as i64))
            })
            .collect();

        if windows.is_empty() {
            return 0;
        }

        let now = now.timestamp_millis();
        let before = state.documents.len();
        state.documents.retain(|_, doc| {
            !windows.iter().any(|(field, window)| match doc.get(field) {
                Some(Bson::DateTime(at)) => at.timestamp_millis() + window <= now,
                _ => false,
            })
        });

        let purged = before - state.documents.len();
        if purged > 0 {
            info!("Purged {} expired document(s)", purged);
        }
        purged
    }
}

#[async_trait]
impl DocumentBackend for MemoryBackend {
    async fn find_one(&self, id: ObjectId) -> DatabaseResult<Option<Document>> {
        let state = self.state.lock().await;
        state.check_available()?;
        Ok(state.documents.get(&id).cloned())
    }

    async fn insert_one(&self, mut document: Document) -> DatabaseResult<ObjectId> {
        let mut state = self.state.lock().await;
        state.check_available()?;

        let id = match document.get("_id") {
            Some(Bson::ObjectId(id)) => *id,
            Some(other) => {
                return Err(DatabaseError::UnexpectedResponse(format!(
                    "unsupported _id type: {}",
                    other
                )));
            }
            None => {
                let id = ObjectId::new();
                document.insert("_id", id);
                id
            }
        };

        if state.documents.contains_key(&id) {
            return Err(DatabaseError::Conflict(format!(
                "duplicate key error: _id {}",
                id
            )));
        }

        state.documents.insert(id, document);
        Ok(id)
    }

    async fn update_one(&self, id: ObjectId, fields: Document) -> DatabaseResult<u64> {
        let mut state = self.state.lock().await;
        state.check_available()?;

        match state.documents.get_mut(&id) {
            Some(existing) => {
                for (key, value) in fields {
                    existing.insert(key, value);
                }
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn delete_one(&self, id: ObjectId) -> DatabaseResult<u64> {
        let mut state = self.state.lock().await;
        state.check_available()?;
        Ok(state.documents.remove(&id).map_or(0, |_| 1))
    }

    async fn list_indexes(&self) -> DatabaseResult<Vec<IndexSpec>> {
        let state = self.state.lock().await;
        state.check_available()?;
        Ok(state.indexes.clone())
    }

    async fn create_index(&self, index: IndexSpec) -> DatabaseResult<()> {
        let mut state = self.state.lock().await;
        state.check_available()?;

        // Same keys and options is a no-op, as on the server
        if state.indexes.iter().any(|existing| existing == &index) {
            return Ok(());
        }
        if state.indexes.iter().any(|existing| existing.keys == index.keys) {
            return Err(DatabaseError::Conflict(format!(
                "index with keys {:?} already exists with different options",
                index.keys
            )));
        }

        state.indexes.push(index);
        Ok(())
    }
}
