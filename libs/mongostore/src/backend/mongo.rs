//! MongoDB collection backend.

use async_trait::async_trait;
use common::error::{DatabaseError, DatabaseResult};
use mongodb::{
    Collection, Database, IndexModel,
    bson::{Bson, Document, doc, oid::ObjectId},
    options::IndexOptions,
};
use tracing::debug;

use super::{DocumentBackend, IndexSpec};

/// Session records kept in a MongoDB collection.
#[derive(Clone, Debug)]
pub struct MongoBackend {
    collection: Collection<Document>,
}

impl MongoBackend {
    pub fn new(collection: Collection<Document>) -> Self {
        Self { collection }
    }

    pub fn from_database(database: &Database, collection: &str) -> Self {
        Self::new(database.collection::<Document>(collection))
    }

    pub fn collection(&self) -> &Collection<Document> {
        &self.collection
    }
}

#[async_trait]
impl DocumentBackend for MongoBackend {
    async fn find_one(&self, id: ObjectId) -> DatabaseResult<Option<Document>> {
        self.collection
            .find_one(doc! { "_id": id })
            .await
            .map_err(DatabaseError::Query)
    }

    async fn insert_one(&self, document: Document) -> DatabaseResult<ObjectId> {
        let result = self
            .collection
            .insert_one(document)
            .await
            .map_err(DatabaseError::Query)?;

        match result.inserted_id {
            Bson::ObjectId(id) => Ok(id),
            other => Err(DatabaseError::UnexpectedResponse(format!(
                "inserted id is not an ObjectId: {}",
                other
            ))),
        }
    }

    async fn update_one(&self, id: ObjectId, fields: Document) -> DatabaseResult<u64> {
        let result = self
            .collection
            .update_one(doc! { "_id": id }, doc! { "$set": fields })
            .await
            .map_err(DatabaseError::Query)?;
        Ok(result.matched_count)
    }

    async fn delete_one(&self, id: ObjectId) -> DatabaseResult<u64> {
        let result = self
            .collection
            .delete_one(doc! { "_id": id })
            .await
            .map_err(DatabaseError::Query)?;
        Ok(result.deleted_count)
    }

    async fn list_indexes(&self) -> DatabaseResult<Vec<IndexSpec>> {
        let mut cursor = self
            .collection
            .list_indexes()
            .await
            .map_err(DatabaseError::Query)?;

        let mut indexes = Vec::new();
        while cursor.advance().await.map_err(DatabaseError::Query)? {
            let model: IndexModel = cursor.deserialize_current().map_err(DatabaseError::Query)?;
            let options = model.options.unwrap_or_default();
            indexes.push(IndexSpec {
                name: options.name,
                keys: model.keys.keys().cloned().collect(),
                sparse: options.sparse.unwrap_or(false),
                expire_after: options.expire_after,
            });
        }

        debug!("Listed {} index(es)", indexes.len());
        Ok(indexes)
    }

    async fn create_index(&self, index: IndexSpec) -> DatabaseResult<()> {
        let mut keys = Document::new();
        for key in &index.keys {
            keys.insert(key.clone(), 1);
        }

        let mut options = IndexOptions::default();
        options.name = index.name;
        options.sparse = Some(index.sparse);
        options.expire_after = index.expire_after;

        let model = IndexModel::builder().keys(keys).options(options).build();
        self.collection
            .create_index(model)
            .await
            .map_err(DatabaseError::Query)?;
        Ok(())
    }
}
