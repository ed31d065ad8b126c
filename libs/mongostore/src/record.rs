//! Mapping between session payloads and stored session documents.
//!
//! Stored shape:
//!
//! ```text
//! { _id, data: { .. }, modified_at, expires_at, ttl }
//! ```
//!
//! `ttl` and `modified_at` carry the same instant; the expiry index on `ttl`
//! removes the document once `expires_at` has passed.

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use mongodb::bson::{self, Document, oid::ObjectId};
use serde::{Deserialize, Serialize};

use crate::error::{SessionError, SessionResult};
use crate::value::{Values, document_to_values, values_to_document};

/// A session as persisted in the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    #[serde(default)]
    pub data: Document,
    pub modified_at: bson::DateTime,
    pub expires_at: bson::DateTime,
    pub ttl: bson::DateTime,
}

impl SessionRecord {
    pub fn modified_at(&self) -> DateTime<Utc> {
        to_chrono(self.modified_at)
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        to_chrono(self.expires_at)
    }

    /// The document to insert, or the fields to `$set` on update.
    pub fn to_document(&self) -> SessionResult<Document> {
        bson::to_document(self).map_err(|e| SessionError::Mapping(e.to_string()))
    }

    pub fn from_document(document: Document) -> SessionResult<Self> {
        bson::from_document(document).map_err(|e| SessionError::Mapping(e.to_string()))
    }
}

/// Snapshot `values` into a record stamped at the current time.
pub fn to_record(values: &Values, expiry_window: Duration) -> SessionResult<SessionRecord> {
    to_record_at(values, expiry_window, Utc::now())
}

/// Snapshot `values` into a record stamped at `now`.
pub fn to_record_at(
    values: &Values,
    expiry_window: Duration,
    now: DateTime<Utc>,
) -> SessionResult<SessionRecord> {
    let window = chrono::Duration::from_std(expiry_window)
        .map_err(|e| SessionError::Mapping(format!("expiry window out of range: {}", e)))?;

    let stamp = to_bson_datetime(now);
    Ok(SessionRecord {
        id: None,
        data: values_to_document(values)?,
        modified_at: stamp,
        expires_at: to_bson_datetime(now + window),
        ttl: stamp,
    })
}

/// Merge the record's payload into `dest`, overwriting keys on collision.
/// Keys absent from the record are left alone.
pub fn from_record(record: &SessionRecord, dest: &mut Values) -> SessionResult<()> {
    let stored = document_to_values(record.data.clone())?;
    dest.extend(stored);
    Ok(())
}

fn to_bson_datetime(at: DateTime<Utc>) -> bson::DateTime {
    bson::DateTime::from_millis(at.timestamp_millis())
}

fn to_chrono(at: bson::DateTime) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(at.timestamp_millis())
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
