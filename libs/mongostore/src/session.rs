//! Request-scoped session handle.

use mongodb::bson::{self, Bson};
use serde::{Serialize, de::DeserializeOwned};

use crate::config::{CookieOptions, MaxAge};
use crate::error::{SessionError, SessionResult};
use crate::value::{SessionValue, Values};

/// A session as seen by one request.
///
/// Starts out new with an empty payload; becomes existing once its record
/// has been found or inserted. The cookie options are a private copy of the
/// store defaults and may be changed before saving.
#[derive(Debug, Clone)]
pub struct Session {
    id: Option<String>,
    name: String,
    values: Values,
    is_new: bool,
    options: CookieOptions,
}

impl Session {
    pub fn new(name: impl Into<String>, options: CookieOptions) -> Self {
        Self {
            id: None,
            name: name.into(),
            values: Values::new(),
            is_new: true,
            options,
        }
    }

    /// Hex id of the stored record, once there is one.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Cookie name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_new(&self) -> bool {
        self.is_new
    }

    pub fn options(&self) -> &CookieOptions {
        &self.options
    }

    pub fn options_mut(&mut self) -> &mut CookieOptions {
        &mut self.options
    }

    /// Mark the session for deletion on the next save.
    pub fn expire(&mut self) {
        self.options.max_age = MaxAge::ExpireNow;
    }

    pub fn values(&self) -> &Values {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut Values {
        &mut self.values
    }

    pub fn get(&self, key: &str) -> Option<&SessionValue> {
        self.values.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<SessionValue>) -> Option<SessionValue> {
        self.values.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<SessionValue> {
        self.values.remove(key)
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    /// Store any serializable value under `key`.
    pub fn insert_serialized<T: Serialize>(&mut self, key: impl Into<String>, value: &T) -> SessionResult<()> {
        let bson = bson::to_bson(value).map_err(|e| SessionError::Mapping(e.to_string()))?;
        self.values.insert(key.into(), SessionValue::try_from(bson)?);
        Ok(())
    }

    /// Read the value under `key` back into `T`.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> SessionResult<Option<T>> {
        let Some(value) = self.values.get(key) else {
            return Ok(None);
        };
        let bson: Bson = value.to_bson()?;
        bson::from_bson(bson)
            .map(Some)
            .map_err(|e| SessionError::Mapping(e.to_string()))
    }

    pub(crate) fn mark_existing(&mut self, id: String) {
        self.id = Some(id);
        self.is_new = false;
    }

    pub(crate) fn reset(&mut self) {
        self.id = None;
        self.is_new = true;
    }
}
