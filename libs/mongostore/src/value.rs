//! Session payload values.

use std::collections::HashMap;

use mongodb::bson::{Binary, Bson, Document, spec::BinarySubtype};

use crate::error::{SessionError, SessionResult};

/// Session payload: string keys to tagged values.
pub type Values = HashMap<String, SessionValue>;

/// A value stored in a session payload.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
    Map(HashMap<String, SessionValue>),
    List(Vec<SessionValue>),
}

impl SessionValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SessionValue::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SessionValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SessionValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SessionValue::Float(f) => Some(*f),
            SessionValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            SessionValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            SessionValue::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&HashMap<String, SessionValue>> {
        match self {
            SessionValue::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[SessionValue]> {
        match self {
            SessionValue::List(l) => Some(l),
            _ => None,
        }
    }

    /// Convert to BSON, rejecting map keys the store cannot hold.
    pub(crate) fn to_bson(&self) -> SessionResult<Bson> {
        let bson = match self {
            SessionValue::Null => Bson::Null,
            SessionValue::Bool(b) => Bson::Boolean(*b),
            SessionValue::Int(i) => Bson::Int64(*i),
            SessionValue::Float(f) => Bson::Double(*f),
            SessionValue::String(s) => Bson::String(s.clone()),
            SessionValue::Bytes(b) => Bson::Binary(Binary {
                subtype: BinarySubtype::Generic,
                bytes: b.clone(),
            }),
            SessionValue::Map(m) => Bson::Document(values_to_document(m)?),
            SessionValue::List(l) => Bson::Array(
                l.iter()
                    .map(SessionValue::to_bson)
                    .collect::<SessionResult<Vec<_>>>()?,
            ),
        };
        Ok(bson)
    }
}

impl TryFrom<Bson> for SessionValue {
    type Error = SessionError;

    fn try_from(bson: Bson) -> SessionResult<Self> {
        let value = match bson {
            Bson::Null => SessionValue::Null,
            Bson::Boolean(b) => SessionValue::Bool(b),
            Bson::Int32(i) => SessionValue::Int(i as i64),
            Bson::Int64(i) => SessionValue::Int(i),
            Bson::Double(f) => SessionValue::Float(f),
            Bson::String(s) => SessionValue::String(s),
            Bson::Binary(Binary {
                subtype: BinarySubtype::Generic,
                bytes,
            }) => SessionValue::Bytes(bytes),
            Bson::Document(doc) => SessionValue::Map(document_to_values(doc)?),
            Bson::Array(items) => SessionValue::List(
                items
                    .into_iter()
                    .map(SessionValue::try_from)
                    .collect::<SessionResult<Vec<_>>>()?,
            ),
            other => {
                return Err(SessionError::Mapping(format!(
                    "unsupported value type {:?}",
                    other.element_type()
                )));
            }
        };
        Ok(value)
    }
}

impl From<bool> for SessionValue {
    fn from(b: bool) -> Self {
        SessionValue::Bool(b)
    }
}

impl From<i32> for SessionValue {
    fn from(i: i32) -> Self {
        SessionValue::Int(i as i64)
    }
}

impl From<i64> for SessionValue {
    fn from(i: i64) -> Self {
        SessionValue::Int(i)
    }
}

impl From<u32> for SessionValue {
    fn from(i: u32) -> Self {
        SessionValue::Int(i as i64)
    }
}

impl From<f64> for SessionValue {
    fn from(f: f64) -> Self {
        SessionValue::Float(f)
    }
}

impl From<&str> for SessionValue {
    fn from(s: &str) -> Self {
        SessionValue::String(s.to_string())
    }
}

impl From<String> for SessionValue {
    fn from(s: String) -> Self {
        SessionValue::String(s)
    }
}

impl From<Vec<u8>> for SessionValue {
    fn from(b: Vec<u8>) -> Self {
        SessionValue::Bytes(b)
    }
}

impl From<Vec<SessionValue>> for SessionValue {
    fn from(l: Vec<SessionValue>) -> Self {
        SessionValue::List(l)
    }
}

impl From<HashMap<String, SessionValue>> for SessionValue {
    fn from(m: HashMap<String, SessionValue>) -> Self {
        SessionValue::Map(m)
    }
}

impl<T: Into<SessionValue>> From<Option<T>> for SessionValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(SessionValue::Null)
    }
}

/// Keys must survive as MongoDB field names inside a `$set`.
pub(crate) fn check_key(key: &str) -> SessionResult<()> {
    if key.is_empty() {
        return Err(SessionError::Mapping("empty key".to_string()));
    }
    if key.starts_with('$') || key.contains('.') || key.contains('\0') {
        return Err(SessionError::Mapping(format!(
            "key {:?} is not a valid field name",
            key
        )));
    }
    Ok(())
}

pub(crate) fn values_to_document(values: &HashMap<String, SessionValue>) -> SessionResult<Document> {
    let mut doc = Document::new();
    for (key, value) in values {
        check_key(key)?;
        doc.insert(key.clone(), value.to_bson()?);
    }
    Ok(doc)
}

pub(crate) fn document_to_values(doc: Document) -> SessionResult<Values> {
    doc.into_iter()
        .map(|(key, bson)| SessionValue::try_from(bson).map(|value| (key, value)))
        .collect()
}
