//! Identity codec: authenticates (and optionally encrypts) the session id
//! carried in the cookie.
//!
//! The encoded value is `issued_at|id`, signed with HMAC-SHA256 or sealed
//! with AES-256-GCM by the `cookie` crate. The cookie name is bound into
//! both forms, so a value cannot be replayed under another name.

use std::fmt;
use std::time::Duration;

use chrono::Utc;
use cookie::{Cookie, CookieJar, Key};

use crate::config::KeyPair;
use crate::error::{CodecError, SessionError, SessionResult};

/// Turns a session id into a cookie value and back.
pub trait IdentityCodec: Send + Sync {
    /// Encode `id` for the cookie called `name`.
    fn encode(&self, name: &str, id: &str) -> Result<String, CodecError>;

    /// Recover the id from a cookie value, trying every known key.
    fn decode(&self, name: &str, value: &str) -> Result<String, CodecError>;
}

#[derive(Clone)]
enum CodecKey {
    Signed(Key),
    Private(Key),
}

impl CodecKey {
    fn from_pair(pair: &KeyPair) -> SessionResult<Self> {
        pair.validate()?;
        let key = match &pair.enc {
            Some(enc) => {
                let mut material = pair.auth.clone();
                material.extend_from_slice(enc);
                CodecKey::Private(Key::derive_from(&material))
            }
            None => CodecKey::Signed(Key::derive_from(&pair.auth)),
        };
        Ok(key)
    }

    fn seal(&self, name: &str, payload: String) -> Option<String> {
        let mut jar = CookieJar::new();
        let cookie = Cookie::new(name.to_string(), payload);
        match self {
            CodecKey::Signed(key) => jar.signed_mut(key).add(cookie),
            CodecKey::Private(key) => jar.private_mut(key).add(cookie),
        }
        jar.get(name).map(|c| c.value().to_string())
    }

    fn open(&self, name: &str, value: &str) -> Option<String> {
        let mut jar = CookieJar::new();
        jar.add_original(Cookie::new(name.to_string(), value.to_string()));
        let verified = match self {
            CodecKey::Signed(key) => jar.signed(key).get(name),
            CodecKey::Private(key) => jar.private(key).get(name),
        };
        verified.map(|c| c.value().to_string())
    }
}

/// [`IdentityCodec`] over an ordered list of key pairs. The first pair
/// encodes; every pair is tried when decoding.
#[derive(Clone)]
pub struct SecureCookieCodec {
    keys: Vec<CodecKey>,
    max_age: Option<Duration>,
}

impl fmt::Debug for SecureCookieCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureCookieCodec")
            .field("keys", &self.keys.len())
            .field("max_age", &self.max_age)
            .finish()
    }
}

impl SecureCookieCodec {
    pub fn from_pairs(pairs: &[KeyPair]) -> SessionResult<Self> {
        if pairs.is_empty() {
            return Err(SessionError::Config(
                "at least one key pair is required".to_string(),
            ));
        }
        let keys = pairs
            .iter()
            .map(CodecKey::from_pair)
            .collect::<SessionResult<Vec<_>>>()?;
        Ok(Self {
            keys,
            max_age: None,
        })
    }

    /// Reject values issued longer ago than `max_age`. `None` disables the check.
    pub fn with_max_age(mut self, max_age: Option<Duration>) -> Self {
        self.max_age = max_age;
        self
    }

    pub fn max_age(&self) -> Option<Duration> {
        self.max_age
    }

    fn encode_at(&self, name: &str, id: &str, issued_at: i64) -> Result<String, CodecError> {
        let key = self.keys.first().ok_or(CodecError::NoKeys)?;
        key.seal(name, format!("{}|{}", issued_at, id))
            .ok_or(CodecError::NoKeys)
    }

    fn check_payload(&self, payload: &str) -> Result<String, CodecError> {
        let (issued_at, id) = payload.split_once('|').ok_or(CodecError::Malformed)?;
        let issued_at: i64 = issued_at.parse().map_err(|_| CodecError::Malformed)?;

        if let Some(max_age) = self.max_age {
            let age = Utc::now().timestamp() - issued_at;
            if age > max_age.as_secs() as i64 {
                return Err(CodecError::Expired);
            }
        }

        Ok(id.to_string())
    }
}

impl IdentityCodec for SecureCookieCodec {
    fn encode(&self, name: &str, id: &str) -> Result<String, CodecError> {
        self.encode_at(name, id, Utc::now().timestamp())
    }

    fn decode(&self, name: &str, value: &str) -> Result<String, CodecError> {
        let payload = self
            .keys
            .iter()
            .find_map(|key| key.open(name, value))
            .ok_or(CodecError::Unverified)?;
        self.check_payload(&payload)
    }
}
