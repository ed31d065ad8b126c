//! Store configuration: cookie defaults, codec keys and the expiry window.

use cookie::{
    Cookie, SameSite,
    time::{Duration as CookieDuration, OffsetDateTime},
};
use rand::RngCore;
use std::time::Duration;

use crate::error::{SessionError, SessionResult};

/// Default cookie and expiry window in seconds (1 day).
pub const DEFAULT_MAX_AGE: u32 = 86_400;

/// Oldest cookie value the codec accepts, in seconds (30 days). Kept well
/// beyond the record window so a cookie outliving its record resolves to a
/// new session instead of a decode error.
pub const CODEC_MAX_AGE: u64 = 30 * 86_400;

/// Field watched by the expiry index.
pub const TTL_FIELD: &str = "ttl";

/// Lifetime of a session cookie.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaxAge {
    /// Remove the session now.
    ExpireNow,
    /// Keep the session for this many seconds. Zero emits no `Max-Age`.
    Active(u32),
}

impl MaxAge {
    /// Map the conventional signed form: negative means expire now.
    pub fn from_seconds(seconds: i64) -> Self {
        if seconds < 0 {
            MaxAge::ExpireNow
        } else {
            MaxAge::Active(seconds.min(u32::MAX as i64) as u32)
        }
    }

    /// The conventional signed form, `-1` for [`MaxAge::ExpireNow`].
    pub fn as_seconds(&self) -> i64 {
        match self {
            MaxAge::ExpireNow => -1,
            MaxAge::Active(seconds) => *seconds as i64,
        }
    }

    pub fn is_expire_now(&self) -> bool {
        matches!(self, MaxAge::ExpireNow)
    }
}

impl Default for MaxAge {
    fn default() -> Self {
        MaxAge::Active(DEFAULT_MAX_AGE)
    }
}

/// Cookie attributes applied when a session cookie is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieOptions {
    pub path: String,
    pub domain: Option<String>,
    pub max_age: MaxAge,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: SameSite,
}

impl Default for CookieOptions {
    fn default() -> Self {
        Self {
            path: "/".to_string(),
            domain: None,
            max_age: MaxAge::default(),
            secure: false,
            http_only: true,
            same_site: SameSite::Lax,
        }
    }
}

impl CookieOptions {
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn with_max_age(mut self, max_age: MaxAge) -> Self {
        self.max_age = max_age;
        self
    }

    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    pub fn with_http_only(mut self, http_only: bool) -> Self {
        self.http_only = http_only;
        self
    }

    pub fn with_same_site(mut self, same_site: SameSite) -> Self {
        self.same_site = same_site;
        self
    }

    /// Build the cookie carrying `value` under `name` with these attributes.
    ///
    /// [`MaxAge::ExpireNow`] produces a removal cookie: `Max-Age=0` and an
    /// expiry at the Unix epoch.
    pub fn build_cookie(&self, name: &str, value: String) -> Cookie<'static> {
        let mut builder = Cookie::build((name.to_string(), value))
            .path(self.path.clone())
            .secure(self.secure)
            .http_only(self.http_only)
            .same_site(self.same_site);

        if let Some(domain) = &self.domain {
            builder = builder.domain(domain.clone());
        }

        builder = match self.max_age {
            MaxAge::ExpireNow => builder
                .max_age(CookieDuration::ZERO)
                .expires(OffsetDateTime::UNIX_EPOCH),
            MaxAge::Active(0) => builder,
            MaxAge::Active(seconds) => builder.max_age(CookieDuration::seconds(seconds as i64)),
        };

        builder.build()
    }
}

/// One entry of the codec's rotation list.
///
/// The authentication key is required. With an encryption key the cookie is
/// encrypted as well as authenticated.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyPair {
    pub auth: Vec<u8>,
    pub enc: Option<Vec<u8>>,
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("auth", &format_args!("[{} bytes]", self.auth.len()))
            .field(
                "enc",
                &self.enc.as_ref().map(|k| format!("[{} bytes]", k.len())),
            )
            .finish()
    }
}

impl KeyPair {
    /// A signing-only pair.
    pub fn new(auth: impl Into<Vec<u8>>) -> Self {
        Self {
            auth: auth.into(),
            enc: None,
        }
    }

    /// Add an encryption key. An empty key leaves the pair signing-only.
    pub fn with_encryption(mut self, enc: impl Into<Vec<u8>>) -> Self {
        let enc = enc.into();
        self.enc = if enc.is_empty() { None } else { Some(enc) };
        self
    }

    /// Random 64-byte authentication key and 32-byte encryption key.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let mut auth = vec![0u8; 64];
        let mut enc = vec![0u8; 32];
        rng.fill_bytes(&mut auth);
        rng.fill_bytes(&mut enc);
        Self::new(auth).with_encryption(enc)
    }

    /// Group a flat `auth, enc, auth, enc, ...` list into pairs. The
    /// encryption key of the last pair may be omitted.
    pub fn from_flat(keys: &[&[u8]]) -> Vec<KeyPair> {
        keys.chunks(2)
            .map(|chunk| {
                let pair = KeyPair::new(chunk[0]);
                match chunk.get(1) {
                    Some(enc) => pair.with_encryption(*enc),
                    None => pair,
                }
            })
            .collect()
    }

    pub(crate) fn validate(&self) -> SessionResult<()> {
        if self.auth.len() < 32 {
            return Err(SessionError::Config(format!(
                "authentication key must be at least 32 bytes, got {}",
                self.auth.len()
            )));
        }
        if let Some(enc) = &self.enc {
            if !matches!(enc.len(), 16 | 24 | 32) {
                return Err(SessionError::Config(format!(
                    "encryption key must be 16, 24 or 32 bytes, got {}",
                    enc.len()
                )));
            }
        }
        Ok(())
    }
}

/// Everything a session store needs besides its backend.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Defaults cloned into every session handle. A positive `max_age`
    /// also sets the record window unless `session_ttl` is given.
    pub cookie: CookieOptions,
    /// Codec keys, newest first.
    pub key_pairs: Vec<KeyPair>,
    /// Seconds a stored record outlives its last save.
    pub session_ttl: Option<u32>,
}

impl StoreConfig {
    pub fn new(cookie: CookieOptions, key_pairs: Vec<KeyPair>) -> Self {
        Self {
            cookie,
            key_pairs,
            session_ttl: None,
        }
    }

    /// Record window independent of the cookie max-age.
    pub fn with_session_ttl(mut self, seconds: u32) -> Self {
        self.session_ttl = Some(seconds);
        self
    }

    /// Create a new StoreConfig from environment variables
    ///
    /// # Environment Variables
    /// - `SESSION_AUTH_KEY`: Authentication key (required, at least 32 bytes)
    /// - `SESSION_ENC_KEY`: Encryption key (optional, 16, 24 or 32 bytes)
    /// - `SESSION_PREVIOUS_AUTH_KEY` / `SESSION_PREVIOUS_ENC_KEY`: Key pair still accepted when decoding
    /// - `SESSION_MAX_AGE`: Cookie max-age in seconds, 0 for none (default: 86400)
    /// - `SESSION_TTL`: Record window in seconds (default: the max-age, or 86400 when that is 0)
    /// - `SESSION_COOKIE_PATH`: Cookie path (default: "/")
    /// - `SESSION_COOKIE_DOMAIN`: Cookie domain (default: unset)
    /// - `SESSION_COOKIE_SECURE`: Secure flag (default: false)
    /// - `SESSION_COOKIE_HTTP_ONLY`: HttpOnly flag (default: true)
    /// - `SESSION_COOKIE_SAME_SITE`: strict, lax or none (default: lax)
    pub fn from_env() -> SessionResult<Self> {
        let auth_key = std::env::var("SESSION_AUTH_KEY").map_err(|_| {
            SessionError::Config("SESSION_AUTH_KEY environment variable not set".to_string())
        })?;
        let enc_key = std::env::var("SESSION_ENC_KEY").unwrap_or_default();

        let mut key_pairs = vec![KeyPair::new(auth_key).with_encryption(enc_key)];

        if let Ok(previous_auth) = std::env::var("SESSION_PREVIOUS_AUTH_KEY") {
            let previous_enc = std::env::var("SESSION_PREVIOUS_ENC_KEY").unwrap_or_default();
            key_pairs.push(KeyPair::new(previous_auth).with_encryption(previous_enc));
        }

        let max_age = std::env::var("SESSION_MAX_AGE")
            .unwrap_or_else(|_| DEFAULT_MAX_AGE.to_string())
            .parse()
            .unwrap_or(DEFAULT_MAX_AGE as i64);

        let path = std::env::var("SESSION_COOKIE_PATH").unwrap_or_else(|_| "/".to_string());
        let domain = std::env::var("SESSION_COOKIE_DOMAIN")
            .ok()
            .filter(|d| !d.is_empty());

        let secure = std::env::var("SESSION_COOKIE_SECURE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(false);

        let http_only = std::env::var("SESSION_COOKIE_HTTP_ONLY")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(true);

        let same_site = match std::env::var("SESSION_COOKIE_SAME_SITE") {
            Ok(value) => parse_same_site(&value)?,
            Err(_) => SameSite::Lax,
        };

        let cookie = CookieOptions {
            path,
            domain,
            max_age: MaxAge::from_seconds(max_age),
            secure,
            http_only,
            same_site,
        };

        let session_ttl = std::env::var("SESSION_TTL")
            .ok()
            .and_then(|s| s.parse().ok());

        Ok(Self {
            cookie,
            key_pairs,
            session_ttl,
        })
    }

    /// Expiry window of stored records.
    ///
    /// An explicit `session_ttl` wins. Otherwise a positive cookie max-age is
    /// used, and a cookie without `Max-Age` falls back to [`DEFAULT_MAX_AGE`].
    pub(crate) fn expiry_window(&self) -> SessionResult<Duration> {
        let seconds = match (self.session_ttl, self.cookie.max_age) {
            (Some(0), _) => {
                return Err(SessionError::Config(
                    "session ttl must be a positive number of seconds".to_string(),
                ));
            }
            (Some(ttl), _) => ttl,
            (None, MaxAge::ExpireNow) => {
                return Err(SessionError::Config(
                    "default max-age cannot expire sessions immediately".to_string(),
                ));
            }
            (None, MaxAge::Active(0)) => DEFAULT_MAX_AGE,
            (None, MaxAge::Active(seconds)) => seconds,
        };
        Ok(Duration::from_secs(seconds as u64))
    }
}

fn parse_same_site(value: &str) -> SessionResult<SameSite> {
    match value.to_ascii_lowercase().as_str() {
        "strict" => Ok(SameSite::Strict),
        "lax" => Ok(SameSite::Lax),
        "none" => Ok(SameSite::None),
        other => Err(SessionError::Config(format!(
            "unknown same-site policy: {}",
            other
        ))),
    }
}
