//! Session lifecycle: cookie in, record lookup, record write, cookie out.

use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderMap, HeaderValue, Request, Response, header::SET_COOKIE};
use axum_extra::extract::cookie::CookieJar;
use mongodb::bson::oid::ObjectId;
use tracing::{debug, info, warn};

use crate::backend::DocumentBackend;
use crate::codec::{IdentityCodec, SecureCookieCodec};
use crate::config::{CODEC_MAX_AGE, CookieOptions, MaxAge, StoreConfig, TTL_FIELD};
use crate::context::Context;
use crate::error::{Phase, SessionError, SessionResult};
use crate::record::{self, SessionRecord};
use crate::registry::{Registry, SharedSession};
use crate::session::Session;
use crate::ttl;

/// Stores sessions in secure cookies and a document backend.
///
/// The cookie only ever carries the encoded record id; the payload stays
/// server side. Cloning is cheap and clones share the backend and codec.
pub struct SessionStore<B, C = SecureCookieCodec> {
    backend: Arc<B>,
    codec: Arc<C>,
    defaults: CookieOptions,
    expiry_window: Duration,
}

impl<B, C> Clone for SessionStore<B, C> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            codec: Arc::clone(&self.codec),
            defaults: self.defaults.clone(),
            expiry_window: self.expiry_window,
        }
    }
}

impl<B: DocumentBackend> SessionStore<B, SecureCookieCodec> {
    /// Create a store using the configured key pairs.
    ///
    /// Keys are given in pairs to allow rotation: the first pair encodes,
    /// every pair is tried when decoding. Encoded values older than
    /// [`CODEC_MAX_AGE`] (or the record window, if longer) are rejected;
    /// younger ones whose record has expired resolve to a new session.
    pub async fn new(ctx: &Context, backend: B, config: StoreConfig) -> SessionResult<Self> {
        let window = config.expiry_window()?;
        let codec_max_age = window.max(Duration::from_secs(CODEC_MAX_AGE));
        let codec =
            SecureCookieCodec::from_pairs(&config.key_pairs)?.with_max_age(Some(codec_max_age));
        Self::with_codec(ctx, backend, codec, config).await
    }
}

impl<B: DocumentBackend, C: IdentityCodec> SessionStore<B, C> {
    /// Create a store with a custom identity codec.
    ///
    /// Ensures the backend's expiry index exists first; the store is not
    /// returned if that fails.
    pub async fn with_codec(
        ctx: &Context,
        backend: B,
        codec: C,
        config: StoreConfig,
    ) -> SessionResult<Self> {
        let expiry_window = config.expiry_window()?;

        ttl::ensure_expiry_index(ctx, &backend, TTL_FIELD, expiry_window)
            .await
            .map_err(|e| SessionError::Setup(Box::new(e)))?;

        Ok(Self {
            backend: Arc::new(backend),
            codec: Arc::new(codec),
            defaults: config.cookie,
            expiry_window,
        })
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }

    /// Cookie options cloned into each new handle.
    pub fn defaults(&self) -> &CookieOptions {
        &self.defaults
    }

    /// Session for `name`, registered on the request so later calls within
    /// the same request return the same handle without decoding again.
    ///
    /// A failed resolution is not registered.
    pub async fn get<Body>(
        &self,
        ctx: &Context,
        request: &mut Request<Body>,
        name: &str,
    ) -> SessionResult<SharedSession> {
        let registry = Registry::for_request(request);
        if let Some(session) = registry.lookup(name).await {
            return Ok(session);
        }

        let session = self.resolve(ctx, request.headers(), name).await?;
        Ok(registry.register(session).await)
    }

    /// Session for `name`, resolved from scratch on every call.
    pub async fn new_session<Body>(
        &self,
        ctx: &Context,
        request: &Request<Body>,
        name: &str,
    ) -> SessionResult<Session> {
        self.resolve(ctx, request.headers(), name).await
    }

    /// Resolve the cookie called `name` in `headers` into a session.
    ///
    /// No cookie, or a cookie whose record is gone, gives a new session. A
    /// cookie that fails to decode is an error.
    pub async fn resolve(&self, ctx: &Context, headers: &HeaderMap, name: &str) -> SessionResult<Session> {
        let mut session = Session::new(name, self.defaults.clone());

        let value = match CookieJar::from_headers(headers).get(name) {
            Some(cookie) if !cookie.value().is_empty() => cookie.value().to_string(),
            _ => {
                debug!("No cookie: {}", name);
                return Ok(session);
            }
        };

        let id = self
            .codec
            .decode(name, &value)
            .map_err(|source| SessionError::Decode {
                name: name.to_string(),
                source,
            })?;
        let oid = parse_id(&id)?;

        match ctx.run(Phase::Find, self.backend.find_one(oid)).await? {
            Some(document) => {
                let record = SessionRecord::from_document(document)?;
                record::from_record(&record, session.values_mut())?;
                session.mark_existing(id);
                debug!("Loaded session: {}", session.id().unwrap_or_default());
            }
            None => info!("No stored session for id {}, starting a new one", id),
        }

        Ok(session)
    }

    /// Write the session to the backend, then set its cookie on `response`.
    ///
    /// | max-age     | new    | existing |
    /// |-------------|--------|----------|
    /// | `ExpireNow` | delete | delete   |
    /// | `Active`    | insert | update   |
    ///
    /// Nothing is added to the response if the backend write fails.
    pub async fn save<Body>(
        &self,
        ctx: &Context,
        response: &mut Response<Body>,
        session: &mut Session,
    ) -> SessionResult<()> {
        let value = self.persist(ctx, session).await?;

        let cookie = session.options().build_cookie(session.name(), value);
        let header = HeaderValue::from_str(&cookie.encoded().to_string()).map_err(|e| {
            SessionError::Encode {
                name: session.name().to_string(),
                reason: e.to_string(),
            }
        })?;
        response.headers_mut().append(SET_COOKIE, header);

        Ok(())
    }

    /// Run the backend write for `session` and return the cookie value.
    async fn persist(&self, ctx: &Context, session: &mut Session) -> SessionResult<String> {
        if session.options().max_age == MaxAge::ExpireNow {
            if let Some(id) = session.id() {
                let oid = parse_id(id)?;
                let deleted = ctx.run(Phase::Delete, self.backend.delete_one(oid)).await?;
                info!("{} session(s) deleted", deleted);
            }
            session.reset();
            return Ok(String::new());
        }

        let record = record::to_record(session.values(), self.expiry_window)?;
        let document = record.to_document()?;

        let id = if session.is_new() {
            let oid = ctx.run(Phase::Insert, self.backend.insert_one(document)).await?;
            let id = oid.to_hex();
            info!("session id: {}, inserted", id);
            session.mark_existing(id.clone());
            id
        } else {
            let id = session
                .id()
                .map(str::to_string)
                .ok_or_else(|| SessionError::MalformedId(String::new()))?;
            let oid = parse_id(&id)?;
            let matched = ctx.run(Phase::Update, self.backend.update_one(oid, document)).await?;
            if matched == 0 {
                warn!("session id: {}, no stored record to update", id);
            } else {
                info!("{} session(s) updated", matched);
            }
            id
        };

        self.codec
            .encode(session.name(), &id)
            .map_err(|e| SessionError::Encode {
                name: session.name().to_string(),
                reason: e.to_string(),
            })
    }
}

fn parse_id(id: &str) -> SessionResult<ObjectId> {
    ObjectId::parse_str(id).map_err(|_| SessionError::MalformedId(id.to_string()))
}
