//! Session store keeping the session id in a secure cookie and the session
//! payload in MongoDB.
//!
//! The cookie carries only the authenticated (optionally encrypted) record
//! id. Payloads live in one document per session; an expiry index on the
//! `ttl` field lets MongoDB remove abandoned sessions on its own.
//!
//! # Example
//!
//! ```rust,no_run
//! use axum::http::{Request, Response};
//! use common::database::{DatabaseConfig, init_client, session_collection};
//! use mongostore::{Context, MongoBackend, SessionStore, StoreConfig};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let db_config = DatabaseConfig::from_env()?;
//! let client = init_client(&db_config).await?;
//! let backend = MongoBackend::new(session_collection(&client, &db_config));
//!
//! let ctx = Context::background();
//! let store = SessionStore::new(&ctx, backend, StoreConfig::from_env()?).await?;
//!
//! let mut request = Request::new(());
//! let session = store.get(&ctx, &mut request, "session").await?;
//! let mut session = session.lock().await;
//! session.insert("user", "alice");
//!
//! let mut response = Response::new(());
//! store.save(&ctx, &mut response, &mut session).await?;
//! # Ok(())
//! # }
//! ```

pub mod backend;
mod codec;
mod config;
mod context;
mod error;
pub mod record;
mod registry;
mod session;
mod store;
mod ttl;
mod value;

pub use backend::{DocumentBackend, IndexSpec, MemoryBackend, MongoBackend};
pub use codec::{IdentityCodec, SecureCookieCodec};
pub use config::{
    CODEC_MAX_AGE, CookieOptions, DEFAULT_MAX_AGE, KeyPair, MaxAge, StoreConfig, TTL_FIELD,
};
pub use context::Context;
pub use cookie::SameSite;
pub use error::{CodecError, Phase, SessionError, SessionResult};
pub use record::SessionRecord;
pub use registry::{Registry, SharedSession};
pub use session::Session;
pub use store::SessionStore;
pub use ttl::ensure_expiry_index;
pub use value::{SessionValue, Values};
