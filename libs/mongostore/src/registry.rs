//! Per-request session registry.
//!
//! Lives in the request extensions so repeated `get` calls for the same
//! name within one request share one handle.

use std::collections::HashMap;
use std::sync::Arc;

use axum::http::{Request, Response};
use tokio::sync::Mutex;
use tracing::debug;

use crate::backend::DocumentBackend;
use crate::codec::IdentityCodec;
use crate::context::Context;
use crate::error::SessionResult;
use crate::session::Session;
use crate::store::SessionStore;

/// A session handle shared by everything handling one request.
pub type SharedSession = Arc<Mutex<Session>>;

/// Sessions resolved so far for one request, by cookie name.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    sessions: Arc<Mutex<HashMap<String, SharedSession>>>,
}

impl Registry {
    /// The request's registry, attaching an empty one on first use.
    pub fn for_request<B>(request: &mut Request<B>) -> Registry {
        if let Some(registry) = request.extensions().get::<Registry>() {
            return registry.clone();
        }
        let registry = Registry::default();
        request.extensions_mut().insert(registry.clone());
        registry
    }

    /// The request's registry, if one was attached.
    pub fn from_request<B>(request: &Request<B>) -> Option<Registry> {
        request.extensions().get::<Registry>().cloned()
    }

    pub async fn lookup(&self, name: &str) -> Option<SharedSession> {
        self.sessions.lock().await.get(name).cloned()
    }

    /// Register `session` under its name. If another handle got there
    /// first, that one wins and is returned.
    pub async fn register(&self, session: Session) -> SharedSession {
        let mut sessions = self.sessions.lock().await;
        sessions
            .entry(session.name().to_string())
            .or_insert_with(|| Arc::new(Mutex::new(session)))
            .clone()
    }

    pub async fn names(&self) -> Vec<String> {
        self.sessions.lock().await.keys().cloned().collect()
    }

    /// Save every registered session into `response`, stopping at the
    /// first failure.
    pub async fn save_all<Bk, C, Body>(
        &self,
        ctx: &Context,
        store: &SessionStore<Bk, C>,
        response: &mut Response<Body>,
    ) -> SessionResult<()>
    where
        Bk: DocumentBackend,
        C: IdentityCodec,
    {
        let sessions: Vec<SharedSession> = self.sessions.lock().await.values().cloned().collect();
        debug!("Saving {} registered session(s)", sessions.len());

        for shared in sessions {
            let mut session = shared.lock().await;
            store.save(ctx, response, &mut session).await?;
        }
        Ok(())
    }
}
