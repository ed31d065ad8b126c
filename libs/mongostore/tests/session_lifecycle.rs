//! Lifecycle tests for the session store
//!
//! These tests drive the store through whole request/response cycles
//! against the in-memory backend.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::http::{
    Request, Response,
    header::{COOKIE, SET_COOKIE},
};
use chrono::Utc;
use mongodb::bson::oid::ObjectId;
use mongostore::{
    Context, CookieOptions, KeyPair, MaxAge, MemoryBackend, Phase, Registry, SameSite,
    SessionError, SessionStore, SessionValue, StoreConfig,
};
use serde_json::json;

const NAME: &str = "test-session";

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn cookie_defaults() -> CookieOptions {
    CookieOptions::default()
        .with_max_age(MaxAge::Active(240))
        .with_same_site(SameSite::Strict)
}

async fn store_with_keys(
    backend: &MemoryBackend,
    key_pairs: Vec<KeyPair>,
) -> Result<SessionStore<MemoryBackend>> {
    init_tracing();
    let config = StoreConfig::new(cookie_defaults(), key_pairs);
    Ok(SessionStore::new(&Context::background(), backend.clone(), config).await?)
}

async fn store(backend: &MemoryBackend) -> Result<SessionStore<MemoryBackend>> {
    store_with_keys(backend, vec![KeyPair::generate()]).await
}

fn set_cookie_headers<B>(response: &Response<B>) -> Vec<String> {
    response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .map(|v| v.to_str().unwrap().to_string())
        .collect()
}

/// A fresh request carrying the `name=value` part of a Set-Cookie header.
fn request_with(set_cookie: &str) -> Request<()> {
    let pair = set_cookie.split(';').next().unwrap();
    Request::builder()
        .uri("http://localhost:8080/")
        .header(COOKIE, pair)
        .body(())
        .unwrap()
}

fn empty_request() -> Request<()> {
    Request::builder()
        .uri("http://localhost:8080/")
        .body(())
        .unwrap()
}

/// Change one alphanumeric character of the cookie value, staying clear of
/// percent-escapes so the header still parses.
fn tamper(set_cookie: &str) -> String {
    let pair = set_cookie.split(';').next().unwrap();
    let (name, value) = pair.split_once('=').unwrap();
    let mut chars: Vec<char> = value.chars().collect();
    let i = (chars.len() / 2..chars.len())
        .find(|&i| {
            chars[i].is_ascii_alphanumeric()
                && chars[i - 1] != '%'
                && chars[i - 2] != '%'
        })
        .unwrap();
    chars[i] = if chars[i] == 'A' { 'B' } else { 'A' };
    format!("{}={}", name, chars.into_iter().collect::<String>())
}

/// Insert a session holding `k = v` and return its Set-Cookie header.
async fn saved_session(store: &SessionStore<MemoryBackend>) -> Result<String> {
    let ctx = Context::background();
    let mut session = store.new_session(&ctx, &empty_request(), NAME).await?;
    session.insert("k", "v");

    let mut response = Response::new(());
    store.save(&ctx, &mut response, &mut session).await?;
    Ok(set_cookie_headers(&response).remove(0))
}

#[tokio::test]
async fn test_new_without_cookie_is_new_and_empty() -> Result<()> {
    let backend = MemoryBackend::new();
    let store = store(&backend).await?;
    let ctx = Context::background();

    for _ in 0..3 {
        let session = store.new_session(&ctx, &empty_request(), NAME).await?;
        assert!(session.is_new());
        assert!(session.values().is_empty());
        assert_eq!(session.id(), None);
    }

    Ok(())
}

#[tokio::test]
async fn test_full_lifecycle() -> Result<()> {
    let backend = MemoryBackend::new();
    let store = store(&backend).await?;
    let ctx = Context::background();

    // No cookie: new, empty session
    let mut request = empty_request();
    let shared = store.get(&ctx, &mut request, "s").await?;
    let mut session = shared.lock().await;
    assert!(session.is_new());
    assert!(session.values().is_empty());

    // Insert
    session.insert("k", "v");
    let mut response = Response::new(());
    store.save(&ctx, &mut response, &mut session).await?;

    let cookies = set_cookie_headers(&response);
    assert_eq!(cookies.len(), 1);
    assert!(cookies[0].starts_with("s="));
    assert!(cookies[0].contains("Max-Age=240"));
    assert!(cookies[0].contains("HttpOnly"));
    assert!(cookies[0].contains("SameSite=Strict"));
    assert_eq!(backend.len().await, 1);

    let oid = ObjectId::parse_str(session.id().unwrap())?;
    let stored = backend.document(&oid).await.unwrap();
    assert_eq!(stored.get_document("data")?.get_str("k")?, "v");

    // The payload never travels in the cookie
    assert!(!cookies[0].contains("\"v\""));
    assert!(!cookies[0].contains(session.id().unwrap()));
    drop(session);

    // Existing session
    let mut request = request_with(&cookies[0]);
    let shared = store.get(&ctx, &mut request, "s").await?;
    let mut session = shared.lock().await;
    assert!(!session.is_new());
    assert_eq!(session.get("k"), Some(&SessionValue::from("v")));

    // Expire
    session.options_mut().max_age = MaxAge::ExpireNow;
    let mut response = Response::new(());
    store.save(&ctx, &mut response, &mut session).await?;

    assert!(backend.document(&oid).await.is_none());
    assert!(backend.is_empty().await);
    let cookies = set_cookie_headers(&response);
    assert_eq!(cookies.len(), 1);
    assert!(cookies[0].contains("Max-Age=0"));

    Ok(())
}

#[tokio::test]
async fn test_roundtrip_preserves_payload() -> Result<()> {
    let backend = MemoryBackend::new();
    let store = store(&backend).await?;
    let ctx = Context::background();

    let mut session = store.new_session(&ctx, &empty_request(), NAME).await?;
    session.insert("user", 42);
    session.insert("admin", false);
    session.insert("ratio", 0.75);
    session.insert("raw", vec![1u8, 2, 3]);
    session.insert_serialized("prefs", &json!({ "theme": "dark", "tabs": ["a", "b"] }))?;
    let expected = session.values().clone();

    let mut response = Response::new(());
    store.save(&ctx, &mut response, &mut session).await?;

    let request = request_with(&set_cookie_headers(&response)[0]);
    let loaded = store.new_session(&ctx, &request, NAME).await?;
    assert!(!loaded.is_new());
    assert_eq!(loaded.values(), &expected);
    assert_eq!(
        loaded.get_as::<serde_json::Value>("prefs")?,
        Some(json!({ "theme": "dark", "tabs": ["a", "b"] }))
    );

    Ok(())
}

#[tokio::test]
async fn test_update_replaces_payload_and_honours_custom_max_age() -> Result<()> {
    let backend = MemoryBackend::new();
    let store = store(&backend).await?;
    let ctx = Context::background();

    let cookie = saved_session(&store).await?;

    let request = request_with(&cookie);
    let mut session = store.new_session(&ctx, &request, NAME).await?;
    session.remove("k");
    session.insert("other", "value");
    session.options_mut().max_age = MaxAge::Active(7357);

    let mut response = Response::new(());
    store.save(&ctx, &mut response, &mut session).await?;

    let cookies = set_cookie_headers(&response);
    assert_eq!(cookies.len(), 1);
    assert!(cookies[0].contains("Max-Age=7357"));
    assert_eq!(backend.len().await, 1);

    // The store defaults are untouched by the handle's change
    assert_eq!(store.defaults().max_age, MaxAge::Active(240));

    let oid = ObjectId::parse_str(session.id().unwrap())?;
    let stored = backend.document(&oid).await.unwrap();
    let data = stored.get_document("data")?;
    assert!(!data.contains_key("k"));
    assert_eq!(data.get_str("other")?, "value");

    Ok(())
}

#[tokio::test]
async fn test_stored_timestamps() -> Result<()> {
    let backend = MemoryBackend::new();
    let store = store(&backend).await?;

    let before = Utc::now().timestamp_millis();
    let cookie = saved_session(&store).await?;
    let after = Utc::now().timestamp_millis();

    let session = store
        .new_session(&Context::background(), &request_with(&cookie), NAME)
        .await?;
    let oid = ObjectId::parse_str(session.id().unwrap())?;
    let stored = backend.document(&oid).await.unwrap();

    let modified = stored.get_datetime("modified_at")?.timestamp_millis();
    let ttl = stored.get_datetime("ttl")?.timestamp_millis();
    let expires = stored.get_datetime("expires_at")?.timestamp_millis();

    assert_eq!(modified, ttl);
    assert!(before <= modified && modified <= after);
    assert_eq!(expires, ttl + 240_000);

    Ok(())
}

#[tokio::test]
async fn test_stale_cookie_gives_new_session() -> Result<()> {
    let backend = MemoryBackend::new();
    let store = store(&backend).await?;
    let ctx = Context::background();

    let cookie = saved_session(&store).await?;
    let session = store.new_session(&ctx, &request_with(&cookie), NAME).await?;
    let oid = ObjectId::parse_str(session.id().unwrap())?;
    assert!(backend.remove(&oid).await);

    let session = store.new_session(&ctx, &request_with(&cookie), NAME).await?;
    assert!(session.is_new());
    assert!(session.values().is_empty());
    assert_eq!(session.id(), None);

    Ok(())
}

#[tokio::test]
async fn test_ttl_purge_makes_cookie_stale() -> Result<()> {
    let backend = MemoryBackend::new();
    let store = store(&backend).await?;

    let cookie = saved_session(&store).await?;
    assert_eq!(backend.purge_expired(Utc::now()).await, 0);

    let later = Utc::now() + chrono::Duration::seconds(241);
    assert_eq!(backend.purge_expired(later).await, 1);

    let session = store
        .new_session(&Context::background(), &request_with(&cookie), NAME)
        .await?;
    assert!(session.is_new());

    Ok(())
}

#[tokio::test]
async fn test_cookie_outliving_its_record_gives_new_session() -> Result<()> {
    init_tracing();
    let backend = MemoryBackend::new();
    let config = StoreConfig::new(
        CookieOptions::default().with_max_age(MaxAge::Active(1)),
        vec![KeyPair::generate()],
    );
    let store = SessionStore::new(&Context::background(), backend.clone(), config).await?;
    let ctx = Context::background();

    // Cookie lifetimes shorter than, equal to and longer than the record's
    let mut cookies = Vec::new();
    for max_age in [MaxAge::Active(0), MaxAge::Active(1), MaxAge::Active(3600)] {
        let mut session = store.new_session(&ctx, &empty_request(), NAME).await?;
        session.insert("k", "v");
        session.options_mut().max_age = max_age;

        let mut response = Response::new(());
        store.save(&ctx, &mut response, &mut session).await?;
        cookies.push(set_cookie_headers(&response).remove(0));
    }

    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert_eq!(backend.purge_expired(Utc::now()).await, 3);

    for cookie in &cookies {
        let session = store.new_session(&ctx, &request_with(cookie), NAME).await?;
        assert!(session.is_new());
        assert!(session.values().is_empty());
        assert_eq!(session.id(), None);
    }

    Ok(())
}

#[tokio::test]
async fn test_expire_without_record_is_not_an_error() -> Result<()> {
    let backend = MemoryBackend::new();
    let store = store(&backend).await?;
    let ctx = Context::background();

    // Never saved
    let mut session = store.new_session(&ctx, &empty_request(), NAME).await?;
    session.expire();
    let mut response = Response::new(());
    store.save(&ctx, &mut response, &mut session).await?;
    assert_eq!(set_cookie_headers(&response).len(), 1);

    // Saved, then removed behind the store's back
    let cookie = saved_session(&store).await?;
    let mut session = store.new_session(&ctx, &request_with(&cookie), NAME).await?;
    let oid = ObjectId::parse_str(session.id().unwrap())?;
    backend.remove(&oid).await;

    session.expire();
    store.save(&ctx, &mut Response::new(()), &mut session).await?;
    assert!(backend.is_empty().await);

    Ok(())
}

#[tokio::test]
async fn test_tampered_cookie_is_rejected() -> Result<()> {
    let backend = MemoryBackend::new();
    let store = store(&backend).await?;
    let ctx = Context::background();

    let cookie = saved_session(&store).await?;
    let tampered = Request::builder()
        .header(COOKIE, tamper(&cookie))
        .body(())?;

    let err = store.new_session(&ctx, &tampered, NAME).await.unwrap_err();
    assert!(matches!(err, SessionError::Decode { .. }));

    let mut tampered = tampered;
    let err = store.get(&ctx, &mut tampered, NAME).await.unwrap_err();
    assert!(matches!(err, SessionError::Decode { .. }));

    // Failed resolutions are not registered
    let registry = Registry::from_request(&tampered).unwrap();
    assert!(registry.lookup(NAME).await.is_none());

    Ok(())
}

#[tokio::test]
async fn test_cookie_from_unknown_keys_is_rejected() -> Result<()> {
    let backend = MemoryBackend::new();
    let issuer = store(&backend).await?;
    let verifier = store(&backend).await?;

    let cookie = saved_session(&issuer).await?;
    let err = verifier
        .new_session(&Context::background(), &request_with(&cookie), NAME)
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::Decode { .. }));

    Ok(())
}

#[tokio::test]
async fn test_rotated_keys_keep_sessions_alive() -> Result<()> {
    let backend = MemoryBackend::new();
    let old_pair = KeyPair::generate();
    let old_store = store_with_keys(&backend, vec![old_pair.clone()]).await?;

    let cookie = saved_session(&old_store).await?;

    let rotated = store_with_keys(&backend, vec![KeyPair::generate(), old_pair]).await?;
    let session = rotated
        .new_session(&Context::background(), &request_with(&cookie), NAME)
        .await?;
    assert!(!session.is_new());
    assert_eq!(session.get("k").and_then(SessionValue::as_str), Some("v"));

    Ok(())
}

#[tokio::test]
async fn test_signing_only_keys() -> Result<()> {
    let backend = MemoryBackend::new();
    let store = store_with_keys(&backend, vec![KeyPair::new(vec![7u8; 64])]).await?;

    let cookie = saved_session(&store).await?;
    let session = store
        .new_session(&Context::background(), &request_with(&cookie), NAME)
        .await?;
    assert!(!session.is_new());

    let err = store
        .new_session(
            &Context::background(),
            &Request::builder().header(COOKIE, tamper(&cookie)).body(())?,
            NAME,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::Decode { .. }));

    Ok(())
}

#[tokio::test]
async fn test_get_reuses_handle_within_request() -> Result<()> {
    let backend = MemoryBackend::new();
    let store = store(&backend).await?;
    let ctx = Context::background();

    let cookie = saved_session(&store).await?;
    let mut request = request_with(&cookie);

    let first = store.get(&ctx, &mut request, NAME).await?;
    first.lock().await.insert("touched", true);

    let second = store.get(&ctx, &mut request, NAME).await?;
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(
        second.lock().await.get("touched"),
        Some(&SessionValue::Bool(true))
    );

    // A different name is a different handle
    let other = store.get(&ctx, &mut request, "other").await?;
    assert!(!Arc::ptr_eq(&first, &other));
    assert!(other.lock().await.is_new());

    // `new_session` ignores the registry and starts from the stored state
    let fresh = store.new_session(&ctx, &request, NAME).await?;
    assert!(!fresh.is_new());
    assert_eq!(fresh.get("touched"), None);

    Ok(())
}

#[tokio::test]
async fn test_new_session_is_idempotent() -> Result<()> {
    let backend = MemoryBackend::new();
    let store = store(&backend).await?;
    let ctx = Context::background();

    let cookie = saved_session(&store).await?;
    let request = request_with(&cookie);

    let a = store.new_session(&ctx, &request, NAME).await?;
    let b = store.new_session(&ctx, &request, NAME).await?;
    assert_eq!(a.id(), b.id());
    assert_eq!(a.values(), b.values());
    assert_eq!(a.is_new(), b.is_new());

    Ok(())
}

#[tokio::test]
async fn test_registry_save_all() -> Result<()> {
    let backend = MemoryBackend::new();
    let store = store(&backend).await?;
    let ctx = Context::background();

    let mut request = empty_request();
    for name in ["a", "b"] {
        let shared = store.get(&ctx, &mut request, name).await?;
        shared.lock().await.insert("name", name);
    }

    let registry = Registry::from_request(&request).unwrap();
    let mut response = Response::new(());
    registry.save_all(&ctx, &store, &mut response).await?;

    assert_eq!(set_cookie_headers(&response).len(), 2);
    assert_eq!(backend.len().await, 2);

    Ok(())
}

#[tokio::test]
async fn test_backend_failure_on_save_sets_no_cookie() -> Result<()> {
    let backend = MemoryBackend::new();
    let store = store(&backend).await?;
    let ctx = Context::background();

    let mut session = store.new_session(&ctx, &empty_request(), NAME).await?;
    session.insert("k", "v");

    backend.set_unavailable(Some("primary stepped down")).await;
    let mut response = Response::new(());
    let err = store.save(&ctx, &mut response, &mut session).await.unwrap_err();

    assert!(matches!(
        err,
        SessionError::Backend {
            phase: Phase::Insert,
            ..
        }
    ));
    assert!(set_cookie_headers(&response).is_empty());
    assert!(session.is_new());
    assert_eq!(session.id(), None);

    Ok(())
}

#[tokio::test]
async fn test_backend_failure_on_lookup_is_an_error() -> Result<()> {
    let backend = MemoryBackend::new();
    let store = store(&backend).await?;
    let cookie = saved_session(&store).await?;

    backend.set_unavailable(Some("network partition")).await;
    let err = store
        .new_session(&Context::background(), &request_with(&cookie), NAME)
        .await
        .unwrap_err();
    assert_eq!(err.phase(), Some(Phase::Find));

    Ok(())
}

#[tokio::test]
async fn test_cancelled_context_fails_every_backend_call() -> Result<()> {
    let backend = MemoryBackend::new();
    let store = store(&backend).await?;
    let cookie = saved_session(&store).await?;

    let ctx = Context::background();
    ctx.cancel();

    let err = store
        .new_session(&ctx, &request_with(&cookie), NAME)
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::Cancelled { phase: Phase::Find }));

    let mut session = store
        .new_session(&Context::background(), &empty_request(), NAME)
        .await?;
    let mut response = Response::new(());
    let err = store.save(&ctx, &mut response, &mut session).await.unwrap_err();
    assert!(matches!(err, SessionError::Cancelled { phase: Phase::Insert }));
    assert!(set_cookie_headers(&response).is_empty());

    // Without a cookie there is no backend call to cancel
    let session = store.new_session(&ctx, &empty_request(), NAME).await?;
    assert!(session.is_new());

    let config = StoreConfig::new(cookie_defaults(), vec![KeyPair::generate()]);
    let result = SessionStore::new(&ctx, MemoryBackend::new(), config).await;
    assert!(matches!(result, Err(SessionError::Setup(_))));

    Ok(())
}

#[tokio::test]
async fn test_store_construction_keeps_single_expiry_index() -> Result<()> {
    let backend = MemoryBackend::new();
    store(&backend).await?;
    store(&backend).await?;

    let indexes = backend.indexes().await;
    let expiring: Vec<_> = indexes.iter().filter(|i| i.covers("ttl")).collect();
    assert_eq!(expiring.len(), 1);
    assert!(expiring[0].sparse);
    assert_eq!(expiring[0].expire_after, Some(Duration::from_secs(240)));

    // Recreated after the indexes are dropped
    backend.drop_indexes().await;
    store(&backend).await?;
    assert_eq!(
        backend
            .indexes()
            .await
            .iter()
            .filter(|i| i.covers("ttl"))
            .count(),
        1
    );

    Ok(())
}

#[tokio::test]
async fn test_invalid_payload_key_fails_save() -> Result<()> {
    let backend = MemoryBackend::new();
    let store = store(&backend).await?;
    let ctx = Context::background();

    let mut session = store.new_session(&ctx, &empty_request(), NAME).await?;
    session.insert("a.b", 1);

    let mut response = Response::new(());
    let err = store.save(&ctx, &mut response, &mut session).await.unwrap_err();
    assert!(matches!(err, SessionError::Mapping(_)));
    assert!(set_cookie_headers(&response).is_empty());
    assert!(backend.is_empty().await);

    Ok(())
}
