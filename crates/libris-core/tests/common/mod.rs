//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use libris_core::storage::MemoryBackend;
use libris_core::{Config, SessionManager, SessionState, SharedStorage, StorageHandle, UserSnapshot};
use tokio::sync::watch;

/// Unsigned JWT expiring `expires_in_secs` from now (negative for the past).
pub fn token_expiring_in(expires_in_secs: i64, tag: &str) -> String {
    let now = Utc::now().timestamp();
    let claims = serde_json::json!({
        "sub": "1",
        "role": "member",
        "iat": now,
        "exp": now + expires_in_secs,
        "jti": tag,
    });
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{}.{}.sig", header, payload)
}

pub fn user() -> UserSnapshot {
    UserSnapshot {
        id: 1,
        name: "Ada".to_string(),
        email: "a@b.com".to_string(),
        role: "member".to_string(),
        credit_balance: Some(3.0),
    }
}

pub fn user_json() -> serde_json::Value {
    serde_json::to_value(user()).unwrap()
}

pub fn auth_body(token: &str, refresh_token: Option<&str>) -> String {
    let mut body = serde_json::json!({ "token": token, "user": user_json() });
    if let Some(refresh_token) = refresh_token {
        body["refreshToken"] = serde_json::Value::String(refresh_token.to_string());
    }
    body.to_string()
}

pub fn bearer(token: &str) -> String {
    format!("Bearer {}", token)
}

/// Config pointed at a mock server with millisecond backoff.
pub fn test_config(base_url: &str) -> Config {
    Config {
        api_base_url: base_url.to_string(),
        request_timeout_secs: 5,
        retry_base_delay_ms: 1,
        ..Config::default()
    }
}

pub fn shared_storage() -> (Arc<SharedStorage>, Arc<MemoryBackend>) {
    let backend = Arc::new(MemoryBackend::new());
    (SharedStorage::new(backend.clone()), backend)
}

pub fn session(base_url: &str) -> (SessionManager, StorageHandle, Arc<MemoryBackend>) {
    let (shared, backend) = shared_storage();
    let handle = shared.handle();
    let session = SessionManager::new(&test_config(base_url), handle.clone()).unwrap();
    (session, handle, backend)
}

/// Wait until the session state satisfies `predicate`, failing after 5s.
pub async fn wait_for_state(
    rx: &mut watch::Receiver<SessionState>,
    predicate: impl FnMut(&SessionState) -> bool,
) -> SessionState {
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(predicate))
        .await
        .expect("timed out waiting for session state")
        .expect("session dropped")
        .clone()
}

/// Chunked response body that raises `started` once the request has reached
/// the server, then holds the body back for `delay`.
pub fn delayed_body(
    started: Arc<AtomicBool>,
    delay: Duration,
    body: String,
) -> impl Fn(&mut dyn Write) -> io::Result<()> + Send + Sync + 'static {
    move |w| {
        started.store(true, Ordering::SeqCst);
        std::thread::sleep(delay);
        w.write_all(body.as_bytes())
    }
}

/// Wait until `flag` is raised, failing after 5s.
pub async fn wait_for_flag(flag: &AtomicBool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !flag.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("timed out waiting for the server to see the request");
}
