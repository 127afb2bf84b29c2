//! API client: the single chokepoint for every call to the backend.
//!
//! Each request is classified public or protected, gets a bearer token when
//! protected, and has its failures handled in one place:
//! - 401 on a protected call awaits the shared renewal flight and replays once
//! - 403 is announced as access-denied and never retried
//! - 5xx, 408 and send failures are retried with jittered exponential backoff

use std::sync::Arc;

use reqwest::{Client, Method, Response, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::endpoints::EndpointKind;
use super::renewal::{RenewalError, RenewedSession, TokenRenewer};
use super::retry::RetryPolicy;
use super::ApiError;
use crate::auth::CredentialStore;
use crate::config::Config;
use crate::events::EventBus;
use crate::models::LogoutRequest;

/// API client for the libris backend.
/// Clone is cheap - reqwest::Client and the renewer are reference counted.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: Arc<str>,
    credentials: CredentialStore,
    renewer: Arc<TokenRenewer>,
    events: EventBus,
    retry: RetryPolicy,
}

impl ApiClient {
    pub fn new(config: &Config, credentials: CredentialStore, events: EventBus) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(config.request_timeout()).build()?;
        let retry = RetryPolicy {
            max_retries: config.max_retries,
            base_delay_ms: config.retry_base_delay_ms,
        };
        Ok(Self::with_client(client, &config.api_base_url, credentials, events, retry))
    }

    /// Build around an existing `reqwest::Client`, sharing its connection pool.
    pub fn with_client(
        client: Client,
        base_url: &str,
        credentials: CredentialStore,
        events: EventBus,
        retry: RetryPolicy,
    ) -> Self {
        let base_url = base_url.trim_end_matches('/');
        let renewer = TokenRenewer::new(client.clone(), base_url, credentials.clone());
        Self {
            client,
            base_url: Arc::from(base_url),
            credentials,
            renewer: Arc::new(renewer),
            events,
            retry,
        }
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    // ===== Token renewal =====

    /// Renew the access token through the process-wide single flight.
    pub async fn renew_session(&self) -> Result<RenewedSession, RenewalError> {
        self.renewer.renew().await
    }

    pub fn renewal_in_flight(&self) -> bool {
        self.renewer.in_flight()
    }

    /// Make any renewal still in flight discard its result instead of
    /// persisting credentials. Called when the session ends.
    pub fn invalidate_session(&self) {
        self.renewer.invalidate();
    }

    /// Recover from a 401 on a request that carried `sent_token`.
    async fn recover_authorization(&self, sent_token: Option<&str>) -> bool {
        if let Some(current) = self.credentials.get_token() {
            if sent_token != Some(current.as_str()) {
                debug!("Token changed while request was in flight, replaying");
                return true;
            }
        }
        match self.renewer.renew().await {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "Token renewal failed");
                false
            }
        }
    }

    fn expire_session(&self) {
        info!("Session expired, clearing credentials");
        self.renewer.invalidate();
        self.credentials.clear_credentials();
        self.events.session_expired();
    }

    /// Best-effort server-side logout: one attempt, no renewal, no retry.
    /// An expired session must not trigger a refresh on its way out.
    pub async fn logout(&self, refresh_token: Option<String>) -> Result<(), ApiError> {
        let mut request = self
            .client
            .post(self.url("/logout"))
            .json(&LogoutRequest { refresh_token });
        if let Some(token) = self.credentials.get_token() {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    // ===== Request pipeline =====

    /// Send a request through classification, authorization, renewal and retry.
    /// Returns the successful response; every non-2xx outcome becomes an error.
    pub async fn send(&self, method: Method, path: &str, body: Option<Value>) -> Result<Response, ApiError> {
        let url = self.url(path);
        let kind = EndpointKind::classify(&method, path);
        // Session this call belongs to; a 401 that lands after logout or a
        // new login must not touch the session that replaced it
        let epoch = self.renewer.epoch();
        let mut auth_retried = false;
        let mut retries = 0;

        loop {
            let token = if kind.is_protected() {
                self.credentials.get_token()
            } else {
                None
            };

            let mut request = self.client.request(method.clone(), &url);
            if let Some(ref token) = token {
                request = request.bearer_auth(token);
            }
            if let Some(ref body) = body {
                request = request.json(body);
            }

            let response = match request.send().await {
                Ok(response) => response,
                Err(e) if RetryPolicy::is_retryable_error(&e) && self.retry.can_retry(retries) => {
                    self.backoff(&url, &mut retries, &e.to_string()).await;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let status = response.status();
            if status.is_success() {
                return Ok(response);
            }

            if status == StatusCode::UNAUTHORIZED {
                if kind.is_protected() && !auth_retried && self.renewer.epoch() == epoch {
                    auth_retried = true;
                    if self.recover_authorization(token.as_deref()).await
                        && self.renewer.epoch() == epoch
                    {
                        debug!(url = %url, "Replaying request with renewed token");
                        continue;
                    }
                }
                let body = response.text().await.unwrap_or_default();
                if kind.is_protected() {
                    if self.renewer.epoch() == epoch {
                        self.expire_session();
                    } else {
                        debug!(url = %url, "Ignoring 401 from a session that already ended");
                    }
                }
                return Err(ApiError::from_status(status, &body));
            }

            if status == StatusCode::FORBIDDEN {
                let body = response.text().await.unwrap_or_default();
                warn!(url = %url, "Access denied");
                self.events.access_denied(&url);
                return Err(ApiError::from_status(status, &body));
            }

            if RetryPolicy::is_retryable_status(status) && self.retry.can_retry(retries) {
                self.backoff(&url, &mut retries, status.as_str()).await;
                continue;
            }

            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::from_status(status, &body));
        }
    }

    async fn backoff(&self, url: &str, retries: &mut u32, reason: &str) {
        let delay = self.retry.delay(*retries);
        *retries += 1;
        warn!(
            url = url,
            retry = *retries,
            backoff_ms = delay.as_millis() as u64,
            reason = reason,
            "Transient failure, backing off"
        );
        tokio::time::sleep(delay).await;
    }

    async fn send_json<T: DeserializeOwned>(&self, method: Method, path: &str, body: Option<Value>) -> Result<T, ApiError> {
        let response = self.send(method, path, body).await?;
        let text = response.text().await?;
        let text = if text.trim().is_empty() { "null" } else { text.as_str() };
        serde_json::from_str(text)
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse JSON response from {}: {}", path, e)))
    }

    fn encode<B: Serialize + ?Sized>(body: &B) -> Result<Value, ApiError> {
        serde_json::to_value(body).map_err(|e| ApiError::InvalidRequest(e.to_string()))
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.send_json(Method::GET, path, None).await
    }

    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<T, ApiError> {
        self.send_json(Method::POST, path, Some(Self::encode(body)?)).await
    }

    pub async fn put<T: DeserializeOwned, B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<T, ApiError> {
        self.send_json(Method::PUT, path, Some(Self::encode(body)?)).await
    }

    pub async fn delete<T: DeserializeOwned, B: Serialize + ?Sized>(&self, path: &str, body: Option<&B>) -> Result<T, ApiError> {
        let body = body.map(Self::encode).transpose()?;
        self.send_json(Method::DELETE, path, body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryBackend, StorageHandle};

    fn client(base_url: &str) -> ApiClient {
        let credentials = CredentialStore::new(StorageHandle::standalone(Arc::new(MemoryBackend::new())));
        ApiClient::with_client(
            Client::new(),
            base_url,
            credentials,
            EventBus::new("/login", "/"),
            RetryPolicy::default(),
        )
    }

    #[test]
    fn test_url_joining() {
        let api = client("https://books.example/api/");
        assert_eq!(api.url("/books"), "https://books.example/api/books");
        assert_eq!(api.url("me"), "https://books.example/api/me");
    }

    #[tokio::test]
    async fn test_public_call_sends_no_token() {
        let mut server = mockito::Server::new_async().await;
        let books = server
            .mock("GET", "/books")
            .match_header("authorization", mockito::Matcher::Missing)
            .with_status(200)
            .with_body("[]")
            .create_async()
            .await;

        let api = client(&server.url());
        api.credentials().set_token("secret");
        let result: Vec<Value> = api.get("/books").await.unwrap();
        assert!(result.is_empty());
        books.assert_async().await;
    }

    #[tokio::test]
    async fn test_protected_call_without_token_is_not_blocked() {
        let mut server = mockito::Server::new_async().await;
        let loans = server
            .mock("GET", "/loans")
            .match_header("authorization", mockito::Matcher::Missing)
            .with_status(401)
            .expect(1)
            .create_async()
            .await;

        let api = client(&server.url());
        let err = api.get::<Value>("/loans").await.unwrap_err();
        assert!(err.is_unauthorized());
        loans.assert_async().await;
    }
}
