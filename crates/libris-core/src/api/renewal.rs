//! Single-flight access token renewal.
//!
//! At most one exchange with `/refresh` is outstanding per process. Every
//! caller that needs a fresh token while a flight is running awaits that same
//! flight and observes the same outcome. The flight releases its slot as soon
//! as it settles, so the next expiry starts a new one.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures::future::{BoxFuture, FutureExt, Shared};
use reqwest::Client;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::auth::CredentialStore;
use crate::models::{AuthResponse, RefreshRequest, UserSnapshot};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenewalError {
    #[error("No refresh token available")]
    NoRefreshToken,

    #[error("Refresh rejected by server ({0})")]
    Rejected(u16),

    #[error("Refresh request failed: {0}")]
    Transport(String),

    #[error("Session was invalidated while renewing")]
    Superseded,
}

/// Result of a successful renewal, already persisted to the credential store.
#[derive(Debug, Clone, PartialEq)]
pub struct RenewedSession {
    pub access_token: String,
    pub user: UserSnapshot,
}

type Flight = Shared<BoxFuture<'static, Result<RenewedSession, RenewalError>>>;

pub struct TokenRenewer {
    client: Client,
    refresh_url: String,
    credentials: CredentialStore,
    slot: Mutex<Option<(u64, Flight)>>,
    next_flight: AtomicU64,
    // Bumped by invalidate(); a flight started under an older epoch must not
    // write credentials back.
    epoch: AtomicU64,
}

impl TokenRenewer {
    pub fn new(client: Client, base_url: &str, credentials: CredentialStore) -> Self {
        Self {
            client,
            refresh_url: format!("{}/refresh", base_url.trim_end_matches('/')),
            credentials,
            slot: Mutex::new(None),
            next_flight: AtomicU64::new(1),
            epoch: AtomicU64::new(0),
        }
    }

    /// Join the running flight, or start one.
    pub async fn renew(self: &Arc<Self>) -> Result<RenewedSession, RenewalError> {
        let flight = {
            let mut slot = self.lock_slot();
            match slot.as_ref() {
                Some((id, flight)) => {
                    debug!(flight = id, "Joining in-flight token renewal");
                    flight.clone()
                }
                None => {
                    let id = self.next_flight.fetch_add(1, Ordering::Relaxed);
                    let this = Arc::clone(self);
                    let flight = async move {
                        let outcome = this.exchange().await;
                        this.release(id);
                        outcome
                    }
                    .boxed()
                    .shared();
                    *slot = Some((id, flight.clone()));
                    flight
                }
            }
        };
        flight.await
    }

    /// Whether a renewal is currently outstanding
    pub fn in_flight(&self) -> bool {
        self.lock_slot().is_some()
    }

    /// Discard the outcome of any renewal that is still running. The slot is
    /// freed too, so the next session starts its own flight instead of
    /// joining the doomed one.
    pub fn invalidate(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        if self.lock_slot().take().is_some() {
            debug!("Detached in-flight token renewal");
        }
    }

    /// Current session epoch; changes whenever `invalidate` runs.
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    async fn exchange(&self) -> Result<RenewedSession, RenewalError> {
        let epoch = self.epoch.load(Ordering::SeqCst);
        let refresh_token = self
            .credentials
            .get_refresh_token()
            .ok_or(RenewalError::NoRefreshToken)?;

        debug!("Exchanging refresh token");
        let response = self
            .client
            .post(&self.refresh_url)
            .json(&RefreshRequest { refresh_token })
            .send()
            .await
            .map_err(|e| RenewalError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            warn!(status = status.as_u16(), "Token refresh rejected");
            return Err(RenewalError::Rejected(status.as_u16()));
        }

        let auth: AuthResponse = response
            .json()
            .await
            .map_err(|e| RenewalError::Transport(format!("invalid refresh response: {}", e)))?;

        if self.epoch.load(Ordering::SeqCst) != epoch {
            info!("Discarding token renewal that finished after the session ended");
            return Err(RenewalError::Superseded);
        }

        self.credentials
            .set_credentials(&auth.token, &auth.user, auth.refresh_token.as_deref());
        info!(user_id = auth.user.id, "Access token renewed");

        Ok(RenewedSession {
            access_token: auth.token,
            user: auth.user,
        })
    }

    fn release(&self, id: u64) {
        let mut slot = self.lock_slot();
        if matches!(slot.as_ref(), Some((current, _)) if *current == id) {
            *slot = None;
        }
    }

    fn lock_slot(&self) -> MutexGuard<'_, Option<(u64, Flight)>> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
