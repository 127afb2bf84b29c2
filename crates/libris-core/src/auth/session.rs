use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::credentials::ACCESS_TOKEN_KEY;
use super::sync;
use super::CredentialStore;
use crate::api::{ApiClient, ApiError};
use crate::config::Config;
use crate::events::EventBus;
use crate::models::{
    ChangePasswordRequest, DeleteAccountRequest, LoginRequest, MessageResponse,
    ResetPasswordRequest, SignupRequest, UpdateProfileRequest, UserSnapshot,
};
use crate::storage::{StorageEvent, StorageHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub enum SessionPhase {
    Uninitialized,
    Initializing,
    Authenticated,
    Anonymous,
}

/// Snapshot of the session as the UI sees it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct SessionState {
    pub phase: SessionPhase,
    pub user: Option<UserSnapshot>,
    pub is_authenticated: bool,
    pub is_loading: bool,
    pub is_initialized: bool,
    pub error: Option<String>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            phase: SessionPhase::Uninitialized,
            user: None,
            is_authenticated: false,
            is_loading: false,
            is_initialized: false,
            error: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginOutcome {
    pub success: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignupOutcome {
    pub success: bool,
    pub requires_verification: bool,
    pub message: Option<String>,
    pub error: Option<String>,
}

/// Result of the account operations that do not change who is signed in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionOutcome {
    pub success: bool,
    pub message: Option<String>,
    pub error: Option<String>,
}

impl ActionOutcome {
    fn from_result(result: Result<MessageResponse, ApiError>, fallback: &str) -> Self {
        match result {
            Ok(response) => Self {
                success: true,
                message: response.message,
                error: None,
            },
            Err(e) => {
                debug!(error = %e, "Account request failed");
                Self {
                    success: false,
                    message: None,
                    error: Some(e.user_message(fallback)),
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    /// Tokens closer than this to expiry are renewed by `refresh_session`
    pub refresh_threshold: Duration,
    /// Period of the background revalidation while authenticated
    pub revalidate_interval: Duration,
}

impl SessionOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            refresh_threshold: config.refresh_threshold(),
            revalidate_interval: config.revalidate_interval(),
        }
    }
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// The process-wide authentication session.
///
/// Construct one per execution context and hand clones to every consumer.
/// Nothing about authentication should be assumed before `is_initialized()`
/// turns true, which happens once `initialize()` has settled.
#[derive(Clone)]
pub struct SessionManager {
    pub(super) inner: Arc<SessionInner>,
}

pub(super) struct SessionInner {
    api: ApiClient,
    state: watch::Sender<SessionState>,
    // Bumped whenever the session is replaced or ended; async work captured
    // under an older generation is discarded when it lands.
    generation: AtomicU64,
    options: SessionOptions,
    revalidation: Mutex<Option<AbortHandle>>,
    synchronizer: Mutex<Option<AbortHandle>>,
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        for slot in [&mut self.revalidation, &mut self.synchronizer] {
            let handle = match slot.get_mut() {
                Ok(handle) => handle.take(),
                Err(poisoned) => poisoned.into_inner().take(),
            };
            if let Some(handle) = handle {
                handle.abort();
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl SessionManager {
    pub fn new(config: &Config, storage: StorageHandle) -> Result<Self, ApiError> {
        let credentials = CredentialStore::new(storage);
        let events = EventBus::new(&config.login_path, &config.landing_path);
        let api = ApiClient::new(config, credentials, events)?;
        Ok(Self::with_api(api, SessionOptions::from_config(config)))
    }

    pub fn with_api(api: ApiClient, options: SessionOptions) -> Self {
        let (state, _) = watch::channel(SessionState::default());
        Self {
            inner: Arc::new(SessionInner {
                api,
                state,
                generation: AtomicU64::new(0),
                options,
                revalidation: Mutex::new(None),
                synchronizer: Mutex::new(None),
            }),
        }
    }

    // ===== Accessors =====

    pub fn api(&self) -> &ApiClient {
        &self.inner.api
    }

    pub fn credentials(&self) -> &CredentialStore {
        self.inner.api.credentials()
    }

    pub fn events(&self) -> &EventBus {
        self.inner.api.events()
    }

    pub fn state(&self) -> SessionState {
        self.inner.state.borrow().clone()
    }

    /// Watch every state transition.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    pub fn phase(&self) -> SessionPhase {
        self.inner.state.borrow().phase
    }

    pub fn user(&self) -> Option<UserSnapshot> {
        self.inner.state.borrow().user.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.state.borrow().is_authenticated
    }

    pub fn is_loading(&self) -> bool {
        self.inner.state.borrow().is_loading
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.state.borrow().is_initialized
    }

    pub fn error(&self) -> Option<String> {
        self.inner.state.borrow().error.clone()
    }

    /// Whether the periodic revalidation timer is armed
    pub fn is_revalidating(&self) -> bool {
        lock(&self.inner.revalidation).is_some()
    }

    // ===== Lifecycle =====

    /// Start listening to other contexts and hydrate from the credential store.
    pub async fn initialize(&self) {
        self.start_synchronizer();
        self.check_auth().await;
    }

    /// Resolve the stored credentials into exactly one terminal state.
    pub async fn check_auth(&self) {
        let generation = self.generation();
        self.update(|s| {
            if !s.is_initialized {
                s.phase = SessionPhase::Initializing;
            }
            s.is_loading = true;
        });

        let resolved = self.resolve_stored_session().await;

        if !self.is_current(generation) {
            debug!("Discarding session check superseded by a newer transition");
            self.update(|s| {
                if s.phase == SessionPhase::Initializing {
                    s.phase = SessionPhase::Anonymous;
                }
                s.is_loading = false;
                s.is_initialized = true;
            });
            return;
        }

        match resolved {
            Some(user) => {
                info!(user_id = user.id, "Session restored");
                self.set_authenticated(user);
            }
            None => self.set_anonymous(None),
        }
    }

    async fn resolve_stored_session(&self) -> Option<UserSnapshot> {
        let credentials = self.credentials();
        let (Some(_), Some(cached_user)) = (credentials.get_token(), credentials.get_user()) else {
            debug!("No stored session");
            return None;
        };

        if credentials.is_token_expired() {
            info!("Stored access token expired, attempting renewal");
            return match self.inner.api.renew_session().await {
                Ok(renewed) => Some(renewed.user),
                Err(e) => {
                    warn!(error = %e, "Could not renew stored session");
                    credentials.clear_credentials();
                    None
                }
            };
        }

        match self.inner.api.me().await {
            Ok(me) => {
                credentials.set_user(&me.user);
                Some(me.user)
            }
            Err(e) if e.is_unauthorized() => {
                info!("Server invalidated the stored session");
                credentials.clear_credentials();
                None
            }
            Err(e) => {
                // Offline tolerance: keep the cached identity until the
                // server can be reached again
                warn!(error = %e, "Session validation unavailable, using cached user");
                Some(cached_user)
            }
        }
    }

    // ===== Operations =====

    pub async fn login(&self, request: &LoginRequest) -> LoginOutcome {
        let generation = self.bump_generation();
        // A renewal still running for the previous session must not land on
        // top of the credentials this login is about to write
        self.inner.api.invalidate_session();
        self.update(|s| {
            s.is_loading = true;
            s.error = None;
        });

        match self.inner.api.login(request).await {
            Ok(auth) if self.is_current(generation) => {
                self.credentials()
                    .set_credentials(&auth.token, &auth.user, auth.refresh_token.as_deref());
                info!(user_id = auth.user.id, "Logged in");
                self.set_authenticated(auth.user);
                LoginOutcome {
                    success: true,
                    error: None,
                }
            }
            Ok(_) => {
                debug!("Login response arrived after the session moved on");
                LoginOutcome {
                    success: false,
                    error: Some("Login was cancelled".to_string()),
                }
            }
            Err(e) => {
                let message = e.user_message("Login failed");
                warn!(error = %e, "Login failed");
                self.set_anonymous(Some(message.clone()));
                LoginOutcome {
                    success: false,
                    error: Some(message),
                }
            }
        }
    }

    /// Register a new account. The caller stays signed out: the account has
    /// to be verified before it can log in.
    pub async fn signup(&self, request: &SignupRequest) -> SignupOutcome {
        self.update(|s| {
            s.is_loading = true;
            s.error = None;
        });

        match self.inner.api.register(request).await {
            Ok(response) => {
                info!(email = %request.email, "Account registered, verification pending");
                self.update(|s| s.is_loading = false);
                SignupOutcome {
                    success: true,
                    requires_verification: true,
                    message: response.message,
                    error: None,
                }
            }
            Err(e) => {
                let message = e.user_message("Registration failed");
                warn!(error = %e, "Registration failed");
                self.update(|s| {
                    s.is_loading = false;
                    s.error = Some(message.clone());
                });
                SignupOutcome {
                    success: false,
                    requires_verification: false,
                    message: None,
                    error: Some(message),
                }
            }
        }
    }

    /// End the session. The server is told on a best-effort basis; local
    /// credentials are cleared whatever it answers.
    pub async fn logout(&self) {
        self.bump_generation();
        self.inner.api.invalidate_session();
        self.stop_revalidation();

        let credentials = self.credentials();
        if credentials.get_token().is_some() {
            if let Err(e) = self.inner.api.logout(credentials.get_refresh_token()).await {
                debug!(error = %e, "Server logout failed, clearing local session anyway");
            }
        }

        credentials.clear_credentials();
        self.set_anonymous(None);
        info!("Logged out");
        self.events().navigate_to_landing();
    }

    /// Renew the access token if it is close to expiry. Returns false when a
    /// needed renewal failed.
    pub async fn refresh_session(&self) -> bool {
        if !self
            .credentials()
            .should_refresh_token(self.inner.options.refresh_threshold)
        {
            return true;
        }

        let generation = self.generation();
        match self.inner.api.renew_session().await {
            Ok(renewed) => {
                if self.is_current(generation) {
                    self.update(|s| s.user = Some(renewed.user));
                }
                true
            }
            Err(e) => {
                warn!(error = %e, "Session refresh failed");
                false
            }
        }
    }

    /// Replace the cached user (after a profile edit) without touching tokens.
    pub fn update_user(&self, user: UserSnapshot) {
        self.credentials().set_user(&user);
        self.update(|s| s.user = Some(user));
    }

    pub fn clear_error(&self) {
        self.update(|s| s.error = None);
    }

    // ===== Account operations =====

    pub async fn update_profile(&self, request: &UpdateProfileRequest) -> ActionOutcome {
        let result = self.inner.api.update_profile(request).await;
        if let Ok(MessageResponse { user: Some(user), .. }) = &result {
            self.update_user(user.clone());
        }
        ActionOutcome::from_result(result, "Profile update failed")
    }

    /// Delete the account server-side, then drop the local session. The
    /// server has already revoked everything, so no logout call is made.
    pub async fn delete_account(&self, request: &DeleteAccountRequest) -> ActionOutcome {
        let outcome =
            ActionOutcome::from_result(self.inner.api.delete_account(request).await, "Account deletion failed");
        if outcome.success {
            self.bump_generation();
            self.inner.api.invalidate_session();
            self.credentials().clear_credentials();
            self.set_anonymous(None);
            info!("Account deleted");
            self.events().navigate_to_landing();
        }
        outcome
    }

    pub async fn change_password(&self, request: &ChangePasswordRequest) -> ActionOutcome {
        ActionOutcome::from_result(self.inner.api.change_password(request).await, "Password change failed")
    }

    pub async fn request_password_reset(&self, email: &str) -> ActionOutcome {
        ActionOutcome::from_result(
            self.inner.api.request_password_reset(email).await,
            "Password reset request failed",
        )
    }

    pub async fn reset_password(&self, request: &ResetPasswordRequest) -> ActionOutcome {
        ActionOutcome::from_result(self.inner.api.reset_password(request).await, "Password reset failed")
    }

    pub async fn verify_email(&self, token: &str) -> ActionOutcome {
        ActionOutcome::from_result(self.inner.api.verify_email(token).await, "Email verification failed")
    }

    pub async fn resend_verification(&self, email: &str) -> ActionOutcome {
        ActionOutcome::from_result(
            self.inner.api.resend_verification(email).await,
            "Could not resend verification email",
        )
    }

    // ===== Cross-context reconciliation =====

    pub(super) async fn apply_storage_change(&self, change: StorageEvent) {
        if change.key != ACCESS_TOKEN_KEY {
            return;
        }
        if change.is_removal() {
            if self.is_authenticated() {
                self.collapse_to_anonymous("signed out in another context");
            }
        } else if change.is_addition() && self.phase() == SessionPhase::Anonymous {
            info!("Session started in another context, adopting it");
            self.check_auth().await;
        }
    }

    /// Drop to anonymous locally, without any network call.
    pub(super) fn collapse_to_anonymous(&self, reason: &str) {
        if !self.is_authenticated() {
            return;
        }
        info!(reason, "Session ended");
        self.bump_generation();
        self.inner.api.invalidate_session();
        self.set_anonymous(None);
    }

    fn start_synchronizer(&self) {
        let mut slot = lock(&self.inner.synchronizer);
        if slot.is_none() {
            *slot = Some(sync::spawn(self));
        }
    }

    // ===== Periodic revalidation =====

    fn start_revalidation(&self) {
        let mut slot = lock(&self.inner.revalidation);
        if slot.is_some() {
            return;
        }

        let weak = Arc::downgrade(&self.inner);
        let period = self.inner.options.revalidate_interval;
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else { break };
                let session = SessionManager { inner };
                if !session.refresh_session().await {
                    info!("Periodic session check failed, logging out");
                    // Detach first: logout would otherwise abort this task
                    // halfway through
                    lock(&session.inner.revalidation).take();
                    session.logout().await;
                    break;
                }
            }
        });
        *slot = Some(task.abort_handle());
    }

    fn stop_revalidation(&self) {
        if let Some(handle) = lock(&self.inner.revalidation).take() {
            debug!("Stopping session revalidation");
            handle.abort();
        }
    }

    // ===== State helpers =====

    fn update(&self, modify: impl FnOnce(&mut SessionState)) {
        self.inner.state.send_modify(modify);
    }

    fn set_authenticated(&self, user: UserSnapshot) {
        self.update(|s| {
            s.phase = SessionPhase::Authenticated;
            s.user = Some(user);
            s.is_authenticated = true;
            s.is_loading = false;
            s.is_initialized = true;
            s.error = None;
        });
        self.start_revalidation();
    }

    fn set_anonymous(&self, error: Option<String>) {
        self.stop_revalidation();
        self.update(|s| {
            s.phase = SessionPhase::Anonymous;
            s.user = None;
            s.is_authenticated = false;
            s.is_loading = false;
            s.is_initialized = true;
            s.error = error;
        });
    }

    fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::SeqCst)
    }

    fn bump_generation(&self) -> u64 {
        self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation() == generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryBackend;

    fn offline_session() -> SessionManager {
        let config = Config {
            // Nothing listens on the discard port
            api_base_url: "http://127.0.0.1:9".to_string(),
            max_retries: 0,
            ..Config::default()
        };
        let storage = StorageHandle::standalone(Arc::new(MemoryBackend::new()));
        SessionManager::new(&config, storage).unwrap()
    }

    fn user() -> UserSnapshot {
        UserSnapshot {
            id: 1,
            name: "Ada".into(),
            email: "ada@example.com".into(),
            role: "member".into(),
            credit_balance: None,
        }
    }

    #[test]
    fn test_initial_state() {
        let session = offline_session();
        let state = session.state();
        assert_eq!(state.phase, SessionPhase::Uninitialized);
        assert!(!state.is_initialized);
        assert!(!state.is_authenticated);
    }

    #[tokio::test]
    async fn test_initialize_without_credentials_is_anonymous() {
        let session = offline_session();
        session.initialize().await;
        assert_eq!(session.phase(), SessionPhase::Anonymous);
        assert!(session.is_initialized());
        assert!(!session.is_revalidating());
    }

    #[tokio::test]
    async fn test_initialize_offline_keeps_cached_user() {
        let session = offline_session();
        session.credentials().set_credentials("opaque", &user(), None);
        session.initialize().await;

        assert_eq!(session.phase(), SessionPhase::Authenticated);
        assert_eq!(session.user(), Some(user()));
        assert!(session.is_revalidating());
    }

    #[tokio::test]
    async fn test_update_user_and_clear_error() {
        let session = offline_session();
        let mut renamed = user();
        renamed.name = "Ada L.".into();
        session.update_user(renamed.clone());

        assert_eq!(session.user(), Some(renamed.clone()));
        assert_eq!(session.credentials().get_user(), Some(renamed));

        session.update(|s| s.error = Some("boom".into()));
        session.clear_error();
        assert_eq!(session.error(), None);
    }

    #[tokio::test]
    async fn test_logout_offline_still_clears() {
        let session = offline_session();
        session.credentials().set_credentials("opaque", &user(), Some("r1"));
        session.initialize().await;
        let mut events = session.events().subscribe();

        session.logout().await;

        assert!(!session.is_authenticated());
        assert!(!session.is_revalidating());
        assert_eq!(session.credentials().get_token(), None);
        assert_eq!(session.credentials().get_refresh_token(), None);
        assert_eq!(session.credentials().get_user(), None);
        assert_eq!(
            events.recv().await.unwrap(),
            crate::events::SessionEvent::Navigate {
                location: "/".to_string()
            }
        );
    }

    #[test]
    fn test_state_serializes_camel_case() {
        let value = serde_json::to_value(SessionState::default()).unwrap();
        assert_eq!(value["phase"], "uninitialized");
        assert_eq!(value["isInitialized"], false);
    }
}
