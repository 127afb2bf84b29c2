use std::time::Duration;

use chrono::Utc;
use tracing::{debug, warn};

use super::token;
use crate::models::UserSnapshot;
use crate::storage::{StorageHandle, StorageSubscription};

pub const ACCESS_TOKEN_KEY: &str = "libris.accessToken";
pub const REFRESH_TOKEN_KEY: &str = "libris.refreshToken";
pub const USER_KEY: &str = "libris.user";
pub const EXPIRY_KEY: &str = "libris.accessTokenExpiry";

/// Flat keys written by older client versions, without expiry tracking
pub const LEGACY_TOKEN_KEY: &str = "token";
pub const LEGACY_USER_KEY: &str = "user";

/// Clock skew allowance applied by `is_token_expired`
const EXPIRY_SKEW_MS: i64 = 10_000;

/// Persistent access token, refresh token, cached user and derived expiry.
///
/// Every operation is best-effort: a failing backend is logged and reads as
/// "nothing stored", so authentication degrades instead of crashing callers.
#[derive(Clone)]
pub struct CredentialStore {
    storage: StorageHandle,
}

impl CredentialStore {
    /// Wrap a storage handle, migrating any legacy layout first.
    pub fn new(storage: StorageHandle) -> Self {
        let store = Self { storage };
        store.migrate();
        store
    }

    /// Move legacy flat keys into the current layout. Legacy values only win
    /// when the current key is empty; legacy keys are always removed.
    pub fn migrate(&self) {
        if let Some(legacy_token) = self.read(LEGACY_TOKEN_KEY) {
            if self.read(ACCESS_TOKEN_KEY).is_none() {
                debug!("Migrating legacy access token");
                self.set_token(&legacy_token);
            }
            self.delete(LEGACY_TOKEN_KEY);
        }

        if let Some(legacy_user) = self.read(LEGACY_USER_KEY) {
            if self.read(USER_KEY).is_none() {
                match serde_json::from_str::<UserSnapshot>(&legacy_user) {
                    Ok(user) => self.set_user(&user),
                    Err(e) => warn!(error = %e, "Discarding unreadable legacy user record"),
                }
            }
            self.delete(LEGACY_USER_KEY);
        }
    }

    // ===== Access token =====

    /// Store the access token along with the expiry decoded from it. The
    /// expiry is written first: between the two writes a reader sees the
    /// outgoing token with the incoming expiry, never a new token that still
    /// carries the old one's expiry.
    pub fn set_token(&self, token: &str) {
        match token::decode(token).and_then(|claims| claims.expiry_ms()) {
            Some(expiry_ms) => self.write(EXPIRY_KEY, &expiry_ms.to_string()),
            None => self.delete(EXPIRY_KEY),
        }
        self.write(ACCESS_TOKEN_KEY, token);
        self.delete(LEGACY_TOKEN_KEY);
    }

    pub fn get_token(&self) -> Option<String> {
        if let Some(token) = self.read(ACCESS_TOKEN_KEY) {
            return Some(token);
        }
        let legacy = self.read(LEGACY_TOKEN_KEY)?;
        self.migrate();
        Some(legacy)
    }

    // ===== Refresh token =====

    pub fn set_refresh_token(&self, token: &str) {
        self.write(REFRESH_TOKEN_KEY, token);
    }

    pub fn get_refresh_token(&self) -> Option<String> {
        self.read(REFRESH_TOKEN_KEY)
    }

    // ===== Cached user =====

    pub fn set_user(&self, user: &UserSnapshot) {
        match serde_json::to_string(user) {
            Ok(json) => {
                self.write(USER_KEY, &json);
                self.delete(LEGACY_USER_KEY);
            }
            Err(e) => warn!(error = %e, "Failed to serialize user record"),
        }
    }

    pub fn get_user(&self) -> Option<UserSnapshot> {
        let raw = match self.read(USER_KEY) {
            Some(raw) => raw,
            None => {
                let legacy = self.read(LEGACY_USER_KEY)?;
                self.migrate();
                legacy
            }
        };
        match serde_json::from_str(&raw) {
            Ok(user) => Some(user),
            Err(e) => {
                warn!(error = %e, "Ignoring unreadable cached user record");
                None
            }
        }
    }

    // ===== Composite =====

    /// Write a full credential set. The access token goes last so a
    /// concurrent reader never pairs a new token with a stale user.
    pub fn set_credentials(&self, token: &str, user: &UserSnapshot, refresh_token: Option<&str>) {
        if let Some(refresh_token) = refresh_token {
            self.set_refresh_token(refresh_token);
        }
        self.set_user(user);
        self.set_token(token);
    }

    pub fn clear_credentials(&self) {
        for key in [
            ACCESS_TOKEN_KEY,
            EXPIRY_KEY,
            REFRESH_TOKEN_KEY,
            USER_KEY,
            LEGACY_TOKEN_KEY,
            LEGACY_USER_KEY,
        ] {
            self.delete(key);
        }
    }

    // ===== Expiry =====

    /// Expiry of the current access token in epoch milliseconds.
    pub fn token_expiry_ms(&self) -> Option<i64> {
        let token = self.get_token()?;
        self.read(EXPIRY_KEY)
            .and_then(|raw| raw.parse::<i64>().ok())
            .or_else(|| token::decode(&token).and_then(|claims| claims.expiry_ms()))
    }

    pub fn is_token_expired(&self) -> bool {
        self.is_token_expired_at(now_ms())
    }

    /// No token counts as expired. A token whose expiry cannot be read does
    /// not: the server gets to decide.
    pub fn is_token_expired_at(&self, now_ms: i64) -> bool {
        if self.get_token().is_none() {
            return true;
        }
        match self.token_expiry_ms() {
            Some(expiry_ms) => now_ms >= expiry_ms.saturating_sub(EXPIRY_SKEW_MS),
            None => false,
        }
    }

    pub fn should_refresh_token(&self, threshold: Duration) -> bool {
        self.should_refresh_token_at(threshold, now_ms())
    }

    pub fn should_refresh_token_at(&self, threshold: Duration, now_ms: i64) -> bool {
        match self.token_expiry_ms() {
            Some(expiry_ms) => now_ms >= expiry_ms.saturating_sub(duration_ms(threshold)),
            None => true,
        }
    }

    pub fn time_until_expiry(&self) -> Option<Duration> {
        self.time_until_expiry_at(now_ms())
    }

    pub fn time_until_expiry_at(&self, now_ms: i64) -> Option<Duration> {
        let remaining = self.token_expiry_ms()?.saturating_sub(now_ms);
        Some(Duration::from_millis(remaining.max(0) as u64))
    }

    // ===== Roles =====

    /// Role from the cached user, falling back to the token's advisory claim.
    pub fn user_role(&self) -> Option<String> {
        if let Some(user) = self.get_user() {
            return Some(user.role);
        }
        self.get_token()
            .and_then(|token| token::decode(&token))
            .and_then(|claims| claims.role)
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.user_role()
            .map(|current| current.eq_ignore_ascii_case(role))
            .unwrap_or(false)
    }

    pub fn has_any_role(&self, roles: &[&str]) -> bool {
        match self.user_role() {
            Some(current) => roles.iter().any(|role| current.eq_ignore_ascii_case(role)),
            None => false,
        }
    }

    /// Changes made to the underlying storage by other contexts.
    pub fn subscribe(&self) -> StorageSubscription {
        self.storage.subscribe()
    }

    // ===== Best-effort storage access =====

    fn read(&self, key: &str) -> Option<String> {
        match self.storage.get(key) {
            Ok(value) => value,
            Err(e) => {
                warn!(key, error = %e, "Credential storage read failed");
                None
            }
        }
    }

    fn write(&self, key: &str, value: &str) {
        if let Err(e) = self.storage.set(key, value) {
            warn!(key, error = %e, "Credential storage write failed");
        }
    }

    fn delete(&self, key: &str) {
        if let Err(e) = self.storage.remove(key) {
            warn!(key, error = %e, "Credential storage delete failed");
        }
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn duration_ms(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}
