//! Process-wide session notifications.
//!
//! The transport and the session manager publish here; UI layers subscribe to
//! react to an expired session, a denied request, or a requested navigation.

use std::sync::{Arc, RwLock};

use tokio::sync::broadcast;
use tracing::debug;

/// Buffer size for session notifications.
/// Bursts come from several requests failing together; 32 absorbs that.
const EVENT_BUFFER_SIZE: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Credentials were rejected and could not be renewed
    SessionExpired { return_to: Option<String> },
    /// The server refused a request with 403
    AccessDenied { url: String },
    /// The consumer should move to `location`
    Navigate { location: String },
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SessionEvent>,
    location: Arc<RwLock<Option<String>>>,
    login_path: Arc<str>,
    landing_path: Arc<str>,
}

impl EventBus {
    pub fn new(login_path: &str, landing_path: &str) -> Self {
        let (tx, _) = broadcast::channel(EVENT_BUFFER_SIZE);
        Self {
            tx,
            location: Arc::new(RwLock::new(None)),
            login_path: Arc::from(login_path),
            landing_path: Arc::from(landing_path),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    /// Record where the consumer currently is, so an expiry can send the user
    /// back there after logging in again.
    pub fn set_location(&self, location: impl Into<String>) {
        if let Ok(mut current) = self.location.write() {
            *current = Some(location.into());
        }
    }

    pub fn location(&self) -> Option<String> {
        self.location.read().ok().and_then(|current| current.clone())
    }

    /// Announce an unrecoverable session and redirect to the login entry point.
    pub fn session_expired(&self) {
        let return_to = self
            .location()
            .filter(|location| !location.starts_with(self.login_path.as_ref()));
        let location = match return_to {
            Some(ref path) => format!("{}?redirect={}", self.login_path, urlencoding::encode(path)),
            None => self.login_path.to_string(),
        };
        self.emit(SessionEvent::SessionExpired { return_to });
        self.emit(SessionEvent::Navigate { location });
    }

    pub fn access_denied(&self, url: &str) {
        self.emit(SessionEvent::AccessDenied {
            url: url.to_string(),
        });
    }

    pub fn navigate_to_landing(&self) {
        self.emit(SessionEvent::Navigate {
            location: self.landing_path.to_string(),
        });
    }

    fn emit(&self, event: SessionEvent) {
        debug!(?event, "Session event");
        // Nobody listening is fine
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_session_expired_preserves_destination() {
        let bus = EventBus::new("/login", "/");
        let mut rx = bus.subscribe();
        bus.set_location("/loans?page=2");
        bus.session_expired();

        assert_eq!(
            rx.recv().await.unwrap(),
            SessionEvent::SessionExpired {
                return_to: Some("/loans?page=2".to_string())
            }
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            SessionEvent::Navigate {
                location: "/login?redirect=%2Floans%3Fpage%3D2".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_session_expired_on_login_page_has_no_redirect() {
        let bus = EventBus::new("/login", "/");
        let mut rx = bus.subscribe();
        bus.set_location("/login");
        bus.session_expired();

        assert_eq!(rx.recv().await.unwrap(), SessionEvent::SessionExpired { return_to: None });
        assert_eq!(
            rx.recv().await.unwrap(),
            SessionEvent::Navigate {
                location: "/login".to_string()
            }
        );
    }
}
