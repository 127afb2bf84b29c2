//! Keeps a session consistent with other contexts sharing its storage.
//!
//! The task reconciles two sources:
//! - Storage changes written by other contexts. A removed access token ends
//!   the local session; a new one while anonymous triggers a full check.
//! - This context's own `SessionExpired` notifications from the transport.

use std::sync::{Arc, Weak};

use tokio::sync::broadcast::error::RecvError;
use tokio::task::AbortHandle;
use tracing::warn;

use super::session::{SessionInner, SessionManager};
use crate::events::SessionEvent;

pub(super) fn spawn(session: &SessionManager) -> AbortHandle {
    let weak: Weak<SessionInner> = Arc::downgrade(&session.inner);
    let mut storage = session.credentials().subscribe();
    let mut events = session.events().subscribe();

    let task = tokio::spawn(async move {
        loop {
            tokio::select! {
                change = storage.recv() => {
                    let Some(change) = change else { break };
                    let Some(inner) = weak.upgrade() else { break };
                    SessionManager { inner }.apply_storage_change(change).await;
                }
                event = events.recv() => match event {
                    Ok(SessionEvent::SessionExpired { .. }) => {
                        let Some(inner) = weak.upgrade() else { break };
                        SessionManager { inner }.collapse_to_anonymous("credentials rejected");
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Session event listener lagged");
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
    });
    task.abort_handle()
}
