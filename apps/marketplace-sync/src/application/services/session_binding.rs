//! Session Binding
//!
//! Drives [`NotificationChannelManager::rebind`] from the auth provider's
//! identity-change stream.

use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::notification_channel::NotificationChannelManager;
use crate::application::ports::EventSourcePort;
use crate::domain::session::{Session, UserId};

/// Follow identity changes until cancelled or the sender is dropped.
///
/// The current value is applied immediately. Later changes that keep the same
/// user id (for example a refreshed display name) do not trigger a rebind.
/// The manager is unbound on exit.
pub async fn follow_sessions<S>(
    manager: Arc<NotificationChannelManager<S>>,
    mut sessions: watch::Receiver<Option<Session>>,
    cancel: CancellationToken,
) where
    S: EventSourcePort + 'static,
{
    let mut applied: Option<UserId> = None;

    loop {
        let session = sessions.borrow_and_update().clone();
        let user = session.as_ref().map(|s| s.user_id.clone());

        if user != applied {
            tracing::info!(
                from = applied.as_ref().map_or("none", UserId::as_str),
                to = user.as_ref().map_or("none", UserId::as_str),
                "Session changed"
            );
            manager.rebind(session).await;
            applied = user;
        }

        tokio::select! {
            () = cancel.cancelled() => break,
            changed = sessions.changed() => {
                if changed.is_err() {
                    tracing::debug!("Session provider closed");
                    break;
                }
            }
        }
    }

    if applied.is_some() {
        manager.rebind(None).await;
    }
}
