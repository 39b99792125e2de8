//! Remote control actions an administrator can apply to a live session.

use super::registry::Session;
use kiosk_core::{KioskError, ServerMessage};
use std::str::FromStr;
use tracing::info;

const DEFAULT_LOGOUT_MESSAGE: &str = "Logged out by administrator";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlAction {
    Lock,
    Unlock,
    Logout,
    Message,
    Reboot,
    Shutdown,
}

impl FromStr for ControlAction {
    type Err = KioskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lock" => Ok(Self::Lock),
            "unlock" => Ok(Self::Unlock),
            "logout" => Ok(Self::Logout),
            "message" => Ok(Self::Message),
            "reboot" => Ok(Self::Reboot),
            "shutdown" => Ok(Self::Shutdown),
            other => Err(KioskError::InvalidAction(other.to_string())),
        }
    }
}

/// Apply `action` to `session`, pushing the matching message to its client.
///
/// Logout starts the close path; the session is retired when the connection
/// finishes closing.
pub fn apply(session: &mut Session, action: ControlAction, message: Option<&str>) {
    info!(username = %session.username, ?action, "control action");
    let handle = &session.handle;
    match action {
        ControlAction::Lock => {
            session.locked = true;
            handle.push(ServerMessage::Lock);
        }
        ControlAction::Unlock => {
            session.locked = false;
            handle.push(ServerMessage::Unlock);
        }
        ControlAction::Message => {
            handle.push(ServerMessage::AdminMessage {
                message: message.unwrap_or_default().to_string(),
            });
        }
        ControlAction::Reboot => {
            handle.push(ServerMessage::Reboot);
        }
        ControlAction::Shutdown => {
            handle.push(ServerMessage::Shutdown);
        }
        ControlAction::Logout => {
            handle.push(ServerMessage::ForceLogout {
                message: message.unwrap_or(DEFAULT_LOGOUT_MESSAGE).to_string(),
            });
            session.begin_close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ConnectionHandle;
    use crate::session::SessionRegistry;
    use chrono::Utc;
    use kiosk_core::Role;
    use std::time::Duration;

    #[test]
    fn parses_known_actions_only() {
        assert_eq!("lock".parse::<ControlAction>().unwrap(), ControlAction::Lock);
        assert_eq!(
            "shutdown".parse::<ControlAction>().unwrap(),
            ControlAction::Shutdown
        );
        assert!(matches!(
            "explode".parse::<ControlAction>(),
            Err(KioskError::InvalidAction(a)) if a == "explode"
        ));
        assert!("LOCK".parse::<ControlAction>().is_err());
    }

    #[tokio::test]
    async fn lock_unlock_and_logout() {
        let mut registry = SessionRegistry::new();
        let (handle, mut rx) = ConnectionHandle::new(1, 8);
        registry
            .admit(handle, "alice", Role::User, Duration::from_secs(60), Utc::now())
            .unwrap();
        let session = registry.find_by_username_mut("alice").unwrap();

        apply(session, ControlAction::Lock, None);
        assert!(session.locked);
        apply(session, ControlAction::Unlock, None);
        assert!(!session.locked);
        apply(session, ControlAction::Message, Some("5 minutes left"));
        apply(session, ControlAction::Logout, None);
        assert!(session.closing);

        assert_eq!(rx.recv().await, Some(ServerMessage::Lock));
        assert_eq!(rx.recv().await, Some(ServerMessage::Unlock));
        assert_eq!(
            rx.recv().await,
            Some(ServerMessage::AdminMessage {
                message: "5 minutes left".into()
            })
        );
        assert!(matches!(
            rx.recv().await,
            Some(ServerMessage::ForceLogout { .. })
        ));
    }
}
