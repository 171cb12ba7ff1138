//! Presence registry.
//!
//! Maps each identity to its one live connection and cached profile summary.
//! The identity is the only key; re-registering the same identity replaces
//! the stored handle (last writer wins).

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::collaborators::{bounded, CollaboratorError, IdentityDirectory};
use crate::error::{CoordinatorError, Result};
use crate::protocol::{Role, ServerMessage};

/// A connected client's sender channel.
pub type ClientSender = mpsc::UnboundedSender<ServerMessage>;

/// Identifies one physical connection.
pub type ConnectionId = Uuid;

/// Outbound side of one physical connection.
///
/// Two handles are the same handle iff their connection ids match.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    sender: ClientSender,
}

impl ConnectionHandle {
    pub fn new(sender: ClientSender) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queue a message for this connection. Returns false once the writer
    /// side has gone away.
    pub fn send(&self, message: ServerMessage) -> bool {
        self.sender.send(message).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

impl PartialEq for ConnectionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ConnectionHandle {}

/// A registered, currently connected participant.
#[derive(Debug, Clone)]
pub struct ConnectedParticipant {
    pub identity: String,
    pub role: Role,
    pub display_name: String,
    /// Directory profile id. Stored as data only, never used as a lookup key.
    pub profile_id: String,
    pub handle: ConnectionHandle,
    pub registered_at: DateTime<Utc>,
}

/// Volatile identity → connection registry.
#[derive(Clone)]
pub struct PresenceRegistry {
    participants: Arc<DashMap<String, ConnectedParticipant>>,
    directory: Arc<dyn IdentityDirectory>,
    collaborator_timeout: Duration,
}

impl PresenceRegistry {
    pub fn new(directory: Arc<dyn IdentityDirectory>, collaborator_timeout: Duration) -> Self {
        Self {
            participants: Arc::new(DashMap::new()),
            directory,
            collaborator_timeout,
        }
    }

    /// Resolve the identity's profile and bind `handle` to it.
    ///
    /// Any earlier handle for the same identity is superseded but not closed.
    pub async fn register(
        &self,
        identity: &str,
        role: Role,
        display_name: &str,
        handle: ConnectionHandle,
    ) -> Result<ConnectedParticipant> {
        let profile = bounded(
            "identity directory",
            self.collaborator_timeout,
            self.directory.resolve_or_create(identity, role, display_name),
        )
        .await
        .map_err(|e| match e {
            CollaboratorError::Timeout(what) => CoordinatorError::CollaboratorTimeout(what),
            other => CoordinatorError::IdentityResolution(other.to_string()),
        })?;

        let participant = ConnectedParticipant {
            identity: identity.to_string(),
            role: profile.role,
            display_name: profile.name,
            profile_id: profile.id,
            handle,
            registered_at: Utc::now(),
        };

        let previous = self
            .participants
            .insert(identity.to_string(), participant.clone());

        if let Some(previous) = previous {
            if previous.handle != participant.handle && !previous.handle.is_closed() {
                tracing::warn!(
                    identity = identity,
                    previous_connection = %previous.handle.id(),
                    connection = %participant.handle.id(),
                    "Identity registered from a second live connection, superseding the earlier one"
                );
            }
        }

        tracing::info!(
            identity = identity,
            role = %participant.role,
            connection = %participant.handle.id(),
            "Participant registered"
        );

        if participant.role == Role::Doctor {
            self.broadcast_presence(&participant.identity, true);
        }

        Ok(participant)
    }

    /// Current registry entry for `identity`.
    pub fn lookup(&self, identity: &str) -> Option<ConnectedParticipant> {
        self.participants.get(identity).map(|p| p.clone())
    }

    pub fn is_online(&self, identity: &str) -> bool {
        self.participants.contains_key(identity)
    }

    /// Remove the entry bound to `handle`, if it is still the current one.
    ///
    /// A stale disconnect (the identity has since re-registered from another
    /// connection) leaves the newer entry untouched.
    pub fn unregister(&self, handle: &ConnectionHandle) -> Option<ConnectedParticipant> {
        let identity = self
            .participants
            .iter()
            .find(|entry| entry.handle == *handle)
            .map(|entry| entry.key().clone())?;

        let (_, removed) = self
            .participants
            .remove_if(&identity, |_, p| p.handle == *handle)?;

        tracing::info!(
            identity = removed.identity.as_str(),
            connection = %handle.id(),
            "Participant unregistered"
        );

        if removed.role == Role::Doctor {
            self.broadcast_presence(&removed.identity, false);
        }

        Some(removed)
    }

    /// Send a message to the identity's current connection. Returns true if
    /// it was queued.
    pub fn send_to(&self, identity: &str, message: ServerMessage) -> bool {
        match self.participants.get(identity) {
            Some(participant) => participant.handle.send(message),
            None => false,
        }
    }

    /// Get the number of currently connected participants.
    pub fn online_count(&self) -> usize {
        self.participants.len()
    }

    pub fn online_doctors(&self) -> Vec<ConnectedParticipant> {
        let mut doctors: Vec<ConnectedParticipant> = self
            .participants
            .iter()
            .filter(|entry| entry.role == Role::Doctor)
            .map(|entry| entry.value().clone())
            .collect();
        doctors.sort_by(|a, b| a.display_name.cmp(&b.display_name));
        doctors
    }

    /// Tell every other connected participant that a doctor came or went.
    fn broadcast_presence(&self, identity: &str, online: bool) {
        let recipients: Vec<ConnectionHandle> = self
            .participants
            .iter()
            .filter(|entry| entry.key() != identity)
            .map(|entry| entry.handle.clone())
            .collect();

        for handle in &recipients {
            handle.send(ServerMessage::PresenceChanged {
                identity: identity.to_string(),
                online,
            });
        }

        tracing::debug!(
            identity = identity,
            online = online,
            recipients = recipients.len(),
            "Broadcast presence change"
        );
    }
}
