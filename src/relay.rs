//! Signaling relay.
//!
//! Forwards opaque WebRTC negotiation payloads (SDP offers/answers, ICE
//! candidates) and in-call chat between the two parties of a session. The
//! coordinator never looks inside a signaling payload.

use chrono::Utc;
use uuid::Uuid;

use crate::error::{CoordinatorError, Result};
use crate::presence::PresenceRegistry;
use crate::protocol::{ServerMessage, SignalPayload};
use crate::session::{CallSession, CallSessionManager, CallState};

/// Longest chat message accepted, in characters.
pub const MAX_CHAT_LENGTH: usize = 4096;

#[derive(Clone)]
pub struct SignalingRelay {
    registry: PresenceRegistry,
    sessions: CallSessionManager,
}

impl SignalingRelay {
    pub fn new(registry: PresenceRegistry, sessions: CallSessionManager) -> Self {
        Self { registry, sessions }
    }

    /// Forward `payload` from `from` to the other party of the session.
    ///
    /// Signals are allowed while ringing so early ICE candidates are not
    /// lost. If the destination has gone away its disconnect is applied and
    /// the sender still gets success; the resulting `call-ended` tells it
    /// what happened.
    pub async fn relay(&self, session_id: &str, from: &str, payload: SignalPayload) -> Result<()> {
        let session = self.live_session(session_id, from)?;
        let Some(to) = session.peer_of(from) else {
            return Err(not_a_participant());
        };

        let delivered = self.registry.send_to(
            to,
            ServerMessage::Signal {
                session_id: session_id.to_string(),
                from: from.to_string(),
                payload,
            },
        );

        if delivered {
            tracing::debug!(
                session_id = session_id,
                from = from,
                to = to,
                "Relayed signal"
            );
        } else {
            self.destination_gone(&session, to).await;
        }
        Ok(())
    }

    /// Deliver an in-call chat message to the other party.
    pub async fn chat(&self, session_id: &str, from: &str, text: &str) -> Result<()> {
        if text.trim().is_empty() {
            return Err(CoordinatorError::InvalidRequest(
                "chat text must not be empty".to_string(),
            ));
        }
        if text.chars().count() > MAX_CHAT_LENGTH {
            return Err(CoordinatorError::InvalidRequest(format!(
                "chat text exceeds {} characters",
                MAX_CHAT_LENGTH
            )));
        }

        let session = self.live_session(session_id, from)?;
        if session.state != CallState::Connected {
            return Err(CoordinatorError::NotTerminalEligible {
                session_id: session_id.to_string(),
                state: session.state.as_str().to_string(),
            });
        }
        let Some(to) = session.peer_of(from) else {
            return Err(not_a_participant());
        };

        let delivered = self.registry.send_to(
            to,
            ServerMessage::Chat {
                session_id: session_id.to_string(),
                from: from.to_string(),
                text: text.to_string(),
                message_id: Uuid::new_v4().to_string(),
                sent_at: Utc::now(),
            },
        );

        if !delivered {
            self.destination_gone(&session, to).await;
        }
        Ok(())
    }

    /// Look the session up fresh for every message, so traffic stops the
    /// moment a session is removed.
    fn live_session(&self, session_id: &str, from: &str) -> Result<CallSession> {
        let session = self
            .sessions
            .get(session_id)
            .ok_or_else(|| CoordinatorError::SessionNotFound(session_id.to_string()))?;

        if !matches!(session.state, CallState::Ringing | CallState::Connected) {
            return Err(CoordinatorError::NotTerminalEligible {
                session_id: session_id.to_string(),
                state: session.state.as_str().to_string(),
            });
        }
        if !session.involves(from) {
            return Err(not_a_participant());
        }
        Ok(session)
    }

    async fn destination_gone(&self, session: &CallSession, to: &str) {
        tracing::warn!(
            session_id = session.session_id.as_str(),
            to = to,
            "Relay destination is gone, terminating session"
        );
        if let Some(connection) = session.connection_of(to) {
            self.sessions.on_disconnect(connection).await;
        }
    }
}

fn not_a_participant() -> CoordinatorError {
    CoordinatorError::NotAuthorized("not a participant of this call".to_string())
}
