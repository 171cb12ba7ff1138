//! WebSocket connection handler.
//!
//! Manages individual WebSocket connections: parsing client messages,
//! routing them to the registry, session manager and relay, and tearing
//! everything down exactly once when the socket closes.

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::error::{CoordinatorError, Result};
use crate::presence::ConnectionHandle;
use crate::protocol::{ClientMessage, Role, ServerMessage};
use crate::state::CoordinatorState;

/// Handle a single WebSocket connection.
///
/// This function runs for the lifetime of the connection:
/// 1. Spawns a sender task draining the connection's outbound queue
/// 2. Processes incoming frames one at a time until the socket closes
/// 3. Unregisters the connection and ends any calls it was part of
pub async fn handle_websocket(socket: WebSocket, state: CoordinatorState) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Create the outbound channel for this client
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
    let handle = ConnectionHandle::new(tx);
    let connection_id = handle.id();

    // ── Step 1: Spawn Sender Task ─────────────────────────────────────────

    let sender_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match serde_json::to_string(&msg) {
                Ok(json) => {
                    if ws_sender.send(Message::Text(json)).await.is_err() {
                        break; // Connection closed
                    }
                }
                Err(e) => {
                    tracing::error!("Failed to serialize server message: {}", e);
                }
            }
        }
    });

    tracing::debug!(connection = %connection_id, "WebSocket opened");

    // ── Step 2: Process Messages ──────────────────────────────────────────

    let mut connection = Connection::new(state, handle);

    while let Some(msg_result) = ws_receiver.next().await {
        match msg_result {
            Ok(Message::Text(text)) => {
                connection.handle_text(&text).await;
            }
            Ok(Message::Close(_)) => {
                tracing::debug!(connection = %connection_id, "Client sent close frame");
                break;
            }
            Err(e) => {
                tracing::warn!(
                    connection = %connection_id,
                    error = %e,
                    "WebSocket error"
                );
                break;
            }
            _ => {} // Binary, Ping, Pong: axum answers pings itself
        }
    }

    // ── Step 3: Cleanup ───────────────────────────────────────────────────

    connection.close().await;
    sender_task.abort();
}

/// One client connection's view of the coordinator.
///
/// Inbound frames are processed sequentially through `handle_text`; `close`
/// consumes the connection so teardown cannot run twice.
pub struct Connection {
    state: CoordinatorState,
    handle: ConnectionHandle,
    identity: Option<String>,
}

impl Connection {
    pub fn new(state: CoordinatorState, handle: ConnectionHandle) -> Self {
        Self {
            state,
            handle,
            identity: None,
        }
    }

    /// Identity bound by a successful `register`, if any.
    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    /// Parse and dispatch one text frame. Failures are reported back on this
    /// connection; none of them close it.
    pub async fn handle_text(&mut self, text: &str) {
        let msg = match ClientMessage::parse(text) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!(
                    connection = %self.handle.id(),
                    identity = ?self.identity,
                    error = %e,
                    "Failed to parse client message"
                );
                self.handle.send(ServerMessage::from(&e));
                return;
            }
        };

        if let Err(e) = self.dispatch(msg).await {
            tracing::debug!(
                connection = %self.handle.id(),
                identity = ?self.identity,
                kind = ?e.kind(),
                error = %e,
                "Request failed"
            );
            self.handle.send(ServerMessage::from(&e));
        }
    }

    async fn dispatch(&mut self, msg: ClientMessage) -> Result<()> {
        if let ClientMessage::Ping = msg {
            self.handle.send(ServerMessage::Pong);
            return Ok(());
        }

        let me = match (&msg, self.identity.clone()) {
            (
                ClientMessage::Register {
                    identity,
                    role,
                    display_name,
                },
                None,
            ) => {
                return self.register(identity, *role, display_name).await;
            }
            (ClientMessage::Register { .. }, Some(_)) => {
                return Err(CoordinatorError::InvalidRequest(
                    "connection is already registered".to_string(),
                ));
            }
            (_, None) => return Err(CoordinatorError::NotRegistered),
            (_, Some(me)) => me,
        };

        match msg {
            ClientMessage::InitiateCall {
                target_identity,
                appointment_id,
            } => {
                self.state
                    .sessions
                    .initiate(&me, &target_identity, appointment_id.as_deref())
                    .await?;
            }
            ClientMessage::RespondCall { session_id, accept } => {
                self.state.sessions.respond(&session_id, &me, accept).await?;
            }
            ClientMessage::EndCall { session_id } => {
                self.state.sessions.end(&session_id, &me).await?;
            }
            ClientMessage::Signal {
                session_id,
                payload,
            } => {
                self.state.relay.relay(&session_id, &me, payload).await?;
            }
            ClientMessage::Chat { session_id, text } => {
                self.state.relay.chat(&session_id, &me, &text).await?;
            }
            ClientMessage::PrescriptionCreated {
                session_id,
                prescription_id,
            } => {
                self.state
                    .sessions
                    .record_prescription(&session_id, &me, &prescription_id)
                    .await?;
            }
            ClientMessage::AppointmentReminder {
                appointment_id,
                reminder,
            } => {
                self.state
                    .reminders
                    .send(&appointment_id, reminder, &me)
                    .await?;
            }
            ClientMessage::Register { .. } | ClientMessage::Ping => {}
        }
        Ok(())
    }

    /// A failure is answered with `registration-failed` and then the usual
    /// `error` frame carrying the kind, so clients can tell a timed-out
    /// directory from a rejected identity.
    async fn register(&mut self, identity: &str, role: Role, display_name: &str) -> Result<()> {
        match self
            .state
            .registry
            .register(identity, role, display_name, self.handle.clone())
            .await
        {
            Ok(participant) => {
                self.identity = Some(participant.identity.clone());
                self.state
                    .sessions
                    .rebind_connection(&participant.identity, self.handle.id());
                self.handle.send(ServerMessage::Registered {
                    identity: participant.identity,
                    role: participant.role,
                    display_name: participant.display_name,
                });
            }
            Err(e) => {
                tracing::warn!(
                    connection = %self.handle.id(),
                    identity = identity,
                    error = %e,
                    "Registration failed"
                );
                self.handle.send(ServerMessage::RegistrationFailed {
                    reason: e.to_string(),
                });
                return Err(e);
            }
        }
        Ok(())
    }

    /// Unregister, then end every call reached through this connection.
    pub async fn close(self) {
        let removed = self.state.registry.unregister(&self.handle);
        let ended = self.state.sessions.on_disconnect(self.handle.id()).await;

        tracing::info!(
            connection = %self.handle.id(),
            identity = ?self.identity,
            unregistered = removed.is_some(),
            calls_ended = ended.len(),
            "WebSocket disconnected"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{
        AppointmentRecord, AppointmentStatus, AuditEvent, MemoryAppointmentBook, RecordingAuditor,
    };
    use crate::config::CoordinatorConfig;
    use crate::error::ErrorKind;
    use crate::presence::tests::{connection, drain, StalledDirectory};
    use crate::protocol::{ReminderKind, SignalPayload};
    use crate::state::tests::test_state;
    use chrono::Utc;
    use serde_json::json;
    use std::sync::Arc;
    use tokio::sync::mpsc::UnboundedReceiver;

    async fn registered(
        state: &CoordinatorState,
        identity: &str,
        role: &str,
        name: &str,
    ) -> (Connection, UnboundedReceiver<ServerMessage>) {
        let (handle, mut rx) = connection();
        let mut conn = Connection::new(state.clone(), handle);
        conn.handle_text(
            &json!({
                "type": "register",
                "identity": identity,
                "role": role,
                "displayName": name,
            })
            .to_string(),
        )
        .await;
        assert!(matches!(
            drain(&mut rx).as_slice(),
            [ServerMessage::Registered { .. }]
        ));
        (conn, rx)
    }

    fn error_kind(messages: &[ServerMessage]) -> Option<ErrorKind> {
        messages.iter().find_map(|m| match m {
            ServerMessage::Error { kind, .. } => Some(*kind),
            _ => None,
        })
    }

    #[tokio::test]
    async fn test_only_register_and_ping_before_registration() {
        let (state, _, _) = test_state();
        let (handle, mut rx) = connection();
        let mut conn = Connection::new(state, handle);

        conn.handle_text(r#"{"type":"ping"}"#).await;
        assert_eq!(drain(&mut rx), vec![ServerMessage::Pong]);

        conn.handle_text(r#"{"type":"call.initiate","targetIdentity":"D1"}"#)
            .await;
        assert_eq!(error_kind(&drain(&mut rx)), Some(ErrorKind::NotRegistered));
        assert!(conn.identity().is_none());
    }

    #[tokio::test]
    async fn test_malformed_frames_keep_connection_usable() {
        let (state, _, _) = test_state();
        let (mut conn, mut rx) = registered(&state, "P1", "patient", "Pat").await;

        conn.handle_text("not json").await;
        assert_eq!(error_kind(&drain(&mut rx)), Some(ErrorKind::MalformedMessage));

        conn.handle_text(r#"{"type":"call.respond","sessionId":"s1"}"#)
            .await;
        assert_eq!(error_kind(&drain(&mut rx)), Some(ErrorKind::MalformedMessage));

        conn.handle_text(r#"{"type":"ping"}"#).await;
        assert_eq!(drain(&mut rx), vec![ServerMessage::Pong]);
    }

    #[tokio::test]
    async fn test_second_register_is_invalid() {
        let (state, _, _) = test_state();
        let (mut conn, mut rx) = registered(&state, "P1", "patient", "Pat").await;

        conn.handle_text(r#"{"type":"register","identity":"P2","role":"patient","displayName":"X"}"#)
            .await;
        assert_eq!(error_kind(&drain(&mut rx)), Some(ErrorKind::InvalidRequest));
        assert_eq!(conn.identity(), Some("P1"));
        assert!(!state.registry.is_online("P2"));
    }

    #[tokio::test]
    async fn test_role_conflict_reports_registration_failed() {
        let (state, _, _) = test_state();
        let (_first, _rx) = registered(&state, "P1", "patient", "Pat").await;

        let (handle, mut rx) = connection();
        let mut conn = Connection::new(state, handle);
        conn.handle_text(r#"{"type":"register","identity":"P1","role":"doctor","displayName":"Pat"}"#)
            .await;
        let replies = drain(&mut rx);
        assert!(matches!(
            replies.as_slice(),
            [ServerMessage::RegistrationFailed { .. }, ServerMessage::Error { .. }]
        ));
        assert_eq!(error_kind(&replies), Some(ErrorKind::IdentityResolutionError));
        assert!(conn.identity().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_directory_timeout_reports_collaborator_timeout() {
        let config = CoordinatorConfig {
            collaborator_timeout_ms: 200,
            ..CoordinatorConfig::default()
        };
        let state = CoordinatorState::new(
            config.clone(),
            Arc::new(StalledDirectory),
            Arc::new(MemoryAppointmentBook::new(config.appointment_window())),
            Arc::new(RecordingAuditor::new()),
        );
        let (handle, mut rx) = connection();
        let mut conn = Connection::new(state.clone(), handle);

        conn.handle_text(r#"{"type":"register","identity":"P1","role":"patient","displayName":"Pat"}"#)
            .await;

        let replies = drain(&mut rx);
        assert!(matches!(
            replies.first(),
            Some(ServerMessage::RegistrationFailed { .. })
        ));
        assert_eq!(error_kind(&replies), Some(ErrorKind::CollaboratorTimeout));
        assert!(conn.identity().is_none());
        assert!(!state.registry.is_online("P1"));

        // Still usable
        conn.handle_text(r#"{"type":"ping"}"#).await;
        assert_eq!(drain(&mut rx), vec![ServerMessage::Pong]);
    }

    #[tokio::test]
    async fn test_close_runs_unregister_then_disconnect() {
        let (state, _, _) = test_state();
        let (mut patient, mut p_rx) = registered(&state, "P1", "patient", "Pat").await;
        let (doctor, mut d_rx) = registered(&state, "D1", "doctor", "Dr. Rao").await;
        drain(&mut p_rx);

        patient
            .handle_text(r#"{"type":"call.initiate","targetIdentity":"D1"}"#)
            .await;
        let session_id = match drain(&mut d_rx).first() {
            Some(ServerMessage::IncomingCall { session_id, .. }) => session_id.clone(),
            other => panic!("Expected IncomingCall, got {:?}", other),
        };

        doctor.close().await;

        assert!(!state.registry.is_online("D1"));
        assert!(state.sessions.get(&session_id).is_none());
        let to_patient = drain(&mut p_rx);
        assert!(to_patient.contains(&ServerMessage::CallRejected {
            session_id,
            reason: Some("peer disconnected".into()),
        }));
        assert!(to_patient.contains(&ServerMessage::PresenceChanged {
            identity: "D1".into(),
            online: false,
        }));
    }

    /// Patient P1 and doctor D1 hold a booked consultation start to finish.
    #[tokio::test]
    async fn test_consultation_scenario() {
        let (state, book, auditor) = test_state();
        book.insert(AppointmentRecord {
            appointment_id: "APT-7".into(),
            patient_identity: "P1".into(),
            doctor_identity: "D1".into(),
            scheduled_at: Utc::now(),
            duration_minutes: 30,
            status: AppointmentStatus::Scheduled,
        });

        let (mut doctor, mut d_rx) = registered(&state, "D1", "doctor", "Dr. Rao").await;
        let (mut patient, mut p_rx) = registered(&state, "P1", "patient", "Pat").await;

        patient
            .handle_text(r#"{"type":"call.initiate","targetIdentity":"D1","appointmentId":"APT-7"}"#)
            .await;
        let (session_id, channel_id) = match drain(&mut p_rx).as_slice() {
            [ServerMessage::CallInitiated {
                session_id,
                channel_id,
                target_name,
                ..
            }] => {
                assert_eq!(target_name, "Dr. Rao");
                (session_id.clone(), channel_id.clone())
            }
            other => panic!("Expected CallInitiated, got {:?}", other),
        };
        assert!(matches!(
            drain(&mut d_rx).as_slice(),
            [ServerMessage::IncomingCall { .. }]
        ));

        doctor
            .handle_text(&json!({"type": "call.respond", "sessionId": session_id, "accept": true}).to_string())
            .await;
        let accepted = ServerMessage::CallAccepted {
            session_id: session_id.clone(),
            channel_id,
        };
        assert_eq!(drain(&mut p_rx), vec![accepted.clone()]);
        assert_eq!(drain(&mut d_rx), vec![accepted]);
        assert_eq!(book.status("APT-7"), Some(AppointmentStatus::Ongoing));

        let offer = json!({"type": "offer", "sdp": "v=0\r\no=- 46117 2 IN IP4 127.0.0.1\r\n"});
        patient
            .handle_text(&json!({"type": "signal", "sessionId": session_id, "payload": offer}).to_string())
            .await;
        assert_eq!(
            drain(&mut d_rx),
            vec![ServerMessage::Signal {
                session_id: session_id.clone(),
                from: "P1".into(),
                payload: SignalPayload::from_json(&offer.to_string()).unwrap(),
            }]
        );

        let answer = json!({"type": "answer", "sdp": "v=0\r\n"});
        doctor
            .handle_text(&json!({"type": "signal", "sessionId": session_id, "payload": answer}).to_string())
            .await;
        assert_eq!(drain(&mut p_rx).len(), 1);

        doctor
            .handle_text(
                &json!({"type": "prescription.created", "sessionId": session_id, "prescriptionId": "RX-7"})
                    .to_string(),
            )
            .await;
        let prescribed = ServerMessage::PrescriptionCreated {
            session_id: session_id.clone(),
            prescription_id: "RX-7".into(),
            from: "D1".into(),
            appointment_id: Some("APT-7".into()),
        };
        assert_eq!(drain(&mut p_rx), vec![prescribed.clone()]);
        assert_eq!(drain(&mut d_rx), vec![prescribed]);
        assert_eq!(book.get("APT-7").unwrap().prescription_id.as_deref(), Some("RX-7"));

        patient
            .handle_text(&json!({"type": "call.end", "sessionId": session_id}).to_string())
            .await;
        assert_eq!(
            drain(&mut d_rx),
            vec![ServerMessage::CallEnded {
                session_id: session_id.clone(),
                reason: "ended".into(),
            }]
        );
        assert_eq!(book.status("APT-7"), Some(AppointmentStatus::Completed));
        assert!(state.sessions.get(&session_id).is_none());

        // Ending again from the other side is a silent no-op
        doctor
            .handle_text(&json!({"type": "call.end", "sessionId": session_id}).to_string())
            .await;
        assert!(drain(&mut d_rx).is_empty());

        let events = auditor.events();
        assert!(matches!(events.first(), Some(AuditEvent::CallStarted { .. })));
        assert!(matches!(events.last(), Some(AuditEvent::CallEnded { .. })));
    }

    #[tokio::test]
    async fn test_reminder_dispatch() {
        let (state, book, _) = test_state();
        book.insert(AppointmentRecord {
            appointment_id: "APT-8".into(),
            patient_identity: "P1".into(),
            doctor_identity: "D1".into(),
            scheduled_at: Utc::now(),
            duration_minutes: 30,
            status: AppointmentStatus::Scheduled,
        });
        let (mut doctor, mut d_rx) = registered(&state, "D1", "doctor", "Dr. Rao").await;
        let (_patient, mut p_rx) = registered(&state, "P1", "patient", "Pat").await;

        doctor
            .handle_text(r#"{"type":"appointment.reminder","appointmentId":"APT-8","reminder":"5min"}"#)
            .await;
        for rx in [&mut d_rx, &mut p_rx] {
            assert!(matches!(
                drain(rx).as_slice(),
                [ServerMessage::AppointmentReminder {
                    reminder: ReminderKind::FiveMinutes,
                    ..
                }]
            ));
        }
    }
}
