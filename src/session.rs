//! Call session management.
//!
//! Owns the session table, the per-pair lock and the signaling channels, and
//! drives every session through its state machine:
//!
//! ```text
//! ringing ──accept──► connected ──end / disconnect──► ended
//!    │
//!    ├──reject / receiver disconnect──► rejected
//!    ├──end / initiator disconnect────► ended
//!    └──sweep──────────────────────────► timed_out
//! ```
//!
//! Terminal sessions are removed from the table as part of the transition.
//! The table lock is never held across an `.await`; everything read before a
//! collaborator call is re-checked after it.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use uuid::Uuid;

use crate::collaborators::{
    bounded, AppointmentAuthorizer, AuditEvent, CollaboratorError, SessionAuditor,
};
use crate::config::CoordinatorConfig;
use crate::error::{CoordinatorError, Result};
use crate::presence::{ConnectionId, PresenceRegistry};
use crate::protocol::{AppointmentContext, CallerInfo, Role, ServerMessage};

/// `call-ended` reason for an explicit hang-up.
pub const REASON_ENDED: &str = "ended";

/// Reason attached to terminations caused by a dropped connection.
pub const REASON_PEER_DISCONNECTED: &str = "peer disconnected";

const REASON_REJECTED: &str = "rejected";

/// Lifecycle state of a call session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    Ringing,
    Connected,
    Ended,
    Rejected,
    TimedOut,
}

impl CallState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CallState::Ended | CallState::Rejected | CallState::TimedOut
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CallState::Ringing => "ringing",
            CallState::Connected => "connected",
            CallState::Ended => "ended",
            CallState::Rejected => "rejected",
            CallState::TimedOut => "timed_out",
        }
    }
}

/// One call attempt, from ring to termination.
#[derive(Debug, Clone)]
pub struct CallSession {
    pub session_id: String,
    pub channel_id: String,
    pub initiator: String,
    pub receiver: String,
    /// Connection each party was reached on. Rebound when a party
    /// re-registers.
    pub initiator_connection: ConnectionId,
    pub receiver_connection: ConnectionId,
    pub state: CallState,
    pub appointment: Option<AppointmentContext>,
    pub created_at: DateTime<Utc>,
    pub connected_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl CallSession {
    pub fn involves(&self, identity: &str) -> bool {
        self.initiator == identity || self.receiver == identity
    }

    /// The other participant, if `identity` is one of the two.
    pub fn peer_of(&self, identity: &str) -> Option<&str> {
        if self.initiator == identity {
            Some(&self.receiver)
        } else if self.receiver == identity {
            Some(&self.initiator)
        } else {
            None
        }
    }

    pub fn connection_of(&self, identity: &str) -> Option<ConnectionId> {
        if self.initiator == identity {
            Some(self.initiator_connection)
        } else if self.receiver == identity {
            Some(self.receiver_connection)
        } else {
            None
        }
    }

    /// Identity whose recorded connection is `connection`.
    fn party_on(&self, connection: ConnectionId) -> Option<&str> {
        if self.initiator_connection == connection {
            Some(&self.initiator)
        } else if self.receiver_connection == connection {
            Some(&self.receiver)
        } else {
            None
        }
    }

    fn appointment_id(&self) -> Option<String> {
        self.appointment.as_ref().map(|a| a.appointment_id.clone())
    }

    /// Whole minutes between accept and end, rounded.
    pub fn duration_minutes(&self) -> Option<i64> {
        let connected_at = self.connected_at?;
        let ended_at = self.ended_at.unwrap_or_else(Utc::now);
        let secs = (ended_at - connected_at).num_seconds().max(0);
        Some((secs as f64 / 60.0).round() as i64)
    }
}

/// Relay scope binding the two connections of a connected session.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalingChannel {
    pub channel_id: String,
    pub session_id: String,
    pub connections: [ConnectionId; 2],
    pub opened_at: DateTime<Utc>,
}

/// Unordered pair of identities.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PairKey(String, String);

impl PairKey {
    fn new(a: &str, b: &str) -> Self {
        if a <= b {
            PairKey(a.to_string(), b.to_string())
        } else {
            PairKey(b.to_string(), a.to_string())
        }
    }
}

/// Sessions, the pair index and open channels, always mutated together.
#[derive(Default)]
struct SessionTable {
    sessions: HashMap<String, CallSession>,
    pairs: HashMap<PairKey, String>,
    channels: HashMap<String, SignalingChannel>,
}

impl SessionTable {
    fn active_for_pair(&self, a: &str, b: &str) -> Option<&String> {
        self.pairs.get(&PairKey::new(a, b))
    }

    fn insert(&mut self, session: CallSession) {
        self.pairs.insert(
            PairKey::new(&session.initiator, &session.receiver),
            session.session_id.clone(),
        );
        self.sessions.insert(session.session_id.clone(), session);
    }

    /// Remove a session together with its pair lock and channel, stamping
    /// the terminal state.
    fn finish(&mut self, session_id: &str, state: CallState) -> Option<CallSession> {
        let mut session = self.sessions.remove(session_id)?;
        self.pairs
            .remove(&PairKey::new(&session.initiator, &session.receiver));
        self.channels.remove(&session.channel_id);
        session.state = state;
        session.ended_at = Some(Utc::now());
        Some(session)
    }
}

/// Owns every call session and its state transitions.
#[derive(Clone)]
pub struct CallSessionManager {
    table: Arc<Mutex<SessionTable>>,
    registry: PresenceRegistry,
    authorizer: Arc<dyn AppointmentAuthorizer>,
    auditor: Arc<dyn SessionAuditor>,
    ring_timeout: chrono::Duration,
    collaborator_timeout: Duration,
}

impl CallSessionManager {
    pub fn new(
        registry: PresenceRegistry,
        authorizer: Arc<dyn AppointmentAuthorizer>,
        auditor: Arc<dyn SessionAuditor>,
        config: &CoordinatorConfig,
    ) -> Self {
        Self {
            table: Arc::new(Mutex::new(SessionTable::default())),
            registry,
            authorizer,
            auditor,
            ring_timeout: config.ring_timeout(),
            collaborator_timeout: config.collaborator_timeout(),
        }
    }

    // ── Call Initiation ───────────────────────────────────────────────────

    /// Ring `target` on behalf of `initiator`.
    ///
    /// With an appointment id the appointment authorizer must approve the
    /// pair first. On success the target receives `incoming-call` and the
    /// initiator `call-initiated`.
    pub async fn initiate(
        &self,
        initiator: &str,
        target: &str,
        appointment_id: Option<&str>,
    ) -> Result<CallSession> {
        if initiator == target {
            return Err(CoordinatorError::InvalidRequest(
                "cannot call yourself".to_string(),
            ));
        }
        if !self.registry.is_online(initiator) {
            return Err(CoordinatorError::NotRegistered);
        }
        if !self.registry.is_online(target) {
            return Err(CoordinatorError::TargetUnreachable(target.to_string()));
        }

        let appointment = match appointment_id {
            Some(id) => Some(self.authorize(id, initiator, target).await?),
            None => None,
        };

        // Either side may have dropped while the authorizer was consulted.
        let caller = self
            .registry
            .lookup(initiator)
            .ok_or(CoordinatorError::NotRegistered)?;
        let callee = self
            .registry
            .lookup(target)
            .ok_or_else(|| CoordinatorError::TargetUnreachable(target.to_string()))?;

        let session = {
            let mut table = self.table.lock();
            if let Some(existing) = table.active_for_pair(initiator, target) {
                return Err(CoordinatorError::SessionAlreadyActive(existing.clone()));
            }

            let session = CallSession {
                session_id: Uuid::new_v4().to_string(),
                channel_id: Uuid::new_v4().to_string(),
                initiator: initiator.to_string(),
                receiver: target.to_string(),
                initiator_connection: caller.handle.id(),
                receiver_connection: callee.handle.id(),
                state: CallState::Ringing,
                appointment: appointment.clone(),
                created_at: Utc::now(),
                connected_at: None,
                ended_at: None,
            };
            table.insert(session.clone());
            session
        };

        tracing::info!(
            session_id = session.session_id.as_str(),
            initiator = initiator,
            receiver = target,
            appointment_id = ?appointment_id,
            "Call ringing"
        );

        callee.handle.send(ServerMessage::IncomingCall {
            session_id: session.session_id.clone(),
            from: CallerInfo {
                identity: caller.identity.clone(),
                display_name: caller.display_name.clone(),
                role: caller.role,
            },
            appointment_context: appointment,
        });
        caller.handle.send(ServerMessage::CallInitiated {
            session_id: session.session_id.clone(),
            channel_id: session.channel_id.clone(),
            target: callee.identity.clone(),
            target_name: callee.display_name.clone(),
        });

        Ok(self.confirm_parties(session).await)
    }

    /// A party that unregistered between the lookup in `initiate` and the
    /// insert would never see its disconnect applied to the new session.
    /// Tear the session down in that case and return it as it now stands.
    async fn confirm_parties(&self, session: CallSession) -> CallSession {
        let dropped = if !self.is_current(&session.initiator, session.initiator_connection) {
            session.initiator.clone()
        } else if !self.is_current(&session.receiver, session.receiver_connection) {
            session.receiver.clone()
        } else {
            return session;
        };

        let receiver_dropped = dropped == session.receiver;
        let finished = {
            let mut table = self.table.lock();
            let previous = table.sessions.get(&session.session_id).map(|live| live.state);
            match previous {
                Some(previous) => {
                    let terminal = match previous {
                        CallState::Ringing if receiver_dropped => CallState::Rejected,
                        _ => CallState::Ended,
                    };
                    table
                        .finish(&session.session_id, terminal)
                        .map(|finished| (finished, previous))
                }
                None => None,
            }
        };

        match finished {
            Some((finished, previous)) => {
                self.announce_disconnect(&finished, previous, &dropped).await;
                finished
            }
            // Already torn down elsewhere
            None => CallSession {
                state: if receiver_dropped {
                    CallState::Rejected
                } else {
                    CallState::Ended
                },
                ended_at: Some(Utc::now()),
                ..session
            },
        }
    }

    async fn authorize(
        &self,
        appointment_id: &str,
        initiator: &str,
        target: &str,
    ) -> Result<AppointmentContext> {
        let decision = bounded(
            "appointment authorizer",
            self.collaborator_timeout,
            self.authorizer.authorize(appointment_id, initiator, target),
        )
        .await
        .map_err(|e| match e {
            CollaboratorError::Timeout(what) => CoordinatorError::CollaboratorTimeout(what),
            other => CoordinatorError::Unauthorized(format!("appointment check failed: {}", other)),
        })?;

        if !decision.allowed {
            let reason = decision
                .reason
                .unwrap_or_else(|| "appointment does not permit this call".to_string());
            tracing::info!(
                appointment_id = appointment_id,
                initiator = initiator,
                target = target,
                reason = reason.as_str(),
                "Call refused by appointment authorizer"
            );
            return Err(CoordinatorError::Unauthorized(reason));
        }

        Ok(AppointmentContext {
            appointment_id: appointment_id.to_string(),
            scheduled_at: decision.scheduled_at,
        })
    }

    // ── Answer / Hang Up ──────────────────────────────────────────────────

    /// Accept or reject a ringing call. Only the receiver may answer.
    pub async fn respond(
        &self,
        session_id: &str,
        responder: &str,
        accept: bool,
    ) -> Result<CallSession> {
        let session = {
            let mut table = self.table.lock();
            let session = table
                .sessions
                .get(session_id)
                .ok_or_else(|| CoordinatorError::SessionNotFound(session_id.to_string()))?;

            if session.state != CallState::Ringing {
                return Err(CoordinatorError::NotTerminalEligible {
                    session_id: session_id.to_string(),
                    state: session.state.as_str().to_string(),
                });
            }
            if session.receiver != responder {
                return Err(CoordinatorError::NotAuthorized(
                    "only the called participant can answer".to_string(),
                ));
            }

            if accept {
                let initiator_connection = self
                    .current_connection(&session.initiator)
                    .unwrap_or(session.initiator_connection);
                let receiver_connection = self
                    .current_connection(&session.receiver)
                    .unwrap_or(session.receiver_connection);
                let channel_id = session.channel_id.clone();

                let session = match table.sessions.get_mut(session_id) {
                    Some(session) => session,
                    None => return Err(CoordinatorError::SessionNotFound(session_id.to_string())),
                };
                session.state = CallState::Connected;
                session.connected_at = Some(Utc::now());
                session.initiator_connection = initiator_connection;
                session.receiver_connection = receiver_connection;
                let snapshot = session.clone();

                table.channels.insert(
                    channel_id.clone(),
                    SignalingChannel {
                        channel_id,
                        session_id: session_id.to_string(),
                        connections: [initiator_connection, receiver_connection],
                        opened_at: Utc::now(),
                    },
                );
                snapshot
            } else {
                match table.finish(session_id, CallState::Rejected) {
                    Some(session) => session,
                    None => return Err(CoordinatorError::SessionNotFound(session_id.to_string())),
                }
            }
        };

        if accept {
            tracing::info!(
                session_id = session_id,
                channel_id = session.channel_id.as_str(),
                "Call connected"
            );

            let accepted = ServerMessage::CallAccepted {
                session_id: session.session_id.clone(),
                channel_id: session.channel_id.clone(),
            };
            self.registry.send_to(&session.initiator, accepted.clone());
            self.registry.send_to(&session.receiver, accepted);

            self.audit(AuditEvent::CallStarted {
                session_id: session.session_id.clone(),
                appointment_id: session.appointment_id(),
                initiator: session.initiator.clone(),
                receiver: session.receiver.clone(),
            })
            .await;

            if let Some(appointment_id) = session.appointment_id() {
                self.follow_up(
                    &session.session_id,
                    &appointment_id,
                    "mark_in_progress",
                    self.authorizer.mark_in_progress(&appointment_id),
                )
                .await;
            }
        } else {
            tracing::info!(session_id = session_id, "Call rejected");
            self.registry.send_to(
                &session.initiator,
                ServerMessage::CallRejected {
                    session_id: session.session_id.clone(),
                    reason: None,
                },
            );
            self.conclude(&session, CallState::Ringing, REASON_REJECTED)
                .await;
        }

        Ok(session)
    }

    /// Hang up a connected call or cancel a ringing one.
    ///
    /// Ending a session that no longer exists is a no-op, so both parties
    /// hanging up at once is not an error.
    pub async fn end(&self, session_id: &str, by: &str) -> Result<Option<CallSession>> {
        let (session, previous) = {
            let mut table = self.table.lock();
            let previous = match table.sessions.get(session_id) {
                None => {
                    tracing::debug!(session_id = session_id, by = by, "End for absent session ignored");
                    return Ok(None);
                }
                Some(session) if !session.involves(by) => {
                    return Err(CoordinatorError::NotAuthorized(
                        "not a participant of this call".to_string(),
                    ));
                }
                Some(session) => session.state,
            };
            match table.finish(session_id, CallState::Ended) {
                Some(session) => (session, previous),
                None => return Ok(None),
            }
        };

        tracing::info!(
            session_id = session_id,
            by = by,
            was = previous.as_str(),
            "Call ended"
        );

        if let Some(peer) = session.peer_of(by) {
            self.registry.send_to(
                peer,
                ServerMessage::CallEnded {
                    session_id: session.session_id.clone(),
                    reason: REASON_ENDED.to_string(),
                },
            );
        }
        self.conclude(&session, previous, REASON_ENDED).await;

        Ok(Some(session))
    }

    // ── Disconnects & Rebinding ───────────────────────────────────────────

    /// Point a re-registered identity's sessions at its new connection, so a
    /// later close of the old connection no longer affects them.
    pub fn rebind_connection(&self, identity: &str, connection: ConnectionId) {
        let mut table = self.table.lock();
        let mut channels_to_update = Vec::new();

        for session in table.sessions.values_mut() {
            let slot = if session.initiator == identity {
                &mut session.initiator_connection
            } else if session.receiver == identity {
                &mut session.receiver_connection
            } else {
                continue;
            };
            if *slot != connection {
                *slot = connection;
                channels_to_update.push((
                    session.channel_id.clone(),
                    [session.initiator_connection, session.receiver_connection],
                ));
                tracing::debug!(
                    session_id = session.session_id.as_str(),
                    identity = identity,
                    "Rebound session to new connection"
                );
            }
        }

        for (channel_id, connections) in channels_to_update {
            if let Some(channel) = table.channels.get_mut(&channel_id) {
                channel.connections = connections;
            }
        }
    }

    /// Terminate every live session that was reached through `connection`.
    ///
    /// Ringing sessions whose receiver dropped become `rejected`; everything
    /// else becomes `ended`. The remaining party is told the peer
    /// disconnected. A party that has already re-registered on another
    /// connection is left alone.
    pub async fn on_disconnect(&self, connection: ConnectionId) -> Vec<CallSession> {
        let affected: Vec<(CallSession, CallState, String)> = {
            let mut table = self.table.lock();
            let matches: Vec<(String, String, CallState)> = table
                .sessions
                .values()
                .filter_map(|session| {
                    let dropped = session.party_on(connection)?;
                    if self.is_superseded(dropped, connection) {
                        return None;
                    }
                    Some((
                        session.session_id.clone(),
                        dropped.to_string(),
                        session.state,
                    ))
                })
                .collect();

            matches
                .into_iter()
                .filter_map(|(session_id, dropped, previous)| {
                    let terminal = match previous {
                        CallState::Ringing => {
                            let is_receiver = table
                                .sessions
                                .get(&session_id)
                                .map(|s| s.receiver == dropped)
                                .unwrap_or(false);
                            if is_receiver {
                                CallState::Rejected
                            } else {
                                CallState::Ended
                            }
                        }
                        _ => CallState::Ended,
                    };
                    table
                        .finish(&session_id, terminal)
                        .map(|session| (session, previous, dropped))
                })
                .collect()
        };

        let mut ended = Vec::with_capacity(affected.len());
        for (session, previous, dropped) in affected {
            self.announce_disconnect(&session, previous, &dropped).await;
            ended.push(session);
        }
        ended
    }

    /// Tell the remaining party that `dropped` went away, then conclude.
    async fn announce_disconnect(&self, session: &CallSession, previous: CallState, dropped: &str) {
        tracing::info!(
            session_id = session.session_id.as_str(),
            dropped = dropped,
            state = session.state.as_str(),
            "Call terminated by disconnect"
        );

        if let Some(peer) = session.peer_of(dropped) {
            let notice = match session.state {
                CallState::Rejected => ServerMessage::CallRejected {
                    session_id: session.session_id.clone(),
                    reason: Some(REASON_PEER_DISCONNECTED.to_string()),
                },
                _ => ServerMessage::CallEnded {
                    session_id: session.session_id.clone(),
                    reason: REASON_PEER_DISCONNECTED.to_string(),
                },
            };
            self.registry.send_to(peer, notice);
        }

        self.conclude(session, previous, REASON_PEER_DISCONNECTED)
            .await;
    }

    // ── In-call Events ────────────────────────────────────────────────────

    /// Announce a prescription the doctor saved during a connected call to
    /// both parties, then attach it to the call's appointment, if any.
    pub async fn record_prescription(
        &self,
        session_id: &str,
        by: &str,
        prescription_id: &str,
    ) -> Result<CallSession> {
        let session = self
            .get(session_id)
            .ok_or_else(|| CoordinatorError::SessionNotFound(session_id.to_string()))?;

        if !session.involves(by) {
            return Err(CoordinatorError::NotAuthorized(
                "not a participant of this call".to_string(),
            ));
        }
        if session.state != CallState::Connected {
            return Err(CoordinatorError::NotTerminalEligible {
                session_id: session_id.to_string(),
                state: session.state.as_str().to_string(),
            });
        }
        if self.registry.lookup(by).map(|p| p.role) != Some(Role::Doctor) {
            return Err(CoordinatorError::NotAuthorized(
                "only the doctor can issue a prescription".to_string(),
            ));
        }

        tracing::info!(
            session_id = session_id,
            prescription_id = prescription_id,
            by = by,
            "Prescription created"
        );

        let notice = ServerMessage::PrescriptionCreated {
            session_id: session.session_id.clone(),
            prescription_id: prescription_id.to_string(),
            from: by.to_string(),
            appointment_id: session.appointment_id(),
        };
        self.registry.send_to(&session.initiator, notice.clone());
        self.registry.send_to(&session.receiver, notice);

        if let Some(appointment_id) = session.appointment_id() {
            self.follow_up(
                &session.session_id,
                &appointment_id,
                "link_prescription",
                self.authorizer.link_prescription(&appointment_id, prescription_id),
            )
            .await;
        }

        Ok(session)
    }

    // ── Sweeping ──────────────────────────────────────────────────────────

    /// Time out every session that has been ringing longer than the ring
    /// timeout as of `now`. Connected sessions are never touched.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> Vec<CallSession> {
        let expired: Vec<CallSession> = {
            let mut table = self.table.lock();
            let ids: Vec<String> = table
                .sessions
                .values()
                .filter(|s| s.state == CallState::Ringing && now - s.created_at > self.ring_timeout)
                .map(|s| s.session_id.clone())
                .collect();
            ids.iter()
                .filter_map(|id| table.finish(id, CallState::TimedOut))
                .collect()
        };

        for session in &expired {
            tracing::info!(
                session_id = session.session_id.as_str(),
                initiator = session.initiator.as_str(),
                receiver = session.receiver.as_str(),
                "Ringing call timed out"
            );
            let notice = ServerMessage::CallTimedOut {
                session_id: session.session_id.clone(),
            };
            self.registry.send_to(&session.initiator, notice.clone());
            self.registry.send_to(&session.receiver, notice);

            self.conclude(session, CallState::Ringing, "timed out").await;
        }

        expired
    }

    // ── Read-only Views ───────────────────────────────────────────────────

    /// Snapshot of a live session.
    pub fn get(&self, session_id: &str) -> Option<CallSession> {
        self.table.lock().sessions.get(session_id).cloned()
    }

    pub fn channel(&self, channel_id: &str) -> Option<SignalingChannel> {
        self.table.lock().channels.get(channel_id).cloned()
    }

    /// Number of sessions ringing or connected.
    pub fn active_count(&self) -> usize {
        self.table.lock().sessions.len()
    }

    pub fn channel_count(&self) -> usize {
        self.table.lock().channels.len()
    }

    // ── Internals ─────────────────────────────────────────────────────────

    fn current_connection(&self, identity: &str) -> Option<ConnectionId> {
        self.registry.lookup(identity).map(|p| p.handle.id())
    }

    fn is_current(&self, identity: &str, connection: ConnectionId) -> bool {
        self.current_connection(identity) == Some(connection)
    }

    /// True if `identity` is registered on a connection other than `connection`.
    fn is_superseded(&self, identity: &str, connection: ConnectionId) -> bool {
        matches!(self.current_connection(identity), Some(current) if current != connection)
    }

    /// Audit a terminated session and run its appointment follow-up.
    async fn conclude(&self, session: &CallSession, previous: CallState, reason: &str) {
        let event = match session.state {
            CallState::Rejected => AuditEvent::CallRejected {
                session_id: session.session_id.clone(),
                appointment_id: session.appointment_id(),
                reason: reason.to_string(),
            },
            CallState::TimedOut => AuditEvent::CallTimedOut {
                session_id: session.session_id.clone(),
                appointment_id: session.appointment_id(),
            },
            _ => AuditEvent::CallEnded {
                session_id: session.session_id.clone(),
                appointment_id: session.appointment_id(),
                reason: reason.to_string(),
                duration_minutes: session.duration_minutes(),
            },
        };
        self.audit(event).await;

        let Some(appointment_id) = session.appointment_id() else {
            return;
        };

        if previous == CallState::Connected {
            let minutes = session.duration_minutes().unwrap_or(0);
            self.follow_up(
                &session.session_id,
                &appointment_id,
                "mark_completed",
                self.authorizer.mark_completed(&appointment_id, minutes),
            )
            .await;
        } else {
            self.follow_up(
                &session.session_id,
                &appointment_id,
                "release",
                self.authorizer.release(&appointment_id),
            )
            .await;
        }
    }

    /// Run a best-effort appointment update. Failure is logged and audited;
    /// the session's state stands.
    async fn follow_up<F>(&self, session_id: &str, appointment_id: &str, operation: &str, fut: F)
    where
        F: Future<Output = std::result::Result<(), CollaboratorError>>,
    {
        if let Err(e) = bounded("appointment authorizer", self.collaborator_timeout, fut).await {
            tracing::warn!(
                session_id = session_id,
                appointment_id = appointment_id,
                operation = operation,
                error = %e,
                "Appointment update failed"
            );
            self.audit(AuditEvent::CollaboratorFailure {
                session_id: session_id.to_string(),
                appointment_id: appointment_id.to_string(),
                operation: operation.to_string(),
                error: e.to_string(),
            })
            .await;
        }
    }

    async fn audit(&self, event: AuditEvent) {
        if tokio::time::timeout(self.collaborator_timeout, self.auditor.record(event))
            .await
            .is_err()
        {
            tracing::warn!("Session auditor timed out, event dropped");
        }
    }
}
