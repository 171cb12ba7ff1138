//! Coordinator protocol message definitions.
//!
//! Clients speak JSON-over-WebSocket. Every frame is an object tagged by
//! `type`; field names are camelCase. Signaling payloads are opaque to the
//! coordinator and are forwarded byte for byte as received.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::error::{CoordinatorError, ErrorKind};

// ── Client → Coordinator ──────────────────────────────────────────────────────

/// Messages sent from a client to the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Bind this connection to an identity. Must be sent first.
    #[serde(rename = "register", rename_all = "camelCase")]
    Register {
        identity: String,
        role: Role,
        display_name: String,
    },

    /// Ring another participant, optionally under a booked appointment.
    #[serde(rename = "call.initiate", rename_all = "camelCase")]
    InitiateCall {
        target_identity: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        appointment_id: Option<String>,
    },

    /// Accept or reject an incoming call.
    #[serde(rename = "call.respond", rename_all = "camelCase")]
    RespondCall { session_id: String, accept: bool },

    /// Hang up (or cancel a call that is still ringing).
    #[serde(rename = "call.end", rename_all = "camelCase")]
    EndCall { session_id: String },

    /// Forward an SDP offer/answer or ICE candidate to the other party.
    ///
    /// Parsed outside the tagged representation, see [`ClientMessage::parse`].
    #[serde(rename = "signal", rename_all = "camelCase", skip_deserializing)]
    Signal {
        session_id: String,
        payload: SignalPayload,
    },

    /// In-call text chat.
    #[serde(rename = "chat", rename_all = "camelCase")]
    Chat { session_id: String, text: String },

    /// The doctor saved a prescription during the consultation.
    #[serde(rename = "prescription.created", rename_all = "camelCase")]
    PrescriptionCreated {
        session_id: String,
        prescription_id: String,
    },

    /// Remind both parties of an upcoming appointment.
    #[serde(rename = "appointment.reminder", rename_all = "camelCase")]
    AppointmentReminder {
        appointment_id: String,
        reminder: ReminderKind,
    },

    /// Keepalive.
    #[serde(rename = "ping")]
    Ping,
}

/// Just enough of a frame to route it.
#[derive(Deserialize)]
struct FrameType {
    #[serde(rename = "type")]
    kind: String,
}

/// `signal` frames are read as a plain struct so the payload can be
/// captured as raw text. Internally tagged enums buffer their content, which
/// would re-encode the payload.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignalFrame {
    session_id: String,
    payload: SignalPayload,
}

impl ClientMessage {
    /// Parse a text frame, rejecting malformed input explicitly.
    pub fn parse(text: &str) -> Result<Self, CoordinatorError> {
        let frame: FrameType = serde_json::from_str(text).map_err(malformed)?;

        let msg = if frame.kind == "signal" {
            let signal: SignalFrame = serde_json::from_str(text).map_err(malformed)?;
            ClientMessage::Signal {
                session_id: signal.session_id,
                payload: signal.payload,
            }
        } else {
            serde_json::from_str(text).map_err(malformed)?
        };

        msg.validate()?;
        Ok(msg)
    }

    /// Required string fields must carry a value, not just be present.
    fn validate(&self) -> Result<(), CoordinatorError> {
        let required: Vec<(&str, &str)> = match self {
            ClientMessage::Register {
                identity,
                display_name,
                ..
            } => vec![
                ("identity", identity.as_str()),
                ("displayName", display_name.as_str()),
            ],
            ClientMessage::InitiateCall {
                target_identity, ..
            } => vec![("targetIdentity", target_identity.as_str())],
            ClientMessage::RespondCall { session_id, .. }
            | ClientMessage::EndCall { session_id }
            | ClientMessage::Signal { session_id, .. }
            | ClientMessage::Chat { session_id, .. } => vec![("sessionId", session_id.as_str())],
            ClientMessage::PrescriptionCreated {
                session_id,
                prescription_id,
            } => vec![
                ("sessionId", session_id.as_str()),
                ("prescriptionId", prescription_id.as_str()),
            ],
            ClientMessage::AppointmentReminder { appointment_id, .. } => {
                vec![("appointmentId", appointment_id.as_str())]
            }
            ClientMessage::Ping => Vec::new(),
        };

        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(CoordinatorError::MalformedMessage(format!(
                    "field '{}' must not be empty",
                    field
                )));
            }
        }
        Ok(())
    }
}

fn malformed(e: serde_json::Error) -> CoordinatorError {
    CoordinatorError::MalformedMessage(e.to_string())
}

// ── Coordinator → Client ──────────────────────────────────────────────────────

/// Messages sent from the coordinator to a client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// Registration accepted.
    #[serde(rename_all = "camelCase")]
    Registered {
        identity: String,
        role: Role,
        display_name: String,
    },

    RegistrationFailed { reason: String },

    /// A doctor came online or went offline.
    PresenceChanged { identity: String, online: bool },

    /// Someone is calling you.
    #[serde(rename_all = "camelCase")]
    IncomingCall {
        session_id: String,
        from: CallerInfo,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        appointment_context: Option<AppointmentContext>,
    },

    /// Confirmation to the caller that the target is ringing.
    #[serde(rename_all = "camelCase")]
    CallInitiated {
        session_id: String,
        channel_id: String,
        target: String,
        target_name: String,
    },

    #[serde(rename_all = "camelCase")]
    CallAccepted {
        session_id: String,
        channel_id: String,
    },

    #[serde(rename_all = "camelCase")]
    CallRejected {
        session_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    #[serde(rename_all = "camelCase")]
    CallTimedOut { session_id: String },

    #[serde(rename_all = "camelCase")]
    CallEnded { session_id: String, reason: String },

    /// A signaling payload forwarded from the other party, unmodified.
    #[serde(rename_all = "camelCase")]
    Signal {
        session_id: String,
        from: String,
        payload: SignalPayload,
    },

    #[serde(rename_all = "camelCase")]
    Chat {
        session_id: String,
        from: String,
        text: String,
        message_id: String,
        sent_at: DateTime<Utc>,
    },

    /// Sent to both parties of a connected call.
    #[serde(rename_all = "camelCase")]
    PrescriptionCreated {
        session_id: String,
        prescription_id: String,
        from: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        appointment_id: Option<String>,
    },

    #[serde(rename_all = "camelCase")]
    AppointmentReminder {
        appointment_id: String,
        reminder: ReminderKind,
        patient_identity: String,
        doctor_identity: String,
        scheduled_at: DateTime<Utc>,
    },

    Pong,

    Error { kind: ErrorKind, message: String },
}

impl From<&CoordinatorError> for ServerMessage {
    fn from(err: &CoordinatorError) -> Self {
        ServerMessage::Error {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

// ── Supporting Types ──────────────────────────────────────────────────────────

/// Opaque WebRTC negotiation payload, held as the exact JSON text the sender
/// wrote. Key order, whitespace and number precision survive the relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SignalPayload(Box<RawValue>);

impl SignalPayload {
    /// Wrap a JSON document, which must be valid JSON.
    pub fn from_json(json: &str) -> Result<Self, CoordinatorError> {
        RawValue::from_string(json.to_string())
            .map(SignalPayload)
            .map_err(malformed)
    }

    /// The payload text as received.
    pub fn get(&self) -> &str {
        self.0.get()
    }
}

impl PartialEq for SignalPayload {
    fn eq(&self, other: &Self) -> bool {
        self.get() == other.get()
    }
}

/// How far ahead of the appointment a reminder is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReminderKind {
    #[serde(rename = "15min")]
    FifteenMinutes,
    #[serde(rename = "5min")]
    FiveMinutes,
    #[serde(rename = "now")]
    Now,
}

/// Participant role on the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Patient,
    Doctor,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Patient => "patient",
            Role::Doctor => "doctor",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who is calling, as shown on the receiver's ringing screen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallerInfo {
    pub identity: String,
    pub display_name: String,
    pub role: Role,
}

/// Appointment a call was placed under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentContext {
    pub appointment_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<DateTime<Utc>>,
}
