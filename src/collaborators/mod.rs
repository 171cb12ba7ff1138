//! External collaborators.
//!
//! The coordinator never owns patient, doctor or appointment records. It
//! talks to three collaborators through the traits below:
//!
//! - [`IdentityDirectory`]: resolves (or creates) the durable profile behind
//!   an identity at registration time.
//! - [`AppointmentAuthorizer`]: gates appointment-bound calls, advances
//!   appointment status on call start/end and links prescriptions.
//! - [`SessionAuditor`]: receives call lifecycle events and follow-up
//!   failures.
//!
//! Every call into a collaborator is a suspension point and is bounded by
//! [`bounded`].

pub mod http;
pub mod memory;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::protocol::Role;

pub use http::{HttpAppointmentAuthorizer, HttpDirectory};
pub use memory::{MemoryAppointmentBook, MemoryDirectory, RecordingAuditor, TracingAuditor};

/// Errors returned by collaborator adapters.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CollaboratorError {
    #[error("collaborator unavailable: {0}")]
    Unavailable(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// The collaborator understood the request and refused it.
    #[error("rejected: {0}")]
    Rejected(String),

    #[error("unexpected response: {0}")]
    Protocol(String),

    #[error("{0} timed out")]
    Timeout(String),
}

/// Durable profile behind an identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub name: String,
    pub role: Role,
}

/// Outcome of an appointment authorization check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationDecision {
    pub allowed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<DateTime<Utc>>,
}

impl AuthorizationDecision {
    pub fn allow(scheduled_at: DateTime<Utc>) -> Self {
        Self {
            allowed: true,
            reason: None,
            scheduled_at: Some(scheduled_at),
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
            scheduled_at: None,
        }
    }
}

/// Appointment lifecycle status as stored by the appointment backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AppointmentStatus {
    Scheduled,
    Ongoing,
    Completed,
    Cancelled,
    NoShow,
}

impl AppointmentStatus {
    /// Only booked or already running consultations can be (re)joined.
    pub fn allows_call(&self) -> bool {
        matches!(self, AppointmentStatus::Scheduled | AppointmentStatus::Ongoing)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Scheduled => "scheduled",
            AppointmentStatus::Ongoing => "ongoing",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Cancelled => "cancelled",
            AppointmentStatus::NoShow => "no-show",
        }
    }
}

/// The fields of an appointment the coordinator needs to gate a call.
#[derive(Debug, Clone, PartialEq)]
pub struct AppointmentRecord {
    pub appointment_id: String,
    pub patient_identity: String,
    pub doctor_identity: String,
    pub scheduled_at: DateTime<Utc>,
    pub duration_minutes: i64,
    pub status: AppointmentStatus,
}

/// Decide whether `party_a` and `party_b` may talk under `record` at `now`.
///
/// The pair must match the appointment exactly (in either order), the status
/// must allow a call, and `now` must fall within `window` of the scheduled
/// time. An appointment already `ongoing` stays joinable until its booked
/// duration plus the window has passed, so a dropped consultation can resume.
pub fn evaluate_appointment(
    record: &AppointmentRecord,
    party_a: &str,
    party_b: &str,
    now: DateTime<Utc>,
    window: chrono::Duration,
) -> AuthorizationDecision {
    let same_pair = (record.patient_identity == party_a && record.doctor_identity == party_b)
        || (record.patient_identity == party_b && record.doctor_identity == party_a);
    if !same_pair {
        return AuthorizationDecision::deny("appointment does not belong to these participants");
    }

    if !record.status.allows_call() {
        return AuthorizationDecision::deny(format!(
            "appointment is {}",
            record.status.as_str()
        ));
    }

    let opens_at = record.scheduled_at - window;
    let closes_at = match record.status {
        AppointmentStatus::Ongoing => {
            record.scheduled_at + chrono::Duration::minutes(record.duration_minutes) + window
        }
        _ => record.scheduled_at + window,
    };

    if now < opens_at {
        return AuthorizationDecision::deny("appointment has not started yet");
    }
    if now > closes_at {
        return AuthorizationDecision::deny("appointment window has passed");
    }

    AuthorizationDecision::allow(record.scheduled_at)
}

/// Resolves identities to durable profiles.
#[async_trait]
pub trait IdentityDirectory: Send + Sync {
    async fn resolve_or_create(
        &self,
        identity: &str,
        role: Role,
        display_name: &str,
    ) -> Result<Profile, CollaboratorError>;
}

/// Gates appointment-bound calls and advances appointment status.
///
/// `mark_in_progress`, `mark_completed` and `release` are best-effort from
/// the coordinator's side: their failures are audited, never rolled back.
#[async_trait]
pub trait AppointmentAuthorizer: Send + Sync {
    async fn authorize(
        &self,
        appointment_id: &str,
        party_a: &str,
        party_b: &str,
    ) -> Result<AuthorizationDecision, CollaboratorError>;

    async fn mark_in_progress(&self, appointment_id: &str) -> Result<(), CollaboratorError>;

    async fn mark_completed(
        &self,
        appointment_id: &str,
        duration_minutes: i64,
    ) -> Result<(), CollaboratorError>;

    /// Make the appointment schedulable again after a rejected or cancelled call.
    async fn release(&self, appointment_id: &str) -> Result<(), CollaboratorError>;

    /// Fetch an appointment, `Ok(None)` if the backend does not know it.
    async fn appointment(
        &self,
        appointment_id: &str,
    ) -> Result<Option<AppointmentRecord>, CollaboratorError>;

    /// Attach a prescription written during the consultation.
    async fn link_prescription(
        &self,
        appointment_id: &str,
        prescription_id: &str,
    ) -> Result<(), CollaboratorError>;
}

/// Call lifecycle events exposed to the session auditor.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    CallStarted {
        session_id: String,
        appointment_id: Option<String>,
        initiator: String,
        receiver: String,
    },
    CallEnded {
        session_id: String,
        appointment_id: Option<String>,
        reason: String,
        /// Whole minutes between accept and end; `None` if never connected.
        duration_minutes: Option<i64>,
    },
    CallRejected {
        session_id: String,
        appointment_id: Option<String>,
        reason: String,
    },
    CallTimedOut {
        session_id: String,
        appointment_id: Option<String>,
    },
    /// A best-effort appointment update failed after the call had already
    /// transitioned.
    CollaboratorFailure {
        session_id: String,
        appointment_id: String,
        operation: String,
        error: String,
    },
}

/// Receives call lifecycle events.
#[async_trait]
pub trait SessionAuditor: Send + Sync {
    async fn record(&self, event: AuditEvent);
}

/// Run a collaborator call under `limit`, mapping an elapsed timer to
/// [`CollaboratorError::Timeout`].
pub async fn bounded<T, F>(label: &str, limit: Duration, fut: F) -> Result<T, CollaboratorError>
where
    F: Future<Output = Result<T, CollaboratorError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(
                collaborator = label,
                limit_ms = limit.as_millis() as u64,
                "Collaborator call timed out"
            );
            Err(CollaboratorError::Timeout(label.to_string()))
        }
    }
}
