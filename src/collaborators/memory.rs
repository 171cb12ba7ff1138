//! In-process collaborator implementations.
//!
//! Used when no external directory or appointment backend is configured, and
//! throughout the tests.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use uuid::Uuid;

use super::{
    evaluate_appointment, AppointmentAuthorizer, AppointmentRecord, AppointmentStatus,
    AuditEvent, AuthorizationDecision, CollaboratorError, IdentityDirectory, Profile,
    SessionAuditor,
};
use crate::protocol::Role;

// ── Identity Directory ────────────────────────────────────────────────────────

/// Directory that creates a profile the first time an identity is seen.
#[derive(Default)]
pub struct MemoryDirectory {
    profiles: DashMap<String, Profile>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, identity: &str) -> Option<Profile> {
        self.profiles.get(identity).map(|p| p.clone())
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

#[async_trait]
impl IdentityDirectory for MemoryDirectory {
    async fn resolve_or_create(
        &self,
        identity: &str,
        role: Role,
        display_name: &str,
    ) -> Result<Profile, CollaboratorError> {
        let profile = self
            .profiles
            .entry(identity.to_string())
            .or_insert_with(|| {
                tracing::info!(identity = identity, role = %role, "Created profile");
                Profile {
                    id: format!("profile-{}", Uuid::new_v4()),
                    name: display_name.to_string(),
                    role,
                }
            })
            .clone();

        // One identity, one role.
        if profile.role != role {
            return Err(CollaboratorError::Rejected(format!(
                "identity is registered as {}",
                profile.role
            )));
        }

        Ok(profile)
    }
}

// ── Appointment Book ──────────────────────────────────────────────────────────

/// Stored appointment plus the call bookkeeping the coordinator asks for.
#[derive(Debug, Clone)]
pub struct BookedAppointment {
    pub record: AppointmentRecord,
    pub call_started_at: Option<DateTime<Utc>>,
    pub call_duration_minutes: Option<i64>,
    pub prescription_id: Option<String>,
}

/// Appointment authorizer over an in-memory table.
pub struct MemoryAppointmentBook {
    appointments: RwLock<HashMap<String, BookedAppointment>>,
    window: chrono::Duration,
}

impl MemoryAppointmentBook {
    pub fn new(window: chrono::Duration) -> Self {
        Self {
            appointments: RwLock::new(HashMap::new()),
            window,
        }
    }

    pub fn insert(&self, record: AppointmentRecord) {
        self.appointments.write().insert(
            record.appointment_id.clone(),
            BookedAppointment {
                record,
                call_started_at: None,
                call_duration_minutes: None,
                prescription_id: None,
            },
        );
    }

    pub fn get(&self, appointment_id: &str) -> Option<BookedAppointment> {
        self.appointments.read().get(appointment_id).cloned()
    }

    pub fn status(&self, appointment_id: &str) -> Option<AppointmentStatus> {
        self.get(appointment_id).map(|a| a.record.status)
    }

    fn update<F>(&self, appointment_id: &str, f: F) -> Result<(), CollaboratorError>
    where
        F: FnOnce(&mut BookedAppointment),
    {
        let mut appointments = self.appointments.write();
        let appointment = appointments
            .get_mut(appointment_id)
            .ok_or_else(|| CollaboratorError::NotFound(appointment_id.to_string()))?;
        f(appointment);
        Ok(())
    }
}

#[async_trait]
impl AppointmentAuthorizer for MemoryAppointmentBook {
    async fn authorize(
        &self,
        appointment_id: &str,
        party_a: &str,
        party_b: &str,
    ) -> Result<AuthorizationDecision, CollaboratorError> {
        let record = match self.get(appointment_id) {
            Some(booked) => booked.record,
            None => return Ok(AuthorizationDecision::deny("appointment not found")),
        };
        Ok(evaluate_appointment(
            &record,
            party_a,
            party_b,
            Utc::now(),
            self.window,
        ))
    }

    async fn mark_in_progress(&self, appointment_id: &str) -> Result<(), CollaboratorError> {
        self.update(appointment_id, |a| {
            a.record.status = AppointmentStatus::Ongoing;
            a.call_started_at = Some(Utc::now());
        })
    }

    async fn mark_completed(
        &self,
        appointment_id: &str,
        duration_minutes: i64,
    ) -> Result<(), CollaboratorError> {
        self.update(appointment_id, |a| {
            a.record.status = AppointmentStatus::Completed;
            a.call_duration_minutes = Some(duration_minutes);
        })
    }

    async fn release(&self, appointment_id: &str) -> Result<(), CollaboratorError> {
        self.update(appointment_id, |a| {
            if a.record.status == AppointmentStatus::Ongoing {
                a.record.status = AppointmentStatus::Scheduled;
            }
            a.call_started_at = None;
        })
    }

    async fn appointment(
        &self,
        appointment_id: &str,
    ) -> Result<Option<AppointmentRecord>, CollaboratorError> {
        Ok(self.get(appointment_id).map(|booked| booked.record))
    }

    async fn link_prescription(
        &self,
        appointment_id: &str,
        prescription_id: &str,
    ) -> Result<(), CollaboratorError> {
        self.update(appointment_id, |a| {
            a.prescription_id = Some(prescription_id.to_string());
        })
    }
}

// ── Auditors ──────────────────────────────────────────────────────────────────

/// Auditor that writes every event to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditor;

#[async_trait]
impl SessionAuditor for TracingAuditor {
    async fn record(&self, event: AuditEvent) {
        match &event {
            AuditEvent::CollaboratorFailure { .. } => {
                tracing::warn!(event = ?event, "Session audit");
            }
            _ => tracing::info!(event = ?event, "Session audit"),
        }
    }
}

/// Auditor that keeps events in memory.
#[derive(Debug, Default)]
pub struct RecordingAuditor {
    events: Mutex<Vec<AuditEvent>>,
}

impl RecordingAuditor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().clone()
    }
}

#[async_trait]
impl SessionAuditor for RecordingAuditor {
    async fn record(&self, event: AuditEvent) {
        self.events.lock().push(event);
    }
}
