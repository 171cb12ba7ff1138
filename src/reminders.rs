//! Appointment reminders.
//!
//! A party of a booked appointment can push a reminder ("starts in 15
//! minutes", "in 5", "now") to everyone on that appointment who is online.
//! The appointment is looked up fresh from the appointment backend every
//! time; nothing is cached here.

use std::sync::Arc;
use std::time::Duration;

use crate::collaborators::{bounded, AppointmentAuthorizer, CollaboratorError};
use crate::error::{CoordinatorError, Result};
use crate::presence::PresenceRegistry;
use crate::protocol::{ReminderKind, ServerMessage};

#[derive(Clone)]
pub struct AppointmentReminders {
    registry: PresenceRegistry,
    authorizer: Arc<dyn AppointmentAuthorizer>,
    collaborator_timeout: Duration,
}

impl AppointmentReminders {
    pub fn new(
        registry: PresenceRegistry,
        authorizer: Arc<dyn AppointmentAuthorizer>,
        collaborator_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            authorizer,
            collaborator_timeout,
        }
    }

    /// Remind the patient and doctor of `appointment_id`. Only a party of
    /// the appointment may ask. Returns how many of the two were reached.
    pub async fn send(
        &self,
        appointment_id: &str,
        reminder: ReminderKind,
        requested_by: &str,
    ) -> Result<usize> {
        let record = bounded(
            "appointment backend",
            self.collaborator_timeout,
            self.authorizer.appointment(appointment_id),
        )
        .await
        .map_err(|e| match e {
            CollaboratorError::Timeout(what) => CoordinatorError::CollaboratorTimeout(what),
            other => CoordinatorError::InvalidRequest(format!("appointment lookup failed: {}", other)),
        })?
        .ok_or_else(|| {
            CoordinatorError::InvalidRequest(format!("appointment '{}' not found", appointment_id))
        })?;

        if requested_by != record.patient_identity && requested_by != record.doctor_identity {
            return Err(CoordinatorError::NotAuthorized(
                "not a participant of this appointment".to_string(),
            ));
        }

        let notice = ServerMessage::AppointmentReminder {
            appointment_id: record.appointment_id.clone(),
            reminder,
            patient_identity: record.patient_identity.clone(),
            doctor_identity: record.doctor_identity.clone(),
            scheduled_at: record.scheduled_at,
        };

        let reached = [&record.patient_identity, &record.doctor_identity]
            .into_iter()
            .filter(|identity| self.registry.send_to(identity, notice.clone()))
            .count();

        tracing::info!(
            appointment_id = appointment_id,
            reminder = ?reminder,
            requested_by = requested_by,
            reached = reached,
            "Appointment reminder sent"
        );

        Ok(reached)
    }
}
