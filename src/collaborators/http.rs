//! HTTP collaborator adapters.
//!
//! `HttpAppointmentAuthorizer` talks to the platform's appointment REST
//! backend (`GET /api/appointments/{id}`, `PATCH /api/appointments/{id}/status`,
//! `PATCH /api/appointments/{id}/prescription`).
//! `HttpDirectory` resolves profiles via `POST {base}/profiles/resolve`.

use async_trait::async_trait;
use chrono::{DateTime, NaiveTime, Utc};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{
    evaluate_appointment, AppointmentAuthorizer, AppointmentRecord, AppointmentStatus,
    AuthorizationDecision, CollaboratorError, IdentityDirectory, Profile,
};
use crate::protocol::Role;

/// Map a non-success HTTP status to a collaborator error.
fn status_error(status: StatusCode, body: String) -> CollaboratorError {
    if status == StatusCode::NOT_FOUND {
        CollaboratorError::NotFound(body)
    } else if status.is_client_error() {
        CollaboratorError::Rejected(format!("{}: {}", status, body))
    } else {
        CollaboratorError::Unavailable(format!("{}: {}", status, body))
    }
}

fn transport_error(e: reqwest::Error) -> CollaboratorError {
    CollaboratorError::Unavailable(e.to_string())
}

fn trim_base(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

// ── Identity Directory ────────────────────────────────────────────────────────

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ResolveRequest<'a> {
    identity: &'a str,
    role: Role,
    display_name: &'a str,
}

/// Identity directory reached over HTTP.
#[derive(Clone)]
pub struct HttpDirectory {
    client: Client,
    base_url: String,
}

impl HttpDirectory {
    pub fn new(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: trim_base(base_url),
        }
    }
}

#[async_trait]
impl IdentityDirectory for HttpDirectory {
    async fn resolve_or_create(
        &self,
        identity: &str,
        role: Role,
        display_name: &str,
    ) -> Result<Profile, CollaboratorError> {
        let url = format!("{}/profiles/resolve", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(&ResolveRequest {
                identity,
                role,
                display_name,
            })
            .send()
            .await
            .map_err(transport_error)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(status_error(status, body));
        }

        resp.json::<Profile>()
            .await
            .map_err(|e| CollaboratorError::Protocol(e.to_string()))
    }
}

// ── Appointment Authorizer ────────────────────────────────────────────────────

/// Appointment as returned by the backend. Only the fields we need.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppointmentDto {
    appointment_id: String,
    patient_clerk_id: String,
    doctor_clerk_id: String,
    appointment_date: DateTime<Utc>,
    /// "HH:MM" on `appointment_date`.
    time_slot: String,
    #[serde(default = "default_duration")]
    duration: i64,
    status: AppointmentStatus,
}

fn default_duration() -> i64 {
    30
}

impl AppointmentDto {
    fn into_record(self) -> Result<AppointmentRecord, CollaboratorError> {
        let slot = NaiveTime::parse_from_str(&self.time_slot, "%H:%M").map_err(|e| {
            CollaboratorError::Protocol(format!("bad timeSlot '{}': {}", self.time_slot, e))
        })?;
        let scheduled_at = self
            .appointment_date
            .date_naive()
            .and_time(slot)
            .and_utc();

        Ok(AppointmentRecord {
            appointment_id: self.appointment_id,
            patient_identity: self.patient_clerk_id,
            doctor_identity: self.doctor_clerk_id,
            scheduled_at,
            duration_minutes: self.duration,
            status: self.status,
        })
    }
}

/// Appointment authorizer backed by the appointment REST API.
#[derive(Clone)]
pub struct HttpAppointmentAuthorizer {
    client: Client,
    base_url: String,
    window: chrono::Duration,
}

impl HttpAppointmentAuthorizer {
    pub fn new(client: Client, base_url: &str, window: chrono::Duration) -> Self {
        Self {
            client,
            base_url: trim_base(base_url),
            window,
        }
    }

    fn appointment_url(&self, appointment_id: &str) -> String {
        format!(
            "{}/api/appointments/{}",
            self.base_url,
            urlencoding::encode(appointment_id)
        )
    }

    async fn fetch(&self, appointment_id: &str) -> Result<AppointmentRecord, CollaboratorError> {
        let resp = self
            .client
            .get(self.appointment_url(appointment_id))
            .send()
            .await
            .map_err(transport_error)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(status_error(status, body));
        }

        resp.json::<AppointmentDto>()
            .await
            .map_err(|e| CollaboratorError::Protocol(e.to_string()))?
            .into_record()
    }

    async fn patch_status(
        &self,
        appointment_id: &str,
        body: serde_json::Value,
    ) -> Result<(), CollaboratorError> {
        self.patch(appointment_id, "status", body).await
    }

    async fn patch(
        &self,
        appointment_id: &str,
        resource: &str,
        body: serde_json::Value,
    ) -> Result<(), CollaboratorError> {
        let url = format!("{}/{}", self.appointment_url(appointment_id), resource);
        let resp = self
            .client
            .patch(&url)
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(status_error(status, body));
        }
        Ok(())
    }
}

#[async_trait]
impl AppointmentAuthorizer for HttpAppointmentAuthorizer {
    async fn authorize(
        &self,
        appointment_id: &str,
        party_a: &str,
        party_b: &str,
    ) -> Result<AuthorizationDecision, CollaboratorError> {
        match self.fetch(appointment_id).await {
            Ok(record) => Ok(evaluate_appointment(
                &record,
                party_a,
                party_b,
                Utc::now(),
                self.window,
            )),
            Err(CollaboratorError::NotFound(_)) => {
                Ok(AuthorizationDecision::deny("appointment not found"))
            }
            Err(e) => Err(e),
        }
    }

    async fn mark_in_progress(&self, appointment_id: &str) -> Result<(), CollaboratorError> {
        self.patch_status(
            appointment_id,
            json!({ "status": "ongoing", "callStartTime": Utc::now() }),
        )
        .await
    }

    async fn mark_completed(
        &self,
        appointment_id: &str,
        duration_minutes: i64,
    ) -> Result<(), CollaboratorError> {
        self.patch_status(
            appointment_id,
            json!({
                "status": "completed",
                "callEndTime": Utc::now(),
                "callDuration": duration_minutes,
            }),
        )
        .await
    }

    async fn release(&self, appointment_id: &str) -> Result<(), CollaboratorError> {
        self.patch_status(appointment_id, json!({ "status": "scheduled" }))
            .await
    }

    async fn appointment(
        &self,
        appointment_id: &str,
    ) -> Result<Option<AppointmentRecord>, CollaboratorError> {
        match self.fetch(appointment_id).await {
            Ok(record) => Ok(Some(record)),
            Err(CollaboratorError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn link_prescription(
        &self,
        appointment_id: &str,
        prescription_id: &str,
    ) -> Result<(), CollaboratorError> {
        self.patch(
            appointment_id,
            "prescription",
            json!({ "prescriptionId": prescription_id }),
        )
        .await
    }
}
