//! Shared coordinator state.
//!
//! One value per process, cloned into every connection and route handler.
//! Each component owns its own data; this struct only wires them together.

use std::sync::Arc;

use serde::Serialize;

use crate::collaborators::{AppointmentAuthorizer, IdentityDirectory, SessionAuditor};
use crate::config::CoordinatorConfig;
use crate::presence::PresenceRegistry;
use crate::relay::SignalingRelay;
use crate::reminders::AppointmentReminders;
use crate::session::CallSessionManager;

#[derive(Clone)]
pub struct CoordinatorState {
    pub registry: PresenceRegistry,
    pub sessions: CallSessionManager,
    pub relay: SignalingRelay,
    pub reminders: AppointmentReminders,
    pub config: Arc<CoordinatorConfig>,
}

/// Snapshot served by `/stats`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CoordinatorStats {
    pub online_participants: usize,
    pub online_doctors: usize,
    pub active_sessions: usize,
    pub open_channels: usize,
}

impl CoordinatorState {
    pub fn new(
        config: CoordinatorConfig,
        directory: Arc<dyn IdentityDirectory>,
        authorizer: Arc<dyn AppointmentAuthorizer>,
        auditor: Arc<dyn SessionAuditor>,
    ) -> Self {
        let registry = PresenceRegistry::new(directory, config.collaborator_timeout());
        let sessions =
            CallSessionManager::new(registry.clone(), authorizer.clone(), auditor, &config);
        let relay = SignalingRelay::new(registry.clone(), sessions.clone());
        let reminders =
            AppointmentReminders::new(registry.clone(), authorizer, config.collaborator_timeout());

        Self {
            registry,
            sessions,
            relay,
            reminders,
            config: Arc::new(config),
        }
    }

    pub fn stats(&self) -> CoordinatorStats {
        CoordinatorStats {
            online_participants: self.registry.online_count(),
            online_doctors: self.registry.online_doctors().len(),
            active_sessions: self.sessions.active_count(),
            open_channels: self.sessions.channel_count(),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::collaborators::{MemoryAppointmentBook, MemoryDirectory, RecordingAuditor};

    /// State over in-memory collaborators, plus handles to inspect them.
    pub(crate) fn test_state() -> (CoordinatorState, Arc<MemoryAppointmentBook>, Arc<RecordingAuditor>) {
        let config = CoordinatorConfig::default();
        let book = Arc::new(MemoryAppointmentBook::new(config.appointment_window()));
        let auditor = Arc::new(RecordingAuditor::new());
        let state = CoordinatorState::new(
            config,
            Arc::new(MemoryDirectory::new()),
            book.clone(),
            auditor.clone(),
        );
        (state, book, auditor)
    }

    #[test]
    fn test_empty_stats() {
        let (state, _, _) = test_state();
        assert_eq!(
            state.stats(),
            CoordinatorStats {
                online_participants: 0,
                online_doctors: 0,
                active_sessions: 0,
                open_channels: 0,
            }
        );
    }
}
