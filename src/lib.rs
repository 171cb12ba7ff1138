//! Consult Relay
//!
//! Real-time call coordinator for a telehealth platform. Patients and
//! doctors hold a WebSocket to the coordinator, which provides:
//!
//! 1. **Presence**: who is connected right now, keyed by identity, with
//!    doctors' comings and goings broadcast to everyone else.
//!
//! 2. **Call sessions**: ring, accept/reject, hang up, optionally gated by a
//!    booked appointment whose status follows the call.
//!
//! 3. **Signaling relay**: SDP offers/answers and ICE candidates forwarded
//!    verbatim between the two parties, plus in-call chat.
//!
//! 4. **Consultation events**: prescriptions announced during a call and
//!    appointment reminders pushed to whichever party is online.
//!
//! Media never passes through the coordinator; once signaling completes the
//! browsers talk to each other directly. All state is in memory.

pub mod collaborators;
pub mod config;
pub mod error;
pub mod handler;
pub mod presence;
pub mod protocol;
pub mod relay;
pub mod reminders;
pub mod routes;
pub mod session;
pub mod state;
pub mod sweeper;

pub use config::CoordinatorConfig;
pub use error::{CoordinatorError, ErrorKind, Result};
pub use routes::router;
pub use state::{CoordinatorState, CoordinatorStats};
