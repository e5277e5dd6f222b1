//! Derivation of the discrete session state shown to users.
//!
//! [`reduce`] is pure: given the latest session (if any), the latest error
//! (if any), whether a fetch is in flight and whether a session context is
//! stored, it returns exactly one [`SessionState`]. Rules are evaluated in
//! order and the first match wins:
//!
//! 1. a session is present: its status decides the state;
//! 2. an error is present: [`SessionState::Error`];
//! 3. a fetch is in flight: [`SessionState::Loading`];
//! 4. a session context is stored: [`SessionState::Loading`], so the UI does
//!    not flash "absent" before the first fetch completes;
//! 5. otherwise [`SessionState::Absent`].

use crate::error::ApiError;
use crate::session::{Session, SessionStatus};

/// Discrete display/control status of the charge session.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum SessionState {
    /// No session is known and none is expected.
    #[default]
    Absent,
    /// A session is expected but no snapshot has arrived yet.
    Loading,
    /// The last fetch failed.
    Error(ApiError),
    /// Start requested, waiting for the charge point.
    StartRequested(Session),
    /// The charge point refused to start.
    StartRejected(Session),
    /// Started, energy not flowing yet.
    Started(Session),
    /// Energy is flowing.
    Charging(Session),
    /// Stop requested, waiting for the charge point.
    StopRequested(Session),
    /// The charge point refused to stop.
    StopRejected(Session),
    /// The session is over.
    Stopped(Session),
}

impl From<Session> for SessionState {
    fn from(session: Session) -> Self {
        match session.status {
            SessionStatus::StartRequested => Self::StartRequested(session),
            SessionStatus::StartRejected => Self::StartRejected(session),
            SessionStatus::Started => Self::Started(session),
            SessionStatus::Charging => Self::Charging(session),
            SessionStatus::StopRequested => Self::StopRequested(session),
            SessionStatus::StopRejected => Self::StopRejected(session),
            SessionStatus::Stopped => Self::Stopped(session),
        }
    }
}

impl SessionState {
    /// Returns the snapshot carried by a loaded state.
    #[must_use]
    pub const fn session(&self) -> Option<&Session> {
        match self {
            Self::StartRequested(s)
            | Self::StartRejected(s)
            | Self::Started(s)
            | Self::Charging(s)
            | Self::StopRequested(s)
            | Self::StopRejected(s)
            | Self::Stopped(s) => Some(s),
            Self::Absent | Self::Loading | Self::Error(_) => None,
        }
    }

    /// Returns `true` while the charge point holds an ongoing session.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(
            self,
            Self::StartRequested(_)
                | Self::Started(_)
                | Self::Charging(_)
                | Self::StopRequested(_)
                | Self::StopRejected(_)
        )
    }

    /// Returns `true` if a stop command makes sense in this state.
    #[must_use]
    pub const fn can_stop(&self) -> bool {
        matches!(
            self,
            Self::Started(_) | Self::Charging(_) | Self::StopRejected(_)
        )
    }

    /// Returns `true` if the session reached an end state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::StartRejected(_) | Self::Stopped(_))
    }
}

/// Inputs the state is derived from.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SessionInputs {
    /// Latest snapshot received.
    pub session: Option<Session>,
    /// Latest failure received.
    pub error: Option<ApiError>,
    /// Whether a fetch is in flight.
    pub loading: bool,
    /// Whether a session context is persisted.
    pub context_stored: bool,
}

impl SessionInputs {
    /// Derives the current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        reduce(
            self.session.as_ref(),
            self.error.as_ref(),
            self.loading,
            self.context_stored,
        )
    }
}

/// Derives a [`SessionState`] from the raw inputs.
#[must_use]
pub fn reduce(
    session: Option<&Session>,
    error: Option<&ApiError>,
    loading: bool,
    context_stored: bool,
) -> SessionState {
    if let Some(session) = session {
        return SessionState::from(session.clone());
    }
    if let Some(error) = error {
        return SessionState::Error(error.clone());
    }
    if loading || context_stored {
        return SessionState::Loading;
    }
    SessionState::Absent
}
