//! Charge session snapshots as reported by the backend.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a charge session.
///
/// Serialized in `SCREAMING_SNAKE_CASE`, e.g. `"START_REQUESTED"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    /// A start command was accepted and is pending at the charge point.
    StartRequested,
    /// The charge point refused to start.
    StartRejected,
    /// The session started but energy is not flowing yet.
    Started,
    /// Energy is flowing.
    Charging,
    /// A stop command was accepted and is pending at the charge point.
    StopRequested,
    /// The charge point refused to stop.
    StopRejected,
    /// The session is over.
    Stopped,
}

impl SessionStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [Self; 7] = [
        Self::StartRequested,
        Self::StartRejected,
        Self::Started,
        Self::Charging,
        Self::StopRequested,
        Self::StopRejected,
        Self::Stopped,
    ];

    /// Returns the wire representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::StartRequested => "START_REQUESTED",
            Self::StartRejected => "START_REJECTED",
            Self::Started => "STARTED",
            Self::Charging => "CHARGING",
            Self::StopRequested => "STOP_REQUESTED",
            Self::StopRejected => "STOP_REJECTED",
            Self::Stopped => "STOPPED",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time snapshot of a charge session.
///
/// Each fetch replaces the previous snapshot wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Identifier of the EVSE (charge point connector) in use.
    pub evse_id: String,
    /// Current lifecycle status.
    pub status: SessionStatus,
    /// Energy delivered so far, in kWh.
    pub consumption: f64,
    /// Elapsed time, in seconds.
    pub duration: u64,
}

impl Session {
    /// Creates a snapshot with zero consumption and duration.
    #[must_use]
    pub fn new(evse_id: impl Into<String>, status: SessionStatus) -> Self {
        Self {
            evse_id: evse_id.into(),
            status,
            consumption: 0.0,
            duration: 0,
        }
    }

    /// Sets the consumption in kWh.
    #[must_use]
    pub const fn with_consumption(mut self, kwh: f64) -> Self {
        self.consumption = kwh;
        self
    }

    /// Sets the elapsed duration in seconds.
    #[must_use]
    pub const fn with_duration(mut self, secs: u64) -> Self {
        self.duration = secs;
        self
    }
}
