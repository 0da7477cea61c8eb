use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{AthleteId, PerformanceDetail, PresetGroupId, SessionId};

/// Lifecycle state of a training session.
///
/// Moves strictly forward: `assigned -> ongoing -> completed`. Completion
/// is terminal. `Unknown` is the placeholder before the first fetch has
/// resolved; it also absorbs unrecognized status strings from the backend
/// so a single odd value cannot fail a whole session fetch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SessionStatus {
    #[default]
    Unknown,
    Assigned,
    Ongoing,
    Completed,
}

impl SessionStatus {
    /// Transition into `Ongoing`. Valid before the session has begun,
    /// i.e. from `Unknown` or `Assigned`.
    pub fn start(self) -> Result<Self, InvalidTransition> {
        match self {
            Self::Unknown | Self::Assigned => Ok(Self::Ongoing),
            _ => Err(InvalidTransition {
                from: self,
                to: Self::Ongoing,
            }),
        }
    }

    /// Transition into `Completed`. Only an ongoing session can complete.
    pub fn complete(self) -> Result<Self, InvalidTransition> {
        match self {
            Self::Ongoing => Ok(Self::Completed),
            _ => Err(InvalidTransition {
                from: self,
                to: Self::Completed,
            }),
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Unknown => write!(f, "unknown"),
            SessionStatus::Assigned => write!(f, "assigned"),
            SessionStatus::Ongoing => write!(f, "ongoing"),
            SessionStatus::Completed => write!(f, "completed"),
        }
    }
}

impl From<&str> for SessionStatus {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "assigned" => SessionStatus::Assigned,
            "ongoing" => SessionStatus::Ongoing,
            "completed" => SessionStatus::Completed,
            _ => SessionStatus::Unknown,
        }
    }
}

impl From<String> for SessionStatus {
    fn from(s: String) -> Self {
        s.as_str().into()
    }
}

impl From<SessionStatus> for String {
    fn from(status: SessionStatus) -> Self {
        status.to_string()
    }
}

/// Error returned when a lifecycle transition is not allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid session transition: {from} -> {to}")]
pub struct InvalidTransition {
    pub from: SessionStatus,
    pub to: SessionStatus,
}

/// One athlete's execution of a preset exercise group.
///
/// A value of this type only exists once the backend has persisted the
/// session and assigned its id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSession {
    pub id: SessionId,
    pub preset_group_id: PresetGroupId,
    /// Absent means the session belongs to the acting user.
    pub athlete_id: Option<AthleteId>,
    pub status: SessionStatus,
    pub notes: Option<String>,
}

impl TrainingSession {
    pub fn new(
        id: impl Into<SessionId>,
        preset_group_id: impl Into<PresetGroupId>,
        status: SessionStatus,
    ) -> Self {
        Self {
            id: id.into(),
            preset_group_id: preset_group_id.into(),
            athlete_id: None,
            status,
            notes: None,
        }
    }

    pub fn with_athlete(mut self, athlete_id: impl Into<AthleteId>) -> Self {
        self.athlete_id = Some(athlete_id.into());
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

/// Partial update to a stored session. `None` fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionUpdate {
    pub notes: Option<String>,
}

impl SessionUpdate {
    pub fn notes(text: impl Into<String>) -> Self {
        Self {
            notes: Some(text.into()),
        }
    }
}

/// A session together with every recorded performance detail, as returned
/// by a gateway fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionWithDetails {
    pub session: TrainingSession,
    pub details: Vec<PerformanceDetail>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_moves_forward_only() {
        assert_eq!(SessionStatus::Unknown.start(), Ok(SessionStatus::Ongoing));
        assert_eq!(SessionStatus::Assigned.start(), Ok(SessionStatus::Ongoing));
        assert_eq!(
            SessionStatus::Ongoing.complete(),
            Ok(SessionStatus::Completed)
        );

        let err = SessionStatus::Ongoing.start().unwrap_err();
        assert_eq!(err.from, SessionStatus::Ongoing);

        assert!(SessionStatus::Assigned.complete().is_err());
        assert!(SessionStatus::Completed.complete().is_err());
        assert!(SessionStatus::Completed.start().is_err());
    }

    #[test]
    fn completion_is_terminal() {
        assert!(SessionStatus::Completed.is_terminal());
        assert!(!SessionStatus::Ongoing.is_terminal());
    }

    #[test]
    fn status_round_trips_through_strings() {
        let json = serde_json::to_string(&SessionStatus::Ongoing).unwrap();
        assert_eq!(json, "\"ongoing\"");

        let parsed: SessionStatus = serde_json::from_str("\"completed\"").unwrap();
        assert_eq!(parsed, SessionStatus::Completed);
    }

    #[test]
    fn unrecognized_status_becomes_unknown() {
        let parsed: SessionStatus = serde_json::from_str("\"archived\"").unwrap();
        assert_eq!(parsed, SessionStatus::Unknown);
    }
}
