use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{
    error::GatewayError,
    models::{
        AthleteId, DetailId, ExerciseId, PresetGroupId, SessionId, SessionUpdate,
        SessionWithDetails, TrainingSession,
    },
};

/// Wire form of a new set record.
///
/// Field names follow the remote contract, which is why the local
/// `duration` measurement travels as `performing_time` here. Optional
/// measurements are omitted from the serialized form entirely when unset,
/// so a record without a duration carries no `performing_time` key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SetRecordPayload {
    pub set_index: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reps: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub performing_time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub power: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resistance: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub velocity: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tempo: Option<String>,
    pub completed: bool,
}

/// Wire form of a partial update to an already-persisted set record.
/// Same field naming rules as [`SetRecordPayload`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SetRecordPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reps: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub performing_time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub power: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resistance: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub velocity: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tempo: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
}

/// Outbound port for session persistence.
///
/// This trait defines the contract any remote backend must implement;
/// everything above it is transport-agnostic. Expected failures come back
/// as [`GatewayError`] values, never as panics.
#[async_trait]
pub trait SessionGateway: Send + Sync + 'static {
    /// Create a session for the preset group and begin it.
    async fn start_session(
        &self,
        preset_group_id: &PresetGroupId,
        athlete_id: Option<&AthleteId>,
    ) -> Result<TrainingSession, GatewayError>;

    /// Fetch a session together with every recorded detail.
    async fn fetch_session(
        &self,
        session_id: &SessionId,
    ) -> Result<SessionWithDetails, GatewayError>;

    /// Apply a partial update to a stored session.
    async fn update_session(
        &self,
        session_id: &SessionId,
        update: &SessionUpdate,
    ) -> Result<(), GatewayError>;

    /// Mark a session completed, optionally attaching final notes.
    async fn complete_session(
        &self,
        session_id: &SessionId,
        notes: Option<&str>,
    ) -> Result<(), GatewayError>;

    /// Insert or replace one set record. `(exercise_id, set_index)` is the
    /// upsert key within the session.
    async fn add_set_record(
        &self,
        session_id: &SessionId,
        exercise_id: &ExerciseId,
        payload: &SetRecordPayload,
    ) -> Result<(), GatewayError>;

    /// Update an already-persisted set record by its assigned id.
    async fn update_set_record(
        &self,
        detail_id: &DetailId,
        patch: &SetRecordPatch,
    ) -> Result<(), GatewayError>;
}
