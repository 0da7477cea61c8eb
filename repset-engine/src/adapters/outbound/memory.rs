//! In-memory gateway implementation for testing.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::domain::{
    error::GatewayError,
    models::{
        AthleteId, DetailId, ExerciseId, PerformanceDetail, PresetGroupId, SessionId,
        SessionStatus, SessionUpdate, SessionWithDetails, SetMetrics, TrainingSession,
    },
    ports::outbound::{SessionGateway, SetRecordPatch, SetRecordPayload},
};

/// One call served by an [`InMemoryGateway`], with its arguments.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCall {
    StartSession {
        preset_group_id: PresetGroupId,
        athlete_id: Option<AthleteId>,
    },
    FetchSession {
        session_id: SessionId,
    },
    UpdateSession {
        session_id: SessionId,
        update: SessionUpdate,
    },
    CompleteSession {
        session_id: SessionId,
        notes: Option<String>,
    },
    AddSetRecord {
        session_id: SessionId,
        exercise_id: ExerciseId,
        payload: SetRecordPayload,
    },
    UpdateSetRecord {
        detail_id: DetailId,
        patch: SetRecordPatch,
    },
}

/// In-memory [`SessionGateway`] backed by hash maps.
///
/// Records every call in arrival order and can be scripted to fail,
/// which makes it the backing double for queue and controller tests as
/// well as the demo binary. Clones share state.
///
/// # Examples
///
/// ```
/// use repset_engine::{InMemoryGateway, SessionStatus, TrainingSession};
///
/// let gateway = InMemoryGateway::new()
///     .with_session(TrainingSession::new("s1", "pg-1", SessionStatus::Ongoing));
/// ```
#[derive(Debug, Clone, Default)]
pub struct InMemoryGateway {
    sessions: Arc<RwLock<HashMap<SessionId, TrainingSession>>>,
    details: Arc<RwLock<Vec<PerformanceDetail>>>,
    calls: Arc<RwLock<Vec<RecordedCall>>>,
    /// Errors handed out one per call, front first, before `always_fail`
    /// is consulted.
    scripted: Arc<RwLock<VecDeque<GatewayError>>>,
    always_fail: Arc<RwLock<Option<GatewayError>>>,
    next_session: Arc<AtomicU64>,
    next_detail: Arc<AtomicU64>,
}

impl InMemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a session before the test runs.
    pub fn with_session(self, session: TrainingSession) -> Self {
        {
            let mut sessions = self.sessions.write().unwrap();
            sessions.insert(session.id.clone(), session);
        }
        self
    }

    /// Seed a persisted detail before the test runs.
    pub fn with_detail(self, detail: PerformanceDetail) -> Self {
        {
            let mut details = self.details.write().unwrap();
            details.push(detail);
        }
        self
    }

    /// Fail the next call with this error, then behave normally again.
    pub fn push_failure(&self, error: GatewayError) {
        self.scripted.write().unwrap().push_back(error);
    }

    /// Fail the next `count` calls with clones of this error.
    pub fn script_failures(&self, count: usize, error: GatewayError) {
        let mut scripted = self.scripted.write().unwrap();
        for _ in 0..count {
            scripted.push_back(error.clone());
        }
    }

    /// Fail every call until [`Self::clear_failures`].
    pub fn fail_always(&self, error: GatewayError) {
        *self.always_fail.write().unwrap() = Some(error);
    }

    pub fn clear_failures(&self) {
        self.always_fail.write().unwrap().take();
        self.scripted.write().unwrap().clear();
    }

    /// Every call served so far, failed ones included.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.read().unwrap().clone()
    }

    pub fn sessions(&self) -> HashMap<SessionId, TrainingSession> {
        self.sessions.read().unwrap().clone()
    }

    pub fn details_for(&self, session_id: &SessionId) -> Vec<PerformanceDetail> {
        self.details
            .read()
            .unwrap()
            .iter()
            .filter(|detail| detail.session_id == *session_id)
            .cloned()
            .collect()
    }

    /// Record the call, then report the scripted outcome for it.
    fn gate(&self, call: RecordedCall) -> Result<(), GatewayError> {
        self.calls.write().unwrap().push(call);
        if let Some(error) = self.scripted.write().unwrap().pop_front() {
            return Err(error);
        }
        if let Some(error) = self.always_fail.read().unwrap().as_ref() {
            return Err(error.clone());
        }
        Ok(())
    }
}

#[async_trait]
impl SessionGateway for InMemoryGateway {
    async fn start_session(
        &self,
        preset_group_id: &PresetGroupId,
        athlete_id: Option<&AthleteId>,
    ) -> Result<TrainingSession, GatewayError> {
        self.gate(RecordedCall::StartSession {
            preset_group_id: preset_group_id.clone(),
            athlete_id: athlete_id.cloned(),
        })?;

        let n = self.next_session.fetch_add(1, Ordering::Relaxed) + 1;
        let mut session = TrainingSession::new(
            format!("s{n}"),
            preset_group_id.clone(),
            SessionStatus::Ongoing,
        );
        if let Some(athlete_id) = athlete_id {
            session = session.with_athlete(athlete_id.clone());
        }
        self.sessions
            .write()
            .unwrap()
            .insert(session.id.clone(), session.clone());
        Ok(session)
    }

    async fn fetch_session(
        &self,
        session_id: &SessionId,
    ) -> Result<SessionWithDetails, GatewayError> {
        self.gate(RecordedCall::FetchSession {
            session_id: session_id.clone(),
        })?;

        let session = self
            .sessions
            .read()
            .unwrap()
            .get(session_id)
            .cloned()
            .ok_or_else(|| GatewayError::NotFound(format!("session {session_id}")))?;
        Ok(SessionWithDetails {
            session,
            details: self.details_for(session_id),
        })
    }

    async fn update_session(
        &self,
        session_id: &SessionId,
        update: &SessionUpdate,
    ) -> Result<(), GatewayError> {
        self.gate(RecordedCall::UpdateSession {
            session_id: session_id.clone(),
            update: update.clone(),
        })?;

        let mut sessions = self.sessions.write().unwrap();
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| GatewayError::NotFound(format!("session {session_id}")))?;
        if let Some(notes) = &update.notes {
            session.notes = Some(notes.clone());
        }
        Ok(())
    }

    async fn complete_session(
        &self,
        session_id: &SessionId,
        notes: Option<&str>,
    ) -> Result<(), GatewayError> {
        self.gate(RecordedCall::CompleteSession {
            session_id: session_id.clone(),
            notes: notes.map(str::to_owned),
        })?;

        let mut sessions = self.sessions.write().unwrap();
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| GatewayError::NotFound(format!("session {session_id}")))?;
        // completing an already completed session is harmless
        session.status = SessionStatus::Completed;
        if let Some(notes) = notes {
            session.notes = Some(notes.to_owned());
        }
        Ok(())
    }

    async fn add_set_record(
        &self,
        session_id: &SessionId,
        exercise_id: &ExerciseId,
        payload: &SetRecordPayload,
    ) -> Result<(), GatewayError> {
        self.gate(RecordedCall::AddSetRecord {
            session_id: session_id.clone(),
            exercise_id: exercise_id.clone(),
            payload: payload.clone(),
        })?;

        if !self.sessions.read().unwrap().contains_key(session_id) {
            return Err(GatewayError::NotFound(format!("session {session_id}")));
        }

        let mut details = self.details.write().unwrap();
        match details.iter_mut().find(|detail| {
            detail.session_id == *session_id
                && detail.exercise_id == *exercise_id
                && detail.set_index == payload.set_index
        }) {
            Some(existing) => {
                let id = existing.id.clone();
                *existing = detail_from_payload(session_id, exercise_id, payload, id);
            }
            None => {
                let n = self.next_detail.fetch_add(1, Ordering::Relaxed) + 1;
                details.push(detail_from_payload(
                    session_id,
                    exercise_id,
                    payload,
                    Some(DetailId::from(format!("d{n}"))),
                ));
            }
        }
        Ok(())
    }

    async fn update_set_record(
        &self,
        detail_id: &DetailId,
        patch: &SetRecordPatch,
    ) -> Result<(), GatewayError> {
        self.gate(RecordedCall::UpdateSetRecord {
            detail_id: detail_id.clone(),
            patch: patch.clone(),
        })?;

        let mut details = self.details.write().unwrap();
        let detail = details
            .iter_mut()
            .find(|detail| detail.id.as_ref() == Some(detail_id))
            .ok_or_else(|| GatewayError::NotFound(format!("detail {detail_id}")))?;
        apply_wire_patch(detail, patch);
        Ok(())
    }
}

fn detail_from_payload(
    session_id: &SessionId,
    exercise_id: &ExerciseId,
    payload: &SetRecordPayload,
    id: Option<DetailId>,
) -> PerformanceDetail {
    PerformanceDetail {
        id,
        session_id: session_id.clone(),
        exercise_id: exercise_id.clone(),
        set_index: payload.set_index,
        metrics: SetMetrics {
            reps: payload.reps,
            weight: payload.weight,
            distance: payload.distance,
            duration: payload.performing_time,
            power: payload.power,
            resistance: payload.resistance,
            velocity: payload.velocity,
            tempo: payload.tempo.clone(),
        },
        completed: payload.completed,
    }
}

fn apply_wire_patch(detail: &mut PerformanceDetail, patch: &SetRecordPatch) {
    if let Some(reps) = patch.reps {
        detail.metrics.reps = Some(reps);
    }
    if let Some(weight) = patch.weight {
        detail.metrics.weight = Some(weight);
    }
    if let Some(distance) = patch.distance {
        detail.metrics.distance = Some(distance);
    }
    if let Some(performing_time) = patch.performing_time {
        detail.metrics.duration = Some(performing_time);
    }
    if let Some(power) = patch.power {
        detail.metrics.power = Some(power);
    }
    if let Some(resistance) = patch.resistance {
        detail.metrics.resistance = Some(resistance);
    }
    if let Some(velocity) = patch.velocity {
        detail.metrics.velocity = Some(velocity);
    }
    if let Some(tempo) = &patch.tempo {
        detail.metrics.tempo = Some(tempo.clone());
    }
    if let Some(completed) = patch.completed {
        detail.completed = completed;
    }
}
