use std::sync::Arc;

use tokio::sync::mpsc;

use crate::domain::{
    error::GatewayError,
    models::{
        AthleteId, DetailId, DetailPatch, ExerciseId, PresetGroupId, SessionId, SessionUpdate,
        SessionWithDetails, SetDraft, TrainingSession,
    },
    ports::outbound::{SessionGateway, SetRecordPatch, SetRecordPayload},
    services::{AutosaveConfig, AutosaveQueue, QueuedWrite, SaveFailure},
};

/// How a write should reach the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WriteMode {
    /// Send now and surface the gateway's answer to the caller.
    Immediate,
    /// Hand the write to the auto-save queue and return at once.
    #[default]
    Queued,
}

/// Single entry point for workout persistence.
///
/// Wraps a [`SessionGateway`] with the auto-save queue and owns the
/// translation between the domain's field names and the gateway's wire
/// names. Callers never talk to the gateway or the queue types directly.
pub struct WorkoutApi<G> {
    gateway: Arc<G>,
    queue: AutosaveQueue,
}

impl<G: SessionGateway> WorkoutApi<G> {
    /// Build the facade and spawn its queue worker. The returned receiver
    /// yields a [`SaveFailure`] for every queued write that was dropped.
    pub fn new(
        gateway: Arc<G>,
        config: AutosaveConfig,
    ) -> (Self, mpsc::UnboundedReceiver<SaveFailure>) {
        let (queue, failures) = AutosaveQueue::spawn(Arc::clone(&gateway), config);
        (Self { gateway, queue }, failures)
    }

    pub fn queue(&self) -> &AutosaveQueue {
        &self.queue
    }

    /// Create a session on the backend. Always immediate: the caller
    /// needs the assigned id, and a blind retry could create duplicates.
    pub async fn start_session(
        &self,
        preset_group_id: &PresetGroupId,
        athlete_id: Option<&AthleteId>,
    ) -> Result<TrainingSession, GatewayError> {
        self.gateway.start_session(preset_group_id, athlete_id).await
    }

    pub async fn fetch_session(
        &self,
        session_id: &SessionId,
    ) -> Result<SessionWithDetails, GatewayError> {
        self.gateway.fetch_session(session_id).await
    }

    /// Update session-level fields. Queued by default; a queued call
    /// reports success optimistically and terminal failures arrive on the
    /// failure channel.
    pub async fn update_session(
        &self,
        session_id: &SessionId,
        update: SessionUpdate,
        mode: WriteMode,
    ) -> Result<(), GatewayError> {
        match mode {
            WriteMode::Immediate => self.gateway.update_session(session_id, &update).await,
            WriteMode::Queued => {
                self.queue.enqueue(QueuedWrite::Session {
                    session_id: session_id.clone(),
                    update,
                });
                Ok(())
            }
        }
    }

    /// Mark the session completed. Always immediate; completion is the
    /// one write that must not sit in a queue.
    pub async fn complete_session(
        &self,
        session_id: &SessionId,
        notes: Option<&str>,
    ) -> Result<(), GatewayError> {
        self.gateway.complete_session(session_id, notes).await
    }

    /// Record one set. The draft's `duration` travels to the gateway as
    /// `performing_time`.
    pub async fn record_set(
        &self,
        session_id: &SessionId,
        exercise_id: &ExerciseId,
        draft: SetDraft,
        mode: WriteMode,
    ) -> Result<(), GatewayError> {
        let payload = to_record_payload(&draft);
        match mode {
            WriteMode::Immediate => {
                self.gateway
                    .add_set_record(session_id, exercise_id, &payload)
                    .await
            }
            WriteMode::Queued => {
                self.queue.enqueue(QueuedWrite::SetRecord {
                    session_id: session_id.clone(),
                    exercise_id: exercise_id.clone(),
                    payload,
                });
                Ok(())
            }
        }
    }

    /// Patch an already-persisted detail by its backend id. Always
    /// immediate: the queue keys writes by `(session, exercise, set)` and
    /// an id-addressed patch has no slot there.
    pub async fn update_set_record(
        &self,
        detail_id: &DetailId,
        patch: DetailPatch,
    ) -> Result<(), GatewayError> {
        self.gateway
            .update_set_record(detail_id, &to_record_patch(&patch))
            .await
    }

    /// Drain every queued write now. `true` means the queue is empty.
    pub async fn force_save(&self) -> bool {
        self.queue.flush().await
    }
}

fn to_record_payload(draft: &SetDraft) -> SetRecordPayload {
    SetRecordPayload {
        set_index: draft.set_index,
        reps: draft.metrics.reps,
        weight: draft.metrics.weight,
        distance: draft.metrics.distance,
        performing_time: draft.metrics.duration,
        power: draft.metrics.power,
        resistance: draft.metrics.resistance,
        velocity: draft.metrics.velocity,
        tempo: draft.metrics.tempo.clone(),
        completed: draft.completed,
    }
}

fn to_record_patch(patch: &DetailPatch) -> SetRecordPatch {
    SetRecordPatch {
        reps: patch.reps,
        weight: patch.weight,
        distance: patch.distance,
        performing_time: patch.duration,
        power: patch.power,
        resistance: patch.resistance,
        velocity: patch.velocity,
        tempo: patch.tempo.clone(),
        completed: patch.completed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::outbound::{InMemoryGateway, RecordedCall};
    use crate::domain::models::SessionStatus;
    use std::time::Duration;

    fn make_api() -> (
        Arc<InMemoryGateway>,
        WorkoutApi<InMemoryGateway>,
        mpsc::UnboundedReceiver<SaveFailure>,
    ) {
        let gateway = Arc::new(InMemoryGateway::new().with_session(TrainingSession::new(
            "s1",
            "pg-1",
            SessionStatus::Ongoing,
        )));
        let (api, failures) = WorkoutApi::new(Arc::clone(&gateway), AutosaveConfig::default());
        (gateway, api, failures)
    }

    #[tokio::test]
    async fn recorded_duration_travels_as_performing_time() {
        let (gateway, api, _failures) = make_api();

        let draft = SetDraft::new(1).with_reps(5).with_duration(42.0);
        api.record_set(
            &SessionId::from("s1"),
            &ExerciseId::from("ex1"),
            draft,
            WriteMode::Immediate,
        )
        .await
        .unwrap();

        let calls = gateway.calls();
        let payload = match &calls[0] {
            RecordedCall::AddSetRecord { payload, .. } => payload.clone(),
            other => panic!("unexpected call: {other:?}"),
        };
        assert_eq!(payload.performing_time, Some(42.0));

        let wire = serde_json::to_value(&payload).unwrap();
        assert!(wire.get("duration").is_none());
        assert_eq!(wire["performing_time"], 42.0);
    }

    #[tokio::test(start_paused = true)]
    async fn queued_records_return_at_once_and_coalesce() {
        let (gateway, api, _failures) = make_api();
        let session_id = SessionId::from("s1");
        let exercise_id = ExerciseId::from("ex1");

        api.record_set(
            &session_id,
            &exercise_id,
            SetDraft::new(1).with_reps(8),
            WriteMode::Queued,
        )
        .await
        .unwrap();
        api.record_set(
            &session_id,
            &exercise_id,
            SetDraft::new(1).with_reps(10),
            WriteMode::Queued,
        )
        .await
        .unwrap();

        // nothing has reached the gateway before the debounce fires
        assert!(gateway.calls().is_empty());

        tokio::time::sleep(Duration::from_millis(2100)).await;

        let calls = gateway.calls();
        assert_eq!(calls.len(), 1);
        match &calls[0] {
            RecordedCall::AddSetRecord { payload, .. } => {
                assert_eq!(payload.reps, Some(10));
            }
            other => panic!("unexpected call: {other:?}"),
        }
    }

    #[tokio::test]
    async fn immediate_failures_reach_the_caller() {
        let (gateway, api, _failures) = make_api();
        gateway.fail_always(GatewayError::InvalidInput("bad payload".into()));

        let result = api
            .record_set(
                &SessionId::from("s1"),
                &ExerciseId::from("ex1"),
                SetDraft::new(1),
                WriteMode::Immediate,
            )
            .await;
        assert!(matches!(result, Err(GatewayError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn detail_patches_bypass_the_queue() {
        let (gateway, api, _failures) = make_api();
        gateway
            .add_set_record(
                &SessionId::from("s1"),
                &ExerciseId::from("ex1"),
                &SetRecordPayload {
                    set_index: 1,
                    reps: Some(8),
                    ..SetRecordPayload::default()
                },
            )
            .await
            .unwrap();

        api.update_set_record(&DetailId::from("d1"), DetailPatch::default().with_reps(12))
            .await
            .unwrap();

        // the patch call is already recorded, no debounce involved
        let calls = gateway.calls();
        assert!(matches!(
            calls.last(),
            Some(RecordedCall::UpdateSetRecord { .. })
        ));
        let details = gateway.details_for(&SessionId::from("s1"));
        assert_eq!(details[0].metrics.reps, Some(12));
    }

    #[tokio::test(start_paused = true)]
    async fn force_save_drains_the_queue() {
        let (gateway, api, _failures) = make_api();

        api.update_session(
            &SessionId::from("s1"),
            SessionUpdate::notes("halfway"),
            WriteMode::Queued,
        )
        .await
        .unwrap();

        assert!(api.force_save().await);
        assert_eq!(gateway.calls().len(), 1);
        assert_eq!(
            gateway
                .sessions()
                .get(&SessionId::from("s1"))
                .and_then(|s| s.notes.clone())
                .as_deref(),
            Some("halfway")
        );
    }
}
