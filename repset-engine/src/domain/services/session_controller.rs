use time::OffsetDateTime;

use crate::domain::{
    error::SessionError,
    models::{
        AthleteId, DetailId, DetailPatch, ExerciseId, PerformanceDetail, PresetGroupId, SessionId,
        SessionStatus, TrainingSession,
    },
    ports::outbound::SessionGateway,
    services::WorkoutApi,
};

/// Drives one training session through its lifecycle and holds the local
/// view of it.
///
/// Every async operation reports its outcome twice: as the returned
/// `Result`, and through the `is_loading` / `last_error` observables for
/// callers that poll state instead. Lifecycle transitions are checked
/// before any backend call goes out, so an invalid call never leaves a
/// half-applied state behind.
pub struct SessionController<G> {
    api: WorkoutApi<G>,
    preset_group_id: PresetGroupId,
    athlete_id: Option<AthleteId>,
    attached_session_id: Option<SessionId>,
    session: Option<TrainingSession>,
    status: SessionStatus,
    details: Vec<PerformanceDetail>,
    loading: bool,
    error: Option<String>,
}

impl<G: SessionGateway> SessionController<G> {
    pub fn new(api: WorkoutApi<G>, preset_group_id: impl Into<PresetGroupId>) -> Self {
        Self {
            api,
            preset_group_id: preset_group_id.into(),
            athlete_id: None,
            attached_session_id: None,
            session: None,
            status: SessionStatus::Unknown,
            details: Vec::new(),
            loading: false,
            error: None,
        }
    }

    /// Record on behalf of another athlete (coach flow).
    pub fn with_athlete(mut self, athlete_id: impl Into<AthleteId>) -> Self {
        self.athlete_id = Some(athlete_id.into());
        self
    }

    /// Attach to an already-created session instead of starting a new
    /// one. [`Self::refresh_session_data`] loads its current state.
    pub fn with_session_id(mut self, session_id: impl Into<SessionId>) -> Self {
        self.attached_session_id = Some(session_id.into());
        self
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn session(&self) -> Option<&TrainingSession> {
        self.session.as_ref()
    }

    pub fn details(&self) -> &[PerformanceDetail] {
        &self.details
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    /// Message of the most recent failed operation, cleared when the next
    /// operation begins.
    pub fn last_error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Direct access to the persistence facade, for writes that do not go
    /// through a controller operation (live set recording in particular).
    pub fn api(&self) -> &WorkoutApi<G> {
        &self.api
    }

    pub async fn is_saving(&self) -> bool {
        self.api.queue().is_saving().await
    }

    pub async fn last_save_time(&self) -> Option<OffsetDateTime> {
        self.api.queue().last_save_time().await
    }

    pub async fn pending_saves(&self) -> usize {
        self.api.queue().pending_saves().await
    }

    /// Create the session on the backend and move to `Ongoing`. On
    /// failure the prior status is preserved.
    pub async fn start_session(&mut self) -> Result<(), SessionError> {
        self.begin();
        let result = self.start_session_inner().await;
        self.settle(&result);
        result
    }

    async fn start_session_inner(&mut self) -> Result<(), SessionError> {
        let next = self.status.start()?;
        let session = self
            .api
            .start_session(&self.preset_group_id, self.athlete_id.as_ref())
            .await?;
        self.session = Some(session);
        self.status = next;
        Ok(())
    }

    /// Flush every pending auto-save write. Unlike the facade's
    /// optimistic default, this resolves only once the writes are
    /// durable, and fails when any of them could not be delivered.
    pub async fn save_session(&mut self) -> Result<(), SessionError> {
        self.begin();
        let result = self.save_session_inner().await;
        self.settle(&result);
        result
    }

    async fn save_session_inner(&mut self) -> Result<(), SessionError> {
        self.session_id()?;
        if self.api.force_save().await {
            Ok(())
        } else {
            Err(SessionError::UnsavedChanges)
        }
    }

    /// Flush pending writes, then mark the session completed and refresh
    /// it from the backend to pick up server-computed fields. Aborts
    /// before the completion call whenever the flush leaves writes
    /// behind.
    pub async fn complete_session(&mut self, notes: Option<String>) -> Result<(), SessionError> {
        self.begin();
        let result = self.complete_session_inner(notes).await;
        self.settle(&result);
        result
    }

    async fn complete_session_inner(&mut self, notes: Option<String>) -> Result<(), SessionError> {
        let next = self.status.complete()?;
        let session_id = self.session_id()?;

        self.save_session_inner().await?;
        self.api
            .complete_session(&session_id, notes.as_deref())
            .await?;

        self.status = next;
        if let Some(session) = self.session.as_mut() {
            session.status = next;
            if let Some(notes) = notes {
                session.notes = Some(notes);
            }
        }

        // the session is completed either way; a failed refresh only
        // costs us the server-computed fields
        if let Err(err) = self.refresh_inner().await {
            tracing::warn!(session_id = %session_id, "completed but refresh failed: {err}");
        }
        Ok(())
    }

    /// Re-fetch the session with its details and replace local state
    /// wholesale.
    pub async fn refresh_session_data(&mut self) -> Result<(), SessionError> {
        self.begin();
        let result = self.refresh_inner().await;
        self.settle(&result);
        result
    }

    async fn refresh_inner(&mut self) -> Result<(), SessionError> {
        let session_id = self.session_id()?;
        let bundle = self.api.fetch_session(&session_id).await?;
        self.status = bundle.session.status;
        self.session = Some(bundle.session);
        self.details = bundle.details;
        Ok(())
    }

    /// Merge a patch into the matching local detail. Purely local; the
    /// caller drives persistence separately through the facade.
    pub fn update_training_detail(&mut self, detail_id: &DetailId, patch: &DetailPatch) {
        match self
            .details
            .iter_mut()
            .find(|detail| detail.id.as_ref() == Some(detail_id))
        {
            Some(detail) => detail.apply(patch),
            None => tracing::debug!(detail_id = %detail_id, "no local detail to patch"),
        }
    }

    /// Replace the local details of one exercise with their updated
    /// copies, matched by id. Entries without a local counterpart are
    /// ignored; a refresh is the way to pick up genuinely new details.
    pub fn update_exercise_training_details(
        &mut self,
        exercise_id: &ExerciseId,
        updated: Vec<PerformanceDetail>,
    ) {
        for detail in self.details.iter_mut() {
            if detail.exercise_id != *exercise_id {
                continue;
            }
            if let Some(fresh) = updated
                .iter()
                .find(|candidate| candidate.id.is_some() && candidate.id == detail.id)
            {
                *detail = fresh.clone();
            }
        }
    }

    fn session_id(&self) -> Result<SessionId, SessionError> {
        self.session
            .as_ref()
            .map(|session| session.id.clone())
            .or_else(|| self.attached_session_id.clone())
            .ok_or(SessionError::NoActiveSession)
    }

    fn begin(&mut self) {
        self.loading = true;
        self.error = None;
    }

    fn settle(&mut self, result: &Result<(), SessionError>) {
        self.loading = false;
        if let Err(err) = result {
            self.error = Some(err.to_string());
            tracing::warn!("session operation failed: {err}");
        }
    }
}
