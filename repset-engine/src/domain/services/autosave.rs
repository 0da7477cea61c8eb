use std::{collections::HashMap, fmt, sync::Arc, time::Duration};

use time::OffsetDateTime;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::time::Instant;
use tracing::instrument;

use crate::domain::{
    error::GatewayError,
    models::{ExerciseId, SessionId, SessionUpdate},
    ports::outbound::{SessionGateway, SetRecordPayload},
};

/// Tuning knobs for the auto-save queue.
#[derive(Debug, Clone)]
pub struct AutosaveConfig {
    /// Idle delay before queued writes are flushed.
    pub debounce: Duration,
    /// How many times a transient failure is retried before the write is
    /// dropped and reported.
    pub max_retries: u32,
}

impl AutosaveConfig {
    pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(2000);
    pub const DEFAULT_MAX_RETRIES: u32 = 3;
}

impl Default for AutosaveConfig {
    fn default() -> Self {
        Self {
            debounce: Self::DEFAULT_DEBOUNCE,
            max_retries: Self::DEFAULT_MAX_RETRIES,
        }
    }
}

/// Identity of a queued write. The queue holds at most one write per key;
/// a later write under the same key replaces the earlier one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SaveKey {
    Session {
        session_id: SessionId,
    },
    SetRecord {
        session_id: SessionId,
        exercise_id: ExerciseId,
        set_index: u32,
    },
}

impl fmt::Display for SaveKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SaveKey::Session { session_id } => write!(f, "session-{session_id}"),
            SaveKey::SetRecord {
                session_id,
                exercise_id,
                set_index,
            } => write!(f, "exercise-{session_id}-{exercise_id}-{set_index}"),
        }
    }
}

/// A write waiting in the queue, already in wire form.
#[derive(Debug, Clone)]
pub enum QueuedWrite {
    Session {
        session_id: SessionId,
        update: SessionUpdate,
    },
    SetRecord {
        session_id: SessionId,
        exercise_id: ExerciseId,
        payload: SetRecordPayload,
    },
}

impl QueuedWrite {
    pub fn key(&self) -> SaveKey {
        match self {
            QueuedWrite::Session { session_id, .. } => SaveKey::Session {
                session_id: session_id.clone(),
            },
            QueuedWrite::SetRecord {
                session_id,
                exercise_id,
                payload,
            } => SaveKey::SetRecord {
                session_id: session_id.clone(),
                exercise_id: exercise_id.clone(),
                set_index: payload.set_index,
            },
        }
    }
}

/// Emitted on the failure channel when a write is dropped for good,
/// either because its retry budget ran out or because the gateway
/// rejected it permanently.
#[derive(Debug, Clone)]
pub struct SaveFailure {
    pub key: SaveKey,
    /// Total dispatch attempts made for this write.
    pub attempts: u32,
    pub error: GatewayError,
}

enum AutosaveMessage {
    Enqueue(QueuedWrite),
    Flush(oneshot::Sender<bool>),
}

#[derive(Debug, Clone, Default)]
struct QueueStats {
    saving: Arc<RwLock<bool>>,
    last_save: Arc<RwLock<Option<OffsetDateTime>>>,
    pending: Arc<RwLock<usize>>,
}

/// Handle to a running auto-save queue.
///
/// The queue coalesces writes per [`SaveKey`], flushes them after the
/// configured idle delay, and retries transient gateway failures with a
/// doubled delay between rounds. Handles are cheap to clone and all feed
/// the same worker; when every handle is dropped the worker makes one
/// final best-effort drain and exits.
#[derive(Debug, Clone)]
pub struct AutosaveQueue {
    sender: mpsc::UnboundedSender<AutosaveMessage>,
    stats: QueueStats,
}

impl AutosaveQueue {
    /// Spawn a queue worker over the gateway. Returns the handle together
    /// with the receiver on which dropped writes are reported.
    pub fn spawn<G: SessionGateway>(
        gateway: Arc<G>,
        config: AutosaveConfig,
    ) -> (Self, mpsc::UnboundedReceiver<SaveFailure>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let (failure_tx, failure_rx) = mpsc::unbounded_channel();
        let stats = QueueStats::default();

        let worker = AutosaveWorker {
            gateway,
            config,
            items: HashMap::new(),
            stats: stats.clone(),
            failures: failure_tx,
        };
        tokio::spawn(worker.run(receiver));

        (Self { sender, stats }, failure_rx)
    }

    /// Queue a write under its key, replacing any not-yet-sent write for
    /// the same key. Fire-and-forget: the caller treats this as an
    /// optimistic success and hears about terminal failures on the
    /// failure channel instead of a return value.
    pub fn enqueue(&self, write: QueuedWrite) {
        if self.sender.send(AutosaveMessage::Enqueue(write)).is_err() {
            tracing::warn!("autosave worker is gone, dropping write");
        }
    }

    /// Cancel the pending debounce and drain the queue now. Resolves to
    /// `true` when the queue ended empty, `false` when writes remain
    /// undelivered.
    pub async fn flush(&self) -> bool {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.sender.send(AutosaveMessage::Flush(reply_tx)).is_err() {
            tracing::warn!("autosave worker is gone, nothing to flush");
            return false;
        }
        reply_rx.await.unwrap_or(false)
    }

    /// Whether a drain round is currently running.
    pub async fn is_saving(&self) -> bool {
        *self.stats.saving.read().await
    }

    /// When the queue last finished a fully successful drain.
    pub async fn last_save_time(&self) -> Option<OffsetDateTime> {
        *self.stats.last_save.read().await
    }

    /// Number of writes currently waiting in the queue.
    pub async fn pending_saves(&self) -> usize {
        *self.stats.pending.read().await
    }
}

struct AutosaveWorker<G> {
    gateway: Arc<G>,
    config: AutosaveConfig,
    items: HashMap<SaveKey, PendingSave>,
    stats: QueueStats,
    failures: mpsc::UnboundedSender<SaveFailure>,
}

#[derive(Debug, Clone)]
struct PendingSave {
    write: QueuedWrite,
    /// Failed dispatches so far.
    attempts: u32,
}

impl<G: SessionGateway> AutosaveWorker<G> {
    /// Delay multiplier after a drain round leaves writes behind.
    const BACKOFF_FACTOR: u32 = 2;

    #[instrument(name = "AutosaveQueue::run", skip(self, receiver))]
    async fn run(mut self, mut receiver: mpsc::UnboundedReceiver<AutosaveMessage>) {
        let mut deadline: Option<Instant> = None;

        loop {
            tokio::select! {
                message = receiver.recv() => match message {
                    Some(AutosaveMessage::Enqueue(write)) => {
                        self.insert(write).await;
                        if deadline.is_none() {
                            deadline = Some(Instant::now() + self.config.debounce);
                        }
                    }
                    Some(AutosaveMessage::Flush(reply)) => {
                        deadline = None;
                        let empty = self.drain_and_reschedule(&mut deadline).await;
                        let _ = reply.send(empty);
                    }
                    None => {
                        if !self.items.is_empty() {
                            tracing::debug!(
                                pending = self.items.len(),
                                "all handles dropped, final drain"
                            );
                            self.drain().await;
                        }
                        break;
                    }
                },
                _ = sleep_until_or_rest(&deadline) => {
                    if deadline.take().is_some() {
                        self.drain_and_reschedule(&mut deadline).await;
                    }
                }
            }
        }
    }

    async fn insert(&mut self, write: QueuedWrite) {
        let key = write.key();
        tracing::debug!(key = %key, "queueing write");
        self.items.insert(key, PendingSave { write, attempts: 0 });
        self.sync_pending().await;
    }

    /// Drain once, then either clear the deadline (queue empty) or
    /// schedule the next round after a longer backoff so a degraded
    /// backend is not hammered at the base cadence.
    async fn drain_and_reschedule(&mut self, deadline: &mut Option<Instant>) -> bool {
        let empty = self.drain().await;
        *deadline = if empty {
            None
        } else {
            Some(Instant::now() + self.config.debounce * Self::BACKOFF_FACTOR)
        };
        empty
    }

    /// One drain round: dispatch every queued write concurrently, then
    /// settle the outcomes against the map. Returns whether the queue is
    /// empty afterwards.
    ///
    /// Cross-key ordering is deliberately unspecified; every key maps to
    /// a disjoint remote resource.
    #[instrument(name = "AutosaveQueue::drain", skip(self), fields(pending = self.items.len()))]
    async fn drain(&mut self) -> bool {
        if self.items.is_empty() {
            return true;
        }
        self.set_saving(true).await;

        let batch: Vec<PendingSave> = self.items.values().cloned().collect();
        let results = futures::future::join_all(
            batch
                .iter()
                .map(|item| send_write(self.gateway.as_ref(), &item.write)),
        )
        .await;

        let mut round_clean = true;
        for (item, result) in batch.into_iter().zip(results) {
            let key = item.write.key();
            match result {
                Ok(()) => {
                    self.items.remove(&key);
                }
                Err(err) if err.is_transient() && item.attempts < self.config.max_retries => {
                    round_clean = false;
                    if let Some(pending) = self.items.get_mut(&key) {
                        pending.attempts += 1;
                    }
                    tracing::warn!(
                        key = %key,
                        attempt = item.attempts + 1,
                        "save failed, will retry: {err}"
                    );
                }
                Err(err) => {
                    round_clean = false;
                    self.items.remove(&key);
                    let attempts = item.attempts + 1;
                    tracing::error!(key = %key, attempts, "dropping save: {err}");
                    let _ = self.failures.send(SaveFailure {
                        key,
                        attempts,
                        error: err,
                    });
                }
            }
        }

        if round_clean {
            self.stats
                .last_save
                .write()
                .await
                .replace(OffsetDateTime::now_utc());
        }
        self.sync_pending().await;
        self.set_saving(false).await;
        self.items.is_empty()
    }

    async fn set_saving(&self, saving: bool) {
        *self.stats.saving.write().await = saving;
    }

    async fn sync_pending(&self) {
        *self.stats.pending.write().await = self.items.len();
    }
}

async fn send_write<G: SessionGateway>(
    gateway: &G,
    write: &QueuedWrite,
) -> Result<(), GatewayError> {
    match write {
        QueuedWrite::Session { session_id, update } => {
            gateway.update_session(session_id, update).await
        }
        QueuedWrite::SetRecord {
            session_id,
            exercise_id,
            payload,
        } => gateway.add_set_record(session_id, exercise_id, payload).await,
    }
}

async fn sleep_until_or_rest(deadline: &Option<Instant>) {
    if let Some(at) = deadline {
        tokio::time::sleep_until(*at).await;
    } else {
        // Sleep for a very long time to mimic a pending future.
        tokio::time::sleep(Duration::from_secs(86400)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::outbound::{InMemoryGateway, RecordedCall};
    use crate::domain::models::{SessionStatus, TrainingSession};

    fn make_gateway() -> Arc<InMemoryGateway> {
        Arc::new(InMemoryGateway::new().with_session(TrainingSession::new(
            "s1",
            "pg-1",
            SessionStatus::Ongoing,
        )))
    }

    fn set_write(set_index: u32, reps: u32) -> QueuedWrite {
        QueuedWrite::SetRecord {
            session_id: SessionId::from("s1"),
            exercise_id: ExerciseId::from("ex1"),
            payload: SetRecordPayload {
                set_index,
                reps: Some(reps),
                ..SetRecordPayload::default()
            },
        }
    }

    fn note_write(text: &str) -> QueuedWrite {
        QueuedWrite::Session {
            session_id: SessionId::from("s1"),
            update: SessionUpdate::notes(text),
        }
    }

    fn write_calls(gateway: &InMemoryGateway) -> Vec<RecordedCall> {
        gateway
            .calls()
            .into_iter()
            .filter(|call| {
                matches!(
                    call,
                    RecordedCall::AddSetRecord { .. } | RecordedCall::UpdateSession { .. }
                )
            })
            .collect()
    }

    /// Give the worker a turn to process everything already sent to it.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[test]
    fn keys_follow_the_documented_shapes() {
        assert_eq!(note_write("x").key().to_string(), "session-s1");
        assert_eq!(set_write(3, 10).key().to_string(), "exercise-s1-ex1-3");

        // differing set indices never collide, nor do the two kinds
        assert_ne!(set_write(1, 10).key(), set_write(2, 10).key());
        assert_ne!(note_write("x").key(), set_write(1, 10).key());
    }

    #[tokio::test(start_paused = true)]
    async fn coalesces_writes_under_one_key() {
        let gateway = make_gateway();
        let (queue, _failures) =
            AutosaveQueue::spawn(Arc::clone(&gateway), AutosaveConfig::default());

        queue.enqueue(note_write("first"));
        queue.enqueue(note_write("second"));
        settle().await;
        assert_eq!(queue.pending_saves().await, 1);

        tokio::time::sleep(Duration::from_millis(2100)).await;

        let calls = write_calls(&gateway);
        assert_eq!(calls.len(), 1);
        match &calls[0] {
            RecordedCall::UpdateSession { update, .. } => {
                assert_eq!(update.notes.as_deref(), Some("second"));
            }
            other => panic!("unexpected call: {other:?}"),
        }
        assert_eq!(queue.pending_saves().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn later_enqueues_do_not_extend_the_debounce() {
        let gateway = make_gateway();
        let (queue, _failures) =
            AutosaveQueue::spawn(Arc::clone(&gateway), AutosaveConfig::default());

        queue.enqueue(note_write("first"));
        tokio::time::sleep(Duration::from_millis(1500)).await;
        queue.enqueue(note_write("second"));
        // 2100ms after the first enqueue; a re-armed timer would still be waiting
        tokio::time::sleep(Duration::from_millis(600)).await;

        let calls = write_calls(&gateway);
        assert_eq!(calls.len(), 1);
        match &calls[0] {
            RecordedCall::UpdateSession { update, .. } => {
                assert_eq!(update.notes.as_deref(), Some("second"));
            }
            other => panic!("unexpected call: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_retry_up_to_the_budget_then_drop() {
        let gateway = make_gateway();
        gateway.fail_always(GatewayError::Unavailable("offline".into()));
        let (queue, mut failures) =
            AutosaveQueue::spawn(Arc::clone(&gateway), AutosaveConfig::default());

        queue.enqueue(set_write(1, 10));
        tokio::time::sleep(Duration::from_secs(60)).await;

        // the initial attempt plus max_retries retries
        assert_eq!(write_calls(&gateway).len(), 4);

        let failure = failures.try_recv().expect("exactly one failure notification");
        assert_eq!(failure.attempts, 4);
        assert_eq!(failure.key.to_string(), "exercise-s1-ex1-1");
        assert!(failures.try_recv().is_err());
        assert_eq!(queue.pending_saves().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_failures_are_dropped_without_retry() {
        let gateway = make_gateway();
        gateway.fail_always(GatewayError::InvalidInput("negative reps".into()));
        let (queue, mut failures) =
            AutosaveQueue::spawn(Arc::clone(&gateway), AutosaveConfig::default());

        queue.enqueue(set_write(1, 10));
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(write_calls(&gateway).len(), 1);
        let failure = failures.try_recv().expect("one failure notification");
        assert_eq!(failure.attempts, 1);
        assert!(matches!(failure.error, GatewayError::InvalidInput(_)));
        assert_eq!(queue.pending_saves().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_when_a_retry_succeeds() {
        let gateway = make_gateway();
        gateway.script_failures(2, GatewayError::Unavailable("blip".into()));
        let (queue, mut failures) =
            AutosaveQueue::spawn(Arc::clone(&gateway), AutosaveConfig::default());

        queue.enqueue(set_write(1, 10));
        assert!(queue.last_save_time().await.is_none());
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(write_calls(&gateway).len(), 3);
        assert!(failures.try_recv().is_err());
        assert_eq!(queue.pending_saves().await, 0);
        assert!(queue.last_save_time().await.is_some());
        assert_eq!(gateway.details_for(&SessionId::from("s1")).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn a_replaced_write_starts_with_a_fresh_retry_budget() {
        let gateway = make_gateway();
        gateway.script_failures(2, GatewayError::Unavailable("blip".into()));
        let (queue, mut failures) =
            AutosaveQueue::spawn(Arc::clone(&gateway), AutosaveConfig::default());

        queue.enqueue(set_write(1, 8));
        tokio::time::sleep(Duration::from_millis(6100)).await;
        assert_eq!(write_calls(&gateway).len(), 2);

        // a replacement is a new write; the rounds its predecessor failed
        // do not count against it
        queue.enqueue(set_write(1, 10));
        gateway.script_failures(3, GatewayError::Unavailable("blip".into()));
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(write_calls(&gateway).len(), 6);
        assert!(failures.try_recv().is_err());
        assert_eq!(queue.pending_saves().await, 0);
        let details = gateway.details_for(&SessionId::from("s1"));
        assert_eq!(details[0].metrics.reps, Some(10));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_rounds_reschedule_with_doubled_delay() {
        let gateway = make_gateway();
        gateway.script_failures(1, GatewayError::Unavailable("blip".into()));
        let (queue, _failures) =
            AutosaveQueue::spawn(Arc::clone(&gateway), AutosaveConfig::default());

        queue.enqueue(set_write(1, 10));

        tokio::time::sleep(Duration::from_millis(2100)).await;
        assert_eq!(write_calls(&gateway).len(), 1);

        // the retry is due 4000ms after the failed round, not 2000ms
        tokio::time::sleep(Duration::from_millis(3800)).await;
        assert_eq!(write_calls(&gateway).len(), 1);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(write_calls(&gateway).len(), 2);
        assert_eq!(queue.pending_saves().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn flush_skips_the_debounce() {
        let gateway = make_gateway();
        let (queue, _failures) =
            AutosaveQueue::spawn(Arc::clone(&gateway), AutosaveConfig::default());

        queue.enqueue(set_write(1, 10));
        assert!(queue.flush().await);

        assert_eq!(write_calls(&gateway).len(), 1);
        assert_eq!(queue.pending_saves().await, 0);

        // nothing further fires once the queue is empty
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(write_calls(&gateway).len(), 1);
    }

    #[tokio::test]
    async fn flush_on_an_empty_queue_is_a_no_op() {
        let gateway = make_gateway();
        let (queue, _failures) =
            AutosaveQueue::spawn(Arc::clone(&gateway), AutosaveConfig::default());

        assert!(queue.flush().await);
        assert!(write_calls(&gateway).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn dirty_flush_reports_false_and_keeps_the_write() {
        let gateway = make_gateway();
        gateway.fail_always(GatewayError::Unavailable("offline".into()));
        let (queue, _failures) =
            AutosaveQueue::spawn(Arc::clone(&gateway), AutosaveConfig::default());

        queue.enqueue(set_write(1, 10));
        assert!(!queue.flush().await);
        assert_eq!(queue.pending_saves().await, 1);

        gateway.clear_failures();
        assert!(queue.flush().await);
        assert_eq!(write_calls(&gateway).len(), 2);
        assert_eq!(gateway.details_for(&SessionId::from("s1")).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn flush_reports_true_when_the_round_drops_a_write() {
        let gateway = make_gateway();
        gateway.fail_always(GatewayError::InvalidInput("negative reps".into()));
        let (queue, mut failures) =
            AutosaveQueue::spawn(Arc::clone(&gateway), AutosaveConfig::default());

        queue.enqueue(set_write(1, 10));
        // the write is dropped rather than retained, so the round still
        // ends with an empty queue
        assert!(queue.flush().await);

        let failure = failures.try_recv().expect("one failure notification");
        assert_eq!(failure.attempts, 1);
        assert!(matches!(failure.error, GatewayError::InvalidInput(_)));
        assert!(failures.try_recv().is_err());
        assert_eq!(write_calls(&gateway).len(), 1);
        assert_eq!(queue.pending_saves().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_handle_flushes_remaining_writes() {
        let gateway = make_gateway();
        let (queue, _failures) =
            AutosaveQueue::spawn(Arc::clone(&gateway), AutosaveConfig::default());

        queue.enqueue(set_write(1, 10));
        drop(queue);
        settle().await;

        assert_eq!(write_calls(&gateway).len(), 1);
    }
}
