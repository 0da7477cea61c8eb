use serde::{Deserialize, Serialize};

use super::{DetailId, ExerciseId, SessionId};

/// Optional measurements captured for one set. Every field is optional;
/// which ones are meaningful depends on the exercise (a run records
/// distance and duration, a lift records reps and weight).
///
/// The local `duration` field is the one whose remote name differs; the
/// gateway payload types carry it as `performing_time`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SetMetrics {
    pub reps: Option<u32>,
    pub weight: Option<f64>,
    pub distance: Option<f64>,
    /// Seconds spent performing the set.
    pub duration: Option<f64>,
    pub power: Option<f64>,
    pub resistance: Option<f64>,
    pub velocity: Option<f64>,
    pub tempo: Option<String>,
}

/// One set as recorded by the caller, before the backend has assigned the
/// detail an id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SetDraft {
    /// Position within `(session, exercise)`; the upsert key component.
    pub set_index: u32,
    pub metrics: SetMetrics,
    pub completed: bool,
}

impl SetDraft {
    pub fn new(set_index: u32) -> Self {
        Self {
            set_index,
            metrics: SetMetrics::default(),
            completed: false,
        }
    }

    pub fn with_reps(mut self, reps: u32) -> Self {
        self.metrics.reps = Some(reps);
        self
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.metrics.weight = Some(weight);
        self
    }

    pub fn with_distance(mut self, distance: f64) -> Self {
        self.metrics.distance = Some(distance);
        self
    }

    pub fn with_duration(mut self, seconds: f64) -> Self {
        self.metrics.duration = Some(seconds);
        self
    }

    pub fn with_power(mut self, power: f64) -> Self {
        self.metrics.power = Some(power);
        self
    }

    pub fn with_resistance(mut self, resistance: f64) -> Self {
        self.metrics.resistance = Some(resistance);
        self
    }

    pub fn with_velocity(mut self, velocity: f64) -> Self {
        self.metrics.velocity = Some(velocity);
        self
    }

    pub fn with_tempo(mut self, tempo: impl Into<String>) -> Self {
        self.metrics.tempo = Some(tempo.into());
        self
    }

    pub fn with_completed(mut self, completed: bool) -> Self {
        self.completed = completed;
        self
    }
}

/// One recorded set within a session. `id` is assigned by the backend
/// once the record is persisted; until then the detail lives only in the
/// controller's in-memory list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceDetail {
    pub id: Option<DetailId>,
    pub session_id: SessionId,
    pub exercise_id: ExerciseId,
    pub set_index: u32,
    #[serde(flatten)]
    pub metrics: SetMetrics,
    pub completed: bool,
}

impl PerformanceDetail {
    /// Merge a patch into this detail. `None` patch fields leave the
    /// current value untouched; fields cannot be cleared through a patch.
    pub fn apply(&mut self, patch: &DetailPatch) {
        if let Some(reps) = patch.reps {
            self.metrics.reps = Some(reps);
        }
        if let Some(weight) = patch.weight {
            self.metrics.weight = Some(weight);
        }
        if let Some(distance) = patch.distance {
            self.metrics.distance = Some(distance);
        }
        if let Some(duration) = patch.duration {
            self.metrics.duration = Some(duration);
        }
        if let Some(power) = patch.power {
            self.metrics.power = Some(power);
        }
        if let Some(resistance) = patch.resistance {
            self.metrics.resistance = Some(resistance);
        }
        if let Some(velocity) = patch.velocity {
            self.metrics.velocity = Some(velocity);
        }
        if let Some(tempo) = &patch.tempo {
            self.metrics.tempo = Some(tempo.clone());
        }
        if let Some(completed) = patch.completed {
            self.completed = completed;
        }
    }
}

/// Field-level update to an existing detail.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetailPatch {
    pub reps: Option<u32>,
    pub weight: Option<f64>,
    pub distance: Option<f64>,
    pub duration: Option<f64>,
    pub power: Option<f64>,
    pub resistance: Option<f64>,
    pub velocity: Option<f64>,
    pub tempo: Option<String>,
    pub completed: Option<bool>,
}

impl DetailPatch {
    pub fn with_reps(mut self, reps: u32) -> Self {
        self.reps = Some(reps);
        self
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = Some(weight);
        self
    }

    pub fn with_duration(mut self, seconds: f64) -> Self {
        self.duration = Some(seconds);
        self
    }

    pub fn with_tempo(mut self, tempo: impl Into<String>) -> Self {
        self.tempo = Some(tempo.into());
        self
    }

    pub fn with_completed(mut self, completed: bool) -> Self {
        self.completed = Some(completed);
        self
    }
}
