//! Auto-save engine for workout session tracking.
//!
//! The engine sits between a presentation layer and a remote persistence
//! backend. Writes are coalesced per logical target and flushed after an
//! idle delay, transient gateway failures are retried with backoff, and a
//! typed state machine drives the session lifecycle
//! (`assigned -> ongoing -> completed`).
//!
//! The main entry points are [`SessionController`] for the session
//! lifecycle, [`WorkoutApi`] for individual writes, and [`SessionGateway`]
//! as the port a real backend implements. [`InMemoryGateway`] is a
//! complete reference backend used by the demo binary and the tests.

pub mod adapters;
pub mod domain;

pub use adapters::outbound::{InMemoryGateway, RecordedCall};
pub use domain::error::{GatewayError, SessionError};
pub use domain::models::*;
pub use domain::ports::outbound::{SessionGateway, SetRecordPatch, SetRecordPayload};
pub use domain::services::{
    AutosaveConfig, AutosaveQueue, QueuedWrite, SaveFailure, SaveKey, SessionController,
    WorkoutApi, WriteMode,
};
