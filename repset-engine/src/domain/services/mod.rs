mod autosave;
mod session_controller;
mod workout_api;

pub use autosave::*;
pub use session_controller::*;
pub use workout_api::*;
