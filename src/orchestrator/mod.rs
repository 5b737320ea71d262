pub mod engine;
pub mod state;

pub use engine::{Collaborators, ControlSurface, CycleOrchestrator, INCIDENT_PAUSE_MESSAGE};
pub use state::{CycleState, RunSettings, RunState, StatusSnapshot};
