mod controller;
mod session;
mod state;

pub use controller::{AdStatusController, ControllerDeps};
pub use session::Session;
pub use state::{AdStatus, DetectionResult, StatusKind, StatusSnapshot, StatusSource};
