mod builder;
mod controller;
mod tasks;
mod types;

pub use builder::StreamControllerBuilder;
pub use controller::{StreamController, MAX_PROCESSING_FPS, MIN_PROCESSING_FPS};
pub use types::{SessionState, SessionStatus};
