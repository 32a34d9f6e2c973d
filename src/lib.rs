pub mod alert;
pub mod annotation;
pub mod app;
pub mod camera;
pub mod config;
pub mod control;
pub mod display;
pub mod encoder;
pub mod error;
pub mod events;
pub mod frame;
pub mod sampler;
pub mod session;
pub mod stats;
pub mod transport;

#[cfg(test)]
mod testing;

pub use alert::{AlertNotifier, CommandSynthesizer, SpeechHandle, SpeechSynthesizer};
pub use annotation::{
    AnnotationSnapshot, AnnotationStore, BoundingBox, Detection, DetectionCategory,
};
pub use app::{FirewatchApp, ShutdownReason};
pub use camera::{CameraBackend, CameraDevice, CameraSession, DeviceRegistry, SyntheticBackend};
pub use config::FirewatchConfig;
pub use control::{ControlCommand, KeyboardControl};
pub use display::{DisplaySurface, MemorySurface, Renderer};
pub use encoder::FrameEncoder;
pub use error::{
    CameraError, ChannelError, ConnectFailure, DisplayError, EncodeError, FirewatchError, Result,
    SessionError,
};
pub use events::{EventBus, FirewatchEvent};
pub use frame::{EncodedFrame, RawFrame};
pub use sampler::{FrameSampler, SampleDecision};
pub use session::{SessionState, SessionStatus, StreamController, StreamControllerBuilder};
pub use stats::{PerformanceStats, StatsTracker};
pub use transport::{ChannelState, TransportChannel};

#[cfg(feature = "control_api")]
pub use control::ControlServer;
