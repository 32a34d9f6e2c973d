use crate::camera::CameraDevice;
use crate::transport::ChannelState;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Lifecycle of the stream session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Starting,
    Live,
    Stopping,
    /// Camera or channel failure; the overlay stays up until stop or restart
    Failed,
}

impl SessionState {
    /// Whether start/stop should treat the session as running
    pub fn is_running(&self) -> bool {
        matches!(self, SessionState::Starting | SessionState::Live)
    }
}

/// Point-in-time view of the controller for status surfaces
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub state: SessionState,
    pub session_id: Option<Uuid>,
    pub device: Option<CameraDevice>,
    /// Explicit selection; `None` means auto-select
    pub selected_device: Option<String>,
    pub channel_state: Option<ChannelState>,
    pub processing_fps: u32,
    pub skip_interval: u32,
    pub capture_timer_fps: u32,
    pub voice_enabled: bool,
    pub last_error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
}
