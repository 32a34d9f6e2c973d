use thiserror::Error;

#[derive(Error, Debug)]
pub enum FirewatchError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Camera error: {0}")]
    Camera(#[from] CameraError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Encode error: {0}")]
    Encode(#[from] EncodeError),

    #[error("Display error: {0}")]
    Display(#[from] DisplayError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("System error: {message}")]
    System { message: String },

    #[error("Component error in {component}: {message}")]
    Component { component: String, message: String },
}

impl FirewatchError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }

    pub fn component<S: Into<String>>(component: S, message: S) -> Self {
        Self::Component {
            component: component.into(),
            message: message.into(),
        }
    }

    /// Text suitable for showing to the operator
    pub fn user_message(&self) -> String {
        match self {
            FirewatchError::Camera(e) => e.user_message(),
            FirewatchError::Channel(e) => e.user_message(),
            other => other.to_string(),
        }
    }
}

/// Camera acquisition and enumeration failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CameraError {
    #[error("Camera access denied for {device}")]
    PermissionDenied { device: String },

    #[error("No camera device found")]
    NoCameraFound,

    #[error("Device enumeration failed: {details}")]
    DeviceEnumerationFailed { details: String },

    #[error("Failed to open camera {device}: {details}")]
    DeviceOpen { device: String, details: String },

    #[error("Capture stream error: {details}")]
    CaptureStream { details: String },
}

impl CameraError {
    pub fn user_message(&self) -> String {
        match self {
            CameraError::PermissionDenied { .. } => {
                "Camera permission was denied. Please allow camera access.".to_string()
            }
            CameraError::NoCameraFound => "No camera found on this device.".to_string(),
            CameraError::DeviceEnumerationFailed { .. } => {
                "Please allow camera access to continue".to_string()
            }
            other => format!("Failed to start camera: {}", other),
        }
    }

    pub(crate) fn from_io(device: &str, err: &std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::PermissionDenied => CameraError::PermissionDenied {
                device: device.to_string(),
            },
            std::io::ErrorKind::NotFound => CameraError::NoCameraFound,
            _ => CameraError::DeviceOpen {
                device: device.to_string(),
                details: err.to_string(),
            },
        }
    }
}

/// Why a connection attempt to the annotation service did not reach Open
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectFailure {
    Refused,
    TimedOut,
    InvalidEndpoint(String),
    Handshake(String),
    Tls(String),
    Io(String),
}

impl std::fmt::Display for ConnectFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectFailure::Refused => write!(f, "connection refused"),
            ConnectFailure::TimedOut => write!(f, "connection timed out"),
            ConnectFailure::InvalidEndpoint(details) => write!(f, "invalid endpoint: {}", details),
            ConnectFailure::Handshake(details) => write!(f, "handshake rejected: {}", details),
            ConnectFailure::Tls(details) => write!(f, "tls failure: {}", details),
            ConnectFailure::Io(details) => write!(f, "io failure: {}", details),
        }
    }
}

/// Transport channel failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("Failed to connect to {endpoint}: {reason}")]
    ConnectFailed {
        endpoint: String,
        reason: ConnectFailure,
    },

    #[error("Malformed message from annotation service: {details}")]
    ProtocolError { details: String },

    #[error("Connection to annotation service lost: {details}")]
    ConnectionLost { details: String },

    #[error("Annotation service closed the connection")]
    ClosedByPeer,

    #[error("Invalid channel transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },
}

impl ChannelError {
    pub fn user_message(&self) -> String {
        "Connection error. Make sure backend server is running.".to_string()
    }
}

/// A single frame could not be encoded; the frame is dropped
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error("Unreadable source surface: {details}")]
    UnreadableSource { details: String },

    #[error("JPEG encoding failed: {details}")]
    Jpeg { details: String },
}

#[derive(Error, Debug)]
pub enum DisplayError {
    #[error("Framebuffer error: {details}")]
    Framebuffer { details: String },

    #[error("Failed to load font '{path}': {details}")]
    FontLoad { path: String, details: String },

    #[error("Format conversion error: {details}")]
    FormatConversion { details: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Processing fps {fps} is outside the supported range 1..=5")]
    InvalidProcessingFps { fps: u32 },

    #[error("Session task failed: {details}")]
    TaskFailed { details: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventBusError {
    #[error("Receiver lagged behind by {skipped} events")]
    Lagged { skipped: u64 },

    #[error("Event bus channel closed")]
    ChannelClosed,
}

pub type Result<T> = std::result::Result<T, FirewatchError>;
