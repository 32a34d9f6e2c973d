use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct FirewatchConfig {
    pub camera: CameraConfig,
    pub sampler: SamplerConfig,
    pub encoder: EncoderConfig,
    pub transport: TransportConfig,
    pub display: DisplayConfig,
    pub stats: StatsConfig,
    pub alerts: AlertConfig,
    pub control: ControlConfig,
}

/// Which capture backend provides frames
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CameraBackendKind {
    /// V4L2 devices captured through GStreamer
    V4l2,
    /// Generated test pattern frames
    Synthetic,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CameraConfig {
    /// Capture backend
    #[serde(default = "default_camera_backend")]
    pub backend: CameraBackendKind,

    /// Preselected device id; auto-select when absent
    #[serde(default)]
    pub device_id: Option<String>,

    /// Ideal capture resolution (width, height)
    #[serde(default = "default_camera_resolution")]
    pub resolution: (u32, u32),

    /// Ideal capture frame rate
    #[serde(default = "default_camera_fps")]
    pub fps: u32,

    /// Constrained device: prefer the rear camera and lower encode quality
    #[serde(default)]
    pub mobile: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SamplerConfig {
    /// Rate of the fixed-period capture tick timer
    #[serde(default = "default_capture_timer_fps")]
    pub capture_timer_fps: u32,

    /// Target rate of frames sent for annotation (1..=5)
    #[serde(default = "default_processing_fps")]
    pub processing_fps: u32,

    /// Scheduling slack accepted by the time gate
    #[serde(default = "default_jitter_tolerance_ms")]
    pub jitter_tolerance_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EncoderConfig {
    /// JPEG quality on regular devices
    #[serde(default = "default_encoder_quality")]
    pub quality: u8,

    /// JPEG quality on constrained devices
    #[serde(default = "default_mobile_quality")]
    pub mobile_quality: u8,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct TransportConfig {
    /// Annotation service endpoint (ws:// or wss://)
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,

    #[serde(default = "default_close_timeout")]
    pub close_timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DisplayConfig {
    /// Framebuffer device path
    #[serde(default = "default_framebuffer_device")]
    pub framebuffer_device: String,

    /// Display resolution (width, height)
    #[serde(default = "default_display_resolution")]
    pub resolution: (u32, u32),

    /// Draw loop rate
    #[serde(default = "default_refresh_hz")]
    pub refresh_hz: u32,

    /// Render into memory only
    #[serde(default)]
    pub headless: bool,

    /// TrueType font used for labels and the status overlay
    #[serde(default = "default_font_path")]
    pub font_path: String,

    #[serde(default = "default_font_size")]
    pub font_size: f32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StatsConfig {
    /// Publish cadence of the rolling statistics
    #[serde(default = "default_stats_interval")]
    pub interval_ms: u64,

    /// Number of processing latencies kept for the rolling mean
    #[serde(default = "default_latency_window")]
    pub latency_window: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AlertConfig {
    #[serde(default = "default_voice_enabled")]
    pub voice_enabled: bool,

    /// Text-to-speech program; the alert text is appended as the last argument
    #[serde(default = "default_speech_command")]
    pub speech_command: String,

    #[serde(default)]
    pub speech_args: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ControlConfig {
    /// Serve the HTTP control API
    #[serde(default = "default_http_enabled")]
    pub http_enabled: bool,

    #[serde(default = "default_control_ip")]
    pub ip: String,

    #[serde(default = "default_control_port")]
    pub port: u16,

    /// Read control keys from the terminal
    #[serde(default)]
    pub keyboard: bool,
}

impl SamplerConfig {
    /// Period of the capture tick timer
    pub fn tick_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.capture_timer_fps.max(1) as f64)
    }

    pub fn jitter_tolerance(&self) -> Duration {
        Duration::from_millis(self.jitter_tolerance_ms)
    }
}

impl EncoderConfig {
    /// Quality hint for the current platform class
    pub fn quality_for(&self, mobile: bool) -> u8 {
        if mobile {
            self.mobile_quality
        } else {
            self.quality
        }
    }
}

impl FirewatchConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("firewatch.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            .set_default("camera.backend", "v4l2")?
            .set_default(
                "camera.resolution",
                vec![default_camera_resolution().0, default_camera_resolution().1],
            )?
            .set_default("camera.fps", default_camera_fps())?
            .set_default("camera.mobile", false)?
            .set_default("sampler.capture_timer_fps", default_capture_timer_fps())?
            .set_default("sampler.processing_fps", default_processing_fps())?
            .set_default("sampler.jitter_tolerance_ms", default_jitter_tolerance_ms())?
            .set_default("encoder.quality", default_encoder_quality() as i64)?
            .set_default("encoder.mobile_quality", default_mobile_quality() as i64)?
            .set_default("transport.endpoint", default_endpoint())?
            .set_default(
                "transport.connect_timeout_seconds",
                default_connect_timeout(),
            )?
            .set_default("transport.close_timeout_seconds", default_close_timeout())?
            .set_default("display.framebuffer_device", default_framebuffer_device())?
            .set_default(
                "display.resolution",
                vec![
                    default_display_resolution().0,
                    default_display_resolution().1,
                ],
            )?
            .set_default("display.refresh_hz", default_refresh_hz())?
            .set_default("display.headless", false)?
            .set_default("display.font_path", default_font_path())?
            .set_default("display.font_size", default_font_size() as f64)?
            .set_default("stats.interval_ms", default_stats_interval())?
            .set_default("stats.latency_window", default_latency_window() as i64)?
            .set_default("alerts.voice_enabled", default_voice_enabled())?
            .set_default("alerts.speech_command", default_speech_command())?
            .set_default("control.http_enabled", default_http_enabled())?
            .set_default("control.ip", default_control_ip())?
            .set_default("control.port", default_control_port())?
            .set_default("control.keyboard", false)?
            // Add configuration file (optional)
            .add_source(File::with_name(&path_str).required(false))
            // FIREWATCH_SAMPLER__PROCESSING_FPS=3 style overrides
            .add_source(Environment::with_prefix("FIREWATCH").separator("__"))
            .build()?;

        let config: FirewatchConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.camera.resolution.0 == 0 || self.camera.resolution.1 == 0 {
            return Err(ConfigError::Message(
                "Camera resolution must be greater than 0".to_string(),
            ));
        }

        if self.camera.fps == 0 {
            return Err(ConfigError::Message(
                "Camera fps must be greater than 0".to_string(),
            ));
        }

        if self.sampler.capture_timer_fps == 0 {
            return Err(ConfigError::Message(
                "Capture timer fps must be greater than 0".to_string(),
            ));
        }

        if !(1..=5).contains(&self.sampler.processing_fps) {
            return Err(ConfigError::Message(format!(
                "Processing fps must be between 1 and 5, got {}",
                self.sampler.processing_fps
            )));
        }

        if self.sampler.jitter_tolerance() >= self.sampler.tick_period() {
            return Err(ConfigError::Message(
                "Jitter tolerance must be shorter than one capture tick".to_string(),
            ));
        }

        for quality in [self.encoder.quality, self.encoder.mobile_quality] {
            if !(1..=100).contains(&quality) {
                return Err(ConfigError::Message(format!(
                    "Encoder quality must be between 1 and 100, got {}",
                    quality
                )));
            }
        }

        if self.transport.endpoint.trim().is_empty() {
            return Err(ConfigError::Message(
                "Transport endpoint must not be empty".to_string(),
            ));
        }

        if self.display.refresh_hz == 0 {
            return Err(ConfigError::Message(
                "Display refresh rate must be greater than 0".to_string(),
            ));
        }

        if self.stats.interval_ms == 0 || self.stats.latency_window == 0 {
            return Err(ConfigError::Message(
                "Stats interval and latency window must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for FirewatchConfig {
    fn default() -> Self {
        Self {
            camera: CameraConfig {
                backend: default_camera_backend(),
                device_id: None,
                resolution: default_camera_resolution(),
                fps: default_camera_fps(),
                mobile: false,
            },
            sampler: SamplerConfig {
                capture_timer_fps: default_capture_timer_fps(),
                processing_fps: default_processing_fps(),
                jitter_tolerance_ms: default_jitter_tolerance_ms(),
            },
            encoder: EncoderConfig {
                quality: default_encoder_quality(),
                mobile_quality: default_mobile_quality(),
            },
            transport: TransportConfig {
                endpoint: default_endpoint(),
                connect_timeout_seconds: default_connect_timeout(),
                close_timeout_seconds: default_close_timeout(),
            },
            display: DisplayConfig {
                framebuffer_device: default_framebuffer_device(),
                resolution: default_display_resolution(),
                refresh_hz: default_refresh_hz(),
                headless: false,
                font_path: default_font_path(),
                font_size: default_font_size(),
            },
            stats: StatsConfig {
                interval_ms: default_stats_interval(),
                latency_window: default_latency_window(),
            },
            alerts: AlertConfig {
                voice_enabled: default_voice_enabled(),
                speech_command: default_speech_command(),
                speech_args: Vec::new(),
            },
            control: ControlConfig {
                http_enabled: default_http_enabled(),
                ip: default_control_ip(),
                port: default_control_port(),
                keyboard: false,
            },
        }
    }
}

// Default value functions
fn default_camera_backend() -> CameraBackendKind {
    CameraBackendKind::V4l2
}
fn default_camera_resolution() -> (u32, u32) {
    (640, 480)
}
fn default_camera_fps() -> u32 {
    15
}

fn default_capture_timer_fps() -> u32 {
    30
}
fn default_processing_fps() -> u32 {
    2
}
fn default_jitter_tolerance_ms() -> u64 {
    5
}

fn default_encoder_quality() -> u8 {
    60
}
fn default_mobile_quality() -> u8 {
    40
}

fn default_endpoint() -> String {
    "wss://backend-fire-smoke.onrender.com/api/realtime/stream".to_string()
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_close_timeout() -> u64 {
    2
}

fn default_framebuffer_device() -> String {
    "/dev/fb0".to_string()
}
fn default_display_resolution() -> (u32, u32) {
    (800, 480)
}
fn default_refresh_hz() -> u32 {
    60
}
fn default_font_path() -> String {
    "/usr/share/fonts/truetype/dejavu/DejaVuSans-Bold.ttf".to_string()
}
fn default_font_size() -> f32 {
    14.0
}

fn default_stats_interval() -> u64 {
    1000
}
fn default_latency_window() -> usize {
    10
}

fn default_voice_enabled() -> bool {
    true
}
fn default_speech_command() -> String {
    "espeak-ng".to_string()
}

fn default_http_enabled() -> bool {
    true
}
fn default_control_ip() -> String {
    "127.0.0.1".to_string()
}
fn default_control_port() -> u16 {
    8080
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = FirewatchConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.sampler.capture_timer_fps, 30);
        assert_eq!(config.sampler.processing_fps, 2);
        assert_eq!(config.stats.latency_window, 10);
        assert_eq!(config.encoder.quality_for(true), 40);
        assert_eq!(config.encoder.quality_for(false), 60);
    }

    #[test]
    fn test_config_validation() {
        let mut config = FirewatchConfig::default();

        config.sampler.processing_fps = 6;
        assert!(config.validate().is_err());
        config.sampler.processing_fps = 0;
        assert!(config.validate().is_err());
        config.sampler.processing_fps = 5;
        assert!(config.validate().is_ok());

        config.camera.resolution = (0, 0);
        assert!(config.validate().is_err());
        config.camera.resolution = (640, 480);

        config.sampler.jitter_tolerance_ms = 40;
        assert!(config.validate().is_err());
        config.sampler.jitter_tolerance_ms = 5;

        config.encoder.quality = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        writeln!(
            file,
            r#"
[camera]
backend = "synthetic"
device_id = "/dev/video2"

[sampler]
processing_fps = 4

[transport]
endpoint = "ws://127.0.0.1:9000/stream"
"#
        )
        .unwrap();

        let config = FirewatchConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.camera.backend, CameraBackendKind::Synthetic);
        assert_eq!(config.camera.device_id.as_deref(), Some("/dev/video2"));
        assert_eq!(config.sampler.processing_fps, 4);
        assert_eq!(config.sampler.capture_timer_fps, 30);
        assert_eq!(config.transport.endpoint, "ws://127.0.0.1:9000/stream");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_config_serializes_to_toml() {
        let rendered = toml::to_string_pretty(&FirewatchConfig::default()).unwrap();
        assert!(rendered.contains("[sampler]"));
        assert!(rendered.contains("processing_fps = 2"));
    }
}
