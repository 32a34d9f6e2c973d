use super::controller::StreamController;
use crate::alert::{AlertNotifier, CommandSynthesizer, SpeechSynthesizer};
use crate::camera::{create_backend, CameraBackend, DeviceRegistry};
use crate::config::FirewatchConfig;
use crate::display::{load_font_or_warn, DisplaySurface, OverlayFont};
use crate::error::FirewatchError;
use crate::events::EventBus;
use std::sync::Arc;

/// Assembles a [`StreamController`]; every collaborator defaults from config
pub struct StreamControllerBuilder {
    config: FirewatchConfig,
    backend: Option<Arc<dyn CameraBackend>>,
    synthesizer: Option<Arc<dyn SpeechSynthesizer>>,
    surface: Option<Box<dyn DisplaySurface>>,
    font: Option<Arc<OverlayFont>>,
    event_bus: Option<EventBus>,
}

impl StreamControllerBuilder {
    pub fn new(config: FirewatchConfig) -> Self {
        Self {
            config,
            backend: None,
            synthesizer: None,
            surface: None,
            font: None,
            event_bus: None,
        }
    }

    pub fn backend(mut self, backend: Arc<dyn CameraBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn synthesizer(mut self, synthesizer: Arc<dyn SpeechSynthesizer>) -> Self {
        self.synthesizer = Some(synthesizer);
        self
    }

    /// Render here instead of opening the configured display
    pub fn surface(mut self, surface: Box<dyn DisplaySurface>) -> Self {
        self.surface = Some(surface);
        self
    }

    pub fn font(mut self, font: Arc<OverlayFont>) -> Self {
        self.font = Some(font);
        self
    }

    pub fn event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn build(self) -> Result<StreamController, FirewatchError> {
        let config = self.config;

        let backend = match self.backend {
            Some(backend) => backend,
            None => create_backend(&config.camera)?,
        };
        let synthesizer = self
            .synthesizer
            .unwrap_or_else(|| Arc::new(CommandSynthesizer::from_config(&config.alerts)));
        let notifier = Arc::new(AlertNotifier::new(synthesizer, config.alerts.voice_enabled));
        let font = self.font.or_else(|| {
            load_font_or_warn(&config.display.font_path, config.display.font_size).map(Arc::new)
        });

        Ok(StreamController::new(
            config,
            DeviceRegistry::new(backend),
            notifier,
            self.event_bus.unwrap_or_default(),
            self.surface,
            font,
        ))
    }
}
