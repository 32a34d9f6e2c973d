use crate::config::AlertConfig;
use parking_lot::Mutex;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// Platform text-to-speech
pub trait SpeechSynthesizer: Send + Sync {
    /// Start speaking `text`. `None` when speech is unavailable on this platform.
    fn speak(&self, text: &str) -> Option<Box<dyn SpeechHandle>>;
}

/// An utterance in progress
pub trait SpeechHandle: Send {
    fn cancel(&mut self);
    fn is_active(&mut self) -> bool;
}

/// Speaks through an external program such as `espeak-ng`
pub struct CommandSynthesizer {
    program: String,
    args: Vec<String>,
    unavailable: AtomicBool,
}

impl CommandSynthesizer {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            unavailable: AtomicBool::new(false),
        }
    }

    pub fn from_config(config: &AlertConfig) -> Self {
        Self::new(config.speech_command.clone(), config.speech_args.clone())
    }
}

impl SpeechSynthesizer for CommandSynthesizer {
    fn speak(&self, text: &str) -> Option<Box<dyn SpeechHandle>> {
        if self.unavailable.load(Ordering::Relaxed) {
            return None;
        }

        let spawned = Command::new(&self.program)
            .args(&self.args)
            .arg(text)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn();

        match spawned {
            Ok(child) => Some(Box::new(ProcessSpeech { child })),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Missing synthesizer is not an error; stay quiet from now on
                if !self.unavailable.swap(true, Ordering::Relaxed) {
                    info!("Speech program '{}' not found; voice alerts are silent", self.program);
                }
                None
            }
            Err(e) => {
                warn!("Failed to start '{}': {}", self.program, e);
                None
            }
        }
    }
}

struct ProcessSpeech {
    child: Child,
}

impl SpeechHandle for ProcessSpeech {
    fn cancel(&mut self) {
        if let Err(e) = self.child.start_kill() {
            debug!("Speech process already gone: {}", e);
        }
    }

    fn is_active(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }
}

/// Speaks annotation alerts, newest first, one at a time
pub struct AlertNotifier {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    enabled: AtomicBool,
    current: Mutex<Option<Box<dyn SpeechHandle>>>,
}

impl AlertNotifier {
    pub fn new(synthesizer: Arc<dyn SpeechSynthesizer>, enabled: bool) -> Self {
        Self {
            synthesizer,
            enabled: AtomicBool::new(enabled),
            current: Mutex::new(None),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Turning voice off silences whatever is being spoken
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
        if !enabled {
            self.cancel_all();
        }
        info!("Voice alerts {}", if enabled { "enabled" } else { "disabled" });
    }

    /// Interrupt the active alert and speak `text` instead.
    /// Returns whether anything is now being spoken.
    pub fn notify(&self, text: &str) -> bool {
        let text = text.trim();
        if text.is_empty() || !self.is_enabled() {
            return false;
        }

        let mut current = self.current.lock();
        if let Some(mut previous) = current.take() {
            previous.cancel();
        }

        *current = self.synthesizer.speak(text);
        if current.is_some() {
            debug!("Speaking alert: {}", text);
        }
        current.is_some()
    }

    pub fn cancel_all(&self) {
        if let Some(mut active) = self.current.lock().take() {
            active.cancel();
        }
    }

    pub fn is_speaking(&self) -> bool {
        self.current
            .lock()
            .as_mut()
            .map(|handle| handle.is_active())
            .unwrap_or(false)
    }
}
