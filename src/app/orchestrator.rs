use super::types::ShutdownReason;
use crate::config::FirewatchConfig;
use crate::control::{ControlCommand, KeyboardControl};
use crate::error::Result;
use crate::session::StreamController;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const COMMAND_QUEUE: usize = 16;

/// Main application coordinator: the stream controller plus its control surfaces
pub struct FirewatchApp {
    pub(super) config: FirewatchConfig,
    pub(super) controller: Arc<StreamController>,

    // Control surfaces
    pub(super) keyboard: Option<KeyboardControl>,
    pub(super) command_sender: mpsc::Sender<ControlCommand>,
    pub(super) command_receiver: Option<mpsc::Receiver<ControlCommand>>,

    // Lifecycle management
    pub(super) tasks: Vec<JoinHandle<()>>,
    pub(super) shutdown_sender: Option<oneshot::Sender<ShutdownReason>>,
    pub(super) shutdown_receiver: Option<oneshot::Receiver<ShutdownReason>>,
    pub(super) cancellation_token: CancellationToken,
}

impl FirewatchApp {
    /// Build the controller and its collaborators from configuration
    pub fn new(config: FirewatchConfig) -> Result<Self> {
        let controller = Arc::new(StreamController::builder(config.clone()).build()?);
        Ok(Self::with_controller(config, controller))
    }

    /// Wrap an already assembled controller
    pub fn with_controller(config: FirewatchConfig, controller: Arc<StreamController>) -> Self {
        let (command_sender, command_receiver) = mpsc::channel(COMMAND_QUEUE);
        let (shutdown_sender, shutdown_receiver) = oneshot::channel();

        Self {
            config,
            controller,
            keyboard: None,
            command_sender,
            command_receiver: Some(command_receiver),
            tasks: Vec::new(),
            shutdown_sender: Some(shutdown_sender),
            shutdown_receiver: Some(shutdown_receiver),
            cancellation_token: CancellationToken::new(),
        }
    }

    pub fn controller(&self) -> Arc<StreamController> {
        Arc::clone(&self.controller)
    }

    /// Queue for operator commands; the keyboard feeds the same queue
    pub fn command_sender(&self) -> mpsc::Sender<ControlCommand> {
        self.command_sender.clone()
    }
}
