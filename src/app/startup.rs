use super::FirewatchApp;
use crate::control::{apply_command, KeyboardControl};
use crate::error::Result;
use std::sync::Arc;
use tracing::{error, info, warn};

impl FirewatchApp {
    /// Start the control surfaces and, when `autostart` is set, the stream session.
    /// A failed session start is reported but does not stop the application.
    pub async fn start(&mut self, autostart: bool) -> Result<()> {
        info!("Starting Firewatch");

        match self.controller.refresh_devices().await {
            Ok(devices) => {
                for device in &devices {
                    info!("Camera available: {} ({})", device.label, device.id);
                }
            }
            Err(e) => warn!("{}", e.user_message()),
        }

        self.spawn_command_dispatcher();

        if self.config.control.keyboard {
            let keyboard = KeyboardControl::new(self.command_sender.clone());
            self.tasks.push(keyboard.start());
            self.keyboard = Some(keyboard);
        }

        #[cfg(feature = "control_api")]
        if self.config.control.http_enabled {
            let server = crate::control::ControlServer::new(
                self.config.control.clone(),
                Arc::clone(&self.controller),
            );
            let cancel = self.cancellation_token.clone();
            self.tasks.push(tokio::spawn(async move {
                if let Err(e) = server.serve(cancel).await {
                    error!("Control API error: {}", e);
                }
            }));
        }

        if autostart {
            if let Err(e) = self.controller.start(None).await {
                error!("{}", e.user_message());
            }
        } else {
            info!("Autostart disabled; waiting for a start command");
        }

        Ok(())
    }

    fn spawn_command_dispatcher(&mut self) {
        let Some(mut commands) = self.command_receiver.take() else {
            return;
        };
        let controller = Arc::clone(&self.controller);
        let cancel = self.cancellation_token.clone();

        self.tasks.push(tokio::spawn(async move {
            loop {
                let command = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    command = commands.recv() => match command {
                        Some(command) => command,
                        None => break,
                    },
                };

                info!("Control command: {:?}", command);
                if let Err(e) = apply_command(&controller, command).await {
                    warn!("{}", e.user_message());
                }
            }
        }));
    }
}
