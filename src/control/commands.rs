use crate::error::FirewatchError;
use crate::events::FirewatchEvent;
use crate::session::StreamController;
use std::time::SystemTime;
use tracing::{info, warn};

/// Operator actions shared by the keyboard and HTTP surfaces
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    /// Start when idle or failed, stop when running
    ToggleSession,
    SetProcessingFps(u32),
    NextCamera,
    /// Switch back to automatic camera selection
    AutoCamera,
    ToggleVoice,
    RefreshCameras,
    Quit { reason: String },
}

/// Run one command against the controller
pub async fn apply_command(
    controller: &StreamController,
    command: ControlCommand,
) -> Result<(), FirewatchError> {
    match command {
        ControlCommand::ToggleSession => {
            if controller.state().is_running() {
                controller.stop().await;
            } else {
                controller.start(None).await?;
            }
        }
        ControlCommand::SetProcessingFps(fps) => {
            controller.set_processing_fps(fps)?;
        }
        ControlCommand::NextCamera => {
            if controller.devices().is_empty() {
                controller.refresh_devices().await?;
            }
            match controller.next_device() {
                Some(device) => {
                    info!("Next camera: {} ({})", device.label, device.id);
                    controller.switch_device(Some(device.id)).await?;
                }
                None => warn!("No cameras to cycle through"),
            }
        }
        ControlCommand::AutoCamera => {
            controller.switch_device(None).await?;
        }
        ControlCommand::ToggleVoice => {
            controller.set_voice_enabled(!controller.voice_enabled());
        }
        ControlCommand::RefreshCameras => {
            let devices = controller.refresh_devices().await?;
            for device in &devices {
                info!("  {} - {}", device.id, device.label);
            }
        }
        ControlCommand::Quit { reason } => {
            controller
                .event_bus()
                .publish(FirewatchEvent::ShutdownRequested {
                    timestamp: SystemTime::now(),
                    reason,
                });
        }
    }
    Ok(())
}
