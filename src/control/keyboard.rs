use super::commands::ControlCommand;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{self, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Map a key press to an operator command
pub fn command_for_key(key: &KeyEvent) -> Option<ControlCommand> {
    if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
        // Raw mode swallows SIGINT
        return Some(ControlCommand::Quit {
            reason: "Ctrl+C".to_string(),
        });
    }

    match key.code {
        KeyCode::Char('s') => Some(ControlCommand::ToggleSession),
        KeyCode::Char(digit @ '1'..='5') => {
            digit.to_digit(10).map(ControlCommand::SetProcessingFps)
        }
        KeyCode::Char('n') => Some(ControlCommand::NextCamera),
        KeyCode::Char('a') => Some(ControlCommand::AutoCamera),
        KeyCode::Char('v') => Some(ControlCommand::ToggleVoice),
        KeyCode::Char('r') => Some(ControlCommand::RefreshCameras),
        KeyCode::Char('q') | KeyCode::Esc => Some(ControlCommand::Quit {
            reason: "User requested via keyboard".to_string(),
        }),
        _ => None,
    }
}

/// Reads single key presses from the terminal in raw mode
pub struct KeyboardControl {
    commands: mpsc::Sender<ControlCommand>,
    cancellation_token: CancellationToken,
}

impl KeyboardControl {
    pub fn new(commands: mpsc::Sender<ControlCommand>) -> Self {
        Self {
            commands,
            cancellation_token: CancellationToken::new(),
        }
    }

    pub fn start(&self) -> JoinHandle<()> {
        info!(
            "Keyboard control: [s] start/stop [1-5] processing fps [n] next camera \
             [a] auto camera [v] voice [r] refresh [q] quit"
        );

        let commands = self.commands.clone();
        let cancellation_token = self.cancellation_token.clone();

        task::spawn_blocking(move || {
            if let Err(e) = enable_raw_mode() {
                error!("Failed to enable raw mode for keyboard input: {}", e);
                return;
            }

            while !cancellation_token.is_cancelled() {
                match event::poll(Duration::from_millis(100)) {
                    Ok(true) => {
                        let Ok(Event::Key(key)) = event::read() else {
                            continue;
                        };
                        if key.kind != KeyEventKind::Press {
                            continue;
                        }
                        let Some(command) = command_for_key(&key) else {
                            debug!("Unbound key: {:?}", key.code);
                            continue;
                        };

                        let quitting = matches!(command, ControlCommand::Quit { .. });
                        if commands.blocking_send(command).is_err() || quitting {
                            break;
                        }
                    }
                    Ok(false) => {}
                    Err(e) => warn!("Error polling for keyboard events: {}", e),
                }
            }

            if let Err(e) = disable_raw_mode() {
                error!("Failed to disable raw mode: {}", e);
            }
            debug!("Keyboard control exited");
        })
    }

    pub fn stop(&self) {
        self.cancellation_token.cancel();
        // The reader may be parked in poll; restore the terminal regardless
        let _ = disable_raw_mode();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn press(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    #[test]
    fn test_key_bindings() {
        assert_eq!(
            command_for_key(&press(KeyCode::Char('s'))),
            Some(ControlCommand::ToggleSession)
        );
        assert_eq!(
            command_for_key(&press(KeyCode::Char('4'))),
            Some(ControlCommand::SetProcessingFps(4))
        );
        assert_eq!(
            command_for_key(&press(KeyCode::Char('n'))),
            Some(ControlCommand::NextCamera)
        );
        assert_eq!(
            command_for_key(&press(KeyCode::Char('a'))),
            Some(ControlCommand::AutoCamera)
        );
        assert!(matches!(
            command_for_key(&press(KeyCode::Esc)),
            Some(ControlCommand::Quit { .. })
        ));
    }

    #[test]
    fn test_out_of_range_digits_are_unbound() {
        assert_eq!(command_for_key(&press(KeyCode::Char('0'))), None);
        assert_eq!(command_for_key(&press(KeyCode::Char('6'))), None);
        assert_eq!(command_for_key(&press(KeyCode::Char('x'))), None);
    }

    #[test]
    fn test_ctrl_c_quits_in_raw_mode() {
        let key = KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL);
        assert!(matches!(
            command_for_key(&key),
            Some(ControlCommand::Quit { .. })
        ));
    }

    #[tokio::test]
    async fn test_stop_cancels_reader() {
        let (tx, _rx) = mpsc::channel(4);
        let keyboard = KeyboardControl::new(tx);
        keyboard.stop();
        assert!(keyboard.cancellation_token.is_cancelled());
    }
}
