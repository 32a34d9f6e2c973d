mod commands;
#[cfg(feature = "control_api")]
mod handlers;
mod keyboard;
#[cfg(feature = "control_api")]
mod server;

pub use commands::{apply_command, ControlCommand};
pub use keyboard::{command_for_key, KeyboardControl};
#[cfg(feature = "control_api")]
pub use server::{router, ControlServer, ControlState};
