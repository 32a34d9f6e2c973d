use super::FirewatchApp;
use crate::error::Result;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{error, info, warn};

const STOP_TIMEOUT: Duration = Duration::from_secs(10);

impl FirewatchApp {
    /// Stop the control surfaces, then release the session
    pub async fn shutdown(&mut self) -> Result<i32> {
        info!("Beginning graceful shutdown");

        let mut exit_code = 0;

        if let Some(keyboard) = self.keyboard.take() {
            keyboard.stop();
        }

        // Control API and background watchers
        self.cancellation_token.cancel();

        match timeout(STOP_TIMEOUT, self.controller.stop()).await {
            Ok(status) => info!("Session {:?}", status.state),
            Err(_) => {
                error!("Timed out stopping the stream session");
                exit_code = 1;
            }
        }

        for task in self.tasks.drain(..) {
            match timeout(STOP_TIMEOUT, task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Background task ended abnormally: {}", e),
                Err(_) => {
                    error!("Timed out waiting for a background task");
                    exit_code = 1;
                }
            }
        }

        info!("Graceful shutdown completed with exit code: {}", exit_code);
        Ok(exit_code)
    }
}
