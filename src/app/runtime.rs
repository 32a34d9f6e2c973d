use super::{FirewatchApp, ShutdownReason};
use crate::error::{FirewatchError, Result};
use crate::events::FirewatchEvent;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::{broadcast, oneshot, Mutex};
use tracing::{error, info, warn};

type SharedShutdown = Arc<Mutex<Option<oneshot::Sender<ShutdownReason>>>>;

impl FirewatchApp {
    /// Run until a signal or a quit request, then tear everything down
    pub async fn run(&mut self) -> Result<i32> {
        info!("Firewatch is running");

        let shutdown_sender = self
            .shutdown_sender
            .take()
            .ok_or_else(|| FirewatchError::system("Shutdown sender already taken"))?;
        let shutdown_receiver = self
            .shutdown_receiver
            .take()
            .ok_or_else(|| FirewatchError::system("Shutdown receiver already taken"))?;

        let shutdown_sender = Arc::new(Mutex::new(Some(shutdown_sender)));
        self.setup_signal_handlers(Arc::clone(&shutdown_sender));
        self.watch_shutdown_requests(shutdown_sender);

        let shutdown_reason = shutdown_receiver
            .await
            .map_err(|_| FirewatchError::system("Shutdown channel closed unexpectedly"))?;

        info!("Shutdown initiated: {:?}", shutdown_reason);

        let exit_code = self.shutdown().await?;

        info!("Firewatch shutdown complete");
        Ok(exit_code)
    }

    fn setup_signal_handlers(&self, shutdown_sender: SharedShutdown) {
        // Handle SIGTERM (systemd stop) - Unix only
        #[cfg(unix)]
        {
            let shutdown_sender = Arc::clone(&shutdown_sender);
            tokio::spawn(async move {
                use tokio::signal::unix::{signal, SignalKind};

                let mut sigterm = match signal(SignalKind::terminate()) {
                    Ok(sigterm) => sigterm,
                    Err(e) => {
                        warn!("Failed to register SIGTERM handler: {}", e);
                        return;
                    }
                };
                if sigterm.recv().await.is_some() {
                    info!("Received SIGTERM signal");
                    send_shutdown(&shutdown_sender, ShutdownReason::Signal("SIGTERM".to_string()))
                        .await;
                }
            });
        }

        tokio::spawn(async move {
            if let Ok(()) = signal::ctrl_c().await {
                info!("Received SIGINT signal (Ctrl+C)");
                send_shutdown(&shutdown_sender, ShutdownReason::Signal("SIGINT".to_string())).await;
            }
        });
    }

    /// Report failures and alerts from the event bus; quit commands arrive as
    /// `ShutdownRequested`
    fn watch_shutdown_requests(&mut self, shutdown_sender: SharedShutdown) {
        let mut events = self.controller.event_bus().subscribe();
        let cancel = self.cancellation_token.clone();

        self.tasks.push(tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    event = events.recv() => event,
                };

                match event {
                    Ok(FirewatchEvent::ShutdownRequested { reason, .. }) => {
                        send_shutdown(&shutdown_sender, ShutdownReason::UserRequest(reason)).await;
                        break;
                    }
                    Ok(FirewatchEvent::CameraFailed { message })
                    | Ok(FirewatchEvent::ChannelFailed { message }) => error!("{}", message),
                    Ok(FirewatchEvent::AlertRaised { text, .. }) => warn!("ALERT: {}", text),
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Shutdown watcher skipped {} events", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }));
    }
}

async fn send_shutdown(sender: &SharedShutdown, reason: ShutdownReason) {
    if let Some(sender) = sender.lock().await.take() {
        let _ = sender.send(reason);
    }
}
