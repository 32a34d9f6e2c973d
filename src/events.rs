use crate::error::EventBusError;
use crate::session::SessionState;
use serde::Serialize;
use std::time::SystemTime;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Events that can occur while streaming to the annotation service
#[derive(Debug, Clone, Serialize)]
pub enum FirewatchEvent {
    /// The stream session moved between lifecycle states
    SessionStateChanged {
        from: SessionState,
        to: SessionState,
        timestamp: SystemTime,
    },
    /// Camera acquisition failed; terminal for the start attempt
    CameraFailed { message: String },
    /// The annotation channel failed to connect or dropped while live
    ChannelFailed { message: String },
    /// The annotation service raised an alert
    AlertRaised {
        text: String,
        fire: bool,
        smoke: bool,
    },
    /// Camera enumeration completed
    DevicesRefreshed { count: usize },
    /// Processing rate changed while running
    ProcessingFpsChanged { fps: u32, skip_interval: u32 },
    /// System shutdown requested
    ShutdownRequested {
        timestamp: SystemTime,
        reason: String,
    },
}

impl FirewatchEvent {
    /// Get a human-readable description of the event
    pub fn description(&self) -> String {
        match self {
            FirewatchEvent::SessionStateChanged { from, to, .. } => {
                format!("Session {:?} -> {:?}", from, to)
            }
            FirewatchEvent::CameraFailed { message } => format!("Camera failure: {}", message),
            FirewatchEvent::ChannelFailed { message } => {
                format!("Channel failure: {}", message)
            }
            FirewatchEvent::AlertRaised { text, .. } => format!("Alert: {}", text),
            FirewatchEvent::DevicesRefreshed { count } => {
                format!("{} camera(s) available", count)
            }
            FirewatchEvent::ProcessingFpsChanged { fps, skip_interval } => {
                format!("Processing {} fps (skip interval {})", fps, skip_interval)
            }
            FirewatchEvent::ShutdownRequested { reason, .. } => {
                format!("Shutdown requested: {}", reason)
            }
        }
    }

    /// Get the event type as a string for filtering
    pub fn event_type(&self) -> &'static str {
        match self {
            FirewatchEvent::SessionStateChanged { .. } => "session_state_changed",
            FirewatchEvent::CameraFailed { .. } => "camera_failed",
            FirewatchEvent::ChannelFailed { .. } => "channel_failed",
            FirewatchEvent::AlertRaised { .. } => "alert_raised",
            FirewatchEvent::DevicesRefreshed { .. } => "devices_refreshed",
            FirewatchEvent::ProcessingFpsChanged { .. } => "processing_fps_changed",
            FirewatchEvent::ShutdownRequested { .. } => "shutdown_requested",
        }
    }
}

/// Event bus for component coordination using broadcast channels
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<FirewatchEvent>,
}

impl EventBus {
    /// Create a new event bus with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe to events and get a receiver
    pub fn subscribe(&self) -> broadcast::Receiver<FirewatchEvent> {
        self.sender.subscribe()
    }

    /// Publish an event to all subscribers, returning how many received it
    pub fn publish(&self, event: FirewatchEvent) -> usize {
        match &event {
            FirewatchEvent::CameraFailed { message } => {
                error!("Camera failure: {}", message);
            }
            FirewatchEvent::ChannelFailed { message } => {
                warn!("Channel failure: {}", message);
            }
            FirewatchEvent::AlertRaised { text, .. } => {
                warn!("Annotation alert: {}", text);
            }
            FirewatchEvent::ShutdownRequested { reason, .. } => {
                info!("Shutdown requested: {}", reason);
            }
            _ => {
                debug!("Event: {}", event.description());
            }
        }

        // No subscribers is not an error for fire-and-forget notifications
        self.sender.send(event).unwrap_or(0)
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(100)
    }
}

/// Event receiver that only yields events of the requested types
pub struct EventReceiver {
    receiver: broadcast::Receiver<FirewatchEvent>,
    event_types: Vec<&'static str>,
    name: String,
}

impl EventReceiver {
    /// Empty `event_types` accepts every event
    pub fn new(
        receiver: broadcast::Receiver<FirewatchEvent>,
        event_types: Vec<&'static str>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            receiver,
            event_types,
            name: name.into(),
        }
    }

    fn matches(&self, event: &FirewatchEvent) -> bool {
        self.event_types.is_empty() || self.event_types.contains(&event.event_type())
    }

    /// Receive the next matching event
    pub async fn recv(&mut self) -> Result<FirewatchEvent, EventBusError> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if self.matches(&event) {
                        debug!(
                            "Receiver '{}' received event: {}",
                            self.name,
                            event.description()
                        );
                        return Ok(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Receiver '{}' lagged behind by {} events", self.name, n);
                    return Err(EventBusError::Lagged { skipped: n });
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed for receiver '{}'", self.name);
                    return Err(EventBusError::ChannelClosed);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let bus = EventBus::new(8);
        let delivered = bus.publish(FirewatchEvent::DevicesRefreshed { count: 2 });
        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn test_filtered_receiver() {
        let bus = EventBus::new(8);
        let mut receiver = EventReceiver::new(bus.subscribe(), vec!["channel_failed"], "test");

        bus.publish(FirewatchEvent::DevicesRefreshed { count: 1 });
        bus.publish(FirewatchEvent::ChannelFailed {
            message: "Connection error".to_string(),
        });

        let event = timeout(Duration::from_secs(1), receiver.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.event_type(), "channel_failed");
    }
}
