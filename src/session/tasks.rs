use super::types::SessionState;
use crate::alert::AlertNotifier;
use crate::annotation::AnnotationStore;
use crate::camera::FrameReader;
use crate::config::{EncoderConfig, SamplerConfig};
use crate::encoder::FrameEncoder;
use crate::events::{EventBus, FirewatchEvent};
use crate::sampler::FrameSampler;
use crate::stats::StatsTracker;
use crate::transport::{ChannelEvent, ChannelSender, IncomingMessage, SendOutcome};
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

/// State shared between the controller and the session loops
pub(crate) struct SessionShared {
    pub state: watch::Sender<SessionState>,
    pub last_error: Mutex<Option<String>>,
    pub store: AnnotationStore,
    pub stats: Arc<StatsTracker>,
    pub notifier: Arc<AlertNotifier>,
    pub event_bus: EventBus,
    pub processing_fps: watch::Sender<u32>,
}

impl SessionShared {
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn set_state(&self, to: SessionState) {
        let mut from = to;
        let changed = self.state.send_if_modified(|current| {
            from = *current;
            if *current == to {
                return false;
            }
            *current = to;
            true
        });

        if changed {
            info!("Session {:?} -> {:?}", from, to);
            self.event_bus.publish(FirewatchEvent::SessionStateChanged {
                from,
                to,
                timestamp: SystemTime::now(),
            });
        }
    }

    /// Move a live session to Failed; returns false when it was not live
    pub fn fail_live(&self, message: String) -> bool {
        let failed = self.state.send_if_modified(|current| {
            if *current != SessionState::Live {
                return false;
            }
            *current = SessionState::Failed;
            true
        });

        if failed {
            warn!("Session Live -> Failed: {}", message);
            *self.last_error.lock() = Some(message.clone());
            self.event_bus.publish(FirewatchEvent::SessionStateChanged {
                from: SessionState::Live,
                to: SessionState::Failed,
                timestamp: SystemTime::now(),
            });
            self.event_bus.publish(FirewatchEvent::ChannelFailed { message });
        }
        failed
    }

    pub fn set_error(&self, message: Option<String>) {
        *self.last_error.lock() = message;
    }
}

/// Everything the send loop needs for one session
pub(crate) struct SendLoop {
    pub session_id: Uuid,
    pub frames: FrameReader,
    pub sender: ChannelSender,
    pub sampler: SamplerConfig,
    pub encoder: EncoderConfig,
    pub mobile: bool,
}

/// Fixed-period capture ticks through the two-stage throttle into the channel
pub(crate) fn spawn_send_loop(
    job: SendLoop,
    shared: Arc<SessionShared>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let SendLoop {
            session_id,
            frames,
            sender,
            sampler: sampler_config,
            encoder,
            mobile,
        } = job;

        let mut processing_fps = shared.processing_fps.subscribe();
        let mut sampler = FrameSampler::new(
            sampler_config.capture_timer_fps,
            *processing_fps.borrow_and_update(),
        )
        .with_jitter_tolerance(sampler_config.jitter_tolerance());
        let encoder = FrameEncoder::for_platform(&encoder, mobile);

        let mut ticker = tokio::time::interval(sampler_config.tick_period());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            "[{}] Send loop started: {} Hz ticks, {} fps processing, skip interval {}",
            session_id,
            sampler.capture_timer_fps(),
            sampler.processing_fps(),
            sampler.skip_interval()
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                changed = processing_fps.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    sampler.set_processing_fps(*processing_fps.borrow_and_update());
                }
                _ = ticker.tick() => {
                    let now = Instant::now();
                    if !sampler.on_tick(now).should_send() {
                        continue;
                    }
                    if shared.state() != SessionState::Live {
                        trace!("[{}] Not live; send skipped", session_id);
                        continue;
                    }
                    let Some(frame) = frames.latest() else {
                        continue;
                    };

                    let frame_id = frame.id;
                    let encoded = tokio::task::spawn_blocking(move || encoder.encode(&frame)).await;
                    let encoded = match encoded {
                        Ok(Ok(encoded)) => encoded,
                        Ok(Err(e)) => {
                            warn!("[{}] Frame {} dropped: {}", session_id, frame_id, e);
                            shared.stats.record_dropped();
                            continue;
                        }
                        Err(e) => {
                            warn!("[{}] Encode task failed: {}", session_id, e);
                            continue;
                        }
                    };

                    match sender.send(&encoded) {
                        SendOutcome::Sent => {
                            sampler.record_sent(now);
                            shared.stats.record_sent();
                        }
                        SendOutcome::Dropped(reason) => {
                            debug!("[{}] Frame {} not sent: {:?}", session_id, frame_id, reason);
                            shared.stats.record_dropped();
                        }
                    }
                }
            }
        }

        debug!("[{}] Send loop stopped", session_id);
    })
}

/// Apply channel events to the annotation store, stats, alerts and session state
pub(crate) fn spawn_receive_loop(
    session_id: Uuid,
    mut events: mpsc::Receiver<ChannelEvent>,
    shared: Arc<SessionShared>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                event = events.recv() => event,
            };

            match event {
                Some(ChannelEvent::Ready) => debug!("[{}] Channel ready", session_id),
                Some(ChannelEvent::Message(IncomingMessage::Ack)) => {
                    shared.stats.record_acknowledged();
                }
                Some(ChannelEvent::Message(IncomingMessage::Annotation(result))) => {
                    shared.stats.record_annotation(result.processing_time_ms);

                    let snapshot = result.to_snapshot(Utc::now());
                    trace!(
                        "[{}] Annotation with {} detection(s)",
                        session_id,
                        snapshot.detection_count()
                    );
                    let alert = snapshot.alert_text.clone().filter(|t| !t.trim().is_empty());
                    if let Some(text) = alert {
                        shared.event_bus.publish(FirewatchEvent::AlertRaised {
                            text,
                            fire: snapshot.fire_detected,
                            smoke: snapshot.smoke_detected,
                        });
                    }
                    shared.store.replace(snapshot);

                    if let Some(spoken) = result.spoken_alert() {
                        shared.notifier.notify(spoken);
                    }
                }
                Some(ChannelEvent::ProtocolError(e)) => {
                    // Malformed message: skip it and stay live
                    debug!("[{}] Skipped message: {}", session_id, e);
                }
                Some(ChannelEvent::Error(e)) => {
                    shared.fail_live(e.user_message());
                }
                Some(ChannelEvent::Closed) | None => {
                    shared.fail_live(crate::error::ChannelError::ClosedByPeer.user_message());
                    break;
                }
            }
        }

        debug!("[{}] Receive loop stopped", session_id);
    })
}
