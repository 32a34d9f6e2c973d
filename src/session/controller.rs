use super::tasks::{spawn_receive_loop, spawn_send_loop, SendLoop, SessionShared};
use super::types::{SessionState, SessionStatus};
use crate::alert::AlertNotifier;
use crate::annotation::{AnnotationSnapshot, AnnotationStore};
use crate::camera::{CameraDevice, CameraSession, DeviceRegistry};
use crate::config::FirewatchConfig;
use crate::display::{
    create_surface, spawn_render_loop, DisplaySurface, MemorySurface, OverlayFont, Renderer,
};
use crate::error::{CameraError, FirewatchError, SessionError};
use crate::events::{EventBus, FirewatchEvent};
use crate::sampler::skip_interval_for;
use crate::stats::{spawn_stats_loop, PerformanceStats, StatsTracker};
use crate::transport::{ChannelState, TransportChannel};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub const MIN_PROCESSING_FPS: u32 = 1;
pub const MAX_PROCESSING_FPS: u32 = 5;

/// Resources owned by one running session, torn down exactly once
struct StreamSession {
    id: Uuid,
    camera: CameraSession,
    channel: TransportChannel,
    cancel: CancellationToken,
    render_task: Option<JoinHandle<Renderer>>,
    tasks: Vec<JoinHandle<()>>,
}

/// Summary of the active session for status reads that must not wait on start/stop
struct ActiveInfo {
    id: Uuid,
    device: CameraDevice,
    channel_state: watch::Receiver<ChannelState>,
    started_at: DateTime<Utc>,
}

/// Owns at most one stream session; start, stop and switch are serialised
pub struct StreamController {
    config: FirewatchConfig,
    registry: DeviceRegistry,
    shared: Arc<SessionShared>,
    font: Option<Arc<OverlayFont>>,
    surface: Mutex<Option<Box<dyn DisplaySurface>>>,
    selected_device: Mutex<Option<String>>,
    active: Mutex<Option<ActiveInfo>>,
    session: AsyncMutex<Option<StreamSession>>,
}

impl StreamController {
    pub(super) fn new(
        config: FirewatchConfig,
        registry: DeviceRegistry,
        notifier: Arc<AlertNotifier>,
        event_bus: EventBus,
        surface: Option<Box<dyn DisplaySurface>>,
        font: Option<Arc<OverlayFont>>,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        let (processing_fps, _) = watch::channel(config.sampler.processing_fps);
        let stats = Arc::new(StatsTracker::new(config.stats.latency_window));
        let selected_device = config.camera.device_id.clone();

        Self {
            shared: Arc::new(SessionShared {
                state,
                last_error: Mutex::new(None),
                store: AnnotationStore::new(),
                stats,
                notifier,
                event_bus,
                processing_fps,
            }),
            config,
            registry,
            font,
            surface: Mutex::new(surface),
            selected_device: Mutex::new(selected_device),
            active: Mutex::new(None),
            session: AsyncMutex::new(None),
        }
    }

    pub fn builder(config: FirewatchConfig) -> super::StreamControllerBuilder {
        super::StreamControllerBuilder::new(config)
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.shared.state.subscribe()
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.shared.event_bus
    }

    /// Start streaming. `device_id` overrides the current selection.
    /// A running session is left alone; a failed one is torn down first.
    pub async fn start(&self, device_id: Option<String>) -> Result<SessionStatus, FirewatchError> {
        if let Some(id) = device_id {
            *self.selected_device.lock() = Some(id);
        }

        let mut slot = self.session.lock().await;
        self.start_locked(&mut slot).await?;
        Ok(self.status())
    }

    /// Release every session resource. Safe to call in any state, any number of times.
    pub async fn stop(&self) -> SessionStatus {
        let mut slot = self.session.lock().await;
        self.stop_locked(&mut slot).await;
        self.status()
    }

    /// Select a device (`None` for auto) and restart onto it when a session exists.
    /// The old session is fully torn down before the new one opens.
    pub async fn switch_device(
        &self,
        device_id: Option<String>,
    ) -> Result<SessionStatus, FirewatchError> {
        let mut slot = self.session.lock().await;
        *self.selected_device.lock() = device_id.clone();

        if slot.is_none() {
            debug!("No session to switch; selection set to {:?}", device_id);
            return Ok(self.status());
        }

        info!("Switching camera to {}", device_id.as_deref().unwrap_or("auto"));
        self.stop_locked(&mut slot).await;
        self.start_locked(&mut slot).await?;
        Ok(self.status())
    }

    /// Change the selection without touching a running session.
    /// An explicit id must appear in the last device listing.
    pub fn select_device(
        &self,
        device_id: Option<String>,
    ) -> Result<Option<CameraDevice>, CameraError> {
        let device = match device_id.as_deref() {
            Some(id) => {
                let device = self.registry.select(id).ok_or_else(|| CameraError::DeviceOpen {
                    device: id.to_string(),
                    details: "not in the device list".to_string(),
                })?;
                Some(device)
            }
            None => None,
        };

        *self.selected_device.lock() = device_id;
        Ok(device)
    }

    pub fn selected_device(&self) -> Option<String> {
        self.selected_device.lock().clone()
    }

    /// Takes effect on the next send tick of a live session
    pub fn set_processing_fps(&self, fps: u32) -> Result<u32, SessionError> {
        if !(MIN_PROCESSING_FPS..=MAX_PROCESSING_FPS).contains(&fps) {
            return Err(SessionError::InvalidProcessingFps { fps });
        }

        let changed = self.shared.processing_fps.send_if_modified(|current| {
            let changed = *current != fps;
            *current = fps;
            changed
        });

        let skip_interval = skip_interval_for(self.config.sampler.capture_timer_fps, fps);
        if changed {
            info!("Processing rate {} fps (skip interval {})", fps, skip_interval);
            self.shared
                .event_bus
                .publish(FirewatchEvent::ProcessingFpsChanged { fps, skip_interval });
        }
        Ok(skip_interval)
    }

    pub fn processing_fps(&self) -> u32 {
        *self.shared.processing_fps.borrow()
    }

    pub fn subscribe_processing_fps(&self) -> watch::Receiver<u32> {
        self.shared.processing_fps.subscribe()
    }

    pub fn set_voice_enabled(&self, enabled: bool) {
        self.shared.notifier.set_enabled(enabled);
    }

    pub fn voice_enabled(&self) -> bool {
        self.shared.notifier.is_enabled()
    }

    /// Re-enumerate cameras. A failure is recorded for status surfaces.
    pub async fn refresh_devices(&self) -> Result<Vec<CameraDevice>, CameraError> {
        match self.registry.list().await {
            Ok(devices) => {
                self.shared
                    .event_bus
                    .publish(FirewatchEvent::DevicesRefreshed { count: devices.len() });
                Ok(devices)
            }
            Err(e) => {
                self.shared.set_error(Some(e.user_message()));
                Err(e)
            }
        }
    }

    /// Devices from the last listing
    pub fn devices(&self) -> Vec<CameraDevice> {
        self.registry.devices()
    }

    /// The device after the active (or selected) one, wrapping around
    pub fn next_device(&self) -> Option<CameraDevice> {
        let current = self
            .active
            .lock()
            .as_ref()
            .map(|info| info.device.id.clone())
            .or_else(|| self.selected_device());
        self.registry.next_after(current.as_deref())
    }

    pub fn status(&self) -> SessionStatus {
        let processing_fps = self.processing_fps();
        let active = self.active.lock();

        SessionStatus {
            state: self.shared.state(),
            session_id: active.as_ref().map(|info| info.id),
            device: active.as_ref().map(|info| info.device.clone()),
            selected_device: self.selected_device(),
            channel_state: active.as_ref().map(|info| *info.channel_state.borrow()),
            processing_fps,
            skip_interval: skip_interval_for(self.config.sampler.capture_timer_fps, processing_fps),
            capture_timer_fps: self.config.sampler.capture_timer_fps,
            voice_enabled: self.voice_enabled(),
            last_error: self.shared.last_error.lock().clone(),
            started_at: active.as_ref().map(|info| info.started_at),
        }
    }

    pub fn stats(&self) -> PerformanceStats {
        self.shared.stats.snapshot()
    }

    pub fn stats_tracker(&self) -> Arc<StatsTracker> {
        Arc::clone(&self.shared.stats)
    }

    pub fn annotations(&self) -> Option<Arc<AnnotationSnapshot>> {
        self.shared.store.current()
    }

    async fn start_locked(&self, slot: &mut Option<StreamSession>) -> Result<(), FirewatchError> {
        if slot.is_some() {
            if self.shared.state().is_running() {
                debug!("Session already running");
                return Ok(());
            }
            // Failed session: reconnect affordance
            self.stop_locked(slot).await;
        }

        self.shared.set_error(None);
        self.shared.set_state(SessionState::Starting);

        let device_id = self.selected_device();
        let backend = self.registry.backend();
        let mut camera =
            match CameraSession::open(backend.as_ref(), device_id.as_deref(), &self.config.camera)
                .await
            {
                Ok(camera) => camera,
                Err(e) => {
                    let message = e.user_message();
                    error!("Camera start failed: {}", e);
                    self.shared.set_error(Some(message.clone()));
                    self.shared.set_state(SessionState::Failed);
                    self.shared
                        .event_bus
                        .publish(FirewatchEvent::CameraFailed { message });
                    return Err(e.into());
                }
            };

        let mut channel = TransportChannel::new(&self.config.transport);
        let events = match channel.open().await {
            Ok(events) => events,
            Err(e) => {
                let message = e.user_message();
                error!("Annotation channel failed to open: {}", e);
                camera.close().await;
                self.shared.set_error(Some(message.clone()));
                self.shared.set_state(SessionState::Failed);
                self.shared
                    .event_bus
                    .publish(FirewatchEvent::ChannelFailed { message });
                return Err(e.into());
            }
        };

        let id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        self.shared.store.clear();
        self.shared.stats.reset();

        let surface = self.take_surface();
        let renderer = Renderer::new(
            surface,
            self.font.clone(),
            camera.reader(),
            self.shared.store.clone(),
            Arc::clone(&self.shared.stats),
            self.shared.processing_fps.subscribe(),
        );
        let render_task =
            spawn_render_loop(renderer, self.config.display.refresh_hz, cancel.clone());

        let tasks = vec![
            spawn_stats_loop(
                Arc::clone(&self.shared.stats),
                Duration::from_millis(self.config.stats.interval_ms),
                cancel.clone(),
            ),
            spawn_receive_loop(id, events, Arc::clone(&self.shared), cancel.clone()),
            spawn_send_loop(
                SendLoop {
                    session_id: id,
                    frames: camera.reader(),
                    sender: channel.sender(),
                    sampler: self.config.sampler.clone(),
                    encoder: self.config.encoder.clone(),
                    mobile: self.config.camera.mobile,
                },
                Arc::clone(&self.shared),
                cancel.clone(),
            ),
        ];

        *self.active.lock() = Some(ActiveInfo {
            id,
            device: camera.device().clone(),
            channel_state: channel.subscribe_state(),
            started_at: Utc::now(),
        });
        info!(
            "[{}] Session live on {} -> {}",
            id,
            camera.device().id,
            channel.endpoint()
        );

        *slot = Some(StreamSession {
            id,
            camera,
            channel,
            cancel,
            render_task: Some(render_task),
            tasks,
        });
        self.shared.set_state(SessionState::Live);
        Ok(())
    }

    async fn stop_locked(&self, slot: &mut Option<StreamSession>) {
        let Some(mut session) = slot.take() else {
            // Nothing running; a failed start still returns to Idle
            if self.shared.state() != SessionState::Idle {
                self.shared.set_state(SessionState::Idle);
            }
            self.shared.store.clear();
            return;
        };

        self.shared.set_state(SessionState::Stopping);
        info!("[{}] Stopping session", session.id);

        session.cancel.cancel();

        if let Some(render_task) = session.render_task.take() {
            match render_task.await {
                Ok(mut renderer) => {
                    if let Err(e) = renderer.clear() {
                        warn!("Failed to clear display: {}", e);
                    }
                    *self.surface.lock() = Some(renderer.into_surface());
                }
                Err(e) => warn!("[{}] Render task ended abnormally: {}", session.id, e),
            }
        }

        for task in session.tasks.drain(..) {
            if let Err(e) = task.await {
                warn!("[{}] Session task ended abnormally: {}", session.id, e);
            }
        }

        session.channel.close().await;
        session.camera.close().await;

        self.shared.store.clear();
        self.shared.notifier.cancel_all();
        *self.active.lock() = None;
        self.shared.set_error(None);
        self.shared.set_state(SessionState::Idle);
        info!("[{}] Session stopped", session.id);
    }

    /// The surface from the previous session, or a fresh one from config
    fn take_surface(&self) -> Box<dyn DisplaySurface> {
        if let Some(surface) = self.surface.lock().take() {
            return surface;
        }
        match create_surface(&self.config.display) {
            Ok(surface) => surface,
            Err(e) => {
                warn!("{}; rendering to memory only", e);
                Box::new(MemorySurface::new(self.config.display.resolution))
            }
        }
    }
}
