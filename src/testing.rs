//! In-process annotation service used by transport and session tests.

use crate::config::{CameraBackendKind, FirewatchConfig};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

#[derive(Debug, Clone)]
pub enum ServerCommand {
    /// Push a text message to every connected client
    Text(String),
    /// Close every connection with a close handshake
    Close,
    /// Drop every connection without a close handshake
    Reset,
}

pub struct MockAnnotationServer {
    pub endpoint: String,
    received: Arc<Mutex<Vec<serde_json::Value>>>,
    current: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    total: Arc<AtomicUsize>,
    ack_frames: Arc<AtomicBool>,
    commands: broadcast::Sender<ServerCommand>,
    task: JoinHandle<()>,
}

impl MockAnnotationServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = format!("ws://{}", listener.local_addr().unwrap());

        let received = Arc::new(Mutex::new(Vec::new()));
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let total = Arc::new(AtomicUsize::new(0));
        let ack_frames = Arc::new(AtomicBool::new(false));
        let (commands, _) = broadcast::channel(32);

        let task = {
            let received = Arc::clone(&received);
            let current = Arc::clone(&current);
            let peak = Arc::clone(&peak);
            let total = Arc::clone(&total);
            let ack_frames = Arc::clone(&ack_frames);
            let commands = commands.clone();

            tokio::spawn(async move {
                while let Ok((tcp, _)) = listener.accept().await {
                    let Ok(ws) = tokio_tungstenite::accept_async(tcp).await else {
                        continue;
                    };

                    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    total.fetch_add(1, Ordering::SeqCst);

                    let received = Arc::clone(&received);
                    let current = Arc::clone(&current);
                    let ack_frames = Arc::clone(&ack_frames);
                    let mut command_rx = commands.subscribe();

                    tokio::spawn(async move {
                        let (mut sink, mut stream) = ws.split();
                        loop {
                            tokio::select! {
                                message = stream.next() => match message {
                                    Some(Ok(Message::Text(text))) => {
                                        if let Ok(value) = serde_json::from_str(&text) {
                                            received.lock().push(value);
                                        }
                                        if ack_frames.load(Ordering::SeqCst) {
                                            let ack = r#"{"status":"frame_received"}"#.to_string();
                                            if sink.send(Message::Text(ack)).await.is_err() {
                                                break;
                                            }
                                        }
                                    }
                                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                                    Some(Ok(_)) => {}
                                },
                                command = command_rx.recv() => match command {
                                    Ok(ServerCommand::Text(text)) => {
                                        if sink.send(Message::Text(text)).await.is_err() {
                                            break;
                                        }
                                    }
                                    Ok(ServerCommand::Close) => {
                                        let _ = sink.close().await;
                                        break;
                                    }
                                    Ok(ServerCommand::Reset) | Err(_) => break,
                                },
                            }
                        }
                        current.fetch_sub(1, Ordering::SeqCst);
                    });
                }
            })
        };

        Self {
            endpoint,
            received,
            current,
            peak,
            total,
            ack_frames,
            commands,
            task,
        }
    }

    /// Reply to every received frame with an acknowledgement
    pub fn set_ack_frames(&self, ack: bool) {
        self.ack_frames.store(ack, Ordering::SeqCst);
    }

    pub fn push(&self, command: ServerCommand) {
        let _ = self.commands.send(command);
    }

    pub fn push_text(&self, text: impl Into<String>) {
        self.push(ServerCommand::Text(text.into()));
    }

    pub fn received(&self) -> Vec<serde_json::Value> {
        self.received.lock().clone()
    }

    pub fn received_count(&self) -> usize {
        self.received.lock().len()
    }

    pub fn open_connections(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    pub fn peak_connections(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn total_connections(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }
}

impl Drop for MockAnnotationServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// An endpoint on which nothing is listening
pub async fn refused_endpoint() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("ws://{}", addr)
}

/// Poll `condition` until it holds, panicking after `timeout`
pub async fn wait_until<F>(timeout: Duration, mut condition: F)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while !condition() {
        if tokio::time::Instant::now() >= deadline {
            panic!("condition not met within {:?}", timeout);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Small synthetic frames, headless display and quick timers against `endpoint`
pub fn create_test_config(endpoint: &str) -> FirewatchConfig {
    let mut config = FirewatchConfig::default();
    config.camera.backend = CameraBackendKind::Synthetic;
    config.camera.resolution = (64, 48);
    config.camera.fps = 30;
    config.sampler.capture_timer_fps = 30;
    config.sampler.processing_fps = 2;
    config.transport.endpoint = endpoint.to_string();
    config.transport.connect_timeout_seconds = 2;
    config.transport.close_timeout_seconds = 1;
    config.display.headless = true;
    config.display.refresh_hz = 30;
    config.display.font_path = "/nonexistent/overlay.ttf".to_string();
    config.stats.interval_ms = 100;
    config
}
