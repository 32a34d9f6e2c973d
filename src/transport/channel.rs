use super::protocol::{decode_incoming, encode_outgoing, IncomingMessage};
use crate::config::TransportConfig;
use crate::error::{ChannelError, ConnectFailure};
use crate::frame::EncodedFrame;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const EVENT_CAPACITY: usize = 64;

/// Lifecycle of a single connection:
/// `Idle → Connecting → Open → {Closing, Errored} → Closed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChannelState {
    Idle,
    Connecting,
    Open,
    Closing,
    Closed,
    Errored,
}

impl ChannelState {
    pub fn can_transition_to(self, next: ChannelState) -> bool {
        use ChannelState::*;
        matches!(
            (self, next),
            (Idle, Connecting)
                | (Idle, Closed)
                | (Connecting, Open)
                | (Connecting, Errored)
                | (Open, Closing)
                | (Open, Errored)
                | (Closing, Closed)
                | (Closing, Errored)
                | (Errored, Closed)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == ChannelState::Closed
    }
}

/// Notifications delivered to the channel's owner, in arrival order
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// The connection reached Open
    Ready,
    Message(IncomingMessage),
    /// A message could not be decoded; it was dropped and the channel stays open
    ProtocolError(ChannelError),
    /// The connection failed after opening
    Error(ChannelError),
    /// The connection has fully closed
    Closed,
}

/// Why a frame did not go out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    NotOpen,
    Backpressure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    Dropped(DropReason),
}

/// Shared state cell enforcing the transition table
#[derive(Clone)]
struct StateCell {
    sender: Arc<watch::Sender<ChannelState>>,
}

impl StateCell {
    fn new() -> Self {
        let (sender, _) = watch::channel(ChannelState::Idle);
        Self {
            sender: Arc::new(sender),
        }
    }

    fn get(&self) -> ChannelState {
        *self.sender.borrow()
    }

    fn transition(&self, next: ChannelState) -> Result<ChannelState, ChannelError> {
        let mut previous = ChannelState::Idle;
        let mut allowed = false;
        self.sender.send_if_modified(|state| {
            previous = *state;
            allowed = state.can_transition_to(next);
            if allowed {
                *state = next;
            }
            allowed
        });

        if allowed {
            trace!("Channel {:?} -> {:?}", previous, next);
            Ok(previous)
        } else {
            Err(ChannelError::InvalidTransition {
                from: format!("{:?}", previous),
                to: format!("{:?}", next),
            })
        }
    }
}

/// A single duplex connection to the annotation service
pub struct TransportChannel {
    endpoint: String,
    connect_timeout: Duration,
    close_timeout: Duration,
    state: StateCell,
    outgoing: Option<mpsc::Sender<String>>,
    cancel: CancellationToken,
    io_task: Option<JoinHandle<()>>,
    misses: Arc<AtomicU64>,
}

impl TransportChannel {
    pub fn new(config: &TransportConfig) -> Self {
        Self::with_endpoint(
            config.endpoint.clone(),
            Duration::from_secs(config.connect_timeout_seconds),
            Duration::from_secs(config.close_timeout_seconds),
        )
    }

    pub fn with_endpoint(
        endpoint: impl Into<String>,
        connect_timeout: Duration,
        close_timeout: Duration,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            connect_timeout,
            close_timeout,
            state: StateCell::new(),
            outgoing: None,
            cancel: CancellationToken::new(),
            io_task: None,
            misses: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn state(&self) -> ChannelState {
        self.state.get()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ChannelState> {
        self.state.sender.subscribe()
    }

    /// Frames dropped because the channel was not open or was backpressured
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Connect; on success the returned receiver yields `Ready` first
    pub async fn open(&mut self) -> Result<mpsc::Receiver<ChannelEvent>, ChannelError> {
        self.state.transition(ChannelState::Connecting)?;
        info!("Connecting to annotation service at {}", self.endpoint);

        let connected =
            tokio::time::timeout(self.connect_timeout, connect_async(self.endpoint.as_str())).await;

        let stream = match connected {
            Ok(Ok((stream, response))) => {
                debug!("Handshake complete ({})", response.status());
                stream
            }
            Ok(Err(e)) => return Err(self.fail_connect(classify_connect_error(&e))),
            Err(_) => return Err(self.fail_connect(ConnectFailure::TimedOut)),
        };

        let (event_tx, event_rx) = mpsc::channel(EVENT_CAPACITY);
        // Capacity one: a frame waiting behind an in-flight send is already stale
        let (out_tx, out_rx) = mpsc::channel::<String>(1);

        self.state.transition(ChannelState::Open)?;
        let _ = event_tx.send(ChannelEvent::Ready).await;
        info!("Annotation channel open");

        self.outgoing = Some(out_tx);
        self.io_task = Some(tokio::spawn(run_io_loop(
            stream,
            out_rx,
            event_tx,
            self.state.clone(),
            self.cancel.clone(),
            self.close_timeout,
        )));

        Ok(event_rx)
    }

    fn fail_connect(&mut self, reason: ConnectFailure) -> ChannelError {
        if let Err(e) = self.state.transition(ChannelState::Errored) {
            error!("{}", e);
        }
        warn!("Failed to connect to {}: {}", self.endpoint, reason);
        ChannelError::ConnectFailed {
            endpoint: self.endpoint.clone(),
            reason,
        }
    }

    /// Queue a frame without waiting. Never buffers more than one frame.
    pub fn send(&self, frame: &EncodedFrame) -> SendOutcome {
        self.sender().send(frame)
    }

    /// Cloneable send handle for the send loop
    pub fn sender(&self) -> ChannelSender {
        ChannelSender {
            outgoing: self.outgoing.clone(),
            state: self.state.clone(),
            misses: Arc::clone(&self.misses),
        }
    }

    /// Close the connection and wait for the io task. Safe in any state.
    pub async fn close(&mut self) {
        match self.state.get() {
            ChannelState::Closed => return,
            ChannelState::Idle | ChannelState::Errored => {
                let _ = self.state.transition(ChannelState::Closed);
            }
            ChannelState::Open => {
                let _ = self.state.transition(ChannelState::Closing);
            }
            ChannelState::Connecting | ChannelState::Closing => {}
        }

        self.outgoing = None;
        self.cancel.cancel();

        if let Some(task) = self.io_task.take() {
            // The io task bounds its own close handshake; allow a little more here
            match tokio::time::timeout(self.close_timeout + Duration::from_secs(1), task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Channel io task failed: {}", e),
                Err(_) => warn!("Channel io task did not finish within the close timeout"),
            }
        }

        // The io task moves to Closed itself; cover the paths where it never ran
        match self.state.get() {
            ChannelState::Closing | ChannelState::Errored => {
                let _ = self.state.transition(ChannelState::Closed);
            }
            _ => {}
        }

        info!("Annotation channel closed");
    }
}

/// Send half of an open [`TransportChannel`]
#[derive(Clone)]
pub struct ChannelSender {
    outgoing: Option<mpsc::Sender<String>>,
    state: StateCell,
    misses: Arc<AtomicU64>,
}

impl ChannelSender {
    pub fn state(&self) -> ChannelState {
        self.state.get()
    }

    pub fn send(&self, frame: &EncodedFrame) -> SendOutcome {
        let outgoing = match (&self.outgoing, self.state.get()) {
            (Some(outgoing), ChannelState::Open) => outgoing,
            _ => return self.miss(DropReason::NotOpen),
        };

        let text = match encode_outgoing(frame) {
            Ok(text) => text,
            Err(e) => {
                warn!("{}", e);
                return self.miss(DropReason::NotOpen);
            }
        };

        match outgoing.try_send(text) {
            Ok(()) => {
                trace!("Queued frame {} ({} bytes)", frame.source_id, frame.payload_len());
                SendOutcome::Sent
            }
            Err(mpsc::error::TrySendError::Full(_)) => self.miss(DropReason::Backpressure),
            Err(mpsc::error::TrySendError::Closed(_)) => self.miss(DropReason::NotOpen),
        }
    }

    fn miss(&self, reason: DropReason) -> SendOutcome {
        self.misses.fetch_add(1, Ordering::Relaxed);
        trace!("Frame dropped: {:?}", reason);
        SendOutcome::Dropped(reason)
    }
}

impl Drop for TransportChannel {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn classify_connect_error(err: &tungstenite::Error) -> ConnectFailure {
    match err {
        tungstenite::Error::Io(io) if io.kind() == std::io::ErrorKind::ConnectionRefused => {
            ConnectFailure::Refused
        }
        tungstenite::Error::Io(io) if io.kind() == std::io::ErrorKind::TimedOut => {
            ConnectFailure::TimedOut
        }
        tungstenite::Error::Io(io) => ConnectFailure::Io(io.to_string()),
        tungstenite::Error::Url(e) => ConnectFailure::InvalidEndpoint(e.to_string()),
        tungstenite::Error::HttpFormat(e) => ConnectFailure::InvalidEndpoint(e.to_string()),
        tungstenite::Error::Http(response) => {
            ConnectFailure::Handshake(format!("HTTP {}", response.status()))
        }
        tungstenite::Error::Tls(e) => ConnectFailure::Tls(e.to_string()),
        other => ConnectFailure::Handshake(other.to_string()),
    }
}

enum LoopExit {
    Cancelled,
    Failed(ChannelError),
    ClosedByPeer,
}

async fn run_io_loop(
    stream: WsStream,
    mut out_rx: mpsc::Receiver<String>,
    events: mpsc::Sender<ChannelEvent>,
    state: StateCell,
    cancel: CancellationToken,
    close_timeout: Duration,
) {
    let (mut sink, mut source) = stream.split();

    let exit = loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break LoopExit::Cancelled,
            outgoing = out_rx.recv() => {
                let Some(text) = outgoing else {
                    break LoopExit::Cancelled;
                };
                if let Err(e) = sink.send(Message::Text(text)).await {
                    break LoopExit::Failed(ChannelError::ConnectionLost {
                        details: e.to_string(),
                    });
                }
            }
            incoming = source.next() => match incoming {
                Some(Ok(Message::Text(text))) => deliver(&events, &text).await,
                Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                    Ok(text) => deliver(&events, text).await,
                    Err(e) => {
                        let err = ChannelError::ProtocolError { details: e.to_string() };
                        warn!("{}", err);
                        let _ = events.send(ChannelEvent::ProtocolError(err)).await;
                    }
                },
                Some(Ok(Message::Close(frame))) => {
                    debug!("Peer sent close: {:?}", frame);
                    break LoopExit::ClosedByPeer;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    break LoopExit::Failed(ChannelError::ConnectionLost {
                        details: e.to_string(),
                    });
                }
                None => break LoopExit::ClosedByPeer,
            }
        }
    };

    match exit {
        LoopExit::Cancelled => {
            let _ = state.transition(ChannelState::Closing);
            // Wait for the peer's close reply (or EOF) so the connection is gone on return
            let handshake = async {
                sink.close().await?;
                while let Some(message) = source.next().await {
                    if message?.is_close() {
                        break;
                    }
                }
                Ok::<(), tungstenite::Error>(())
            };
            match tokio::time::timeout(close_timeout, handshake).await {
                Ok(Ok(())) => debug!("Close handshake complete"),
                Ok(Err(e)) => debug!("Close handshake failed: {}", e),
                Err(_) => debug!("Close handshake timed out"),
            }
            let _ = state.transition(ChannelState::Closed);
        }
        LoopExit::Failed(err) => {
            warn!("Annotation channel failed: {}", err);
            let _ = state.transition(ChannelState::Errored);
            let _ = events.send(ChannelEvent::Error(err)).await;
            let _ = state.transition(ChannelState::Closed);
        }
        LoopExit::ClosedByPeer => {
            info!("Annotation service closed the connection");
            let _ = state.transition(ChannelState::Closing);
            let _ = tokio::time::timeout(close_timeout, sink.close()).await;
            let _ = state.transition(ChannelState::Closed);
            let _ = events.send(ChannelEvent::Error(ChannelError::ClosedByPeer)).await;
        }
    }

    let _ = events.send(ChannelEvent::Closed).await;
}

async fn deliver(events: &mpsc::Sender<ChannelEvent>, text: &str) {
    let event = match decode_incoming(text) {
        Ok(message) => ChannelEvent::Message(message),
        Err(e) => {
            warn!("Dropping message: {}", e);
            ChannelEvent::ProtocolError(e)
        }
    };
    let _ = events.send(event).await;
}
