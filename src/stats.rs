use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Published view of the rolling counters
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PerformanceStats {
    /// Rendered frames per second over the last interval
    pub display_fps: f64,
    pub frames_sent: u64,
    /// Frames the service reported on, by acknowledgement or result
    pub frames_processed: u64,
    /// Frames that came back with an annotation payload
    pub frames_annotated: u64,
    /// Frames dropped because the channel was not open or was backpressured
    pub frames_dropped: u64,
    /// Mean of the most recent processing latencies reported by the service
    pub avg_processing_latency_ms: f64,
}

/// Rolling counters shared by the send, receive and render loops
pub struct StatsTracker {
    frames_sent: AtomicU64,
    frames_processed: AtomicU64,
    frames_annotated: AtomicU64,
    frames_dropped: AtomicU64,
    renders_since_tick: AtomicU64,
    latencies: Mutex<VecDeque<f64>>,
    latency_window: usize,
    last_tick: Mutex<Instant>,
    published: watch::Sender<PerformanceStats>,
}

impl StatsTracker {
    pub fn new(latency_window: usize) -> Self {
        let (published, _) = watch::channel(PerformanceStats::default());
        Self {
            frames_sent: AtomicU64::new(0),
            frames_processed: AtomicU64::new(0),
            frames_annotated: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
            renders_since_tick: AtomicU64::new(0),
            latencies: Mutex::new(VecDeque::with_capacity(latency_window.max(1))),
            latency_window: latency_window.max(1),
            last_tick: Mutex::new(Instant::now()),
            published,
        }
    }

    pub fn record_sent(&self) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// An acknowledgement-only message arrived
    pub fn record_acknowledged(&self) {
        self.frames_processed.fetch_add(1, Ordering::Relaxed);
    }

    /// An annotation result arrived, optionally with the service's processing time
    pub fn record_annotation(&self, processing_time_ms: Option<f64>) {
        self.frames_processed.fetch_add(1, Ordering::Relaxed);
        self.frames_annotated.fetch_add(1, Ordering::Relaxed);

        if let Some(latency) = processing_time_ms.filter(|v| v.is_finite() && *v > 0.0) {
            let mut latencies = self.latencies.lock();
            if latencies.len() == self.latency_window {
                latencies.pop_front();
            }
            latencies.push_back(latency);
        }
    }

    pub fn record_render(&self) {
        self.renders_since_tick.fetch_add(1, Ordering::Relaxed);
    }

    /// Arithmetic mean of the latency window, 0 when empty
    pub fn average_latency_ms(&self) -> f64 {
        let latencies = self.latencies.lock();
        if latencies.is_empty() {
            0.0
        } else {
            latencies.iter().sum::<f64>() / latencies.len() as f64
        }
    }

    /// Compute the display rate since the previous tick and publish a snapshot
    pub fn tick(&self, now: Instant) -> PerformanceStats {
        let elapsed = {
            let mut last_tick = self.last_tick.lock();
            let elapsed = now.saturating_duration_since(*last_tick);
            *last_tick = now;
            elapsed
        };
        let renders = self.renders_since_tick.swap(0, Ordering::Relaxed);
        let elapsed_ms = elapsed.as_secs_f64() * 1000.0;

        let display_fps = if elapsed_ms > 0.0 {
            renders as f64 * 1000.0 / elapsed_ms
        } else {
            0.0
        };

        let stats = PerformanceStats {
            display_fps,
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_processed: self.frames_processed.load(Ordering::Relaxed),
            frames_annotated: self.frames_annotated.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            avg_processing_latency_ms: self.average_latency_ms(),
        };

        self.published.send_replace(stats.clone());
        stats
    }

    /// Last fully published snapshot
    pub fn snapshot(&self) -> PerformanceStats {
        self.published.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PerformanceStats> {
        self.published.subscribe()
    }

    /// Zero every counter at the start of a session
    pub fn reset(&self) {
        self.frames_sent.store(0, Ordering::Relaxed);
        self.frames_processed.store(0, Ordering::Relaxed);
        self.frames_annotated.store(0, Ordering::Relaxed);
        self.frames_dropped.store(0, Ordering::Relaxed);
        self.renders_since_tick.store(0, Ordering::Relaxed);
        self.latencies.lock().clear();
        *self.last_tick.lock() = Instant::now();
        self.published.send_replace(PerformanceStats::default());
    }
}

/// Publish a snapshot every `interval` until cancelled
pub fn spawn_stats_loop(
    tracker: Arc<StatsTracker>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let stats = tracker.tick(Instant::now());
                    debug!(
                        "Stats: {:.0} display fps, {} sent, {} processed, {:.1} ms avg latency",
                        stats.display_fps,
                        stats.frames_sent,
                        stats.frames_processed,
                        stats.avg_processing_latency_ms
                    );
                }
            }
        }

        debug!("Stats loop stopped");
    })
}
