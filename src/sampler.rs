//! Two-stage throttle deciding which capture ticks produce an outbound frame.
//!
//! Stage one is a frame-count gate: a counter advances modulo `skip_interval` on
//! every tick and only the tick that wraps it to zero passes. Stage two is a time
//! gate: the wall-clock time since the last frame actually sent must cover the
//! processing interval. Stage one bounds encode work under a fixed-rate timer,
//! stage two bounds the send rate when the timer fires in bursts.

use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Outcome of a single capture tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleDecision {
    /// Rejected by the frame-count gate
    Skipped { counter: u32 },
    /// Passed the frame-count gate but the previous send is too recent
    TooSoon { elapsed: Duration },
    /// Both gates passed; encode and send the current frame
    Send,
}

impl SampleDecision {
    pub fn should_send(&self) -> bool {
        matches!(self, SampleDecision::Send)
    }
}

/// `max(1, floor(capture_timer_fps / processing_fps))`
pub fn skip_interval_for(capture_timer_fps: u32, processing_fps: u32) -> u32 {
    (capture_timer_fps / processing_fps.max(1)).max(1)
}

/// Throttle state owned by the send loop
#[derive(Debug, Clone)]
pub struct FrameSampler {
    capture_timer_fps: u32,
    processing_fps: u32,
    skip_interval: u32,
    counter: u32,
    jitter_tolerance: Duration,
    last_sent: Option<Instant>,
}

impl FrameSampler {
    pub fn new(capture_timer_fps: u32, processing_fps: u32) -> Self {
        let capture_timer_fps = capture_timer_fps.max(1);
        let processing_fps = processing_fps.max(1);
        Self {
            capture_timer_fps,
            processing_fps,
            skip_interval: skip_interval_for(capture_timer_fps, processing_fps),
            counter: 0,
            jitter_tolerance: Duration::ZERO,
            last_sent: None,
        }
    }

    /// Accept sends up to `tolerance` early to absorb timer jitter
    pub fn with_jitter_tolerance(mut self, tolerance: Duration) -> Self {
        self.jitter_tolerance = tolerance;
        self
    }

    /// Change the processing rate; takes effect on the next tick
    pub fn set_processing_fps(&mut self, processing_fps: u32) {
        let processing_fps = processing_fps.max(1);
        if processing_fps == self.processing_fps {
            return;
        }

        self.processing_fps = processing_fps;
        self.skip_interval = skip_interval_for(self.capture_timer_fps, processing_fps);
        self.counter %= self.skip_interval;

        debug!(
            "Processing fps set to {} (skip interval {})",
            processing_fps, self.skip_interval
        );
    }

    /// Evaluate one capture tick. The counter advances regardless of the outcome.
    pub fn on_tick(&mut self, now: Instant) -> SampleDecision {
        self.counter = (self.counter + 1) % self.skip_interval;
        if self.counter != 0 {
            trace!("Tick skipped by frame-count gate ({})", self.counter);
            return SampleDecision::Skipped {
                counter: self.counter,
            };
        }

        if let Some(last_sent) = self.last_sent {
            let elapsed = now.saturating_duration_since(last_sent);
            if elapsed + self.jitter_tolerance < self.min_send_interval() {
                trace!("Tick dropped by time gate ({:?} since last send)", elapsed);
                return SampleDecision::TooSoon { elapsed };
            }
        }

        SampleDecision::Send
    }

    /// Record that a frame actually left through the channel
    pub fn record_sent(&mut self, at: Instant) {
        self.last_sent = Some(at);
    }

    /// `1000 / processing_fps` milliseconds
    pub fn min_send_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.processing_fps as f64)
    }

    pub fn skip_interval(&self) -> u32 {
        self.skip_interval
    }

    pub fn counter(&self) -> u32 {
        self.counter
    }

    pub fn processing_fps(&self) -> u32 {
        self.processing_fps
    }

    pub fn capture_timer_fps(&self) -> u32 {
        self.capture_timer_fps
    }

    pub fn last_sent(&self) -> Option<Instant> {
        self.last_sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    const TICK: Duration = Duration::from_nanos(33_333_333);

    /// Drive the sampler like the send loop does, recording every send
    fn run_ticks(sampler: &mut FrameSampler, start: Instant, ticks: u32) -> Vec<Instant> {
        let mut sent = Vec::new();
        for i in 1..=ticks {
            let now = start + TICK * i;
            if sampler.on_tick(now).should_send() {
                sampler.record_sent(now);
                sent.push(now);
            }
        }
        sent
    }

    #[test]
    fn test_skip_interval_formula() {
        assert_eq!(skip_interval_for(30, 1), 30);
        assert_eq!(skip_interval_for(30, 2), 15);
        assert_eq!(skip_interval_for(30, 3), 10);
        assert_eq!(skip_interval_for(30, 4), 7);
        assert_eq!(skip_interval_for(30, 5), 6);
        assert_eq!(skip_interval_for(3, 5), 1);
        assert_eq!(skip_interval_for(30, 0), 30);
    }

    #[test]
    fn test_counter_cycles_through_every_value() {
        for fps in 1..=5 {
            let mut sampler = FrameSampler::new(30, fps);
            let skip = sampler.skip_interval();
            let start = Instant::now();

            let mut seen = HashSet::new();
            let mut passes = 0;
            for i in 1..=skip {
                let decision = sampler.on_tick(start + TICK * i);
                assert!(sampler.counter() < skip);
                seen.insert(sampler.counter());
                if !matches!(decision, SampleDecision::Skipped { .. }) {
                    passes += 1;
                }
            }

            assert_eq!(seen.len() as u32, skip, "fps {}", fps);
            assert_eq!(passes, 1, "fps {}", fps);
        }
    }

    #[test]
    fn test_one_pass_per_cycle_without_sends() {
        let mut sampler = FrameSampler::new(30, 3);
        let start = Instant::now();
        let passes = (1..=100)
            .filter(|i| {
                !matches!(
                    sampler.on_tick(start + TICK * *i),
                    SampleDecision::Skipped { .. }
                )
            })
            .count();
        assert_eq!(passes, 10);
    }

    #[test]
    fn test_time_gate_spacing() {
        for fps in 1..=5 {
            let mut sampler = FrameSampler::new(30, fps);
            let sent = run_ticks(&mut sampler, Instant::now(), 300);
            assert!(!sent.is_empty());

            let min_gap = sampler.min_send_interval() - TICK;
            for pair in sent.windows(2) {
                assert!(pair[1] - pair[0] >= min_gap, "fps {}", fps);
            }
        }
    }

    #[test]
    fn test_time_gate_rejects_bursts() {
        let mut sampler = FrameSampler::new(30, 1);
        let start = Instant::now();

        for i in 1..=30 {
            sampler.on_tick(start + TICK * i);
        }
        sampler.record_sent(start + TICK * 30);

        // A burst of 30 ticks delivered within a few milliseconds
        let burst_at = start + TICK * 30 + Duration::from_millis(5);
        let mut decisions = Vec::new();
        for _ in 0..30 {
            decisions.push(sampler.on_tick(burst_at));
        }

        assert!(decisions
            .iter()
            .any(|d| matches!(d, SampleDecision::TooSoon { .. })));
        assert!(!decisions.iter().any(|d| d.should_send()));
    }

    #[test]
    fn test_jitter_tolerance_accepts_slightly_early_send() {
        let mut strict = FrameSampler::new(30, 2);
        let mut tolerant = FrameSampler::new(30, 2).with_jitter_tolerance(Duration::from_millis(5));
        let start = Instant::now();

        for sampler in [&mut strict, &mut tolerant] {
            sampler.record_sent(start);
            for _ in 0..14 {
                sampler.on_tick(start);
            }
        }

        let early = start + Duration::from_millis(498);
        assert!(matches!(strict.on_tick(early), SampleDecision::TooSoon { .. }));
        assert_eq!(tolerant.on_tick(early), SampleDecision::Send);
    }

    #[test]
    fn test_processing_fps_change_applies_immediately() {
        let mut sampler = FrameSampler::new(30, 2);
        let start = Instant::now();

        for i in 1..=12 {
            sampler.on_tick(start + TICK * i);
        }
        assert_eq!(sampler.counter(), 12);

        sampler.set_processing_fps(5);
        assert_eq!(sampler.skip_interval(), 6);
        assert!(sampler.counter() < 6);

        // The next pass follows the new interval, not the old one
        let mut ticks_to_pass = 0;
        for i in 13..=30 {
            ticks_to_pass += 1;
            if !matches!(
                sampler.on_tick(start + TICK * i),
                SampleDecision::Skipped { .. }
            ) {
                break;
            }
        }
        assert!(ticks_to_pass <= 6);
    }

    #[test]
    fn test_first_pass_has_no_time_gate() {
        let mut sampler = FrameSampler::new(30, 30);
        assert_eq!(sampler.skip_interval(), 1);
        assert_eq!(sampler.on_tick(Instant::now()), SampleDecision::Send);
    }
}
