//! Detection loop
//!
//! Drives periodic still-frame classification over the signaling channel.
//! Each `start()` opens a new generation; request ids are monotonic, and a
//! result whose id predates the current generation is discarded.

pub mod history;

pub use history::{DetectionHistory, HistoryEntry};

use crate::config::DetectionConfig;
use log::{debug, info};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Classification outcome
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionResult {
    pub label: String,
    /// Probability in `[0, 1]`
    pub confidence: f32,
}

impl DetectionResult {
    pub fn new(label: impl Into<String>, confidence: f32) -> Self {
        Self {
            label: label.into(),
            confidence: confidence.clamp(0.0, 1.0),
        }
    }
}

pub struct DetectionLoop {
    interval: Duration,
    ticker: Option<JoinHandle<()>>,
    generation: u64,
    /// First request id issued in the current generation
    generation_floor: u64,
    next_request_id: u64,
}

impl DetectionLoop {
    pub fn new(config: &DetectionConfig) -> Self {
        Self {
            interval: config.interval(),
            ticker: None,
            generation: 0,
            generation_floor: 1,
            next_request_id: 1,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        self.ticker.is_some()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Start the timer. `on_tick` receives the generation on every tick.
    /// Returns false (and starts nothing) when already running.
    pub fn start(&mut self, on_tick: impl Fn(u64) + Send + Sync + 'static) -> bool {
        if self.ticker.is_some() {
            debug!("Detection already running (generation {})", self.generation);
            return false;
        }

        self.generation += 1;
        self.generation_floor = self.next_request_id;
        let generation = self.generation;
        let period = self.interval;

        self.ticker = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // First tick completes immediately; wait one full period instead
            interval.tick().await;
            loop {
                interval.tick().await;
                on_tick(generation);
            }
        }));

        info!("Detection started (generation {}, every {:?})", generation, period);
        true
    }

    /// Cancel the timer; in-flight requests are left alone
    pub fn stop(&mut self) -> bool {
        match self.ticker.take() {
            Some(handle) => {
                handle.abort();
                info!("Detection stopped (generation {})", self.generation);
                true
            }
            None => false,
        }
    }

    /// Allocate the request id for a tick, or `None` if the tick is stale
    pub fn next_request(&mut self, generation: u64) -> Option<u64> {
        if !self.is_running() || generation != self.generation {
            debug!("Ignoring stale detection tick (generation {})", generation);
            return None;
        }
        let id = self.next_request_id;
        self.next_request_id += 1;
        Some(id)
    }

    /// Whether a result for `request_id` should be applied
    pub fn accepts(&self, request_id: Option<u64>) -> bool {
        match request_id {
            Some(id) => id >= self.generation_floor && id < self.next_request_id,
            None => self.is_running(),
        }
    }
}

impl Drop for DetectionLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn fast_config() -> DetectionConfig {
        DetectionConfig {
            fps: 20,
            jpeg_quality: 80,
            history_limit: 10,
        }
    }

    #[tokio::test]
    async fn start_is_idempotent() {
        let mut detection = DetectionLoop::new(&fast_config());
        let ticks = Arc::new(AtomicUsize::new(0));

        let counter = ticks.clone();
        assert!(detection.start(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        let counter = ticks.clone();
        assert!(!detection.start(move |_| {
            counter.fetch_add(1000, Ordering::SeqCst);
        }));
        assert_eq!(detection.generation(), 1);

        tokio::time::sleep(Duration::from_millis(180)).await;
        detection.stop();

        let count = ticks.load(Ordering::SeqCst);
        assert!(count >= 1, "timer never fired");
        assert!(count < 1000, "second timer was started");
    }

    #[tokio::test]
    async fn stop_cancels_timer() {
        let mut detection = DetectionLoop::new(&fast_config());
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = ticks.clone();
        detection.start(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(detection.stop());
        assert!(!detection.stop());
        let after_stop = ticks.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), after_stop);
    }

    #[tokio::test]
    async fn results_from_previous_generation_are_discarded() {
        let mut detection = DetectionLoop::new(&fast_config());

        detection.start(|_| {});
        let old = detection.next_request(1).unwrap();
        detection.stop();

        // Late result while stopped is still applied
        assert!(detection.accepts(Some(old)));

        detection.start(|_| {});
        assert_eq!(detection.generation(), 2);
        assert!(detection.next_request(1).is_none());
        let fresh = detection.next_request(2).unwrap();

        assert!(fresh > old);
        assert!(!detection.accepts(Some(old)));
        assert!(detection.accepts(Some(fresh)));
        assert!(!detection.accepts(Some(fresh + 1)));
        detection.stop();
    }

    #[tokio::test]
    async fn uncorrelated_results_apply_only_while_running() {
        let mut detection = DetectionLoop::new(&fast_config());
        assert!(!detection.accepts(None));
        detection.start(|_| {});
        assert!(detection.accepts(None));
        detection.stop();
        assert!(!detection.accepts(None));
    }

    #[test]
    fn ticks_without_running_loop_are_ignored() {
        let mut detection = DetectionLoop::new(&fast_config());
        assert!(detection.next_request(0).is_none());
    }
}
