//! Transfer progress for a connection (bytes done, ETA, rate).
//!
//! While a connection is transferring, the engine samples it every
//! [`SAMPLE_INTERVAL`]; the last [`SPEED_WINDOW`] samples give the current
//! speed, the whole transfer gives the average.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

pub const SAMPLE_INTERVAL: Duration = Duration::from_millis(100);
pub const SPEED_WINDOW: usize = 50;

/// Snapshot of transfer progress, copied to every attached download.
#[derive(Debug, Clone, PartialEq)]
pub struct Progress {
    /// Offset the transfer was resumed from.
    pub start: u64,
    /// Absolute position in the resource.
    pub pos: u64,
    /// Expected total size, if known.
    pub size: Option<u64>,
    /// Bytes received in this transfer.
    pub loaded: u64,
    pub elapsed: Duration,
    last_time: Option<Instant>,
    last_loaded: u64,
    /// Time accumulated into the newest sample slot.
    slot_time: Duration,
    samples: VecDeque<u64>,
    window_loaded: u64,
}

impl Progress {
    pub fn new(start: u64) -> Self {
        Self {
            start,
            pos: start,
            size: None,
            loaded: 0,
            elapsed: Duration::ZERO,
            last_time: None,
            last_loaded: 0,
            slot_time: Duration::ZERO,
            samples: VecDeque::from(vec![0; SPEED_WINDOW]),
            window_loaded: 0,
        }
    }

    /// Take a sample of the connection's counters.
    pub fn update(&mut self, now: Instant, received: u64, est_length: Option<u64>, from: u64) {
        let delta = self
            .last_time
            .map_or(Duration::ZERO, |t| now.saturating_duration_since(t));

        self.loaded = received;
        self.pos = from;
        self.size = est_length.map(|size| size.max(from));

        // Rotate out slots older than the window.
        self.slot_time += delta;
        while self.slot_time >= SAMPLE_INTERVAL {
            if let Some(oldest) = self.samples.pop_front() {
                self.window_loaded -= oldest;
            }
            self.samples.push_back(0);
            self.slot_time -= SAMPLE_INTERVAL;
        }

        let fresh = self.loaded.saturating_sub(self.last_loaded);
        if let Some(newest) = self.samples.back_mut() {
            *newest += fresh;
        }
        self.window_loaded += fresh;
        self.last_loaded = self.loaded;
        self.last_time = Some(now);
        self.elapsed += delta;
    }

    /// Average rate over the whole transfer in bytes per second (0 if no time passed).
    pub fn bytes_per_sec(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        self.loaded as f64 / secs
    }

    /// Rate over the last [`SPEED_WINDOW`] samples.
    pub fn current_speed(&self) -> f64 {
        let window = SAMPLE_INTERVAL * SPEED_WINDOW as u32;
        let secs = self.elapsed.min(window).as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        self.window_loaded as f64 / secs
    }

    /// Estimated seconds remaining (None if the size or rate is unknown).
    pub fn eta_secs(&self) -> Option<f64> {
        let remaining = self.size?.saturating_sub(self.pos);
        if remaining == 0 {
            return Some(0.0);
        }
        let rate = self.current_speed();
        if rate <= 0.0 {
            return None;
        }
        Some(remaining as f64 / rate)
    }

    /// Fraction complete in [0.0, 1.0], if the size is known.
    pub fn fraction(&self) -> Option<f64> {
        let size = self.size?;
        if size == 0 {
            return Some(1.0);
        }
        Some((self.pos as f64 / size as f64).min(1.0))
    }
}
