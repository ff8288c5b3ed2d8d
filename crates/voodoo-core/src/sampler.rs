//! Throughput sampling for a byte stream.
//!
//! The transfer thread feeds byte counts with `record` and calls `poll` from its
//! progress callback; once per interval a `Sample` is produced.

use serde::Serialize;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SampleUnit {
    /// Bytes per second.
    Bps,
    /// KiB per second.
    KBps,
    /// MiB per second.
    MBps,
}

impl SampleUnit {
    pub fn bytes(self) -> f64 {
        match self {
            SampleUnit::Bps => 1.0,
            SampleUnit::KBps => 1024.0,
            SampleUnit::MBps => 1024.0 * 1024.0,
        }
    }

    pub fn suffix(self) -> &'static str {
        match self {
            SampleUnit::Bps => "B/s",
            SampleUnit::KBps => "KiB/s",
            SampleUnit::MBps => "MiB/s",
        }
    }
}

/// One throughput measurement. All rates are expressed in `unit`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Sample {
    /// Rate over the last interval.
    pub current: f64,
    /// Mean of the last `window` interval rates.
    pub current_average: f64,
    /// Rate over the whole sampling session.
    pub average: f64,
    pub peak: f64,
    pub low: f64,
    /// Wire bytes counted during the last interval.
    pub bytes: u64,
    pub unit: SampleUnit,
}

impl Sample {
    pub fn convert(&self, unit: SampleUnit) -> Sample {
        let factor = self.unit.bytes() / unit.bytes();
        Sample {
            current: self.current * factor,
            current_average: self.current_average * factor,
            average: self.average * factor,
            peak: self.peak * factor,
            low: self.low * factor,
            bytes: self.bytes,
            unit,
        }
    }
}

#[derive(Debug)]
pub struct SpeedSampler {
    interval: Duration,
    window: usize,
    started: Instant,
    last_tick: Instant,
    pending: u64,
    total: u64,
    recent: VecDeque<f64>,
    peak: f64,
    low: Option<f64>,
}

impl SpeedSampler {
    pub fn new(interval: Duration, window: usize) -> Self {
        Self::starting_at(interval, window, Instant::now())
    }

    pub fn starting_at(interval: Duration, window: usize, now: Instant) -> Self {
        Self {
            interval: interval.max(Duration::from_millis(1)),
            window: window.max(1),
            started: now,
            last_tick: now,
            pending: 0,
            total: 0,
            recent: VecDeque::new(),
            peak: 0.0,
            low: None,
        }
    }

    pub fn record(&mut self, bytes: u64) {
        self.pending += bytes;
        self.total += bytes;
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    /// Emit a sample (in bytes/s) if at least one interval elapsed since the last one.
    pub fn poll(&mut self, now: Instant) -> Option<Sample> {
        let elapsed = now.saturating_duration_since(self.last_tick);
        if elapsed < self.interval {
            return None;
        }
        Some(self.take(now, elapsed))
    }

    /// Emit a sample covering whatever was recorded since the last one.
    pub fn flush(&mut self, now: Instant) -> Option<Sample> {
        if self.pending == 0 {
            return None;
        }
        let elapsed = now.saturating_duration_since(self.last_tick);
        Some(self.take(now, elapsed.max(Duration::from_millis(1))))
    }

    fn take(&mut self, now: Instant, elapsed: Duration) -> Sample {
        let bytes = std::mem::take(&mut self.pending);
        let current = bytes as f64 / elapsed.as_secs_f64();
        self.last_tick = now;

        self.recent.push_back(current);
        while self.recent.len() > self.window {
            self.recent.pop_front();
        }
        let current_average = self.recent.iter().sum::<f64>() / self.recent.len() as f64;

        let session = now.saturating_duration_since(self.started).as_secs_f64();
        let average = if session > 0.0 {
            self.total as f64 / session
        } else {
            current
        };

        self.peak = self.peak.max(current);
        let low = self.low.map_or(current, |l| l.min(current));
        self.low = Some(low);

        Sample {
            current,
            current_average,
            average,
            peak: self.peak,
            low,
            bytes,
            unit: SampleUnit::Bps,
        }
    }
}
