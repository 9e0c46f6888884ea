//! Per-instrument volume history carried between cycles.
//!
//! A fixed-capacity arena of ring buffers indexed by symbol. Each buffer is
//! append-only (only candles newer than the last stored one are accepted)
//! and trimmed to the baseline window, so total memory is bounded by
//! `max_instruments × window`. The history exists solely to seed the RVol
//! baseline when a freshly fetched series is shorter than the window.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use tracing::debug;

use crate::types::Candle;

/// One stored observation: candle open time and volume.
pub type VolumePoint = (DateTime<Utc>, f64);

#[derive(Debug, Clone)]
struct VolumeRing {
    points: VecDeque<VolumePoint>,
    capacity: usize,
}

impl VolumeRing {
    fn new(capacity: usize) -> Self {
        Self {
            points: VecDeque::with_capacity(capacity.min(4096)),
            capacity,
        }
    }

    fn last_time(&self) -> Option<DateTime<Utc>> {
        self.points.back().map(|(t, _)| *t)
    }

    fn push(&mut self, point: VolumePoint) {
        self.points.push_back(point);
        while self.points.len() > self.capacity {
            self.points.pop_front();
        }
    }
}

/// Arena of volume ring buffers keyed by instrument symbol.
#[derive(Debug, Clone)]
pub struct VolumeHistory {
    index: HashMap<String, usize>,
    slots: Vec<VolumeRing>,
    max_instruments: usize,
    window: usize,
}

impl VolumeHistory {
    pub fn new(max_instruments: usize, window: usize) -> Self {
        Self {
            index: HashMap::new(),
            slots: Vec::new(),
            max_instruments,
            window: window.max(1),
        }
    }

    /// Number of instruments with a slot.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Copy of an instrument's stored points, oldest first.
    pub fn snapshot(&self, symbol: &str) -> Vec<VolumePoint> {
        self.index
            .get(symbol)
            .map(|&i| self.slots[i].points.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Append the candles newer than the last stored point.
    ///
    /// Returns the number of points appended. When the arena is full a new
    /// instrument gets no slot and nothing is recorded.
    pub fn record(&mut self, symbol: &str, candles: &[Candle]) -> usize {
        let slot = match self.index.get(symbol) {
            Some(&i) => i,
            None => {
                if self.slots.len() >= self.max_instruments {
                    debug!(symbol, capacity = self.max_instruments, "History arena full, not tracking");
                    return 0;
                }
                self.slots.push(VolumeRing::new(self.window));
                let i = self.slots.len() - 1;
                self.index.insert(symbol.to_string(), i);
                i
            }
        };

        let ring = &mut self.slots[slot];
        let last = ring.last_time();
        let mut appended = 0;
        for c in candles {
            if last.map_or(true, |t| c.open_time > t) {
                ring.push((c.open_time, c.volume));
                appended += 1;
            }
        }
        appended
    }
}
