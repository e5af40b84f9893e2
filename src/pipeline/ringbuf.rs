//! Drop-oldest ring of camera frames awaiting the next pump tick

use ringbuf::traits::{Consumer, Observer, RingBuffer};
use ringbuf::HeapRb;
use tracing::trace;

use crate::capture::Frame;

/// Bounded frame queue; pushing onto a full ring releases the oldest frame
pub struct FrameRingBuffer {
    ring: HeapRb<Frame>,
    stats: RingStats,
}

/// Frame counters since creation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RingStats {
    pub written: usize,
    pub read: usize,
    pub dropped: usize,
}

impl FrameRingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: HeapRb::new(capacity.max(1)),
            stats: RingStats::default(),
        }
    }

    pub fn push(&mut self, frame: Frame) {
        if let Some(oldest) = self.ring.push_overwrite(frame) {
            trace!(sequence = oldest.sequence, "ring full, dropping oldest frame");
            oldest.close();
            self.stats.dropped += 1;
            metrics::counter!("frames_dropped", "reason" => "ring_full").increment(1);
        }
        self.stats.written += 1;
    }

    pub fn pop(&mut self) -> Option<Frame> {
        let frame = self.ring.try_pop()?;
        self.stats.read += 1;
        Some(frame)
    }

    /// Newest frame; everything older is released and counted as dropped.
    pub fn pop_latest(&mut self) -> Option<Frame> {
        let mut latest = self.ring.try_pop()?;
        while let Some(newer) = self.ring.try_pop() {
            trace!(sequence = latest.sequence, "stale frame skipped");
            latest.close();
            self.stats.dropped += 1;
            metrics::counter!("frames_dropped", "reason" => "stale").increment(1);
            latest = newer;
        }
        self.stats.read += 1;
        Some(latest)
    }

    /// Release every queued frame.
    pub fn clear(&mut self) -> usize {
        let mut released = 0;
        while let Some(frame) = self.ring.try_pop() {
            frame.close();
            released += 1;
        }
        released
    }

    pub fn len(&self) -> usize {
        self.ring.occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    pub fn stats(&self) -> RingStats {
        self.stats
    }
}
