//! Decode results to detection state.
//!
//! Results only ever land here; the render loop reads the state synchronously
//! on its own tick.

use flume::Receiver;
use tracing::{debug, trace};

use crate::worker::{Corners, DecodeResult, WorkerEvent};

/// Share of the screen width a code must span to count as close enough
const ACCEPTABLE_WIDTH_RATIO: f32 = 0.6;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectionState {
    pub current_code: Option<String>,
    pub previous_code: Option<String>,
    pub is_detected: bool,
}

#[derive(Debug, Default)]
pub struct Reconciler {
    state: DetectionState,
    location: Option<Corners>,
    last_seq: u64,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &DetectionState {
        &self.state
    }

    /// Apply one result. Results older than the last applied one are ignored.
    pub fn apply(&mut self, seq: u64, result: DecodeResult) -> bool {
        if seq <= self.last_seq {
            trace!(seq, last = self.last_seq, "stale decode result ignored");
            return false;
        }
        self.last_seq = seq;

        match result {
            DecodeResult::Code { payload, location } => {
                if self.state.current_code.as_deref() == Some(payload.as_str()) {
                    // Re-confirmation: the edge has been seen
                    self.state.previous_code = self.state.current_code.clone();
                } else {
                    debug!(code = %payload, "new code detected");
                    self.state.previous_code = self.state.current_code.replace(payload);
                }
                self.location = Some(location);
                self.state.is_detected = true;
            }
            DecodeResult::NoCode => {
                self.state.is_detected = false;
                self.location = None;
            }
        }
        true
    }

    /// Apply every queued worker event. With `accept` false the events are
    /// consumed and discarded. Returns the number applied.
    pub fn drain(&mut self, events: &Receiver<WorkerEvent>, accept: bool) -> usize {
        let mut applied = 0;
        for event in events.try_iter() {
            let Some((seq, result)) = event.into_result() else {
                continue;
            };
            if accept && self.apply(seq, result) {
                applied += 1;
            }
        }
        applied
    }

    pub fn is_new(&self) -> bool {
        self.state.is_detected && self.state.current_code != self.state.previous_code
    }

    pub fn active_code(&self) -> Option<&str> {
        if self.state.is_detected {
            self.state.current_code.as_deref()
        } else {
            None
        }
    }

    pub fn previous_code(&self) -> Option<&str> {
        self.state.previous_code.as_deref()
    }

    pub fn is_detected(&self) -> bool {
        self.state.is_detected
    }

    pub fn location(&self) -> Option<&Corners> {
        self.location.as_ref()
    }

    /// Width in pixels of the detected code's top edge.
    pub fn pixel_width(&self) -> Option<f32> {
        if !self.state.is_detected {
            return None;
        }
        self.location
            .map(|c| c.top_left_corner.distance(&c.top_right_corner))
    }

    pub fn acceptable_range(&self, screen_width: u32) -> bool {
        self.pixel_width()
            .map_or(false, |w| w > screen_width as f32 * ACCEPTABLE_WIDTH_RATIO)
    }
}
