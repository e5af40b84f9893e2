//! Tracking session backed directly by the capture loop.
//!
//! There is no pose engine here: the whole camera view stands in as the
//! anchor, so the anchor is visible whenever tracking runs and it carries no
//! orientation of its own.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use flume::Sender;
use nalgebra::Quaternion;
use tracing::{info, warn};

use crate::capture::CaptureControl;
use crate::pipeline::Tracker;

pub struct CameraTracker {
    video_ready: Arc<AtomicBool>,
    control: Sender<CaptureControl>,
    can_switch: bool,
    running: bool,
}

impl CameraTracker {
    pub fn new(video_ready: Arc<AtomicBool>, control: Sender<CaptureControl>, can_switch: bool) -> Self {
        Self {
            video_ready,
            control,
            can_switch,
            running: false,
        }
    }
}

impl Tracker for CameraTracker {
    fn start(&mut self) {
        info!("Tracking started");
        self.running = true;
    }

    fn stop(&mut self) {
        if !self.running {
            return;
        }
        self.running = false;
        if self.control.send(CaptureControl::Stop).is_err() {
            warn!("Capture loop already gone");
        }
        info!("Tracking stopped");
    }

    fn is_running(&self) -> bool {
        self.running
    }

    fn video_ready(&self) -> bool {
        self.running && self.video_ready.load(Ordering::Acquire)
    }

    fn anchor_visible(&self) -> bool {
        self.running
    }

    fn anchor_orientation(&self) -> Option<Quaternion<f64>> {
        None
    }

    fn switch_camera(&mut self) {
        if !self.can_switch {
            warn!("Only one camera available");
            return;
        }
        if self.control.send(CaptureControl::SwitchCamera).is_err() {
            warn!("Capture loop gone, cannot switch camera");
        }
    }
}
