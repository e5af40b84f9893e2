//! Main-thread owner tying the pump, reconciler, coordinator and worker together

use std::time::Instant;

use tracing::info;

use super::coordinator::{Coordinator, Renderer, TickOutcome, Tracker};
use super::pump::{FramePump, Rearm};
use super::reconciler::Reconciler;
use crate::capture::Frame;
use crate::worker::WorkerHandle;

/// Main-thread owner of one running pipeline.
///
/// Two wake-up points: [`Session::on_camera_frame`] when the camera delivers,
/// [`Session::on_refresh`] once per display refresh. Neither blocks.
pub struct Session<T: Tracker> {
    pump: FramePump,
    reconciler: Reconciler,
    coordinator: Coordinator,
    tracker: T,
    worker: WorkerHandle,
    armed: bool,
}

impl<T: Tracker> Session<T> {
    pub fn new(pump: FramePump, coordinator: Coordinator, mut tracker: T, worker: WorkerHandle) -> Self {
        tracker.start();
        Self {
            pump,
            reconciler: Reconciler::new(),
            coordinator,
            tracker,
            worker,
            armed: true,
        }
    }

    pub fn pump(&self) -> &FramePump {
        &self.pump
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    pub fn tracker(&self) -> &T {
        &self.tracker
    }

    /// Whether camera frames are currently being pumped
    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn on_camera_frame(&mut self, frame: Frame, now: Instant) {
        self.on_camera_frames(std::iter::once(frame), now);
    }

    /// Every camera frame that arrived since the last call. All are queued
    /// in the ring, then only the newest is composited.
    pub fn on_camera_frames(&mut self, frames: impl IntoIterator<Item = Frame>, now: Instant) {
        let mut arrived = 0usize;
        for frame in frames {
            arrived += 1;
            if self.armed {
                self.pump.enqueue(frame);
            } else {
                frame.close();
            }
        }
        if !self.armed || arrived == 0 {
            return;
        }
        if self.pump.on_camera_frame(now) == Rearm::Stop {
            self.armed = false;
        }
    }

    /// Collect worker results, then run one coordinator tick.
    pub fn on_refresh(
        &mut self,
        now: Instant,
        renderer: &mut dyn Renderer,
    ) -> color_eyre::Result<TickOutcome> {
        let accept = self.pump.is_processing();
        self.reconciler.drain(self.worker.events(), accept);

        self.coordinator.tick(
            now,
            &mut self.pump,
            &self.reconciler,
            &mut self.tracker,
            renderer,
        )
    }

    /// Visibility change of the output window.
    pub fn set_hidden(&mut self, hidden: bool) {
        if hidden {
            info!("Output hidden, pausing");
            self.coordinator.pause();
            self.pump.pause();
        } else {
            info!("Output visible, resuming");
            self.coordinator.resume();
            if self.pump.play() {
                self.armed = true;
            }
        }
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.pump.resize(width, height);
    }

    pub fn switch_camera(&mut self) {
        self.tracker.switch_camera();
    }

    /// Stop tracking and the pump; the worker shuts down when the session drops.
    pub fn shutdown(mut self) {
        self.pump.end();
        self.tracker.stop();
        info!("Session shut down");
    }
}
