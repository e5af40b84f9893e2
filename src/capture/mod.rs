pub mod decoder;
pub mod frame;
pub mod v4l2;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use flume::{Receiver, Sender, TryRecvError};
use tracing::{error, info, warn};

pub use frame::{Frame, Orientation, PixelFormat, RawFrame};
pub use v4l2::V4l2Capture;

use crate::error::CaptureError;
use crate::utils::{CameraSet, Facing, FoundDevice};

/// A live camera delivering raw buffers at its own cadence
pub trait CameraSource: Send {
    fn start(&mut self) -> Result<(), CaptureError>;

    /// Block until the next buffer is available.
    fn capture_frame(&mut self) -> Result<RawFrame, CaptureError>;
}

/// Requests from the UI thread to the capture loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureControl {
    SwitchCamera,
    Stop,
}

/// How a capture loop ended
#[derive(Debug, PartialEq, Eq)]
pub enum CaptureExit {
    Stopped,
    ConsumerGone,
}

/// Blocking camera loop: dequeue, convert to bitmap, forward.
///
/// Conversion failures drop the frame and continue. Acquisition failures
/// (opening or starting a camera) end the loop with an error.
pub struct CaptureLoop<C, F>
where
    C: CameraSource,
    F: FnMut(&FoundDevice) -> Result<C, CaptureError>,
{
    open: F,
    cameras: CameraSet,
    facing: Facing,
    frames: Sender<Frame>,
    control: Receiver<CaptureControl>,
    video_ready: Arc<AtomicBool>,
    max_consecutive_errors: u32,
}

impl<C, F> CaptureLoop<C, F>
where
    C: CameraSource,
    F: FnMut(&FoundDevice) -> Result<C, CaptureError>,
{
    pub fn new(
        open: F,
        cameras: CameraSet,
        facing: Facing,
        frames: Sender<Frame>,
        control: Receiver<CaptureControl>,
        video_ready: Arc<AtomicBool>,
    ) -> Self {
        Self {
            open,
            cameras,
            facing,
            frames,
            control,
            video_ready,
            max_consecutive_errors: 30,
        }
    }

    pub fn run(mut self, first: Option<C>) -> Result<CaptureExit, CaptureError> {
        let mut camera = match first {
            Some(camera) => camera,
            None => self.open_started()?,
        };
        let mut consecutive_errors = 0;

        loop {
            match self.control.try_recv() {
                Ok(CaptureControl::Stop) | Err(TryRecvError::Disconnected) => {
                    info!("Capture loop stopping");
                    return Ok(CaptureExit::Stopped);
                }
                Ok(CaptureControl::SwitchCamera) => {
                    if self.cameras.can_switch() {
                        self.video_ready.store(false, Ordering::Release);
                        drop(camera);
                        self.facing = self.facing.flipped();
                        info!("Switching to {:?} camera", self.facing);
                        camera = self.open_started()?;
                    } else {
                        warn!("Only one camera available, ignoring switch");
                    }
                }
                Err(TryRecvError::Empty) => {}
            }

            let raw = match camera.capture_frame() {
                Ok(raw) => {
                    consecutive_errors = 0;
                    raw
                }
                Err(e) => {
                    consecutive_errors += 1;
                    error!("Capture error: {}", e);
                    if consecutive_errors >= self.max_consecutive_errors {
                        return Err(e);
                    }
                    std::thread::sleep(Duration::from_millis(10));
                    continue;
                }
            };

            let frame = match decoder::to_bitmap(&raw) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!("Dropping frame {}: {}", raw.meta.sequence, e);
                    metrics::counter!("frames_dropped", "reason" => "conversion").increment(1);
                    continue;
                }
            };

            self.video_ready.store(true, Ordering::Release);
            if self.frames.send(frame).is_err() {
                return Ok(CaptureExit::ConsumerGone);
            }
        }
    }

    fn open_started(&mut self) -> Result<C, CaptureError> {
        let device = self.cameras.get(self.facing).clone();
        let mut camera = (self.open)(&device)?;
        camera.start()?;
        Ok(camera)
    }
}
