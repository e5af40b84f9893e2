//! Camera frames onto the display surface, throttled samples to the decoder

use std::time::Instant;

use flume::{Sender, TrySendError};
use tracing::{debug, info, instrument, warn};

use super::ringbuf::FrameRingBuffer;
use super::timing::TimingRef;
use crate::capture::Frame;
use crate::compositor::{Compositor, Surface};
use crate::worker::{DecodeRequest, WorkerRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpState {
    Processing,
    Paused,
    Ended,
}

/// Whether the pump wants to be called again for the next camera frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rearm {
    Continue,
    Stop,
}

/// Moves camera frames onto the display surface and, at a throttled rate,
/// snapshots of that surface to the decoder worker.
pub struct FramePump {
    compositor: Compositor,
    surface: Surface,
    worker: Sender<WorkerRequest>,
    timing: TimingRef,
    pending: FrameRingBuffer,
    state: PumpState,
    next_seq: u64,
}

impl FramePump {
    pub fn new(
        compositor: Compositor,
        surface: Surface,
        worker: Sender<WorkerRequest>,
        timing: TimingRef,
        ring_capacity: usize,
    ) -> Self {
        Self {
            compositor,
            surface,
            worker,
            timing,
            pending: FrameRingBuffer::new(ring_capacity),
            state: PumpState::Processing,
            next_seq: 1,
        }
    }

    pub fn state(&self) -> PumpState {
        self.state
    }

    pub fn is_processing(&self) -> bool {
        self.state == PumpState::Processing
    }

    pub fn surface(&self) -> &Surface {
        &self.surface
    }

    pub fn pending(&self) -> &FrameRingBuffer {
        &self.pending
    }

    /// Queue a converted camera frame. Frames arriving while not processing
    /// are released immediately.
    pub fn enqueue(&mut self, frame: Frame) {
        if self.is_processing() {
            self.pending.push(frame);
        } else {
            frame.close();
        }
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// One camera-frame callback: composite the newest frame, then sample
    /// the surface for decoding if the interval has elapsed.
    #[instrument(skip(self), level = "trace")]
    pub fn on_camera_frame(&mut self, now: Instant) -> Rearm {
        if !self.is_processing() {
            debug!("Pump not processing ({:?}), not re-arming", self.state);
            return Rearm::Stop;
        }

        if let Some(frame) = self.pending.pop_latest() {
            if self.compositor.composite(&frame, &mut self.surface).is_some() {
                metrics::counter!("frames_composited").increment(1);
                let latency = now.saturating_duration_since(frame.timestamp);
                metrics::histogram!("frame_latency_ms").record(latency.as_millis() as f64);
            }
            frame.close();
        }

        self.trigger_sample(now);
        Rearm::Continue
    }

    /// Send a snapshot of the surface to the worker if the sample interval
    /// has elapsed. Returns whether a request was sent.
    pub fn trigger_sample(&mut self, now: Instant) -> bool {
        if !self.is_processing() || self.surface.is_empty() {
            return false;
        }
        if !self.timing.should_sample(now) {
            return false;
        }

        let seq = self.next_seq;
        if self.worker.is_full() {
            debug!("Decoder busy, sample {} skipped", seq);
            metrics::counter!("frames_dropped", "reason" => "worker_busy").increment(1);
            return false;
        }

        let (width, height) = self.surface.size();
        let request = WorkerRequest::Frame(DecodeRequest {
            seq,
            bitmap: self.surface.snapshot().with_sequence(seq),
            width,
            height,
        });

        match self.worker.try_send(request) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                debug!("Decoder busy, sample {} skipped", seq);
                metrics::counter!("frames_dropped", "reason" => "worker_busy").increment(1);
                return false;
            }
            Err(TrySendError::Disconnected(_)) => {
                warn!("Decoder worker gone, sample {} dropped", seq);
                return false;
            }
        }
        self.next_seq += 1;
        metrics::counter!("decode_requests_sent").increment(1);
        true
    }

    /// Resize the display surface and forward the new size to the worker.
    pub fn resize(&mut self, width: u32, height: u32) {
        if self.surface.size() == (width, height) {
            return;
        }
        info!("Surface resized to {}x{}", width, height);
        self.surface.resize(width, height);
        match self.worker.try_send(WorkerRequest::Resize { width, height }) {
            Ok(()) => {}
            // Every sample carries its own size
            Err(TrySendError::Full(_)) => debug!("Decoder busy, resize carried by next sample"),
            Err(TrySendError::Disconnected(_)) => warn!("Decoder worker gone, resize not forwarded"),
        }
    }

    /// Resume after a pause. Returns true when the caller must re-arm the
    /// frame callback chain.
    pub fn play(&mut self) -> bool {
        match self.state {
            PumpState::Paused => {
                info!("Frame pump resumed");
                self.state = PumpState::Processing;
                true
            }
            PumpState::Processing | PumpState::Ended => false,
        }
    }

    pub fn pause(&mut self) {
        if self.state == PumpState::Processing {
            info!("Frame pump paused");
            self.state = PumpState::Paused;
            self.pending.clear();
        }
    }

    /// Terminal; no further frames are processed.
    pub fn end(&mut self) {
        if self.state != PumpState::Ended {
            info!("Frame pump ended");
            self.state = PumpState::Ended;
            self.pending.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compositor::{FitMode, RotateDirection};
    use std::time::Duration;

    fn solid(width: u32, height: u32) -> Frame {
        Frame::from_rgba(width, height, vec![200u8; (width * height * 4) as usize]).unwrap()
    }

    fn pump(t0: Instant) -> (FramePump, flume::Receiver<WorkerRequest>) {
        let (tx, rx) = flume::unbounded();
        let pump = FramePump::new(
            Compositor::new(RotateDirection::Right, FitMode::Cover),
            Surface::new(72, 128),
            tx,
            TimingRef::new(Duration::from_millis(300), t0),
            2,
        );
        (pump, rx)
    }

    #[test]
    fn two_triggers_within_interval_send_one_request() {
        let t0 = Instant::now();
        let (mut pump, rx) = pump(t0);

        assert!(pump.trigger_sample(t0 + Duration::from_millis(400)));
        assert!(!pump.trigger_sample(t0 + Duration::from_millis(600)));
        assert_eq!(rx.drain().count(), 1);
    }

    #[test]
    fn sample_is_the_composited_surface() {
        let t0 = Instant::now();
        let (mut pump, rx) = pump(t0);

        pump.enqueue(solid(128, 72));
        assert_eq!(
            pump.on_camera_frame(t0 + Duration::from_millis(301)),
            Rearm::Continue
        );

        match rx.try_recv().unwrap() {
            WorkerRequest::Frame(req) => {
                assert_eq!(req.seq, 1);
                assert_eq!((req.width, req.height), (72, 128));
                assert_eq!(req.bitmap.pixel(10, 10), [200, 200, 200, 200]);
            }
            other => panic!("unexpected request {:?}", other),
        }
        assert!(!pump.has_pending());
    }

    #[test]
    fn paused_pump_stops_and_releases_frames() {
        let t0 = Instant::now();
        let (mut pump, rx) = pump(t0);

        pump.enqueue(solid(4, 4));
        pump.pause();
        assert!(!pump.has_pending());

        pump.enqueue(solid(4, 4));
        assert!(!pump.has_pending());
        assert_eq!(pump.on_camera_frame(t0 + Duration::from_secs(1)), Rearm::Stop);
        assert!(rx.try_recv().is_err());

        assert!(pump.play());
        assert_eq!(pump.on_camera_frame(t0 + Duration::from_secs(1)), Rearm::Continue);
    }

    #[test]
    fn busy_worker_skips_the_sample() {
        let t0 = Instant::now();
        let (tx, rx) = flume::bounded(1);
        let mut pump = FramePump::new(
            Compositor::default(),
            Surface::new(8, 8),
            tx,
            TimingRef::new(Duration::from_millis(300), t0),
            2,
        );

        assert!(pump.trigger_sample(t0 + Duration::from_millis(301)));
        // Worker still holds the first request
        assert!(!pump.trigger_sample(t0 + Duration::from_millis(700)));
        assert_eq!(rx.len(), 1);

        match rx.try_recv().unwrap() {
            WorkerRequest::Frame(req) => assert_eq!(req.seq, 1),
            other => panic!("unexpected request {:?}", other),
        }
        assert!(pump.trigger_sample(t0 + Duration::from_millis(1100)));
        match rx.try_recv().unwrap() {
            WorkerRequest::Frame(req) => assert_eq!(req.seq, 2),
            other => panic!("unexpected request {:?}", other),
        }
    }

    #[test]
    fn ended_pump_cannot_resume() {
        let (mut pump, _rx) = pump(Instant::now());
        pump.end();
        assert!(!pump.play());
        assert_eq!(pump.state(), PumpState::Ended);
    }

    #[test]
    fn resize_is_forwarded_once() {
        let (mut pump, rx) = pump(Instant::now());
        pump.resize(1280, 720);
        pump.resize(1280, 720);

        let resizes: Vec<_> = rx.drain().collect();
        assert_eq!(resizes.len(), 1);
        assert!(matches!(
            resizes[0],
            WorkerRequest::Resize {
                width: 1280,
                height: 720
            }
        ));
        assert_eq!(pump.surface().size(), (1280, 720));
    }
}
