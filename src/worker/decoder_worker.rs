use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use flume::{Receiver, RecvTimeoutError, Sender};
use tracing::{debug, info, instrument, warn};

use super::protocol::{DecodeRequest, WorkerEvent, WorkerRequest};
use super::qr::QrDecoder;
use crate::compositor::{Rect, Surface};
use crate::error::{DecodeError, WorkerError};

/// Largest surface side the worker will allocate
pub const MAX_SURFACE_DIMENSION: u32 = 8192;

/// Frame requests that may wait while the worker is decoding
const REQUEST_QUEUE: usize = 1;

fn surface_size_ok(width: u32, height: u32) -> bool {
    (1..=MAX_SURFACE_DIMENSION).contains(&width) && (1..=MAX_SURFACE_DIMENSION).contains(&height)
}

/// Worker-side state: a private drawing surface and the decoder.
///
/// Exactly one reply is sent for each frame request. Decoding failures of any
/// kind, panics included, are reported as `no code`.
pub struct DecoderWorker<D: QrDecoder> {
    decoder: D,
    surface: Option<Surface>,
    events: Sender<WorkerEvent>,
}

impl<D: QrDecoder> DecoderWorker<D> {
    pub fn new(decoder: D, events: Sender<WorkerEvent>) -> Self {
        Self {
            decoder,
            surface: None,
            events,
        }
    }

    /// Serve requests until shutdown or until either channel closes.
    pub fn run(mut self, requests: Receiver<WorkerRequest>) {
        info!("Decoder worker started");
        while let Ok(request) = requests.recv() {
            match self.handle(request) {
                Ok(true) => {}
                Ok(false) => break,
                Err(_) => {
                    debug!("Pipeline dropped the event channel");
                    break;
                }
            }
        }
        info!("Decoder worker stopped");
    }

    /// Returns `Ok(false)` on shutdown.
    fn handle(&mut self, request: WorkerRequest) -> Result<bool, flume::SendError<WorkerEvent>> {
        match request {
            WorkerRequest::Init { surface } => {
                debug!("Worker surface {}x{}", surface.width(), surface.height());
                self.surface = Some(surface);
                self.events.send(WorkerEvent::Ready)?;
            }
            WorkerRequest::Frame(request) => {
                let event = self.handle_frame(request);
                self.events.send(event)?;
            }
            WorkerRequest::Resize { width, height } => {
                if !surface_size_ok(width, height) {
                    warn!("Ignoring resize to {}x{}", width, height);
                } else if let Some(surface) = self.surface.as_mut() {
                    surface.resize(width, height);
                }
            }
            WorkerRequest::Shutdown => return Ok(false),
        }
        Ok(true)
    }

    #[instrument(skip(self, request), fields(seq = request.seq))]
    fn handle_frame(&mut self, request: DecodeRequest) -> WorkerEvent {
        let DecodeRequest {
            seq,
            bitmap,
            width,
            height,
        } = request;

        let Some(surface) = self.surface.as_mut() else {
            warn!("Frame received before init, dropping");
            bitmap.close();
            return WorkerEvent::NoCode { seq };
        };

        let start = Instant::now();
        let decoder = &mut self.decoder;
        let outcome = if surface_size_ok(width, height) {
            // Raster and decode share one guard: a panic in either is a miss
            catch_unwind(AssertUnwindSafe(|| {
                surface.resize(width, height);
                surface.reset_transform();
                surface.draw_image(&bitmap, Rect::new(0.0, 0.0, width as f64, height as f64));
                decoder.decode(surface.as_rgba(), width, height)
            }))
            .unwrap_or_else(|panic| Err(DecodeError::Panicked(panic_message(panic))))
        } else {
            Err(DecodeError::SurfaceSize { width, height })
        };
        bitmap.close();

        metrics::histogram!("decode_time_us").record(start.elapsed().as_micros() as f64);

        match outcome {
            Ok(Some(detection)) => {
                metrics::counter!("decode_results", "kind" => "code").increment(1);
                debug!(code = %detection.payload, "Code decoded");
                WorkerEvent::Code {
                    seq,
                    code: detection.payload,
                    location: detection.location,
                }
            }
            Ok(None) => {
                metrics::counter!("decode_results", "kind" => "no_code").increment(1);
                WorkerEvent::NoCode { seq }
            }
            Err(e) => {
                metrics::counter!("decode_results", "kind" => "error").increment(1);
                warn!("Decode failed: {}", e);
                WorkerEvent::NoCode { seq }
            }
        }
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Pipeline-side handle to a running decoder worker.
///
/// Dropping the handle shuts the worker down and joins its thread.
pub struct WorkerHandle {
    requests: Sender<WorkerRequest>,
    events: Receiver<WorkerEvent>,
    thread: Option<JoinHandle<()>>,
}

/// Start a decoder worker on its own named thread.
pub fn spawn<D: QrDecoder>(decoder: D) -> Result<WorkerHandle, WorkerError> {
    let (request_tx, request_rx) = flume::bounded(REQUEST_QUEUE);
    let (event_tx, event_rx) = flume::unbounded();

    let thread = std::thread::Builder::new()
        .name("decoder-worker".into())
        .spawn(move || DecoderWorker::new(decoder, event_tx).run(request_rx))
        .map_err(WorkerError::Spawn)?;

    Ok(WorkerHandle {
        requests: request_tx,
        events: event_rx,
        thread: Some(thread),
    })
}

impl WorkerHandle {
    pub fn sender(&self) -> Sender<WorkerRequest> {
        self.requests.clone()
    }

    pub fn events(&self) -> &Receiver<WorkerEvent> {
        &self.events
    }

    pub fn send(&self, request: WorkerRequest) -> Result<(), WorkerError> {
        self.requests
            .send(request)
            .map_err(|_| WorkerError::Disconnected)
    }

    /// Hand the worker its surface and block until it reports ready.
    pub fn init(&self, surface: Surface, timeout: Duration) -> Result<(), WorkerError> {
        self.send(WorkerRequest::Init { surface })?;

        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.events.recv_timeout(remaining) {
                Ok(WorkerEvent::Ready) => {
                    info!("Decoder worker ready");
                    return Ok(());
                }
                Ok(other) => debug!("Discarding {:?} while waiting for ready", other),
                Err(RecvTimeoutError::Timeout) => return Err(WorkerError::ReadyTimeout(timeout)),
                Err(RecvTimeoutError::Disconnected) => return Err(WorkerError::Disconnected),
            }
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        if self.requests.send(WorkerRequest::Shutdown).is_err() {
            debug!("Decoder worker already stopped");
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Decoder worker thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::Frame;
    use crate::worker::qr::{tests::qr_rgba, Detection, RqrrDecoder};

    const WAIT: Duration = Duration::from_secs(5);

    fn request(seq: u64, rgba: Vec<u8>, size: u32) -> WorkerRequest {
        WorkerRequest::Frame(DecodeRequest {
            seq,
            bitmap: Frame::from_rgba(size, size, rgba).unwrap(),
            width: size,
            height: size,
        })
    }

    #[test]
    fn blank_frame_yields_no_code() {
        let worker = spawn(RqrrDecoder::new()).unwrap();
        worker.init(Surface::new(1, 1), WAIT).unwrap();

        worker.send(request(1, vec![255; 32 * 32 * 4], 32)).unwrap();
        let event = worker.events().recv_timeout(WAIT).unwrap();
        assert_eq!(event, WorkerEvent::NoCode { seq: 1 });
    }

    #[test]
    fn rendered_code_is_decoded() {
        let worker = spawn(RqrrDecoder::new()).unwrap();
        worker.init(Surface::new(1, 1), WAIT).unwrap();

        let (rgba, size) = qr_rgba("L001-Z001-M002", 5);
        worker.send(request(7, rgba, size)).unwrap();

        match worker.events().recv_timeout(WAIT).unwrap() {
            WorkerEvent::Code { seq, code, .. } => {
                assert_eq!(seq, 7);
                assert_eq!(code, "L001-Z001-M002");
            }
            other => panic!("expected code, got {:?}", other),
        }
    }

    struct PanickingDecoder;

    impl QrDecoder for PanickingDecoder {
        fn decode(&mut self, _: &[u8], _: u32, _: u32) -> Result<Option<Detection>, DecodeError> {
            panic!("decoder blew up");
        }
    }

    #[test]
    fn decoder_panic_becomes_no_code() {
        let worker = spawn(PanickingDecoder).unwrap();
        worker.init(Surface::new(1, 1), WAIT).unwrap();

        worker.send(request(2, vec![0; 16], 2)).unwrap();
        worker.send(request(3, vec![0; 16], 2)).unwrap();
        assert_eq!(
            worker.events().recv_timeout(WAIT).unwrap(),
            WorkerEvent::NoCode { seq: 2 }
        );
        // Still serving after the panic
        assert_eq!(
            worker.events().recv_timeout(WAIT).unwrap(),
            WorkerEvent::NoCode { seq: 3 }
        );
    }

    #[test]
    fn oversized_request_is_no_code_and_worker_keeps_serving() {
        let worker = spawn(RqrrDecoder::new()).unwrap();
        worker.init(Surface::new(1, 1), WAIT).unwrap();

        worker
            .send(WorkerRequest::Frame(DecodeRequest {
                seq: 1,
                bitmap: Frame::from_rgba(2, 2, vec![0u8; 16]).unwrap(),
                width: u32::MAX,
                height: u32::MAX,
            }))
            .unwrap();
        assert_eq!(
            worker.events().recv_timeout(WAIT).unwrap(),
            WorkerEvent::NoCode { seq: 1 }
        );

        worker
            .send(WorkerRequest::Resize {
                width: 0,
                height: u32::MAX,
            })
            .unwrap();

        let (rgba, size) = qr_rgba("L001-Z001-M002", 5);
        worker.send(request(2, rgba, size)).unwrap();
        match worker.events().recv_timeout(WAIT).unwrap() {
            WorkerEvent::Code { seq, code, .. } => {
                assert_eq!(seq, 2);
                assert_eq!(code, "L001-Z001-M002");
            }
            other => panic!("expected code, got {:?}", other),
        }
    }

    #[test]
    fn frame_before_init_is_no_code_and_resize_is_silent() {
        let (event_tx, event_rx) = flume::unbounded();
        let mut worker = DecoderWorker::new(RqrrDecoder::new(), event_tx);

        assert!(worker.handle(request(1, vec![0; 16], 2)).unwrap());
        assert_eq!(event_rx.try_recv().unwrap(), WorkerEvent::NoCode { seq: 1 });

        assert!(worker
            .handle(WorkerRequest::Resize {
                width: 10,
                height: 10
            })
            .unwrap());
        assert!(event_rx.try_recv().is_err());

        assert!(!worker.handle(WorkerRequest::Shutdown).unwrap());
    }
}
