//! Off-thread QR decoding.
//!
//! The worker owns its own surface and talks to the pipeline only through
//! [`WorkerRequest`] and [`WorkerEvent`] messages.

pub mod decoder_worker;
pub mod protocol;
pub mod qr;

pub use decoder_worker::{spawn, DecoderWorker, WorkerHandle};
pub use protocol::{Corners, DecodeRequest, DecodeResult, Point, WorkerEvent, WorkerRequest};
pub use qr::{Detection, QrDecoder, RqrrDecoder};
