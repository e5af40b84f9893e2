//! V4L2 camera acquisition

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{info, instrument, warn};
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use super::CameraSource;
use crate::{
    capture::frame::{FrameMetadata, PixelFormat, RawFrame},
    error::CaptureError,
    utils::FoundDevice,
    CaptureConfig,
};

/// Memory-mapped V4L2 capture
pub struct V4l2Capture {
    device: Box<Device>,
    stream: Option<MmapStream<'static>>,
    path: String,
    width: u32,
    height: u32,
    stride: u32,
    format: PixelFormat,
    buffer_count: u32,
    sequence: u64,
}

impl V4l2Capture {
    /// Open `found` and negotiate the ideal resolution from `config`.
    ///
    /// The driver may settle on a different size; the negotiated size is what
    /// frames report.
    pub fn open(found: &FoundDevice, config: &CaptureConfig) -> Result<Self, CaptureError> {
        info!("Opening V4L2 camera: {:?}", found);

        let device = Device::with_path(&found.path)?;

        let caps = device.query_caps()?;
        info!("Device: {} ({})", caps.card, caps.driver);

        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            return Err(CaptureError::NotACaptureDevice(found.path.clone()));
        }

        let mut fmt = device.format()?;
        fmt.width = config.width;
        fmt.height = config.height;
        fmt.fourcc = fourcc(found.format);

        let fmt = device.set_format(&fmt)?;
        if fmt.width != config.width || fmt.height != config.height {
            warn!(
                "Camera negotiated {}x{} instead of ideal {}x{}",
                fmt.width, fmt.height, config.width, config.height
            );
        }

        match device.set_params(&Parameters::with_fps(config.fps)) {
            Ok(params) => info!("Camera interval {}", params.interval),
            Err(e) => warn!("Could not request {} fps: {}", config.fps, e),
        }

        Ok(Self {
            device: Box::new(device),
            stream: None,
            path: found.path.clone(),
            width: fmt.width,
            height: fmt.height,
            stride: fmt.stride,
            format: found.format,
            buffer_count: config.buffer_count,
            sequence: 0,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

impl CameraSource for V4l2Capture {
    fn start(&mut self) -> Result<(), CaptureError> {
        let stream = MmapStream::with_buffers(&self.device, Type::VideoCapture, self.buffer_count)?;

        self.stream = Some(stream);
        info!("Capture stream started with {} buffers", self.buffer_count);
        Ok(())
    }

    #[instrument(skip(self), fields(path = %self.path))]
    fn capture_frame(&mut self) -> Result<RawFrame, CaptureError> {
        let timestamp = Instant::now();

        let stream = self.stream.as_mut().ok_or(CaptureError::StreamNotStarted)?;

        let (buf, meta) = stream.next()?;
        let used = (meta.bytesused as usize).min(buf.len());
        let data = Bytes::copy_from_slice(&buf[..used]);

        self.sequence += 1;

        Ok(RawFrame {
            data,
            meta: Arc::new(FrameMetadata {
                sequence: self.sequence,
                width: self.width,
                height: self.height,
                stride: self.stride,
                format: self.format,
                device_timestamp: Some(
                    Duration::from_secs(meta.timestamp.sec as u64)
                        + Duration::from_micros(meta.timestamp.usec as u64),
                ),
            }),
            timestamp,
        })
    }
}

pub(crate) fn fourcc(format: PixelFormat) -> FourCC {
    match format {
        PixelFormat::Mjpeg => FourCC::new(b"MJPG"),
        PixelFormat::Yuyv4 => FourCC::new(b"YUYV"),
        PixelFormat::Rgb24 => FourCC::new(b"RGB3"),
        PixelFormat::Bgr24 => FourCC::new(b"BGR3"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fourcc_matches_v4l2_codes() {
        assert_eq!(fourcc(PixelFormat::Mjpeg), FourCC::new(b"MJPG"));
        assert_eq!(fourcc(PixelFormat::Yuyv4), FourCC::new(b"YUYV"));
        assert_eq!(fourcc(PixelFormat::Rgb24), FourCC::new(b"RGB3"));
    }
}
