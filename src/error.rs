//! Error taxonomy for the wayfinding pipeline

use std::time::Duration;

use thiserror::Error;
use tracing::error;

/// Camera capability, acquisition and per-frame conversion failures
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("no video capture device found")]
    NoDevice,

    #[error("device {0} does not support video capture")]
    NotACaptureDevice(String),

    #[error("unsupported pixel format: {0:?}")]
    UnsupportedFormat(crate::PixelFormat),

    #[error("camera stream not started")]
    StreamNotStarted,

    #[error("frame buffer holds {actual} bytes, expected {expected}")]
    BufferSize { expected: usize, actual: usize },

    #[error("jpeg decode failed: {0}")]
    Jpeg(String),

    #[error("camera i/o: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures inside the decoder worker. These never cross the worker boundary.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("empty frame ({width}x{height})")]
    EmptyFrame { width: u32, height: u32 },

    #[error("pixel buffer holds {actual} bytes, expected {expected}")]
    BufferSize { expected: usize, actual: usize },

    #[error("qr grid found but payload unreadable: {0}")]
    Payload(String),

    #[error("surface size {width}x{height} out of range")]
    SurfaceSize { width: u32, height: u32 },

    #[error("decoder panicked: {0}")]
    Panicked(String),
}

/// Decoder worker channel failures, seen from the pipeline side
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("failed to spawn decoder worker: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("decoder worker disconnected")]
    Disconnected,

    #[error("decoder worker not ready after {0:?}")]
    ReadyTimeout(Duration),
}

/// Waypoint data service failures
#[derive(Debug, Error)]
pub enum RouteError {
    #[error("Route name is required to download waypoints.")]
    MissingRouteName,

    #[error("Route {0} not found. Please check the route name.")]
    RouteNotFound(String),

    #[error("No server response")]
    NoServerResponse(#[source] Option<reqwest::Error>),

    #[error("Error parsing waypoints: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Error reading waypoints file: {0}")]
    Io(#[from] std::io::Error),
}

/// A failed startup stage. Each variant stops the startup sequence where it occurred.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("device capability check failed: {0}")]
    Capability(#[source] CaptureError),

    #[error("could not access camera: {0}")]
    CameraAcquisition(#[source] CaptureError),

    #[error("could not load route: {0}")]
    Route(#[from] RouteError),

    #[error("decoder worker unavailable: {0}")]
    WorkerUnavailable(#[from] WorkerError),
}

/// User-visible error surface shared by all startup stages
#[derive(Debug, Default)]
pub struct ErrorReport {
    messages: Vec<String>,
}

impl ErrorReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: impl Into<String>) {
        self.messages.push(message.into());
    }

    /// Record an error together with its source chain, one message per level.
    pub fn push_error(&mut self, err: &(dyn std::error::Error + 'static)) {
        let mut current = Some(err);
        while let Some(e) = current {
            self.messages.push(e.to_string());
            current = e.source();
        }
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    pub fn emit(&self) {
        for message in &self.messages {
            error!("{}", message);
        }
    }
}
