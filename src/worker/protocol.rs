//! Messages crossing the decoder worker boundary.
//!
//! Both directions are closed enums. Requests move their buffers into the
//! worker; the sender cannot touch a frame after sending it.

use serde::{Deserialize, Serialize};

use crate::capture::Frame;
use crate::compositor::Surface;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f32 {
        ((other.x - self.x).powi(2) + (other.y - self.y).powi(2)).sqrt()
    }
}

/// Pixel corners of a decoded code, in the coordinates of the decoded frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Corners {
    pub top_left_corner: Point,
    pub top_right_corner: Point,
    pub bottom_right_corner: Point,
    pub bottom_left_corner: Point,
}

/// A frame to decode; ownership of the bitmap moves to the worker
#[derive(Debug)]
pub struct DecodeRequest {
    pub seq: u64,
    pub bitmap: Frame,
    pub width: u32,
    pub height: u32,
}

/// Pipeline -> worker
#[derive(Debug)]
pub enum WorkerRequest {
    /// Hand the worker its private drawing surface
    Init { surface: Surface },
    Frame(DecodeRequest),
    Resize { width: u32, height: u32 },
    Shutdown,
}

/// Worker -> pipeline, JSON-shaped with a `type` tag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WorkerEvent {
    #[serde(rename = "worker ready")]
    Ready,

    #[serde(rename = "code")]
    Code {
        seq: u64,
        code: String,
        location: Corners,
    },

    #[serde(rename = "no code")]
    NoCode { seq: u64 },
}

/// Outcome of one decode, as consumed by the reconciler
#[derive(Debug, Clone, PartialEq)]
pub enum DecodeResult {
    Code { payload: String, location: Corners },
    NoCode,
}

impl WorkerEvent {
    /// Sequence number and result for `code`/`no code` events.
    pub fn into_result(self) -> Option<(u64, DecodeResult)> {
        match self {
            WorkerEvent::Ready => None,
            WorkerEvent::Code {
                seq,
                code,
                location,
            } => Some((
                seq,
                DecodeResult::Code {
                    payload: code,
                    location,
                },
            )),
            WorkerEvent::NoCode { seq } => Some((seq, DecodeResult::NoCode)),
        }
    }
}
