//! QR detection over RGBA bitmaps

use image::buffer::ConvertBuffer;
use image::{GrayImage, ImageBuffer, Rgba};
use rqrr::PreparedImage;
use tracing::debug;

use super::protocol::{Corners, Point};
use crate::error::DecodeError;

/// A decoded code and where it sits in the image
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub payload: String,
    pub location: Corners,
}

/// Anything that can find at most one code in an RGBA buffer.
///
/// Runs on the worker thread only.
pub trait QrDecoder: Send + 'static {
    fn decode(&mut self, rgba: &[u8], width: u32, height: u32)
        -> Result<Option<Detection>, DecodeError>;
}

/// Pure-Rust decoder backed by `rqrr`
#[derive(Debug, Default)]
pub struct RqrrDecoder;

impl RqrrDecoder {
    pub fn new() -> Self {
        Self
    }
}

impl QrDecoder for RqrrDecoder {
    fn decode(
        &mut self,
        rgba: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Option<Detection>, DecodeError> {
        if width == 0 || height == 0 {
            return Err(DecodeError::EmptyFrame { width, height });
        }
        let expected = width as usize * height as usize * 4;
        if rgba.len() != expected {
            return Err(DecodeError::BufferSize {
                expected,
                actual: rgba.len(),
            });
        }

        let view = ImageBuffer::<Rgba<u8>, &[u8]>::from_raw(width, height, rgba).ok_or(
            DecodeError::BufferSize {
                expected,
                actual: rgba.len(),
            },
        )?;
        let grey: GrayImage = view.convert();
        let mut prepared =
            PreparedImage::prepare_from_greyscale(width as usize, height as usize, |x, y| {
                grey.get_pixel(x as u32, y as u32)[0]
            });

        let grids = prepared.detect_grids();
        if grids.is_empty() {
            return Ok(None);
        }

        let mut last_error = None;
        for grid in grids {
            match grid.decode() {
                Ok((_, payload)) => {
                    let [tl, tr, br, bl] = grid.bounds;
                    let point = |p: rqrr::Point| Point::new(p.x as f32, p.y as f32);
                    return Ok(Some(Detection {
                        payload,
                        location: Corners {
                            top_left_corner: point(tl),
                            top_right_corner: point(tr),
                            bottom_right_corner: point(br),
                            bottom_left_corner: point(bl),
                        },
                    }));
                }
                Err(e) => {
                    debug!("QR grid found but not decodable: {:?}", e);
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) => Err(DecodeError::Payload(format!("{:?}", e))),
            None => Ok(None),
        }
    }
}
