//! Raw camera buffer to RGBA bitmap conversion

use tracing::instrument;

use super::frame::{Frame, PixelFormat, RawFrame};
use crate::error::CaptureError;

/// Convert a dequeued camera buffer into a transferable RGBA [`Frame`].
#[instrument(skip(raw), fields(sequence = raw.meta.sequence))]
pub fn to_bitmap(raw: &RawFrame) -> Result<Frame, CaptureError> {
    let meta = &raw.meta;
    let (width, height, stride) = (meta.width, meta.height, meta.stride);
    let (width, height, rgba) = match meta.format {
        PixelFormat::Mjpeg => decode_mjpeg(&raw.data)?,
        PixelFormat::Rgb24 => (width, height, expand_rgb(&raw.data, width, height, stride, false)?),
        PixelFormat::Bgr24 => (width, height, expand_rgb(&raw.data, width, height, stride, true)?),
        PixelFormat::Yuyv4 => (width, height, yuyv_to_rgba(&raw.data, width, height, stride)?),
    };

    let mut frame = Frame::from_rgba(width, height, rgba)?.with_sequence(meta.sequence);
    frame.timestamp = raw.timestamp;
    Ok(frame)
}

fn decode_mjpeg(data: &[u8]) -> Result<(u32, u32, Vec<u8>), CaptureError> {
    let mut decoder = zune_jpeg::JpegDecoder::new(data);
    let pixels = decoder
        .decode()
        .map_err(|e| CaptureError::Jpeg(format!("{:?}", e)))?;
    let (width, height) = decoder
        .dimensions()
        .ok_or_else(|| CaptureError::Jpeg("missing dimensions".into()))?;

    let rgba = expand_rgb(&pixels, width as u32, height as u32, 0, false)?;
    Ok((width as u32, height as u32, rgba))
}

/// Pixel rows of a possibly padded buffer. A stride below the packed row
/// size is treated as packed.
fn rows(
    data: &[u8],
    width: u32,
    height: u32,
    stride: u32,
    bytes_per_pixel: usize,
) -> Result<impl Iterator<Item = &[u8]>, CaptureError> {
    let row_bytes = width as usize * bytes_per_pixel;
    let pitch = (stride as usize).max(row_bytes);
    let expected = match height as usize {
        0 => 0,
        h => pitch * (h - 1) + row_bytes,
    };
    if data.len() < expected {
        return Err(CaptureError::BufferSize {
            expected,
            actual: data.len(),
        });
    }
    Ok((0..height as usize).map(move |y| &data[y * pitch..y * pitch + row_bytes]))
}

fn expand_rgb(
    data: &[u8],
    width: u32,
    height: u32,
    stride: u32,
    bgr: bool,
) -> Result<Vec<u8>, CaptureError> {
    let mut rgba = Vec::with_capacity(width as usize * height as usize * 4);
    for row in rows(data, width, height, stride, 3)? {
        for chunk in row.chunks_exact(3) {
            if bgr {
                rgba.extend_from_slice(&[chunk[2], chunk[1], chunk[0], 255]);
            } else {
                rgba.extend_from_slice(&[chunk[0], chunk[1], chunk[2], 255]);
            }
        }
    }
    Ok(rgba)
}

/// YUYV 4:2:2 -> RGBA using integer BT.601 coefficients
fn yuyv_to_rgba(data: &[u8], width: u32, height: u32, stride: u32) -> Result<Vec<u8>, CaptureError> {
    let mut rgba = Vec::with_capacity(width as usize * height as usize * 4);
    for row in rows(data, width, height, stride, 2)? {
        for chunk in row.chunks_exact(4) {
            let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
            push_yuv(&mut rgba, y0, u, v);
            push_yuv(&mut rgba, y1, u, v);
        }
    }
    Ok(rgba)
}

#[inline]
fn push_yuv(out: &mut Vec<u8>, y: u8, u: u8, v: u8) {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    let clamp = |x: i32| x.clamp(0, 255) as u8;
    let r = clamp((298 * c + 409 * e + 128) >> 8);
    let g = clamp((298 * c - 100 * d - 208 * e + 128) >> 8);
    let b = clamp((298 * c + 516 * d + 128) >> 8);
    out.extend_from_slice(&[r, g, b, 255]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::frame::FrameMetadata;
    use bytes::Bytes;
    use std::sync::Arc;
    use std::time::Instant;

    fn raw(format: PixelFormat, width: u32, height: u32, data: Vec<u8>) -> RawFrame {
        padded(format, width, height, 0, data)
    }

    fn padded(format: PixelFormat, width: u32, height: u32, stride: u32, data: Vec<u8>) -> RawFrame {
        RawFrame {
            data: Bytes::from(data),
            meta: Arc::new(FrameMetadata {
                sequence: 7,
                width,
                height,
                stride,
                format,
                device_timestamp: None,
            }),
            timestamp: Instant::now(),
        }
    }

    #[test]
    fn rgb24_gains_opaque_alpha() {
        let frame = to_bitmap(&raw(PixelFormat::Rgb24, 2, 1, vec![1, 2, 3, 4, 5, 6])).unwrap();
        assert_eq!(frame.as_rgba(), &[1, 2, 3, 255, 4, 5, 6, 255]);
        assert_eq!(frame.sequence, 7);
    }

    #[test]
    fn bgr24_swaps_channels() {
        let frame = to_bitmap(&raw(PixelFormat::Bgr24, 1, 1, vec![10, 20, 30])).unwrap();
        assert_eq!(frame.as_rgba(), &[30, 20, 10, 255]);
    }

    #[test]
    fn yuyv_black_and_white() {
        // Y=16 is video black, Y=235 video white, neutral chroma
        let frame = to_bitmap(&raw(PixelFormat::Yuyv4, 2, 1, vec![16, 128, 235, 128])).unwrap();
        assert_eq!(&frame.as_rgba()[..4], &[0, 0, 0, 255]);
        assert_eq!(&frame.as_rgba()[4..], &[255, 255, 255, 255]);
    }

    #[test]
    fn short_buffer_is_a_frame_error() {
        let err = to_bitmap(&raw(PixelFormat::Rgb24, 4, 4, vec![0; 10])).unwrap_err();
        assert!(matches!(err, CaptureError::BufferSize { expected: 48, .. }));
    }

    #[test]
    fn padded_rows_are_skipped() {
        // 2x2 RGB24 with 2 bytes of row padding
        let data = vec![1, 2, 3, 4, 5, 6, 99, 99, 7, 8, 9, 10, 11, 12, 99, 99];
        let frame = to_bitmap(&padded(PixelFormat::Rgb24, 2, 2, 8, data)).unwrap();
        assert_eq!(frame.pixel(0, 1), [7, 8, 9, 255]);
        assert!(!frame.as_rgba().contains(&99));

        // Last row needs no padding
        let short = vec![16, 128, 16, 128, 0, 0, 235, 128, 235, 128];
        let frame = to_bitmap(&padded(PixelFormat::Yuyv4, 2, 2, 6, short)).unwrap();
        assert_eq!(frame.pixel(0, 1), [255, 255, 255, 255]);
    }

    #[test]
    fn garbage_jpeg_is_a_frame_error() {
        let err = to_bitmap(&raw(PixelFormat::Mjpeg, 4, 4, vec![0xde, 0xad])).unwrap_err();
        assert!(matches!(err, CaptureError::Jpeg(_)));
    }
}
