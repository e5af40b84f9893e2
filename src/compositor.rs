//! Orientation-aware frame compositing onto a drawable surface

use image::imageops::{self, FilterType};
use image::RgbaImage;
use nalgebra::{Matrix3, Point2, Vector2};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::capture::frame::{Frame, Orientation};

/// 2D affine transform in homogeneous form, canvas convention (y grows downwards)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Affine(Matrix3<f64>);

impl Affine {
    pub fn identity() -> Affine {
        Affine(Matrix3::identity())
    }

    pub fn translated(self, tx: f64, ty: f64) -> Affine {
        Affine(self.0 * Matrix3::new_translation(&Vector2::new(tx, ty)))
    }

    /// Exact quarter turn; clockwise on screen when `clockwise`.
    pub fn quarter_turned(self, clockwise: bool) -> Affine {
        let s = if clockwise { 1.0 } else { -1.0 };
        #[rustfmt::skip]
        let turn = Matrix3::new(
            0.0, -s, 0.0,
            s, 0.0, 0.0,
            0.0, 0.0, 1.0,
        );
        Affine(self.0 * turn)
    }

    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        let p = self.0.transform_point(&Point2::new(x, y));
        (p.x, p.y)
    }

    fn inverse(&self) -> Option<Affine> {
        self.0.try_inverse().map(Affine)
    }
}

impl Default for Affine {
    fn default() -> Self {
        Affine::identity()
    }
}

/// Axis-aligned rectangle in drawing-space coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// Mutable RGBA drawing surface with a canvas-style transform stack
pub struct Surface {
    pixels: RgbaImage,
    transform: Affine,
    saved: Vec<Affine>,
}

impl Surface {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            pixels: RgbaImage::new(width, height),
            transform: Affine::identity(),
            saved: Vec::new(),
        }
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn size(&self) -> (u32, u32) {
        self.pixels.dimensions()
    }

    pub fn orientation(&self) -> Orientation {
        Orientation::of(self.width(), self.height())
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    /// Resize, discarding pixel contents and any transform state.
    pub fn resize(&mut self, width: u32, height: u32) {
        if self.size() == (width, height) {
            return;
        }
        self.pixels = RgbaImage::new(width, height);
        self.transform = Affine::identity();
        self.saved.clear();
    }

    pub fn clear(&mut self) {
        self.pixels.fill(0);
    }

    pub fn as_rgba(&self) -> &[u8] {
        self.pixels.as_raw()
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        self.pixels.get_pixel(x, y).0
    }

    /// Copy the current pixel content into a standalone frame.
    pub fn snapshot(&self) -> Frame {
        Frame::from(self.pixels.clone())
    }

    pub fn transform(&self) -> Affine {
        self.transform
    }

    pub fn save(&mut self) {
        self.saved.push(self.transform);
    }

    pub fn restore(&mut self) {
        self.transform = self.saved.pop().unwrap_or(Affine::identity());
    }

    pub fn reset_transform(&mut self) {
        self.transform = Affine::identity();
    }

    pub fn translate(&mut self, tx: f64, ty: f64) {
        self.transform = self.transform.translated(tx, ty);
    }

    pub fn rotate_quarter(&mut self, clockwise: bool) {
        self.transform = self.transform.quarter_turned(clockwise);
    }

    /// Run `draw` with a saved transform that is restored afterwards,
    /// whatever `draw` did to it.
    pub fn with_saved_transform<R>(&mut self, draw: impl FnOnce(&mut Surface) -> R) -> R {
        self.save();
        let out = draw(self);
        self.restore();
        out
    }

    /// Draw the whole of `frame` scaled into `dest` under the current transform.
    ///
    /// The frame is scaled to the destination size first (nearest neighbour),
    /// then mapped through the transform; pixels outside the surface are clipped.
    pub fn draw_image(&mut self, frame: &Frame, dest: Rect) {
        if frame.is_empty() || self.is_empty() || dest.width <= 0.0 || dest.height <= 0.0 {
            return;
        }
        let Some(inverse) = self.transform.inverse() else {
            return;
        };
        let Some(source) = frame.view() else {
            return;
        };

        let dw = (dest.width.round() as u32).max(1);
        let dh = (dest.height.round() as u32).max(1);
        let scaled = imageops::resize(&source, dw, dh, FilterType::Nearest);

        let corners = [
            self.transform.apply(dest.x, dest.y),
            self.transform.apply(dest.x + dest.width, dest.y),
            self.transform.apply(dest.x, dest.y + dest.height),
            self.transform.apply(dest.x + dest.width, dest.y + dest.height),
        ];
        let (mut min_x, mut min_y) = (f64::MAX, f64::MAX);
        let (mut max_x, mut max_y) = (f64::MIN, f64::MIN);
        for (x, y) in corners {
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }

        let (sw, sh) = self.size();
        let x0 = min_x.floor().max(0.0) as u32;
        let y0 = min_y.floor().max(0.0) as u32;
        let x1 = (max_x.ceil().min(sw as f64)).max(0.0) as u32;
        let y1 = (max_y.ceil().min(sh as f64)).max(0.0) as u32;

        let scale_x = dw as f64 / dest.width;
        let scale_y = dh as f64 / dest.height;

        for py in y0..y1 {
            for px in x0..x1 {
                let (u, v) = inverse.apply(px as f64 + 0.5, py as f64 + 0.5);
                let lu = u - dest.x;
                let lv = v - dest.y;
                if lu < 0.0 || lv < 0.0 || lu >= dest.width || lv >= dest.height {
                    continue;
                }
                let sx = ((lu * scale_x) as u32).min(dw - 1);
                let sy = ((lv * scale_y) as u32).min(dh - 1);
                self.pixels.put_pixel(px, py, *scaled.get_pixel(sx, sy));
            }
        }
    }
}

impl std::fmt::Debug for Surface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Surface")
            .field("width", &self.width())
            .field("height", &self.height())
            .finish()
    }
}

/// Direction used when frame and surface orientations differ
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RotateDirection {
    #[default]
    Right,
    Left,
}

/// How a frame with a different aspect ratio fills the surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FitMode {
    /// Fill the surface completely, cropping the overflowing axis symmetrically.
    #[default]
    Cover,
    /// Show the whole frame, letterboxing the short axis.
    Contain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawStrategy {
    StandardScale,
    RotateRight,
    RotateLeft,
}

/// Chosen strategy and destination rectangle in the strategy's drawing space.
///
/// For the rotate strategies the drawing space has width and height swapped
/// relative to the surface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawPlan {
    pub strategy: DrawStrategy,
    pub dest: Rect,
}

/// Pick a strategy for a frame/surface pair. `None` when either has zero area.
pub fn plan(
    frame: (u32, u32),
    surface: (u32, u32),
    rotate: RotateDirection,
    fit: FitMode,
) -> Option<DrawPlan> {
    let (fw, fh) = frame;
    let (sw, sh) = surface;
    if fw == 0 || fh == 0 || sw == 0 || sh == 0 {
        return None;
    }

    if Orientation::of(fw, fh) == Orientation::of(sw, sh) {
        return Some(DrawPlan {
            strategy: DrawStrategy::StandardScale,
            dest: fit_centered(fw, fh, sw, sh, fit),
        });
    }

    let strategy = match rotate {
        RotateDirection::Right => DrawStrategy::RotateRight,
        RotateDirection::Left => DrawStrategy::RotateLeft,
    };
    Some(DrawPlan {
        strategy,
        dest: fit_centered(fw, fh, sh, sw, fit),
    })
}

/// Scale (x1, y1) into (x2, y2) preserving aspect ratio, centred on the free axis.
fn fit_centered(x1: u32, y1: u32, x2: u32, y2: u32, fit: FitMode) -> Rect {
    let (fx1, fy1, fx2, fy2) = (x1 as f64, y1 as f64, x2 as f64, y2 as f64);

    // Ratios compared by cross-multiplication so equal ratios compare exactly
    let target_wider = x2 as u64 * y1 as u64;
    let frame_wider = x1 as u64 * y2 as u64;

    if target_wider == frame_wider {
        return Rect::new(0.0, 0.0, fx2, fy2);
    }

    let scale_to_width = match fit {
        FitMode::Cover => target_wider > frame_wider,
        FitMode::Contain => target_wider < frame_wider,
    };

    if scale_to_width {
        let scaled_height = fy1 * (fx2 / fx1);
        Rect::new(0.0, (fy2 - scaled_height) / 2.0, fx2, scaled_height)
    } else {
        let scaled_width = fx1 * (fy2 / fy1);
        Rect::new((fx2 - scaled_width) / 2.0, 0.0, scaled_width, fy2)
    }
}

/// Draws camera frames onto a surface of arbitrary size and orientation
#[derive(Debug, Clone, Copy, Default)]
pub struct Compositor {
    pub rotate: RotateDirection,
    pub fit: FitMode,
}

impl Compositor {
    pub fn new(rotate: RotateDirection, fit: FitMode) -> Self {
        Self { rotate, fit }
    }

    /// Draw `frame` onto `surface`. A zero-area frame or surface is a no-op.
    pub fn composite(&self, frame: &Frame, surface: &mut Surface) -> Option<DrawPlan> {
        let plan = plan(
            (frame.width(), frame.height()),
            surface.size(),
            self.rotate,
            self.fit,
        )?;
        let (sw, sh) = surface.size();

        surface.with_saved_transform(|s| {
            match plan.strategy {
                DrawStrategy::StandardScale => {}
                DrawStrategy::RotateRight => {
                    s.translate(sw as f64, 0.0);
                    s.rotate_quarter(true);
                }
                DrawStrategy::RotateLeft => {
                    s.translate(0.0, sh as f64);
                    s.rotate_quarter(false);
                }
            }
            s.draw_image(frame, plan.dest);
        });

        trace!(strategy = ?plan.strategy, "frame composited");
        Some(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RED: [u8; 4] = [255, 0, 0, 255];
    const BLUE: [u8; 4] = [0, 0, 255, 255];

    /// Top half red, bottom half blue
    fn split_frame(width: u32, height: u32) -> Frame {
        let mut data = Vec::with_capacity((width * height * 4) as usize);
        for y in 0..height {
            let px = if y < height / 2 { RED } else { BLUE };
            for _ in 0..width {
                data.extend_from_slice(&px);
            }
        }
        Frame::from_rgba(width, height, data).unwrap()
    }

    #[test]
    fn equal_ratio_is_a_direct_blit() {
        let plan = plan((640, 360), (1280, 720), RotateDirection::Right, FitMode::Cover).unwrap();
        assert_eq!(plan.strategy, DrawStrategy::StandardScale);
        assert_eq!(plan.dest, Rect::new(0.0, 0.0, 1280.0, 720.0));
    }

    #[test]
    fn wider_surface_centres_vertically() {
        let (fw, fh, dw, dh) = (640u32, 480u32, 1280u32, 720u32);
        let plan = plan((fw, fh), (dw, dh), RotateDirection::Right, FitMode::Cover).unwrap();

        let expected = (dh as f64 - fh as f64 * dw as f64 / fw as f64) / 2.0;
        assert_eq!(plan.strategy, DrawStrategy::StandardScale);
        assert_eq!(plan.dest.x, 0.0);
        assert_eq!(plan.dest.width, dw as f64);
        assert!((plan.dest.y - expected).abs() < 1e-9);
        // Overflow is cropped evenly top and bottom
        assert!((plan.dest.y * 2.0 + plan.dest.height - dh as f64).abs() < 1e-9);
    }

    #[test]
    fn contain_offsets_are_never_negative() {
        for (frame, surface) in [
            ((1920, 1080), (1280, 960)),
            ((640, 480), (1280, 720)),
            ((300, 400), (720, 1280)),
            ((1280, 720), (720, 1280)),
        ] {
            let plan = plan(frame, surface, RotateDirection::Right, FitMode::Contain).unwrap();
            assert!(plan.dest.x >= 0.0 && plan.dest.y >= 0.0, "{:?}", plan);
        }
    }

    #[test]
    fn contain_with_wider_frame_uses_vertical_offset() {
        let (fw, fh, dw, dh) = (1920u32, 1080u32, 1280u32, 960u32);
        let plan = plan((fw, fh), (dw, dh), RotateDirection::Right, FitMode::Contain).unwrap();
        let expected = (dh as f64 - fh as f64 * dw as f64 / fw as f64) / 2.0;
        assert!((plan.dest.y - expected).abs() < 1e-9);
        assert!(plan.dest.y >= 0.0);
    }

    #[test]
    fn orientation_mismatch_always_rotates() {
        for (frame, surface) in [
            ((1280, 720), (720, 1280)),
            ((1000, 999), (10, 4000)),
            ((200, 600), (800, 100)),
        ] {
            let right = plan(frame, surface, RotateDirection::Right, FitMode::Cover).unwrap();
            assert_eq!(right.strategy, DrawStrategy::RotateRight);
            let left = plan(frame, surface, RotateDirection::Left, FitMode::Cover).unwrap();
            assert_eq!(left.strategy, DrawStrategy::RotateLeft);
        }
    }

    #[test]
    fn zero_area_is_a_no_op() {
        assert!(plan((0, 720), (720, 1280), RotateDirection::Right, FitMode::Cover).is_none());
        assert!(plan((1280, 720), (0, 0), RotateDirection::Right, FitMode::Cover).is_none());

        let mut surface = Surface::new(0, 0);
        let frame = split_frame(4, 2);
        assert!(Compositor::default().composite(&frame, &mut surface).is_none());
    }

    #[test]
    fn landscape_camera_fills_portrait_surface() {
        let frame = split_frame(128, 72);
        let mut surface = Surface::new(72, 128);
        let plan = Compositor::default().composite(&frame, &mut surface).unwrap();

        assert_eq!(plan.strategy, DrawStrategy::RotateRight);
        // Rotated drawing space is 128x72: full destination height, no offset
        assert_eq!(plan.dest, Rect::new(0.0, 0.0, 128.0, 72.0));

        // Clockwise: the top of the frame ends up on the right of the surface
        assert_eq!(surface.pixel(71, 0), RED);
        assert_eq!(surface.pixel(40, 127), RED);
        assert_eq!(surface.pixel(0, 0), BLUE);
        assert_eq!(surface.pixel(30, 64), BLUE);
        assert!(surface.as_rgba().chunks_exact(4).all(|p| p[3] == 255));
    }

    #[test]
    fn rotate_left_mirrors_rotate_right() {
        let frame = split_frame(128, 72);
        let mut surface = Surface::new(72, 128);
        Compositor::new(RotateDirection::Left, FitMode::Cover)
            .composite(&frame, &mut surface)
            .unwrap();

        assert_eq!(surface.pixel(0, 0), RED);
        assert_eq!(surface.pixel(71, 0), BLUE);
    }

    #[test]
    fn transform_is_restored_after_compositing() {
        let frame = split_frame(128, 72);
        let mut surface = Surface::new(72, 128);
        Compositor::default().composite(&frame, &mut surface);
        assert_eq!(surface.transform(), Affine::identity());
    }

    #[test]
    fn upscaled_frame_keeps_pixel_blocks() {
        let data = [RED, BLUE, BLUE, RED].concat();
        let frame = Frame::from_rgba(2, 2, data).unwrap();
        let mut surface = Surface::new(4, 4);
        Compositor::default().composite(&frame, &mut surface).unwrap();

        for (x, y, expected) in [(0, 0, RED), (1, 1, RED), (2, 0, BLUE), (3, 1, BLUE), (0, 3, BLUE), (3, 3, RED)] {
            assert_eq!(surface.pixel(x, y), expected, "pixel {},{}", x, y);
        }
    }

    #[test]
    fn quarter_turn_and_inverse() {
        let turn = Affine::identity().translated(10.0, 0.0).quarter_turned(true);
        let (x, y) = turn.apply(1.0, 0.0);
        assert!((x - 10.0).abs() < 1e-12 && (y - 1.0).abs() < 1e-12);

        let (u, v) = turn.inverse().unwrap().apply(x, y);
        assert!((u - 1.0).abs() < 1e-12 && v.abs() < 1e-12);
    }

    #[test]
    fn snapshot_copies_current_pixels() {
        let frame = split_frame(4, 4);
        let mut surface = Surface::new(4, 4);
        Compositor::default().composite(&frame, &mut surface);
        let snap = surface.snapshot();

        surface.clear();
        assert_eq!(snap.pixel(0, 0), RED);
        assert_eq!(snap.pixel(0, 3), BLUE);
        assert_eq!(surface.pixel(0, 0), [0, 0, 0, 0]);
    }
}
