//! SDL2 window output.
//!
//! Implements [`Renderer`] over an SDL2 canvas and runs the main-thread loop:
//! window events, camera frames into the session, one session refresh per
//! vsync'd present.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use color_eyre::{eyre::eyre, Result};
use flume::Receiver;
use sdl2::event::{Event, WindowEvent};
use sdl2::keyboard::Keycode;
use sdl2::pixels::{Color, PixelFormatEnum};
use sdl2::rect::Point as SdlPoint;
use sdl2::render::{Canvas, TextureCreator};
use sdl2::video::{Window, WindowContext};
use tracing::{info, warn};

use crate::capture::Frame;
use crate::pipeline::{RenderState, Renderer, Scene, Session, TickOutcome, Tracker};
use crate::route::MarkerRecord;
use crate::DisplayConfig;

const ANCHOR_COLOR: Color = Color::RGB(0, 230, 118);
const ARROW_COLOR: Color = Color::RGB(255, 196, 0);

/// Why the display loop returned
#[derive(Debug)]
pub enum RunExit {
    Quit,
    Shutdown,
    EndOfRoute(MarkerRecord),
}

pub struct Sdl2Display {
    canvas: Canvas<Window>,
    texture_creator: TextureCreator<WindowContext>,
    title: String,
}

impl Sdl2Display {
    pub fn new(sdl_context: &sdl2::Sdl, config: &DisplayConfig) -> Result<Self> {
        let video_subsystem = sdl_context.video().map_err(|e| eyre!(e))?;

        let window = video_subsystem
            .window(&config.title, config.width, config.height)
            .position_centered()
            .resizable()
            .build()?;

        let canvas = window.into_canvas().present_vsync().build()?;
        let texture_creator = canvas.texture_creator();

        Ok(Self {
            canvas,
            texture_creator,
            title: config.title.clone(),
        })
    }

    /// Show a user-visible notice in the window title.
    pub fn notify(&mut self, message: &str) {
        let title = format!("{} - {}", self.title, message);
        if let Err(e) = self.canvas.window_mut().set_title(&title) {
            warn!("Could not set window title: {}", e);
        }
    }

    pub fn run<T: Tracker>(
        &mut self,
        sdl_context: &sdl2::Sdl,
        session: &mut Session<T>,
        frames: &Receiver<Frame>,
        shutdown: &AtomicBool,
    ) -> Result<RunExit> {
        let mut event_pump = sdl_context.event_pump().map_err(|e| eyre!(e))?;

        loop {
            for event in event_pump.poll_iter() {
                match event {
                    Event::Quit { .. } => {
                        info!("Quit event received");
                        return Ok(RunExit::Quit);
                    }
                    Event::Window { win_event, .. } => match win_event {
                        WindowEvent::SizeChanged(w, h) if w > 0 && h > 0 => {
                            session.resize(w as u32, h as u32);
                        }
                        WindowEvent::Minimized | WindowEvent::Hidden => session.set_hidden(true),
                        WindowEvent::Restored | WindowEvent::Shown => session.set_hidden(false),
                        _ => {}
                    },
                    Event::KeyDown {
                        keycode: Some(Keycode::C),
                        ..
                    } => session.switch_camera(),
                    _ => {}
                }
            }

            if shutdown.load(Ordering::Acquire) {
                return Ok(RunExit::Shutdown);
            }

            session.on_camera_frames(frames.try_iter(), Instant::now());

            match session.on_refresh(Instant::now(), self)? {
                TickOutcome::EndOfRoute(record) => return Ok(RunExit::EndOfRoute(record)),
                TickOutcome::Rendered => self.canvas.present(),
                TickOutcome::Paused | TickOutcome::Ended => {
                    std::thread::sleep(std::time::Duration::from_millis(16));
                }
            }
        }
    }

    fn draw_surface(&mut self, state: &RenderState<'_>) -> Result<()> {
        let surface = state.surface;
        if surface.is_empty() {
            return Ok(());
        }
        let (width, height) = surface.size();

        // RGBA byte order regardless of endianness
        let mut texture = self
            .texture_creator
            .create_texture_streaming(PixelFormatEnum::RGBA32, width, height)
            .map_err(|e| eyre!(e))?;
        texture
            .update(None, surface.as_rgba(), (width * 4) as usize)
            .map_err(|e| eyre!(e))?;

        self.canvas.copy(&texture, None, None).map_err(|e| eyre!(e))?;
        Ok(())
    }

    /// Surface coordinates to window coordinates
    fn to_window(&self, state: &RenderState<'_>, x: f32, y: f32) -> SdlPoint {
        let (sw, sh) = state.surface.size();
        let (ww, wh) = self.canvas.output_size().unwrap_or((sw, sh));
        let sx = ww as f32 / sw.max(1) as f32;
        let sy = wh as f32 / sh.max(1) as f32;
        SdlPoint::new((x * sx) as i32, (y * sy) as i32)
    }

    fn draw_anchor(&mut self, state: &RenderState<'_>) -> Result<()> {
        let Some(corners) = state.anchor else {
            return Ok(());
        };
        let outline: Vec<SdlPoint> = [
            corners.top_left_corner,
            corners.top_right_corner,
            corners.bottom_right_corner,
            corners.bottom_left_corner,
            corners.top_left_corner,
        ]
        .iter()
        .map(|p| self.to_window(state, p.x, p.y))
        .collect();

        self.canvas.set_draw_color(ANCHOR_COLOR);
        self.canvas.draw_lines(outline.as_slice()).map_err(|e| eyre!(e))
    }

    /// Arrow in the lower third of the window, 0 degrees pointing up
    fn draw_arrow(&mut self, heading_degrees: f32) -> Result<()> {
        let (ww, wh) = self.canvas.output_size().map_err(|e| eyre!(e))?;
        let cx = ww as f32 / 2.0;
        let cy = wh as f32 * 0.75;
        let size = ww.min(wh) as f32 * 0.12;

        let (sin, cos) = heading_degrees.to_radians().sin_cos();
        let shape = [(0.0, -1.0), (0.6, 0.8), (0.0, 0.4), (-0.6, 0.8), (0.0, -1.0)];
        let points: Vec<SdlPoint> = shape
            .iter()
            .map(|(x, y)| {
                let rx = x * cos - y * sin;
                let ry = x * sin + y * cos;
                SdlPoint::new((cx + rx * size) as i32, (cy + ry * size) as i32)
            })
            .collect();

        self.canvas.set_draw_color(ARROW_COLOR);
        self.canvas.draw_lines(points.as_slice()).map_err(|e| eyre!(e))
    }
}

impl Renderer for Sdl2Display {
    fn clear(&mut self) {
        self.canvas.set_draw_color(Color::BLACK);
        self.canvas.clear();
    }

    fn clear_depth(&mut self) {}

    fn render(&mut self, scene: Scene, state: &RenderState<'_>) -> Result<()> {
        let start = Instant::now();
        match scene {
            Scene::Ar => {
                self.draw_surface(state)?;
                if state.ar_visible {
                    self.draw_anchor(state)?;
                }
            }
            Scene::Overlay => {
                if state.overlay_visible {
                    self.draw_arrow(state.heading_degrees)?;
                }
            }
        }
        metrics::histogram!("scene_render_time_us", "scene" => scene_name(scene))
            .record(start.elapsed().as_micros() as f64);
        Ok(())
    }
}

fn scene_name(scene: Scene) -> &'static str {
    match scene {
        Scene::Ar => "ar",
        Scene::Overlay => "overlay",
    }
}
