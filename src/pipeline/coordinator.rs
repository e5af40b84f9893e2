//! Per-refresh render loop: detection edges, debounce, then draw

use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use nalgebra::Quaternion;
use tracing::{debug, info, warn};

use super::pump::FramePump;
use super::reconciler::Reconciler;
use crate::compositor::Surface;
use crate::nav::{NavIcon, OrientationPublisher};
use crate::route::{MarkerKind, MarkerRecord, RouteTable};
use crate::worker::Corners;

/// The marker-tracking session the render loop drives
pub trait Tracker {
    fn start(&mut self);
    fn stop(&mut self);
    fn is_running(&self) -> bool;

    /// Camera is producing frames
    fn video_ready(&self) -> bool;

    fn anchor_visible(&self) -> bool;

    /// Orientation of the tracked anchor, if any
    fn anchor_orientation(&self) -> Option<Quaternion<f64>>;

    fn switch_camera(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scene {
    /// Camera feed and anchored content
    Ar,
    /// Pointer and HUD drawn over everything
    Overlay,
}

/// What the renderer needs to draw one tick
pub struct RenderState<'a> {
    pub surface: &'a Surface,
    pub ar_visible: bool,
    pub overlay_visible: bool,
    pub heading_degrees: f32,
    pub anchor: Option<&'a Corners>,
}

pub trait Renderer {
    fn clear(&mut self);
    fn clear_depth(&mut self);
    fn render(&mut self, scene: Scene, state: &RenderState<'_>) -> color_eyre::Result<()>;
}

/// One-shot timer; arming an armed timer keeps the original deadline.
#[derive(Debug, Clone, Copy)]
pub struct DebounceTimer {
    window: Duration,
    armed_at: Option<Instant>,
}

impl DebounceTimer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            armed_at: None,
        }
    }

    pub fn arm(&mut self, now: Instant) {
        if self.armed_at.is_none() {
            self.armed_at = Some(now);
        }
    }

    pub fn cancel(&mut self) {
        self.armed_at = None;
    }

    pub fn is_armed(&self) -> bool {
        self.armed_at.is_some()
    }

    /// True once when the window has elapsed; the timer disarms itself.
    pub fn poll(&mut self, now: Instant) -> bool {
        match self.armed_at {
            Some(at) if now.saturating_duration_since(at) >= self.window => {
                self.armed_at = None;
                true
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    Paused,
    Rendered,
    /// An end marker was reached; tracking has been stopped.
    EndOfRoute(MarkerRecord),
    Ended,
}

pub struct Coordinator {
    route: RouteTable,
    debounce: DebounceTimer,
    orientation: OrientationPublisher,
    nav: Rc<RefCell<NavIcon>>,
    overlay_active: bool,
    paused: bool,
    ended: bool,
    last_handled: Option<String>,
}

impl Coordinator {
    pub fn new(route: RouteTable, debounce: Duration) -> Self {
        let mut orientation = OrientationPublisher::new();
        let nav = NavIcon::attach(&mut orientation);
        Self {
            route,
            debounce: DebounceTimer::new(debounce),
            orientation,
            nav,
            overlay_active: false,
            paused: false,
            ended: false,
            last_handled: None,
        }
    }

    pub fn nav(&self) -> &Rc<RefCell<NavIcon>> {
        &self.nav
    }

    pub fn overlay_active(&self) -> bool {
        self.overlay_active
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }

    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn resume(&mut self) {
        self.paused = false;
    }

    pub fn tick(
        &mut self,
        now: Instant,
        pump: &mut FramePump,
        reconciler: &Reconciler,
        tracker: &mut dyn Tracker,
        renderer: &mut dyn Renderer,
    ) -> color_eyre::Result<TickOutcome> {
        if self.ended {
            return Ok(TickOutcome::Ended);
        }
        if self.paused {
            return Ok(TickOutcome::Paused);
        }

        if tracker.video_ready() {
            pump.trigger_sample(now);

            if let Some(record) = self.handle_new_code(reconciler) {
                if record.kind == MarkerKind::End {
                    info!("End of route reached at {}", record.id);
                    self.ended = true;
                    self.overlay_active = false;
                    self.nav.borrow_mut().detach(&mut self.orientation);
                    pump.end();
                    tracker.stop();
                    return Ok(TickOutcome::EndOfRoute(record));
                }
            }

            self.update_visibility(now, reconciler, tracker);
        }

        self.render(pump.surface(), reconciler, renderer)?;
        Ok(TickOutcome::Rendered)
    }

    /// Look up a freshly detected code and apply its marker.
    fn handle_new_code(&mut self, reconciler: &Reconciler) -> Option<MarkerRecord> {
        if !reconciler.is_new() {
            return None;
        }
        let code = reconciler.active_code()?;
        if self.last_handled.as_deref() == Some(code) {
            return None;
        }
        self.last_handled = Some(code.to_string());

        let Some(record) = self.route.get(code) else {
            warn!("Code {} is not on route {}", code, self.route.name());
            return None;
        };

        match record.kind {
            MarkerKind::Direction | MarkerKind::Destination => {
                info!(
                    "Marker {}: pointing {} degrees",
                    record.id, record.rotation_degrees
                );
                self.nav.borrow_mut().offset_rotation(record.rotation_degrees);
            }
            MarkerKind::End => {}
        }
        Some(record.clone())
    }

    fn update_visibility(&mut self, now: Instant, reconciler: &Reconciler, tracker: &dyn Tracker) {
        if tracker.anchor_visible() && reconciler.is_detected() {
            self.debounce.cancel();
            if !self.overlay_active {
                debug!("Overlay active");
            }
            self.overlay_active = true;
            if let Some(orientation) = tracker.anchor_orientation() {
                self.orientation.publish(orientation);
            }
            self.nav.borrow_mut().show();
            return;
        }

        self.debounce.arm(now);
        if self.debounce.poll(now) {
            debug!("Detection lost, overlay hidden");
            self.overlay_active = false;
            let mut nav = self.nav.borrow_mut();
            nav.reset_orientation();
            nav.hide();
        }
    }

    fn render(
        &self,
        surface: &Surface,
        reconciler: &Reconciler,
        renderer: &mut dyn Renderer,
    ) -> color_eyre::Result<()> {
        let start = Instant::now();
        let nav = self.nav.borrow();
        let state = RenderState {
            surface,
            ar_visible: self.overlay_active,
            overlay_visible: self.overlay_active && nav.is_visible(),
            heading_degrees: nav.heading_degrees(),
            anchor: reconciler.location(),
        };

        renderer.clear();
        renderer.render(Scene::Ar, &state)?;
        renderer.clear_depth();
        renderer.render(Scene::Overlay, &state)?;

        metrics::histogram!("render_time_us").record(start.elapsed().as_micros() as f64);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compositor::Compositor;
    use crate::pipeline::timing::TimingRef;
    use crate::route::MarkerRecord;
    use crate::worker::{DecodeResult, Point, WorkerRequest};

    #[derive(Default)]
    struct FakeTracker {
        running: bool,
        video: bool,
        anchor: bool,
    }

    impl Tracker for FakeTracker {
        fn start(&mut self) {
            self.running = true;
        }
        fn stop(&mut self) {
            self.running = false;
        }
        fn is_running(&self) -> bool {
            self.running
        }
        fn video_ready(&self) -> bool {
            self.video
        }
        fn anchor_visible(&self) -> bool {
            self.anchor
        }
        fn anchor_orientation(&self) -> Option<Quaternion<f64>> {
            None
        }
        fn switch_camera(&mut self) {}
    }

    #[derive(Default)]
    struct RecordingRenderer {
        calls: Vec<(Scene, bool)>,
    }

    impl Renderer for RecordingRenderer {
        fn clear(&mut self) {}
        fn clear_depth(&mut self) {}
        fn render(&mut self, scene: Scene, state: &RenderState<'_>) -> color_eyre::Result<()> {
            self.calls.push((scene, state.ar_visible));
            Ok(())
        }
    }

    fn route() -> RouteTable {
        RouteTable::from_records(
            "demo",
            vec![
                MarkerRecord {
                    id: "A".into(),
                    kind: MarkerKind::Direction,
                    rotation_degrees: 45.0,
                    destination: None,
                    label: None,
                },
                MarkerRecord {
                    id: "END".into(),
                    kind: MarkerKind::End,
                    rotation_degrees: 0.0,
                    destination: Some("Lobby".into()),
                    label: None,
                },
            ],
        )
    }

    fn detected(reconciler: &mut Reconciler, seq: u64, code: &str) {
        let p = Point::new(0.0, 0.0);
        reconciler.apply(
            seq,
            DecodeResult::Code {
                payload: code.into(),
                location: Corners {
                    top_left_corner: p,
                    top_right_corner: p,
                    bottom_right_corner: p,
                    bottom_left_corner: p,
                },
            },
        );
    }

    struct Rig {
        coordinator: Coordinator,
        pump: FramePump,
        reconciler: Reconciler,
        tracker: FakeTracker,
        renderer: RecordingRenderer,
        _worker: flume::Receiver<WorkerRequest>,
    }

    impl Rig {
        fn new(t0: Instant) -> Self {
            let (tx, rx) = flume::unbounded();
            Self {
                coordinator: Coordinator::new(route(), Duration::from_millis(100)),
                pump: FramePump::new(
                    Compositor::default(),
                    Surface::new(8, 8),
                    tx,
                    TimingRef::new(Duration::from_millis(300), t0),
                    2,
                ),
                reconciler: Reconciler::new(),
                tracker: FakeTracker {
                    running: true,
                    video: true,
                    anchor: true,
                },
                renderer: RecordingRenderer::default(),
                _worker: rx,
            }
        }

        fn tick(&mut self, now: Instant) -> TickOutcome {
            self.coordinator
                .tick(
                    now,
                    &mut self.pump,
                    &self.reconciler,
                    &mut self.tracker,
                    &mut self.renderer,
                )
                .unwrap()
        }
    }

    #[test]
    fn debounce_fires_only_after_window() {
        let t0 = Instant::now();
        let mut timer = DebounceTimer::new(Duration::from_millis(100));
        timer.arm(t0);
        timer.arm(t0 + Duration::from_millis(50));
        assert!(!timer.poll(t0 + Duration::from_millis(99)));
        assert!(timer.poll(t0 + Duration::from_millis(100)));
        assert!(!timer.is_armed());
    }

    #[test]
    fn short_loss_keeps_overlay_long_loss_hides_it() {
        let t0 = Instant::now();
        let mut rig = Rig::new(t0);
        let ms = |n| t0 + Duration::from_millis(n);

        detected(&mut rig.reconciler, 1, "A");
        rig.tick(ms(0));
        assert!(rig.coordinator.overlay_active());

        rig.tracker.anchor = false;
        rig.tick(ms(10));
        rig.tick(ms(90));
        assert!(rig.coordinator.overlay_active());

        rig.tracker.anchor = true;
        rig.tick(ms(100));
        assert!(rig.coordinator.overlay_active());

        rig.tracker.anchor = false;
        rig.tick(ms(110));
        rig.tick(ms(260));
        assert!(!rig.coordinator.overlay_active());
        assert!(!rig.coordinator.nav().borrow().is_visible());
    }

    #[test]
    fn new_direction_code_rotates_pointer_once() {
        let t0 = Instant::now();
        let mut rig = Rig::new(t0);

        detected(&mut rig.reconciler, 1, "A");
        assert_eq!(rig.tick(t0), TickOutcome::Rendered);
        assert_eq!(rig.coordinator.nav().borrow().offset_degrees(), 45.0);

        rig.coordinator.nav().borrow_mut().offset_rotation(0.0);
        rig.tick(t0 + Duration::from_millis(16));
        assert_eq!(rig.coordinator.nav().borrow().offset_degrees(), 0.0);
        assert_eq!(rig.renderer.calls.len(), 4);
        assert_eq!(rig.renderer.calls[0], (Scene::Ar, true));
        assert_eq!(rig.renderer.calls[1].0, Scene::Overlay);
    }

    #[test]
    fn end_marker_stops_tracking_for_good() {
        let t0 = Instant::now();
        let mut rig = Rig::new(t0);

        detected(&mut rig.reconciler, 1, "END");
        match rig.tick(t0) {
            TickOutcome::EndOfRoute(record) => {
                assert_eq!(record.destination.as_deref(), Some("Lobby"))
            }
            other => panic!("expected end of route, got {:?}", other),
        }
        assert!(!rig.tracker.is_running());
        assert!(!rig.pump.is_processing());
        assert_eq!(rig.tick(t0 + Duration::from_millis(16)), TickOutcome::Ended);
    }

    #[test]
    fn paused_and_not_ready_ticks() {
        let t0 = Instant::now();
        let mut rig = Rig::new(t0);

        rig.coordinator.pause();
        assert_eq!(rig.tick(t0), TickOutcome::Paused);
        assert!(rig.renderer.calls.is_empty());
        rig.coordinator.resume();

        // No video yet: detection is skipped but the scene still renders
        rig.tracker.video = false;
        detected(&mut rig.reconciler, 1, "A");
        assert_eq!(rig.tick(t0), TickOutcome::Rendered);
        assert_eq!(rig.coordinator.nav().borrow().offset_degrees(), 0.0);
        assert_eq!(rig.renderer.calls.len(), 2);
    }
}
