//! Navigation pointer driven by the tracked anchor's orientation

use std::cell::RefCell;
use std::rc::Rc;

use nalgebra::{Quaternion, UnitQuaternion, Vector3};
use tracing::{debug, info, warn};

/// Smoothing applied per orientation update
const SMOOTHING: f64 = 0.1;

const SLERP_EPSILON: f64 = 1.0e-9;

/// Unit orientation as published to observers
pub type Orientation = UnitQuaternion<f64>;

/// Rotation of `radians` about the vertical axis.
pub fn from_yaw(radians: f64) -> Orientation {
    UnitQuaternion::from_axis_angle(&Vector3::y_axis(), radians)
}

/// Unit-length orientation; a zero quaternion becomes the identity.
pub fn normalized(raw: Quaternion<f64>) -> Orientation {
    UnitQuaternion::try_new(raw, f64::EPSILON).unwrap_or_else(UnitQuaternion::identity)
}

pub fn has_nan(orientation: &Orientation) -> bool {
    orientation.coords.iter().any(|c| c.is_nan())
}

/// Keep only the rotation about the vertical axis.
pub fn yaw_only(orientation: &Orientation) -> Orientation {
    normalized(Quaternion::new(orientation.w, 0.0, orientation.j, 0.0))
}

/// Signed rotation about the vertical axis, in `(-pi, pi]`.
pub fn yaw_radians(orientation: &Orientation) -> f64 {
    yaw_only(orientation).scaled_axis().y
}

/// Spherical interpolation towards `to` by `t`. Orientations too close
/// for a well-defined arc snap to `to`.
pub fn slerp(from: &Orientation, to: &Orientation, t: f64) -> Orientation {
    from.try_slerp(to, t, SLERP_EPSILON).unwrap_or(*to)
}

/// Receives orientation updates from an [`OrientationPublisher`]
pub trait OrientationObserver {
    fn update_orientation(&mut self, orientation: Orientation);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Owned list of orientation subscribers. Subscribers must unsubscribe
/// explicitly at teardown.
#[derive(Default)]
pub struct OrientationPublisher {
    observers: Vec<(SubscriptionId, Rc<RefCell<dyn OrientationObserver>>)>,
    next_id: u64,
}

impl OrientationPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, observer: Rc<RefCell<dyn OrientationObserver>>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.observers.push((id, observer));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(sub, _)| *sub != id);
        self.observers.len() != before
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    /// Normalise `raw` and hand it to every subscriber.
    pub fn publish(&self, raw: Quaternion<f64>) {
        let orientation = normalized(raw);
        for (id, observer) in &self.observers {
            match observer.try_borrow_mut() {
                Ok(mut observer) => observer.update_orientation(orientation),
                Err(_) => warn!("Observer {:?} busy, skipping orientation update", id),
            }
        }
    }
}

/// Direction arrow shown over the camera feed.
///
/// Follows the published anchor orientation with smoothing, yaw only, and
/// adds a per-marker rotation offset on top.
#[derive(Debug)]
pub struct NavIcon {
    target: Orientation,
    rotation: Orientation,
    offset_degrees: f32,
    visible: bool,
    ready: bool,
    subscription: Option<SubscriptionId>,
}

impl NavIcon {
    /// Create an icon and register it with `publisher`.
    pub fn attach(publisher: &mut OrientationPublisher) -> Rc<RefCell<NavIcon>> {
        let icon = Rc::new(RefCell::new(NavIcon {
            target: Orientation::identity(),
            rotation: Orientation::identity(),
            offset_degrees: 0.0,
            visible: false,
            ready: false,
            subscription: None,
        }));

        let id = publisher.subscribe(icon.clone());
        {
            let mut icon = icon.borrow_mut();
            icon.subscription = Some(id);
            icon.ready = true;
            icon.update_direction();
        }
        debug!("NavIcon attached as {:?}", id);
        icon
    }

    fn update_direction(&mut self) {
        self.rotation = yaw_only(&slerp(&self.rotation, &self.target, SMOOTHING));
    }

    pub fn reset_orientation(&mut self) {
        self.target = Orientation::identity();
        self.update_direction();
    }

    pub fn offset_rotation(&mut self, degrees: f32) {
        self.offset_degrees = degrees;
    }

    pub fn offset_degrees(&self) -> f32 {
        self.offset_degrees
    }

    /// Current pointer heading: smoothed anchor yaw plus marker offset.
    pub fn heading_degrees(&self) -> f32 {
        yaw_radians(&self.rotation).to_degrees() as f32 + self.offset_degrees
    }

    pub fn rotation(&self) -> Orientation {
        self.rotation
    }

    pub fn show(&mut self) {
        self.visible = true;
    }

    pub fn hide(&mut self) {
        self.visible = false;
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn is_attached(&self) -> bool {
        self.subscription.is_some()
    }

    /// Unregister from `publisher` and hide. The icon ignores updates afterwards.
    pub fn detach(&mut self, publisher: &mut OrientationPublisher) {
        if let Some(id) = self.subscription.take() {
            publisher.unsubscribe(id);
        }
        self.ready = false;
        self.visible = false;
        info!("NavIcon detached");
    }
}

impl OrientationObserver for NavIcon {
    fn update_orientation(&mut self, orientation: Orientation) {
        if !self.ready || has_nan(&orientation) {
            return;
        }
        self.target = orientation;
        self.update_direction();
    }
}
