use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};
use v4l::{capability::Flags, video::Capture, Device, FourCC};

use crate::capture::frame::PixelFormat;
use crate::capture::v4l2::fourcc;
use crate::error::CaptureError;

// Detected capture device info
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FoundDevice {
    pub path: String,
    pub format: PixelFormat,
}

impl FoundDevice {
    pub fn new(path: String, format: PixelFormat) -> Self {
        Self { path, format }
    }
}

/// Which way the camera points
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Facing {
    User,
    #[default]
    Environment,
}

impl Facing {
    pub fn flipped(self) -> Self {
        match self {
            Facing::User => Facing::Environment,
            Facing::Environment => Facing::User,
        }
    }
}

/// User-facing and environment-facing cameras.
///
/// V4L2 does not report facing; with a single device it serves both roles,
/// with two or more the first is `user` and the second `environment`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraSet {
    pub user: FoundDevice,
    pub environment: FoundDevice,
}

impl CameraSet {
    pub fn from_devices(devices: Vec<FoundDevice>) -> Result<Self, CaptureError> {
        let mut devices = devices.into_iter();
        let user = devices.next().ok_or(CaptureError::NoDevice)?;
        let environment = devices.next().unwrap_or_else(|| user.clone());
        Ok(Self { user, environment })
    }

    pub fn get(&self, facing: Facing) -> &FoundDevice {
        match facing {
            Facing::User => &self.user,
            Facing::Environment => &self.environment,
        }
    }

    pub fn can_switch(&self) -> bool {
        self.user != self.environment
    }
}

/// Enumerate capture devices. Each device reports `preferred` when it supports
/// it, otherwise MJPEG, then YUYV, then RGB24.
pub fn enumerate_devices(preferred: PixelFormat) -> Vec<FoundDevice> {
    info!("Enumerating capture devices...");

    let mut found = Vec::new();
    for i in 0..10 {
        let path = format!("/dev/video{}", i);
        if !Path::new(&path).exists() {
            continue;
        }

        let Ok(dev) = Device::with_path(&path) else {
            continue;
        };
        let Ok(caps) = dev.query_caps() else {
            continue;
        };
        if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
            debug!("{} is not a capture device", path);
            continue;
        }
        let Ok(formats) = dev.enum_formats() else {
            continue;
        };

        let fourccs: Vec<FourCC> = formats.iter().map(|f| f.fourcc).collect();
        let chosen = format_preference(preferred)
            .into_iter()
            .find(|format| fourccs.contains(&fourcc(*format)));

        if let Some(format) = chosen {
            info!("Found {:?} device: {} - {}", format, path, caps.card);
            found.push(FoundDevice::new(path, format));
        }
    }

    found
}

fn format_preference(preferred: PixelFormat) -> Vec<PixelFormat> {
    let mut order = vec![preferred];
    for format in [PixelFormat::Mjpeg, PixelFormat::Yuyv4, PixelFormat::Rgb24] {
        if !order.contains(&format) {
            order.push(format);
        }
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dev(n: u32) -> FoundDevice {
        FoundDevice::new(format!("/dev/video{}", n), PixelFormat::Mjpeg)
    }

    #[test]
    fn single_camera_serves_both_roles() {
        let set = CameraSet::from_devices(vec![dev(0)]).unwrap();
        assert_eq!(set.get(Facing::User), &dev(0));
        assert_eq!(set.get(Facing::Environment), &dev(0));
        assert!(!set.can_switch());
    }

    #[test]
    fn second_camera_is_environment() {
        let set = CameraSet::from_devices(vec![dev(0), dev(2), dev(4)]).unwrap();
        assert_eq!(set.get(Facing::User), &dev(0));
        assert_eq!(set.get(Facing::Environment), &dev(2));
        assert!(set.can_switch());
    }

    #[test]
    fn no_camera_is_a_capability_error() {
        assert!(matches!(
            CameraSet::from_devices(Vec::new()),
            Err(CaptureError::NoDevice)
        ));
    }

    #[test]
    fn preferred_format_goes_first() {
        assert_eq!(
            format_preference(PixelFormat::Yuyv4),
            vec![PixelFormat::Yuyv4, PixelFormat::Mjpeg, PixelFormat::Rgb24]
        );
        assert_eq!(format_preference(PixelFormat::Mjpeg).len(), 3);
    }
}
