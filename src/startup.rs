//! Startup sequence as a chain of stages.
//!
//! Each stage consumes the previous one and returns the next, carrying the
//! config and everything built so far. A failed stage stops the chain with a
//! [`StartupError`] naming where it failed.

use std::time::Instant;

use tracing::{info, instrument};

use crate::capture::CameraSource;
use crate::compositor::{Compositor, Surface};
use crate::error::{CaptureError, StartupError};
use crate::pipeline::{Coordinator, FramePump, Session, TimingRef, Tracker};
use crate::route::{RouteTable, WaypointClient};
use crate::utils::{CameraSet, FoundDevice};
use crate::worker::{self, QrDecoder, WorkerHandle};
use crate::Config;

pub struct Startup {
    config: Config,
}

pub struct CamerasFound {
    config: Config,
    cameras: CameraSet,
}

pub struct CameraOpened<C> {
    config: Config,
    cameras: CameraSet,
    camera: C,
}

pub struct RouteLoaded<C> {
    config: Config,
    cameras: CameraSet,
    camera: C,
    route: RouteTable,
}

/// Everything needed to run: started camera, route, ready worker
pub struct Launched<C> {
    pub config: Config,
    pub cameras: CameraSet,
    pub camera: C,
    route: RouteTable,
    worker: WorkerHandle,
}

impl Startup {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Resolve user/environment cameras from the enumerated devices.
    pub fn detect_cameras(self, devices: Vec<FoundDevice>) -> Result<CamerasFound, StartupError> {
        let cameras = CameraSet::from_devices(devices).map_err(StartupError::Capability)?;
        info!(
            "Cameras: user={} environment={}",
            cameras.user.path, cameras.environment.path
        );
        Ok(CamerasFound {
            config: self.config,
            cameras,
        })
    }
}

impl CamerasFound {
    /// Open and start the camera facing the configured way.
    pub fn open_camera<C, F>(self, open: F) -> Result<CameraOpened<C>, StartupError>
    where
        C: CameraSource,
        F: FnOnce(&FoundDevice) -> Result<C, CaptureError>,
    {
        let device = self.cameras.get(self.config.capture.facing);
        let mut camera = open(device).map_err(StartupError::CameraAcquisition)?;
        camera.start().map_err(StartupError::CameraAcquisition)?;

        Ok(CameraOpened {
            config: self.config,
            cameras: self.cameras,
            camera,
        })
    }
}

impl<C> CameraOpened<C> {
    /// Load route markers from the configured file, or else the waypoint service.
    #[instrument(skip(self))]
    pub async fn load_route(self) -> Result<RouteLoaded<C>, StartupError> {
        let route = match &self.config.route.file {
            Some(path) => {
                info!("Loading route from {}", path.display());
                RouteTable::from_path(path)?
            }
            None => {
                WaypointClient::new(&self.config.route.base_url)
                    .download(&self.config.route.name)
                    .await?
            }
        };

        Ok(RouteLoaded {
            config: self.config,
            cameras: self.cameras,
            camera: self.camera,
            route,
        })
    }

    /// Use an already loaded route.
    pub fn with_route(self, route: RouteTable) -> RouteLoaded<C> {
        RouteLoaded {
            config: self.config,
            cameras: self.cameras,
            camera: self.camera,
            route,
        }
    }
}

impl<C> RouteLoaded<C> {
    /// Start the decoder worker with a surface sized like the display and
    /// wait for it to report ready.
    pub fn spawn_worker<D: QrDecoder>(self, decoder: D) -> Result<Launched<C>, StartupError> {
        let worker = worker::spawn(decoder)?;
        let display = &self.config.display;
        worker.init(
            Surface::new(display.width, display.height),
            self.config.pipeline.worker_ready_timeout(),
        )?;

        Ok(Launched {
            config: self.config,
            cameras: self.cameras,
            camera: self.camera,
            route: self.route,
            worker,
        })
    }
}

impl<C> Launched<C> {
    pub fn route(&self) -> &RouteTable {
        &self.route
    }

    /// Assemble the running session. The camera and camera set go back to
    /// the caller for the capture loop.
    pub fn into_session<T: Tracker>(self, tracker: T, now: Instant) -> (Session<T>, C, CameraSet, Config) {
        let pipeline = &self.config.pipeline;
        let display = &self.config.display;

        let pump = FramePump::new(
            Compositor::new(pipeline.rotate, pipeline.fit),
            Surface::new(display.width, display.height),
            self.worker.sender(),
            TimingRef::new(pipeline.sample_interval(), now),
            pipeline.ring_buffer_size,
        );
        let coordinator = Coordinator::new(self.route, pipeline.debounce());
        let session = Session::new(pump, coordinator, tracker, self.worker);

        (session, self.camera, self.cameras, self.config)
    }
}
