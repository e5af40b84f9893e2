//! Wayfinder: camera wayfinding with off-thread QR detection

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use tracing::{error, info, warn};

use wayfinder::capture::{CaptureControl, CaptureLoop, Frame, V4l2Capture};
use wayfinder::display::{RunExit, Sdl2Display};
use wayfinder::error::{ErrorReport, StartupError};
use wayfinder::startup::{Launched, Startup};
use wayfinder::tracking::CameraTracker;
use wayfinder::worker::RqrrDecoder;
use wayfinder::{utils, Config};

/// Camera wayfinding with off-thread QR detection
#[derive(Parser, Debug)]
#[clap(name = "wayfinder")]
struct Args {
    /// Config file, defaults to `wayfinder.toml` or `WAYFINDER_CONFIG`.
    #[clap(long = "config", short = 'c')]
    config: Option<PathBuf>,

    /// Route to download from the waypoint service.
    #[clap(long = "route", short = 'r')]
    route: Option<String>,

    /// Load the route from a JSON file instead of the waypoint service.
    #[clap(long = "route-file")]
    route_file: Option<PathBuf>,

    /// Waypoint service base URL.
    #[clap(long = "base-url")]
    base_url: Option<String>,
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("wayfinder=debug"));

    #[cfg(feature = "profiling")]
    {
        use tracing_subscriber::prelude::*;
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_timer(tracing_subscriber::fmt::time::uptime()))
            .with(tracing_tracy::TracyLayer::default())
            .init();
    }

    #[cfg(not(feature = "profiling"))]
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();
}

async fn launch(config: Config) -> Result<Launched<V4l2Capture>, StartupError> {
    let capture_config = config.capture.clone();
    let devices = utils::enumerate_devices(capture_config.format);

    Startup::new(config)
        .detect_cameras(devices)?
        .open_camera(|device| V4l2Capture::open(device, &capture_config))?
        .load_route()
        .await?
        .spawn_worker(RqrrDecoder::new())
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing();

    info!("Wayfinder launching...");

    let args = Args::parse();
    let mut config = Config::load(args.config.as_deref())?;
    if let Some(route) = args.route {
        config.route.name = route;
    }
    if let Some(file) = args.route_file {
        config.route.file = Some(file);
    }
    if let Some(base_url) = args.base_url {
        config.route.base_url = base_url;
    }

    let mut report = ErrorReport::new();
    let launched = match launch(config).await {
        Ok(launched) => launched,
        Err(e) => {
            report.push_error(&e);
            report.emit();
            return Err(eyre!("startup failed: {}", e));
        }
    };
    info!("Route {} ready", launched.route().name());

    let (frame_tx, frame_rx) = flume::bounded::<Frame>(launched.config.pipeline.ring_buffer_size.max(1));
    let (control_tx, control_rx) = flume::unbounded::<CaptureControl>();
    let video_ready = Arc::new(AtomicBool::new(false));

    let tracker = CameraTracker::new(
        video_ready.clone(),
        control_tx.clone(),
        launched.cameras.can_switch(),
    );
    let (mut session, camera, cameras, config) = launched.into_session(tracker, Instant::now());

    // Capture runs on the blocking pool; frames cross to the display loop via flume
    let capture_config = config.capture.clone();
    let facing = config.capture.facing;
    let capture_handle = tokio::task::spawn_blocking(move || {
        CaptureLoop::new(
            move |device: &utils::FoundDevice| V4l2Capture::open(device, &capture_config),
            cameras,
            facing,
            frame_tx,
            control_rx,
            video_ready,
        )
        .run(Some(camera))
    });

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Ctrl-C received");
                shutdown.store(true, Ordering::Release);
            }
        });
    }

    let sdl_context = sdl2::init().map_err(|e| eyre!(e))?;
    let mut display = Sdl2Display::new(&sdl_context, &config.display)?;

    match display.run(&sdl_context, &mut session, &frame_rx, &shutdown)? {
        RunExit::EndOfRoute(record) => {
            let notice = match record.destination {
                Some(destination) => format!("You have arrived at {}", destination),
                None => "You have reached the end of the route".to_string(),
            };
            info!("{}", notice);
            display.notify(&notice);
        }
        RunExit::Quit | RunExit::Shutdown => {}
    }

    session.shutdown();
    if let Err(e) = control_tx.send(CaptureControl::Stop) {
        warn!("Capture loop already gone at shutdown: {}", e);
    }
    drop(frame_rx);

    match capture_handle.await {
        Ok(Ok(exit)) => info!("Capture loop ended: {:?}", exit),
        Ok(Err(e)) => {
            report.push_error(&e);
            report.emit();
        }
        Err(e) => error!("Capture task failed: {}", e),
    }

    info!("Wayfinder shutting down");
    Ok(())
}
