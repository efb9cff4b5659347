//! Camera Recorder - capture, preview and record a camera to Ogg.
//!
//! A capture source delivers raw I420 frames on its own thread. Each frame is
//! optionally converted for preview, then pushed through a bounded channel to
//! an encode thread that compresses it and writes Ogg pages to disk.
//!
//! ```no_run
//! use camera_recorder::{Recorder, RecorderConfig, SyntheticSource};
//!
//! let mut recorder = Recorder::new(RecorderConfig::default(), Box::new(SyntheticSource::new()))?;
//! let path = recorder.start(None)?;
//! std::thread::sleep(std::time::Duration::from_secs(1));
//! let output = recorder.stop()?;
//! println!("{} frames written to {}", output.frames_encoded, path.display());
//! # Ok::<(), camera_recorder::RecorderError>(())
//! ```

pub mod capture;
pub mod codec;
pub mod config;
pub mod mux;
pub mod processing;
pub mod recorder;
pub mod utils;

pub use capture::{CaptureSource, PreviewSink, SyntheticSource};
pub use config::RecorderConfig;
pub use recorder::{Recorder, RecordingEvent, RecordingOutput, RecordingState};
pub use utils::error::{RecorderError, RecorderResult};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global tracing subscriber.
///
/// Honours `RUST_LOG`; defaults to debug output for this crate. Does nothing
/// if a subscriber is already installed.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "camera_recorder=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();

    tracing::info!("Camera recorder v{}", env!("CARGO_PKG_VERSION"));
}
