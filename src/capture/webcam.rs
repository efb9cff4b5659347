//! Webcam capture using nokhwa
//!
//! The camera is opened on its own driver thread, which is also where frames
//! are pulled, normalised to I420 and handed to the frame callback. Start-up
//! errors are reported back synchronously through a one-shot handshake.

use crate::capture::traits::{
    CameraInfo, CaptureError, CaptureFormat, CaptureResult, CaptureSource, FrameCallback,
    PixelLayout,
};
use crate::processing::colorspace::{i420_frame_size, nv12_to_i420, yuyv_to_i420};
use nokhwa::pixel_format::RgbAFormat;
use nokhwa::utils::{
    ApiBackend, CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType,
    Resolution,
};
use nokhwa::Camera;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;

/// Get list of available cameras
pub fn list_cameras() -> Vec<CameraInfo> {
    match nokhwa::query(ApiBackend::Auto) {
        Ok(cameras) => cameras
            .into_iter()
            .filter_map(|info| {
                let index = match info.index() {
                    CameraIndex::Index(i) => *i,
                    CameraIndex::String(_) => return None,
                };
                Some(CameraInfo {
                    index,
                    name: info.human_name().to_string(),
                    description: info.description().to_string(),
                })
            })
            .collect(),
        Err(e) => {
            tracing::warn!("Failed to enumerate cameras: {:?}", e);
            Vec::new()
        }
    }
}

/// Camera frame source
pub struct WebcamSource {
    index: u32,
    format: Option<CaptureFormat>,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl WebcamSource {
    /// Source for the camera at `index`
    pub fn new(index: u32) -> Self {
        Self {
            index,
            format: None,
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    /// Source for the first camera
    pub fn default_camera() -> Self {
        Self::new(0)
    }
}

impl CaptureSource for WebcamSource {
    fn bind(&mut self, format: &CaptureFormat) -> CaptureResult<()> {
        if self.worker.is_some() {
            return Err(CaptureError::AlreadyCapturing);
        }
        if format.layout != PixelLayout::I420 || format.width % 2 != 0 || format.height % 2 != 0 {
            return Err(CaptureError::FormatRejected(format!(
                "{}x{} {:?}",
                format.width, format.height, format.layout
            )));
        }
        if !list_cameras().iter().any(|c| c.index == self.index) {
            return Err(CaptureError::DeviceUnavailable(format!(
                "no camera at index {}",
                self.index
            )));
        }

        self.format = Some(*format);
        tracing::info!(
            "Webcam {} bound to {}x{} @ {}/{} fps",
            self.index,
            format.width,
            format.height,
            format.fps_numerator,
            format.fps_denominator
        );
        Ok(())
    }

    fn start_capture(&mut self, mut callback: FrameCallback) -> CaptureResult<()> {
        let format = self.format.ok_or(CaptureError::NotBound)?;
        if self.worker.is_some() {
            return Err(CaptureError::AlreadyCapturing);
        }

        let index = self.index;
        let running = self.running.clone();
        running.store(true, Ordering::SeqCst);
        let (ready_tx, ready_rx) = mpsc::sync_channel::<CaptureResult<()>>(1);

        let spawned = std::thread::Builder::new()
            .name("webcam-capture".to_string())
            .spawn(move || {
                let mut camera = match open_camera(index, &format) {
                    Ok(camera) => camera,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let frame_format = camera.camera_format().format();
                let _ = ready_tx.send(Ok(()));

                let (width, height) = (format.width, format.height);
                let mut i420 = vec![0u8; i420_frame_size(width, height)];
                let mut frame_count: u64 = 0;
                let capture_start = std::time::Instant::now();

                while running.load(Ordering::SeqCst) {
                    // Blocks until the camera delivers the next frame
                    let frame = match camera.frame() {
                        Ok(frame) => frame,
                        Err(e) => {
                            tracing::debug!("Failed to capture frame: {:?}", e);
                            continue;
                        }
                    };

                    let converted = match frame_format {
                        FrameFormat::NV12 => nv12_to_i420(width, height, frame.buffer(), &mut i420),
                        _ => yuyv_to_i420(width, height, frame.buffer(), &mut i420),
                    };
                    if let Err(e) = converted {
                        tracing::warn!("Dropping malformed webcam frame: {}", e);
                        continue;
                    }

                    callback(&i420);
                    frame_count += 1;
                }

                let elapsed = capture_start.elapsed();
                tracing::info!(
                    "Webcam captured {} frames in {:.2}s ({:.1} fps actual)",
                    frame_count,
                    elapsed.as_secs_f64(),
                    frame_count as f64 / elapsed.as_secs_f64().max(f64::EPSILON)
                );

                if let Err(e) = camera.stop_stream() {
                    tracing::warn!("Error stopping camera stream: {:?}", e);
                }
            });

        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                return Err(CaptureError::Backend(format!(
                    "failed to spawn capture thread: {e}"
                )));
            }
        };

        let startup = ready_rx.recv().unwrap_or_else(|_| {
            Err(CaptureError::Backend(
                "capture thread exited during startup".to_string(),
            ))
        });
        if let Err(e) = startup {
            self.running.store(false, Ordering::SeqCst);
            let _ = handle.join();
            return Err(e);
        }

        self.worker = Some(handle);
        tracing::info!("Webcam capture started");
        Ok(())
    }

    fn stop_capture(&mut self) -> CaptureResult<()> {
        let handle = self.worker.take().ok_or(CaptureError::NotCapturing)?;
        self.running.store(false, Ordering::SeqCst);
        handle
            .join()
            .map_err(|_| CaptureError::Backend("webcam thread panicked".to_string()))?;
        tracing::info!("Webcam capture stopped");
        Ok(())
    }
}

impl Drop for WebcamSource {
    fn drop(&mut self) {
        if self.worker.is_some() {
            let _ = self.stop_capture();
        }
    }
}

/// Open and start the camera, insisting on the bound resolution and a
/// raw 4:2:0 or 4:2:2 frame format
fn open_camera(index: u32, format: &CaptureFormat) -> CaptureResult<Camera> {
    let fps = format.fps_numerator / format.fps_denominator.max(1);
    let requested = RequestedFormat::new::<RgbAFormat>(RequestedFormatType::Closest(
        CameraFormat::new(
            Resolution::new(format.width, format.height),
            FrameFormat::NV12,
            fps,
        ),
    ));

    let mut camera = Camera::new(CameraIndex::Index(index), requested)
        .map_err(|e| CaptureError::DeviceUnavailable(format!("failed to open camera {index}: {e}")))?;
    camera
        .open_stream()
        .map_err(|e| CaptureError::Backend(format!("failed to open camera stream: {e}")))?;

    let actual = camera.camera_format();
    let resolution = actual.resolution();
    tracing::info!(
        "Webcam opened: {}x{} @ {}fps, format={:?} (requested {}x{} @ {}fps)",
        resolution.width(),
        resolution.height(),
        actual.frame_rate(),
        actual.format(),
        format.width,
        format.height,
        fps
    );

    let rejection = if resolution.width() != format.width || resolution.height() != format.height
    {
        Some(format!(
            "camera delivers {}x{}, expected {}x{}",
            resolution.width(),
            resolution.height(),
            format.width,
            format.height
        ))
    } else if !matches!(actual.format(), FrameFormat::NV12 | FrameFormat::YUYV) {
        Some(format!("unsupported camera frame format {:?}", actual.format()))
    } else {
        None
    };

    if let Some(reason) = rejection {
        let _ = camera.stop_stream();
        return Err(CaptureError::FormatRejected(reason));
    }
    Ok(camera)
}
