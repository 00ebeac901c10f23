use std::path::Path;

use anyhow::{Context, Result};
use image::RgbImage;

/// Live video feed. Implementations may block for up to one frame period.
pub trait FrameSource {
    /// Next frame, or `None` if the device had nothing new.
    fn next_frame(&mut self) -> Result<Option<RgbImage>>;
}

/// Opens a frame source on the thread that will poll it. Camera handles
/// are often tied to the thread that opened them.
pub type FrameSourceFactory = Box<dyn FnOnce() -> Result<Box<dyn FrameSource>> + Send>;

/// Replays one still image forever. Used for headless runs and tests.
#[derive(Debug, Clone)]
pub struct StillFrameSource {
    frame: RgbImage,
}

impl StillFrameSource {
    pub fn new(frame: RgbImage) -> Self {
        Self { frame }
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let frame = image::open(path)
            .with_context(|| format!("failed to open still frame {}", path.display()))?
            .to_rgb8();
        Ok(Self::new(frame))
    }
}

impl FrameSource for StillFrameSource {
    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        Ok(Some(self.frame.clone()))
    }
}

#[cfg(feature = "camera")]
pub use device::CameraSource;

#[cfg(feature = "camera")]
mod device {
    use anyhow::{Context, Result};
    use image::RgbImage;
    use log::info;
    use nokhwa::Camera;
    use nokhwa::pixel_format::RgbFormat;
    use nokhwa::utils::{CameraIndex, RequestedFormat, RequestedFormatType, Resolution};

    use super::FrameSource;

    /// USB camera through nokhwa.
    pub struct CameraSource {
        camera: Camera,
    }

    impl CameraSource {
        pub fn open(index: u32, resolution: (u32, u32)) -> Result<Self> {
            let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::HighestResolution(
                Resolution::new(resolution.0, resolution.1),
            ));
            let mut camera = Camera::new(CameraIndex::Index(index), requested)
                .with_context(|| format!("failed to open camera {index}"))?;
            camera.open_stream().context("failed to start camera stream")?;

            let res = camera.resolution();
            info!("Camera {} streaming at {}x{}", index, res.width(), res.height());
            Ok(Self { camera })
        }
    }

    impl FrameSource for CameraSource {
        fn next_frame(&mut self) -> Result<Option<RgbImage>> {
            let buffer = self.camera.frame().context("camera frame grab failed")?;
            let decoded = buffer
                .decode_image::<RgbFormat>()
                .context("camera frame decode failed")?;
            let (width, height) = (decoded.width(), decoded.height());
            Ok(RgbImage::from_raw(width, height, decoded.into_raw()))
        }
    }

    impl Drop for CameraSource {
        fn drop(&mut self) {
            let _ = self.camera.stop_stream();
        }
    }
}
