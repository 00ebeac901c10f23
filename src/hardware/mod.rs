pub mod camera;
pub mod serial;

pub use camera::{FrameSource, FrameSourceFactory, StillFrameSource};
pub use serial::{ChannelLink, ScriptedLink, SerialTriggerLink, TriggerLink, split_signals};

#[cfg(feature = "camera")]
pub use camera::CameraSource;
