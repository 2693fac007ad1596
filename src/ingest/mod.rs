//! Frame sources.
//!
//! - HTTP camera (ESP32-CAM style `/capture` snapshots or MJPEG streams)
//! - Synthetic `stub://` source (dry runs and tests)
//!
//! Every source returns a decoded `Frame` or an `AcquisitionError`. Failures
//! are always recoverable; the acquisition loop backs off and asks again.

use std::time::Duration;

use anyhow::Result;
use image::DynamicImage;

use crate::AcquisitionError;

pub mod http;
pub mod stub;

pub use http::{HttpCameraConfig, HttpCameraSource};
pub use stub::SyntheticSource;

/// One decoded camera frame.
pub struct Frame {
    pub image: DynamicImage,
    /// Monotonic count of frames this source has produced.
    pub sequence: u64,
}

impl Frame {
    pub fn new(image: DynamicImage, sequence: u64) -> Self {
        Self { image, sequence }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

pub trait FrameSource {
    /// Human-readable source identifier for logs.
    fn describe(&self) -> String;

    /// Fetch and decode the next frame. Must return within a bounded time.
    fn fetch_frame(&mut self) -> Result<Frame, AcquisitionError>;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn describe(&self) -> String {
        (**self).describe()
    }

    fn fetch_frame(&mut self) -> Result<Frame, AcquisitionError> {
        (**self).fetch_frame()
    }
}

/// Open the source named by `url`: `stub://` is synthetic, anything else is HTTP.
pub fn open_source(url: &str, timeout: Duration) -> Result<Box<dyn FrameSource + Send>> {
    if url.starts_with("stub://") {
        Ok(Box::new(SyntheticSource::from_url(url)?))
    } else {
        Ok(Box::new(HttpCameraSource::new(HttpCameraConfig {
            url: url.to_string(),
            timeout,
        })?))
    }
}

/// Decode an encoded image payload held in memory.
pub(crate) fn decode_image(bytes: &[u8]) -> Result<DynamicImage, AcquisitionError> {
    if bytes.is_empty() {
        return Err(AcquisitionError::Malformed("empty image payload".to_string()));
    }
    image::load_from_memory(bytes).map_err(|e| AcquisitionError::Decode(e.to_string()))
}
