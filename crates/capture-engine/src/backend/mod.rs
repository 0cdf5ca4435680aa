//! Encoder backends and media source implementations.

use std::path::Path;
use std::sync::Arc;

use clipcraft_common::error::ClipcraftResult;

use crate::pipeline::EncoderRegistry;
use crate::source::MediaSource;

#[cfg(feature = "gstreamer")]
pub mod gst;
pub mod synthetic;
pub mod y4m;

pub use synthetic::{SyntheticConfig, SyntheticSource};
pub use y4m::Y4mBackend;

/// Encoder backends available in this build, best first.
pub fn default_registry() -> EncoderRegistry {
    let registry = EncoderRegistry::new();

    #[cfg(feature = "gstreamer")]
    let registry = match gst::GstEncoderBackend::new() {
        Ok(backend) => registry.with(Arc::new(backend)),
        Err(e) => {
            tracing::warn!(error = %e, "GStreamer unavailable; falling back to built-in encoders");
            registry
        }
    };

    registry.with(Arc::new(Y4mBackend))
}

/// Open a media file for export.
pub fn open_source(path: &Path) -> ClipcraftResult<Box<dyn MediaSource>> {
    #[cfg(feature = "gstreamer")]
    {
        Ok(Box::new(gst::GstMediaSource::open(path)?))
    }
    #[cfg(not(feature = "gstreamer"))]
    {
        Err(clipcraft_common::error::ClipcraftError::unsupported(format!(
            "Cannot decode {}: built without the `gstreamer` feature",
            path.display()
        )))
    }
}
