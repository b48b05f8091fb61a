//! Host-device access and pixel-layout bridging.
//!
//! [`surface`] decides how a finished frame reaches the host's destination.
//! On Windows, [`dx11`] recovers the host's device from its video context and
//! converts between the host's surfaces and the pipeline's working format
//! with the video processor.

pub mod surface;
pub use surface::{PresentRoute, SurfaceInfo};

#[cfg(target_os = "windows")]
pub mod dx11;
