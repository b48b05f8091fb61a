//! Destination surface description and output routing.

use vpfsr_core::abi::WORKING_FORMAT;
use vpfsr_core::Dimensions;

/// Size and DXGI format of a 2D texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceInfo {
    pub dims: Dimensions,
    pub format: u32,
}

impl SurfaceInfo {
    pub const fn new(dims: Dimensions, format: u32) -> Self {
        Self { dims, format }
    }

    pub const fn is_working_format(&self) -> bool {
        self.format == WORKING_FORMAT
    }
}

/// How the upscaled frame gets into the host's destination texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentRoute {
    /// Same layout: a plain resource copy.
    Copy,
    /// Different layout (e.g. NV12, R10G10B10A2): run the video processor.
    Convert,
}

impl PresentRoute {
    pub const fn for_destination(dest: &SurfaceInfo) -> Self {
        if dest.is_working_format() {
            Self::Copy
        } else {
            Self::Convert
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NV12: u32 = 103;
    const R10G10B10A2_UNORM: u32 = 24;

    #[test]
    fn bgra_destination_is_copied() {
        let dest = SurfaceInfo::new(Dimensions::new(1920, 1080), WORKING_FORMAT);
        assert_eq!(PresentRoute::for_destination(&dest), PresentRoute::Copy);
    }

    #[test]
    fn other_layouts_are_converted() {
        for format in [NV12, R10G10B10A2_UNORM, 0] {
            let dest = SurfaceInfo::new(Dimensions::new(1920, 1080), format);
            assert_eq!(PresentRoute::for_destination(&dest), PresentRoute::Convert);
        }
    }
}
