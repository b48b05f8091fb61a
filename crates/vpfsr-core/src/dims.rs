//! Frame sizes.

use std::fmt;

/// Width and height of a texture in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// True if either side is zero.
    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Number of pixels.
    pub const fn area(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// The (source, destination) size pair of one intercepted call.
///
/// This is the cache key for GPU resources: a change in either side means a
/// fresh set has to be built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FrameDims {
    pub input: Dimensions,
    pub output: Dimensions,
}

impl FrameDims {
    pub const fn new(input: Dimensions, output: Dimensions) -> Self {
        Self { input, output }
    }

    /// Both sides are non-empty.
    pub const fn is_valid(&self) -> bool {
        !self.input.is_empty() && !self.output.is_empty()
    }
}

impl fmt::Display for FrameDims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.input, self.output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_when_either_side_is_zero() {
        assert!(Dimensions::new(0, 720).is_empty());
        assert!(Dimensions::new(1280, 0).is_empty());
        assert!(!Dimensions::new(1, 1).is_empty());
    }

    #[test]
    fn frame_dims_validity_and_display() {
        let dims = FrameDims::new(Dimensions::new(1280, 720), Dimensions::new(1920, 1080));
        assert!(dims.is_valid());
        assert_eq!(dims.to_string(), "1280x720 -> 1920x1080");
        assert!(!FrameDims::new(Dimensions::new(1280, 720), Dimensions::default()).is_valid());
    }
}
