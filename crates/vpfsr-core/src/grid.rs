//! Compute dispatch sizing.

use crate::dims::Dimensions;

/// Threads per group along each axis; both stages use `[numthreads(16, 16, 1)]`.
pub const THREAD_GROUP_SIZE: u32 = 16;

/// Thread groups needed to cover `output`, rounded up so edge pixels get a
/// thread. The shaders discard threads outside the texture.
pub fn dispatch_groups(output: Dimensions) -> (u32, u32) {
    (
        output.width.div_ceil(THREAD_GROUP_SIZE),
        output.height.div_ceil(THREAD_GROUP_SIZE),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_up_partial_groups() {
        assert_eq!(dispatch_groups(Dimensions::new(16, 16)), (1, 1));
        assert_eq!(dispatch_groups(Dimensions::new(17, 1)), (2, 1));
        assert_eq!(dispatch_groups(Dimensions::new(1, 1)), (1, 1));
    }

    #[test]
    fn full_hd_output() {
        assert_eq!(dispatch_groups(Dimensions::new(1920, 1080)), (120, 68));
        assert_eq!(dispatch_groups(Dimensions::new(3840, 2160)), (240, 135));
    }
}
