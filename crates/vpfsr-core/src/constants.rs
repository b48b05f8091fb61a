//! Constant blocks for the two compute stages.
//!
//! Both stages read the same `cbuffer` shape: four `uint4` rows followed by a
//! `uint4 Sample` row. Floats are stored as raw bits so the layout is
//! identical to the `FsrEasuCon`/`FsrRcasCon` helpers the shaders derive from.

use half::f16;

use crate::dims::FrameDims;

/// Largest negative lobe RCAS may apply, `0.25 - 1/16`.
pub const RCAS_LIMIT: f32 = 0.25 - 1.0 / 16.0;

/// Upper bound accepted for RCAS sharpness, in stops.
pub const MAX_SHARPNESS: f32 = 2.0;

/// GPU constant buffer contents shared by both stages.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpscaleConstants {
    pub const0: [u32; 4],
    pub const1: [u32; 4],
    pub const2: [u32; 4],
    pub const3: [u32; 4],
    pub sample: [u32; 4],
}

impl UpscaleConstants {
    /// EASU constants for scaling the full input frame to the full output
    /// frame. The input viewport is the whole input texture.
    pub fn easu(dims: FrameDims) -> Self {
        let in_w = dims.input.width as f32;
        let in_h = dims.input.height as f32;
        let out_w = dims.output.width as f32;
        let out_h = dims.output.height as f32;

        let scale_x = in_w * out_w.recip();
        let scale_y = in_h * out_h.recip();
        let texel_x = in_w.recip();
        let texel_y = in_h.recip();

        Self {
            const0: bits([scale_x, scale_y, 0.5 * scale_x - 0.5, 0.5 * scale_y - 0.5]),
            const1: bits([texel_x, texel_y, texel_x, -texel_y]),
            const2: bits([-texel_x, 2.0 * texel_y, texel_x, 2.0 * texel_y]),
            const3: bits([0.0, 4.0 * texel_y, 0.0, 0.0]),
            sample: [0; 4],
        }
    }

    /// RCAS constants. `sharpness` is in stops: 0 is the strongest, each
    /// whole step halves the effect. Values outside `[0, MAX_SHARPNESS]` are
    /// clamped.
    pub fn rcas(sharpness: f32) -> Self {
        let sharpness = if sharpness.is_nan() {
            0.0
        } else {
            sharpness.clamp(0.0, MAX_SHARPNESS)
        };
        let scale = (-sharpness).exp2();
        Self {
            const0: [scale.to_bits(), pack_half2(scale, scale), 0, 0],
            ..Self::default()
        }
    }

    /// Output-to-input mapping stored in `const0`: `(scale_x, scale_y,
    /// offset_x, offset_y)`.
    pub fn easu_mapping(&self) -> [f32; 4] {
        self.const0.map(f32::from_bits)
    }

    /// RCAS lobe scale stored in `const0.x`.
    pub fn rcas_scale(&self) -> f32 {
        f32::from_bits(self.const0[0])
    }
}

fn bits(values: [f32; 4]) -> [u32; 4] {
    values.map(f32::to_bits)
}

/// Pack two floats into one word as IEEE half precision, `lo` in the low
/// 16 bits.
pub fn pack_half2(lo: f32, hi: f32) -> u32 {
    u32::from(f16::from_f32(lo).to_bits()) | (u32::from(f16::from_f32(hi).to_bits()) << 16)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dims::Dimensions;

    fn close(a: u32, b: f32) -> bool {
        (f32::from_bits(a) - b).abs() <= 1e-6
    }

    #[test]
    fn layout_is_five_uint4_rows() {
        assert_eq!(std::mem::size_of::<UpscaleConstants>(), 80);
        assert_eq!(std::mem::size_of::<UpscaleConstants>() % 16, 0);
    }

    #[test]
    fn easu_720p_to_1080p() {
        let c = UpscaleConstants::easu(FrameDims::new(
            Dimensions::new(1280, 720),
            Dimensions::new(1920, 1080),
        ));

        let scale = 2.0 / 3.0;
        assert!(close(c.const0[0], scale));
        assert!(close(c.const0[1], scale));
        assert!(close(c.const0[2], 0.5 * scale - 0.5));
        assert!(close(c.const0[3], 0.5 * scale - 0.5));

        assert!(close(c.const1[0], 1.0 / 1280.0));
        assert!(close(c.const1[1], 1.0 / 720.0));
        assert!(close(c.const1[2], 1.0 / 1280.0));
        assert!(close(c.const1[3], -1.0 / 720.0));

        assert!(close(c.const2[0], -1.0 / 1280.0));
        assert!(close(c.const2[1], 2.0 / 720.0));
        assert!(close(c.const2[2], 1.0 / 1280.0));
        assert!(close(c.const2[3], 2.0 / 720.0));

        assert_eq!(c.const3[0], 0);
        assert!(close(c.const3[1], 4.0 / 720.0));
        assert_eq!(c.const3[2], 0);
        assert_eq!(c.const3[3], 0);
        assert_eq!(c.sample, [0; 4]);
    }

    #[test]
    fn easu_identity_scale_has_zero_offset() {
        let same = Dimensions::new(512, 256);
        let [sx, sy, ox, oy] = UpscaleConstants::easu(FrameDims::new(same, same)).easu_mapping();
        assert_eq!((sx, sy, ox, oy), (1.0, 1.0, 0.0, 0.0));
    }

    #[test]
    fn rcas_default_sharpness() {
        let c = UpscaleConstants::rcas(0.0);
        assert_eq!(c.const0[0], 1.0f32.to_bits());
        assert_eq!(c.const0[1], 0x3C00_3C00);
        assert_eq!(c.const0[2], 0);
        assert_eq!(c.const0[3], 0);
        assert_eq!(c.const1, [0; 4]);
    }

    #[test]
    fn rcas_stops_halve_the_scale() {
        assert_eq!(UpscaleConstants::rcas(1.0).rcas_scale(), 0.5);
        assert_eq!(UpscaleConstants::rcas(2.0).rcas_scale(), 0.25);
        assert_eq!(UpscaleConstants::rcas(1.0).const0[1], 0x3800_3800);
    }

    #[test]
    fn rcas_clamps_out_of_range_sharpness() {
        assert_eq!(UpscaleConstants::rcas(-3.0), UpscaleConstants::rcas(0.0));
        assert_eq!(UpscaleConstants::rcas(9.0), UpscaleConstants::rcas(MAX_SHARPNESS));
        assert_eq!(UpscaleConstants::rcas(f32::NAN), UpscaleConstants::rcas(0.0));
    }

    #[test]
    fn half_packing() {
        assert_eq!(pack_half2(0.0, -0.0), 0x8000_0000);
        assert_eq!(pack_half2(1.0, 0.5), 0x3800_3C00);
        assert_eq!(pack_half2(-2.0, 65504.0), 0x7BFF_C000);
        // Overflow goes to infinity.
        assert_eq!(pack_half2(65536.0, f32::INFINITY), 0x7C00_7C00);
        assert_eq!(pack_half2(f32::NAN, 0.0) & 0x7C00, 0x7C00);
        // Smallest subnormal half.
        assert_eq!(pack_half2(2f32.powi(-24), 0.0), 0x0000_0001);
        // 1 + 2^-11 is exactly halfway and rounds to even.
        assert_eq!(pack_half2(1.0 + 1.0 / 2048.0, 0.0), 0x0000_3C00);
    }
}
