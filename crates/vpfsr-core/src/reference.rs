//! CPU rendition of the two compute stages.
//!
//! Mirrors `easu.hlsl` and `rcas.hlsl` operation for operation on linear
//! `f32` RGBA images. Used to pin down numeric expectations in tests; it is
//! not on any runtime path.

use crate::constants::{UpscaleConstants, RCAS_LIMIT};
use crate::dims::Dimensions;

pub type Pixel = [f32; 4];

/// A row-major RGBA image with clamp-to-edge reads.
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    dims: Dimensions,
    pixels: Vec<Pixel>,
}

impl Image {
    pub fn filled(dims: Dimensions, value: Pixel) -> Self {
        Self {
            dims,
            pixels: vec![value; dims.area()],
        }
    }

    pub fn from_fn(dims: Dimensions, mut f: impl FnMut(u32, u32) -> Pixel) -> Self {
        let mut pixels = Vec::with_capacity(dims.area());
        for y in 0..dims.height {
            for x in 0..dims.width {
                pixels.push(f(x, y));
            }
        }
        Self { dims, pixels }
    }

    pub fn dims(&self) -> Dimensions {
        self.dims
    }

    pub fn pixels(&self) -> &[Pixel] {
        &self.pixels
    }

    pub fn get(&self, x: u32, y: u32) -> Pixel {
        self.pixels[(y * self.dims.width + x) as usize]
    }

    /// Read with coordinates clamped to the edge, like a clamp sampler at a
    /// texel centre.
    pub fn clamped(&self, x: i64, y: i64) -> Pixel {
        let x = x.clamp(0, i64::from(self.dims.width) - 1) as u32;
        let y = y.clamp(0, i64::from(self.dims.height) - 1) as u32;
        self.get(x, y)
    }
}

fn luma(p: Pixel) -> f32 {
    p[2] * 0.5 + (p[0] * 0.5 + p[1])
}

/// Accumulates direction and edge length for one of the four bilinear
/// corners. `a`..`e` are the lumas above, left, centre, right and below.
fn easu_set(dir: &mut [f32; 2], len: &mut f32, w: f32, a: f32, b: f32, c: f32, d: f32, e: f32) {
    let edge = |lo: f32, hi: f32, span: f32| {
        let m = lo.abs().max(hi.abs());
        if m == 0.0 {
            0.0
        } else {
            let l = (span.abs() / m).clamp(0.0, 1.0);
            l * l
        }
    };

    let dir_x = d - b;
    dir[0] += dir_x * w;
    *len += edge(d - c, c - b, dir_x) * w;

    let dir_y = e - a;
    dir[1] += dir_y * w;
    *len += edge(e - c, c - a, dir_y) * w;
}

fn lanczos_weight(offset: [f32; 2], dir: [f32; 2], len2: [f32; 2], lob: f32, clp: f32) -> f32 {
    let vx = (offset[0] * dir[0] + offset[1] * dir[1]) * len2[0];
    let vy = (offset[0] * -dir[1] + offset[1] * dir[0]) * len2[1];
    let d2 = (vx * vx + vy * vy).min(clp);
    let mut wb = 0.4 * d2 - 1.0;
    let mut wa = lob * d2 - 1.0;
    wb *= wb;
    wa *= wa;
    wb = 1.5625 * wb - 0.5625;
    wb * wa
}

/// Edge-adaptive upsample from `input` to `output` using EASU constants.
pub fn easu(input: &Image, constants: &UpscaleConstants, output: Dimensions) -> Image {
    let [scale_x, scale_y, offset_x, offset_y] = constants.easu_mapping();

    Image::from_fn(output, |x, y| {
        let px = x as f32 * scale_x + offset_x;
        let py = y as f32 * scale_y + offset_y;
        let fx = px.floor();
        let fy = py.floor();
        let (tx, ty) = (px - fx, py - fy);
        let (ix, iy) = (fx as i64, fy as i64);

        //    b c
        //  e f g h
        //  i j k l
        //    n o
        const TAPS: [(i64, i64); 12] = [
            (0, -1),
            (1, -1),
            (-1, 0),
            (0, 0),
            (1, 0),
            (2, 0),
            (-1, 1),
            (0, 1),
            (1, 1),
            (2, 1),
            (0, 2),
            (1, 2),
        ];
        let texels = TAPS.map(|(dx, dy)| input.clamped(ix + dx, iy + dy));
        let [b, c, e, f, g, h, i, j, k, l, n, o] = texels.map(luma);

        let mut dir = [0.0f32; 2];
        let mut len = 0.0f32;
        easu_set(&mut dir, &mut len, (1.0 - tx) * (1.0 - ty), b, e, f, g, j);
        easu_set(&mut dir, &mut len, tx * (1.0 - ty), c, f, g, h, k);
        easu_set(&mut dir, &mut len, (1.0 - tx) * ty, f, i, j, k, n);
        easu_set(&mut dir, &mut len, tx * ty, g, j, k, l, o);

        let dir_r = dir[0] * dir[0] + dir[1] * dir[1];
        let zero = dir_r < 1.0 / 32768.0;
        let dir_r = if zero { 1.0 } else { dir_r.sqrt().recip() };
        if zero {
            dir[0] = 1.0;
        }
        dir = [dir[0] * dir_r, dir[1] * dir_r];

        let len = {
            let half = len * 0.5;
            half * half
        };
        let stretch = (dir[0] * dir[0] + dir[1] * dir[1]) / dir[0].abs().max(dir[1].abs());
        let len2 = [1.0 + (stretch - 1.0) * len, 1.0 - 0.5 * len];
        let lob = 0.5 + ((1.0 / 4.0 - 0.04) - 0.5) * len;
        let clp = lob.recip();

        let mut acc = [0.0f32; 4];
        let mut total = 0.0f32;
        for ((dx, dy), texel) in TAPS.iter().zip(texels.iter()) {
            let offset = [*dx as f32 - tx, *dy as f32 - ty];
            let w = lanczos_weight(offset, dir, len2, lob, clp);
            for (a, t) in acc.iter_mut().zip(texel) {
                *a += t * w;
            }
            total += w;
        }

        // Dering against the 2x2 neighbourhood around the sample point.
        let ring = [texels[3], texels[4], texels[7], texels[8]];
        let mut out = [0.0f32; 4];
        for ch in 0..4 {
            let lo = ring.iter().map(|p| p[ch]).fold(f32::INFINITY, f32::min);
            let hi = ring.iter().map(|p| p[ch]).fold(f32::NEG_INFINITY, f32::max);
            out[ch] = (acc[ch] / total).max(lo).min(hi);
        }
        out
    })
}

/// Contrast-adaptive sharpen at the input's own resolution.
pub fn rcas(input: &Image, constants: &UpscaleConstants) -> Image {
    let sharpness = constants.rcas_scale();

    Image::from_fn(input.dims(), |x, y| {
        let (x, y) = (i64::from(x), i64::from(y));
        let b = input.clamped(x, y - 1);
        let d = input.clamped(x - 1, y);
        let e = input.clamped(x, y);
        let f = input.clamped(x + 1, y);
        let h = input.clamped(x, y + 1);

        let mut lobe_max = f32::NEG_INFINITY;
        for ch in 0..3 {
            let mn4 = b[ch].min(d[ch]).min(f[ch].min(h[ch]));
            let mx4 = b[ch].max(d[ch]).max(f[ch].max(h[ch]));
            let hit_min = mn4.min(e[ch]) / (4.0 * mx4);
            let hit_max = (1.0 - mx4.max(e[ch])) / (4.0 * mn4 - 4.0);
            // f32::max drops a NaN operand, as the GPU does.
            lobe_max = lobe_max.max((-hit_min).max(hit_max));
        }
        let lobe = (-RCAS_LIMIT).max(lobe_max.min(0.0)) * sharpness;
        let rcp = (4.0 * lobe + 1.0).recip();

        let mut out = e;
        for ch in 0..3 {
            out[ch] = (lobe * (b[ch] + d[ch] + f[ch] + h[ch]) + e[ch]) * rcp;
        }
        out
    })
}
