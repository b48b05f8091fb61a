//! Safe byte-slice conversion for GPU constant blocks.

use vpfsr_core::UpscaleConstants;

/// Convert a `#[repr(C)]` struct to a byte slice for constant buffer upload.
///
/// # Safety
///
/// Only implement on `#[repr(C)]` structs whose fields are all plain numeric
/// types (f32, i32, u32, etc.) with no pointers, references, or
/// padding-dependent invariants.
pub unsafe trait AsBytes: Sized {
    /// View `self` as a byte slice. The returned slice has length
    /// `std::mem::size_of::<Self>()`.
    fn as_bytes(&self) -> &[u8] {
        unsafe {
            std::slice::from_raw_parts(
                self as *const Self as *const u8,
                std::mem::size_of::<Self>(),
            )
        }
    }
}

// SAFETY: five `[u32; 4]` rows, no padding.
unsafe impl AsBytes for UpscaleConstants {}
