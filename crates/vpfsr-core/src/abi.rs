//! Hardcoded Direct3D 11 ABI constants.
//!
//! Kept as plain integers so the dispatcher's decisions can be tested off
//! Windows. They must agree with the values in the `windows` crate.

/// `ID3D11VideoContext` vtable index of `VideoProcessorBlt`.
pub const VIDEO_PROCESSOR_BLT_SLOT: usize = 53;

/// `DXGI_FORMAT_B8G8R8A8_UNORM`, the pipeline's working format.
pub const WORKING_FORMAT: u32 = 87;

/// `S_OK`.
pub const S_OK: i32 = 0;

/// `VK_F10`, the default toggle key.
pub const VK_F10: u16 = 0x79;

/// `VK_F1`; `F1`..`F24` are contiguous from here.
pub const VK_F1: u16 = 0x70;

/// Modules that must already be loaded in the host before the call site is
/// touched. Names are NUL-terminated for `GetModuleHandleA`.
pub const REQUIRED_MODULES: [&[u8]; 3] = [b"d3d11.dll\0", b"dxcore.dll\0", b"mf.dll\0"];
