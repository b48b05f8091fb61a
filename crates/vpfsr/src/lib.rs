//! VideoProcessorBlt interposer.
//!
//! Loaded into a media player, this DLL redirects
//! `ID3D11VideoContext::VideoProcessorBlt` so that each video frame is
//! upscaled to the destination size with a two-stage compute pipeline
//! (edge-adaptive upsample, then contrast-adaptive sharpen) before the host
//! sees it. A hotkey (F10 by default) switches between enhancing and plain
//! pass-through.

pub mod dispatcher;
pub mod logging;

#[cfg(target_os = "windows")]
mod blt;
#[cfg(target_os = "windows")]
mod hotkey;
#[cfg(target_os = "windows")]
mod install;

pub use dispatcher::{Dispatcher, EnhanceError, FramePath, Mode};

#[cfg(target_os = "windows")]
#[no_mangle]
#[allow(non_snake_case)]
unsafe extern "system" fn DllMain(
    module: windows::Win32::Foundation::HINSTANCE,
    call_reason: u32,
    _reserved: *mut std::ffi::c_void,
) -> bool {
    use windows::Win32::Foundation::HMODULE;
    use windows::Win32::System::LibraryLoader::DisableThreadLibraryCalls;
    use windows::Win32::System::SystemServices::DLL_PROCESS_ATTACH;

    if call_reason == DLL_PROCESS_ATTACH {
        let _ = DisableThreadLibraryCalls(HMODULE(module.0));
        // Without the thread the host simply runs unhooked.
        let _ = install::spawn();
    }
    true
}
