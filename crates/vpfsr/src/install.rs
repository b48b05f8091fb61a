//! Hook installation, run once on a thread of its own.

use anyhow::{anyhow, Result};
use parking_lot::Mutex;
use tracing::{error, info, warn};
use windows::core::PCSTR;
use windows::Win32::System::LibraryLoader::GetModuleHandleA;

use vpfsr_core::abi::{REQUIRED_MODULES, VIDEO_PROCESSOR_BLT_SLOT};
use vpfsr_core::{Config, EnabledFlag, Hotkey};
use vpfsr_gpu::{include_stage, Dx11ResourceFactory, ResourceManager, ShaderSet};
use vpfsr_hook::{Detour, ProcessMemory, RedirectTable};
use vpfsr_interop::dx11::{HostDevice, VideoBridge, VideoProcessorBltFn};

use crate::blt::{hooked_video_processor_blt, CallSite, InstalledHook, Interceptor, HOOK};
use crate::hotkey::AsyncKeyState;
use crate::logging;

/// Start the install thread. Safe to call under the loader lock: the thread
/// does not run until `DllMain` returns.
pub fn spawn() -> std::io::Result<()> {
    std::thread::Builder::new()
        .name("vpfsr-install".into())
        .spawn(|| {
            logging::init();
            if let Err(e) = install() {
                error!("VideoProcessorBlt hook not installed: {e:#}");
            }
        })
        .map(drop)
}

fn missing_module() -> Option<&'static str> {
    REQUIRED_MODULES.iter().find_map(|name| {
        let loaded = unsafe { GetModuleHandleA(PCSTR(name.as_ptr())) }.is_ok();
        (!loaded).then(|| std::str::from_utf8(&name[..name.len() - 1]).unwrap_or("?"))
    })
}

fn install() -> Result<()> {
    if let Some(module) = missing_module() {
        warn!(module, "media stack not loaded in this process, not hooking");
        return Ok(());
    }

    let config = Config::from_env();
    info!(
        hotkey = format_args!("{:#04x}", config.hotkey),
        sharpness = config.sharpness,
        enabled = config.start_enabled,
        "installing VideoProcessorBlt hook"
    );

    let target = {
        let probe = HostDevice::create_probe()?;
        let vtable = probe.video_context_vtable();
        // SAFETY: ID3D11VideoContext has more than 53 methods.
        unsafe { *vtable.add(VIDEO_PROCESSOR_BLT_SLOT) }
    };

    let shaders = ShaderSet::embedded(include_stage!("easu"), include_stage!("rcas"))
        .with_overrides(config.shader_dir.as_deref());

    let replacement = hooked_video_processor_blt as VideoProcessorBltFn as usize;
    let mut table = RedirectTable::new();
    // SAFETY: `target` is the entry of VideoProcessorBlt in d3d11.dll and
    // the replacement has the same signature.
    let (patch_len, trampoline) = unsafe {
        let patch_len = Detour::measure(&ProcessMemory, target)?;
        let trampoline = table.prepare(
            CallSite::VideoProcessorBlt,
            ProcessMemory,
            target,
            replacement,
            patch_len,
        )?;
        (patch_len, trampoline)
    };
    // SAFETY: the trampoline replays the original prologue and jumps back.
    let original = unsafe { std::mem::transmute::<usize, VideoProcessorBltFn>(trampoline) };

    let hook = InstalledHook {
        table: Mutex::new(table),
        original,
        flag: EnabledFlag::new(config.start_enabled),
        hotkey: Hotkey::new(AsyncKeyState::new(config.hotkey)),
        sharpness: config.sharpness,
        interceptor: Mutex::new(Interceptor {
            resources: ResourceManager::new(Dx11ResourceFactory::new(shaders)),
            bridge: VideoBridge::new(original),
        }),
    };
    HOOK.set(hook)
        .map_err(|_| anyhow!("hook state already published"))?;
    let hook = HOOK.get().ok_or_else(|| anyhow!("hook state missing after publish"))?;

    unsafe { hook.table.lock().install(&CallSite::VideoProcessorBlt) }?;

    info!(
        entry = format_args!("{target:#x}"),
        trampoline = format_args!("{trampoline:#x}"),
        patch_len,
        "VideoProcessorBlt hooked"
    );
    Ok(())
}
