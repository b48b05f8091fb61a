//! The replacement `VideoProcessorBlt` and the state it runs against.

use std::ffi::c_void;
use std::panic::{self, AssertUnwindSafe};

use anyhow::{anyhow, Result};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tracing::{error, trace};
use windows::core::{Interface, HRESULT};
use windows::Win32::Foundation::E_FAIL;
use windows::Win32::Graphics::Direct3D11::*;

use vpfsr_core::{EnabledFlag, FrameDims, Hotkey};
use vpfsr_gpu::{ComputeContext, Dx11ResourceFactory, ResourceManager};
use vpfsr_hook::{ProcessMemory, RedirectTable};
use vpfsr_interop::dx11::{
    describe_texture, BridgeInput, ConvertRequest, HostDevice, VideoBridge, VideoProcessorBltFn,
};
use vpfsr_interop::{PresentRoute, SurfaceInfo};

use crate::dispatcher::{Dispatcher, FramePath};
use crate::hotkey::AsyncKeyState;

/// Entry points this crate redirects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallSite {
    VideoProcessorBlt,
}

/// Everything the replacement needs. Published before the call site is
/// patched and never torn down.
pub struct InstalledHook {
    pub table: Mutex<RedirectTable<CallSite, ProcessMemory>>,
    pub original: VideoProcessorBltFn,
    pub flag: EnabledFlag,
    pub hotkey: Hotkey<AsyncKeyState>,
    pub sharpness: f32,
    pub interceptor: Mutex<Interceptor>,
}

/// Mutable per-device state, touched only by the thread that holds the lock.
pub struct Interceptor {
    pub resources: ResourceManager<Dx11ResourceFactory>,
    pub bridge: VideoBridge,
}

// SAFETY: the D3D11 objects inside are only used while the mutex is held,
// and D3D11 devices are free-threaded. The immediate context is only driven
// from inside the host's own VideoProcessorBlt call.
unsafe impl Send for Interceptor {}

pub static HOOK: OnceCell<InstalledHook> = OnceCell::new();

/// The original arguments, kept verbatim for forwarding.
#[derive(Clone, Copy)]
struct BltArgs {
    this: *mut c_void,
    processor: *mut c_void,
    output_view: *mut c_void,
    output_frame: u32,
    stream_count: u32,
    streams: *const D3D11_VIDEO_PROCESSOR_STREAM,
}

impl BltArgs {
    unsafe fn forward(&self, original: VideoProcessorBltFn) -> HRESULT {
        original(
            self.this,
            self.processor,
            self.output_view,
            self.output_frame,
            self.stream_count,
            self.streams,
        )
    }

    fn streams(&self) -> &[D3D11_VIDEO_PROCESSOR_STREAM] {
        if self.streams.is_null() || self.stream_count == 0 {
            &[]
        } else {
            // SAFETY: the host passes `stream_count` initialised entries.
            unsafe { std::slice::from_raw_parts(self.streams, self.stream_count as usize) }
        }
    }
}

pub unsafe extern "system" fn hooked_video_processor_blt(
    this: *mut c_void,
    processor: *mut c_void,
    output_view: *mut c_void,
    output_frame: u32,
    stream_count: u32,
    streams: *const D3D11_VIDEO_PROCESSOR_STREAM,
) -> HRESULT {
    let args = BltArgs {
        this,
        processor,
        output_view,
        output_frame,
        stream_count,
        streams,
    };

    // The call site is patched only after HOOK is set.
    let Some(hook) = HOOK.get() else {
        return E_FAIL;
    };

    let Some(mut interceptor) = hook.interceptor.try_lock() else {
        trace!("interceptor busy, forwarding");
        return args.forward(hook.original);
    };

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        let dispatcher = Dispatcher::new(&hook.flag, &hook.hotkey, hook.sharpness);
        let mut call = BltCall {
            args,
            original: hook.original,
            interceptor: &mut *interceptor,
        };
        HRESULT(dispatcher.intercept(&mut call))
    }));

    match outcome {
        Ok(hr) => hr,
        Err(_) => {
            error!("panic while handling VideoProcessorBlt, forwarding");
            args.forward(hook.original)
        }
    }
}

struct BltCall<'a> {
    args: BltArgs,
    original: VideoProcessorBltFn,
    interceptor: &'a mut Interceptor,
}

struct Frame {
    host: HostDevice,
    dest: ID3D11Texture2D,
    dest_info: SurfaceInfo,
    dims: FrameDims,
}

impl BltCall<'_> {
    fn video_context(&self) -> Result<ID3D11VideoContext> {
        // SAFETY: `this` is the host's live video context for this call.
        unsafe { ID3D11VideoContext::from_raw_borrowed(&self.args.this) }
            .cloned()
            .ok_or_else(|| anyhow!("null video context"))
    }

    fn output_texture(&self) -> Result<ID3D11Texture2D> {
        let view =
            unsafe { ID3D11VideoProcessorOutputView::from_raw_borrowed(&self.args.output_view) }
                .ok_or_else(|| anyhow!("null output view"))?;
        let resource = unsafe { view.GetResource() }
            .map_err(|e| anyhow!("Failed to get output view resource: {e}"))?;
        resource
            .cast::<ID3D11Texture2D>()
            .map_err(|e| anyhow!("Output resource is not a 2D texture: {e}"))
    }

    fn input_texture(&self) -> Result<ID3D11Texture2D> {
        let view = self
            .args
            .streams()
            .first()
            .and_then(|stream| stream.pInputSurface.as_ref())
            .ok_or_else(|| anyhow!("null input surface"))?;
        let resource = unsafe { view.GetResource() }
            .map_err(|e| anyhow!("Failed to get input view resource: {e}"))?;
        resource
            .cast::<ID3D11Texture2D>()
            .map_err(|e| anyhow!("Input resource is not a 2D texture: {e}"))
    }
}

impl FramePath for BltCall<'_> {
    type Frame = Frame;

    fn has_input(&self) -> bool {
        self.args
            .streams()
            .first()
            .is_some_and(|stream| stream.pInputSurface.is_some())
    }

    fn resolve(&mut self) -> Result<Frame> {
        let host = HostDevice::from_video_context(&self.video_context()?)?;
        let input = describe_texture(&self.input_texture()?);
        let dest = self.output_texture()?;
        let dest_info = describe_texture(&dest);

        Ok(Frame {
            host,
            dest,
            dest_info,
            dims: FrameDims::new(input.dims, dest_info.dims),
        })
    }

    fn ensure_ready(&mut self, frame: &Frame) -> bool {
        self.interceptor
            .resources
            .ensure_ready(frame.host.device(), frame.dims)
            .is_some()
    }

    fn convert_input(&mut self, frame: &Frame) -> Result<()> {
        let generation = self
            .interceptor
            .resources
            .generation()
            .ok_or_else(|| anyhow!("no resources"))?;
        let res = generation.resources();

        self.interceptor.bridge.convert(
            &frame.host,
            ConvertRequest {
                source: BridgeInput::Streams(self.args.streams()),
                input_dims: frame.dims.input,
                dest: &res.convert_target,
                output_dims: frame.dims.input,
                output_frame: self.args.output_frame,
            },
        )?;
        unsafe { frame.host.context().CopyResource(&res.input, &res.convert_target) };
        Ok(())
    }

    fn upscale(&mut self, frame: &Frame, sharpness: f32) -> Result<()> {
        let generation = self
            .interceptor
            .resources
            .generation()
            .ok_or_else(|| anyhow!("no resources"))?;
        let compute = ComputeContext::new(frame.host.context());
        compute.run_stage1(generation)?;
        compute.run_stage2(generation, sharpness)
    }

    fn present(&mut self, frame: &Frame) -> Result<()> {
        let generation = self
            .interceptor
            .resources
            .generation()
            .ok_or_else(|| anyhow!("no resources"))?;
        let output = &generation.resources().stage2_output;

        match PresentRoute::for_destination(&frame.dest_info) {
            PresentRoute::Copy => {
                unsafe { frame.host.context().CopyResource(&frame.dest, output) };
                Ok(())
            }
            PresentRoute::Convert => self.interceptor.bridge.convert(
                &frame.host,
                ConvertRequest {
                    source: BridgeInput::Texture(output),
                    input_dims: frame.dims.output,
                    dest: &frame.dest,
                    output_dims: frame.dims.output,
                    output_frame: self.args.output_frame,
                },
            ),
        }
    }

    fn forward(&mut self) -> i32 {
        unsafe { self.args.forward(self.original) }.0
    }
}
