//! Format conversion with the D3D11 video processor.
//!
//! The host's frames arrive as video-processor input views in whatever
//! layout its decoder produced. The compute pipeline works in BGRA8, so the
//! frame is converted on the way in and, if the destination is not BGRA8,
//! on the way out. Both directions use a short-lived enumerator, processor
//! and views; they drop at the end of [`VideoBridge::convert`].

use std::ffi::c_void;
use std::mem::ManuallyDrop;

use anyhow::{anyhow, Result};
use windows::core::{Interface, HRESULT};
use windows::Win32::Graphics::Direct3D11::*;
use windows::Win32::Graphics::Dxgi::Common::DXGI_RATIONAL;

use tracing::trace;
use vpfsr_core::Dimensions;

use super::device::HostDevice;

/// `ID3D11VideoContext::VideoProcessorBlt` as it sits in the vtable.
pub type VideoProcessorBltFn = unsafe extern "system" fn(
    this: *mut c_void,
    processor: *mut c_void,
    output_view: *mut c_void,
    output_frame: u32,
    stream_count: u32,
    streams: *const D3D11_VIDEO_PROCESSOR_STREAM,
) -> HRESULT;

/// Frame rate declared to the enumerator. Only used for capability lookup.
const ASSUMED_FRAME_RATE: DXGI_RATIONAL = DXGI_RATIONAL {
    Numerator: 30,
    Denominator: 1,
};

/// What to read from.
pub enum BridgeInput<'a> {
    /// The caller's own stream descriptors, passed through unchanged.
    Streams(&'a [D3D11_VIDEO_PROCESSOR_STREAM]),
    /// A texture that gets a fresh input view.
    Texture(&'a ID3D11Texture2D),
}

pub struct ConvertRequest<'a> {
    pub source: BridgeInput<'a>,
    pub input_dims: Dimensions,
    /// Must have been created with `D3D11_BIND_RENDER_TARGET`.
    pub dest: &'a ID3D11Texture2D,
    pub output_dims: Dimensions,
    pub output_frame: u32,
}

/// Runs conversions through the un-hooked `VideoProcessorBlt`.
#[derive(Clone, Copy)]
pub struct VideoBridge {
    blt: VideoProcessorBltFn,
}

impl VideoBridge {
    /// `blt` must reach the un-hooked code (the trampoline), never
    /// the hooked entry, or every conversion would recurse.
    pub fn new(blt: VideoProcessorBltFn) -> Self {
        Self { blt }
    }

    /// Convert `request.source` into `request.dest`.
    pub fn convert(&self, host: &HostDevice, request: ConvertRequest<'_>) -> Result<()> {
        let video_device = host.video_device();

        let content = D3D11_VIDEO_PROCESSOR_CONTENT_DESC {
            InputFrameFormat: D3D11_VIDEO_FRAME_FORMAT_PROGRESSIVE,
            InputFrameRate: ASSUMED_FRAME_RATE,
            InputWidth: request.input_dims.width,
            InputHeight: request.input_dims.height,
            OutputFrameRate: ASSUMED_FRAME_RATE,
            OutputWidth: request.output_dims.width,
            OutputHeight: request.output_dims.height,
            Usage: D3D11_VIDEO_USAGE_PLAYBACK_NORMAL,
        };
        let enumerator = unsafe { video_device.CreateVideoProcessorEnumerator(&content) }
            .map_err(|e| anyhow!("Failed to create video processor enumerator: {e}"))?;
        let processor = unsafe { video_device.CreateVideoProcessor(&enumerator, 0) }
            .map_err(|e| anyhow!("Failed to create video processor: {e}"))?;

        let output_desc = D3D11_VIDEO_PROCESSOR_OUTPUT_VIEW_DESC {
            ViewDimension: D3D11_VPOV_DIMENSION_TEXTURE2D,
            Anonymous: D3D11_VIDEO_PROCESSOR_OUTPUT_VIEW_DESC_0 {
                Texture2D: D3D11_TEX2D_VPOV { MipSlice: 0 },
            },
        };
        let mut output_view = None;
        unsafe {
            video_device.CreateVideoProcessorOutputView(
                request.dest,
                &enumerator,
                &output_desc,
                Some(&mut output_view as *mut _),
            )
        }
        .map_err(|e| anyhow!("Failed to create video processor output view: {e}"))?;
        let output_view = output_view
            .ok_or_else(|| anyhow!("CreateVideoProcessorOutputView returned null"))?;

        trace!(
            input = %request.input_dims,
            output = %request.output_dims,
            "video processor conversion"
        );

        match request.source {
            BridgeInput::Streams(streams) => {
                self.blit(host, &processor, &output_view, request.output_frame, streams)
            }
            BridgeInput::Texture(texture) => {
                let input_desc = D3D11_VIDEO_PROCESSOR_INPUT_VIEW_DESC {
                    FourCC: 0,
                    ViewDimension: D3D11_VPIV_DIMENSION_TEXTURE2D,
                    Anonymous: D3D11_VIDEO_PROCESSOR_INPUT_VIEW_DESC_0 {
                        Texture2D: D3D11_TEX2D_VPIV {
                            MipSlice: 0,
                            ArraySlice: 0,
                        },
                    },
                };
                let mut input_view = None;
                unsafe {
                    video_device.CreateVideoProcessorInputView(
                        texture,
                        &enumerator,
                        &input_desc,
                        Some(&mut input_view as *mut _),
                    )
                }
                .map_err(|e| anyhow!("Failed to create video processor input view: {e}"))?;
                let input_view = input_view
                    .ok_or_else(|| anyhow!("CreateVideoProcessorInputView returned null"))?;

                let stream = D3D11_VIDEO_PROCESSOR_STREAM {
                    Enable: true.into(),
                    pInputSurface: ManuallyDrop::new(Some(input_view)),
                    ..Default::default()
                };
                let result = self.blit(
                    host,
                    &processor,
                    &output_view,
                    request.output_frame,
                    std::slice::from_ref(&stream),
                );
                drop(ManuallyDrop::into_inner(stream.pInputSurface));
                result
            }
        }
    }

    fn blit(
        &self,
        host: &HostDevice,
        processor: &ID3D11VideoProcessor,
        output_view: &ID3D11VideoProcessorOutputView,
        output_frame: u32,
        streams: &[D3D11_VIDEO_PROCESSOR_STREAM],
    ) -> Result<()> {
        let hr = unsafe {
            (self.blt)(
                host.video_context().as_raw(),
                processor.as_raw(),
                output_view.as_raw(),
                output_frame,
                streams.len() as u32,
                streams.as_ptr(),
            )
        };
        hr.ok()
            .map_err(|e| anyhow!("VideoProcessorBlt failed: {e}"))
    }
}
