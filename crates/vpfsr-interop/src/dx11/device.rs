//! The host's D3D11 device, reached through its video context.
//!
//! [`HostDevice::from_video_context`] is used on every intercepted call, so
//! the pipeline always renders on whichever device the host is using.
//! [`HostDevice::create_probe`] makes a short-lived device of our own, only
//! to find the shared `ID3D11VideoContext` vtable.

use anyhow::{anyhow, Result};
use windows::core::Interface;
use windows::Win32::Foundation::HMODULE;
use windows::Win32::Graphics::Direct3D::*;
use windows::Win32::Graphics::Direct3D11::*;
use windows::Win32::Graphics::Dxgi::Common::*;

use tracing::debug;
use vpfsr_core::Dimensions;

use crate::surface::SurfaceInfo;

/// Device, immediate context and their video interfaces.
pub struct HostDevice {
    device: ID3D11Device,
    context: ID3D11DeviceContext,
    video_device: ID3D11VideoDevice,
    video_context: ID3D11VideoContext,
}

impl HostDevice {
    /// Recover the device objects behind a host's video context.
    pub fn from_video_context(video_context: &ID3D11VideoContext) -> Result<Self> {
        let device = unsafe { video_context.GetDevice() }
            .map_err(|e| anyhow!("Failed to get D3D11 device from video context: {e}"))?;
        let context = unsafe { device.GetImmediateContext() }
            .map_err(|e| anyhow!("Failed to get D3D11 immediate context: {e}"))?;
        let video_device = device
            .cast::<ID3D11VideoDevice>()
            .map_err(|e| anyhow!("D3D11 device has no video device interface: {e}"))?;

        Ok(Self {
            device,
            context,
            video_device,
            video_context: video_context.clone(),
        })
    }

    /// Create a throwaway device with video support, trying hardware first
    /// and falling back to WARP.
    pub fn create_probe() -> Result<Self> {
        let mut device = None;
        let mut context = None;

        let driver_types = [D3D_DRIVER_TYPE_HARDWARE, D3D_DRIVER_TYPE_WARP];
        let mut last_error = None;

        for &driver_type in &driver_types {
            let hr = unsafe {
                D3D11CreateDevice(
                    None,
                    driver_type,
                    HMODULE::default(),
                    D3D11_CREATE_DEVICE_VIDEO_SUPPORT,
                    Some(&[D3D_FEATURE_LEVEL_11_0]),
                    D3D11_SDK_VERSION,
                    Some(&mut device as *mut _),
                    None,
                    Some(&mut context as *mut _),
                )
            };
            match hr {
                Ok(()) => {
                    debug!("Probe D3D11 device created with driver type {:?}", driver_type);
                    last_error = None;
                    break;
                }
                Err(e) => last_error = Some(e),
            }
        }

        if let Some(e) = last_error {
            return Err(anyhow!("Failed to create D3D11 device with any driver type: {e}"));
        }

        let device = device.ok_or_else(|| anyhow!("D3D11CreateDevice returned null device"))?;
        let context =
            context.ok_or_else(|| anyhow!("D3D11CreateDevice returned null immediate context"))?;
        let video_device = device
            .cast::<ID3D11VideoDevice>()
            .map_err(|e| anyhow!("Probe device has no ID3D11VideoDevice: {e}"))?;
        let video_context = context
            .cast::<ID3D11VideoContext>()
            .map_err(|e| anyhow!("Probe context has no ID3D11VideoContext: {e}"))?;

        Ok(Self {
            device,
            context,
            video_device,
            video_context,
        })
    }

    pub fn device(&self) -> &ID3D11Device {
        &self.device
    }

    pub fn context(&self) -> &ID3D11DeviceContext {
        &self.context
    }

    pub fn video_device(&self) -> &ID3D11VideoDevice {
        &self.video_device
    }

    pub fn video_context(&self) -> &ID3D11VideoContext {
        &self.video_context
    }

    /// Raw vtable of the video context. Every `ID3D11VideoContext` created
    /// by the same `d3d11.dll` shares it.
    pub fn video_context_vtable(&self) -> *const usize {
        unsafe { *(self.video_context.as_raw() as *const *const usize) }
    }
}

/// Size and format of a texture.
pub fn describe_texture(texture: &ID3D11Texture2D) -> SurfaceInfo {
    let mut desc = D3D11_TEXTURE2D_DESC::default();
    unsafe { texture.GetDesc(&mut desc) };
    SurfaceInfo::new(Dimensions::new(desc.Width, desc.Height), desc.Format.0 as u32)
}

/// Create a single-mip, non-multisampled 2D texture.
pub fn create_texture(
    device: &ID3D11Device,
    dims: Dimensions,
    format: DXGI_FORMAT,
    bind: D3D11_BIND_FLAG,
) -> Result<ID3D11Texture2D> {
    let desc = D3D11_TEXTURE2D_DESC {
        Width: dims.width,
        Height: dims.height,
        MipLevels: 1,
        ArraySize: 1,
        Format: format,
        SampleDesc: DXGI_SAMPLE_DESC {
            Count: 1,
            Quality: 0,
        },
        Usage: D3D11_USAGE_DEFAULT,
        BindFlags: bind.0 as u32,
        CPUAccessFlags: 0,
        MiscFlags: 0,
    };

    let mut texture = None;
    unsafe { device.CreateTexture2D(&desc, None, Some(&mut texture as *mut _)) }
        .map_err(|e| anyhow!("Failed to create D3D11 texture {dims}: {e}"))?;
    texture.ok_or_else(|| anyhow!("D3D11 CreateTexture2D returned null"))
}

/// Create a dynamic constant buffer of the given size (rounded up to 16-byte
/// alignment).
pub fn create_dynamic_cbuf(device: &ID3D11Device, size: usize) -> Result<ID3D11Buffer> {
    let aligned_size = (size + 15) & !15;
    let desc = D3D11_BUFFER_DESC {
        ByteWidth: aligned_size as u32,
        Usage: D3D11_USAGE_DYNAMIC,
        BindFlags: D3D11_BIND_CONSTANT_BUFFER.0 as u32,
        CPUAccessFlags: D3D11_CPU_ACCESS_WRITE.0 as u32,
        ..Default::default()
    };
    let mut buf = None;
    unsafe { device.CreateBuffer(&desc, None, Some(&mut buf as *mut _)) }
        .map_err(|e| anyhow!("Failed to create D3D11 constant buffer: {e}"))?;
    buf.ok_or_else(|| anyhow!("D3D11 CreateBuffer returned null"))
}
