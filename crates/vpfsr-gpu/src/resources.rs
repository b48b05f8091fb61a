//! Per-resolution GPU objects.
//!
//! Everything the two stages touch is sized by the frame, so the whole set
//! is keyed by [`FrameDims`] and rebuilt as one unit. A failed build is
//! remembered for its dims and not retried until the dims change. A set
//! is never rebuilt for a new device alone; that is only reported.

use anyhow::Result;
use tracing::{info, warn};
use vpfsr_core::{FrameDims, UpscaleConstants};

/// Builds a complete resource set for one frame size.
pub trait ResourceFactory {
    type Device: ?Sized;
    type Resources;

    fn create(&self, device: &Self::Device, dims: FrameDims) -> Result<Self::Resources>;

    /// Identity of `device`, stable for its lifetime.
    fn device_key(device: &Self::Device) -> usize;
}

/// One successfully built resource set.
#[derive(Debug)]
pub struct Generation<R> {
    id: u64,
    dims: FrameDims,
    device: usize,
    easu_constants: UpscaleConstants,
    resources: R,
}

impl<R> Generation<R> {
    /// Increments on every successful build.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn dims(&self) -> FrameDims {
        self.dims
    }

    /// [`ResourceFactory::device_key`] of the device that built this set.
    pub fn device_key(&self) -> usize {
        self.device
    }

    /// Stage-1 constants, computed once from [`Generation::dims`].
    pub fn easu_constants(&self) -> &UpscaleConstants {
        &self.easu_constants
    }

    pub fn resources(&self) -> &R {
        &self.resources
    }
}

enum Slot<R> {
    Empty,
    Ready(Generation<R>),
    Failed(FrameDims),
}

pub struct ResourceManager<F: ResourceFactory> {
    factory: F,
    slot: Slot<F::Resources>,
    builds: u64,
    stale_device: bool,
}

impl<F: ResourceFactory> ResourceManager<F> {
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            slot: Slot::Empty,
            builds: 0,
            stale_device: false,
        }
    }

    /// Resources for `dims`, building them if the size changed.
    ///
    /// Returns `None` if the build for `dims` failed, now or on an earlier
    /// call with the same dims.
    pub fn ensure_ready(
        &mut self,
        device: &F::Device,
        dims: FrameDims,
    ) -> Option<&Generation<F::Resources>> {
        let current = match &self.slot {
            Slot::Ready(generation) => generation.dims == dims,
            Slot::Failed(failed) if *failed == dims => return None,
            Slot::Failed(_) | Slot::Empty => false,
        };
        if !current {
            self.rebuild(device, dims);
        }
        self.check_device(device);
        self.generation()
    }

    fn check_device(&mut self, device: &F::Device) {
        let Slot::Ready(generation) = &self.slot else {
            return;
        };
        let key = F::device_key(device);
        if key != generation.device && !self.stale_device {
            warn!(
                generation = generation.id,
                built_on = format_args!("{:#x}", generation.device),
                device = format_args!("{key:#x}"),
                "host device changed but frame size did not; resources belong to the old device"
            );
        }
        self.stale_device = key != generation.device;
    }

    /// Whether the last frame came from a device other than the one that
    /// built the current set.
    pub fn stale_device(&self) -> bool {
        self.stale_device
    }

    fn rebuild(&mut self, device: &F::Device, dims: FrameDims) {
        // Old set goes first so two full sets never coexist.
        self.slot = Slot::Empty;
        self.stale_device = false;

        if !dims.is_valid() {
            warn!(%dims, "not building pipeline resources for an empty frame");
            self.slot = Slot::Failed(dims);
            return;
        }

        match self.factory.create(device, dims) {
            Ok(resources) => {
                self.builds += 1;
                info!(%dims, generation = self.builds, "pipeline resources ready");
                self.slot = Slot::Ready(Generation {
                    id: self.builds,
                    dims,
                    device: F::device_key(device),
                    easu_constants: UpscaleConstants::easu(dims),
                    resources,
                });
            }
            Err(e) => {
                warn!(%dims, "failed to create pipeline resources: {e:#}");
                self.slot = Slot::Failed(dims);
            }
        }
    }

    /// The current set, if one is ready.
    pub fn generation(&self) -> Option<&Generation<F::Resources>> {
        match &self.slot {
            Slot::Ready(generation) => Some(generation),
            _ => None,
        }
    }

    /// Drop the current set and forget any failure.
    pub fn release(&mut self) {
        self.slot = Slot::Empty;
        self.stale_device = false;
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }
}

#[cfg(target_os = "windows")]
mod dx11_impl {
    use super::*;
    use anyhow::anyhow;
    use windows::core::Interface;
    use windows::Win32::Graphics::Direct3D::D3D_SRV_DIMENSION_TEXTURE2D;
    use windows::Win32::Graphics::Direct3D11::*;
    use windows::Win32::Graphics::Dxgi::Common::*;

    use vpfsr_interop::dx11::{create_dynamic_cbuf, create_texture};

    use crate::pipeline::ComputePipeline;
    use crate::shader::{ShaderSet, ShaderStage};

    /// Pixel layout of every pipeline texture.
    pub const WORKING_FORMAT: DXGI_FORMAT = DXGI_FORMAT_B8G8R8A8_UNORM;

    /// Everything both stages need at one resolution.
    pub struct PipelineResources {
        /// Stage-1 source, input dims.
        pub input: ID3D11Texture2D,
        pub input_srv: ID3D11ShaderResourceView,
        /// Video-processor target for the host frame, input dims.
        pub convert_target: ID3D11Texture2D,
        /// Stage-1 result, output dims.
        pub stage1_output: ID3D11Texture2D,
        pub stage1_srv: ID3D11ShaderResourceView,
        pub stage1_uav: ID3D11UnorderedAccessView,
        /// Stage-2 result, output dims.
        pub stage2_output: ID3D11Texture2D,
        pub stage2_uav: ID3D11UnorderedAccessView,
        pub sampler: ID3D11SamplerState,
        pub easu: ComputePipeline,
        pub rcas: ComputePipeline,
        pub easu_cbuf: ID3D11Buffer,
        pub rcas_cbuf: ID3D11Buffer,
    }

    /// Builds [`PipelineResources`] on the host's device.
    pub struct Dx11ResourceFactory {
        shaders: ShaderSet,
    }

    impl Dx11ResourceFactory {
        pub fn new(shaders: ShaderSet) -> Self {
            Self { shaders }
        }
    }

    impl ResourceFactory for Dx11ResourceFactory {
        type Device = ID3D11Device;
        type Resources = PipelineResources;

        fn device_key(device: &ID3D11Device) -> usize {
            device.as_raw() as usize
        }

        fn create(&self, device: &ID3D11Device, dims: FrameDims) -> Result<PipelineResources> {
            let input =
                create_texture(device, dims.input, WORKING_FORMAT, D3D11_BIND_SHADER_RESOURCE)?;
            let convert_target =
                create_texture(device, dims.input, WORKING_FORMAT, D3D11_BIND_RENDER_TARGET)?;
            let read_write = D3D11_BIND_SHADER_RESOURCE | D3D11_BIND_UNORDERED_ACCESS;
            let stage1_output = create_texture(device, dims.output, WORKING_FORMAT, read_write)?;
            let stage2_output = create_texture(device, dims.output, WORKING_FORMAT, read_write)?;

            let input_srv = create_srv(device, &input)?;
            let stage1_srv = create_srv(device, &stage1_output)?;
            let stage1_uav = create_uav(device, &stage1_output)?;
            let stage2_uav = create_uav(device, &stage2_output)?;
            let sampler = create_sampler(device)?;

            let easu = ComputePipeline::new(device, self.shaders.bytecode(ShaderStage::Easu))?;
            let rcas = ComputePipeline::new(device, self.shaders.bytecode(ShaderStage::Rcas))?;

            let cbuf_size = std::mem::size_of::<UpscaleConstants>();
            let easu_cbuf = create_dynamic_cbuf(device, cbuf_size)?;
            let rcas_cbuf = create_dynamic_cbuf(device, cbuf_size)?;

            Ok(PipelineResources {
                input,
                input_srv,
                convert_target,
                stage1_output,
                stage1_srv,
                stage1_uav,
                stage2_output,
                stage2_uav,
                sampler,
                easu,
                rcas,
                easu_cbuf,
                rcas_cbuf,
            })
        }
    }

    fn create_srv(
        device: &ID3D11Device,
        texture: &ID3D11Texture2D,
    ) -> Result<ID3D11ShaderResourceView> {
        let desc = D3D11_SHADER_RESOURCE_VIEW_DESC {
            Format: WORKING_FORMAT,
            ViewDimension: D3D_SRV_DIMENSION_TEXTURE2D,
            Anonymous: D3D11_SHADER_RESOURCE_VIEW_DESC_0 {
                Texture2D: D3D11_TEX2D_SRV {
                    MostDetailedMip: 0,
                    MipLevels: 1,
                },
            },
        };
        let mut srv = None;
        unsafe { device.CreateShaderResourceView(texture, Some(&desc), Some(&mut srv as *mut _)) }
            .map_err(|e| anyhow!("Failed to create D3D11 SRV: {e}"))?;
        srv.ok_or_else(|| anyhow!("D3D11 CreateSRV returned null"))
    }

    fn create_uav(
        device: &ID3D11Device,
        texture: &ID3D11Texture2D,
    ) -> Result<ID3D11UnorderedAccessView> {
        let desc = D3D11_UNORDERED_ACCESS_VIEW_DESC {
            Format: WORKING_FORMAT,
            ViewDimension: D3D11_UAV_DIMENSION_TEXTURE2D,
            Anonymous: D3D11_UNORDERED_ACCESS_VIEW_DESC_0 {
                Texture2D: D3D11_TEX2D_UAV { MipSlice: 0 },
            },
        };
        let mut uav = None;
        unsafe {
            device.CreateUnorderedAccessView(texture, Some(&desc), Some(&mut uav as *mut _))
        }
        .map_err(|e| anyhow!("Failed to create D3D11 UAV: {e}"))?;
        uav.ok_or_else(|| anyhow!("D3D11 CreateUAV returned null"))
    }

    fn create_sampler(device: &ID3D11Device) -> Result<ID3D11SamplerState> {
        let desc = D3D11_SAMPLER_DESC {
            Filter: D3D11_FILTER_MIN_MAG_LINEAR_MIP_POINT,
            AddressU: D3D11_TEXTURE_ADDRESS_CLAMP,
            AddressV: D3D11_TEXTURE_ADDRESS_CLAMP,
            AddressW: D3D11_TEXTURE_ADDRESS_CLAMP,
            MaxAnisotropy: 1,
            ComparisonFunc: D3D11_COMPARISON_NEVER,
            MinLOD: 0.0,
            MaxLOD: f32::MAX,
            ..Default::default()
        };
        let mut sampler = None;
        unsafe { device.CreateSamplerState(&desc, Some(&mut sampler as *mut _)) }
            .map_err(|e| anyhow!("Failed to create D3D11 sampler: {e}"))?;
        sampler.ok_or_else(|| anyhow!("D3D11 CreateSamplerState returned null"))
    }
}

#[cfg(target_os = "windows")]
pub use dx11_impl::{Dx11ResourceFactory, PipelineResources, WORKING_FORMAT};
