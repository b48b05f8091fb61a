//! Recording the two upscale stages on the host's immediate context.

use anyhow::{anyhow, Result};
use tracing::trace;
use windows::Win32::Graphics::Direct3D11::*;

use vpfsr_core::{dispatch_groups, Dimensions, UpscaleConstants};

use crate::bytes::AsBytes;
use crate::pipeline::ComputePipeline;
use crate::resources::{Generation, PipelineResources};

/// Borrowed immediate context. Compute state is bound per dispatch and
/// cleared afterwards so the host never sees our views.
pub struct ComputeContext<'a> {
    context: &'a ID3D11DeviceContext,
}

impl<'a> ComputeContext<'a> {
    pub fn new(context: &'a ID3D11DeviceContext) -> Self {
        Self { context }
    }

    /// Stage 1: input texture to stage-1 output through EASU.
    pub fn run_stage1(&self, generation: &Generation<PipelineResources>) -> Result<()> {
        let res = generation.resources();
        self.update_constant_buffer(&res.easu_cbuf, generation.easu_constants().as_bytes())?;
        self.dispatch_compute(
            &res.easu,
            &res.input_srv,
            &res.stage1_uav,
            &res.sampler,
            &res.easu_cbuf,
            generation.dims().output,
        );
        Ok(())
    }

    /// Stage 2: stage-1 output to stage-2 output through RCAS.
    pub fn run_stage2(
        &self,
        generation: &Generation<PipelineResources>,
        sharpness: f32,
    ) -> Result<()> {
        let res = generation.resources();
        let constants = UpscaleConstants::rcas(sharpness);
        self.update_constant_buffer(&res.rcas_cbuf, constants.as_bytes())?;
        self.dispatch_compute(
            &res.rcas,
            &res.stage1_srv,
            &res.stage2_uav,
            &res.sampler,
            &res.rcas_cbuf,
            generation.dims().output,
        );
        Ok(())
    }

    /// Bind one SRV/UAV/sampler/cbuf set at slot 0, dispatch enough 16×16
    /// groups to cover `output`, then unbind everything.
    pub fn dispatch_compute(
        &self,
        pipeline: &ComputePipeline,
        srv: &ID3D11ShaderResourceView,
        uav: &ID3D11UnorderedAccessView,
        sampler: &ID3D11SamplerState,
        cbuf: &ID3D11Buffer,
        output: Dimensions,
    ) {
        let (groups_x, groups_y) = dispatch_groups(output);
        trace!(groups_x, groups_y, "dispatch");

        let ctx = self.context;
        let uavs = [Some(uav.clone())];
        unsafe {
            ctx.CSSetShader(&pipeline.shader, None);
            ctx.CSSetShaderResources(0, Some(&[Some(srv.clone())]));
            ctx.CSSetUnorderedAccessViews(0, 1, Some(uavs.as_ptr()), None);
            ctx.CSSetSamplers(0, Some(&[Some(sampler.clone())]));
            ctx.CSSetConstantBuffers(0, Some(&[Some(cbuf.clone())]));
            ctx.Dispatch(groups_x, groups_y, 1);

            // A texture written here is read as an SRV by the next stage.
            let null_uavs: [Option<ID3D11UnorderedAccessView>; 1] = Default::default();
            let null_srvs: [Option<ID3D11ShaderResourceView>; 1] = Default::default();
            let null_samplers: [Option<ID3D11SamplerState>; 1] = Default::default();
            let null_cbufs: [Option<ID3D11Buffer>; 1] = Default::default();
            ctx.CSSetUnorderedAccessViews(0, 1, Some(null_uavs.as_ptr()), None);
            ctx.CSSetShaderResources(0, Some(&null_srvs));
            ctx.CSSetSamplers(0, Some(&null_samplers));
            ctx.CSSetConstantBuffers(0, Some(&null_cbufs));
            ctx.CSSetShader(None::<&ID3D11ComputeShader>, None);
        }
    }

    /// Map a dynamic buffer with `WRITE_DISCARD` and copy `data` into it.
    pub fn update_constant_buffer(&self, buffer: &ID3D11Buffer, data: &[u8]) -> Result<()> {
        let ctx = self.context;
        unsafe {
            let mut mapped = D3D11_MAPPED_SUBRESOURCE::default();
            ctx.Map(buffer, 0, D3D11_MAP_WRITE_DISCARD, 0, Some(&mut mapped))
                .map_err(|e| anyhow!("Failed to map D3D11 constant buffer: {e}"))?;
            if mapped.pData.is_null() {
                ctx.Unmap(buffer, 0);
                return Err(anyhow!("D3D11 Map returned a null pointer"));
            }
            std::ptr::copy_nonoverlapping(data.as_ptr(), mapped.pData as *mut u8, data.len());
            ctx.Unmap(buffer, 0);
        }
        Ok(())
    }
}
