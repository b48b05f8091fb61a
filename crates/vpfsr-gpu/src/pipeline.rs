//! Compiled compute programs.

use anyhow::{anyhow, Result};
use windows::Win32::Graphics::Direct3D11::{ID3D11ComputeShader, ID3D11Device};

/// A compute shader created from `cs_5_0` bytecode.
pub struct ComputePipeline {
    pub(crate) shader: ID3D11ComputeShader,
}

impl ComputePipeline {
    /// Create a compute pipeline from pre-compiled HLSL bytecode (`.cso`).
    pub fn new(device: &ID3D11Device, bytecode: &[u8]) -> Result<Self> {
        let mut shader = None;
        unsafe { device.CreateComputeShader(bytecode, None, Some(&mut shader as *mut _)) }
            .map_err(|e| anyhow!("Failed to create D3D11 compute shader: {e}"))?;

        let shader = shader.ok_or_else(|| anyhow!("D3D11 CreateComputeShader returned null"))?;

        Ok(Self { shader })
    }

    pub fn shader(&self) -> &ID3D11ComputeShader {
        &self.shader
    }
}
