//! The two-stage upscaling compute pipeline.
//!
//! - [`ResourceManager`] owns the per-resolution GPU objects and rebuilds
//!   them as one unit when the frame size changes.
//! - `ComputeContext` (Windows) records stage 1 (EASU upsample) and stage 2
//!   (RCAS sharpen) on the host's immediate context.
//! - [`ShaderSet`] holds the compiled compute programs, embedded at build
//!   time and optionally replaced from a directory at attach time.
//! - [`build_support`] compiles the HLSL sources from a `build.rs`.

pub mod build_support;
pub mod bytes;
pub mod resources;
pub mod shader;

#[cfg(target_os = "windows")]
pub mod dispatch;
#[cfg(target_os = "windows")]
pub mod pipeline;

pub use bytes::AsBytes;
pub use resources::{Generation, ResourceFactory, ResourceManager};
pub use shader::{ShaderOverride, ShaderSet, ShaderStage};

#[cfg(target_os = "windows")]
pub use dispatch::ComputeContext;
#[cfg(target_os = "windows")]
pub use pipeline::ComputePipeline;
#[cfg(target_os = "windows")]
pub use resources::{Dx11ResourceFactory, PipelineResources};
