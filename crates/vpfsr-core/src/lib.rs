#![allow(clippy::too_many_arguments)]

//! Platform-independent building blocks for the `vpfsr` upscaler.
//!
//! Everything in here is plain data or pure math so it builds and tests on
//! any host. The Windows crates layer D3D11 objects on top.
//!
//! - [`Dimensions`] / [`FrameDims`] describe the frame sizes that key the
//!   GPU resource cache.
//! - [`UpscaleConstants`] is the constant block both compute stages consume.
//! - [`dispatch_groups`] maps an output size onto 16×16 thread groups.
//! - [`EnabledFlag`] and [`Hotkey`] implement the Bypass/Enhance toggle.
//! - [`Config`] is the attach-time configuration read from the environment.
//! - [`reference`] is a CPU rendition of both compute stages.

pub mod abi;
pub mod config;
pub mod constants;
pub mod dims;
pub mod grid;
pub mod reference;
pub mod toggle;

pub use config::Config;
pub use constants::UpscaleConstants;
pub use dims::{Dimensions, FrameDims};
pub use grid::{dispatch_groups, THREAD_GROUP_SIZE};
pub use toggle::{EdgeDetector, EnabledFlag, Hotkey, KeySource};
