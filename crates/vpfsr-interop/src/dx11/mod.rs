//! D3D11 host access (Windows).

pub mod device;
pub mod video;

pub use device::{create_dynamic_cbuf, create_texture, describe_texture, HostDevice};
pub use video::{BridgeInput, ConvertRequest, VideoBridge, VideoProcessorBltFn};
