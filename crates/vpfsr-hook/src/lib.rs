//! Entry-point redirection for a single x86-64 function.
//!
//! - [`minimum_safe_length`] finds how many whole instructions to displace.
//! - [`Detour`] saves those bytes, builds a trampoline that runs them and
//!   jumps back, then overwrites the entry with an absolute jump.
//! - [`RedirectTable`] tracks detours by call-site key with explicit
//!   prepared/installed states.
//! - [`CodeMemory`] is the seam to the process: reading code, allocating
//!   executable memory, changing protection and flushing the instruction
//!   cache. [`ProcessMemory`] is the Windows implementation.

pub mod buffer;
pub mod decode;
pub mod detour;
pub mod encode;
pub mod error;
pub mod memory;
pub mod table;

pub use buffer::PatchBuffer;
pub use decode::{displaced_instructions, minimum_safe_length, Displaced};
pub use detour::{Detour, TRAMPOLINE_CAPACITY};
pub use encode::MIN_REDIRECT_LEN;
pub use error::HookError;
pub use memory::{CodeMemory, ExecRegion};
pub use table::{HookState, RedirectTable};

#[cfg(target_os = "windows")]
pub use memory::windows_impl::{ProcessMemory, VirtualRegion};
