use thiserror::Error;

/// Why a detour could not be set up or changed.
#[derive(Debug, Error)]
pub enum HookError {
    #[error("patch length {len} is outside {min}..={max}")]
    PatchLength { len: usize, min: usize, max: usize },

    #[error("failed to allocate {size} bytes of executable memory")]
    Allocation { size: usize },

    #[error("failed to change protection at {address:#x}: {message}")]
    Protect { address: usize, message: String },

    #[error("cannot relocate instructions displaced from {address:#x}: {message}")]
    Relocation { address: usize, message: String },

    #[error("call site already has a detour")]
    AlreadyPrepared,

    #[error("no detour prepared for call site")]
    NotPrepared,

    #[error("detour is already installed")]
    AlreadyInstalled,

    #[error("detour is not installed")]
    NotInstalled,
}
