//! Machine code emitted at the call site and at the end of the trampoline.

use crate::buffer::PatchBuffer;

/// Size of `jmp qword ptr [rip+0]` followed by its 8-byte target.
pub const MIN_REDIRECT_LEN: usize = 14;

pub const NOP: u8 = 0x90;

/// `FF 25 00000000` + absolute destination. Clobbers no registers and
/// reaches anywhere in the address space.
pub fn absolute_jump(destination: u64) -> [u8; MIN_REDIRECT_LEN] {
    let mut code = [0u8; MIN_REDIRECT_LEN];
    code[0] = 0xFF;
    code[1] = 0x25;
    code[6..].copy_from_slice(&destination.to_le_bytes());
    code
}

/// The bytes written over a function entry: an absolute jump to
/// `destination`, padded with NOPs to `len` so no partial instruction is left
/// behind. `None` if `len` cannot hold the jump or exceeds the buffer.
pub fn redirect_patch(destination: u64, len: usize) -> Option<PatchBuffer> {
    if len < MIN_REDIRECT_LEN {
        return None;
    }
    let mut patch = PatchBuffer::zeroed(len)?;
    let bytes = patch.as_mut_slice();
    bytes[..MIN_REDIRECT_LEN].copy_from_slice(&absolute_jump(destination));
    bytes[MIN_REDIRECT_LEN..].fill(NOP);
    Some(patch)
}
