//! A single entry-point redirection.
//!
//! Setting one up is split in two so the trampoline can be handed to the
//! replacement before any thread can land in it:
//!
//! 1. [`Detour::prepare`] saves the entry bytes and builds the trampoline
//!    (displaced instructions + jump back). The target is untouched.
//! 2. [`Detour::install`] overwrites the entry with a jump to the
//!    replacement.

use std::mem::ManuallyDrop;

use iced_x86::{BlockEncoder, BlockEncoderOptions, InstructionBlock};
use tracing::{debug, trace, warn};

use crate::buffer::PatchBuffer;
use crate::decode::{describe, displaced_instructions, minimum_safe_length};
use crate::encode::{absolute_jump, redirect_patch, MIN_REDIRECT_LEN};
use crate::error::HookError;
use crate::memory::{CodeMemory, ExecRegion};

/// Bytes reserved for each trampoline.
pub const TRAMPOLINE_CAPACITY: usize = 1024;

/// Bytes read from a function entry when measuring it. Enough for the jump
/// plus one maximum-length instruction.
const MEASURE_WINDOW: usize = MIN_REDIRECT_LEN + 15;

pub struct Detour<M: CodeMemory> {
    memory: M,
    target: usize,
    replacement: usize,
    trampoline: ManuallyDrop<M::Region>,
    original: PatchBuffer,
    installed: bool,
}

impl<M: CodeMemory> Detour<M> {
    /// How many bytes at `target` must be displaced to fit the redirect
    /// without splitting an instruction.
    ///
    /// # Safety
    ///
    /// `target` must point at readable code.
    pub unsafe fn measure(memory: &M, target: usize) -> Result<usize, HookError> {
        let mut window = [0u8; MEASURE_WINDOW];
        memory.read(target, &mut window)?;
        Ok(minimum_safe_length(&window, target as u64, MIN_REDIRECT_LEN))
    }

    /// Save `patch_len` bytes at `target` and build the trampoline.
    ///
    /// On error nothing has been written to `target` and any allocation is
    /// released.
    ///
    /// # Safety
    ///
    /// `target` must be the entry of a function whose first `patch_len`
    /// bytes are whole instructions, and `replacement` must be a function
    /// with the same signature.
    pub unsafe fn prepare(
        mut memory: M,
        target: usize,
        replacement: usize,
        patch_len: usize,
    ) -> Result<Self, HookError> {
        let length_error = HookError::PatchLength {
            len: patch_len,
            min: MIN_REDIRECT_LEN,
            max: PatchBuffer::CAPACITY,
        };
        if patch_len < MIN_REDIRECT_LEN {
            return Err(length_error);
        }
        let mut original = PatchBuffer::zeroed(patch_len).ok_or(length_error)?;
        memory.read(target, original.as_mut_slice())?;

        let trampoline = memory.allocate(target, TRAMPOLINE_CAPACITY)?;
        let body = relocate(original.as_slice(), target, trampoline.address())?;
        let used = body.len() + MIN_REDIRECT_LEN;
        if used > trampoline.len() {
            return Err(HookError::Relocation {
                address: target,
                message: format!("trampoline needs {used} bytes"),
            });
        }

        memory.write(trampoline.address(), &body);
        memory.write(
            trampoline.address() + body.len(),
            &absolute_jump((target + patch_len) as u64),
        );
        memory.flush(trampoline.address(), used);

        debug!(
            target = format_args!("{target:#x}"),
            trampoline = format_args!("{:#x}", trampoline.address()),
            patch_len,
            "trampoline built"
        );

        Ok(Self {
            memory,
            target,
            replacement,
            trampoline: ManuallyDrop::new(trampoline),
            original,
            installed: false,
        })
    }

    /// Write the redirect over the target's entry.
    ///
    /// # Safety
    ///
    /// No thread may be executing the first `patch_len` bytes of the target
    /// while they are rewritten.
    pub unsafe fn install(&mut self) -> Result<(), HookError> {
        if self.installed {
            return Err(HookError::AlreadyInstalled);
        }
        let patch = redirect_patch(self.replacement as u64, self.original.len()).ok_or(
            HookError::PatchLength {
                len: self.original.len(),
                min: MIN_REDIRECT_LEN,
                max: PatchBuffer::CAPACITY,
            },
        )?;
        let original = self.original;
        self.overwrite(patch.as_slice(), original.as_slice())?;
        self.installed = true;
        debug!(target = format_args!("{:#x}", self.target), "detour installed");
        Ok(())
    }

    /// Put the saved bytes back. The trampoline stays valid, so the detour
    /// can be installed again.
    ///
    /// # Safety
    ///
    /// Same as [`Detour::install`].
    pub unsafe fn uninstall(&mut self) -> Result<(), HookError> {
        if !self.installed {
            return Err(HookError::NotInstalled);
        }
        let original = self.original;
        let patch = redirect_patch(self.replacement as u64, original.len()).unwrap_or(original);
        self.overwrite(original.as_slice(), patch.as_slice())?;
        self.installed = false;
        debug!(target = format_args!("{:#x}", self.target), "detour removed");
        Ok(())
    }

    /// Replace the entry bytes with `bytes`. If protection cannot be put
    /// back, `prior` is written again so the target is left as it was.
    unsafe fn overwrite(&mut self, bytes: &[u8], prior: &[u8]) -> Result<(), HookError> {
        let len = bytes.len();
        let previous = self.memory.unprotect(self.target, len)?;
        self.memory.write(self.target, bytes);

        if let Err(e) = self.memory.restore(self.target, len, previous) {
            self.memory.write(self.target, prior);
            if let Err(again) = self.memory.restore(self.target, len, previous) {
                warn!(
                    target = format_args!("{:#x}", self.target),
                    "protection left writable: {again}"
                );
            }
            self.memory.flush(self.target, len);
            return Err(e);
        }

        self.memory.flush(self.target, len);
        Ok(())
    }

    pub fn target(&self) -> usize {
        self.target
    }

    pub fn replacement(&self) -> usize {
        self.replacement
    }

    /// Address to call for the original behaviour.
    pub fn trampoline(&self) -> usize {
        self.trampoline.address()
    }

    pub fn patch_len(&self) -> usize {
        self.original.len()
    }

    pub fn original_bytes(&self) -> &[u8] {
        self.original.as_slice()
    }

    pub fn is_installed(&self) -> bool {
        self.installed
    }
}

impl<M: CodeMemory> Drop for Detour<M> {
    fn drop(&mut self) {
        if self.installed {
            if let Err(e) = unsafe { self.uninstall() } {
                // The entry still jumps through the trampoline, so it has to
                // outlive us.
                warn!(target = format_args!("{:#x}", self.target), "leaking trampoline: {e}");
                return;
            }
        }
        unsafe { ManuallyDrop::drop(&mut self.trampoline) };
    }
}

impl<M: CodeMemory> std::fmt::Debug for Detour<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Detour")
            .field("target", &format_args!("{:#x}", self.target))
            .field("replacement", &format_args!("{:#x}", self.replacement))
            .field("trampoline", &format_args!("{:#x}", self.trampoline()))
            .field("original", &self.original)
            .field("installed", &self.installed)
            .finish()
    }
}

/// Instructions displaced from `from`, encoded to run at `to`.
fn relocate(code: &[u8], from: usize, to: usize) -> Result<Vec<u8>, HookError> {
    let displaced = displaced_instructions(code, from as u64);
    trace!(code = %describe(&displaced.instructions), "displaced instructions");

    if !displaced.ip_relative {
        return Ok(code.to_vec());
    }
    if !displaced.complete {
        return Err(HookError::Relocation {
            address: from,
            message: "displaced bytes do not decode to whole instructions".into(),
        });
    }

    let block = InstructionBlock::new(&displaced.instructions, to as u64);
    BlockEncoder::encode(64, block, BlockEncoderOptions::NONE)
        .map(|encoded| encoded.code_buffer)
        .map_err(|e| HookError::Relocation {
            address: from,
            message: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use iced_x86::{Decoder, DecoderOptions};

    use super::*;
    use crate::encode::NOP;
    use crate::memory::fake::{FakeMemory, READ_ONLY};

    const TARGET: usize = 0x1000;
    const REPLACEMENT: usize = 0x5555_0000;

    // mov [rsp+8], rbx; push rdi; sub rsp, 0x20; mov rdi, rcx; xor eax, eax; ret
    const PROLOGUE: [u8; 16] = [
        0x48, 0x89, 0x5C, 0x24, 0x08, 0x57, 0x48, 0x83, 0xEC, 0x20, 0x48, 0x8B, 0xF9, 0x33,
        0xC0, 0xC3,
    ];

    fn prepared(mem: &FakeMemory) -> Detour<FakeMemory> {
        unsafe {
            let len = Detour::measure(mem, TARGET).unwrap();
            Detour::prepare(mem.clone(), TARGET, REPLACEMENT, len).unwrap()
        }
    }

    #[test]
    fn measures_whole_instructions() {
        let mem = FakeMemory::with_code(TARGET, &PROLOGUE);
        assert_eq!(unsafe { Detour::measure(&mem, TARGET) }.unwrap(), 15);
    }

    #[test]
    fn prepare_builds_trampoline_without_touching_target() {
        let mem = FakeMemory::with_code(TARGET, &PROLOGUE);
        let detour = prepared(&mem);

        assert!(!detour.is_installed());
        assert_eq!(detour.original_bytes(), &PROLOGUE[..15]);
        assert_eq!(mem.bytes(TARGET, 16), PROLOGUE);

        let tramp = mem.bytes(detour.trampoline(), 15 + MIN_REDIRECT_LEN);
        assert_eq!(&tramp[..15], &PROLOGUE[..15]);
        assert_eq!(&tramp[15..], &absolute_jump((TARGET + 15) as u64));
        assert_eq!(mem.state().flushes, vec![(detour.trampoline(), 29)]);
    }

    #[test]
    fn install_writes_jump_and_nop_padding() {
        let mem = FakeMemory::with_code(TARGET, &PROLOGUE);
        let mut detour = prepared(&mem);
        unsafe { detour.install() }.unwrap();

        let entry = mem.bytes(TARGET, 16);
        assert_eq!(&entry[..14], &absolute_jump(REPLACEMENT as u64));
        assert_eq!(entry[14], NOP);
        assert_eq!(entry[15], 0xC3, "bytes past the patch are untouched");
        assert_eq!(mem.protection(TARGET), READ_ONLY);
        assert!(mem.state().flushes.contains(&(TARGET, 15)));
    }

    #[test]
    fn uninstall_restores_original_bytes() {
        let mem = FakeMemory::with_code(TARGET, &PROLOGUE);
        let mut detour = prepared(&mem);
        unsafe {
            detour.install().unwrap();
            detour.uninstall().unwrap();
        }
        assert_eq!(mem.bytes(TARGET, 16), PROLOGUE);
        assert_eq!(mem.protection(TARGET), READ_ONLY);
        assert!(matches!(unsafe { detour.uninstall() }, Err(HookError::NotInstalled)));
    }

    #[test]
    fn double_install_is_rejected() {
        let mem = FakeMemory::with_code(TARGET, &PROLOGUE);
        let mut detour = prepared(&mem);
        unsafe { detour.install() }.unwrap();
        assert!(matches!(unsafe { detour.install() }, Err(HookError::AlreadyInstalled)));
    }

    #[test]
    fn rejects_out_of_range_patch_length() {
        let mem = FakeMemory::with_code(TARGET, &PROLOGUE);
        for len in [0, MIN_REDIRECT_LEN - 1, PatchBuffer::CAPACITY + 1] {
            let result = unsafe { Detour::prepare(mem.clone(), TARGET, REPLACEMENT, len) };
            assert!(matches!(result, Err(HookError::PatchLength { .. })), "len {len}");
        }
        assert_eq!(mem.state().live_regions, 0);
    }

    #[test]
    fn allocation_failure_leaves_target_alone() {
        let mem = FakeMemory::with_code(TARGET, &PROLOGUE);
        mem.state().fail_allocate = true;
        let result = unsafe { Detour::prepare(mem.clone(), TARGET, REPLACEMENT, 15) };
        assert!(matches!(result, Err(HookError::Allocation { size: TRAMPOLINE_CAPACITY })));
        assert_eq!(mem.bytes(TARGET, 16), PROLOGUE);
    }

    #[test]
    fn protect_failure_leaves_target_alone() {
        let mem = FakeMemory::with_code(TARGET, &PROLOGUE);
        let mut detour = prepared(&mem);
        mem.state().fail_unprotect = true;
        assert!(matches!(unsafe { detour.install() }, Err(HookError::Protect { .. })));
        assert!(!detour.is_installed());
        assert_eq!(mem.bytes(TARGET, 16), PROLOGUE);
        assert_eq!(mem.protection(TARGET), READ_ONLY);
    }

    #[test]
    fn late_restore_failure_rolls_back() {
        let mem = FakeMemory::with_code(TARGET, &PROLOGUE);
        let mut detour = prepared(&mem);
        mem.state().fail_restore_once = true;
        assert!(matches!(unsafe { detour.install() }, Err(HookError::Protect { .. })));
        assert!(!detour.is_installed());
        assert_eq!(mem.bytes(TARGET, 16), PROLOGUE);
        assert_eq!(mem.protection(TARGET), READ_ONLY);
    }

    #[test]
    fn drop_restores_and_frees_once() {
        let mem = FakeMemory::with_code(TARGET, &PROLOGUE);
        {
            let mut detour = prepared(&mem);
            unsafe { detour.install() }.unwrap();
            assert_eq!(mem.state().live_regions, 1);
        }
        assert_eq!(mem.bytes(TARGET, 16), PROLOGUE);
        assert_eq!(mem.state().live_regions, 0);
        assert_eq!(mem.state().freed_regions, 1);
    }

    #[test]
    fn relocates_rip_relative_load() {
        // mov rax, [rip+0x10]; nop x7
        let mut code = vec![0x48, 0x8B, 0x05, 0x10, 0x00, 0x00, 0x00];
        code.extend([0x90; 7]);
        let mem = FakeMemory::with_code(TARGET, &code);
        let detour = unsafe { Detour::prepare(mem.clone(), TARGET, REPLACEMENT, 14) }.unwrap();

        let tramp = mem.bytes(detour.trampoline(), 64);
        let mut decoder =
            Decoder::with_ip(64, &tramp, detour.trampoline() as u64, DecoderOptions::NONE);
        let load = decoder.decode();
        assert!(load.is_ip_rel_memory_operand());
        assert_eq!(load.ip_rel_memory_address(), (TARGET + 7 + 0x10) as u64);
    }

    #[test]
    fn unreachable_rip_relative_operand_fails_setup() {
        const FAR: usize = 0x7FFF_0000_0000;
        // lea rax, [rip+0x10]; nop x7
        let mut code = vec![0x48, 0x8D, 0x05, 0x10, 0x00, 0x00, 0x00];
        code.extend([0x90; 7]);
        let mem = FakeMemory::with_code(FAR, &code);
        mem.state().ignore_near = true;
        let result = unsafe { Detour::prepare(mem.clone(), FAR, REPLACEMENT, 14) };
        assert!(matches!(result, Err(HookError::Relocation { .. })));
        assert_eq!(mem.state().live_regions, 0);
        assert_eq!(mem.bytes(FAR, 14), code);
    }

    #[test]
    fn trampoline_lands_near_a_high_system_dll() {
        const DLL: usize = 0x7FFA_1234_0000;
        // sub rsp, 0x48; mov rax, [rip+0x32010]; nop x3
        let code = [
            0x48, 0x83, 0xEC, 0x48, 0x48, 0x8B, 0x05, 0x10, 0x20, 0x03, 0x00, 0x90, 0x90, 0x90,
        ];
        let mem = FakeMemory::with_code(DLL, &code);
        let len = unsafe { Detour::measure(&mem, DLL) }.unwrap();
        assert_eq!(len, 14);

        let detour = unsafe { Detour::prepare(mem.clone(), DLL, REPLACEMENT, len) }.unwrap();
        assert!(detour.trampoline().abs_diff(DLL) <= crate::memory::NEAR_RANGE);

        let tramp = mem.bytes(detour.trampoline(), 64);
        let mut decoder =
            Decoder::with_ip(64, &tramp, detour.trampoline() as u64, DecoderOptions::NONE);
        decoder.decode();
        let load = decoder.decode();
        assert!(load.is_ip_rel_memory_operand());
        assert_eq!(load.ip_rel_memory_address(), (DLL + 11 + 0x32010) as u64);
    }
}
