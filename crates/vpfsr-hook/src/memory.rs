//! Access to the code pages of the current process.

use crate::error::HookError;

/// An executable allocation. Released when dropped.
pub trait ExecRegion {
    fn address(&self) -> usize;
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Everything the detour engine needs from the process.
///
/// The raw-address methods are `unsafe`: callers guarantee `address..address
/// + len` is mapped code that no other thread is patching.
pub trait CodeMemory {
    type Region: ExecRegion;

    /// Copy `buf.len()` bytes starting at `address`.
    unsafe fn read(&self, address: usize, buf: &mut [u8]) -> Result<(), HookError>;

    /// Reserve and commit a readable, writable, executable region, within
    /// [`NEAR_RANGE`] of `near` when possible.
    fn allocate(&mut self, near: usize, size: usize) -> Result<Self::Region, HookError>;

    /// Make the range writable. Returns the previous protection for
    /// [`CodeMemory::restore`].
    unsafe fn unprotect(&mut self, address: usize, len: usize) -> Result<u32, HookError>;

    unsafe fn restore(&mut self, address: usize, len: usize, previous: u32)
        -> Result<(), HookError>;

    /// Copy `bytes` to `address`, which must currently be writable.
    unsafe fn write(&mut self, address: usize, bytes: &[u8]);

    fn flush(&mut self, address: usize, len: usize);
}

/// Furthest a trampoline is placed from its target. Relocated rel32
/// operands reach ±2 GiB; the remainder is headroom for data the operand
/// points at elsewhere in the module.
pub const NEAR_RANGE: usize = 0x7000_0000;

/// One run of pages with the same state, as `VirtualQuery` reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub base: usize,
    pub size: usize,
    pub free: bool,
}

impl Span {
    pub fn end(&self) -> usize {
        self.base.saturating_add(self.size)
    }
}

pub fn align_up(value: usize, align: usize) -> usize {
    value.div_ceil(align).saturating_mul(align)
}

pub fn align_down(value: usize, align: usize) -> usize {
    value - value % align
}

/// Address range searched around `near`, clamped to `lowest..highest`.
pub fn near_window(near: usize, lowest: usize, highest: usize) -> (usize, usize) {
    (
        near.saturating_sub(NEAR_RANGE).max(lowest),
        near.saturating_add(NEAR_RANGE).min(highest),
    )
}

/// Walk the address space outward from `near` and hand each free,
/// `granularity`-aligned slot of `size` bytes to `claim` until one sticks.
///
/// Searches upward first, then downward. `query` describes the span that
/// contains an address; `claim` tries to allocate at one.
pub fn find_near(
    near: usize,
    size: usize,
    granularity: usize,
    (low, high): (usize, usize),
    mut query: impl FnMut(usize) -> Option<Span>,
    mut claim: impl FnMut(usize) -> bool,
) -> Option<usize> {
    let granularity = granularity.max(1);

    let mut probe = near;
    while probe < high {
        let Some(span) = query(probe) else { break };
        if span.free {
            let candidate = align_up(span.base.max(probe), granularity);
            if candidate.saturating_add(size) <= span.end().min(high) && claim(candidate) {
                return Some(candidate);
            }
        }
        if span.end() <= probe {
            break;
        }
        probe = span.end();
    }

    let mut probe = near;
    while probe >= low {
        let Some(span) = query(probe) else { break };
        if span.free {
            if let Some(top) = span.end().min(high).checked_sub(size) {
                let candidate = align_down(top, granularity);
                if candidate >= span.base.max(low) && claim(candidate) {
                    return Some(candidate);
                }
            }
        }
        match span.base.checked_sub(1) {
            Some(below) if below < probe => probe = below,
            _ => break,
        }
    }
    None
}

#[cfg(target_os = "windows")]
pub mod windows_impl {
    use std::ffi::c_void;

    use windows::Win32::System::Diagnostics::Debug::FlushInstructionCache;
    use windows::Win32::System::Memory::{
        VirtualAlloc, VirtualFree, VirtualProtect, VirtualQuery, MEMORY_BASIC_INFORMATION,
        MEM_COMMIT, MEM_FREE, MEM_RELEASE, MEM_RESERVE, PAGE_EXECUTE_READWRITE,
        PAGE_PROTECTION_FLAGS,
    };
    use windows::Win32::System::SystemInformation::{GetSystemInfo, SYSTEM_INFO};
    use windows::Win32::System::Threading::GetCurrentProcess;

    use super::*;

    /// The live process, through `VirtualAlloc`/`VirtualProtect`.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct ProcessMemory;

    /// A `VirtualAlloc` region freed with `MEM_RELEASE` on drop.
    #[derive(Debug)]
    pub struct VirtualRegion {
        base: *mut c_void,
        len: usize,
    }

    // SAFETY: the region is plain committed memory. Ownership only decides
    // who frees it, which happens once in Drop.
    unsafe impl Send for VirtualRegion {}
    unsafe impl Sync for VirtualRegion {}

    impl ExecRegion for VirtualRegion {
        fn address(&self) -> usize {
            self.base as usize
        }

        fn len(&self) -> usize {
            self.len
        }
    }

    impl Drop for VirtualRegion {
        fn drop(&mut self) {
            if let Err(e) = unsafe { VirtualFree(self.base, 0, MEM_RELEASE) } {
                tracing::warn!(address = self.base as usize, "VirtualFree failed: {e}");
            }
        }
    }

    impl CodeMemory for ProcessMemory {
        type Region = VirtualRegion;

        unsafe fn read(&self, address: usize, buf: &mut [u8]) -> Result<(), HookError> {
            std::ptr::copy_nonoverlapping(address as *const u8, buf.as_mut_ptr(), buf.len());
            Ok(())
        }

        fn allocate(&mut self, near: usize, size: usize) -> Result<VirtualRegion, HookError> {
            let base = allocate_near(near, size)
                .or_else(|| {
                    tracing::debug!(near, "no free region near target, allocating anywhere");
                    commit(None, size)
                })
                .ok_or(HookError::Allocation { size })?;
            Ok(VirtualRegion { base, len: size })
        }

        unsafe fn unprotect(&mut self, address: usize, len: usize) -> Result<u32, HookError> {
            let mut previous = PAGE_PROTECTION_FLAGS(0);
            VirtualProtect(
                address as *const c_void,
                len,
                PAGE_EXECUTE_READWRITE,
                &mut previous,
            )
            .map_err(|e| HookError::Protect {
                address,
                message: e.to_string(),
            })?;
            Ok(previous.0)
        }

        unsafe fn restore(
            &mut self,
            address: usize,
            len: usize,
            previous: u32,
        ) -> Result<(), HookError> {
            let mut scratch = PAGE_PROTECTION_FLAGS(0);
            VirtualProtect(
                address as *const c_void,
                len,
                PAGE_PROTECTION_FLAGS(previous),
                &mut scratch,
            )
            .map_err(|e| HookError::Protect {
                address,
                message: e.to_string(),
            })
        }

        unsafe fn write(&mut self, address: usize, bytes: &[u8]) {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), address as *mut u8, bytes.len());
        }

        fn flush(&mut self, address: usize, len: usize) {
            let result = unsafe {
                FlushInstructionCache(GetCurrentProcess(), Some(address as *const c_void), len)
            };
            if let Err(e) = result {
                tracing::warn!(address, len, "FlushInstructionCache failed: {e}");
            }
        }
    }

    fn commit(address: Option<usize>, size: usize) -> Option<*mut c_void> {
        let base = unsafe {
            VirtualAlloc(
                address.map(|a| a as *const c_void),
                size,
                MEM_COMMIT | MEM_RESERVE,
                PAGE_EXECUTE_READWRITE,
            )
        };
        (!base.is_null()).then_some(base)
    }

    fn query(address: usize) -> Option<Span> {
        let mut info = MEMORY_BASIC_INFORMATION::default();
        let written = unsafe {
            VirtualQuery(
                Some(address as *const c_void),
                &mut info,
                std::mem::size_of::<MEMORY_BASIC_INFORMATION>(),
            )
        };
        (written != 0).then(|| Span {
            base: info.BaseAddress as usize,
            size: info.RegionSize,
            free: info.State == MEM_FREE,
        })
    }

    fn allocate_near(near: usize, size: usize) -> Option<*mut c_void> {
        let mut info = SYSTEM_INFO::default();
        unsafe { GetSystemInfo(&mut info) };
        let window = near_window(
            near,
            info.lpMinimumApplicationAddress as usize,
            info.lpMaximumApplicationAddress as usize,
        );

        let mut base = None;
        find_near(
            near,
            size,
            info.dwAllocationGranularity as usize,
            window,
            query,
            |candidate| {
                base = commit(Some(candidate), size);
                base.is_some()
            },
        )?;
        base
    }
}

/// In-memory process image with failure injection.
#[cfg(test)]
pub(crate) mod fake {
    use std::cell::RefCell;
    use std::collections::BTreeMap;
    use std::rc::Rc;

    use super::*;

    pub const READ_ONLY: u32 = 0x20;
    pub const WRITABLE: u32 = 0x40;

    #[derive(Debug, Default)]
    pub struct State {
        pub bytes: BTreeMap<usize, u8>,
        pub protection: BTreeMap<usize, u32>,
        pub next_region: usize,
        pub live_regions: usize,
        pub freed_regions: usize,
        pub flushes: Vec<(usize, usize)>,
        pub fail_allocate: bool,
        /// Place regions far away, as if nothing near the target were free.
        pub ignore_near: bool,
        pub near_regions: usize,
        pub fail_unprotect: bool,
        pub fail_restore_once: bool,
    }

    /// Cloning shares the same image, so tests keep a handle after the
    /// memory is moved into a detour.
    #[derive(Debug, Clone, Default)]
    pub struct FakeMemory(pub Rc<RefCell<State>>);

    impl FakeMemory {
        pub fn with_code(address: usize, code: &[u8]) -> Self {
            let mem = Self::default();
            mem.load(address, code);
            mem
        }

        pub fn load(&self, address: usize, code: &[u8]) {
            let mut state = self.0.borrow_mut();
            for (i, b) in code.iter().enumerate() {
                state.bytes.insert(address + i, *b);
                state.protection.insert(address + i, READ_ONLY);
            }
            state.next_region = state.next_region.max(0x7000_0000);
        }

        pub fn bytes(&self, address: usize, len: usize) -> Vec<u8> {
            let state = self.0.borrow();
            (address..address + len)
                .map(|a| state.bytes.get(&a).copied().unwrap_or(0xCC))
                .collect()
        }

        pub fn protection(&self, address: usize) -> u32 {
            self.0.borrow().protection.get(&address).copied().unwrap_or(0)
        }

        pub fn state(&self) -> std::cell::RefMut<'_, State> {
            self.0.borrow_mut()
        }
    }

    #[derive(Debug)]
    pub struct FakeRegion {
        address: usize,
        len: usize,
        state: Rc<RefCell<State>>,
    }

    impl ExecRegion for FakeRegion {
        fn address(&self) -> usize {
            self.address
        }

        fn len(&self) -> usize {
            self.len
        }
    }

    impl Drop for FakeRegion {
        fn drop(&mut self) {
            let mut state = self.state.borrow_mut();
            state.live_regions -= 1;
            state.freed_regions += 1;
        }
    }

    impl CodeMemory for FakeMemory {
        type Region = FakeRegion;

        unsafe fn read(&self, address: usize, buf: &mut [u8]) -> Result<(), HookError> {
            buf.copy_from_slice(&self.bytes(address, buf.len()));
            Ok(())
        }

        fn allocate(&mut self, near: usize, size: usize) -> Result<FakeRegion, HookError> {
            let mut state = self.0.borrow_mut();
            if state.fail_allocate {
                return Err(HookError::Allocation { size });
            }
            let address = if state.ignore_near {
                let address = state.next_region.max(0x7000_0000);
                state.next_region = address + 0x1_0000;
                address
            } else {
                state.near_regions += 1;
                align_down(near, 0x1_0000) + 0x100_0000 + state.near_regions * 0x1_0000
            };
            state.live_regions += 1;
            for a in address..address + size {
                state.protection.insert(a, WRITABLE);
            }
            Ok(FakeRegion {
                address,
                len: size,
                state: self.0.clone(),
            })
        }

        unsafe fn unprotect(&mut self, address: usize, len: usize) -> Result<u32, HookError> {
            let mut state = self.0.borrow_mut();
            if state.fail_unprotect {
                return Err(HookError::Protect {
                    address,
                    message: "access denied".into(),
                });
            }
            let previous = state.protection.get(&address).copied().unwrap_or(0);
            for a in address..address + len {
                state.protection.insert(a, WRITABLE);
            }
            Ok(previous)
        }

        unsafe fn restore(
            &mut self,
            address: usize,
            len: usize,
            previous: u32,
        ) -> Result<(), HookError> {
            let mut state = self.0.borrow_mut();
            if state.fail_restore_once {
                state.fail_restore_once = false;
                return Err(HookError::Protect {
                    address,
                    message: "restore refused".into(),
                });
            }
            for a in address..address + len {
                state.protection.insert(a, previous);
            }
            Ok(())
        }

        unsafe fn write(&mut self, address: usize, bytes: &[u8]) {
            let mut state = self.0.borrow_mut();
            for (i, b) in bytes.iter().enumerate() {
                assert_eq!(
                    state.protection.get(&(address + i)).copied(),
                    Some(WRITABLE),
                    "write to protected byte {:#x}",
                    address + i
                );
                state.bytes.insert(address + i, *b);
            }
        }

        fn flush(&mut self, address: usize, len: usize) {
            self.0.borrow_mut().flushes.push((address, len));
        }
    }
}
