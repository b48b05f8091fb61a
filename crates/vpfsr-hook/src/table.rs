//! Call-site bookkeeping.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;

use tracing::info;

use crate::detour::Detour;
use crate::error::HookError;
use crate::memory::CodeMemory;

/// Where a call site is in its life cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookState {
    /// No detour exists.
    Uninstalled,
    /// Trampoline built, entry untouched.
    Prepared,
    /// Entry redirected.
    Installed,
}

/// Detours keyed by a stable call-site identity.
///
/// `Uninstalled --prepare--> Prepared --install--> Installed`, back to
/// `Prepared` with `uninstall`, and to `Uninstalled` with `release`.
pub struct RedirectTable<K, M: CodeMemory> {
    detours: HashMap<K, Detour<M>>,
}

impl<K: Eq + Hash + Debug, M: CodeMemory> RedirectTable<K, M> {
    pub fn new() -> Self {
        Self {
            detours: HashMap::new(),
        }
    }

    pub fn state(&self, key: &K) -> HookState {
        match self.detours.get(key) {
            None => HookState::Uninstalled,
            Some(d) if d.is_installed() => HookState::Installed,
            Some(_) => HookState::Prepared,
        }
    }

    /// Trampoline address for calling the original, once prepared.
    pub fn original(&self, key: &K) -> Option<usize> {
        self.detours.get(key).map(Detour::trampoline)
    }

    pub fn get(&self, key: &K) -> Option<&Detour<M>> {
        self.detours.get(key)
    }

    /// Build the trampoline for `key` and return its address.
    ///
    /// # Safety
    ///
    /// See [`Detour::prepare`].
    pub unsafe fn prepare(
        &mut self,
        key: K,
        memory: M,
        target: usize,
        replacement: usize,
        patch_len: usize,
    ) -> Result<usize, HookError> {
        if self.detours.contains_key(&key) {
            return Err(HookError::AlreadyPrepared);
        }
        let detour = Detour::prepare(memory, target, replacement, patch_len)?;
        let trampoline = detour.trampoline();
        self.detours.insert(key, detour);
        Ok(trampoline)
    }

    /// # Safety
    ///
    /// See [`Detour::install`].
    pub unsafe fn install(&mut self, key: &K) -> Result<(), HookError> {
        let detour = self.detours.get_mut(key).ok_or(HookError::NotPrepared)?;
        detour.install()?;
        info!(
            site = ?key,
            target = format_args!("{:#x}", detour.target()),
            patch_len = detour.patch_len(),
            "call site redirected"
        );
        Ok(())
    }

    /// # Safety
    ///
    /// See [`Detour::install`].
    pub unsafe fn uninstall(&mut self, key: &K) -> Result<(), HookError> {
        let detour = self.detours.get_mut(key).ok_or(HookError::NotPrepared)?;
        detour.uninstall()?;
        info!(site = ?key, "call site restored");
        Ok(())
    }

    /// Remove the detour, restoring the entry first if needed, and free its
    /// trampoline.
    ///
    /// # Safety
    ///
    /// No thread may be inside the trampoline.
    pub unsafe fn release(&mut self, key: &K) -> Result<(), HookError> {
        let (key, mut detour) = self.detours.remove_entry(key).ok_or(HookError::NotPrepared)?;
        if detour.is_installed() {
            if let Err(e) = detour.uninstall() {
                // The entry still jumps through the trampoline; keep it.
                self.detours.insert(key, detour);
                return Err(e);
            }
        }
        info!(site = ?key, "detour released");
        Ok(())
    }
}

impl<K: Eq + Hash + Debug, M: CodeMemory> Default for RedirectTable<K, M> {
    fn default() -> Self {
        Self::new()
    }
}
