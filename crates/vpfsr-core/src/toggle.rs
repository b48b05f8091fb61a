//! Bypass/Enhance toggle driven by a hotkey.
//!
//! The flag is advisory. A render thread may observe a toggle one call late;
//! that is harmless because every call re-reads it.

use std::sync::atomic::{AtomicBool, Ordering};

/// Process-wide switch between enhancing and forwarding frames.
#[derive(Debug)]
pub struct EnabledFlag {
    enhance: AtomicBool,
}

impl EnabledFlag {
    pub const fn new(enhance: bool) -> Self {
        Self {
            enhance: AtomicBool::new(enhance),
        }
    }

    pub fn is_enhancing(&self) -> bool {
        self.enhance.load(Ordering::Relaxed)
    }

    pub fn set(&self, enhance: bool) {
        self.enhance.store(enhance, Ordering::Relaxed);
    }

    /// Flip the flag and return the new value.
    pub fn toggle(&self) -> bool {
        !self.enhance.fetch_xor(true, Ordering::Relaxed)
    }
}

impl Default for EnabledFlag {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Something that reports whether a key is held right now.
pub trait KeySource {
    fn is_down(&self) -> bool;
}

/// Turns a level (held / not held) into press events.
#[derive(Debug, Default)]
pub struct EdgeDetector {
    was_down: AtomicBool,
}

impl EdgeDetector {
    pub const fn new() -> Self {
        Self {
            was_down: AtomicBool::new(false),
        }
    }

    /// Record the current level; true only on an up-to-down transition.
    pub fn rising(&self, down: bool) -> bool {
        let previous = self.was_down.swap(down, Ordering::Relaxed);
        down && !previous
    }
}

/// A key source plus edge detection. Holding the key toggles once.
#[derive(Debug)]
pub struct Hotkey<K> {
    source: K,
    edge: EdgeDetector,
}

impl<K: KeySource> Hotkey<K> {
    pub const fn new(source: K) -> Self {
        Self {
            source,
            edge: EdgeDetector::new(),
        }
    }

    /// Sample the key once. On a press, flip `flag` and return true.
    pub fn poll(&self, flag: &EnabledFlag) -> bool {
        if self.edge.rising(self.source.is_down()) {
            let enhance = flag.toggle();
            tracing::info!(enhance, "upscaling toggled");
            true
        } else {
            false
        }
    }

    pub fn source(&self) -> &K {
        &self.source
    }
}
