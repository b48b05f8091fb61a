//! Per-call choice between forwarding a blit and enhancing it.
//!
//! The hooked entry point reduces each call to a [`FramePath`]: one method
//! per Enhance sub-step, plus `forward` for Bypass. [`Dispatcher`] drives
//! the steps in order and falls back to forwarding on the first failure, so
//! the host always gets either the enhanced frame or its own blit.

use thiserror::Error;
use tracing::{debug, trace};

use vpfsr_core::abi::S_OK;
use vpfsr_core::{EnabledFlag, Hotkey, KeySource};

/// What happened to one intercepted call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Forwarded unchanged to the original entry.
    Bypass,
    /// Replaced by the upscaled frame.
    Enhance,
}

/// The Enhance sub-step that failed.
#[derive(Debug, Error)]
pub enum EnhanceError {
    #[error("no usable input stream: {0:#}")]
    NoInput(anyhow::Error),
    #[error("resolving host device and surfaces: {0:#}")]
    Resolve(anyhow::Error),
    #[error("pipeline resources unavailable: {0:#}")]
    NotReady(anyhow::Error),
    #[error("converting input frame: {0:#}")]
    ConvertInput(anyhow::Error),
    #[error("upscaling: {0:#}")]
    Upscale(anyhow::Error),
    #[error("presenting to destination: {0:#}")]
    Present(anyhow::Error),
}

/// One intercepted call, split into the steps the dispatcher drives.
pub trait FramePath {
    /// Host objects and surface descriptions gathered by [`FramePath::resolve`].
    type Frame;

    /// At least one stream with a non-null input surface.
    fn has_input(&self) -> bool;

    fn resolve(&mut self) -> anyhow::Result<Self::Frame>;

    /// Make sure resources for this frame's dims exist. False if they could
    /// not be built.
    fn ensure_ready(&mut self, frame: &Self::Frame) -> bool;

    /// Bring the host's input into the pipeline's input texture.
    fn convert_input(&mut self, frame: &Self::Frame) -> anyhow::Result<()>;

    /// Run both compute stages.
    fn upscale(&mut self, frame: &Self::Frame, sharpness: f32) -> anyhow::Result<()>;

    /// Write the result into the host's destination.
    fn present(&mut self, frame: &Self::Frame) -> anyhow::Result<()>;

    /// Call the original entry with the original arguments.
    fn forward(&mut self) -> i32;
}

pub struct Dispatcher<'a, K> {
    flag: &'a EnabledFlag,
    hotkey: &'a Hotkey<K>,
    sharpness: f32,
}

impl<'a, K: KeySource> Dispatcher<'a, K> {
    pub fn new(flag: &'a EnabledFlag, hotkey: &'a Hotkey<K>, sharpness: f32) -> Self {
        Self {
            flag,
            hotkey,
            sharpness,
        }
    }

    /// Handle one call and return the HRESULT the host sees.
    pub fn intercept<P: FramePath>(&self, path: &mut P) -> i32 {
        self.intercept_with_mode(path).1
    }

    /// Like [`Dispatcher::intercept`], also reporting which mode ran.
    pub fn intercept_with_mode<P: FramePath>(&self, path: &mut P) -> (Mode, i32) {
        self.hotkey.poll(self.flag);

        if !self.flag.is_enhancing() {
            return (Mode::Bypass, path.forward());
        }

        match self.enhance(path) {
            Ok(()) => {
                trace!("frame enhanced");
                (Mode::Enhance, S_OK)
            }
            Err(e) => {
                debug!("bypassing frame: {e}");
                (Mode::Bypass, path.forward())
            }
        }
    }

    fn enhance<P: FramePath>(&self, path: &mut P) -> Result<(), EnhanceError> {
        if !path.has_input() {
            return Err(EnhanceError::NoInput(anyhow::anyhow!(
                "stream list empty or first input surface null"
            )));
        }
        let frame = path.resolve().map_err(EnhanceError::Resolve)?;
        if !path.ensure_ready(&frame) {
            return Err(EnhanceError::NotReady(anyhow::anyhow!(
                "resource build failed for this frame size"
            )));
        }
        path.convert_input(&frame).map_err(EnhanceError::ConvertInput)?;
        path.upscale(&frame, self.sharpness)
            .map_err(EnhanceError::Upscale)?;
        path.present(&frame).map_err(EnhanceError::Present)?;
        Ok(())
    }
}
