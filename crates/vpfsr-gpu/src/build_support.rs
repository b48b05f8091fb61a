//! Build-time compilation of the EASU and RCAS programs.
//!
//! `build.rs` calls [`compile_stages`] on the crate's shader directory. Each
//! [`ShaderStage`] is compiled from `<stem>.hlsl` into `OUT_DIR/<stem>.cso`
//! and embedded with [`include_stage!`]:
//!
//! ```rust,ignore
//! let easu: &[u8] = vpfsr_gpu::include_stage!("easu");
//! ```

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};

use crate::shader::{ShaderStage, ENTRY_POINT, TARGET_PROFILE};

/// Environment variable naming an explicit `fxc.exe`.
pub const FXC_ENV: &str = "FXC";

/// One fxc invocation: a stage's source and the object it produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageJob {
    pub stage: ShaderStage,
    pub source: PathBuf,
    pub object: PathBuf,
}

impl StageJob {
    /// Command-line arguments for fxc. Includes resolve against `shader_dir`.
    pub fn fxc_args(&self, shader_dir: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = ["/nologo", "/O3", "/T", TARGET_PROFILE, "/E", ENTRY_POINT]
            .into_iter()
            .map(OsString::from)
            .collect();
        args.push("/I".into());
        args.push(shader_dir.into());
        args.push("/Fo".into());
        args.push(self.object.clone().into());
        args.push(self.source.clone().into());
        args
    }
}

/// Jobs for every stage, reading from `shader_dir` and writing to `out_dir`.
pub fn stage_jobs(shader_dir: &Path, out_dir: &Path) -> Vec<StageJob> {
    ShaderStage::ALL
        .into_iter()
        .map(|stage| StageJob {
            stage,
            source: shader_dir.join(format!("{}.hlsl", stage.stem())),
            object: out_dir.join(format!("{}.cso", stage.stem())),
        })
        .collect()
}

/// Compile every stage in `shader_dir` into `OUT_DIR`.
#[cfg(target_os = "windows")]
pub fn compile_stages(shader_dir: &Path) -> Result<()> {
    let out_dir = std::env::var_os("OUT_DIR").ok_or_else(|| anyhow!("OUT_DIR is not set"))?;
    let fxc = locate_fxc();

    for job in stage_jobs(shader_dir, Path::new(&out_dir)) {
        let status = std::process::Command::new(&fxc)
            .args(job.fxc_args(shader_dir))
            .status()
            .map_err(|e| anyhow!("Failed to run {}: {e}", fxc.display()))?;
        if !status.success() {
            return Err(anyhow!(
                "fxc rejected {} ({status})",
                job.source.display()
            ));
        }
    }

    track_sources(shader_dir);
    Ok(())
}

/// Without fxc on the host only the sources are tracked. The embedded
/// objects come from a Windows build.
#[cfg(not(target_os = "windows"))]
pub fn compile_stages(shader_dir: &Path) -> Result<()> {
    if !shader_dir.is_dir() {
        return Err(anyhow!("no shader directory at {}", shader_dir.display()));
    }
    track_sources(shader_dir);
    Ok(())
}

fn track_sources(shader_dir: &Path) {
    println!("cargo:rerun-if-env-changed={FXC_ENV}");
    let Ok(dir) = std::fs::read_dir(shader_dir) else {
        return;
    };
    for path in dir.flatten().map(|e| e.path()) {
        if path.extension().is_some_and(|e| e == "hlsl" || e == "hlsli") {
            println!("cargo:rerun-if-changed={}", path.display());
        }
    }
}

/// `$FXC`, then the newest Windows 10 SDK, then whatever `PATH` finds.
#[cfg(target_os = "windows")]
fn locate_fxc() -> PathBuf {
    if let Some(path) = std::env::var_os(FXC_ENV) {
        return path.into();
    }
    let kits = std::env::var_os("ProgramFiles(x86)")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(r"C:\Program Files (x86)"))
        .join(r"Windows Kits\10\bin");
    let mut sdks: Vec<PathBuf> = std::fs::read_dir(kits)
        .into_iter()
        .flatten()
        .flatten()
        .map(|e| e.path().join(r"x64\fxc.exe"))
        .filter(|fxc| fxc.is_file())
        .collect();
    sdks.sort();
    sdks.pop().unwrap_or_else(|| PathBuf::from("fxc.exe"))
}

/// Embed the object [`compile_stages`] wrote for the stage with this stem.
#[macro_export]
macro_rules! include_stage {
    ($stem:literal) => {
        include_bytes!(concat!(env!("OUT_DIR"), "/", $stem, ".cso"))
    };
}
