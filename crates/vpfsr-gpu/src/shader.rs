//! Compiled compute programs and their optional on-disk overrides.

use std::borrow::Cow;
use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use tracing::{info, warn};

/// Entry point shared by both programs.
pub const ENTRY_POINT: &str = "CSMain";
/// Shader model both programs target.
pub const TARGET_PROFILE: &str = "cs_5_0";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderStage {
    Easu,
    Rcas,
}

impl ShaderStage {
    pub const ALL: [ShaderStage; 2] = [ShaderStage::Easu, ShaderStage::Rcas];

    /// File stem used for embedded objects and overrides.
    pub const fn stem(self) -> &'static str {
        match self {
            ShaderStage::Easu => "easu",
            ShaderStage::Rcas => "rcas",
        }
    }
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.stem())
    }
}

/// A replacement program found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShaderOverride {
    /// Precompiled object, used as is.
    Bytecode(PathBuf),
    /// HLSL source, compiled at attach time.
    Source(PathBuf),
}

/// Look for `<stem>.cso`, then `<stem>.hlsl`, in `dir`.
pub fn find_override(dir: &Path, stage: ShaderStage) -> Option<ShaderOverride> {
    let cso = dir.join(format!("{}.cso", stage.stem()));
    if cso.is_file() {
        return Some(ShaderOverride::Bytecode(cso));
    }
    let hlsl = dir.join(format!("{}.hlsl", stage.stem()));
    hlsl.is_file().then_some(ShaderOverride::Source(hlsl))
}

/// Bytecode for both stages.
#[derive(Clone)]
pub struct ShaderSet {
    easu: Cow<'static, [u8]>,
    rcas: Cow<'static, [u8]>,
}

impl ShaderSet {
    pub fn embedded(easu: &'static [u8], rcas: &'static [u8]) -> Self {
        Self {
            easu: Cow::Borrowed(easu),
            rcas: Cow::Borrowed(rcas),
        }
    }

    pub fn bytecode(&self, stage: ShaderStage) -> &[u8] {
        match stage {
            ShaderStage::Easu => &self.easu,
            ShaderStage::Rcas => &self.rcas,
        }
    }

    /// Replace stages that have an override in `dir`. A stage whose override
    /// cannot be loaded keeps its current bytecode.
    pub fn with_overrides(mut self, dir: Option<&Path>) -> Self {
        let Some(dir) = dir else {
            return self;
        };
        for stage in ShaderStage::ALL {
            let Some(found) = find_override(dir, stage) else {
                continue;
            };
            match load_override(&found) {
                Ok(bytes) => {
                    info!(%stage, source = ?found, "using shader override");
                    *self.slot(stage) = Cow::Owned(bytes);
                }
                Err(e) => warn!(%stage, source = ?found, "shader override ignored: {e:#}"),
            }
        }
        self
    }

    fn slot(&mut self, stage: ShaderStage) -> &mut Cow<'static, [u8]> {
        match stage {
            ShaderStage::Easu => &mut self.easu,
            ShaderStage::Rcas => &mut self.rcas,
        }
    }
}

impl fmt::Debug for ShaderSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShaderSet")
            .field("easu_bytes", &self.easu.len())
            .field("rcas_bytes", &self.rcas.len())
            .finish()
    }
}

fn load_override(found: &ShaderOverride) -> Result<Vec<u8>> {
    match found {
        ShaderOverride::Bytecode(path) => {
            let bytes = std::fs::read(path)
                .map_err(|e| anyhow!("Failed to read {}: {e}", path.display()))?;
            if bytes.is_empty() {
                return Err(anyhow!("{} is empty", path.display()));
            }
            Ok(bytes)
        }
        ShaderOverride::Source(path) => compile_source(path),
    }
}

#[cfg(target_os = "windows")]
fn compile_source(path: &Path) -> Result<Vec<u8>> {
    use std::ffi::c_void;
    use std::mem::ManuallyDrop;

    use windows::core::{Interface, HSTRING, PCSTR};
    use windows::Win32::Graphics::Direct3D::Fxc::{
        D3DCompileFromFile, D3DCOMPILE_OPTIMIZATION_LEVEL3,
    };
    use windows::Win32::Graphics::Direct3D::{ID3DBlob, ID3DInclude};

    let file = HSTRING::from(path.as_os_str());
    // D3D_COMPILE_STANDARD_FILE_INCLUDE: resolve #include next to the source.
    // A sentinel, not an object, so it is never released.
    let include = ManuallyDrop::new(unsafe { ID3DInclude::from_raw(1 as *mut c_void) });
    let entry = format!("{ENTRY_POINT}\0");
    let target = format!("{TARGET_PROFILE}\0");

    let mut code: Option<ID3DBlob> = None;
    let mut errors: Option<ID3DBlob> = None;
    let result = unsafe {
        D3DCompileFromFile(
            &file,
            None,
            Some(&*include),
            PCSTR(entry.as_ptr()),
            PCSTR(target.as_ptr()),
            D3DCOMPILE_OPTIMIZATION_LEVEL3,
            0,
            &mut code,
            Some(&mut errors as *mut _),
        )
    };

    let blob_bytes = |blob: &ID3DBlob| unsafe {
        std::slice::from_raw_parts(blob.GetBufferPointer() as *const u8, blob.GetBufferSize())
            .to_vec()
    };

    if let Err(e) = result {
        let log = errors
            .as_ref()
            .map(|b| String::from_utf8_lossy(&blob_bytes(b)).trim_end().to_string())
            .unwrap_or_default();
        return Err(anyhow!("Failed to compile {}: {e} {log}", path.display()));
    }

    let code = code.ok_or_else(|| anyhow!("D3DCompileFromFile returned no bytecode"))?;
    Ok(blob_bytes(&code))
}

#[cfg(not(target_os = "windows"))]
fn compile_source(path: &Path) -> Result<Vec<u8>> {
    Err(anyhow!(
        "cannot compile {} without the D3D compiler",
        path.display()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    static EASU: [u8; 4] = [0x44, 0x58, 0x42, 0x43];
    static RCAS: [u8; 4] = [0x44, 0x58, 0x42, 0x44];

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("vpfsr-{name}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn embedded_without_overrides() {
        let set = ShaderSet::embedded(&EASU, &RCAS).with_overrides(None);
        assert_eq!(set.bytecode(ShaderStage::Easu), &EASU);
        assert_eq!(set.bytecode(ShaderStage::Rcas), &RCAS);
    }

    #[test]
    fn bytecode_override_replaces_one_stage() {
        let dir = scratch_dir("cso");
        std::fs::write(dir.join("rcas.cso"), [1, 2, 3]).unwrap();

        let set = ShaderSet::embedded(&EASU, &RCAS).with_overrides(Some(&dir));
        assert_eq!(set.bytecode(ShaderStage::Easu), &EASU);
        assert_eq!(set.bytecode(ShaderStage::Rcas), &[1, 2, 3]);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn prefers_bytecode_over_source() {
        let dir = scratch_dir("prefer");
        std::fs::write(dir.join("easu.hlsl"), "// source").unwrap();
        assert_eq!(
            find_override(&dir, ShaderStage::Easu),
            Some(ShaderOverride::Source(dir.join("easu.hlsl")))
        );
        std::fs::write(dir.join("easu.cso"), [9]).unwrap();
        assert_eq!(
            find_override(&dir, ShaderStage::Easu),
            Some(ShaderOverride::Bytecode(dir.join("easu.cso")))
        );
        assert_eq!(find_override(&dir, ShaderStage::Rcas), None);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn unusable_override_keeps_embedded() {
        let dir = scratch_dir("empty");
        std::fs::write(dir.join("easu.cso"), b"").unwrap();
        let set = ShaderSet::embedded(&EASU, &RCAS).with_overrides(Some(&dir));
        assert_eq!(set.bytecode(ShaderStage::Easu), &EASU);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[cfg(target_os = "windows")]
    #[test]
    fn source_override_resolves_local_includes() {
        let dir = scratch_dir("include");
        std::fs::write(
            dir.join("common.hlsli"),
            "float3 Tint(float3 c) { return c * 0.5; }\n",
        )
        .unwrap();
        std::fs::write(
            dir.join("easu.hlsl"),
            concat!(
                "#include \"common.hlsli\"\n",
                "Texture2D<float4> src : register(t0);\n",
                "RWTexture2D<float4> dst : register(u0);\n",
                "[numthreads(8, 8, 1)]\n",
                "void CSMain(uint3 id : SV_DispatchThreadID) {\n",
                "    dst[id.xy] = float4(Tint(src.Load(int3(id.xy, 0)).rgb), 1.0);\n",
                "}\n",
            ),
        )
        .unwrap();

        let set = ShaderSet::embedded(&EASU, &RCAS).with_overrides(Some(&dir));
        let easu = set.bytecode(ShaderStage::Easu);
        assert_ne!(easu, &EASU);
        assert_eq!(&easu[..4], b"DXBC");
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
