use std::path::Path;

fn main() -> anyhow::Result<()> {
    vpfsr_gpu::build_support::compile_stages(Path::new("shaders"))
}
