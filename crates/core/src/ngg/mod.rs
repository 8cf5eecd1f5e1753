//! Lowering of vertex, tessellation evaluation and geometry programs to primitive shaders.

mod gs;
mod nogs;
pub mod pack;
pub mod repack;

use crate::config::NggConfig;
use crate::error::LowerError;
use crate::ir::{Builder, Program, Stage, Value};
use crate::subgroup::Subgroup;

pub use gs::lower_ngg_gs;
pub use nogs::lower_ngg_nogs;

/// What the caller needs to know about a lowered program.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NggInfo {
    /// Shared memory required per workgroup, in bytes. Also stored in [`Program::shared_size`].
    pub shared_size: u32,
    /// The hardware packed primitive word is forwarded as is.
    pub passthrough: bool,
    pub can_cull: bool,
    /// The primitive is exported before the shader body runs.
    pub early_prim_export: bool,
    /// Output vertices are compacted at runtime.
    pub compaction: bool,
}

/// Lowers `program` in place, picking the pipeline from its stage.
pub fn lower_ngg(program: &mut Program, config: &NggConfig) -> Result<NggInfo, LowerError> {
    match program.stage {
        Stage::Vertex | Stage::TessEval => lower_ngg_nogs(program, config),
        Stage::Geometry => lower_ngg_gs(program, config),
        stage => Err(LowerError::UnsupportedStage(stage)),
    }
}

/// Reserves the output space from the first lane of wave 0.
fn emit_alloc(b: &mut Builder, config: &NggConfig, vertices: Value, primitives: Value) {
    let wave_id = b.subgroup_id();
    let is_wave0 = b.ieq_imm(wave_id, 0);
    b.push_if(is_wave0);
    {
        let elected = config.wave.elect(b);
        b.push_if(elected);
        b.alloc_vertices_and_primitives(vertices, primitives);
        b.pop_if();
    }
    b.pop_if();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fragment_programs_are_rejected() {
        let mut program = Program::new(Stage::Fragment);
        assert_eq!(
            lower_ngg(&mut program, &NggConfig::default()),
            Err(LowerError::UnsupportedStage(Stage::Fragment))
        );
    }
}
