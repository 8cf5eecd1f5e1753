#![allow(dead_code)]

use bumpalo::Bump;
use nggpass::ir::{IoSlot, Program, varying};
use nggpass::software::{CompiledProgram, ComputeUnit, Schedule, SimError, WorkgroupInputs, WorkgroupOutput};
use nggpass::{NggConfig, lower_ngg};

pub const POS: IoSlot = IoSlot {
    slot: varying::POS,
    component: 0,
    stream: 0,
};

pub const PRIMITIVE_ID: IoSlot = IoSlot {
    slot: varying::PRIMITIVE_ID,
    component: 0,
    stream: 0,
};

pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .is_test(true)
        .try_init();
}

/// Lowers `program` and runs it on one workgroup per entry of `launches`, all on the
/// same compute unit.
pub fn lower_and_run(
    mut program: Program,
    config: &NggConfig,
    schedule: Schedule,
    launches: &[WorkgroupInputs],
) -> Vec<Result<WorkgroupOutput, SimError>> {
    init_logging();
    lower_ngg(&mut program, config).unwrap();
    run(&program, config, ComputeUnit::new(config.wave).with_schedule(schedule), launches)
}

pub fn run(
    program: &Program,
    config: &NggConfig,
    mut compute_unit: ComputeUnit,
    launches: &[WorkgroupInputs],
) -> Vec<Result<WorkgroupOutput, SimError>> {
    assert_eq!(compute_unit.wave(), config.wave);

    let arena = Bump::new();
    let compiled = CompiledProgram::compile(&arena, program).unwrap();
    launches
        .iter()
        .map(|inputs| compute_unit.run(&compiled, inputs))
        .collect()
}
