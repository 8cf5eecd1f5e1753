mod common;

use bumpalo::Bump;
use nggpass::ir::{Builder, Intrinsic, IoSlot, Program, Stage, varying};
use nggpass::ngg::repack::emit_repack;
use nggpass::software::{CompiledProgram, ComputeUnit, PrimitiveInput, WorkgroupInputs, WorkgroupOutput};
use nggpass::{SharedLayout, Subgroup as _, WaveTarget};
use proptest::prelude::*;

const RANK: IoSlot = IoSlot {
    slot: varying::VAR0,
    component: 0,
    stream: 0,
};

const TOTAL: IoSlot = IoSlot {
    slot: varying::VAR0,
    component: 1,
    stream: 0,
};

/// Compacts the lanes whose primitive id is odd and exports every lane's rank and total.
fn repack_program(wave: WaveTarget, max_num_waves: u32) -> Program {
    let mut layout = SharedLayout::builder();
    if max_num_waves > 1 {
        layout = layout.repack_scratch(max_num_waves);
    }
    let layout = layout.build();
    let mut program = Program::new(Stage::Geometry);
    program.shared_size = layout.size();

    let mut b = Builder::new(&mut program);
    let id = b.intrinsic(Intrinsic::PrimitiveId);
    let bit = b.iand_imm(id, 1);
    let survive = b.ine_imm(bit, 0);
    let repack = emit_repack(&mut b, &wave, survive, layout.repack_scratch);

    let wave_id = b.subgroup_id();
    let is_wave0 = b.ieq_imm(wave_id, 0);
    b.push_if(is_wave0);
    let elected = wave.elect(&mut b);
    b.push_if(elected);
    let lanes = b.intrinsic(Intrinsic::WorkgroupNumInputPrimitives);
    let zero = b.imm32(0);
    b.alloc_vertices_and_primitives(lanes, zero);
    b.pop_if();
    b.pop_if();

    b.store_output(RANK, repack.rank);
    b.store_output(TOTAL, repack.total);
    b.export_vertex();
    b.finish();

    program.validate().unwrap();
    program
}

fn run(wave: WaveTarget, max_num_waves: u32, survivors: &[bool], fill: u8) -> WorkgroupOutput {
    common::init_logging();

    let program = repack_program(wave, max_num_waves);
    let arena = Bump::new();
    let compiled = CompiledProgram::compile(&arena, &program).unwrap();

    let primitives = survivors
        .iter()
        .map(|&survive| PrimitiveInput::new([0; 3], survive as u32));
    let inputs = WorkgroupInputs::new(survivors.len() as u32).with_primitives(primitives);

    ComputeUnit::new(wave)
        .with_shared_fill(fill)
        .run(&compiled, &inputs)
        .unwrap()
}

fn expected_ranks(survivors: &[bool]) -> Vec<Option<u64>> {
    survivors
        .iter()
        .scan(0, |before, &survive| {
            let rank = *before;
            *before += survive as u64;
            Some(Some(rank))
        })
        .collect()
}

#[test]
fn single_wave_ranks() {
    let survivors = [true, false, true, true, false];
    let output = run(WaveTarget::Wave64, 1, &survivors, 0);

    assert_eq!(output.barriers, 0);
    assert_eq!(output.shared_loads, 0);
    assert_eq!(output.vertex_outputs(RANK), expected_ranks(&survivors));
    assert!(output.vertex_outputs(TOTAL).iter().all(|&total| total == Some(3)));

    let live = output
        .vertex_outputs(RANK)
        .into_iter()
        .zip(survivors)
        .filter(|(_, survive)| *survive)
        .map(|(rank, _)| rank)
        .collect::<Vec<_>>();
    assert_eq!(live, vec![Some(0), Some(1), Some(2)]);
}

#[test]
fn nothing_survives() {
    let output = run(WaveTarget::Wave32, 8, &[false; 200], 0xff);
    assert_eq!(output.barriers, 1);
    assert!(output.vertex_outputs(TOTAL).iter().all(|&total| total == Some(0)));
    assert!(output.vertex_outputs(RANK).iter().all(|&rank| rank == Some(0)));
}

#[test]
fn full_waves_count_up_to_the_wave_size() {
    let output = run(WaveTarget::Wave64, 4, &[true; 256], 0);
    assert!(output.vertex_outputs(TOTAL).iter().all(|&total| total == Some(256)));
    assert_eq!(output.vertex_outputs(RANK)[255], Some(255));
}

fn workgroups() -> impl Strategy<Value = (WaveTarget, u32, Vec<bool>, u8)> {
    prop_oneof![Just(WaveTarget::Wave32), Just(WaveTarget::Wave64)]
        .prop_flat_map(|wave| {
            let max_lanes = (wave.size() * 8).min(256) as usize;
            (Just(wave), proptest::collection::vec(any::<bool>(), 1..=max_lanes), any::<bool>(), any::<u8>())
        })
        .prop_map(|(wave, survivors, oversize, fill)| {
            let waves = (survivors.len() as u32).div_ceil(wave.size());
            // a workgroup may launch fewer waves than the program was lowered for
            let max_num_waves = if oversize { 8 } else { waves };
            (wave, max_num_waves, survivors, fill)
        })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn ranks_are_dense_and_ordered((wave, max_num_waves, survivors, fill) in workgroups()) {
        let output = run(wave, max_num_waves, &survivors, fill);
        let total = survivors.iter().filter(|&&survive| survive).count() as u64;

        prop_assert_eq!(output.vertex_outputs(RANK), expected_ranks(&survivors));
        prop_assert!(output.vertex_outputs(TOTAL).iter().all(|&t| t == Some(total)));
        prop_assert_eq!(output.barriers, (max_num_waves > 1) as u32);
    }
}
