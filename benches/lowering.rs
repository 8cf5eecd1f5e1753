use bumpalo::Bump;
use criterion::{Criterion, criterion_group, criterion_main};
use nggpass::ir::{Builder, Intrinsic, IoSlot, Program, Stage, varying};
use nggpass::software::*;
use nggpass::*;
use std::hint::black_box;

const POS: IoSlot = IoSlot {
    slot: varying::POS,
    component: 0,
    stream: 0,
};

fn strip_gs() -> Program {
    let mut program = Program::new(Stage::Geometry);
    let mut b = Builder::new(&mut program);

    let id = b.intrinsic(Intrinsic::PrimitiveId);
    let count = b.iand_imm(id, 3);
    for i in 0..4 {
        let i = b.imm32(i);
        let emits = b.ult(i, count);
        b.push_if(emits);
        b.store_output(POS, id);
        b.emit_vertex(0, i, i);
        b.pop_if();
    }

    let prims = b.imm32(2);
    b.set_vertex_and_primitive_count(0, count, prims);
    b.finish();
    program
}

fn vs() -> Program {
    let mut program = Program::new(Stage::Vertex);
    let mut b = Builder::new(&mut program);
    let lane = b.local_invocation_index();
    b.store_output(POS, lane);
    b.finish();
    program
}

fn criterion_benchmark(c: &mut Criterion) {
    let config = NggConfig::default()
        .with_wave(WaveTarget::Wave32)
        .with_workgroup_size(128)
        .with_export_prim_id(true);

    c.bench_function("strip gs (lower)", |b| {
        let program = strip_gs();
        b.iter(|| {
            let mut program = program.clone();
            black_box(lower_ngg(&mut program, &config).unwrap());
        });
    });

    c.bench_function("strip gs (run)", |b| {
        let mut program = strip_gs();
        lower_ngg(&mut program, &config).unwrap();

        let arena = Bump::new();
        let compiled = CompiledProgram::compile(&arena, &program).unwrap();
        let inputs = WorkgroupInputs::new(128).with_primitives((0..32).map(|p| PrimitiveInput::new([0; 3], p)));
        let mut compute_unit = ComputeUnit::new(WaveTarget::Wave32);

        b.iter(|| black_box(compute_unit.run(&compiled, &inputs).unwrap()));
    });

    c.bench_function("vs with primitive id (run)", |b| {
        let mut program = vs();
        lower_ngg(&mut program, &config).unwrap();

        let arena = Bump::new();
        let compiled = CompiledProgram::compile(&arena, &program).unwrap();
        let inputs = WorkgroupInputs::new(128)
            .with_es_vertices(128)
            .with_primitives((0..128).map(|i| PrimitiveInput::new([i, (i + 1) % 128, (i + 2) % 128], i)));
        let mut compute_unit = ComputeUnit::new(WaveTarget::Wave32);

        b.iter(|| black_box(compute_unit.run(&compiled, &inputs).unwrap()));
    });

    c.bench_function("dispatch 16 workgroups", |b| {
        let mut program = strip_gs();
        lower_ngg(&mut program, &config).unwrap();

        let arena = Bump::new();
        let compiled = CompiledProgram::compile(&arena, &program).unwrap();
        let workgroups = (0..16)
            .map(|w| WorkgroupInputs::new(128).with_primitives((0..32).map(|p| PrimitiveInput::new([0; 3], p + w))))
            .collect::<Vec<_>>();

        b.iter(|| black_box(dispatch(&compiled, WaveTarget::Wave32, &workgroups)));
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
