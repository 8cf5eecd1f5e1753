mod common;

use common::{POS, PRIMITIVE_ID, lower_and_run};
use nggpass::ir::{Builder, IoSlot, Program, Stage, varying};
use nggpass::ngg::pack::ExportWord;
use nggpass::software::{Allocation, PrimitiveInput, Schedule, WorkgroupInputs};
use nggpass::{NggConfig, ProvokingVertex, Topology, WaveTarget};

const VAR0: IoSlot = IoSlot {
    slot: varying::VAR0,
    component: 0,
    stream: 0,
};

/// Writes the lane index as position, and as `VAR0` on odd lanes when `branch` is set.
fn vertex_program(stage: Stage, branch: bool) -> Program {
    let mut program = Program::new(stage);
    let mut b = Builder::new(&mut program);
    let lane = b.local_invocation_index();
    b.store_output(POS, lane);

    if branch {
        let odd = b.iand_imm(lane, 1);
        let odd = b.ine_imm(odd, 0);
        b.push_if(odd);
        b.store_output(VAR0, lane);
        b.pop_if();
    }

    b.finish();
    program
}

/// `n` vertices and `n` triangles; triangle `i` starts at vertex `i` and wraps around.
fn fan(n: u32) -> Vec<PrimitiveInput> {
    (0..n)
        .map(|i| PrimitiveInput::new([i, (i + 1) % n, (i + 2) % n], 1000 + i))
        .collect()
}

fn config(wave: WaveTarget, lanes: u32) -> NggConfig {
    NggConfig::default().with_wave(wave).with_workgroup_size(lanes)
}

#[test]
fn every_input_is_exported_once() {
    for (wave, lanes) in [(WaveTarget::Wave32, 96), (WaveTarget::Wave64, 100), (WaveTarget::Wave64, 7)] {
        for branch in [false, true] {
            let inputs = WorkgroupInputs::new(lanes)
                .with_es_vertices(lanes)
                .with_primitives(fan(lanes).into_iter().take(lanes as usize - 2));

            let output = lower_and_run(
                vertex_program(Stage::Vertex, branch),
                &config(wave, lanes),
                Schedule::Forward,
                &[inputs],
            )
            .remove(0)
            .unwrap();

            assert_eq!(
                output.allocation,
                Some(Allocation {
                    vertices: lanes,
                    primitives: lanes - 2,
                })
            );
            assert_eq!(output.primitives.len(), lanes as usize - 2);
            assert_eq!(output.vertices.len(), lanes as usize);

            for (lane, word) in &output.primitives {
                assert_eq!(word.unpack(), [*lane, lane + 1, lane + 2]);
                assert!(!word.is_null());
            }

            let positions = output.vertex_outputs(POS);
            assert!(positions.iter().enumerate().all(|(i, &pos)| pos == Some(i as u64)));

            let var0 = output.vertex_outputs(VAR0);
            for (i, value) in var0.into_iter().enumerate() {
                let expected = (branch && i % 2 == 1).then_some(i as u64);
                assert_eq!(value, expected);
            }
        }
    }
}

#[test]
fn primitive_ids_reach_the_provoking_vertex() {
    let waves = [
        (WaveTarget::Wave32, 32),
        (WaveTarget::Wave32, 70),
        (WaveTarget::Wave32, 256),
        (WaveTarget::Wave64, 130),
    ];

    for (wave, lanes) in waves {
        for provoking in [ProvokingVertex::First, ProvokingVertex::Last] {
            for branch in [false, true] {
                for schedule in [Schedule::Forward, Schedule::Reverse] {
                    let config = config(wave, lanes)
                        .with_export_prim_id(true)
                        .with_passthrough(true)
                        .with_provoking_vertex(provoking);
                    let inputs = WorkgroupInputs::new(lanes).with_es_vertices(lanes).with_primitives(fan(lanes));

                    let output = lower_and_run(vertex_program(Stage::Vertex, branch), &config, schedule, &[inputs])
                        .remove(0)
                        .unwrap();
                    assert_eq!(output.barriers, 1);

                    // vertex `v` provokes triangle `v`, or triangle `v - 2` when the last vertex provokes
                    let shift = match provoking {
                        ProvokingVertex::First => 0,
                        ProvokingVertex::Last => lanes - 2,
                    };
                    for (v, id) in output.vertex_outputs(PRIMITIVE_ID).into_iter().enumerate() {
                        assert_eq!(id, Some(1000 + ((v as u32 + shift) % lanes) as u64), "vertex {v}");
                    }
                }
            }
        }
    }
}

#[test]
fn passthrough_forwards_the_hardware_word() {
    let lanes = 48;
    let primitives = fan(lanes);
    let inputs = WorkgroupInputs::new(lanes)
        .with_es_vertices(lanes)
        .with_primitives(primitives.clone());

    let config = config(WaveTarget::Wave32, lanes).with_passthrough(true);
    let output = lower_and_run(vertex_program(Stage::Vertex, false), &config, Schedule::Forward, &[inputs])
        .remove(0)
        .unwrap();

    let words = output.primitives.iter().map(|&(_, word)| word).collect::<Vec<_>>();
    let expected = primitives
        .iter()
        .map(|p| ExportWord::pack(&p.vertices, None, false))
        .collect::<Vec<_>>();
    assert_eq!(words, expected);
    assert_eq!(output.barriers, 0);
    assert_eq!(output.shared_stores, 0);
}

#[test]
fn edge_flags_are_packed_for_vertex_shaders() {
    let lanes = 4;
    let primitives = [
        PrimitiveInput::new([0, 1, 2], 0).with_edge_flags([true, false, true]),
        PrimitiveInput::new([1, 2, 3], 1).with_edge_flags([false, true, false]),
    ];
    let inputs = WorkgroupInputs::new(lanes).with_es_vertices(lanes).with_primitives(primitives);

    for stage in [Stage::Vertex, Stage::TessEval] {
        let output = lower_and_run(
            vertex_program(stage, true),
            &config(WaveTarget::Wave64, lanes),
            Schedule::Forward,
            &[inputs.clone()],
        )
        .remove(0)
        .unwrap();

        let flags = output
            .primitives
            .iter()
            .map(|(_, word)| [word.edge_flag(0), word.edge_flag(1), word.edge_flag(2)])
            .collect::<Vec<_>>();

        match stage {
            Stage::Vertex => assert_eq!(flags, [[true, false, true], [false, true, false]]),
            _ => assert_eq!(flags, [[false; 3]; 2]),
        }

        let indices = output
            .primitives
            .iter()
            .map(|(_, word)| (0..3).map(|i| word.index_without_edge_flag(i)).collect::<Vec<_>>())
            .collect::<Vec<_>>();
        assert_eq!(indices, [vec![0, 1, 2], vec![1, 2, 3]]);
    }
}

#[test]
fn tess_eval_exports_the_patch_id() {
    let lanes = 40;
    let inputs = WorkgroupInputs::new(lanes)
        .with_es_vertices(lanes)
        .with_primitives(fan(lanes))
        .with_patch_ids((0..lanes).map(|v| v / 4));

    let config = config(WaveTarget::Wave32, lanes).with_export_prim_id(true).with_passthrough(true);
    let output = lower_and_run(vertex_program(Stage::TessEval, true), &config, Schedule::Reverse, &[inputs])
        .remove(0)
        .unwrap();

    assert_eq!(output.barriers, 0);
    for (v, id) in output.vertex_outputs(PRIMITIVE_ID).into_iter().enumerate() {
        assert_eq!(id, Some(v as u64 / 4));
    }
}

#[test]
fn lines_use_two_indices() {
    let lanes = 6;
    let primitives = (0..lanes - 1).map(|i| PrimitiveInput::new([i, i + 1, 0], i));
    let inputs = WorkgroupInputs::new(lanes)
        .with_topology(Topology::Lines)
        .with_es_vertices(lanes)
        .with_primitives(primitives);

    let config = config(WaveTarget::Wave64, lanes).with_topology(Topology::Lines);
    let output = lower_and_run(vertex_program(Stage::TessEval, false), &config, Schedule::Forward, &[inputs])
        .remove(0)
        .unwrap();

    for (lane, word) in &output.primitives {
        assert_eq!(word.unpack(), [*lane, lane + 1, 0]);
    }
}

#[test]
fn more_primitives_than_vertices() {
    // every triangle reuses the same three vertices
    let lanes = 64;
    let primitives = (0..lanes).map(|i| PrimitiveInput::new([0, 1, 2], i));
    let inputs = WorkgroupInputs::new(lanes).with_es_vertices(3).with_primitives(primitives);

    let output = lower_and_run(
        vertex_program(Stage::Vertex, true),
        &config(WaveTarget::Wave32, lanes),
        Schedule::Reverse,
        &[inputs],
    )
    .remove(0)
    .unwrap();

    assert_eq!(
        output.allocation,
        Some(Allocation {
            vertices: 3,
            primitives: 64,
        })
    );
    assert_eq!(output.vertices.len(), 3);
    assert_eq!(output.primitives.len(), 64);
}
