use super::{CompiledProgram, FlatOp};
use crate::memory::SharedMemory;
use crate::workgroup::{Allocation, WorkgroupInputs, WorkgroupOutput};
use crate::SimError;
use nggpass_core::ir::{Instr, Intrinsic, IoSlot, Stage, Type, Value, Var};
use nggpass_core::ngg::pack::ExportWord;
use nggpass_core::WaveTarget;
use log::trace;
use slotmap::SecondaryMap;
use std::collections::BTreeMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum WaveStatus {
    Running,
    Barrier,
    Done,
}

enum Frame {
    If { saved: u64, else_mask: u64 },
    Loop { saved: u64, broken: u64 },
}

/// Execution state of one wave: lanes run in lockstep under the `exec` mask.
pub(crate) struct WaveState {
    pub id: u32,
    pub status: WaveStatus,
    size: u32,
    first_lane: u32,
    /// Lanes of the wave that exist in the workgroup.
    launch: u64,
    exec: u64,
    pc: usize,
    steps: u64,
    frames: Vec<Frame>,

    registers: Vec<u64>,
    vars: SecondaryMap<Var, Vec<u64>>,
    outputs: Vec<BTreeMap<IoSlot, u64>>,
}

/// One workgroup in flight on a compute unit.
pub(crate) struct WorkgroupContext<'a> {
    pub program: CompiledProgram<'a>,
    pub inputs: &'a WorkgroupInputs,
    pub memory: &'a mut SharedMemory,
    pub output: WorkgroupOutput,
    pub num_waves: u32,
    pub step_limit: u64,
}

fn lanes(mask: u64) -> impl Iterator<Item = u32> {
    let mut mask = mask;
    std::iter::from_fn(move || {
        if mask == 0 {
            return None;
        }
        let lane = mask.trailing_zeros();
        mask &= mask - 1;
        Some(lane)
    })
}

fn lane_mask(count: u32) -> u64 {
    match count {
        64.. => u64::MAX,
        count => (1u64 << count) - 1,
    }
}

fn convert(value: u64, to: Type) -> u64 {
    match to {
        Type::Bool => (value != 0) as u64,
        to => value & to.mask(),
    }
}

impl WaveState {
    pub fn new(program: &CompiledProgram, wave: WaveTarget, id: u32, num_lanes: u32) -> Self {
        let size = wave.size();
        let first_lane = id * size;
        let launch = lane_mask(num_lanes.saturating_sub(first_lane).min(size));

        let mut vars = SecondaryMap::new();
        for (var, _) in program.program().vars() {
            vars.insert(var, vec![0; size as usize]);
        }

        Self {
            id,
            status: WaveStatus::Running,
            size,
            first_lane,
            launch,
            exec: launch,
            pc: 0,
            steps: 0,
            frames: Vec::new(),
            registers: vec![0; program.program().num_values() * size as usize],
            vars,
            outputs: vec![BTreeMap::new(); size as usize],
        }
    }

    fn get(&self, value: Value, lane: u32) -> u64 {
        self.registers[value.into_raw() * self.size as usize + lane as usize]
    }

    fn set(&mut self, value: Value, lane: u32, data: u64) {
        self.registers[value.into_raw() * self.size as usize + lane as usize] = data;
    }

    /// Active lanes where `value` is non-zero.
    fn mask_of(&self, value: Value) -> u64 {
        lanes(self.exec).filter(|&lane| self.get(value, lane) != 0).fold(0, |mask, lane| mask | 1 << lane)
    }

    fn global(&self, lane: u32) -> u32 {
        self.first_lane + lane
    }

    /// Lanes that left the innermost enclosing loop.
    fn broken(&self) -> u64 {
        self.frames
            .iter()
            .rev()
            .find_map(|frame| match frame {
                Frame::Loop { broken, .. } => Some(*broken),
                Frame::If { .. } => None,
            })
            .unwrap_or(0)
    }
}

impl WorkgroupContext<'_> {
    /// Runs `wave` until it finishes or reaches a barrier.
    pub fn run_wave(&mut self, wave: &mut WaveState) -> Result<(), SimError> {
        let ops = self.program.ops();

        while wave.pc < ops.len() {
            wave.steps += 1;
            if wave.steps > self.step_limit {
                return Err(SimError::StepLimit(wave.id));
            }

            match ops[wave.pc] {
                FlatOp::Instr(value) => {
                    wave.pc += 1;
                    if wave.exec == 0 {
                        continue;
                    }

                    if let Instr::Intrinsic(Intrinsic::Barrier) = self.program.program().instr(value) {
                        if wave.exec != wave.launch {
                            return Err(SimError::DivergentBarrier {
                                wave: wave.id,
                                active: wave.exec,
                                expected: wave.launch,
                            });
                        }

                        wave.status = WaveStatus::Barrier;
                        return Ok(());
                    }

                    self.execute(wave, value)?;
                }

                FlatOp::If { cond, else_ } => {
                    let taken = wave.mask_of(cond);
                    wave.frames.push(Frame::If {
                        saved: wave.exec,
                        else_mask: wave.exec & !taken,
                    });
                    wave.exec = taken;
                    wave.pc = if taken == 0 { else_ as usize } else { wave.pc + 1 };
                }

                FlatOp::Else { end } => {
                    let Some(&Frame::If { else_mask, .. }) = wave.frames.last() else {
                        unreachable!("else without if");
                    };
                    wave.exec = else_mask;
                    wave.pc = if else_mask == 0 { end as usize } else { wave.pc + 1 };
                }

                FlatOp::EndIf => {
                    let Some(Frame::If { saved, .. }) = wave.frames.pop() else {
                        unreachable!("endif without if");
                    };
                    wave.exec = saved & !wave.broken();
                    wave.pc += 1;
                }

                FlatOp::Loop => {
                    wave.frames.push(Frame::Loop {
                        saved: wave.exec,
                        broken: 0,
                    });
                    wave.pc += 1;
                }

                FlatOp::Break => {
                    let exec = wave.exec;
                    match wave.frames.iter_mut().rev().find(|frame| matches!(frame, Frame::Loop { .. })) {
                        Some(Frame::Loop { broken, .. }) => *broken |= exec,
                        _ => unreachable!("break outside of a loop"),
                    }
                    wave.exec = 0;
                    wave.pc += 1;
                }

                FlatOp::EndLoop { start } => {
                    if wave.exec != 0 {
                        wave.pc = start as usize + 1;
                    } else {
                        let Some(Frame::Loop { saved, .. }) = wave.frames.pop() else {
                            unreachable!("endloop without loop");
                        };
                        wave.exec = saved;
                        wave.pc += 1;
                    }
                }
            }
        }

        wave.status = WaveStatus::Done;
        Ok(())
    }

    fn execute(&mut self, wave: &mut WaveState, value: Value) -> Result<(), SimError> {
        let program = self.program.program();
        let instr = program.instr(value);
        trace!("wave {} exec {:#x}: {value:?} = {instr:?}", wave.id, wave.exec);

        match instr {
            Instr::Intrinsic(intrinsic) => return self.intrinsic(wave, value, intrinsic),
            Instr::LoadVar(var) => {
                for lane in lanes(wave.exec) {
                    let data = wave.vars[var][lane as usize];
                    wave.set(value, lane, data);
                }
            }
            Instr::StoreVar(var, data) => {
                for lane in lanes(wave.exec) {
                    let data = wave.get(data, lane);
                    wave.vars[var][lane as usize] = data;
                }
            }
            instr => {
                for lane in lanes(wave.exec) {
                    let data = match instr {
                        Instr::Const(_, constant) => constant,
                        Instr::Undef(_) => 0,
                        Instr::Unary(op, a) => op.eval(wave.get(a, lane)),
                        Instr::Binary(op, a, b) => op.eval(program.type_of(a), wave.get(a, lane), wave.get(b, lane)),
                        Instr::Select(cond, a, b) => match wave.get(cond, lane) {
                            0 => wave.get(b, lane),
                            _ => wave.get(a, lane),
                        },
                        Instr::Convert(a, to) => convert(wave.get(a, lane), to),
                        Instr::Ubfe { value, offset, bits } => (wave.get(value, lane) >> offset) & lane_mask(bits as u32),
                        Instr::LoadVar(_) | Instr::StoreVar(..) | Instr::Intrinsic(_) => unreachable!(),
                    };
                    wave.set(value, lane, data);
                }
            }
        }

        Ok(())
    }

    fn intrinsic(&mut self, wave: &mut WaveState, value: Value, intrinsic: Intrinsic) -> Result<(), SimError> {
        let program = self.program.program();
        let inputs = self.inputs;
        let exec = wave.exec;
        let first = exec.trailing_zeros();

        use Intrinsic::*;
        match intrinsic {
            Ballot { value: predicate, .. } => {
                let mask = wave.mask_of(predicate);
                for lane in lanes(exec) {
                    wave.set(value, lane, mask);
                }
            }
            MaskedBitCount(mask) => {
                for lane in lanes(exec) {
                    let below = wave.get(mask, lane) & lane_mask(lane);
                    wave.set(value, lane, below.count_ones() as u64);
                }
            }
            ReadLane { value: source, lane: index } => {
                for lane in lanes(exec) {
                    let index = wave.get(index, lane);
                    let data = if index < wave.size as u64 {
                        wave.get(source, index as u32)
                    } else {
                        0
                    };
                    wave.set(value, lane, data);
                }
            }
            ReadFirstLane(source) => {
                let data = wave.get(source, first);
                for lane in lanes(exec) {
                    wave.set(value, lane, data);
                }
            }
            Elect => {
                for lane in lanes(exec) {
                    wave.set(value, lane, (lane == first) as u64);
                }
            }
            ReduceAdd(source) => {
                let ty = program.type_of(source);
                let sum = lanes(exec).fold(0u64, |sum, lane| sum.wrapping_add(wave.get(source, lane))) & ty.mask();
                for lane in lanes(exec) {
                    wave.set(value, lane, sum);
                }
            }

            LoadShared { addr, base, ty } => {
                for lane in lanes(exec) {
                    let at = base as u64 + wave.get(addr, lane);
                    let data = self.memory.load(
                        wave.id,
                        wave.global(lane),
                        at,
                        ty.bytes(),
                        self.program.shared_size(),
                    )?;
                    self.output.shared_loads += 1;
                    wave.set(value, lane, data);
                }
            }
            StoreShared { value: data, addr, base } => {
                let len = program.type_of(data).bytes();
                for lane in lanes(exec) {
                    let at = base as u64 + wave.get(addr, lane);
                    self.memory.store(
                        wave.id,
                        wave.global(lane),
                        at,
                        len,
                        wave.get(data, lane),
                        self.program.shared_size(),
                    )?;
                    self.output.shared_stores += 1;
                }
            }
            Barrier => unreachable!("barriers are handled by the scheduler"),
            QueryAtomicAdd { stream, value: count } => {
                for lane in lanes(exec) {
                    let counter = &mut self.output.query_counters[stream as usize];
                    *counter = counter.wrapping_add(wave.get(count, lane));
                }
            }

            AllocVerticesAndPrimitives { vertices, primitives } => {
                for lane in lanes(exec) {
                    if wave.id != 0 {
                        return Err(SimError::Allocation("outside of wave 0"));
                    }
                    if self.output.allocation.is_some() {
                        return Err(SimError::Allocation("more than once"));
                    }
                    self.output.allocation = Some(Allocation {
                        vertices: wave.get(vertices, lane) as u32,
                        primitives: wave.get(primitives, lane) as u32,
                    });
                }
            }
            ExportPrimitive(arg) => {
                for lane in lanes(exec) {
                    let word = ExportWord(wave.get(arg, lane) as u32);
                    self.output.primitives.push((wave.global(lane), word));
                }
            }
            ExportVertex => {
                for lane in lanes(exec) {
                    let outputs = wave.outputs[lane as usize].clone();
                    self.output.vertices.push((wave.global(lane), outputs));
                }
            }
            StoreOutput { io, value: data } => {
                for lane in lanes(exec) {
                    let data = wave.get(data, lane);
                    wave.outputs[lane as usize].insert(io, data);
                }
            }

            EmitVertex { .. } | EndPrimitive { .. } | SetVertexAndPrimitiveCount { .. } => {
                return Err(SimError::Unlowered(intrinsic));
            }

            _ => {
                for lane in lanes(exec) {
                    let global = wave.global(lane);
                    let primitive = inputs.primitive(global);
                    let data = match intrinsic {
                        SubgroupId => wave.id as u64,
                        NumSubgroups => self.num_waves as u64,
                        SubgroupInvocation => lane as u64,
                        LocalInvocationIndex => global as u64,
                        HasInputVertex => (global < inputs.es_vertices) as u64,
                        HasInputPrimitive => primitive.is_some() as u64,
                        WorkgroupNumInputVertices => inputs.es_vertices as u64,
                        WorkgroupNumInputPrimitives => inputs.num_primitives() as u64,
                        GsVertexOffset { base } => primitive.map_or(0, |p| {
                            let low = p.vertices.get(base as usize).copied().unwrap_or(0);
                            let high = p.vertices.get(base as usize + 1).copied().unwrap_or(0);
                            (low | high << 16) as u64
                        }),
                        PackedPassthroughPrimitive => primitive.map_or(0, |p| {
                            let count = inputs.topology.vertex_count() as usize;
                            ExportWord::pack(&p.vertices[..count], None, false).0 as u64
                        }),
                        InitialEdgeFlag { vertex } => {
                            primitive.map_or(0, |p| p.edge_flags.get(vertex as usize).copied().unwrap_or(false) as u64)
                        }
                        PrimitiveId => match program.stage {
                            Stage::TessEval => inputs.patch_ids.get(global as usize).copied().unwrap_or(0) as u64,
                            _ => primitive.map_or(0, |p| p.primitive_id as u64),
                        },
                        ShaderQueryEnabled => inputs.shader_query_enabled as u64,
                        _ => unreachable!("{intrinsic:?} is not a lane input"),
                    };
                    wave.set(value, lane, data);
                }
            }
        }

        Ok(())
    }

    /// Checks the exports against the allocation and puts them in lane order.
    pub fn finish(mut self) -> Result<WorkgroupOutput, SimError> {
        let allocation = self.output.allocation;
        let has_exports = !self.output.primitives.is_empty() || !self.output.vertices.is_empty();
        if has_exports && allocation.is_none() {
            return Err(SimError::Allocation("missing for a workgroup with exports"));
        }

        let Allocation { vertices, primitives } = allocation.unwrap_or(Allocation {
            vertices: 0,
            primitives: 0,
        });

        self.output.primitives.sort_by_key(|(lane, _)| *lane);
        self.output.vertices.sort_by_key(|(lane, _)| *lane);

        if let Some(&(lane, _)) = self.output.primitives.iter().find(|(lane, _)| *lane >= primitives) {
            return Err(SimError::ExportOutOfRange { lane, kind: "primitive" });
        }
        if let Some((lane, _)) = self.output.vertices.iter().find(|(lane, _)| *lane >= vertices) {
            return Err(SimError::ExportOutOfRange {
                lane: *lane,
                kind: "vertex",
            });
        }

        Ok(self.output)
    }
}
