use crate::{
    SimError,
    memory::SharedMemory,
    vm::{CompiledProgram, WaveState, WaveStatus, WorkgroupContext},
    workgroup::{WorkgroupInputs, WorkgroupOutput},
};
use log::debug;
use nggpass_core::WaveTarget;

/// Order in which waves get to run between two barriers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Schedule {
    #[default]
    Forward,
    Reverse,
}

/// A compute unit that runs workgroups one after another.
///
/// Shared memory is not cleared between workgroups, so a program that reads data it did not
/// write in the same launch sees whatever the previous workgroup left behind.
pub struct ComputeUnit {
    wave: WaveTarget,
    schedule: Schedule,
    step_limit: u64,
    memory: SharedMemory,
}

impl ComputeUnit {
    pub fn new(wave: WaveTarget) -> Self {
        Self {
            wave,
            schedule: Schedule::Forward,
            step_limit: 1 << 20,
            memory: SharedMemory::new(0),
        }
    }

    pub fn with_schedule(mut self, schedule: Schedule) -> Self {
        self.schedule = schedule;
        self
    }

    /// Byte that fresh shared memory starts out with.
    pub fn with_shared_fill(mut self, fill: u8) -> Self {
        self.memory = SharedMemory::new(fill);
        self
    }

    /// Maximum number of operations a single wave may execute per workgroup.
    pub fn with_step_limit(mut self, step_limit: u64) -> Self {
        self.step_limit = step_limit;
        self
    }

    pub fn wave(&self) -> WaveTarget {
        self.wave
    }

    pub fn memory(&self) -> &SharedMemory {
        &self.memory
    }

    pub fn run(&mut self, program: &CompiledProgram, inputs: &WorkgroupInputs) -> Result<WorkgroupOutput, SimError> {
        inputs.validate(self.wave)?;
        self.memory.reserve(program.shared_size());
        self.memory.sync();

        let num_waves = inputs.num_waves(self.wave);
        let mut waves = (0..num_waves)
            .map(|id| WaveState::new(program, self.wave, id, inputs.num_lanes))
            .collect::<Vec<_>>();

        let mut context = WorkgroupContext {
            program: *program,
            inputs,
            memory: &mut self.memory,
            output: WorkgroupOutput::default(),
            num_waves,
            step_limit: self.step_limit,
        };

        loop {
            match self.schedule {
                Schedule::Forward => {
                    for wave in waves.iter_mut() {
                        context.run_wave(wave)?;
                    }
                }
                Schedule::Reverse => {
                    for wave in waves.iter_mut().rev() {
                        context.run_wave(wave)?;
                    }
                }
            }

            let done = waves.iter().filter(|wave| wave.status == WaveStatus::Done).count();
            if done == waves.len() {
                break;
            }
            if done != 0 {
                return Err(SimError::BarrierMismatch);
            }

            context.memory.sync();
            context.output.barriers += 1;
            for wave in waves.iter_mut() {
                wave.status = WaveStatus::Running;
            }
        }

        let output = context.finish()?;
        debug!(
            "workgroup of {} lanes: {:?}, {} primitives, {} vertices, {} barriers",
            inputs.num_lanes,
            output.allocation,
            output.primitives.len(),
            output.vertices.len(),
            output.barriers
        );

        Ok(output)
    }
}

/// Runs every workgroup of a draw, each on a fresh compute unit.
#[cfg(not(feature = "parallel"))]
pub fn dispatch(
    program: &CompiledProgram,
    wave: WaveTarget,
    workgroups: &[WorkgroupInputs],
) -> Vec<Result<WorkgroupOutput, SimError>> {
    workgroups
        .iter()
        .map(|inputs| ComputeUnit::new(wave).run(program, inputs))
        .collect()
}

/// Runs every workgroup of a draw, each on a fresh compute unit.
#[cfg(feature = "parallel")]
pub fn dispatch(
    program: &CompiledProgram,
    wave: WaveTarget,
    workgroups: &[WorkgroupInputs],
) -> Vec<Result<WorkgroupOutput, SimError>> {
    use rayon::prelude::*;

    workgroups
        .par_iter()
        .map(|inputs| ComputeUnit::new(wave).run(program, inputs))
        .collect()
}
