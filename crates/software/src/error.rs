use nggpass_core::ir::Intrinsic;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SimError {
    #[error("invalid launch: {0}")]
    Launch(&'static str),
    #[error("{0:?} must be lowered before execution")]
    Unlowered(Intrinsic),
    #[error("wave {wave} reached a barrier with lanes {active:#x} of {expected:#x} active")]
    DivergentBarrier { wave: u32, active: u64, expected: u64 },
    #[error("some waves finished while others wait on a barrier")]
    BarrierMismatch,
    #[error("lane {lane} accesses {len} shared bytes at {addr}, past the {size} byte workgroup size")]
    OutOfBounds { lane: u32, addr: u64, len: u32, size: u32 },
    #[error("wave {wave} and wave {other} access shared byte {addr} without a barrier in between")]
    Race { addr: u32, wave: u32, other: u32 },
    #[error("lanes {lane} and {other} both write shared byte {addr} without a barrier in between")]
    WriteConflict { addr: u32, lane: u32, other: u32 },
    #[error("invalid output allocation: {0}")]
    Allocation(&'static str),
    #[error("lane {lane} exports a {kind} outside of the allocated space")]
    ExportOutOfRange { lane: u32, kind: &'static str },
    #[error("wave {0} did not finish within the step limit")]
    StepLimit(u32),
}
