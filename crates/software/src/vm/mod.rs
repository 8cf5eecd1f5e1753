mod compiler;
mod interpreter;

pub use compiler::*;
pub(crate) use interpreter::*;

use nggpass_core::ir::Value;

/// Structured control flow flattened into a linear op stream. Jump targets are op indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlatOp {
    Instr(Value),

    /// Jumps to `else_` when no lane takes the branch.
    If { cond: Value, else_: u32 },
    /// Jumps to `end` when no lane takes the else branch.
    Else { end: u32 },
    EndIf,

    Loop,
    Break,
    /// Jumps back past `start` while any lane is still iterating.
    EndLoop { start: u32 },
}
