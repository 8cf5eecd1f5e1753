use super::FlatOp;
use crate::SimError;
use bumpalo::{Bump, collections::Vec};
use nggpass_core::ir::{Block, Instr, Node, Program};

/// A lowered program ready for execution.
#[derive(Debug, Clone, Copy)]
pub struct CompiledProgram<'a> {
    program: &'a Program,
    ops: &'a [FlatOp],
}

impl<'a> CompiledProgram<'a> {
    /// Flattens `program` into the arena. Fails on programs that still contain geometry
    /// shader entry points.
    pub fn compile(arena: &'a Bump, program: &'a Program) -> Result<Self, SimError> {
        let mut unlowered = None;
        program.walk(|_, instr| {
            if let Instr::Intrinsic(intrinsic) = instr {
                if intrinsic.is_source_level() && unlowered.is_none() {
                    unlowered = Some(intrinsic);
                }
            }
        });

        if let Some(intrinsic) = unlowered {
            return Err(SimError::Unlowered(intrinsic));
        }

        let mut ops = Vec::new_in(arena);
        flatten(&mut ops, &program.body);

        Ok(Self {
            program,
            ops: ops.into_bump_slice(),
        })
    }

    pub fn program(&self) -> &'a Program {
        self.program
    }

    pub fn ops(&self) -> &'a [FlatOp] {
        self.ops
    }

    pub fn shared_size(&self) -> u32 {
        self.program.shared_size
    }
}

fn flatten(ops: &mut Vec<'_, FlatOp>, block: &Block) {
    for node in block {
        match node {
            Node::Instr(value) => ops.push(FlatOp::Instr(*value)),

            Node::If { cond, then_, else_ } => {
                let if_at = ops.len();
                ops.push(FlatOp::EndIf);
                flatten(ops, then_);

                let else_at = ops.len();
                ops.push(FlatOp::EndIf);
                flatten(ops, else_);

                let end = ops.len();
                ops.push(FlatOp::EndIf);

                ops[if_at] = FlatOp::If {
                    cond: *cond,
                    else_: else_at as u32,
                };
                ops[else_at] = FlatOp::Else { end: end as u32 };
            }

            Node::Loop(body) => {
                let start = ops.len();
                ops.push(FlatOp::Loop);
                flatten(ops, body);
                ops.push(FlatOp::EndLoop { start: start as u32 });
            }

            Node::Break => ops.push(FlatOp::Break),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nggpass_core::ir::{Builder, Stage};

    #[test]
    fn jump_targets() {
        let mut program = Program::new(Stage::Vertex);
        let mut b = Builder::new(&mut program);
        let cond = b.has_input_vertex();
        b.push_if(cond);
        b.push_loop();
        b.jump_break();
        b.pop_loop();
        b.pop_if();
        b.finish();

        let arena = Bump::new();
        let compiled = CompiledProgram::compile(&arena, &program).unwrap();
        assert_eq!(
            compiled.ops(),
            &[
                FlatOp::Instr(cond),
                FlatOp::If { cond, else_: 5 },
                FlatOp::Loop,
                FlatOp::Break,
                FlatOp::EndLoop { start: 2 },
                FlatOp::Else { end: 6 },
                FlatOp::EndIf,
            ]
        );
    }

    #[test]
    fn rejects_unlowered_programs() {
        let mut program = Program::new(Stage::Geometry);
        let mut b = Builder::new(&mut program);
        b.end_primitive(0);
        b.finish();

        let arena = Bump::new();
        assert!(matches!(
            CompiledProgram::compile(&arena, &program),
            Err(SimError::Unlowered(_))
        ));
    }
}
