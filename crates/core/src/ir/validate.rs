use super::{Block, Instr, Node, Program, Type, Value};
use std::collections::HashSet;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum IrError {
    #[error("{operand:?} is used by {user:?} outside the block that defines it")]
    UseBeforeDef { operand: Value, user: Value },
    #[error("{0:?} is placed in the program more than once")]
    Duplicate(Value),
    #[error("{0:?} is not defined in this program")]
    Unknown(Value),
    #[error("operand types don't fit {value:?} = {instr:?}")]
    TypeMismatch { value: Value, instr: Instr },
    #[error("if condition {0:?} is not a boolean")]
    NonBoolCondition(Value),
    #[error("break outside of a loop")]
    BreakOutsideLoop,
}

impl Program {
    /// Checks that every placed instruction type checks, and only uses values that were
    /// defined earlier in the same block or an enclosing one.
    pub fn validate(&self) -> Result<(), IrError> {
        let mut state = Validator {
            program: self,
            placed: HashSet::new(),
            scopes: vec![HashSet::new()],
            loop_depth: 0,
        };

        state.block(&self.body)
    }
}

struct Validator<'a> {
    program: &'a Program,
    placed: HashSet<Value>,
    scopes: Vec<HashSet<Value>>,
    loop_depth: u32,
}

impl Validator<'_> {
    fn visible(&self, value: Value) -> bool {
        self.scopes.iter().any(|scope| scope.contains(&value))
    }

    fn check_use(&self, operand: Value, user: Value) -> Result<(), IrError> {
        if !self.program.contains(operand) {
            Err(IrError::Unknown(operand))
        } else if !self.visible(operand) {
            Err(IrError::UseBeforeDef { operand, user })
        } else {
            Ok(())
        }
    }

    fn nested(&mut self, block: &Block) -> Result<(), IrError> {
        self.scopes.push(HashSet::new());
        let result = self.block(block);
        self.scopes.pop();
        result
    }

    fn block(&mut self, block: &Block) -> Result<(), IrError> {
        for node in block {
            match node {
                Node::Instr(value) => self.instr(*value)?,
                Node::If { cond, then_, else_ } => {
                    if !self.program.contains(*cond) || !self.visible(*cond) {
                        return Err(IrError::Unknown(*cond));
                    }
                    if self.program.type_of(*cond) != Type::Bool {
                        return Err(IrError::NonBoolCondition(*cond));
                    }
                    self.nested(then_)?;
                    self.nested(else_)?;
                }
                Node::Loop(body) => {
                    self.loop_depth += 1;
                    let result = self.nested(body);
                    self.loop_depth -= 1;
                    result?;
                }
                Node::Break if self.loop_depth == 0 => return Err(IrError::BreakOutsideLoop),
                Node::Break => {}
            }
        }

        Ok(())
    }

    fn instr(&mut self, value: Value) -> Result<(), IrError> {
        if !self.program.contains(value) {
            return Err(IrError::Unknown(value));
        }
        if !self.placed.insert(value) {
            return Err(IrError::Duplicate(value));
        }

        let instr = self.program.instr(value);
        let mut result = Ok(());
        instr.visit_operands(|operand| {
            if result.is_ok() {
                result = self.check_use(operand, value);
            }
        });
        result?;

        let program = self.program;
        let checked = instr.type_check(
            |v| program.contains(v).then(|| program.type_of(v)),
            |v| program.var(v).map(|decl| decl.ty),
        );
        if checked != Some(program.type_of(value)) {
            return Err(IrError::TypeMismatch { value, instr });
        }

        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(value);
        }

        Ok(())
    }
}
