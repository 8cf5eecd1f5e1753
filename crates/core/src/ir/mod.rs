mod builder;
mod op;
mod validate;

use slotmap::SlotMap;
use std::fmt::Debug;

pub use builder::Builder;
pub use op::*;
pub use validate::IrError;

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum Stage {
    Vertex,
    TessEval,
    Geometry,
    Fragment,
}

/// A structured list of nodes. Control flow only nests, it never jumps.
pub type Block = Vec<Node>;

#[derive(Clone, Debug, PartialEq)]
pub enum Node {
    Instr(Value),
    If { cond: Value, then_: Block, else_: Block },
    Loop(Block),
    /// Leaves the innermost enclosing [`Node::Loop`].
    Break,
}

#[derive(Clone, Debug)]
pub struct VarDecl {
    pub name: &'static str,
    pub ty: Type,
}

/// A shader program.
///
/// Instructions live in a flat table addressed by [`Value`]; the structured `body` decides
/// where and under which control flow each of them executes.
#[derive(Clone)]
pub struct Program {
    pub stage: Stage,
    pub body: Block,
    /// Shared memory required per workgroup, in bytes.
    pub shared_size: u32,

    instrs: Vec<InstrData>,
    vars: SlotMap<Var, VarDecl>,
}

#[derive(Clone)]
struct InstrData {
    instr: Instr,
    type_: Type,
}

impl Program {
    pub fn new(stage: Stage) -> Self {
        Self {
            stage,
            body: Block::new(),
            shared_size: 0,
            instrs: Vec::new(),
            vars: SlotMap::with_key(),
        }
    }

    pub fn instr(&self, value: Value) -> Instr {
        self.instrs[value.into_raw()].instr
    }

    pub fn type_of(&self, value: Value) -> Type {
        self.instrs[value.into_raw()].type_
    }

    pub fn num_values(&self) -> usize {
        self.instrs.len()
    }

    pub fn contains(&self, value: Value) -> bool {
        value.into_raw() < self.instrs.len()
    }

    pub fn var(&self, var: Var) -> Option<&VarDecl> {
        self.vars.get(var)
    }

    pub fn vars(&self) -> impl Iterator<Item = (Var, &VarDecl)> + '_ {
        self.vars.iter()
    }

    pub fn create_var(&mut self, name: &'static str, ty: Type) -> Var {
        self.vars.insert(VarDecl { name, ty })
    }

    pub fn take_body(&mut self) -> Block {
        std::mem::take(&mut self.body)
    }

    /// True when the body has no control flow at all.
    pub fn is_straight_line(&self) -> bool {
        self.body.iter().all(|node| matches!(node, Node::Instr(_)))
    }

    /// Visits every instruction placed in the body, in program order.
    pub fn walk(&self, mut f: impl FnMut(Value, Instr)) {
        fn walk_block(program: &Program, block: &Block, f: &mut impl FnMut(Value, Instr)) {
            for node in block {
                match node {
                    Node::Instr(value) => f(*value, program.instr(*value)),
                    Node::If { then_, else_, .. } => {
                        walk_block(program, then_, f);
                        walk_block(program, else_, f);
                    }
                    Node::Loop(body) => walk_block(program, body, f),
                    Node::Break => {}
                }
            }
        }

        walk_block(self, &self.body, &mut f);
    }

    /// Placed intrinsics matching `pred`, in program order.
    pub fn count_intrinsics(&self, mut pred: impl FnMut(&Intrinsic) -> bool) -> usize {
        let mut count = 0;
        self.walk(|_, instr| {
            if let Instr::Intrinsic(intrinsic) = instr {
                if pred(&intrinsic) {
                    count += 1;
                }
            }
        });
        count
    }

    fn push(&mut self, instr: Instr, type_: Type) -> Value {
        self.instrs.push(InstrData { instr, type_ });
        Value::from_raw(self.instrs.len() - 1)
    }
}

impl Debug for Program {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fn fmt_block(program: &Program, block: &Block, depth: usize, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            let indent = "    ".repeat(depth);
            for node in block {
                match node {
                    Node::Instr(value) => {
                        let ty = program.type_of(*value);
                        let instr = program.instr(*value);
                        match instr {
                            Instr::LoadVar(var) | Instr::StoreVar(var, _) => {
                                let name = program.var(var).map(|v| v.name).unwrap_or("?");
                                writeln!(f, "{indent}{value:?} {ty:?} = {instr:?} ({name})")?
                            }
                            _ => writeln!(f, "{indent}{value:?} {ty:?} = {instr:?}")?,
                        }
                    }
                    Node::If { cond, then_, else_ } => {
                        writeln!(f, "{indent}if {cond:?} {{")?;
                        fmt_block(program, then_, depth + 1, f)?;
                        if !else_.is_empty() {
                            writeln!(f, "{indent}}} else {{")?;
                            fmt_block(program, else_, depth + 1, f)?;
                        }
                        writeln!(f, "{indent}}}")?;
                    }
                    Node::Loop(body) => {
                        writeln!(f, "{indent}loop {{")?;
                        fmt_block(program, body, depth + 1, f)?;
                        writeln!(f, "{indent}}}")?;
                    }
                    Node::Break => writeln!(f, "{indent}break")?,
                }
            }
            Ok(())
        }

        writeln!(f, "Program({:?}, shared = {}) {{", self.stage, self.shared_size)?;
        fmt_block(self, &self.body, 1, f)?;
        writeln!(f, "}}")
    }
}
