use super::{BinOp, Block, Instr, Intrinsic, IoSlot, Node, Program, Type, UnOp, Value, Var};

/// Appends instructions and structured control flow to a [`Program`].
///
/// The builder takes the program body on creation and puts it back in [`Builder::finish`];
/// new nodes are always appended at the end of the innermost open block.
pub struct Builder<'a> {
    program: &'a mut Program,
    frames: Vec<Frame>,
}

enum Frame {
    Root(Block),
    Then { cond: Value, then_: Block },
    Else { cond: Value, then_: Block, else_: Block },
    Loop(Block),
}

impl<'a> Builder<'a> {
    pub fn new(program: &'a mut Program) -> Self {
        let body = program.take_body();
        Self {
            program,
            frames: vec![Frame::Root(body)],
        }
    }

    pub fn finish(mut self) {
        match (self.frames.pop(), self.frames.is_empty()) {
            (Some(Frame::Root(body)), true) => self.program.body = body,
            _ => panic!("unbalanced control flow in builder"),
        }
    }

    pub fn program(&self) -> &Program {
        self.program
    }

    pub fn create_var(&mut self, name: &'static str, ty: Type) -> Var {
        self.program.create_var(name, ty)
    }

    pub fn type_of(&self, value: Value) -> Type {
        self.program.type_of(value)
    }

    fn block(&mut self) -> &mut Block {
        match self.frames.last_mut() {
            Some(Frame::Root(block) | Frame::Loop(block)) => block,
            Some(Frame::Then { then_, .. }) => then_,
            Some(Frame::Else { else_, .. }) => else_,
            None => unreachable!(),
        }
    }

    /// Creates an instruction and places it at the cursor.
    pub fn push(&mut self, instr: Instr) -> Value {
        let program = &*self.program;
        let type_ = instr
            .type_check(
                |v| program.contains(v).then(|| program.type_of(v)),
                |v| program.var(v).map(|decl| decl.ty),
            )
            .unwrap_or(Type::Void);

        let value = self.program.push(instr, type_);
        self.block().push(Node::Instr(value));
        value
    }

    /// Places already existing nodes at the cursor.
    pub fn insert(&mut self, nodes: impl IntoIterator<Item = Node>) {
        self.block().extend(nodes);
    }

    pub fn push_if(&mut self, cond: Value) {
        self.frames.push(Frame::Then {
            cond,
            then_: Block::new(),
        });
    }

    pub fn push_else(&mut self) {
        match self.frames.pop() {
            Some(Frame::Then { cond, then_ }) => self.frames.push(Frame::Else {
                cond,
                then_,
                else_: Block::new(),
            }),
            _ => panic!("push_else without push_if"),
        }
    }

    pub fn pop_if(&mut self) {
        let node = match self.frames.pop() {
            Some(Frame::Then { cond, then_ }) => Node::If {
                cond,
                then_,
                else_: Block::new(),
            },
            Some(Frame::Else { cond, then_, else_ }) => Node::If { cond, then_, else_ },
            _ => panic!("pop_if without push_if"),
        };
        self.block().push(node);
    }

    pub fn push_loop(&mut self) {
        self.frames.push(Frame::Loop(Block::new()));
    }

    pub fn pop_loop(&mut self) {
        match self.frames.pop() {
            Some(Frame::Loop(body)) => self.block().push(Node::Loop(body)),
            _ => panic!("pop_loop without push_loop"),
        }
    }

    pub fn jump_break(&mut self) {
        self.block().push(Node::Break);
    }

    // constants

    pub fn imm(&mut self, ty: Type, value: u64) -> Value {
        self.push(Instr::Const(ty, value & ty.mask()))
    }

    pub fn imm32(&mut self, value: u32) -> Value {
        self.imm(Type::U32, value as u64)
    }

    pub fn imm_bool(&mut self, value: bool) -> Value {
        self.imm(Type::Bool, value as u64)
    }

    pub fn undef(&mut self, ty: Type) -> Value {
        self.push(Instr::Undef(ty))
    }

    // alu

    pub fn binary(&mut self, op: BinOp, a: Value, b: Value) -> Value {
        self.push(Instr::Binary(op, a, b))
    }

    pub fn iadd(&mut self, a: Value, b: Value) -> Value {
        self.binary(BinOp::Add, a, b)
    }

    pub fn isub(&mut self, a: Value, b: Value) -> Value {
        self.binary(BinOp::Sub, a, b)
    }

    pub fn imul(&mut self, a: Value, b: Value) -> Value {
        self.binary(BinOp::Mul, a, b)
    }

    pub fn iand(&mut self, a: Value, b: Value) -> Value {
        self.binary(BinOp::And, a, b)
    }

    pub fn ior(&mut self, a: Value, b: Value) -> Value {
        self.binary(BinOp::Or, a, b)
    }

    pub fn ishl(&mut self, a: Value, b: Value) -> Value {
        self.binary(BinOp::Shl, a, b)
    }

    pub fn umin(&mut self, a: Value, b: Value) -> Value {
        self.binary(BinOp::UMin, a, b)
    }

    pub fn ieq(&mut self, a: Value, b: Value) -> Value {
        self.binary(BinOp::Eq, a, b)
    }

    pub fn ine(&mut self, a: Value, b: Value) -> Value {
        self.binary(BinOp::Ne, a, b)
    }

    pub fn ult(&mut self, a: Value, b: Value) -> Value {
        self.binary(BinOp::Ult, a, b)
    }

    pub fn uge(&mut self, a: Value, b: Value) -> Value {
        self.binary(BinOp::Uge, a, b)
    }

    pub fn iadd_imm(&mut self, a: Value, imm: u64) -> Value {
        let imm = self.imm(self.type_of(a), imm);
        self.iadd(a, imm)
    }

    pub fn isub_imm(&mut self, a: Value, imm: u64) -> Value {
        let imm = self.imm(self.type_of(a), imm);
        self.isub(a, imm)
    }

    pub fn imul_imm(&mut self, a: Value, imm: u64) -> Value {
        let imm = self.imm(self.type_of(a), imm);
        self.imul(a, imm)
    }

    pub fn iand_imm(&mut self, a: Value, imm: u64) -> Value {
        let imm = self.imm(self.type_of(a), imm);
        self.iand(a, imm)
    }

    pub fn ishl_imm(&mut self, a: Value, shift: u32) -> Value {
        let shift = self.imm32(shift);
        self.ishl(a, shift)
    }

    pub fn ieq_imm(&mut self, a: Value, imm: u64) -> Value {
        let imm = self.imm(self.type_of(a), imm);
        self.ieq(a, imm)
    }

    pub fn ine_imm(&mut self, a: Value, imm: u64) -> Value {
        let imm = self.imm(self.type_of(a), imm);
        self.ine(a, imm)
    }

    pub fn ult_imm(&mut self, a: Value, imm: u64) -> Value {
        let imm = self.imm(self.type_of(a), imm);
        self.ult(a, imm)
    }

    pub fn uge_imm(&mut self, a: Value, imm: u64) -> Value {
        let imm = self.imm(self.type_of(a), imm);
        self.uge(a, imm)
    }

    pub fn bit_count(&mut self, a: Value) -> Value {
        self.push(Instr::Unary(UnOp::BitCount, a))
    }

    pub fn bitfield_mask(&mut self, bits: Value) -> Value {
        self.push(Instr::Unary(UnOp::BitfieldMask, bits))
    }

    pub fn byte_sum(&mut self, a: Value) -> Value {
        self.push(Instr::Unary(UnOp::ByteSum, a))
    }

    pub fn select(&mut self, cond: Value, a: Value, b: Value) -> Value {
        self.push(Instr::Select(cond, a, b))
    }

    pub fn convert(&mut self, a: Value, ty: Type) -> Value {
        if self.type_of(a) == ty {
            a
        } else {
            self.push(Instr::Convert(a, ty))
        }
    }

    pub fn ubfe(&mut self, value: Value, offset: u8, bits: u8) -> Value {
        self.push(Instr::Ubfe { value, offset, bits })
    }

    // variables

    pub fn load_var(&mut self, var: Var) -> Value {
        self.push(Instr::LoadVar(var))
    }

    pub fn store_var(&mut self, var: Var, value: Value) {
        self.push(Instr::StoreVar(var, value));
    }

    // intrinsics

    pub fn intrinsic(&mut self, intrinsic: Intrinsic) -> Value {
        self.push(Instr::Intrinsic(intrinsic))
    }

    pub fn subgroup_id(&mut self) -> Value {
        self.intrinsic(Intrinsic::SubgroupId)
    }

    pub fn num_subgroups(&mut self) -> Value {
        self.intrinsic(Intrinsic::NumSubgroups)
    }

    pub fn subgroup_invocation(&mut self) -> Value {
        self.intrinsic(Intrinsic::SubgroupInvocation)
    }

    pub fn local_invocation_index(&mut self) -> Value {
        self.intrinsic(Intrinsic::LocalInvocationIndex)
    }

    pub fn has_input_vertex(&mut self) -> Value {
        self.intrinsic(Intrinsic::HasInputVertex)
    }

    pub fn has_input_primitive(&mut self) -> Value {
        self.intrinsic(Intrinsic::HasInputPrimitive)
    }

    pub fn load_shared(&mut self, addr: Value, base: u32, ty: Type) -> Value {
        self.intrinsic(Intrinsic::LoadShared { addr, base, ty })
    }

    pub fn store_shared(&mut self, value: Value, addr: Value, base: u32) {
        self.intrinsic(Intrinsic::StoreShared { value, addr, base });
    }

    pub fn barrier(&mut self) {
        self.intrinsic(Intrinsic::Barrier);
    }

    pub fn store_output(&mut self, io: IoSlot, value: Value) {
        self.intrinsic(Intrinsic::StoreOutput { io, value });
    }

    pub fn export_vertex(&mut self) {
        self.intrinsic(Intrinsic::ExportVertex);
    }

    pub fn export_primitive(&mut self, arg: Value) {
        self.intrinsic(Intrinsic::ExportPrimitive(arg));
    }

    pub fn alloc_vertices_and_primitives(&mut self, vertices: Value, primitives: Value) {
        self.intrinsic(Intrinsic::AllocVerticesAndPrimitives { vertices, primitives });
    }

    // geometry shader entry points, before lowering

    pub fn emit_vertex(&mut self, stream: u8, vertex_count: Value, vertices_in_primitive: Value) {
        self.intrinsic(Intrinsic::EmitVertex {
            stream,
            vertex_count,
            vertices_in_primitive,
        });
    }

    pub fn end_primitive(&mut self, stream: u8) {
        self.intrinsic(Intrinsic::EndPrimitive { stream });
    }

    pub fn set_vertex_and_primitive_count(&mut self, stream: u8, vertex_count: Value, primitive_count: Value) {
        self.intrinsic(Intrinsic::SetVertexAndPrimitiveCount {
            stream,
            vertex_count,
            primitive_count,
        });
    }
}
