use slotmap::new_key_type;
use std::fmt::Debug;

/// An SSA value: the result of exactly one instruction in a [`Program`](super::Program).
#[derive(Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct Value(u32);

new_key_type! {
    /// A function-local variable. Variables are the only way to carry a value out of the
    /// block that computed it.
    pub struct Var;
}

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum Type {
    Void,
    Bool,
    U8,
    U16,
    U32,
    U64,
}

/// Output varying location. Each `(slot, component)` pair belongs to exactly one vertex stream.
#[derive(Clone, Copy, Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct IoSlot {
    pub slot: u8,
    pub component: u8,
    pub stream: u8,
}

pub mod varying {
    pub const POS: u8 = 0;
    pub const PRIMITIVE_ID: u8 = 2;
    pub const VAR0: u8 = 32;
}

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum UnOp {
    BitCount,
    /// `(1 << n) - 1`, saturating to all ones for `n >= 64`. Always produces a `U64`.
    BitfieldMask,
    /// Sum of the eight bytes of the operand. Always produces a `U32`.
    ByteSum,
}

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    And,
    Or,
    Shl,
    Shr,
    UMin,

    Eq,
    Ne,
    Ult,
    Uge,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Intrinsic {
    SubgroupId,
    NumSubgroups,
    SubgroupInvocation,
    LocalInvocationIndex,

    HasInputVertex,
    HasInputPrimitive,
    WorkgroupNumInputVertices,
    WorkgroupNumInputPrimitives,
    /// Two 16-bit vertex indices of the current input primitive, packed low/high.
    /// `base` is the even vertex number of the pair.
    GsVertexOffset {
        base: u8,
    },
    PackedPassthroughPrimitive,
    InitialEdgeFlag {
        vertex: u8,
    },
    PrimitiveId,
    ShaderQueryEnabled,

    Ballot {
        value: Value,
        ty: Type,
    },
    /// Population count of the bits of `mask` that belong to lanes below the current one.
    MaskedBitCount(Value),
    ReadLane {
        value: Value,
        lane: Value,
    },
    ReadFirstLane(Value),
    Elect,
    ReduceAdd(Value),

    LoadShared {
        addr: Value,
        base: u32,
        ty: Type,
    },
    StoreShared {
        value: Value,
        addr: Value,
        base: u32,
    },
    /// Workgroup execution barrier with acquire-release semantics on shared memory.
    Barrier,
    QueryAtomicAdd {
        stream: u8,
        value: Value,
    },

    AllocVerticesAndPrimitives {
        vertices: Value,
        primitives: Value,
    },
    ExportPrimitive(Value),
    ExportVertex,
    StoreOutput {
        io: IoSlot,
        value: Value,
    },

    EmitVertex {
        stream: u8,
        vertex_count: Value,
        vertices_in_primitive: Value,
    },
    EndPrimitive {
        stream: u8,
    },
    SetVertexAndPrimitiveCount {
        stream: u8,
        vertex_count: Value,
        primitive_count: Value,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Instr {
    Const(Type, u64),
    Undef(Type),
    Unary(UnOp, Value),
    Binary(BinOp, Value, Value),
    Select(Value, Value, Value),
    Convert(Value, Type),
    Ubfe { value: Value, offset: u8, bits: u8 },
    LoadVar(Var),
    StoreVar(Var, Value),
    Intrinsic(Intrinsic),
}

impl Value {
    pub fn into_raw(self) -> usize {
        self.0 as _
    }

    pub fn from_raw(raw: usize) -> Self {
        Self(raw as _)
    }
}

impl Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "%{}", self.0)
    }
}

impl Type {
    pub fn bits(self) -> u32 {
        match self {
            Type::Void => 0,
            Type::Bool => 1,
            Type::U8 => 8,
            Type::U16 => 16,
            Type::U32 => 32,
            Type::U64 => 64,
        }
    }

    /// Size of the type when stored in shared memory.
    pub fn bytes(self) -> u32 {
        match self {
            Type::Void => 0,
            Type::Bool | Type::U8 => 1,
            Type::U16 => 2,
            Type::U32 => 4,
            Type::U64 => 8,
        }
    }

    pub fn mask(self) -> u64 {
        match self {
            Type::U64 => u64::MAX,
            other => (1u64 << other.bits()) - 1,
        }
    }

    pub fn is_int(self) -> bool {
        matches!(self, Type::U8 | Type::U16 | Type::U32 | Type::U64)
    }
}

impl BinOp {
    pub fn is_comparison(self) -> bool {
        matches!(self, BinOp::Eq | BinOp::Ne | BinOp::Ult | BinOp::Uge)
    }

    pub fn is_shift(self) -> bool {
        matches!(self, BinOp::Shl | BinOp::Shr)
    }

    pub fn eval(self, ty: Type, a: u64, b: u64) -> u64 {
        let mask = ty.mask();
        let bits = ty.bits() as u64;
        match self {
            BinOp::Add => a.wrapping_add(b) & mask,
            BinOp::Sub => a.wrapping_sub(b) & mask,
            BinOp::Mul => a.wrapping_mul(b) & mask,
            BinOp::And => a & b,
            BinOp::Or => a | b,
            BinOp::Shl if b >= bits => 0,
            BinOp::Shl => (a << b) & mask,
            BinOp::Shr if b >= bits => 0,
            BinOp::Shr => a >> b,
            BinOp::UMin => a.min(b),
            BinOp::Eq => (a == b) as u64,
            BinOp::Ne => (a != b) as u64,
            BinOp::Ult => (a < b) as u64,
            BinOp::Uge => (a >= b) as u64,
        }
    }
}

impl UnOp {
    pub fn eval(self, a: u64) -> u64 {
        match self {
            UnOp::BitCount => a.count_ones() as u64,
            UnOp::BitfieldMask if a >= 64 => u64::MAX,
            UnOp::BitfieldMask => (1u64 << a) - 1,
            UnOp::ByteSum => a.to_le_bytes().iter().map(|&x| x as u64).sum(),
        }
    }
}

impl Intrinsic {
    pub fn visit_operands(&self, mut f: impl FnMut(Value)) {
        use Intrinsic::*;
        match *self {
            Ballot { value, .. } => f(value),
            MaskedBitCount(v) | ReadFirstLane(v) | ReduceAdd(v) | ExportPrimitive(v) => f(v),
            ReadLane { value, lane } => {
                f(value);
                f(lane);
            }
            LoadShared { addr, .. } => f(addr),
            StoreShared { value, addr, .. } => {
                f(value);
                f(addr);
            }
            QueryAtomicAdd { value, .. } => f(value),
            AllocVerticesAndPrimitives { vertices, primitives } => {
                f(vertices);
                f(primitives);
            }
            StoreOutput { value, .. } => f(value),
            EmitVertex {
                vertex_count,
                vertices_in_primitive,
                ..
            } => {
                f(vertex_count);
                f(vertices_in_primitive);
            }
            SetVertexAndPrimitiveCount {
                vertex_count,
                primitive_count,
                ..
            } => {
                f(vertex_count);
                f(primitive_count);
            }
            SubgroupId
            | NumSubgroups
            | SubgroupInvocation
            | LocalInvocationIndex
            | HasInputVertex
            | HasInputPrimitive
            | WorkgroupNumInputVertices
            | WorkgroupNumInputPrimitives
            | GsVertexOffset { .. }
            | PackedPassthroughPrimitive
            | InitialEdgeFlag { .. }
            | PrimitiveId
            | ShaderQueryEnabled
            | Elect
            | Barrier
            | ExportVertex
            | EndPrimitive { .. } => {}
        }
    }

    /// Geometry-stage entry points that only exist before NGG lowering.
    pub fn is_source_level(&self) -> bool {
        matches!(
            self,
            Intrinsic::EmitVertex { .. } | Intrinsic::EndPrimitive { .. } | Intrinsic::SetVertexAndPrimitiveCount { .. }
        )
    }
}

impl Instr {
    pub fn visit_operands(&self, mut f: impl FnMut(Value)) {
        use Instr::*;
        match *self {
            Const(..) | Undef(_) | LoadVar(_) => {}
            Unary(_, a) | Convert(a, _) | StoreVar(_, a) => f(a),
            Ubfe { value, .. } => f(value),
            Binary(_, a, b) => {
                f(a);
                f(b);
            }
            Select(c, a, b) => {
                f(c);
                f(a);
                f(b);
            }
            Intrinsic(intrinsic) => intrinsic.visit_operands(f),
        }
    }

    pub fn as_const(&self) -> Option<u64> {
        match *self {
            Instr::Const(_, value) => Some(value),
            _ => None,
        }
    }

    /// Result type, given the types of the operands and variables.
    /// Returns `None` when the operand types don't fit the instruction.
    pub fn type_check(&self, arg: impl Fn(Value) -> Option<Type>, var: impl Fn(Var) -> Option<Type>) -> Option<Type> {
        use Type::*;

        Some(match *self {
            Instr::Const(ty, _) | Instr::Undef(ty) => ty,

            Instr::Unary(op, a) => {
                let a = arg(a)?;
                match op {
                    UnOp::BitCount if a.is_int() => U32,
                    UnOp::BitfieldMask if a.is_int() => U64,
                    UnOp::ByteSum if a.is_int() => U32,
                    _ => return None,
                }
            }

            Instr::Binary(op, a, b) => {
                let l = arg(a)?;
                let r = arg(b)?;
                match op {
                    _ if op.is_shift() && l.is_int() && r.is_int() => l,
                    _ if op.is_comparison() && l == r && (l.is_int() || l == Bool) => Bool,
                    BinOp::And | BinOp::Or if l == r && (l.is_int() || l == Bool) => l,
                    BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::UMin if l == r && l.is_int() => l,
                    _ => return None,
                }
            }

            Instr::Select(c, a, b) => {
                let c = arg(c)?;
                let l = arg(a)?;
                let r = arg(b)?;
                if c == Bool && l == r && l != Void {
                    l
                } else {
                    return None;
                }
            }

            Instr::Convert(a, ty) => match (arg(a)?, ty) {
                (Void, _) | (_, Void) => return None,
                _ => ty,
            },

            Instr::Ubfe { value, offset, bits } => {
                let ty = arg(value)?;
                if ty.is_int() && (offset as u32 + bits as u32) <= ty.bits() {
                    ty
                } else {
                    return None;
                }
            }

            Instr::LoadVar(v) => var(v)?,
            Instr::StoreVar(v, value) => {
                if var(v)? == arg(value)? {
                    Void
                } else {
                    return None;
                }
            }

            Instr::Intrinsic(intrinsic) => {
                use self::Intrinsic::*;
                match intrinsic {
                    SubgroupId
                    | NumSubgroups
                    | SubgroupInvocation
                    | LocalInvocationIndex
                    | WorkgroupNumInputVertices
                    | WorkgroupNumInputPrimitives
                    | GsVertexOffset { .. }
                    | PackedPassthroughPrimitive
                    | InitialEdgeFlag { .. }
                    | PrimitiveId => U32,

                    HasInputVertex | HasInputPrimitive | ShaderQueryEnabled | Elect => Bool,

                    Ballot { value, ty } => match (arg(value)?, ty) {
                        (Bool, U32 | U64) => ty,
                        _ => return None,
                    },
                    MaskedBitCount(mask) => match arg(mask)? {
                        U32 | U64 => U32,
                        _ => return None,
                    },
                    ReadLane { value, lane } => match (arg(value)?, arg(lane)?) {
                        (Void, _) => return None,
                        (ty, U32) => ty,
                        _ => return None,
                    },
                    ReadFirstLane(value) => match arg(value)? {
                        Void => return None,
                        ty => ty,
                    },
                    ReduceAdd(value) => match arg(value)? {
                        ty if ty.is_int() => ty,
                        _ => return None,
                    },

                    LoadShared { addr, ty, .. } => match arg(addr)? {
                        U32 if ty.is_int() => ty,
                        _ => return None,
                    },
                    StoreShared { value, addr, .. } => match (arg(value)?, arg(addr)?) {
                        (ty, U32) if ty.is_int() => Void,
                        _ => return None,
                    },
                    QueryAtomicAdd { value, .. } => match arg(value)? {
                        U32 => Void,
                        _ => return None,
                    },
                    AllocVerticesAndPrimitives { vertices, primitives } => match (arg(vertices)?, arg(primitives)?) {
                        (U32, U32) => Void,
                        _ => return None,
                    },
                    ExportPrimitive(value) => match arg(value)? {
                        U32 => Void,
                        _ => return None,
                    },
                    StoreOutput { value, .. } => match arg(value)? {
                        ty if ty.is_int() => Void,
                        _ => return None,
                    },
                    EmitVertex {
                        vertex_count,
                        vertices_in_primitive,
                        ..
                    } => match (arg(vertex_count)?, arg(vertices_in_primitive)?) {
                        (U32, U32) => Void,
                        _ => return None,
                    },
                    SetVertexAndPrimitiveCount {
                        vertex_count,
                        primitive_count,
                        ..
                    } => match (arg(vertex_count)?, arg(primitive_count)?) {
                        (U32, U32) => Void,
                        _ => return None,
                    },
                    Barrier | ExportVertex | EndPrimitive { .. } => Void,
                }
            }
        })
    }
}
